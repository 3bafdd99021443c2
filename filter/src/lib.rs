//! Kernel side of the AVF protocol, expressed without a kernel.
//!
//! * [`minifilter`]     – pre-operation callbacks for open/read/write. They
//!                        decide eligibility, build the notification and map
//!                        the listener's answer (or its absence) onto the
//!                        operation's final status.
//! * [`communications`] – the loopback communication port: a faithful
//!                        in-process stand-in for the Filter Manager port
//!                        (correlated replies, bounded waits, armed reads,
//!                        one client at a time).
//! * [`consts`]         – NTSTATUS codes and request flags.

pub mod communications;
pub mod consts;
pub mod minifilter;

pub use communications::port::{ClientPort, CommunicationPort, PortStats};
pub use minifilter::callbacks::{CallbackData, Interceptor, PreOpStatus, RequestorMode};
pub use minifilter::sendmsg::{Notifier, SendError, Verdict};
