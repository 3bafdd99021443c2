//! Types shared by the interception point (`avf-filter`) and the user-mode
//! listener (`avf-agent`).
//!
//! * [`wire`]      – fixed-size records exchanged over the filter port and
//!                   the consultant pipe, with their byte codecs.
//! * [`port`]      – the contract a listener expects from a filter
//!                   communication port (arm reads, wait, reply, cancel).
//! * [`constants`] – names, limits and protocol numbers both sides agree on.

pub mod constants;
pub mod port;
pub mod wire;

pub use port::{Completion, MessagePort, PortError, WaitError};
pub use wire::{
    AccessNotification, ConsultantRequest, ConsultantResponse, Decision, FilterCommand,
    FilterVersion, MessageHeader, OperationKind, VerdictReply, WideText, WireError,
};
