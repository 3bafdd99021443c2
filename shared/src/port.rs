//! Contract between a filter communication port and the listener pool.
//!
//! The listener never talks to the Filter Manager directly; it drives any
//! [`MessagePort`]:
//!
//!   1. `get_message(slot)` arms one asynchronous read into a buffer the port
//!      owns. Up to `slot_count()` reads may be outstanding at once.
//!   2. `wait_completion()` hands out one finished read (or a wake-up posted
//!      with `post_wakeup()`), whichever worker asks first.
//!   3. `reply()` answers the notification by its message id.
//!   4. `cancel_io()` aborts every outstanding read during shutdown.
//!
//! The Windows implementation sits on FilterGetMessage + an I/O completion
//! port; the loopback implementation in `avf-filter` backs the tests.

use std::time::Duration;

use thiserror::Error;

use crate::wire::{AccessNotification, FilterVersion, VerdictReply, WireError};

#[derive(Debug, Error)]
pub enum PortError {
    #[error("no filter port connection")]
    NotConnected,

    #[error("filter port already has a client")]
    ConnectionLimit,

    #[error("filter port disconnected")]
    Disconnected,

    #[error("slot {slot} is out of range (port has {count})")]
    InvalidSlot { slot: usize, count: usize },

    #[error("slot {0} already has a read outstanding")]
    SlotBusy(usize),

    #[error("no caller is waiting for a reply to message {0}")]
    NoWaiter(u64),

    #[error("malformed record: {0}")]
    Wire(#[from] WireError),

    #[error("{context} failed with 0x{code:08X}")]
    Os { context: &'static str, code: i32 },

    #[error("filter communication ports are not available on this platform")]
    Unsupported,
}

/// One item taken from the completion queue.
#[derive(Debug)]
pub enum Completion {
    /// A read finished: `slot` now holds a message the caller must answer.
    Message {
        slot: usize,
        message_id: u64,
        notification: Result<AccessNotification, WireError>,
    },
    /// Posted by `post_wakeup()`; carries no message.
    Wakeup,
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("no completion within the poll interval")]
    Timeout,

    #[error("read on slot {slot:?} was cancelled")]
    Aborted { slot: Option<usize> },

    #[error("completion wait failed: {0}")]
    Failed(PortError),
}

pub trait MessagePort: Send + Sync {
    /// Number of read buffers owned by the port.
    fn slot_count(&self) -> usize;

    /// Arm one asynchronous read into `slot`.
    fn get_message(&self, slot: usize) -> Result<(), PortError>;

    /// Block until a read completes or a wake-up arrives. `None` waits forever.
    fn wait_completion(&self, timeout: Option<Duration>) -> Result<Completion, WaitError>;

    fn post_wakeup(&self) -> Result<(), PortError>;

    fn reply(&self, reply: &VerdictReply) -> Result<(), PortError>;

    /// Abort all outstanding reads. Each aborted read surfaces as
    /// [`WaitError::Aborted`].
    fn cancel_io(&self);

    /// In-band version query answered by the filter itself.
    fn query_version(&self) -> Result<FilterVersion, PortError>;
}
