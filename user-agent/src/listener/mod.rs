//! Listener worker pool.
//!
//! Key responsibilities:
//! - Keep `pending_reads` asynchronous reads armed on the filter port.
//! - Run `workers` threads that pull completions, decide, reply and re-arm.
//! - Ask the consultant only for protected paths, failing open otherwise.
//! - Shut down cooperatively: cancel reads, wake every worker, bounded join.

pub mod pool;
pub mod shutdown;
pub mod worker;

pub use pool::{ListenerPool, ListenerSettings, ShutdownReport};
pub use shutdown::ShutdownToken;
pub use worker::{Outcome, WorkerStats, decide};

use shared::{AccessNotification, ConsultantResponse, PortError};
use thiserror::Error;

/// What a worker asks about protected accesses.
pub trait DecisionSource: Send + Sync {
    /// Link is up; checked without blocking on in-flight queries.
    fn is_ready(&self) -> bool;

    /// One synchronous connect + handshake attempt.
    fn try_reconnect(&self) -> bool;

    /// `None` when no valid answer could be obtained.
    fn try_query(&self, notification: &AccessNotification) -> Option<ConsultantResponse>;

    fn disconnect(&self);
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("listener needs at least one worker")]
    NoWorkers,

    #[error("failed to spawn worker {id}: {source}")]
    Spawn {
        id: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to arm read slot {slot}: {source}")]
    Arm {
        slot: usize,
        #[source]
        source: PortError,
    },
}
