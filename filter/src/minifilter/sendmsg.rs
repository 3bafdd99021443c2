//! Kernel-to-user notification with a bounded wait for the verdict.
//!
//! Key responsibilities:
//! - Build the `AccessNotification` for one intercepted request.
//! - Hand it to the communication port and wait for the reply.
//! - Fail open: no client, a timeout, a disconnect or any send error all
//!   let the operation proceed.

use std::time::Duration;

use shared::{AccessNotification, OperationKind, VerdictReply};
use thiserror::Error;

use crate::consts::{STATUS_PORT_DISCONNECTED, STATUS_TIMEOUT};
use crate::minifilter::callbacks::CallbackData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("no client connected")]
    NoClient,

    #[error("no reply within the timeout")]
    Timeout,

    #[error("client port disconnected")]
    PortDisconnected,

    #[error("send failed with status 0x{0:08X}")]
    Failed(i32),
}

impl SendError {
    /// NTSTATUS the Filter Manager would have reported.
    pub fn status(self) -> i32 {
        match self {
            SendError::NoClient | SendError::PortDisconnected => STATUS_PORT_DISCONNECTED,
            SendError::Timeout => STATUS_TIMEOUT,
            SendError::Failed(status) => status,
        }
    }
}

/// Anything able to deliver a notification and return the matching reply.
pub trait Notifier: Send + Sync {
    /// Cheap check made before any name lookup.
    fn has_client(&self) -> bool {
        true
    }

    fn send(&self, notification: &AccessNotification, timeout: Duration) -> Result<VerdictReply, SendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

/// Ask the listener about one request.
pub fn send_notification(
    notifier: &dyn Notifier,
    data: &CallbackData<'_>,
    operation: OperationKind,
    timeout: Duration,
) -> Verdict {
    if !notifier.has_client() {
        return Verdict::Allow;
    }

    // Name lookup failed upstream.
    let Some(file_name) = data.file_name else {
        return Verdict::Allow;
    };

    let notification = match AccessNotification::new(data.process_id, data.process_name, file_name, operation) {
        Ok(n) => n,
        Err(e) => {
            log::debug!("AVF: not notifying {operation} by pid {}: {e}", data.process_id);
            return Verdict::Allow;
        }
    };

    match notifier.send(&notification, timeout) {
        Ok(reply) if reply.block_operation => {
            log::info!("AVF: blocking {operation} on {file_name} (pid {})", data.process_id);
            Verdict::Deny
        }
        Ok(_) => Verdict::Allow,
        Err(SendError::NoClient | SendError::PortDisconnected) => Verdict::Allow,
        Err(SendError::Timeout) => {
            log::warn!("AVF: timeout waiting for user response on {file_name}");
            Verdict::Allow
        }
        Err(e @ SendError::Failed(_)) => {
            log::warn!("AVF: failed to send notification, status=0x{:08X}", e.status());
            Verdict::Allow
        }
    }
}
