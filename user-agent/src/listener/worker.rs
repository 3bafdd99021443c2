//! One listener worker: completion → decision → reply → re-arm.

use std::sync::Arc;
use std::time::Duration;

use log::Level;
use shared::{
    AccessNotification, Completion, Decision, MessagePort, VerdictReply, WaitError, WireError,
};

use crate::listener::{DecisionSource, ShutdownToken};
use crate::registry::ProtectedPaths;
use crate::telemetry;

/// Why a verdict came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Path not in the registry.
    NotProtected,
    /// Protected, but no consultant configured.
    NoConsultant,
    Allowed,
    Blocked { reason: u32 },
    /// Consultant could not be reached or gave no valid answer.
    Unavailable,
    /// Message body failed to decode.
    Undecodable,
}

impl Outcome {
    pub fn blocks(self) -> bool {
        matches!(self, Outcome::Blocked { .. })
    }

    pub fn label(self) -> &'static str {
        match self {
            Outcome::NotProtected => "not_protected",
            Outcome::NoConsultant => "no_consultant",
            Outcome::Allowed => "allowed",
            Outcome::Blocked { .. } => "blocked",
            Outcome::Unavailable => "consultant_unavailable",
            Outcome::Undecodable => "undecodable",
        }
    }
}

/// Verdict for one notification.
pub fn decide(
    notification: &AccessNotification,
    registry: &ProtectedPaths,
    source: Option<&dyn DecisionSource>,
) -> Outcome {
    if !registry.is_protected(&notification.file_name.to_string_lossy()) {
        return Outcome::NotProtected;
    }
    let Some(source) = source else {
        return Outcome::NoConsultant;
    };
    if !source.is_ready() && !source.try_reconnect() {
        return Outcome::Unavailable;
    }
    match source.try_query(notification) {
        Some(resp) if resp.decision == Decision::Block => Outcome::Blocked { reason: resp.reason },
        Some(_) => Outcome::Allowed,
        None => Outcome::Unavailable,
    }
}

/// Per-worker counters returned when the thread exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub handled: u64,
    pub blocked: u64,
    pub failed_replies: u64,
}

impl WorkerStats {
    pub fn merge(&mut self, other: WorkerStats) {
        self.handled += other.handled;
        self.blocked += other.blocked;
        self.failed_replies += other.failed_replies;
    }
}

pub(crate) struct Worker {
    pub(crate) id: usize,
    pub(crate) port: Arc<dyn MessagePort>,
    pub(crate) registry: Arc<ProtectedPaths>,
    pub(crate) source: Option<Arc<dyn DecisionSource>>,
    pub(crate) token: ShutdownToken,
    pub(crate) poll_interval: Option<Duration>,
}

impl Worker {
    pub(crate) fn run(self) -> WorkerStats {
        avf_log!(Level::Debug, "listener", "worker {} started", self.id);
        let mut stats = WorkerStats::default();

        while !self.token.is_cancelled() {
            match self.port.wait_completion(self.poll_interval) {
                Ok(Completion::Wakeup) => break,
                Ok(Completion::Message { slot, message_id, notification }) => {
                    self.handle(slot, message_id, notification, &mut stats);
                }
                Err(WaitError::Timeout | WaitError::Aborted { .. }) => continue,
                Err(WaitError::Failed(e)) => {
                    avf_log!(Level::Error, "listener", "worker {}: completion wait failed: {}", self.id, e);
                    break;
                }
            }
        }

        avf_log!(Level::Debug, "listener", "worker {} exiting ({} handled)", self.id, stats.handled);
        stats
    }

    fn handle(
        &self,
        slot: usize,
        message_id: u64,
        notification: Result<AccessNotification, WireError>,
        stats: &mut WorkerStats,
    ) {
        let outcome = match &notification {
            Ok(n) => {
                metrics::counter!(telemetry::NOTIFICATIONS, "operation" => n.operation.as_str()).increment(1);
                let outcome = decide(n, &self.registry, self.source.as_deref());
                self.log_verdict(n, outcome);
                outcome
            }
            Err(e) => {
                metrics::counter!(telemetry::UNDECODABLE).increment(1);
                avf_log!(Level::Warn, "listener", "worker {}: undecodable message {}: {}", self.id, message_id, e);
                Outcome::Undecodable
            }
        };

        let reply = if outcome.blocks() {
            VerdictReply::block(message_id)
        } else {
            VerdictReply::allow(message_id)
        };
        if let Err(e) = self.port.reply(&reply) {
            stats.failed_replies += 1;
            metrics::counter!(telemetry::REPLY_FAILURES).increment(1);
            avf_log!(Level::Warn, "listener", "worker {}: reply to {} failed: {}", self.id, message_id, e);
        }
        stats.handled += 1;
        if outcome.blocks() {
            stats.blocked += 1;
        }
        metrics::counter!(telemetry::VERDICTS, "outcome" => outcome.label()).increment(1);

        // Same buffer, next message.
        if !self.token.is_cancelled() {
            if let Err(e) = self.port.get_message(slot) {
                avf_log!(Level::Warn, "listener", "worker {}: re-arming slot {} failed: {}", self.id, slot, e);
            }
        }
    }

    fn log_verdict(&self, n: &AccessNotification, outcome: Outcome) {
        let (level, verdict) = match outcome {
            Outcome::NotProtected => return,
            Outcome::Blocked { reason } => (Level::Warn, format!("BLOCKED by consultant (reason code: {reason})")),
            Outcome::Allowed => (Level::Info, "ALLOWED by consultant".to_string()),
            Outcome::Unavailable => (Level::Info, "consultant unavailable, allowing".to_string()),
            Outcome::NoConsultant => (Level::Info, "allowed (no consultant)".to_string()),
            Outcome::Undecodable => (Level::Warn, "undecodable, allowing".to_string()),
        };
        avf_log!(
            level,
            "listener",
            "worker {} [{}] PID: {:>5}  Process: {:<20}  File: {} -> {}",
            self.id,
            n.operation.label(),
            n.process_id,
            n.process_name,
            n.file_name,
            verdict
        );
    }
}
