//! Worker pool lifecycle.
//!
//! ```text
//!   start():    spawn W workers ─▶ arm P reads (slot 0..P)
//!   shutdown(): cancel token ─▶ cancel_io ─▶ W wake-ups ─▶ bounded join
//!               ─▶ disconnect consultant
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use log::Level;
use shared::MessagePort;

use crate::listener::worker::{Worker, WorkerStats};
use crate::listener::{DecisionSource, ListenerError, ShutdownToken};
use crate::registry::ProtectedPaths;

#[derive(Debug, Clone, Copy)]
pub struct ListenerSettings {
    pub workers: usize,
    /// `None`: block until a completion or wake-up.
    pub poll_interval: Option<Duration>,
}

/// How the pool came down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub joined: usize,
    /// Workers still running when the timeout expired; left detached.
    pub abandoned: usize,
    pub stats: WorkerStats,
}

/// Reports a worker's exit even if it panics.
struct ExitGuard {
    id: usize,
    tx: Sender<usize>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(self.id);
    }
}

pub struct ListenerPool {
    port: Arc<dyn MessagePort>,
    source: Option<Arc<dyn DecisionSource>>,
    token: ShutdownToken,
    handles: Vec<(usize, JoinHandle<WorkerStats>)>,
    exited: Receiver<usize>,
}

impl ListenerPool {
    pub fn start(
        port: Arc<dyn MessagePort>,
        registry: Arc<ProtectedPaths>,
        source: Option<Arc<dyn DecisionSource>>,
        settings: ListenerSettings,
    ) -> Result<Self, ListenerError> {
        if settings.workers == 0 {
            return Err(ListenerError::NoWorkers);
        }

        let token = ShutdownToken::new();
        let (exit_tx, exited) = channel::bounded(settings.workers);
        let mut pool = ListenerPool {
            port: Arc::clone(&port),
            source: source.clone(),
            token: token.clone(),
            handles: Vec::with_capacity(settings.workers),
            exited,
        };

        /* ── 1 ▸ workers ── */
        for id in 0..settings.workers {
            let worker = Worker {
                id,
                port: Arc::clone(&port),
                registry: Arc::clone(&registry),
                source: source.clone(),
                token: token.clone(),
                poll_interval: settings.poll_interval,
            };
            let guard = ExitGuard { id, tx: exit_tx.clone() };
            let spawned = thread::Builder::new().name(format!("avf-worker-{id}")).spawn(move || {
                let _guard = guard;
                worker.run()
            });
            match spawned {
                Ok(handle) => pool.handles.push((id, handle)),
                Err(err) => {
                    pool.shutdown(Duration::from_secs(1));
                    return Err(ListenerError::Spawn { id, source: err });
                }
            }
        }

        /* ── 2 ▸ pending reads ── */
        for slot in 0..port.slot_count() {
            if let Err(err) = port.get_message(slot) {
                pool.shutdown(Duration::from_secs(1));
                return Err(ListenerError::Arm { slot, source: err });
            }
        }

        avf_log!(
            Level::Info,
            "listener",
            "{} workers started, {} reads pending",
            settings.workers,
            port.slot_count()
        );
        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    pub fn shutdown(mut self, timeout: Duration) -> ShutdownReport {
        let deadline = Instant::now() + timeout;
        let handles = std::mem::take(&mut self.handles);

        /* ── 1 ▸ stop ── */
        self.token.cancel();
        self.port.cancel_io();
        for _ in 0..handles.len() {
            if let Err(e) = self.port.post_wakeup() {
                avf_log!(Level::Warn, "listener", "posting wake-up failed: {}", e);
            }
        }

        /* ── 2 ▸ bounded join ── */
        let mut exited = Vec::with_capacity(handles.len());
        while exited.len() < handles.len() {
            match self.exited.recv_deadline(deadline) {
                Ok(id) => exited.push(id),
                Err(_) => break,
            }
        }

        let mut report = ShutdownReport::default();
        for (id, handle) in handles {
            if !exited.contains(&id) {
                report.abandoned += 1;
                avf_log!(Level::Warn, "listener", "worker {} did not stop within {:?}", id, timeout);
                continue;
            }
            match handle.join() {
                Ok(stats) => report.stats.merge(stats),
                Err(_) => avf_log!(Level::Error, "listener", "worker {} panicked", id),
            }
            report.joined += 1;
        }

        /* ── 3 ▸ consultant ── */
        if let Some(source) = &self.source {
            source.disconnect();
        }

        avf_log!(
            Level::Info,
            "listener",
            "stopped: {} joined, {} abandoned, {} handled, {} blocked",
            report.joined,
            report.abandoned,
            report.stats.handled,
            report.stats.blocked
        );
        report
    }
}
