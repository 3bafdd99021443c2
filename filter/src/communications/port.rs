//! Loopback filter communication port.
//!
//! Behaves like a Filter Manager port with a connection limit of one:
//!
//! * a notification is delivered only into a read the client has armed;
//!   with none armed the sender blocks (backpressure) until one is, its
//!   deadline passes, or the client goes away;
//! * every message carries a fresh id and the sender waits for the reply
//!   echoing it; replies nobody waits for are rejected;
//! * dropping the client wakes every blocked sender with
//!   `PortDisconnected`.
//!
//! The kernel half is [`CommunicationPort`] (implements `Notifier`), the
//! user half is [`ClientPort`] (implements `MessagePort`).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use shared::{
    AccessNotification, Completion, FilterCommand, FilterVersion, MessageHeader, MessagePort,
    PortError, VerdictReply, WaitError, WireError,
};

use crate::consts::STATUS_INVALID_PARAMETER;
use crate::minifilter::sendmsg::{Notifier, SendError};

const MESSAGE_SIZE: usize = MessageHeader::SIZE + AccessNotification::SIZE;

type CompletionItem = Result<Completion, WaitError>;

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    pub delivered: u64,
    pub replied: u64,
    pub timed_out: u64,
    /// Sends that found no armed read and had to wait for one.
    pub backpressure_waits: u64,
    /// Senders parked right now for lack of an armed read.
    pub blocked_senders: usize,
}

// ─────────────────────────── shared state ───────────────────────────

struct ClientSlots {
    generation: u64,
    armed: VecDeque<usize>,
    busy: Vec<bool>,
    completions: Sender<CompletionItem>,
    /// message id → reply, once posted
    waiting: HashMap<u64, Option<VerdictReply>>,
}

#[derive(Default)]
struct PortState {
    client: Option<ClientSlots>,
    generation: u64,
    stats: PortStats,
}

impl PortState {
    fn client_mut(&mut self, generation: u64) -> Option<&mut ClientSlots> {
        self.client.as_mut().filter(|c| c.generation == generation)
    }

    fn unpark(&mut self, parked: bool) {
        if parked {
            self.stats.blocked_senders -= 1;
        }
    }
}

struct PortInner {
    state: Mutex<PortState>,
    read_armed: Condvar,
    reply_posted: Condvar,
    next_message_id: AtomicU64,
    version: FilterVersion,
}

impl PortInner {
    /// Answers in-band commands (the port's MessageNotify callback).
    fn message_notify(&self, input: &[u8], output: &mut [u8]) -> Result<usize, i32> {
        match FilterCommand::decode(input) {
            Ok(Some(FilterCommand::GetVersion)) => {
                if output.len() < FilterVersion::SIZE {
                    return Ok(0);
                }
                output[..FilterVersion::SIZE].copy_from_slice(&self.version.encode());
                Ok(FilterVersion::SIZE)
            }
            Ok(None) => Ok(0),
            Err(_) => Err(STATUS_INVALID_PARAMETER),
        }
    }
}

// ─────────────────────────── kernel half ───────────────────────────

#[derive(Clone)]
pub struct CommunicationPort {
    inner: Arc<PortInner>,
}

impl Default for CommunicationPort {
    fn default() -> Self {
        Self::new()
    }
}

impl CommunicationPort {
    pub fn new() -> Self {
        Self::with_version(FilterVersion::CURRENT)
    }

    pub fn with_version(version: FilterVersion) -> Self {
        Self {
            inner: Arc::new(PortInner {
                state: Mutex::new(PortState::default()),
                read_armed: Condvar::new(),
                reply_posted: Condvar::new(),
                next_message_id: AtomicU64::new(1),
                version,
            }),
        }
    }

    /// Accept the single client. `slot_count` is the number of read buffers
    /// the client owns.
    pub fn connect(&self, slot_count: usize) -> Result<ClientPort, PortError> {
        if slot_count == 0 {
            return Err(PortError::InvalidSlot { slot: 0, count: 0 });
        }

        let mut state = self.inner.state.lock();
        if state.client.is_some() {
            return Err(PortError::ConnectionLimit);
        }
        state.generation += 1;
        let generation = state.generation;

        let (tx, rx) = channel::unbounded();
        state.client = Some(ClientSlots {
            generation,
            armed: VecDeque::with_capacity(slot_count),
            busy: vec![false; slot_count],
            completions: tx.clone(),
            waiting: HashMap::new(),
        });
        log::info!("AVF: client connected ({slot_count} read slots)");

        Ok(ClientPort {
            inner: Arc::clone(&self.inner),
            generation,
            slot_count,
            completions_tx: tx,
            completions_rx: rx,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().client.is_some()
    }

    pub fn stats(&self) -> PortStats {
        self.inner.state.lock().stats
    }

    pub fn message_notify(&self, input: &[u8], output: &mut [u8]) -> Result<usize, i32> {
        self.inner.message_notify(input, output)
    }
}

impl Notifier for CommunicationPort {
    fn has_client(&self) -> bool {
        self.is_connected()
    }

    fn send(&self, notification: &AccessNotification, timeout: Duration) -> Result<VerdictReply, SendError> {
        let inner = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut state = inner.state.lock();
        let generation = match &state.client {
            Some(c) => c.generation,
            None => return Err(SendError::NoClient),
        };

        /* ── 1 ▸ wait for an armed read ── */
        let mut parked = false;
        let slot = loop {
            let st = &mut *state;
            match st.client_mut(generation).map(|c| c.armed.pop_front()) {
                None => {
                    st.unpark(parked);
                    return Err(SendError::PortDisconnected);
                }
                Some(Some(slot)) => {
                    st.unpark(parked);
                    break slot;
                }
                Some(None) => {}
            }
            if Instant::now() >= deadline {
                st.unpark(parked);
                st.stats.timed_out += 1;
                return Err(SendError::Timeout);
            }
            if !parked {
                parked = true;
                st.stats.blocked_senders += 1;
                st.stats.backpressure_waits += 1;
            }
            inner.read_armed.wait_until(&mut state, deadline);
        };

        /* ── 2 ▸ complete the read ── */
        let message_id = inner.next_message_id.fetch_add(1, Ordering::Relaxed);
        let header = MessageHeader { reply_length: VerdictReply::SIZE as u32, message_id };
        let mut buffer = [0u8; MESSAGE_SIZE];
        buffer[..MessageHeader::SIZE].copy_from_slice(&header.encode());
        buffer[MessageHeader::SIZE..].copy_from_slice(&notification.encode());

        let st = &mut *state;
        let Some(client) = st.client_mut(generation) else {
            return Err(SendError::PortDisconnected);
        };
        client.busy[slot] = false;
        client.waiting.insert(message_id, None);
        let completion = Completion::Message {
            slot,
            message_id,
            notification: AccessNotification::decode(&buffer[MessageHeader::SIZE..]),
        };
        if client.completions.send(Ok(completion)).is_err() {
            client.waiting.remove(&message_id);
            return Err(SendError::PortDisconnected);
        }
        st.stats.delivered += 1;

        /* ── 3 ▸ wait for the matching reply ── */
        loop {
            let st = &mut *state;
            let outcome = st.client_mut(generation).map(|c| {
                if matches!(c.waiting.get(&message_id), Some(Some(_))) {
                    c.waiting.remove(&message_id).flatten()
                } else {
                    None
                }
            });
            match outcome {
                None => return Err(SendError::PortDisconnected),
                Some(Some(reply)) => return Ok(reply),
                Some(None) => {}
            }
            if Instant::now() >= deadline {
                if let Some(c) = st.client_mut(generation) {
                    c.waiting.remove(&message_id);
                }
                st.stats.timed_out += 1;
                return Err(SendError::Timeout);
            }
            inner.reply_posted.wait_until(&mut state, deadline);
        }
    }
}

// ─────────────────────────── user half ───────────────────────────

/// The listener's handle on the port. Dropping it disconnects.
pub struct ClientPort {
    inner: Arc<PortInner>,
    generation: u64,
    slot_count: usize,
    completions_tx: Sender<CompletionItem>,
    completions_rx: Receiver<CompletionItem>,
}

impl ClientPort {
    fn with_client<R>(&self, f: impl FnOnce(&mut ClientSlots, &mut PortStats) -> R) -> Result<R, PortError> {
        let mut state = self.inner.state.lock();
        let st = &mut *state;
        match st.client.as_mut().filter(|c| c.generation == self.generation) {
            Some(client) => Ok(f(client, &mut st.stats)),
            None => Err(PortError::Disconnected),
        }
    }
}

impl MessagePort for ClientPort {
    fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn get_message(&self, slot: usize) -> Result<(), PortError> {
        if slot >= self.slot_count {
            return Err(PortError::InvalidSlot { slot, count: self.slot_count });
        }
        self.with_client(|client, _| {
            if client.busy[slot] {
                return Err(PortError::SlotBusy(slot));
            }
            client.busy[slot] = true;
            client.armed.push_back(slot);
            Ok(())
        })??;
        self.inner.read_armed.notify_one();
        Ok(())
    }

    fn wait_completion(&self, timeout: Option<Duration>) -> Result<Completion, WaitError> {
        let lost = || Err(WaitError::Failed(PortError::Disconnected));
        match timeout {
            None => self.completions_rx.recv().unwrap_or_else(|_| lost()),
            Some(t) => self.completions_rx.recv_timeout(t).unwrap_or_else(|e| match e {
                RecvTimeoutError::Timeout => Err(WaitError::Timeout),
                RecvTimeoutError::Disconnected => lost(),
            }),
        }
    }

    fn post_wakeup(&self) -> Result<(), PortError> {
        self.completions_tx
            .send(Ok(Completion::Wakeup))
            .map_err(|_| PortError::Disconnected)
    }

    fn reply(&self, reply: &VerdictReply) -> Result<(), PortError> {
        // The filter only ever sees the reply bytes.
        let reply = VerdictReply::decode(&reply.encode())?;
        self.with_client(|client, stats| match client.waiting.get_mut(&reply.correlation_id) {
            Some(pending @ None) => {
                *pending = Some(reply);
                stats.replied += 1;
                Ok(())
            }
            _ => Err(PortError::NoWaiter(reply.correlation_id)),
        })??;
        self.inner.reply_posted.notify_all();
        Ok(())
    }

    fn cancel_io(&self) {
        let drained = self.with_client(|client, _| {
            let slots: Vec<usize> = client.armed.drain(..).collect();
            for &slot in &slots {
                client.busy[slot] = false;
            }
            slots
        });
        for slot in drained.unwrap_or_default() {
            let _ = self.completions_tx.send(Err(WaitError::Aborted { slot: Some(slot) }));
        }
    }

    fn query_version(&self) -> Result<FilterVersion, PortError> {
        let mut out = [0u8; FilterVersion::SIZE];
        let written = self
            .inner
            .message_notify(&FilterCommand::GetVersion.encode(), &mut out)
            .map_err(|code| PortError::Os { context: "FilterSendMessage", code })?;
        if written < FilterVersion::SIZE {
            return Err(WireError::Truncated { expected: FilterVersion::SIZE, actual: written }.into());
        }
        Ok(FilterVersion::decode(&out)?)
    }
}

impl Drop for ClientPort {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if state.client.as_ref().is_some_and(|c| c.generation == self.generation) {
            state.client = None;
            log::info!("AVF: client disconnected");
        }
        drop(state);
        self.inner.read_armed.notify_all();
        self.inner.reply_posted.notify_all();
    }
}
