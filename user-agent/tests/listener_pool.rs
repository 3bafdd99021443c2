//! Listener pool driven end to end through the loopback filter port.

mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use avf_agent::consultant::{ConnectionPhase, Consultant};
use avf_agent::listener::{DecisionSource, ListenerPool, ListenerSettings};
use avf_agent::registry::ProtectedPaths;
use common::{Answer, GatedSource, ScriptedConnector};
use filter::{CallbackData, CommunicationPort, Interceptor, PreOpStatus};
use shared::{Completion, FilterVersion, MessagePort, PortError, VerdictReply, WaitError, WireError};

const SECRET: &str = r"\Device\HarddiskVolume3\Secret.DOC";

fn registry(paths: &[&str]) -> Arc<ProtectedPaths> {
    let devices = common::devices();
    let mut registry = ProtectedPaths::new(16);
    for path in paths {
        registry.add(path, &devices).unwrap();
    }
    Arc::new(registry)
}

fn settings(workers: usize) -> ListenerSettings {
    ListenerSettings { workers, poll_interval: None }
}

fn start(
    port: &CommunicationPort,
    slots: usize,
    registry: Arc<ProtectedPaths>,
    source: Option<Arc<dyn DecisionSource>>,
    settings: ListenerSettings,
) -> ListenerPool {
    let client: Arc<dyn MessagePort> = Arc::new(port.connect(slots).unwrap());
    ListenerPool::start(client, registry, source, settings).unwrap()
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached");
        thread::sleep(Duration::from_millis(5));
    }
}

fn interceptor(port: &CommunicationPort) -> Interceptor<'_> {
    Interceptor::new(port).with_timeout(Duration::from_secs(10))
}

#[test]
fn unreachable_consultant_fails_open() {
    let port = CommunicationPort::new();
    let connector = ScriptedConnector::unreachable();
    let consultant: Arc<dyn DecisionSource> = Arc::new(Consultant::new(connector.clone()));
    let pool = start(&port, 4, registry(&[r"C:\secret.doc"]), Some(consultant), settings(2));

    let status = interceptor(&port).pre_read(&CallbackData::user(4411, "notepad.exe", SECRET));
    assert_eq!(status, PreOpStatus::SuccessNoCallback);
    assert!(connector.connect_attempts() > 0);

    // Unprotected paths never reach the consultant.
    let attempts = connector.connect_attempts();
    let status =
        interceptor(&port).pre_read(&CallbackData::user(4411, "notepad.exe", r"\Device\HarddiskVolume3\other.txt"));
    assert_eq!(status, PreOpStatus::SuccessNoCallback);
    assert_eq!(connector.connect_attempts(), attempts);

    assert_eq!(pool.shutdown(Duration::from_secs(5)).joined, 2);
}

#[test]
fn consultant_block_denies_the_write() {
    let port = CommunicationPort::new();
    let connector = ScriptedConnector::new().with(|s| s.queries.push_back(Answer::block(7)));
    let consultant = Arc::new(Consultant::new(connector.clone()));
    consultant.connect().unwrap();
    let source: Arc<dyn DecisionSource> = consultant;
    let pool = start(&port, 4, registry(&[r"C:\secret.doc"]), Some(source), settings(2));

    let status = interceptor(&port).pre_write(&CallbackData::user(900, "evil.exe", SECRET));
    assert!(status.is_denied());
    assert!(matches!(status, PreOpStatus::Complete { information: 0, .. }));

    let request = connector.requests().pop().unwrap();
    assert_eq!(request.process_id, 900);
    assert_eq!(request.process_name.to_string_lossy(), "evil.exe");

    let report = pool.shutdown(Duration::from_secs(5));
    assert_eq!(report.stats.handled, 1);
    assert_eq!(report.stats.blocked, 1);
}

#[test]
fn failed_handshake_allows_then_next_access_reconnects() {
    let port = CommunicationPort::new();
    let connector = ScriptedConnector::new().with(|s| {
        s.handshakes.push_back(Answer::WrongVersion);
        s.queries.push_back(Answer::block(2));
    });
    let consultant = Arc::new(Consultant::new(connector.clone()));
    let source: Arc<dyn DecisionSource> = consultant.clone();
    let pool = start(&port, 2, registry(&[]), Some(source), settings(1));
    let data = CallbackData::user(31, "word.exe", SECRET);

    assert_eq!(interceptor(&port).pre_create(&data), PreOpStatus::SuccessNoCallback);
    assert_eq!(consultant.phase(), ConnectionPhase::Disconnected);

    assert!(interceptor(&port).pre_create(&data).is_denied());
    assert_eq!(consultant.phase(), ConnectionPhase::Ready);
    assert_eq!(connector.connect_attempts(), 2);

    pool.shutdown(Duration::from_secs(5));
    assert_eq!(consultant.phase(), ConnectionPhase::Disconnected);
}

#[test]
fn no_consultant_allows_protected_access() {
    let port = CommunicationPort::new();
    let pool = start(&port, 1, registry(&[r"C:\secret.doc"]), None, settings(1));
    assert_eq!(
        interceptor(&port).pre_read(&CallbackData::user(1, "a.exe", SECRET)),
        PreOpStatus::SuccessNoCallback
    );
    assert_eq!(pool.shutdown(Duration::from_secs(5)).stats.handled, 1);
}

#[test]
fn saturated_pool_applies_backpressure() {
    const SENDERS: usize = 20;
    const WORKERS: usize = 4;
    const SLOTS: usize = 16;

    let port = CommunicationPort::new();
    let gate = Arc::new(GatedSource::default());
    let source: Arc<dyn DecisionSource> = gate.clone();
    let pool = start(&port, SLOTS, registry(&[]), Some(source), settings(WORKERS));

    let senders: Vec<_> = (0..SENDERS)
        .map(|i| {
            let port = port.clone();
            thread::spawn(move || {
                let name = format!(r"\Device\HarddiskVolume3\file{i}.txt");
                interceptor(&port).pre_write(&CallbackData::user(100 + i as u32, "bulk.exe", &name))
            })
        })
        .collect();

    wait_until(|| {
        let stats = port.stats();
        stats.delivered == SLOTS as u64 && stats.blocked_senders == SENDERS - SLOTS && gate.waiting() == WORKERS
    });
    gate.release();

    for sender in senders {
        assert!(sender.join().unwrap().is_denied());
    }
    let stats = port.stats();
    assert_eq!(stats.delivered, SENDERS as u64);
    assert_eq!(stats.replied, SENDERS as u64);
    assert_eq!(stats.backpressure_waits, (SENDERS - SLOTS) as u64);
    assert_eq!(stats.blocked_senders, 0);

    let report = pool.shutdown(Duration::from_secs(5));
    assert_eq!(report.joined, WORKERS);
    assert_eq!(report.abandoned, 0);
    assert_eq!(report.stats.blocked, SENDERS as u64);
}

#[test]
fn polling_workers_still_stop() {
    let port = CommunicationPort::new();
    let settings = ListenerSettings { workers: 3, poll_interval: Some(Duration::from_millis(20)) };
    let pool = start(&port, 2, registry(&[]), None, settings);
    assert_eq!(pool.worker_count(), 3);
    thread::sleep(Duration::from_millis(60));

    let report = pool.shutdown(Duration::from_secs(5));
    assert_eq!(report.joined, 3);
    assert_eq!(report.stats.handled, 0);
}

#[test]
fn zero_workers_is_rejected() {
    let port = CommunicationPort::new();
    let client: Arc<dyn MessagePort> = Arc::new(port.connect(1).unwrap());
    assert!(ListenerPool::start(client, registry(&[]), None, settings(0)).is_err());
}

// ───── scripted port ─────────────────────────────────────────────────────────

/// Hands out a fixed queue of completions, then reports a broken port.
#[derive(Default)]
struct FakePort {
    completions: Mutex<VecDeque<Completion>>,
    armed: Mutex<Vec<usize>>,
    replies: Mutex<Vec<VerdictReply>>,
}

impl MessagePort for FakePort {
    fn slot_count(&self) -> usize {
        1
    }

    fn get_message(&self, slot: usize) -> Result<(), PortError> {
        self.armed.lock().unwrap().push(slot);
        Ok(())
    }

    fn wait_completion(&self, _timeout: Option<Duration>) -> Result<Completion, WaitError> {
        self.completions.lock().unwrap().pop_front().ok_or(WaitError::Failed(PortError::Disconnected))
    }

    fn post_wakeup(&self) -> Result<(), PortError> {
        Ok(())
    }

    fn reply(&self, reply: &VerdictReply) -> Result<(), PortError> {
        self.replies.lock().unwrap().push(*reply);
        Ok(())
    }

    fn cancel_io(&self) {}

    fn query_version(&self) -> Result<FilterVersion, PortError> {
        Ok(FilterVersion::CURRENT)
    }
}

#[test]
fn undecodable_message_is_allowed_and_broken_port_ends_the_worker() {
    let port = Arc::new(FakePort::default());
    port.completions.lock().unwrap().push_back(Completion::Message {
        slot: 0,
        message_id: 41,
        notification: Err(WireError::UnknownOperation(0x99)),
    });
    let as_port: Arc<dyn MessagePort> = port.clone();
    let pool = ListenerPool::start(as_port, registry(&[]), None, settings(1)).unwrap();

    wait_until(|| port.armed.lock().unwrap().len() == 2);
    let report = pool.shutdown(Duration::from_secs(5));

    assert_eq!(*port.replies.lock().unwrap(), vec![VerdictReply::allow(41)]);
    assert_eq!(report.joined, 1);
    assert_eq!(report.stats.handled, 1);
    assert_eq!(report.stats.blocked, 0);
}
