//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use avf_agent::consultant::{ConsultantTransport, Connector};
use avf_agent::listener::DecisionSource;
use avf_agent::registry::StaticDevices;
use shared::{AccessNotification, ConsultantRequest, ConsultantResponse, Decision};

pub fn devices() -> StaticDevices {
    StaticDevices::new(r"C:\Users\tester").with_drive("C:", r"\Device\HarddiskVolume3")
}

/// How the scripted consultant answers one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Echo { decision: Decision, reason: u32 },
    /// Allow, with the requesting process id as the reason.
    EchoPid,
    WrongVersion,
    WrongId,
    Short,
    IoError,
}

impl Answer {
    pub const ALLOW: Answer = Answer::Echo { decision: Decision::Allow, reason: 0 };

    pub fn block(reason: u32) -> Answer {
        Answer::Echo { decision: Decision::Block, reason }
    }
}

#[derive(Default)]
pub struct Script {
    /// `false` entries make the next connects fail; empty means succeed.
    pub connects: VecDeque<bool>,
    pub handshakes: VecDeque<Answer>,
    pub queries: VecDeque<Answer>,
    /// Answer once the queues run dry.
    pub default_query: Option<Answer>,
    pub connect_attempts: usize,
    pub requests: Vec<ConsultantRequest>,
    /// Delay between reading a request and answering it.
    pub latency: Option<Duration>,
    /// A request is on the wire and not yet answered.
    pub in_flight: bool,
    /// Sends that arrived while another request was in flight.
    pub overlaps: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedConnector {
    pub script: Arc<Mutex<Script>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        let c = Self::new();
        c.script.lock().unwrap().connects = std::iter::repeat_n(false, 64).collect();
        c
    }

    pub fn with(self, f: impl FnOnce(&mut Script)) -> Self {
        f(&mut self.script.lock().unwrap());
        self
    }

    pub fn connect_attempts(&self) -> usize {
        self.script.lock().unwrap().connect_attempts
    }

    pub fn requests(&self) -> Vec<ConsultantRequest> {
        self.script.lock().unwrap().requests.clone()
    }

    pub fn overlaps(&self) -> usize {
        self.script.lock().unwrap().overlaps
    }
}

impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    fn connect(&self) -> io::Result<ScriptedTransport> {
        let mut s = self.script.lock().unwrap();
        s.connect_attempts += 1;
        match s.connects.pop_front() {
            Some(false) => Err(io::ErrorKind::NotFound.into()),
            _ => Ok(ScriptedTransport { script: Arc::clone(&self.script), pending: None }),
        }
    }

    fn endpoint(&self) -> &str {
        "scripted"
    }
}

pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
    pending: Option<ConsultantRequest>,
}

impl ConsultantTransport for ScriptedTransport {
    fn send(&mut self, message: &[u8]) -> io::Result<()> {
        if self.pending.is_some() {
            return Err(io::Error::other("send while a response is pending"));
        }
        let request = ConsultantRequest::decode(message).map_err(io::Error::other)?;
        let mut s = self.script.lock().unwrap();
        if s.in_flight {
            s.overlaps += 1;
        }
        s.in_flight = true;
        s.requests.push(request.clone());
        drop(s);
        self.pending = Some(request);
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let request = self.pending.take().ok_or_else(|| io::Error::other("receive without send"))?;
        let latency = self.script.lock().unwrap().latency;
        if let Some(latency) = latency {
            thread::sleep(latency);
        }
        let answer = {
            let mut s = self.script.lock().unwrap();
            s.in_flight = false;
            let next = if request.is_handshake() { s.handshakes.pop_front() } else { s.queries.pop_front() };
            next.or(if request.is_handshake() { None } else { s.default_query }).unwrap_or(Answer::ALLOW)
        };

        let mut response = ConsultantResponse::answering(&request, Decision::Allow, 0);
        match answer {
            Answer::Echo { decision, reason } => {
                response.decision = decision;
                response.reason = reason;
            }
            Answer::EchoPid => response.reason = request.process_id,
            Answer::WrongVersion => response.version += 1,
            Answer::WrongId => response.request_id = response.request_id.wrapping_add(1000),
            Answer::Short => {
                buf[..8].copy_from_slice(&response.encode()[..8]);
                return Ok(8);
            }
            Answer::IoError => return Err(io::ErrorKind::BrokenPipe.into()),
        }
        buf[..ConsultantResponse::SIZE].copy_from_slice(&response.encode());
        Ok(ConsultantResponse::SIZE)
    }
}

/// Decision source that holds every query until released, then blocks.
#[derive(Default)]
pub struct GatedSource {
    open: Mutex<bool>,
    opened: Condvar,
    pub waiting: Mutex<usize>,
}

impl GatedSource {
    pub fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }

    pub fn waiting(&self) -> usize {
        *self.waiting.lock().unwrap()
    }
}

impl DecisionSource for GatedSource {
    fn is_ready(&self) -> bool {
        true
    }

    fn try_reconnect(&self) -> bool {
        true
    }

    fn try_query(&self, notification: &AccessNotification) -> Option<ConsultantResponse> {
        *self.waiting.lock().unwrap() += 1;
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.opened.wait(open).unwrap();
        }
        drop(open);
        *self.waiting.lock().unwrap() -= 1;

        let request = ConsultantRequest::query(1, notification);
        Some(ConsultantResponse::answering(&request, Decision::Block, 3))
    }

    fn disconnect(&self) {}
}
