//! Client side of the consultant protocol.
//!
//! ```text
//!   Disconnected ─▶ Connecting ─▶ Handshaking ─▶ Ready
//!        ▲              │              │           │
//!        └── failure ───┴──────────────┘◀─ I/O ────┘
//! ```
//!
//! The state check, the exchange and the state update run under one mutex,
//! so a connection carries at most one request at a time. Response
//! validation (version + request id) runs after the lock is released; an
//! invalid answer fails that query only and keeps the connection.

pub mod transport;

pub use transport::{ConsultantTransport, Connector};

use std::io;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use log::Level;
use parking_lot::Mutex;
use shared::{AccessNotification, ConsultantRequest, ConsultantResponse, WireError};
use thiserror::Error;

use crate::listener::DecisionSource;
use crate::telemetry;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("consultant not connected")]
    NotConnected,

    #[error("cannot reach consultant: {0}")]
    Connect(#[source] io::Error),

    #[error("consultant I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("short response ({got} of {expected} bytes)")]
    ShortResponse { got: usize, expected: usize },

    #[error("protocol version mismatch (got {got}, expected {expected})")]
    VersionMismatch { got: u32, expected: u32 },

    #[error("request id mismatch (got {got}, expected {expected})")]
    RequestIdMismatch { got: u32, expected: u32 },

    #[error(transparent)]
    Wire(#[from] WireError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionPhase {
    Disconnected = 0,
    Connecting = 1,
    Handshaking = 2,
    Ready = 3,
}

impl ConnectionPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionPhase::Connecting,
            2 => ConnectionPhase::Handshaking,
            3 => ConnectionPhase::Ready,
            _ => ConnectionPhase::Disconnected,
        }
    }
}

/// Process-lifetime request ids. Wraps and never hands out 0, which is
/// reserved for the handshake.
#[derive(Debug, Default)]
pub struct RequestIds(AtomicU32);

impl RequestIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue after `last`; used to exercise wrap-around.
    pub fn starting_after(last: u32) -> Self {
        Self(AtomicU32::new(last))
    }

    pub fn next(&self) -> u32 {
        loop {
            let id = self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id != 0 {
                return id;
            }
        }
    }
}

enum Link<T> {
    Disconnected,
    Ready(T),
}

pub struct Consultant<C: Connector> {
    connector: C,
    link: Mutex<Link<C::Transport>>,
    phase: AtomicU8,
    ids: RequestIds,
}

/// Send one request, read one response. No validation beyond size.
fn exchange<T: ConsultantTransport>(
    transport: &mut T,
    request: &ConsultantRequest,
) -> Result<ConsultantResponse, QueryError> {
    transport.send(&request.encode())?;
    let mut buf = [0u8; ConsultantResponse::SIZE];
    let got = transport.receive(&mut buf)?;
    if got < ConsultantResponse::SIZE {
        return Err(QueryError::ShortResponse { got, expected: ConsultantResponse::SIZE });
    }
    Ok(ConsultantResponse::decode(&buf)?)
}

fn validate(response: &ConsultantResponse, request: &ConsultantRequest) -> Result<(), QueryError> {
    if response.answers(request) {
        return Ok(());
    }
    if response.version != request.version {
        Err(QueryError::VersionMismatch { got: response.version, expected: request.version })
    } else {
        Err(QueryError::RequestIdMismatch { got: response.request_id, expected: request.request_id })
    }
}

impl<C: Connector> Consultant<C> {
    pub fn new(connector: C) -> Self {
        Self::with_request_ids(connector, RequestIds::new())
    }

    pub fn with_request_ids(connector: C, ids: RequestIds) -> Self {
        Self {
            connector,
            link: Mutex::new(Link::Disconnected),
            phase: AtomicU8::new(ConnectionPhase::Disconnected as u8),
            ids,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        ConnectionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        self.phase.store(phase as u8, Ordering::Release);
        let up = if phase == ConnectionPhase::Ready { 1.0 } else { 0.0 };
        metrics::gauge!(telemetry::CONSULTANT_CONNECTED).set(up);
    }

    /// Connect and handshake unless already ready.
    pub fn connect(&self) -> Result<(), QueryError> {
        let mut link = self.link.lock();
        if matches!(*link, Link::Ready(_)) {
            return Ok(());
        }

        metrics::counter!(telemetry::CONSULTANT_RECONNECTS).increment(1);
        match self.handshake() {
            Ok(transport) => {
                *link = Link::Ready(transport);
                self.set_phase(ConnectionPhase::Ready);
                avf_log!(Level::Info, "consultant", "connected to {}", self.connector.endpoint());
                Ok(())
            }
            Err(e) => {
                self.set_phase(ConnectionPhase::Disconnected);
                metrics::counter!(telemetry::CONSULTANT_RECONNECT_FAILURES).increment(1);
                Err(e)
            }
        }
    }

    fn handshake(&self) -> Result<C::Transport, QueryError> {
        self.set_phase(ConnectionPhase::Connecting);
        let mut transport = self.connector.connect().map_err(QueryError::Connect)?;

        self.set_phase(ConnectionPhase::Handshaking);
        let request = ConsultantRequest::handshake(std::process::id());
        let response = exchange(&mut transport, &request)?;
        validate(&response, &request)?;
        avf_log!(
            Level::Debug,
            "consultant",
            "handshake ok (decision={}, reason={})",
            response.decision.code(),
            response.reason
        );
        // On any failure above `transport` is dropped, closing the link.
        Ok(transport)
    }

    /// One query on the current link. Only I/O failures tear it down.
    pub fn query(&self, notification: &AccessNotification) -> Result<ConsultantResponse, QueryError> {
        let mut link = self.link.lock();
        let Link::Ready(transport) = &mut *link else {
            return Err(QueryError::NotConnected);
        };

        let request = ConsultantRequest::query(self.ids.next(), notification);
        let result = exchange(transport, &request);
        if let Err(QueryError::Io(e)) = &result {
            avf_log!(Level::Warn, "consultant", "link to {} lost: {}", self.connector.endpoint(), e);
            *link = Link::Disconnected;
            self.set_phase(ConnectionPhase::Disconnected);
        }
        drop(link);

        let response = result?;
        validate(&response, &request)?;
        Ok(response)
    }

    pub fn disconnect(&self) {
        let mut link = self.link.lock();
        if matches!(*link, Link::Ready(_)) {
            avf_log!(Level::Info, "consultant", "disconnecting from {}", self.connector.endpoint());
        }
        *link = Link::Disconnected;
        self.set_phase(ConnectionPhase::Disconnected);
    }

    pub fn endpoint(&self) -> &str {
        self.connector.endpoint()
    }
}

impl<C: Connector> DecisionSource for Consultant<C> {
    fn is_ready(&self) -> bool {
        self.phase() == ConnectionPhase::Ready
    }

    fn try_reconnect(&self) -> bool {
        match self.connect() {
            Ok(()) => true,
            Err(e) => {
                avf_log!(Level::Debug, "consultant", "reconnect to {} failed: {}", self.connector.endpoint(), e);
                false
            }
        }
    }

    fn try_query(&self, notification: &AccessNotification) -> Option<ConsultantResponse> {
        match self.query(notification) {
            Ok(response) => Some(response),
            Err(QueryError::NotConnected) => None,
            Err(e @ (QueryError::Io(_) | QueryError::Connect(_))) => {
                avf_log!(Level::Debug, "consultant", "query failed: {}", e);
                None
            }
            Err(e) => {
                metrics::counter!(telemetry::CONSULTANT_INVALID_ANSWERS).increment(1);
                avf_log!(Level::Warn, "consultant", "discarding answer: {}", e);
                None
            }
        }
    }

    fn disconnect(&self) {
        Consultant::disconnect(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_skip_zero_on_wrap() {
        let ids = RequestIds::starting_after(u32::MAX - 1);
        assert_eq!(ids.next(), u32::MAX);
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
    }

    #[test]
    fn validate_names_the_mismatched_field() {
        let n = AccessNotification::new(5, "a.exe", r"\DEVICE\X\Y", shared::OperationKind::Read).unwrap();
        let request = ConsultantRequest::query(12, &n);
        let ok = ConsultantResponse::answering(&request, shared::Decision::Block, 1);
        assert!(validate(&ok, &request).is_ok());

        let wrong_version = ConsultantResponse { version: request.version + 1, ..ok };
        assert!(matches!(validate(&wrong_version, &request), Err(QueryError::VersionMismatch { .. })));

        let wrong_id = ConsultantResponse { request_id: 13, ..ok };
        assert!(matches!(
            validate(&wrong_id, &request),
            Err(QueryError::RequestIdMismatch { got: 13, expected: 12 })
        ));

        let both = ConsultantResponse { version: 0, request_id: 0, ..ok };
        assert!(matches!(validate(&both, &request), Err(QueryError::VersionMismatch { .. })));
    }

    #[test]
    fn first_request_id_is_one() {
        assert_eq!(RequestIds::new().next(), 1);
    }

    #[test]
    fn phase_round_trips_through_u8() {
        for phase in [
            ConnectionPhase::Disconnected,
            ConnectionPhase::Connecting,
            ConnectionPhase::Handshaking,
            ConnectionPhase::Ready,
        ] {
            assert_eq!(ConnectionPhase::from_u8(phase as u8), phase);
        }
    }
}
