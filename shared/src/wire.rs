//! Fixed-size wire records.
//!
//! Everything that crosses the filter port or the consultant pipe is a plain
//! C-layout record with little-endian integers and NUL-terminated UTF-16 text
//! fields of fixed capacity:
//!
//!   message header       ReplyLength u32 | pad 4 | MessageId u64        16 B
//!   notification         ProcessId u32 | Major u8 | pad 3 |
//!                        ProcessName [u16; 260] | FileName [u16; 520]  1568 B
//!   reply header         Status i32 | pad 4 | MessageId u64             16 B
//!   reply body           BlockOperation u8                               1 B
//!   command              Command u32 | Reserved u32                      8 B
//!   version              Major u16 | Minor u16                           4 B
//!   consultant request   Version | RequestId | ProcessId | Operation
//!                        (u32 each) | ProcessName | FileName          1576 B
//!   consultant response  Version | RequestId | Decision | Reason        16 B
//!
//! Text that does not fit its field is rejected, never cut short.

use std::fmt;

use thiserror::Error;

use crate::constants::{
    CONSULTANT_PROTOCOL_VERSION, FILTER_MAJOR_VERSION, FILTER_MINOR_VERSION,
    HANDSHAKE_FILE_NAME, HANDSHAKE_OPERATION, HANDSHAKE_PROCESS_NAME, HANDSHAKE_REQUEST_ID,
    MAX_PATH_CHARS, MAX_PROCESS_NAME_CHARS,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("text of {len} UTF-16 units does not fit a field holding {capacity}")]
    TooLong { capacity: usize, len: usize },

    #[error("text contains an embedded NUL")]
    EmbeddedNul,

    #[error("record truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("unknown major function 0x{0:02x}")]
    UnknownOperation(u8),
}

/*──────────────────────────── byte helpers ─────────────────────────────*/

fn ensure_len(bytes: &[u8], expected: usize) -> Result<(), WireError> {
    if bytes.len() < expected {
        return Err(WireError::Truncated { expected, actual: bytes.len() });
    }
    Ok(())
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn put(out: &mut [u8], at: usize, raw: &[u8]) {
    out[at..at + raw.len()].copy_from_slice(raw);
}

/*──────────────────────────── operation kind ───────────────────────────*/

/// Monitored operation, carried as its IRP major-function code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationKind {
    Open = 0x00,
    Read = 0x03,
    Write = 0x04,
}

impl OperationKind {
    pub const ALL: [OperationKind; 3] = [OperationKind::Open, OperationKind::Read, OperationKind::Write];

    pub fn major_function(self) -> u8 {
        self as u8
    }

    pub fn from_major_function(code: u8) -> Result<Self, WireError> {
        match code {
            0x00 => Ok(OperationKind::Open),
            0x03 => Ok(OperationKind::Read),
            0x04 => Ok(OperationKind::Write),
            other => Err(WireError::UnknownOperation(other)),
        }
    }

    /// Fixed-width tag used in verdict log lines.
    pub fn label(self) -> &'static str {
        match self {
            OperationKind::Open => "OPEN ",
            OperationKind::Read => "READ ",
            OperationKind::Write => "WRITE",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Open => "open",
            OperationKind::Read => "read",
            OperationKind::Write => "write",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/*──────────────────────────── bounded text ─────────────────────────────*/

/// NUL-terminated UTF-16 field of `N` units (terminator included).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct WideText<const N: usize> {
    units: [u16; N],
    len: usize,
}

impl<const N: usize> WideText<N> {
    /// Longest text that still leaves room for the terminator.
    pub const MAX_LEN: usize = N - 1;
    pub const ENCODED_LEN: usize = N * 2;

    pub fn empty() -> Self {
        Self { units: [0u16; N], len: 0 }
    }

    /// Encode `text`, failing if it does not fit.
    pub fn new(text: &str) -> Result<Self, WireError> {
        let len = text.encode_utf16().count();
        if len > Self::MAX_LEN {
            return Err(WireError::TooLong { capacity: Self::MAX_LEN, len });
        }
        let mut out = Self::empty();
        for (slot, unit) in out.units.iter_mut().zip(text.encode_utf16()) {
            if unit == 0 {
                return Err(WireError::EmbeddedNul);
            }
            *slot = unit;
        }
        out.len = len;
        Ok(out)
    }

    pub fn as_units(&self) -> &[u16] {
        &self.units[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn to_string_lossy(&self) -> String {
        char::decode_utf16(self.as_units().iter().copied())
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }

    fn encode_into(&self, out: &mut [u8]) {
        for (chunk, unit) in out.chunks_exact_mut(2).zip(self.units.iter()) {
            chunk.copy_from_slice(&unit.to_le_bytes());
        }
    }

    fn decode_from(bytes: &[u8]) -> Self {
        let mut out = Self::empty();
        for (slot, chunk) in out.units.iter_mut().zip(bytes.chunks_exact(2).take(Self::MAX_LEN)) {
            let unit = u16::from_le_bytes([chunk[0], chunk[1]]);
            if unit == 0 {
                break;
            }
            *slot = unit;
            out.len += 1;
        }
        out
    }
}

impl<const N: usize> Default for WideText<N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const N: usize> fmt::Debug for WideText<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl<const N: usize> fmt::Display for WideText<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.to_string_lossy())
    }
}

pub type ProcessName = WideText<MAX_PROCESS_NAME_CHARS>;
pub type FileName = WideText<MAX_PATH_CHARS>;

/*──────────────────────────── filter port records ──────────────────────*/

/// Header the Filter Manager prepends to every kernel → user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub reply_length: u32,
    pub message_id: u64,
}

impl MessageHeader {
    pub const SIZE: usize = 16;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        put(&mut out, 0, &self.reply_length.to_le_bytes());
        put(&mut out, 8, &self.message_id.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        ensure_len(bytes, Self::SIZE)?;
        Ok(Self { reply_length: read_u32(bytes, 0), message_id: read_u64(bytes, 8) })
    }
}

/// One intercepted file operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessNotification {
    pub process_id: u32,
    pub process_name: ProcessName,
    pub file_name: FileName,
    pub operation: OperationKind,
}

impl AccessNotification {
    const NAME_AT: usize = 8;
    const FILE_AT: usize = Self::NAME_AT + ProcessName::ENCODED_LEN;
    pub const SIZE: usize = Self::FILE_AT + FileName::ENCODED_LEN;

    pub fn new(
        process_id: u32,
        process_name: &str,
        file_name: &str,
        operation: OperationKind,
    ) -> Result<Self, WireError> {
        Ok(Self {
            process_id,
            process_name: WideText::new(process_name)?,
            file_name: WideText::new(file_name)?,
            operation,
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        put(&mut out, 0, &self.process_id.to_le_bytes());
        out[4] = self.operation.major_function();
        self.process_name.encode_into(&mut out[Self::NAME_AT..Self::FILE_AT]);
        self.file_name.encode_into(&mut out[Self::FILE_AT..]);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        ensure_len(bytes, Self::SIZE)?;
        Ok(Self {
            process_id: read_u32(bytes, 0),
            operation: OperationKind::from_major_function(bytes[4])?,
            process_name: WideText::decode_from(&bytes[Self::NAME_AT..Self::FILE_AT]),
            file_name: WideText::decode_from(&bytes[Self::FILE_AT..Self::SIZE]),
        })
    }
}

/// Verdict for one notification, echoing its message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerdictReply {
    pub correlation_id: u64,
    pub block_operation: bool,
}

impl VerdictReply {
    /// Reply header (16) + `BlockOperation` (1).
    pub const SIZE: usize = 17;

    pub fn allow(correlation_id: u64) -> Self {
        Self { correlation_id, block_operation: false }
    }

    pub fn block(correlation_id: u64) -> Self {
        Self { correlation_id, block_operation: true }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        // Status stays 0 (STATUS_SUCCESS).
        put(&mut out, 8, &self.correlation_id.to_le_bytes());
        out[16] = u8::from(self.block_operation);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        ensure_len(bytes, Self::SIZE)?;
        Ok(Self { correlation_id: read_u64(bytes, 8), block_operation: bytes[16] != 0 })
    }
}

/// In-band commands a client can send to the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterCommand {
    GetVersion,
}

impl FilterCommand {
    pub const SIZE: usize = 8;

    pub fn code(self) -> u32 {
        match self {
            FilterCommand::GetVersion => 0,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(FilterCommand::GetVersion),
            _ => None,
        }
    }

    pub fn encode(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        put(&mut out, 0, &self.code().to_le_bytes());
        out
    }

    /// `Ok(None)` for a well-formed but unrecognised command.
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>, WireError> {
        ensure_len(bytes, Self::SIZE)?;
        Ok(Self::from_code(read_u32(bytes, 0)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterVersion {
    pub major: u16,
    pub minor: u16,
}

impl FilterVersion {
    pub const SIZE: usize = 4;
    pub const CURRENT: FilterVersion =
        FilterVersion { major: FILTER_MAJOR_VERSION, minor: FILTER_MINOR_VERSION };

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        put(&mut out, 0, &self.major.to_le_bytes());
        put(&mut out, 2, &self.minor.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        ensure_len(bytes, Self::SIZE)?;
        Ok(Self { major: read_u16(bytes, 0), minor: read_u16(bytes, 2) })
    }
}

impl fmt::Display for FilterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/*──────────────────────────── consultant records ───────────────────────*/

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block,
}

impl Decision {
    pub fn code(self) -> u32 {
        match self {
            Decision::Allow => 0,
            Decision::Block => 1,
        }
    }

    /// Only `1` blocks; every other code allows.
    pub fn from_code(code: u32) -> Self {
        if code == 1 { Decision::Block } else { Decision::Allow }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsultantRequest {
    pub version: u32,
    pub request_id: u32,
    pub process_id: u32,
    pub operation: u32,
    pub process_name: ProcessName,
    pub file_name: FileName,
}

impl ConsultantRequest {
    const NAME_AT: usize = 16;
    const FILE_AT: usize = Self::NAME_AT + ProcessName::ENCODED_LEN;
    pub const SIZE: usize = Self::FILE_AT + FileName::ENCODED_LEN;

    /// Probe sent right after connecting: id 0, operation 0xFF.
    pub fn handshake(process_id: u32) -> Self {
        Self {
            version: CONSULTANT_PROTOCOL_VERSION,
            request_id: HANDSHAKE_REQUEST_ID,
            process_id,
            operation: HANDSHAKE_OPERATION,
            process_name: WideText::new(HANDSHAKE_PROCESS_NAME).unwrap_or_default(),
            file_name: WideText::new(HANDSHAKE_FILE_NAME).unwrap_or_default(),
        }
    }

    pub fn query(request_id: u32, notification: &AccessNotification) -> Self {
        Self {
            version: CONSULTANT_PROTOCOL_VERSION,
            request_id,
            process_id: notification.process_id,
            operation: u32::from(notification.operation.major_function()),
            process_name: notification.process_name.clone(),
            file_name: notification.file_name.clone(),
        }
    }

    pub fn is_handshake(&self) -> bool {
        self.request_id == HANDSHAKE_REQUEST_ID && self.operation == HANDSHAKE_OPERATION
    }

    pub fn operation_kind(&self) -> Option<OperationKind> {
        u8::try_from(self.operation)
            .ok()
            .and_then(|code| OperationKind::from_major_function(code).ok())
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        put(&mut out, 0, &self.version.to_le_bytes());
        put(&mut out, 4, &self.request_id.to_le_bytes());
        put(&mut out, 8, &self.process_id.to_le_bytes());
        put(&mut out, 12, &self.operation.to_le_bytes());
        self.process_name.encode_into(&mut out[Self::NAME_AT..Self::FILE_AT]);
        self.file_name.encode_into(&mut out[Self::FILE_AT..]);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        ensure_len(bytes, Self::SIZE)?;
        Ok(Self {
            version: read_u32(bytes, 0),
            request_id: read_u32(bytes, 4),
            process_id: read_u32(bytes, 8),
            operation: read_u32(bytes, 12),
            process_name: WideText::decode_from(&bytes[Self::NAME_AT..Self::FILE_AT]),
            file_name: WideText::decode_from(&bytes[Self::FILE_AT..Self::SIZE]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsultantResponse {
    pub version: u32,
    pub request_id: u32,
    pub decision: Decision,
    pub reason: u32,
}

impl ConsultantResponse {
    pub const SIZE: usize = 16;

    /// Response to `request` at the request's own protocol version.
    pub fn answering(request: &ConsultantRequest, decision: Decision, reason: u32) -> Self {
        Self { version: request.version, request_id: request.request_id, decision, reason }
    }

    /// A response is accepted only for the exact version and id it was sent for.
    pub fn answers(&self, request: &ConsultantRequest) -> bool {
        self.version == request.version && self.request_id == request.request_id
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        put(&mut out, 0, &self.version.to_le_bytes());
        put(&mut out, 4, &self.request_id.to_le_bytes());
        put(&mut out, 8, &self.decision.code().to_le_bytes());
        put(&mut out, 12, &self.reason.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        ensure_len(bytes, Self::SIZE)?;
        Ok(Self {
            version: read_u32(bytes, 0),
            request_id: read_u32(bytes, 4),
            decision: Decision::from_code(read_u32(bytes, 8)),
            reason: read_u32(bytes, 12),
        })
    }
}
