//! Names, limits and protocol numbers agreed between the filter, the listener
//! and the consultant.

/// Filter Manager communication port created by the filter.
pub const PORT_NAME: &str = r"\AvfPort";
/// Named pipe the consultant listens on.
pub const CONSULTANT_PIPE_NAME: &str = r"\\.\pipe\AvfConsultant";

/// UTF-16 units reserved for a file name, terminator included.
pub const MAX_PATH_CHARS: usize = 520;
/// UTF-16 units reserved for a process image name, terminator included.
pub const MAX_PROCESS_NAME_CHARS: usize = 260;

pub const FILTER_MAJOR_VERSION: u16 = 1;
pub const FILTER_MINOR_VERSION: u16 = 0;

/// Consultant protocol revision. No backward compatibility: peers must match.
pub const CONSULTANT_PROTOCOL_VERSION: u32 = 1;
pub const HANDSHAKE_REQUEST_ID: u32 = 0;
pub const HANDSHAKE_OPERATION: u32 = 0xFF;
pub const HANDSHAKE_PROCESS_NAME: &str = "AVF_HANDSHAKE";
pub const HANDSHAKE_FILE_NAME: &str = "HANDSHAKE_TEST";

/// How long an intercepted caller waits for a verdict.
pub const REPLY_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_PENDING_READS: usize = 16;
pub const MAX_PROTECTED_FILES: usize = 100;
