//! NTSTATUS codes and request flags used by the callbacks.

use std::time::Duration;

use shared::constants::REPLY_TIMEOUT_SECS;

pub const STATUS_SUCCESS: i32 = 0;
pub const STATUS_TIMEOUT: i32 = 0x0000_0102;
pub const STATUS_INVALID_PARAMETER: i32 = 0xC000_000D_u32 as i32;
pub const STATUS_ACCESS_DENIED: i32 = 0xC000_0022_u32 as i32;
pub const STATUS_PORT_DISCONNECTED: i32 = 0xC000_0037_u32 as i32;

/* Create options / IRP flags */
pub const FILE_DIRECTORY_FILE: u32 = 0x0000_0001;
pub const IRP_PAGING_IO: u32 = 0x0000_0002;

/// Upper bound an intercepted caller waits for its verdict.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(REPLY_TIMEOUT_SECS);
