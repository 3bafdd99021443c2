//! File I/O interception.
//!
//! Key responsibilities:
//! - Skip requests that must never reach user mode (kernel requestors,
//!   directory opens, paging I/O).
//! - Build one `AccessNotification` per eligible request and wait, bounded,
//!   for the listener's verdict.
//! - Complete blocked requests with `STATUS_ACCESS_DENIED` and no data;
//!   let everything else continue, including every failure path.

pub mod callbacks;
pub mod sendmsg;

use shared::OperationKind;

/// Operations the filter registers pre-operation callbacks for.
pub const MONITORED_OPERATIONS: [OperationKind; 3] = OperationKind::ALL;
