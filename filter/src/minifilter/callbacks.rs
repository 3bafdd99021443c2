//! Pre-operation callbacks for IRP_MJ_CREATE, IRP_MJ_READ and IRP_MJ_WRITE.
//!
//! Each callback either lets the request continue untouched or completes it
//! with `STATUS_ACCESS_DENIED` and zero bytes transferred. Nothing is held
//! across the wait for the verdict, so callers may be intercepted
//! concurrently without bound.

use std::time::Duration;

use shared::OperationKind;

use crate::consts::{FILE_DIRECTORY_FILE, IRP_PAGING_IO, REPLY_TIMEOUT, STATUS_ACCESS_DENIED};
use crate::minifilter::sendmsg::{Notifier, Verdict, send_notification};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestorMode {
    KernelMode,
    UserMode,
}

/// The parts of `FLT_CALLBACK_DATA` the callbacks look at.
#[derive(Debug, Clone, Copy)]
pub struct CallbackData<'a> {
    pub requestor_mode: RequestorMode,
    pub create_options: u32,
    pub irp_flags: u32,
    pub process_id: u32,
    pub process_name: &'a str,
    /// Normalized name; `None` when the lookup failed.
    pub file_name: Option<&'a str>,
}

impl<'a> CallbackData<'a> {
    /// A plain user-mode request with no special flags.
    pub fn user(process_id: u32, process_name: &'a str, file_name: &'a str) -> Self {
        Self {
            requestor_mode: RequestorMode::UserMode,
            create_options: 0,
            irp_flags: 0,
            process_id,
            process_name,
            file_name: Some(file_name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreOpStatus {
    /// FLT_PREOP_SUCCESS_NO_CALLBACK
    SuccessNoCallback,
    /// FLT_PREOP_COMPLETE with the given IoStatus.
    Complete { status: i32, information: usize },
}

impl PreOpStatus {
    pub fn is_denied(&self) -> bool {
        matches!(self, PreOpStatus::Complete { status, .. } if *status == STATUS_ACCESS_DENIED)
    }
}

fn flag_on(flags: u32, flag: u32) -> bool {
    flags & flag != 0
}

/// Registered callback set bound to one notifier.
pub struct Interceptor<'n> {
    notifier: &'n dyn Notifier,
    timeout: Duration,
}

impl<'n> Interceptor<'n> {
    pub fn new(notifier: &'n dyn Notifier) -> Self {
        Self { notifier, timeout: REPLY_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Dispatch by major function, as the registration table does.
    pub fn pre_operation(&self, operation: OperationKind, data: &CallbackData<'_>) -> PreOpStatus {
        match operation {
            OperationKind::Open => self.pre_create(data),
            OperationKind::Read => self.pre_read(data),
            OperationKind::Write => self.pre_write(data),
        }
    }

    pub fn pre_create(&self, data: &CallbackData<'_>) -> PreOpStatus {
        if data.requestor_mode == RequestorMode::KernelMode {
            return PreOpStatus::SuccessNoCallback;
        }
        if flag_on(data.create_options, FILE_DIRECTORY_FILE) {
            return PreOpStatus::SuccessNoCallback;
        }
        self.ask(data, OperationKind::Open)
    }

    pub fn pre_read(&self, data: &CallbackData<'_>) -> PreOpStatus {
        if data.requestor_mode == RequestorMode::KernelMode || flag_on(data.irp_flags, IRP_PAGING_IO) {
            return PreOpStatus::SuccessNoCallback;
        }
        self.ask(data, OperationKind::Read)
    }

    pub fn pre_write(&self, data: &CallbackData<'_>) -> PreOpStatus {
        if data.requestor_mode == RequestorMode::KernelMode || flag_on(data.irp_flags, IRP_PAGING_IO) {
            return PreOpStatus::SuccessNoCallback;
        }
        self.ask(data, OperationKind::Write)
    }

    fn ask(&self, data: &CallbackData<'_>, operation: OperationKind) -> PreOpStatus {
        match send_notification(self.notifier, data, operation, self.timeout) {
            Verdict::Deny => PreOpStatus::Complete { status: STATUS_ACCESS_DENIED, information: 0 },
            Verdict::Allow => PreOpStatus::SuccessNoCallback,
        }
    }
}
