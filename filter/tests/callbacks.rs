//! Pre-operation callback behaviour against a scripted notifier.

use std::sync::Mutex;
use std::time::Duration;

use filter::consts::{FILE_DIRECTORY_FILE, IRP_PAGING_IO, STATUS_ACCESS_DENIED};
use filter::minifilter::MONITORED_OPERATIONS;
use filter::{CallbackData, Interceptor, Notifier, PreOpStatus, RequestorMode, SendError};
use shared::{AccessNotification, OperationKind, VerdictReply};

struct Scripted {
    connected: bool,
    answer: Result<bool, SendError>,
    seen: Mutex<Vec<AccessNotification>>,
}

impl Scripted {
    fn answering(answer: Result<bool, SendError>) -> Self {
        Self { connected: true, answer, seen: Mutex::new(Vec::new()) }
    }

    fn sent(&self) -> Vec<AccessNotification> {
        self.seen.lock().unwrap().clone()
    }
}

impl Notifier for Scripted {
    fn has_client(&self) -> bool {
        self.connected
    }

    fn send(&self, n: &AccessNotification, _timeout: Duration) -> Result<VerdictReply, SendError> {
        self.seen.lock().unwrap().push(n.clone());
        self.answer.map(|block| VerdictReply { correlation_id: 1, block_operation: block })
    }
}

const FILE: &str = r"\DEVICE\HARDDISKVOLUME3\SECRET.TXT";

#[test]
fn block_completes_with_access_denied_and_no_data() {
    let n = Scripted::answering(Ok(true));
    let cb = Interceptor::new(&n);
    for op in MONITORED_OPERATIONS {
        let status = cb.pre_operation(op, &CallbackData::user(4242, "notepad.exe", FILE));
        assert_eq!(status, PreOpStatus::Complete { status: STATUS_ACCESS_DENIED, information: 0 });
    }
    let sent = n.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].operation, OperationKind::Open);
    assert_eq!(sent[1].operation, OperationKind::Read);
    assert_eq!(sent[2].operation, OperationKind::Write);
    assert_eq!(sent[0].process_id, 4242);
    assert_eq!(sent[0].process_name.to_string_lossy(), "notepad.exe");
    assert_eq!(sent[0].file_name.to_string_lossy(), FILE);
}

#[test]
fn allow_reply_continues() {
    let n = Scripted::answering(Ok(false));
    let status = Interceptor::new(&n).pre_read(&CallbackData::user(1, "a.exe", FILE));
    assert_eq!(status, PreOpStatus::SuccessNoCallback);
}

#[test]
fn every_send_failure_fails_open() {
    for err in [SendError::NoClient, SendError::Timeout, SendError::PortDisconnected, SendError::Failed(-1)] {
        let n = Scripted::answering(Err(err));
        let status = Interceptor::new(&n).pre_write(&CallbackData::user(1, "a.exe", FILE));
        assert_eq!(status, PreOpStatus::SuccessNoCallback, "{err}");
    }
}

#[test]
fn kernel_requests_are_never_sent() {
    let n = Scripted::answering(Ok(true));
    let cb = Interceptor::new(&n);
    let data = CallbackData { requestor_mode: RequestorMode::KernelMode, ..CallbackData::user(4, "System", FILE) };
    for op in MONITORED_OPERATIONS {
        assert_eq!(cb.pre_operation(op, &data), PreOpStatus::SuccessNoCallback);
    }
    assert!(n.sent().is_empty());
}

#[test]
fn directory_open_and_paging_io_are_skipped() {
    let n = Scripted::answering(Ok(true));
    let cb = Interceptor::new(&n);

    let dir = CallbackData { create_options: FILE_DIRECTORY_FILE, ..CallbackData::user(9, "x.exe", FILE) };
    assert_eq!(cb.pre_create(&dir), PreOpStatus::SuccessNoCallback);

    let paging = CallbackData { irp_flags: IRP_PAGING_IO, ..CallbackData::user(9, "x.exe", FILE) };
    assert_eq!(cb.pre_read(&paging), PreOpStatus::SuccessNoCallback);
    assert_eq!(cb.pre_write(&paging), PreOpStatus::SuccessNoCallback);

    // Directory flag means nothing to reads.
    assert!(cb.pre_read(&dir).is_denied());
    assert_eq!(n.sent().len(), 1);
}

#[test]
fn no_client_skips_the_send() {
    let n = Scripted { connected: false, ..Scripted::answering(Ok(true)) };
    let status = Interceptor::new(&n).pre_create(&CallbackData::user(1, "a.exe", FILE));
    assert_eq!(status, PreOpStatus::SuccessNoCallback);
    assert!(n.sent().is_empty());
}

#[test]
fn missing_or_oversized_names_pass_without_notification() {
    let n = Scripted::answering(Ok(true));
    let cb = Interceptor::new(&n);

    let unnamed = CallbackData { file_name: None, ..CallbackData::user(1, "a.exe", FILE) };
    assert_eq!(cb.pre_create(&unnamed), PreOpStatus::SuccessNoCallback);

    let long = format!(r"\DEVICE\HARDDISKVOLUME3\{}", "A".repeat(600));
    assert_eq!(cb.pre_create(&CallbackData::user(1, "a.exe", &long)), PreOpStatus::SuccessNoCallback);
    assert!(n.sent().is_empty());
}
