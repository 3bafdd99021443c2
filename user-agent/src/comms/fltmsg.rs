//! Filter Manager communication port (receiver side of `FltSendMessage`).
//!
//! Key responsibilities:
//! - Connect to the port created by the filter.
//! - Own `slot_count` message buffers, each with its own OVERLAPPED, and
//!   arm them with `FilterGetMessage` on an I/O completion port.
//! - Map completion packets back to their slot; a packet with no
//!   OVERLAPPED is a wake-up.
//! - Reply with `FilterReplyMessage`, abort reads with `CancelIoEx`, query
//!   the filter version with `FilterSendMessage`.

use std::cell::UnsafeCell;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use shared::{
    AccessNotification, Completion, FilterCommand, FilterVersion, MessageHeader, MessagePort, PortError,
    VerdictReply, WaitError, WireError,
};
use windows_sys::Win32::{
    Foundation::{CloseHandle, ERROR_OPERATION_ABORTED, GetLastError, HANDLE, WAIT_TIMEOUT},
    Storage::InstallableFileSystems::{
        FILTER_MESSAGE_HEADER, FILTER_REPLY_HEADER, FilterConnectCommunicationPort, FilterGetMessage,
        FilterReplyMessage, FilterSendMessage,
    },
    System::{
        IO::{CancelIoEx, CreateIoCompletionPort, GetQueuedCompletionStatus, OVERLAPPED, PostQueuedCompletionStatus},
        Threading::INFINITE,
    },
};

const MESSAGE_SIZE: usize = MessageHeader::SIZE + AccessNotification::SIZE;
/// HRESULT_FROM_WIN32(ERROR_IO_PENDING)
const HR_IO_PENDING: i32 = 0x8007_03E5_u32 as i32;

#[repr(C, align(8))]
struct SlotBuffer {
    message: [u8; MESSAGE_SIZE],
    overlapped: OVERLAPPED,
}

struct Slot {
    buf: UnsafeCell<SlotBuffer>,
    armed: AtomicBool,
}

impl Slot {
    fn overlapped(&self) -> *mut OVERLAPPED {
        // SAFETY: only computes the field address.
        unsafe { ptr::addr_of_mut!((*self.buf.get()).overlapped) }
    }
}

#[repr(C, align(8))]
struct ReplyBytes([u8; VerdictReply::SIZE]);

pub struct FilterPort {
    port: HANDLE,
    iocp: HANDLE,
    slots: Box<[Slot]>,
}

// A slot's buffer is touched by the kernel while armed and by exactly one
// worker after its completion is dequeued; `armed` keeps those apart.
unsafe impl Send for FilterPort {}
unsafe impl Sync for FilterPort {}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(Some(0)).collect()
}

fn os(context: &'static str, code: i32) -> PortError {
    PortError::Os { context, code }
}

impl FilterPort {
    /// Connect to `port_name` and bind the handle to a completion port
    /// allowing `concurrency` threads.
    pub fn connect(port_name: &str, slot_count: usize, concurrency: usize) -> Result<Self, PortError> {
        let wide = to_wide(port_name);
        let mut port: HANDLE = ptr::null_mut();
        let hr = unsafe {
            FilterConnectCommunicationPort(wide.as_ptr(), 0, ptr::null(), 0, ptr::null(), &mut port)
        };
        if hr < 0 {
            return Err(os("FilterConnectCommunicationPort", hr));
        }

        let iocp = unsafe { CreateIoCompletionPort(port, ptr::null_mut(), 0, concurrency as u32) };
        if iocp.is_null() {
            let code = unsafe { GetLastError() } as i32;
            unsafe { CloseHandle(port) };
            return Err(os("CreateIoCompletionPort", code));
        }

        let slots = (0..slot_count)
            .map(|_| Slot {
                // SAFETY: plain bytes + OVERLAPPED, all-zero is valid.
                buf: UnsafeCell::new(unsafe { mem::zeroed() }),
                armed: AtomicBool::new(false),
            })
            .collect();

        log::info!("Connected to filter port {port_name} ({slot_count} slots)");
        Ok(Self { port, iocp, slots })
    }

    fn slot_of(&self, overlapped: *mut OVERLAPPED) -> Option<usize> {
        self.slots.iter().position(|s| s.overlapped() == overlapped)
    }
}

impl MessagePort for FilterPort {
    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn get_message(&self, slot: usize) -> Result<(), PortError> {
        let s = self
            .slots
            .get(slot)
            .ok_or(PortError::InvalidSlot { slot, count: self.slots.len() })?;
        if s.armed.swap(true, Ordering::AcqRel) {
            return Err(PortError::SlotBusy(slot));
        }

        // SAFETY: the slot is not armed, so nobody else touches its buffer.
        let hr = unsafe {
            let buf = s.buf.get();
            (*buf).overlapped = mem::zeroed();
            FilterGetMessage(
                self.port,
                (*buf).message.as_mut_ptr().cast::<FILTER_MESSAGE_HEADER>(),
                MESSAGE_SIZE as u32,
                s.overlapped(),
            )
        };
        if hr != HR_IO_PENDING && hr < 0 {
            s.armed.store(false, Ordering::Release);
            return Err(os("FilterGetMessage", hr));
        }
        Ok(())
    }

    fn wait_completion(&self, timeout: Option<Duration>) -> Result<Completion, WaitError> {
        let millis = timeout.map_or(INFINITE, |t| t.as_millis().min(u128::from(INFINITE - 1)) as u32);
        let mut bytes = 0u32;
        let mut key = 0usize;
        let mut overlapped: *mut OVERLAPPED = ptr::null_mut();

        let ok = unsafe { GetQueuedCompletionStatus(self.iocp, &mut bytes, &mut key, &mut overlapped, millis) };
        if ok == 0 {
            let err = unsafe { GetLastError() };
            if overlapped.is_null() {
                return Err(if err == WAIT_TIMEOUT {
                    WaitError::Timeout
                } else {
                    WaitError::Failed(os("GetQueuedCompletionStatus", err as i32))
                });
            }
            let slot = self.slot_of(overlapped);
            if let Some(i) = slot {
                self.slots[i].armed.store(false, Ordering::Release);
            }
            return Err(if err == ERROR_OPERATION_ABORTED {
                WaitError::Aborted { slot }
            } else {
                WaitError::Failed(os("FilterGetMessage", err as i32))
            });
        }

        if overlapped.is_null() {
            return Ok(Completion::Wakeup);
        }
        let slot = self
            .slot_of(overlapped)
            .ok_or(WaitError::Failed(os("GetQueuedCompletionStatus", 0)))?;

        // SAFETY: the read completed; this worker now owns the buffer until
        // it re-arms the slot.
        let message = unsafe { &(*self.slots[slot].buf.get()).message };
        let header = MessageHeader::decode(message).map_err(|e| WaitError::Failed(e.into()))?;
        let notification = AccessNotification::decode(&message[MessageHeader::SIZE..]);
        self.slots[slot].armed.store(false, Ordering::Release);

        Ok(Completion::Message { slot, message_id: header.message_id, notification })
    }

    fn post_wakeup(&self) -> Result<(), PortError> {
        let ok = unsafe { PostQueuedCompletionStatus(self.iocp, 0, 0, ptr::null()) };
        if ok == 0 {
            return Err(os("PostQueuedCompletionStatus", unsafe { GetLastError() } as i32));
        }
        Ok(())
    }

    fn reply(&self, reply: &VerdictReply) -> Result<(), PortError> {
        let bytes = ReplyBytes(reply.encode());
        let hr = unsafe {
            FilterReplyMessage(
                self.port,
                bytes.0.as_ptr().cast::<FILTER_REPLY_HEADER>(),
                VerdictReply::SIZE as u32,
            )
        };
        if hr < 0 {
            return Err(os("FilterReplyMessage", hr));
        }
        Ok(())
    }

    fn cancel_io(&self) {
        unsafe { CancelIoEx(self.port, ptr::null()) };
    }

    fn query_version(&self) -> Result<FilterVersion, PortError> {
        let command = FilterCommand::GetVersion.encode();
        let mut out = [0u8; FilterVersion::SIZE];
        let mut returned = 0u32;
        let hr = unsafe {
            FilterSendMessage(
                self.port,
                command.as_ptr().cast(),
                command.len() as u32,
                out.as_mut_ptr().cast(),
                out.len() as u32,
                &mut returned,
            )
        };
        if hr < 0 {
            return Err(os("FilterSendMessage", hr));
        }
        if (returned as usize) < FilterVersion::SIZE {
            return Err(WireError::Truncated { expected: FilterVersion::SIZE, actual: returned as usize }.into());
        }
        Ok(FilterVersion::decode(&out)?)
    }
}

impl Drop for FilterPort {
    fn drop(&mut self) {
        unsafe {
            CancelIoEx(self.port, ptr::null());
            CloseHandle(self.iocp);
            CloseHandle(self.port);
        }
    }
}
