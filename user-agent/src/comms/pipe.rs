//! Consultant transports: a message-mode named pipe on Windows, a Unix
//! domain stream socket elsewhere. Both carry the same fixed-size records.

#[cfg(windows)]
pub use self::windows::{NamedPipeConnector, NamedPipeTransport};
#[cfg(unix)]
pub use self::unix::{UnixSocketConnector, UnixSocketTransport};

/// Connector used by the binary on this platform.
#[cfg(windows)]
pub type PlatformConnector = NamedPipeConnector;
#[cfg(unix)]
pub type PlatformConnector = UnixSocketConnector;

// ───── Unix domain socket ───────────────────────────────────────────────────

#[cfg(unix)]
mod unix {
    use std::io::{self, Read, Write};
    use std::os::unix::net::UnixStream;
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::consultant::{ConsultantTransport, Connector};

    pub struct UnixSocketConnector {
        path: PathBuf,
        display: String,
        read_timeout: Option<Duration>,
    }

    impl UnixSocketConnector {
        pub fn new(path: impl Into<PathBuf>, read_timeout: Option<Duration>) -> Self {
            let path = path.into();
            let display = path.display().to_string();
            Self { path, display, read_timeout }
        }
    }

    impl Connector for UnixSocketConnector {
        type Transport = UnixSocketTransport;

        fn connect(&self) -> io::Result<UnixSocketTransport> {
            let stream = UnixStream::connect(&self.path)?;
            stream.set_read_timeout(self.read_timeout)?;
            Ok(UnixSocketTransport { stream })
        }

        fn endpoint(&self) -> &str {
            &self.display
        }
    }

    pub struct UnixSocketTransport {
        stream: UnixStream,
    }

    impl ConsultantTransport for UnixSocketTransport {
        fn send(&mut self, message: &[u8]) -> io::Result<()> {
            self.stream.write_all(message)
        }

        /// A stream has no message boundaries: read until `buf` is full.
        /// EOF before the first byte is an I/O failure; EOF mid-record
        /// yields a short count.
        fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut filled = 0;
            while filled < buf.len() {
                match self.stream.read(&mut buf[filled..]) {
                    Ok(0) if filled == 0 => return Err(io::ErrorKind::UnexpectedEof.into()),
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(filled)
        }
    }
}

// ───── Windows named pipe ───────────────────────────────────────────────────

#[cfg(windows)]
mod windows {
    use std::io;
    use std::ptr;
    use std::time::Duration;

    use windows_sys::Win32::{
        Foundation::{
            CloseHandle, ERROR_IO_PENDING, GENERIC_READ, GENERIC_WRITE, GetLastError, HANDLE,
            INVALID_HANDLE_VALUE, WAIT_OBJECT_0,
        },
        Storage::FileSystem::{CreateFileW, FILE_FLAG_OVERLAPPED, OPEN_EXISTING, ReadFile, WriteFile},
        System::{
            IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED},
            Pipes::{PIPE_READMODE_MESSAGE, SetNamedPipeHandleState},
            Threading::{CreateEventW, INFINITE, WaitForSingleObject},
        },
    };

    use crate::consultant::{ConsultantTransport, Connector};

    pub struct NamedPipeConnector {
        name: String,
        read_timeout: Option<Duration>,
    }

    impl NamedPipeConnector {
        pub fn new(name: impl Into<String>, read_timeout: Option<Duration>) -> Self {
            Self { name: name.into(), read_timeout }
        }
    }

    impl Connector for NamedPipeConnector {
        type Transport = NamedPipeTransport;

        fn connect(&self) -> io::Result<NamedPipeTransport> {
            let wide: Vec<u16> = self.name.encode_utf16().chain(Some(0)).collect();
            let pipe = unsafe {
                CreateFileW(
                    wide.as_ptr(),
                    GENERIC_READ | GENERIC_WRITE,
                    0,
                    ptr::null(),
                    OPEN_EXISTING,
                    FILE_FLAG_OVERLAPPED,
                    ptr::null_mut(),
                )
            };
            if pipe == INVALID_HANDLE_VALUE {
                return Err(io::Error::last_os_error());
            }
            // Owns `pipe` from here on; dropped (closed) on every error path.
            let mut transport = NamedPipeTransport { pipe, event: ptr::null_mut(), read_timeout: self.read_timeout };

            let mode = PIPE_READMODE_MESSAGE;
            if unsafe { SetNamedPipeHandleState(pipe, &mode, ptr::null(), ptr::null()) } == 0 {
                return Err(io::Error::last_os_error());
            }

            transport.event = unsafe { CreateEventW(ptr::null(), 1, 0, ptr::null()) };
            if transport.event.is_null() {
                return Err(io::Error::last_os_error());
            }
            Ok(transport)
        }

        fn endpoint(&self) -> &str {
            &self.name
        }
    }

    pub struct NamedPipeTransport {
        pipe: HANDLE,
        event: HANDLE,
        read_timeout: Option<Duration>,
    }

    // The handles are only used by whoever holds the consultant lock.
    unsafe impl Send for NamedPipeTransport {}

    impl NamedPipeTransport {
        fn fresh_overlapped(&self) -> OVERLAPPED {
            // SAFETY: all-zero OVERLAPPED is the documented initial state.
            let mut ov: OVERLAPPED = unsafe { std::mem::zeroed() };
            ov.hEvent = self.event;
            ov
        }

        /// Wait for the pending operation on `ov`, cancelling it after
        /// `timeout`.
        fn finish(&self, ov: &mut OVERLAPPED, timeout: Option<Duration>) -> io::Result<usize> {
            let millis = timeout.map_or(INFINITE, |t| t.as_millis().min(u128::from(INFINITE - 1)) as u32);
            if unsafe { WaitForSingleObject(self.event, millis) } != WAIT_OBJECT_0 {
                let mut ignored = 0u32;
                unsafe {
                    CancelIoEx(self.pipe, ov);
                    GetOverlappedResult(self.pipe, ov, &mut ignored, 1);
                }
                return Err(io::Error::new(io::ErrorKind::TimedOut, "consultant did not answer in time"));
            }
            let mut transferred = 0u32;
            if unsafe { GetOverlappedResult(self.pipe, ov, &mut transferred, 0) } == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(transferred as usize)
        }
    }

    impl ConsultantTransport for NamedPipeTransport {
        fn send(&mut self, message: &[u8]) -> io::Result<()> {
            let mut ov = self.fresh_overlapped();
            let mut written = 0u32;
            let ok = unsafe { WriteFile(self.pipe, message.as_ptr(), message.len() as u32, &mut written, &mut ov) };
            if ok == 0 {
                if unsafe { GetLastError() } != ERROR_IO_PENDING {
                    return Err(io::Error::last_os_error());
                }
                written = self.finish(&mut ov, None)? as u32;
            }
            if (written as usize) < message.len() {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "short pipe write"));
            }
            Ok(())
        }

        fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut ov = self.fresh_overlapped();
            let mut read = 0u32;
            let ok = unsafe { ReadFile(self.pipe, buf.as_mut_ptr(), buf.len() as u32, &mut read, &mut ov) };
            if ok != 0 {
                return Ok(read as usize);
            }
            if unsafe { GetLastError() } != ERROR_IO_PENDING {
                return Err(io::Error::last_os_error());
            }
            self.finish(&mut ov, self.read_timeout)
        }
    }

    impl Drop for NamedPipeTransport {
        fn drop(&mut self) {
            unsafe {
                if !self.event.is_null() {
                    CloseHandle(self.event);
                }
                CloseHandle(self.pipe);
            }
        }
    }
}
