//! Stop request from the console (Ctrl+C / Ctrl+Break / close).

use std::sync::OnceLock;

use crossbeam::channel::{self, Receiver, Sender};

static STOP: OnceLock<Sender<()>> = OnceLock::new();

#[cfg(windows)]
unsafe extern "system" fn on_console_event(_ctrl_type: u32) -> i32 {
    if let Some(tx) = STOP.get() {
        let _ = tx.try_send(());
    }
    1
}

/// Receiver that yields once a stop is requested.
pub fn stop_signal() -> std::io::Result<Receiver<()>> {
    let (tx, rx) = channel::bounded(1);
    if STOP.set(tx).is_err() {
        return Err(std::io::Error::other("stop handler already installed"));
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::System::Console::SetConsoleCtrlHandler;
        if unsafe { SetConsoleCtrlHandler(Some(on_console_event), 1) } == 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    Ok(rx)
}
