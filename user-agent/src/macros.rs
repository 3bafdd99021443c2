/// Logs a line tagged with a component name and the calling thread.
/// Usage:
/// ```ignore
/// avf_log!(Level::Info, "listener", "worker {} started", id);
/// avf_log!(Level::Warn, "consultant", "handshake failed: {}", err);
/// ```
/// Logs like (the fern prefix comes from the dispatcher):
/// [..][WARN][avf_agent::consultant][pid=4568][tid=..] [consultant][tid=ThreadId(7)] handshake failed: …
///
/// Arguments must be passed positionally; inline `{name}` captures are not
/// available through `concat!`.
#[macro_export]
macro_rules! avf_log {
    ($level:expr, $component:expr, $fmt:expr $(, $($arg:tt)+)?) => {
        log::log!(
            $level,
            concat!(
                "[", $component, "]",   // component
                "[tid=", "{:?}", "] ",  // tid
                $fmt                    // message
            ),
            std::thread::current().id()
            $(, $($arg)+)?
        )
    };
}
