//! Platform plumbing: the filter port, consultant transports and the
//! console stop signal.

pub mod console;
#[cfg(windows)]
pub mod fltmsg;
pub mod pipe;

use std::sync::Arc;

use shared::{MessagePort, PortError};

/// Connect to the filter's communication port.
pub fn open_filter_port(
    port_name: &str,
    slot_count: usize,
    concurrency: usize,
) -> Result<Arc<dyn MessagePort>, PortError> {
    #[cfg(windows)]
    {
        Ok(Arc::new(fltmsg::FilterPort::connect(port_name, slot_count, concurrency)?))
    }
    #[cfg(not(windows))]
    {
        let _ = (port_name, slot_count, concurrency);
        Err(PortError::Unsupported)
    }
}
