//! Byte transports to the consultant.

use std::io;

/// One established, message-oriented link. Strict lockstep: every `send` is
/// followed by exactly one `receive`.
pub trait ConsultantTransport: Send {
    fn send(&mut self, message: &[u8]) -> io::Result<()>;

    /// Read one message into `buf`; returns the number of bytes received,
    /// which may be short.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens transports to a fixed endpoint.
pub trait Connector: Send + Sync {
    type Transport: ConsultantTransport;

    fn connect(&self) -> io::Result<Self::Transport>;

    /// For logs.
    fn endpoint(&self) -> &str;
}
