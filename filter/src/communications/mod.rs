//! Kernel/user communication.

pub mod port;
