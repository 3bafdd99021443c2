// src/lib.rs
// ────────────────────────────────────────────────────────────────────────────
// Public library entry point. Everything `main.rs` and the integration tests
// need is re-exported from here.

#[macro_use]
pub mod macros;

pub mod comms;
pub mod config;
pub mod consultant;
pub mod listener;
pub mod registry;
pub mod telemetry;
