//! poolwatchd — the poolwatch daemon.
//!
//! Wires configuration, the file-backed state store, the command sampler
//! and the SMTP notifier into a [`poolwatch_monitor::MonitorEngine`].

pub mod config;
pub mod daemon;
pub mod status;
