//! poolwatch-state — durable monitor state for poolwatch.
//!
//! Persists the last observed pool health snapshot and the time of the
//! last notification so the debounce policy survives process restarts.
//!
//! # Layout
//!
//! Two operator-editable JSON documents, keys sorted:
//!
//! ```text
//! pool_status.json   { "backup": "ONLINE", "tank": "DEGRADED" }
//! pool_meta.json     { "last_notified": "2026-10-17T08:00:00Z" }
//! ```
//!
//! Every write goes to a temporary file in the same directory which is
//! then renamed over the target, so a reader only ever sees the old or
//! the new document.

pub mod error;
pub mod memory;
pub mod store;
pub mod types;

pub use error::{StateError, StateResult};
pub use memory::MemoryStore;
pub use store::{RecordStore, StateStore};
pub use types::*;
