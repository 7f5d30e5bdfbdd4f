//! poolwatch-monitor — pool health change detection and debounced notification.
//!
//! Samples pool health on a fixed interval, compares it with the persisted
//! baseline, and notifies when the pool set changes shape or an unhealthy
//! condition outlives the reminder interval.
//!
//! # Architecture
//!
//! ```text
//! MonitorEngine (one sequential loop)
//!   ├── Sampler::sample()          → HealthSnapshot + raw detail text
//!   ├── decision::evaluate()       → Seed | Notify(reason) | Quiet
//!   ├── Notifier::notify()         → SMTP / console
//!   └── RecordStore::save()        → baseline + last-notified time
//! ```
//!
//! # Debounce
//!
//! A notification fires when the snapshot differs from the baseline, or
//! when the pools are still unhealthy and more than `reminder_interval`
//! has passed since the last notification. The very first observation
//! only seeds the baseline.

pub mod decision;
pub mod engine;
pub mod error;
pub mod notifier;
pub mod policy;
pub mod sampler;
pub mod secrets;
pub mod smtp;

pub use decision::{Action, Decision, MonitorState, NotifyReason};
pub use engine::{MonitorEngine, TickOutcome};
pub use error::{ConfigError, NotifyError, SampleError};
pub use notifier::{ConsoleNotifier, ContactHeader, Notification, Notifier};
pub use policy::{DeliveryPolicy, Policy};
pub use sampler::{CommandSampler, Sample, Sampler};
pub use secrets::{EnvSecrets, SecretProvider, SmtpCredentials, StaticSecrets};
pub use smtp::{SmtpConfig, SmtpNotifier};
