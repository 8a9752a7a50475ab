//! `billnotify-app` wires the library crates into the two deployable
//! binaries: `billnotify-worker` (one delivery pipeline) and
//! `billnotify-supervisor` (keeps workers running).
//!
//! Configuration comes from `BILLNOTIFY_*` environment variables; see
//! [`config`].

pub mod config;
pub mod notifier;
pub mod signal;

pub use config::{AppConfig, ConfigError, SupervisorSettings};
pub use notifier::Notifier;
pub use signal::shutdown_signal;
