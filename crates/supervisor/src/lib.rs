//! Keeps long-running worker processes alive.
//!
//! Each worker is a child process restarted after a fixed backoff whenever it
//! exits on its own. [`Supervisor::shutdown`] asks every worker to stop with
//! SIGTERM, force-kills whatever is still running after the grace period, and
//! never restarts anything once it has begun.
//!
//! Worker stdout/stderr are merged into one stream of [`OutputLine`]s tagged
//! with the worker name.

pub mod error;
pub mod output;
pub mod process;
pub mod supervisor;

pub use error::SupervisorError;
pub use output::{OutputLine, OutputStream, Stream, passthrough};
pub use process::{WorkerProcess, WorkerSpec};
pub use supervisor::{Supervisor, SupervisorConfig};
