//! Backend-of-record access: one authenticated session per client, pending
//! work queries, customer lookups and idempotent delivery write-back.
//!
//! Everything leaving this crate is a validated domain type; raw JSON stays
//! inside [`records`].

pub mod customers;
pub mod error;
pub mod pending;
pub mod records;
pub mod recorder;
pub mod retry;
pub mod session;

pub use customers::CustomerDirectory;
pub use error::BackendError;
pub use pending::{PendingDocuments, PendingWorkResolver};
pub use recorder::{DeliveryRecorder, RecordOutcome};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use session::{BackendClient, BackendConfig, BackendRequest, BackendResponse, Credentials, Session};
