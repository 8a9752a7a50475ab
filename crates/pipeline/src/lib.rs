//! The delivery tick and the worker loop that repeats it.
//!
//! One tick: list pending documents → classify → resolve destination →
//! render → send → record, one document at a time. Per-document failures
//! never abort the batch; infrastructure failures end the tick early and the
//! untouched documents are picked up by the next one.

pub mod alert;
pub mod attachments;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod report;
pub mod worker;

pub use alert::{Alert, AlertSink, LogAlertSink};
pub use attachments::{AttachmentSource, DirectoryAttachments, NoAttachments};
pub use error::{AttachmentError, TickError};
pub use ledger::DeliveryLedger;
pub use pipeline::DeliveryPipeline;
pub use report::{DeliveryAttempt, DeliveryOutcome, TickReport};
pub use worker::{PipelineWorker, WorkerHandle};
