use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use billnotify_core::DocumentId;

/// What happened to one document in one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Sent and recorded.
    Sent,
    /// Sent in test mode without write-back.
    SentUnrecorded,
    /// Sent, but the same delivery was already on record when the
    /// write-back ran (another worker got there first).
    AlreadyRecorded,
    Skipped,
    /// Send failed; the document stays undelivered for the next tick.
    SendFailed,
    /// A backend call for this document failed; nothing was sent.
    BackendFailed,
    /// Sent, but the write-back failed. Quarantined.
    Dangling,
    /// Not attempted because the tick was deferred.
    Deferred,
}

/// One document's pass through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryAttempt {
    pub document_id: DocumentId,
    pub category: String,
    pub destination: Option<String>,
    pub text: Option<String>,
    pub attachment: Option<String>,
    pub outcome: DeliveryOutcome,
    pub error: Option<String>,
}

impl DeliveryAttempt {
    pub fn new(document_id: DocumentId, category: impl Into<String>) -> Self {
        Self {
            document_id,
            category: category.into(),
            destination: None,
            text: None,
            attachment: None,
            outcome: DeliveryOutcome::Deferred,
            error: None,
        }
    }
}

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub tick_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub attempts: Vec<DeliveryAttempt>,
    /// Set when the tick stopped early because the channel was unavailable.
    pub deferred_reason: Option<String>,
}

impl TickReport {
    pub fn new(tick_id: Uuid) -> Self {
        Self {
            tick_id,
            started_at: Utc::now(),
            attempts: Vec::new(),
            deferred_reason: None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred_reason.is_some()
    }

    pub fn count(&self, outcome: DeliveryOutcome) -> usize {
        self.attempts.iter().filter(|a| a.outcome == outcome).count()
    }

    /// Sent, recorded or not.
    pub fn sent(&self) -> usize {
        self.count(DeliveryOutcome::Sent)
            + self.count(DeliveryOutcome::SentUnrecorded)
            + self.count(DeliveryOutcome::AlreadyRecorded)
    }

    pub fn already_recorded(&self) -> usize {
        self.count(DeliveryOutcome::AlreadyRecorded)
    }

    pub fn skipped(&self) -> usize {
        self.count(DeliveryOutcome::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(DeliveryOutcome::SendFailed) + self.count(DeliveryOutcome::BackendFailed)
    }

    pub fn deferred(&self) -> usize {
        self.count(DeliveryOutcome::Deferred)
    }

    pub fn dangling(&self) -> usize {
        self.count(DeliveryOutcome::Dangling)
    }

    pub fn log(&self) {
        if let Some(reason) = &self.deferred_reason {
            warn!(
                tick_id = %self.tick_id,
                sent = self.sent(),
                deferred = self.deferred(),
                %reason,
                "tick deferred"
            );
            return;
        }
        info!(
            tick_id = %self.tick_id,
            listed = self.attempts.len(),
            sent = self.sent(),
            skipped = self.skipped(),
            failed = self.failed(),
            already_recorded = self.already_recorded(),
            dangling = self.dangling(),
            "tick finished"
        );
    }
}
