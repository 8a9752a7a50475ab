//! Idempotent delivery write-back.
//!
//! Updates are conditional on the document still being undelivered, so a
//! repeated call changes nothing. When a conditional update matches no row
//! the recorder reads the document back to tell "already recorded" apart
//! from a genuine conflict.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use billnotify_core::{Destination, DocumentId};
use billnotify_invoicing::DeliveryStatus;

use crate::error::BackendError;
use crate::records::{DOCUMENT_FIELDS, DOCUMENTS_PATH, DeliveryPatch, DocumentRecord, UNSET_FILTER};
use crate::retry::RetryPolicy;
use crate::session::{BackendClient, BackendRequest};

/// What a write-back call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The document moved from Unset to the requested status.
    Recorded,
    /// The document was already in the requested state; nothing changed.
    AlreadyRecorded,
}

/// Writes delivery outcomes back to the backend.
#[derive(Debug, Clone)]
pub struct DeliveryRecorder {
    client: Arc<BackendClient>,
    retry: RetryPolicy,
}

impl DeliveryRecorder {
    pub fn new(client: Arc<BackendClient>) -> Self {
        Self {
            client,
            retry: RetryPolicy::no_retry(),
        }
    }

    /// Retry write-backs that fail at the transport level. The PATCH is
    /// conditional, so repeating it is safe.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Record a confirmed send.
    pub async fn mark_sent(
        &self,
        id: DocumentId,
        destination: &Destination,
        at: DateTime<Utc>,
    ) -> Result<RecordOutcome, BackendError> {
        let patch = DeliveryPatch::sent(destination, at);
        if self.patch_if_unset(id, &patch).await? {
            info!(document_id = %id, destination = %destination, outcome = "sent", "delivery recorded");
            return Ok(RecordOutcome::Recorded);
        }

        let current = self.fetch(id).await?;
        let same_destination = current.delivery_destination.as_deref() == Some(destination.as_str());
        match current.status() {
            DeliveryStatus::Sent if same_destination => Ok(RecordOutcome::AlreadyRecorded),
            status => {
                warn!(document_id = %id, ?status, "sent write-back conflicts with stored state");
                Err(BackendError::Conflict(format!(
                    "document {id} is {status:?} (destination {:?})",
                    current.delivery_destination
                )))
            }
        }
    }

    /// Record that nothing was sent, and why.
    pub async fn mark_skipped(
        &self,
        id: DocumentId,
        reason: &str,
    ) -> Result<RecordOutcome, BackendError> {
        let patch = DeliveryPatch::skipped(reason, Utc::now());
        if self.patch_if_unset(id, &patch).await? {
            info!(document_id = %id, reason, outcome = "skipped", "delivery recorded");
            return Ok(RecordOutcome::Recorded);
        }

        let current = self.fetch(id).await?;
        match current.status() {
            DeliveryStatus::Skipped => Ok(RecordOutcome::AlreadyRecorded),
            status => {
                warn!(document_id = %id, ?status, "skip write-back conflicts with stored state");
                Err(BackendError::Conflict(format!("document {id} is {status:?}")))
            }
        }
    }

    /// PATCH guarded by the undelivered filter. Returns whether a row changed.
    async fn patch_if_unset(&self, id: DocumentId, patch: &DeliveryPatch) -> Result<bool, BackendError> {
        let body = serde_json::to_value(patch).map_err(|e| BackendError::Decode(e.to_string()))?;
        let req = BackendRequest::patch(DOCUMENTS_PATH)
            .query("id", format!("eq.{id}"))
            .query("or", UNSET_FILTER);

        let client = &self.client;
        let rows: Vec<DocumentRecord> = self
            .retry
            .run("record_delivery", || client.patch_json(req.clone(), body.clone()))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn fetch(&self, id: DocumentId) -> Result<DocumentRecord, BackendError> {
        let req = BackendRequest::get(DOCUMENTS_PATH)
            .query("select", DOCUMENT_FIELDS)
            .query("id", format!("eq.{id}"))
            .query("limit", "1");

        let client = &self.client;
        let rows: Vec<DocumentRecord> = self
            .retry
            .run("fetch_document", || client.get_json(&req))
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(format!("document {id}")))
    }
}
