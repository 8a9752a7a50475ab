//! Pending work: undelivered documents issued on or after the safety floor.
//!
//! The floor date bounds reprocessing when the delivery flag is first
//! introduced on an existing backend, or after a long outage. It is a
//! deliberate limit, not a paging artifact.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};

use billnotify_core::DocumentId;
use billnotify_invoicing::Document;

use crate::error::BackendError;
use crate::records::{DOCUMENT_FIELDS, DOCUMENTS_PATH, DocumentRecord, UNSET_FILTER};
use crate::retry::RetryPolicy;
use crate::session::{BackendClient, BackendRequest};

/// Queries the backend for documents that still need a delivery decision.
#[derive(Debug, Clone)]
pub struct PendingWorkResolver {
    client: Arc<BackendClient>,
    page_size: usize,
    retry: RetryPolicy,
}

impl PendingWorkResolver {
    pub fn new(client: Arc<BackendClient>, page_size: usize) -> Self {
        Self {
            client,
            page_size: page_size.max(1),
            retry: RetryPolicy::no_retry(),
        }
    }

    /// Retry page fetches that fail at the transport level.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Lazily list undelivered documents issued on or after `since`, ordered
    /// by id, at most `limit` of them.
    ///
    /// Nothing is fetched until [`PendingDocuments::next`] is polled. Calling
    /// this again starts a fresh, independent query, so the same listing can
    /// be re-run every tick.
    pub fn list_pending(&self, since: NaiveDate, limit: usize) -> PendingDocuments {
        PendingDocuments {
            client: self.client.clone(),
            retry: self.retry.clone(),
            since,
            page_size: self.page_size,
            remaining: limit,
            after: None,
            buffer: VecDeque::new(),
            exhausted: limit == 0,
            excluded: HashSet::new(),
        }
    }
}

/// A finite cursor over pending documents.
///
/// Pages are requested with a keyset (`id > last seen`) rather than offsets,
/// so documents marked delivered while the cursor is open never shift later
/// pages.
#[derive(Debug)]
pub struct PendingDocuments {
    client: Arc<BackendClient>,
    retry: RetryPolicy,
    since: NaiveDate,
    page_size: usize,
    remaining: usize,
    after: Option<DocumentId>,
    buffer: VecDeque<Document>,
    exhausted: bool,
    excluded: HashSet<DocumentId>,
}

impl PendingDocuments {
    /// Pass over these ids without counting them against the limit.
    ///
    /// For documents the caller has already settled locally but that are
    /// still undelivered on the backend.
    pub fn excluding(mut self, ids: impl IntoIterator<Item = DocumentId>) -> Self {
        self.excluded.extend(ids);
        self
    }

    /// Next pending document, fetching another page when needed.
    pub async fn next(&mut self) -> Result<Option<Document>, BackendError> {
        loop {
            if self.remaining == 0 {
                return Ok(None);
            }
            if let Some(doc) = self.buffer.pop_front() {
                self.remaining -= 1;
                return Ok(Some(doc));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    /// Drain the cursor.
    pub async fn collect_all(mut self) -> Result<Vec<Document>, BackendError> {
        let mut out = Vec::new();
        while let Some(doc) = self.next().await? {
            out.push(doc);
        }
        Ok(out)
    }

    async fn fetch_page(&mut self) -> Result<(), BackendError> {
        let want = self.page_size.min(self.remaining);
        let mut req = BackendRequest::get(DOCUMENTS_PATH)
            .query("select", DOCUMENT_FIELDS)
            .query("or", UNSET_FILTER)
            .query("issue_date", format!("gte.{}", self.since))
            .query("order", "id.asc")
            .query("limit", want.to_string());
        if let Some(after) = self.after {
            req = req.query("id", format!("gt.{after}"));
        }

        let client = &self.client;
        let rows: Vec<DocumentRecord> = self
            .retry
            .run("list_pending", || client.get_json(&req))
            .await?;
        debug!(rows = rows.len(), after = ?self.after, "fetched pending page");

        if rows.len() < want {
            self.exhausted = true;
        }

        for rec in rows {
            let id = DocumentId::new(rec.id);
            if self.after.is_none_or(|a| id > a) {
                self.after = Some(id);
            }

            // Second guard: never hand out a document that is already terminal,
            // whatever the server-side filter did.
            if rec.status().is_terminal() {
                warn!(document_id = %id, status = ?rec.status(), "backend returned a delivered document as pending");
                continue;
            }
            if rec.issue_date.is_some_and(|d| d < self.since) {
                warn!(document_id = %id, "backend returned a document below the safety floor");
                continue;
            }
            if self.excluded.contains(&id) {
                continue;
            }

            match Document::try_from(rec) {
                Ok(doc) => self.buffer.push_back(doc),
                Err(err) => warn!(document_id = %id, error = %err, "skipping invalid document record"),
            }
        }

        Ok(())
    }
}
