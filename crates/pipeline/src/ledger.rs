//! Process-local delivery bookkeeping.
//!
//! Lives as long as the worker process. A restart forgets it; the backend
//! status remains the source of truth.

use std::collections::{HashMap, HashSet};

use billnotify_core::DocumentId;

#[derive(Debug, Default, Clone)]
pub struct DeliveryLedger {
    failed_attempts: HashMap<DocumentId, u32>,
    quarantined: HashSet<DocumentId>,
    settled_unrecorded: HashSet<DocumentId>,
}

impl DeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a failed attempt and return the total so far.
    pub fn record_failure(&mut self, id: DocumentId) -> u32 {
        let count = self.failed_attempts.entry(id).or_insert(0);
        *count += 1;
        *count
    }

    pub fn failures(&self, id: DocumentId) -> u32 {
        self.failed_attempts.get(&id).copied().unwrap_or(0)
    }

    pub fn forget_failures(&mut self, id: DocumentId) {
        self.failed_attempts.remove(&id);
    }

    /// Never send this document again from this process.
    pub fn quarantine(&mut self, id: DocumentId) {
        self.failed_attempts.remove(&id);
        self.quarantined.insert(id);
    }

    pub fn is_quarantined(&self, id: DocumentId) -> bool {
        self.quarantined.contains(&id)
    }

    pub fn quarantined(&self) -> impl Iterator<Item = DocumentId> + '_ {
        self.quarantined.iter().copied()
    }

    /// Remember a document whose outcome is intentionally not written back
    /// (test mode), so it is not handled again.
    pub fn settle_unrecorded(&mut self, id: DocumentId) {
        self.failed_attempts.remove(&id);
        self.settled_unrecorded.insert(id);
    }

    pub fn is_settled_unrecorded(&self, id: DocumentId) -> bool {
        self.settled_unrecorded.contains(&id)
    }

    /// Documents this process must not pick up again: quarantined or settled
    /// without write-back. The backend still lists them as undelivered.
    pub fn settled(&self) -> impl Iterator<Item = DocumentId> + '_ {
        self.quarantined.iter().chain(&self.settled_unrecorded).copied()
    }
}
