use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use billnotify_core::{CustomerId, Destination, DocumentId, DomainError, DomainResult, Entity};

/// Delivery state of a document, as persisted on the backend.
///
/// Older records carry a `Y`/`N` flag (or nothing at all); both are read into
/// this tri-state, and an absent flag always means `Unset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    #[serde(alias = "N", alias = "n", alias = "")]
    Unset,
    #[serde(alias = "Y", alias = "y")]
    Sent,
    Skipped,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeliveryStatus::Unset)
    }

    /// Validate a status change.
    ///
    /// Only `Unset → Sent` and `Unset → Skipped` are allowed. Re-applying the
    /// current terminal status is accepted so write-back can be repeated.
    pub fn transition_to(self, next: DeliveryStatus) -> DomainResult<DeliveryStatus> {
        match (self, next) {
            (DeliveryStatus::Unset, DeliveryStatus::Sent | DeliveryStatus::Skipped) => Ok(next),
            (current, next) if current == next && current.is_terminal() => Ok(next),
            (current, next) => Err(DomainError::invariant(format!(
                "delivery status cannot move from {current:?} to {next:?}"
            ))),
        }
    }
}

/// Delivery fields of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub status: DeliveryStatus,
    pub date: Option<DateTime<Utc>>,
    pub destination: Option<Destination>,
    /// Why nothing was sent (only for `Skipped`).
    pub note: Option<String>,
}

/// Amount in the smallest currency unit (e.g. cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(pub i64);

impl Money {
    /// Convert a decimal amount as sent by the backend.
    pub fn from_decimal(amount: f64) -> DomainResult<Self> {
        if !amount.is_finite() {
            return Err(DomainError::validation("amount is not a finite number"));
        }
        Ok(Self((amount * 100.0).round() as i64))
    }

    /// `1234567` → `12,345.67`.
    pub fn format(self) -> String {
        let negative = self.0 < 0;
        let abs = self.0.unsigned_abs();
        let units = (abs / 100).to_string();
        let cents = abs % 100;

        let mut grouped = String::with_capacity(units.len() + units.len() / 3);
        for (i, ch) in units.chars().enumerate() {
            if i > 0 && (units.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }

        format!("{}{grouped}.{cents:02}", if negative { "-" } else { "" })
    }
}

/// A billing document eligible for notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: DocumentId,
    /// Human-readable number printed on the document (e.g. `9008535`).
    pub number: String,
    /// Category tag as stored by the backend. Informational only; routing
    /// uses [`classify`].
    pub category_tag: Option<String>,
    pub customer_id: CustomerId,
    pub total: Money,
    pub currency: String,
    pub issue_date: NaiveDate,
    delivery: Delivery,
}

impl Document {
    pub fn new(
        id: DocumentId,
        number: impl Into<String>,
        customer_id: CustomerId,
        total: Money,
        currency: impl Into<String>,
        issue_date: NaiveDate,
    ) -> Self {
        Self {
            id,
            number: number.into(),
            category_tag: None,
            customer_id,
            total,
            currency: currency.into(),
            issue_date,
            delivery: Delivery::default(),
        }
    }

    pub fn with_category_tag(mut self, tag: impl Into<String>) -> Self {
        self.category_tag = Some(tag.into());
        self
    }

    /// Attach delivery fields read from the backend (no transition check).
    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    pub fn status(&self) -> DeliveryStatus {
        self.delivery.status
    }

    pub fn category(&self) -> Category {
        classify(&self.number)
    }

    /// Apply a confirmed send.
    pub fn record_sent(&mut self, destination: Destination, at: DateTime<Utc>) -> DomainResult<()> {
        let status = self.delivery.status.transition_to(DeliveryStatus::Sent)?;
        self.delivery = Delivery {
            status,
            date: Some(at),
            destination: Some(destination),
            note: None,
        };
        Ok(())
    }

    /// Record that nothing was sent.
    pub fn record_skipped(&mut self, reason: impl Into<String>, at: DateTime<Utc>) -> DomainResult<()> {
        let status = self.delivery.status.transition_to(DeliveryStatus::Skipped)?;
        self.delivery = Delivery {
            status,
            date: Some(at),
            destination: None,
            note: Some(reason.into()),
        };
        Ok(())
    }
}

impl Entity for Document {
    type Id = DocumentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Document category derived from the human number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Seven-character numbers starting with `9`: internal notice only.
    A,
    /// Everything else: customer-facing message.
    B,
}

/// Who a category's message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    SalesRep,
    Customer,
}

impl Category {
    pub fn audience(self) -> Audience {
        match self {
            Category::A => Audience::SalesRep,
            Category::B => Audience::Customer,
        }
    }
}

impl core::fmt::Display for Category {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Category::A => f.write_str("A"),
            Category::B => f.write_str("B"),
        }
    }
}

/// Classify a document by its human number.
///
/// Category A iff the number is exactly 7 characters long and starts with `9`.
pub fn classify(number: &str) -> Category {
    if number.chars().count() == 7 && number.starts_with('9') {
        Category::A
    } else {
        Category::B
    }
}
