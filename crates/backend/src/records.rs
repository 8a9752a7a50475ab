//! Wire records exchanged with the backend and their validation into domain
//! types.
//!
//! Backend rows are loosely typed (most columns nullable); required fields
//! are checked here so the rest of the pipeline only sees [`Document`] and
//! [`Customer`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use billnotify_core::{CustomerId, Destination, DocumentId, DomainError, DomainResult};
use billnotify_invoicing::{Delivery, DeliveryStatus, Document, Money};
use billnotify_parties::{ContactInfo, Customer};

pub const DOCUMENTS_PATH: &str = "/documents";
pub const CUSTOMERS_PATH: &str = "/customers";

/// Columns selected for documents.
pub const DOCUMENT_FIELDS: &str = "id,number,category,customer_id,total,currency,issue_date,\
delivery_status,delivery_date,delivery_destination,delivery_note";

/// Columns selected for customers.
pub const CUSTOMER_FIELDS: &str = "id,name,email,phone,phone2,mobile";

/// Filter matching documents that have not been delivered yet. A null flag
/// counts as undelivered, and so do the legacy `N` and empty flags.
pub const UNSET_FILTER: &str = r#"(delivery_status.is.null,delivery_status.in.(unset,N,n,""))"#;

/// A document row as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: i64,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub customer_id: Option<i64>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub issue_date: Option<NaiveDate>,
    #[serde(default)]
    pub delivery_status: Option<DeliveryStatus>,
    #[serde(default)]
    pub delivery_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery_destination: Option<String>,
    #[serde(default)]
    pub delivery_note: Option<String>,
}

impl DocumentRecord {
    pub fn status(&self) -> DeliveryStatus {
        self.delivery_status.unwrap_or_default()
    }
}

impl TryFrom<DocumentRecord> for Document {
    type Error = DomainError;

    fn try_from(rec: DocumentRecord) -> DomainResult<Self> {
        let id = DocumentId::new(rec.id);
        let number = required_text(rec.number, id, "number")?;
        let customer_id = rec
            .customer_id
            .map(CustomerId::new)
            .ok_or_else(|| missing(id, "customer_id"))?;
        let total = Money::from_decimal(rec.total.ok_or_else(|| missing(id, "total"))?)?;
        let currency = required_text(rec.currency, id, "currency")?;
        let issue_date = rec.issue_date.ok_or_else(|| missing(id, "issue_date"))?;

        let delivery = Delivery {
            status: rec.delivery_status.unwrap_or_default(),
            date: rec.delivery_date,
            destination: rec
                .delivery_destination
                .as_deref()
                .and_then(|d| Destination::parse(d).ok()),
            note: rec.delivery_note,
        };

        let mut doc = Document::new(id, number, customer_id, total, currency, issue_date)
            .with_delivery(delivery);
        if let Some(tag) = rec.category.filter(|t| !t.trim().is_empty()) {
            doc = doc.with_category_tag(tag);
        }
        Ok(doc)
    }
}

/// A customer row as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub phone2: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
}

impl TryFrom<CustomerRecord> for Customer {
    type Error = DomainError;

    fn try_from(rec: CustomerRecord) -> DomainResult<Self> {
        let name = rec
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| DomainError::validation(format!("customer {}: missing name", rec.id)))?;

        Ok(Customer::new(CustomerId::new(rec.id), name).with_contact(ContactInfo {
            email: rec.email,
            phone: rec.phone,
            secondary_phone: rec.phone2,
            mobile: rec.mobile,
        }))
    }
}

/// Body of the delivery write-back PATCH.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPatch {
    pub delivery_status: DeliveryStatus,
    pub delivery_date: DateTime<Utc>,
    pub delivery_destination: Option<String>,
    pub delivery_note: Option<String>,
}

impl DeliveryPatch {
    pub fn sent(destination: &Destination, at: DateTime<Utc>) -> Self {
        Self {
            delivery_status: DeliveryStatus::Sent,
            delivery_date: at,
            delivery_destination: Some(destination.to_string()),
            delivery_note: None,
        }
    }

    pub fn skipped(reason: &str, at: DateTime<Utc>) -> Self {
        Self {
            delivery_status: DeliveryStatus::Skipped,
            delivery_date: at,
            delivery_destination: None,
            delivery_note: Some(reason.to_string()),
        }
    }
}

fn required_text(value: Option<String>, id: DocumentId, field: &str) -> DomainResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| missing(id, field))
}

fn missing(id: DocumentId, field: &str) -> DomainError {
    DomainError::validation(format!("document {id}: missing {field}"))
}
