use std::sync::Arc;

use billnotify_core::CustomerId;
use billnotify_parties::Customer;

use crate::error::BackendError;
use crate::records::{CUSTOMER_FIELDS, CUSTOMERS_PATH, CustomerRecord};
use crate::retry::RetryPolicy;
use crate::session::{BackendClient, BackendRequest};

/// Looks up the customer a document refers to.
#[derive(Debug, Clone)]
pub struct CustomerDirectory {
    client: Arc<BackendClient>,
    retry: RetryPolicy,
}

impl CustomerDirectory {
    pub fn new(client: Arc<BackendClient>) -> Self {
        Self {
            client,
            retry: RetryPolicy::no_retry(),
        }
    }

    /// Retry lookups that fail at the transport level.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn fetch(&self, id: CustomerId) -> Result<Customer, BackendError> {
        let req = BackendRequest::get(CUSTOMERS_PATH)
            .query("select", CUSTOMER_FIELDS)
            .query("id", format!("eq.{id}"))
            .query("limit", "1");

        let client = &self.client;
        let rows: Vec<CustomerRecord> = self
            .retry
            .run("fetch_customer", || client.get_json(&req))
            .await?;
        let rec = rows
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(format!("customer {id}")))?;

        Customer::try_from(rec).map_err(|e| BackendError::Decode(e.to_string()))
    }
}
