//! Resolved pipeline configuration.
//!
//! The pipeline never reads environment variables or files itself; whatever
//! loads configuration hands it one validated [`NotifierConfig`].

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::destination::Destination;
use crate::error::{DomainError, DomainResult};

/// Where messages actually go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Every send is redirected to the configured test destination.
    Test,
    /// Sends go to the destination resolved from backend data.
    Production,
}

impl DeliveryMode {
    pub fn is_test(self) -> bool {
        matches!(self, DeliveryMode::Test)
    }
}

impl core::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeliveryMode::Test => f.write_str("test"),
            DeliveryMode::Production => f.write_str("production"),
        }
    }
}

impl core::str::FromStr for DeliveryMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(DeliveryMode::Test),
            "production" | "prod" => Ok(DeliveryMode::Production),
            other => Err(DomainError::config(format!(
                "delivery mode must be `test` or `production`, got `{other}`"
            ))),
        }
    }
}

/// Message layout choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateChoice {
    /// Greeting, body and closing.
    #[default]
    Detailed,
    /// A single line.
    Compact,
}

/// Template choice per document category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TemplateSet {
    pub category_a: TemplateChoice,
    pub category_b: TemplateChoice,
}

/// The sales representative who receives internal notices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesRep {
    pub name: String,
    /// Raw phone as configured; normalized by the destination resolver.
    pub phone: Option<String>,
}

/// Rules for turning stored phone numbers into channel addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneRules {
    /// Country code prefixed onto local numbers (digits only, e.g. `52`).
    pub default_country_code: Option<String>,
    /// Digit count of a local (national) number.
    pub local_length: usize,
    /// Anything shorter is not a phone number.
    pub min_digits: usize,
}

impl Default for PhoneRules {
    fn default() -> Self {
        Self {
            default_country_code: None,
            local_length: 10,
            min_digits: 8,
        }
    }
}

/// When to raise the sustained channel-down alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDownPolicy {
    /// Consecutive ticks deferred because the channel was not ready.
    pub alert_after_ticks: u32,
}

impl Default for ChannelDownPolicy {
    fn default() -> Self {
        Self {
            alert_after_ticks: 3,
        }
    }
}

/// Everything the delivery pipeline needs to know about its environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub delivery_mode: DeliveryMode,
    /// Required in test mode.
    pub test_destination: Option<Destination>,
    /// Safety floor: documents issued before this date are never processed.
    pub since_date: NaiveDate,
    pub poll_interval: Duration,
    /// Maximum documents handled per tick.
    pub batch_limit: usize,
    /// Documents fetched per backend round-trip.
    pub page_size: usize,
    /// Pause between a recorded send and the next document.
    pub inter_message_delay: Duration,
    /// Failed attempts per document (sends or customer lookups) before it is
    /// marked skipped.
    pub max_send_attempts: u32,
    pub templates: TemplateSet,
    pub sales_rep: SalesRep,
    pub phone_rules: PhoneRules,
    /// How long to wait for the channel's own readiness signal before probing.
    pub channel_ready_grace: Duration,
    pub attachment_max_bytes: usize,
    /// Whether test-mode sends are written back to the backend.
    pub record_test_deliveries: bool,
    pub channel_down: ChannelDownPolicy,
}

impl NotifierConfig {
    /// Defaults for everything except the safety floor, in test mode.
    ///
    /// Test mode is the default so that a half-configured deployment can
    /// never reach real customers.
    pub fn new(since_date: NaiveDate) -> Self {
        Self {
            delivery_mode: DeliveryMode::Test,
            test_destination: None,
            since_date,
            poll_interval: Duration::from_secs(60 * 60),
            batch_limit: 200,
            page_size: 50,
            inter_message_delay: Duration::from_secs(3),
            max_send_attempts: 3,
            templates: TemplateSet::default(),
            sales_rep: SalesRep {
                name: "Sales".to_string(),
                phone: None,
            },
            phone_rules: PhoneRules::default(),
            channel_ready_grace: Duration::from_secs(60),
            attachment_max_bytes: 16 * 1024 * 1024,
            record_test_deliveries: false,
            channel_down: ChannelDownPolicy::default(),
        }
    }

    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }

    pub fn with_test_destination(mut self, destination: Destination) -> Self {
        self.test_destination = Some(destination);
        self
    }

    pub fn with_sales_rep(mut self, name: impl Into<String>, phone: Option<String>) -> Self {
        self.sales_rep = SalesRep {
            name: name.into(),
            phone,
        };
        self
    }

    pub fn with_inter_message_delay(mut self, delay: Duration) -> Self {
        self.inter_message_delay = delay;
        self
    }

    pub fn with_phone_rules(mut self, rules: PhoneRules) -> Self {
        self.phone_rules = rules;
        self
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> DomainResult<()> {
        if self.delivery_mode.is_test() && self.test_destination.is_none() {
            return Err(DomainError::config(
                "test mode requires a test destination",
            ));
        }
        if self.batch_limit == 0 {
            return Err(DomainError::config("batch_limit must be positive"));
        }
        if self.page_size == 0 {
            return Err(DomainError::config("page_size must be positive"));
        }
        if self.max_send_attempts == 0 {
            return Err(DomainError::config("max_send_attempts must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(DomainError::config("poll_interval must be positive"));
        }
        if self.attachment_max_bytes == 0 {
            return Err(DomainError::config("attachment_max_bytes must be positive"));
        }
        if let Some(cc) = &self.phone_rules.default_country_code {
            if cc.is_empty() || !cc.chars().all(|c| c.is_ascii_digit()) {
                return Err(DomainError::config(format!(
                    "default country code `{cc}` must be digits only"
                )));
            }
        }
        Ok(())
    }
}
