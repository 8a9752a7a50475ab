use serde::{Deserialize, Serialize};

use billnotify_core::{CustomerId, Entity};

/// Contact fields carried by a customer record.
///
/// Several fields may hold phone-like values; only `mobile` is authoritative
/// for delivery. The others are kept for display and auditing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub secondary_phone: Option<String>,
    pub mobile: Option<String>,
}

impl ContactInfo {
    /// The authoritative mobile value, if present and not blank.
    pub fn mobile(&self) -> Option<&str> {
        self.mobile
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }
}

/// A customer as read from the backend-of-record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub display_name: String,
    pub contact: ContactInfo,
}

impl Customer {
    pub fn new(id: CustomerId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            contact: ContactInfo::default(),
        }
    }

    pub fn with_mobile(mut self, mobile: impl Into<String>) -> Self {
        self.contact.mobile = Some(mobile.into());
        self
    }

    pub fn with_contact(mut self, contact: ContactInfo) -> Self {
        self.contact = contact;
        self
    }
}

impl Entity for Customer {
    type Id = CustomerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_mobile_is_treated_as_absent() {
        let c = Customer::new(CustomerId::new(1), "ACME").with_mobile("   ");
        assert_eq!(c.contact.mobile(), None);
    }

    #[test]
    fn other_phone_fields_are_not_the_mobile() {
        let c = Customer::new(CustomerId::new(1), "ACME").with_contact(ContactInfo {
            phone: Some("5512345678".to_string()),
            secondary_phone: Some("5587654321".to_string()),
            ..ContactInfo::default()
        });
        assert_eq!(c.contact.mobile(), None);
    }

    #[test]
    fn identity_is_the_backend_key() {
        let a = Customer::new(CustomerId::new(7), "ACME");
        let b = Customer::new(CustomerId::new(7), "ACME S.A.");
        assert_eq!(Entity::id(&a), Entity::id(&b));
    }
}
