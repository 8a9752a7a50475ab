//! Delivery destinations in the channel's normalized address form.

use serde::{Deserialize, Serialize};

use crate::config::PhoneRules;
use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Suffix the messaging channel expects on user addresses.
pub const USER_SUFFIX: &str = "@c.us";

/// A normalized delivery address: international digits plus the channel suffix
/// (e.g. `5215512345678@c.us`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Destination(String);

impl ValueObject for Destination {}

impl Destination {
    /// Parse an address that is already in normalized form, or a bare
    /// international number (digits with optional `+`/spaces/dashes).
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let raw = raw.trim();
        let (number, suffix) = match raw.split_once('@') {
            Some((number, domain)) => (number, format!("@{domain}")),
            None => (raw, USER_SUFFIX.to_string()),
        };

        let digits = digits_only(number);
        if digits.is_empty() || digits.len() != number.chars().filter(|c| !is_separator(*c)).count()
        {
            return Err(DomainError::validation(format!(
                "destination `{raw}` is not an international number"
            )));
        }
        if suffix.len() < 2 {
            return Err(DomainError::validation(format!(
                "destination `{raw}` has an empty domain suffix"
            )));
        }

        Ok(Self(format!("{digits}{suffix}")))
    }

    /// Normalize a phone number as typed into a customer record.
    ///
    /// Returns `None` when the value has too few digits to be a real number.
    /// Local numbers (exactly `rules.local_length` digits) get the default
    /// country code prefixed when one is configured.
    pub fn from_phone(raw: &str, rules: &PhoneRules) -> Option<Self> {
        let digits = digits_only(raw);
        if digits.len() < rules.min_digits {
            return None;
        }

        let international = match &rules.default_country_code {
            Some(cc) if digits.len() == rules.local_length && !raw.trim().starts_with('+') => {
                format!("{cc}{digits}")
            }
            _ => digits,
        };

        Some(Self(format!("{international}{USER_SUFFIX}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric part without the channel suffix.
    pub fn number(&self) -> &str {
        self.0.split_once('@').map(|(n, _)| n).unwrap_or(&self.0)
    }
}

impl core::fmt::Display for Destination {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Destination {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Destination> for String {
    fn from(value: Destination) -> Self {
        value.0
    }
}

fn digits_only(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

fn is_separator(c: char) -> bool {
    matches!(c, '+' | ' ' | '-' | '(' | ')' | '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mx_rules() -> PhoneRules {
        PhoneRules {
            default_country_code: Some("52".to_string()),
            local_length: 10,
            min_digits: 8,
        }
    }

    #[test]
    fn parse_keeps_normalized_addresses() {
        let d = Destination::parse("5215512345678@c.us").unwrap();
        assert_eq!(d.as_str(), "5215512345678@c.us");
        assert_eq!(d.number(), "5215512345678");
    }

    #[test]
    fn parse_adds_suffix_to_bare_numbers() {
        let d = Destination::parse("+52 1 55-1234-5678").unwrap();
        assert_eq!(d.as_str(), "5215512345678@c.us");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Destination::parse("call me").is_err());
        assert!(Destination::parse("55abc12@c.us").is_err());
        assert!(Destination::parse("").is_err());
    }

    #[test]
    fn from_phone_prefixes_local_numbers() {
        let d = Destination::from_phone("(55) 1234-5678", &mx_rules()).unwrap();
        assert_eq!(d.as_str(), "525512345678@c.us");
    }

    #[test]
    fn from_phone_keeps_explicit_international_numbers() {
        let d = Destination::from_phone("+1 555 123 4567", &mx_rules()).unwrap();
        assert_eq!(d.as_str(), "15551234567@c.us");
    }

    #[test]
    fn from_phone_rejects_short_values() {
        assert_eq!(Destination::from_phone("12-34", &mx_rules()), None);
        assert_eq!(Destination::from_phone("   ", &mx_rules()), None);
    }
}
