//! Destination resolution: the one gate between backend contact data and the
//! messaging channel.
//!
//! In test mode nothing derived from customer data ever leaves this module;
//! every message is redirected to the configured test address.

use billnotify_core::{DeliveryMode, Destination, PhoneRules, SalesRep};

use crate::customer::Customer;

/// Chooses the real or test delivery address for a message.
#[derive(Debug, Clone, Default)]
pub struct DestinationResolver {
    rules: PhoneRules,
}

impl DestinationResolver {
    pub fn new(rules: PhoneRules) -> Self {
        Self { rules }
    }

    /// Resolve where a customer-facing message goes.
    ///
    /// - `Test`: always `test_address`, whatever the customer record holds.
    /// - `Production`: the customer's normalized mobile, or `None`.
    pub fn resolve(
        &self,
        customer: &Customer,
        mode: DeliveryMode,
        test_address: &Destination,
    ) -> Option<Destination> {
        match mode {
            DeliveryMode::Test => Some(test_address.clone()),
            DeliveryMode::Production => self.production_destination(customer),
        }
    }

    /// Where the message would go in production, without the test redirect.
    ///
    /// Used for the test-mode disclosure line; never used as a send target in
    /// test mode.
    pub fn production_destination(&self, customer: &Customer) -> Option<Destination> {
        let mobile = customer.contact.mobile()?;
        Destination::from_phone(mobile, &self.rules)
    }

    /// Same gate for internal notices addressed to the sales representative.
    pub fn resolve_sales_rep(
        &self,
        rep: &SalesRep,
        mode: DeliveryMode,
        test_address: &Destination,
    ) -> Option<Destination> {
        match mode {
            DeliveryMode::Test => Some(test_address.clone()),
            DeliveryMode::Production => self.sales_rep_destination(rep),
        }
    }

    pub fn sales_rep_destination(&self, rep: &SalesRep) -> Option<Destination> {
        let phone = rep.phone.as_deref().map(str::trim).filter(|p| !p.is_empty())?;
        Destination::from_phone(phone, &self.rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customer::ContactInfo;
    use billnotify_core::CustomerId;
    use proptest::prelude::*;

    fn test_addr() -> Destination {
        Destination::parse("15550000000@c.us").unwrap()
    }

    fn resolver() -> DestinationResolver {
        DestinationResolver::new(PhoneRules {
            default_country_code: Some("52".to_string()),
            ..PhoneRules::default()
        })
    }

    fn customer(mobile: Option<&str>) -> Customer {
        Customer::new(CustomerId::new(7), "Ferreteria Lopez").with_contact(ContactInfo {
            email: Some("compras@example.com".to_string()),
            phone: Some("5511112222".to_string()),
            secondary_phone: None,
            mobile: mobile.map(str::to_string),
        })
    }

    fn rep(phone: Option<&str>) -> SalesRep {
        SalesRep {
            name: "Rosa".to_string(),
            phone: phone.map(str::to_string),
        }
    }

    #[test]
    fn test_mode_redirects_even_when_customer_has_a_mobile() {
        let got = resolver().resolve(&customer(Some("5512345678")), DeliveryMode::Test, &test_addr());
        assert_eq!(got, Some(test_addr()));
    }

    #[test]
    fn test_mode_redirects_when_customer_has_no_mobile() {
        let got = resolver().resolve(&customer(None), DeliveryMode::Test, &test_addr());
        assert_eq!(got, Some(test_addr()));
    }

    #[test]
    fn production_uses_normalized_mobile() {
        let got = resolver().resolve(
            &customer(Some("55 1234 5678")),
            DeliveryMode::Production,
            &test_addr(),
        );
        assert_eq!(got, Destination::parse("525512345678@c.us").ok());
    }

    #[test]
    fn production_without_mobile_resolves_to_none() {
        let got = resolver().resolve(&customer(None), DeliveryMode::Production, &test_addr());
        assert_eq!(got, None);
    }

    #[test]
    fn production_with_blank_mobile_resolves_to_none() {
        let got = resolver().resolve(&customer(Some("  ")), DeliveryMode::Production, &test_addr());
        assert_eq!(got, None);
    }

    #[test]
    fn production_with_unusable_mobile_resolves_to_none() {
        let got = resolver().resolve(&customer(Some("n/a")), DeliveryMode::Production, &test_addr());
        assert_eq!(got, None);
    }

    #[test]
    fn production_never_falls_back_to_test_address() {
        let got = resolver().resolve(&customer(None), DeliveryMode::Production, &test_addr());
        assert_ne!(got, Some(test_addr()));
    }

    #[test]
    fn sales_rep_follows_the_same_gate() {
        let r = resolver();
        assert_eq!(
            r.resolve_sales_rep(&rep(Some("5599998888")), DeliveryMode::Test, &test_addr()),
            Some(test_addr())
        );
        assert_eq!(
            r.resolve_sales_rep(&rep(Some("5599998888")), DeliveryMode::Production, &test_addr()),
            Destination::parse("525599998888@c.us").ok()
        );
        assert_eq!(
            r.resolve_sales_rep(&rep(None), DeliveryMode::Production, &test_addr()),
            None
        );
        assert_eq!(
            r.resolve_sales_rep(&rep(Some(" ")), DeliveryMode::Production, &test_addr()),
            None
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: test mode returns the test address for every customer,
        /// whatever their contact data looks like.
        #[test]
        fn test_mode_always_returns_test_address(
            name in ".{0,40}",
            mobile in proptest::option::of(".{0,20}"),
            phone in proptest::option::of("[0-9 +()-]{0,16}"),
            key in any::<i64>(),
        ) {
            let c = Customer::new(CustomerId::new(key), name).with_contact(ContactInfo {
                email: None,
                phone,
                secondary_phone: None,
                mobile,
            });
            prop_assert_eq!(
                resolver().resolve(&c, DeliveryMode::Test, &test_addr()),
                Some(test_addr())
            );
        }
    }
}
