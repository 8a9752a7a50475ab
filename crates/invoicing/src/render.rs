//! Message text for customer notifications and internal sales-rep notices.
//!
//! Pure formatting: callers resolve destinations and pass them in. In test
//! mode every message starts with [`TEST_BANNER`] followed by the address the
//! message would have reached in production, so operators can audit the
//! redirect by reading the test inbox.

use billnotify_core::{DeliveryMode, Destination, TemplateChoice};
use billnotify_parties::Customer;

use crate::document::Document;

pub const TEST_BANNER: &str = "*** TEST MODE - redirected, not delivered to the real recipient ***";

/// Text for the customer of a category B document.
///
/// `attached` says whether the PDF goes out with the message; the text only
/// mentions an attachment when there is one.
pub fn render_customer_message(
    document: &Document,
    customer: &Customer,
    mode: DeliveryMode,
    production_destination: Option<&Destination>,
    template: TemplateChoice,
    attached: bool,
) -> String {
    let amount = format!("{} {}", document.total.format(), document.currency);
    let date = document.issue_date.format("%Y-%m-%d");

    let body = match template {
        TemplateChoice::Detailed => {
            let copy = if attached {
                "The document is attached to this message."
            } else {
                "Reply to this message if you need a copy of the document."
            };
            format!(
                "Hello {name},\n\n\
                 Your invoice {number} dated {date} for {amount} has been issued.\n\
                 {copy}\n\n\
                 Thank you for your business.",
                name = customer.display_name.trim(),
                number = document.number,
            )
        }
        TemplateChoice::Compact => {
            let suffix = if attached { " PDF attached." } else { "" };
            format!(
                "Invoice {number} ({amount}) issued {date}.{suffix}",
                number = document.number,
            )
        }
    };

    with_disclosure(mode, production_destination, body)
}

/// Internal notice for a category A document.
pub fn render_sales_rep_message(
    document: &Document,
    rep_name: &str,
    mode: DeliveryMode,
    production_destination: Option<&Destination>,
    template: TemplateChoice,
) -> String {
    let amount = format!("{} {}", document.total.format(), document.currency);
    let date = document.issue_date.format("%Y-%m-%d");

    let body = match template {
        TemplateChoice::Detailed => format!(
            "Hi {rep},\n\n\
             Document {number} for customer #{customer} was issued on {date} for {amount}.\n\
             This is an internal notice; no message was sent to the customer.",
            rep = rep_name.trim(),
            number = document.number,
            customer = document.customer_id,
        ),
        TemplateChoice::Compact => format!(
            "Internal: document {number} (customer #{customer}, {amount}) issued {date}.",
            number = document.number,
            customer = document.customer_id,
        ),
    };

    with_disclosure(mode, production_destination, body)
}

fn with_disclosure(
    mode: DeliveryMode,
    production_destination: Option<&Destination>,
    body: String,
) -> String {
    match mode {
        DeliveryMode::Production => body,
        DeliveryMode::Test => {
            let would_go_to = production_destination
                .map(|d| d.number().to_string())
                .unwrap_or_else(|| "none (no usable number on file; would be skipped)".to_string());
            format!("{TEST_BANNER}\nProduction destination: {would_go_to}\n\n{body}")
        }
    }
}
