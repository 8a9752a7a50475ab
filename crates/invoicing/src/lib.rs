//! Invoicing domain module.
//!
//! Billing documents as the notification pipeline sees them, the category
//! classifier, and the message renderer. Deterministic domain logic only
//! (no IO, no HTTP, no storage).

pub mod document;
pub mod render;

pub use document::{
    Audience, Category, Delivery, DeliveryStatus, Document, Money, classify,
};
pub use render::{TEST_BANNER, render_customer_message, render_sales_rep_message};
