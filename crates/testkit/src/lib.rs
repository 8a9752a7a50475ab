//! Test doubles shared by the billnotify crates.
//!
//! Each double is a real HTTP server bound to an ephemeral port, so clients
//! are exercised through the same code path as in production.

pub mod backend;
pub mod gateway;

pub use backend::{MockBackend, RequestLogEntry, customer_json, document_json};
pub use gateway::{MockGateway, SentAttachment, SentMessage};
