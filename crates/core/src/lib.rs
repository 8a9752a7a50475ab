//! `billnotify-core`: shared building blocks for the notification pipeline.
//!
//! This crate contains **pure** primitives (no I/O): identifiers, the error
//! model, value/entity markers and the resolved configuration value.

pub mod config;
pub mod destination;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use config::{
    ChannelDownPolicy, DeliveryMode, NotifierConfig, PhoneRules, SalesRep, TemplateChoice,
    TemplateSet,
};
pub use destination::Destination;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{CustomerId, DocumentId};
pub use value_object::ValueObject;
