//! Parties domain module (customers and the sales representative).
//!
//! Pure domain logic only (no IO, no HTTP, no storage): the customer record
//! as the pipeline sees it, and the destination resolver that decides where a
//! message may be delivered.

pub mod customer;
pub mod destination;

pub use customer::{ContactInfo, Customer};
pub use destination::DestinationResolver;
