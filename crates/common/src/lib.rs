//! Shared types for the sale saga system.
//!
//! This crate holds the identifier newtypes and sale value objects used
//! across the saga store, the message channel, and the orchestrator. It has
//! no async code and no I/O.

pub mod ids;
pub mod sale;

pub use ids::{CorrelationId, CustomerId, SagaId};
pub use sale::{Money, ProductId, SaleItem, SaleRequest};
