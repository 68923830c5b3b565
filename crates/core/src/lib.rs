//! `tapor-core`: shared domain building blocks.
//!
//! Pure domain primitives (no infrastructure concerns): typed identifiers,
//! the domain error model, the `Entity` trait and a clock abstraction.

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{CustomerId, InvoiceId, InvoiceItemId, ProductId};

/// Monetary amount in the smallest currency unit.
pub type Money = i64;
