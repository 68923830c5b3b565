//! Products domain module (catalog + on-hand stock).
//!
//! Deterministic rules only: input validation, the low-stock rule and the
//! oversell policy applied to stock adjustments. Storage applies adjustments
//! atomically; see `tapor-infra`.

pub mod product;
pub mod stock;

pub use product::{NewProduct, Product, LOW_STOCK_THRESHOLD};
pub use stock::StockPolicy;
