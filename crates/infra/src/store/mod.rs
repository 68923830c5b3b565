//! Storage boundary for customers, products and invoices.
//!
//! The engine talks to the `Storage` trait family only. `InMemoryStore` backs
//! development and tests; `PostgresStore` is the persistent backend.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use r#trait::{
    AnalyticsStore, CustomerStore, InvoiceStore, NewInvoiceRecord, ProductSales, ProductStore,
    SALES_TOTAL_OVERFLOW, SOLD_QUANTITY_OVERFLOW, SalesSummary, Storage, StoreError, StoreResult,
    StoredInvoice, aggregate_overflow,
};
