use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use tapor_core::{CustomerId, DomainError, InvoiceId, Money, ProductId};
use tapor_customers::Customer;
use tapor_invoicing::{
    Invoice, InvoiceDraft, InvoiceFilter, InvoiceItem, InvoiceNumber, InvoicePatch, NewInvoiceItem,
};
use tapor_products::{Product, StockPolicy};

/// Storage operation error.
///
/// These are **infrastructure errors** as seen by the engine. Domain rule
/// failures detected inside a transaction (e.g. an oversell under the
/// rejecting policy) travel as `Rejected` so callers can surface them
/// unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Uniqueness violation, typically two creations racing for one invoice number.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    /// A domain rule refused the change; the transaction was rolled back.
    #[error(transparent)]
    Rejected(#[from] DomainError),

    /// Connection, query or decoding failure.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub const SALES_TOTAL_OVERFLOW: &str = "sales total overflow";
pub const SOLD_QUANTITY_OVERFLOW: &str = "sold quantity overflow";

/// A dashboard sum left the `i64` range. Both backends report it this way.
pub fn aggregate_overflow(what: &str) -> StoreError {
    StoreError::Rejected(DomainError::invariant(what))
}

/// Invoice header and items as written by one creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvoiceRecord {
    pub id: InvoiceId,
    pub draft: InvoiceDraft,
    pub items: Vec<NewInvoiceItem>,
    pub created_at: DateTime<Utc>,
}

/// Invoice header plus its items, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredInvoice {
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
}

/// Sum and count of final invoices over a time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesSummary {
    pub total: Money,
    pub count: u64,
}

/// A product with the quantity sold through final invoices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSales {
    #[serde(flatten)]
    pub product: Product,
    pub sold_quantity: i64,
}

/// Customer records.
#[async_trait::async_trait]
pub trait CustomerStore: Send + Sync {
    async fn insert_customer(&self, customer: Customer) -> StoreResult<Customer>;

    async fn get_customer(&self, id: CustomerId) -> StoreResult<Option<Customer>>;

    /// Batch lookup; ids with no record are skipped.
    async fn customers_by_ids(&self, ids: &[CustomerId]) -> StoreResult<Vec<Customer>>;

    /// Ordered by first name, optionally filtered by a full-name substring.
    async fn list_customers(&self, search: Option<&str>) -> StoreResult<Vec<Customer>>;
}

/// Product records and the on-hand quantity primitive.
#[async_trait::async_trait]
pub trait ProductStore: Send + Sync {
    async fn insert_product(&self, product: Product) -> StoreResult<Product>;

    async fn get_product(&self, id: ProductId) -> StoreResult<Option<Product>>;

    /// Batch lookup; ids with no record are skipped.
    async fn products_by_ids(&self, ids: &[ProductId]) -> StoreResult<Vec<Product>>;

    /// Ordered by name, optionally filtered by a name substring.
    async fn list_products(&self, search: Option<&str>) -> StoreResult<Vec<Product>>;

    /// Products with `quantity < threshold`, lowest quantity first.
    async fn low_stock_products(&self, threshold: i64) -> StoreResult<Vec<Product>>;

    /// Apply `quantity += delta` as one atomic step and return the new quantity.
    ///
    /// Implementations must never read-then-write. Under `StockPolicy::Reject`
    /// an adjustment that would go below zero fails with `Rejected` and leaves
    /// the quantity unchanged.
    async fn adjust_quantity(
        &self,
        id: ProductId,
        delta: i64,
        policy: StockPolicy,
    ) -> StoreResult<i64>;
}

/// Invoice headers and items.
///
/// Every mutating operation is one transaction: on error nothing is written.
#[async_trait::async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Number the next creation would receive right now (read-only preview).
    async fn next_invoice_number(&self) -> StoreResult<InvoiceNumber>;

    /// Allocate the next number, insert header and items and, for
    /// `InvoiceKind::Invoice`, decrement stock per item.
    ///
    /// A lost numbering race surfaces as `Conflict`; the caller may retry.
    async fn create_invoice(
        &self,
        record: NewInvoiceRecord,
        policy: StockPolicy,
    ) -> StoreResult<StoredInvoice>;

    /// Patch the header and, when `items` is given, replace the item set.
    /// Stock is not touched.
    async fn update_invoice(
        &self,
        id: InvoiceId,
        patch: &InvoicePatch,
        items: Option<&[NewInvoiceItem]>,
        now: DateTime<Utc>,
    ) -> StoreResult<StoredInvoice>;

    /// Remove items, then the header. Stock is not restored.
    /// Returns `false` when no such invoice exists.
    async fn delete_invoice(&self, id: InvoiceId) -> StoreResult<bool>;

    /// Flip a pre-invoice to a final invoice and decrement stock per item.
    /// Missing or non-pre-invoice documents are `NotFound`.
    async fn convert_pre_invoice(
        &self,
        id: InvoiceId,
        now: DateTime<Utc>,
        policy: StockPolicy,
    ) -> StoreResult<StoredInvoice>;

    async fn get_invoice(&self, id: InvoiceId) -> StoreResult<Option<Invoice>>;

    /// Matching headers, newest first (ties broken by number, descending).
    async fn list_invoices(
        &self,
        filter: &InvoiceFilter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Invoice>>;

    /// Items of the given invoices, grouped by invoice in insertion order.
    async fn items_for_invoices(&self, ids: &[InvoiceId]) -> StoreResult<Vec<InvoiceItem>>;
}

/// Read-only aggregates for the dashboard. Only final invoices count.
#[async_trait::async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Sales with `from <= created_at` and, when given, `created_at < until`.
    async fn sales_summary(
        &self,
        from: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> StoreResult<SalesSummary>;

    async fn count_low_stock(&self, threshold: i64) -> StoreResult<u64>;

    /// Every product ranked by quantity sold, best first; unsold products
    /// rank with zero. Ties are ordered by name, then id.
    async fn top_products(&self, limit: usize) -> StoreResult<Vec<ProductSales>>;
}

/// Umbrella for a backend that provides every store.
pub trait Storage: CustomerStore + ProductStore + InvoiceStore + AnalyticsStore {}

impl<T> Storage for T where T: CustomerStore + ProductStore + InvoiceStore + AnalyticsStore + ?Sized {}
