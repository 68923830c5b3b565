//! Invoice engine (application-level orchestration).
//!
//! The engine is the only writer of invoices and the only caller of stock
//! adjustments. Each operation validates its input, checks the records it
//! references, runs one storage transaction and returns a hydrated view.
//!
//! ## Operation Flow
//!
//! ```text
//! create_invoice(draft, items)
//!   ↓
//! 1. Validate header amounts and item lines (field-level errors)
//!   ↓
//! 2. Check the customer and every product exist
//!   ↓
//! 3. Store transaction: allocate number, insert header + items,
//!    decrement stock when the kind is `invoice`
//!   ↓   (numbering conflict → retry from 3, bounded)
//! 4. Hydrate: attach customer and products to the stored rows
//! ```
//!
//! ## Hydration
//!
//! Storage returns flat rows. The engine batch-loads the referenced customers
//! and products by id and composes `InvoiceDetails`. A reference whose record
//! no longer exists hydrates as `None` instead of failing the read.
//!
//! ## Error Semantics
//!
//! Every operation surfaces exactly one `EngineError`:
//!
//! - field or shape problems → `Validation`
//! - unknown invoice, customer or product → `NotFound`
//! - numbering conflicts that outlast the retry budget → `Conflict`
//! - refused stock movements → `InvariantViolation`
//! - backend failures → `Storage` (logged, opaque to clients)

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use tapor_core::{Clock, CustomerId, DomainError, InvoiceId, Money, ProductId, SystemClock};
use tapor_customers::Customer;
use tapor_invoicing::{
    DiscountType, Invoice, InvoiceDetails, InvoiceDraft, InvoiceFilter, InvoiceItem,
    InvoiceItemDetails, InvoiceNumber, InvoicePatch, NewInvoiceItem, Totals, validate_items,
};
use tapor_products::{Product, StockPolicy};

use crate::store::{NewInvoiceRecord, Storage, StoreError, StoredInvoice};

/// Default number of creation attempts when the invoice number is contended.
pub const DEFAULT_NUMBERING_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Input failed validation; `field` names the offending input when known.
    #[error("validation failed: {message}")]
    Validation {
        field: Option<String>,
        message: String,
    },

    #[error("{0} not found")]
    NotFound(String),

    /// Invoice numbering stayed contended for every allowed attempt.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<DomainError> for EngineError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(message) | DomainError::InvalidId(message) => {
                EngineError::Validation {
                    field: None,
                    message,
                }
            }
            DomainError::InvalidField { field, message } => EngineError::Validation {
                field: Some(field),
                message,
            },
            DomainError::InvariantViolation(msg) => EngineError::InvariantViolation(msg),
            DomainError::NotFound(what) => EngineError::NotFound(what),
            DomainError::Conflict(msg) => EngineError::Conflict(msg),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => EngineError::Conflict(msg),
            StoreError::NotFound(what) => EngineError::NotFound(what),
            StoreError::Rejected(err) => err.into(),
            StoreError::Backend(msg) => {
                error!(error = %msg, "storage backend failure");
                EngineError::Storage(msg)
            }
        }
    }
}

/// Tunables the engine applies to every operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub stock_policy: StockPolicy,
    /// Total creation attempts (first try included); values below 1 act as 1.
    pub numbering_max_attempts: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            stock_policy: StockPolicy::default(),
            numbering_max_attempts: DEFAULT_NUMBERING_MAX_ATTEMPTS,
        }
    }
}

/// Invoice lifecycle over any `Storage` backend.
///
/// Holds the store behind an `Arc`, so `InvoiceEngine<dyn Storage>` works as
/// well as a concrete backend. Cloning is cheap.
pub struct InvoiceEngine<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl<S: ?Sized> Clone for InvoiceEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            settings: self.settings,
        }
    }
}

impl<S: ?Sized> InvoiceEngine<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, settings: EngineSettings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    /// System clock and default settings.
    pub fn with_store(store: Arc<S>) -> Self {
        Self::new(store, Arc::new(SystemClock), EngineSettings::default())
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }
}

impl<S: Storage + ?Sized> InvoiceEngine<S> {
    /// Create an invoice or pre-invoice with its items.
    ///
    /// Amounts are persisted as supplied. Only `InvoiceKind::Invoice`
    /// consumes stock.
    #[instrument(
        skip(self, draft, items),
        fields(kind = draft.kind.as_str(), customer_id = %draft.customer_id, items = items.len()),
        err
    )]
    pub async fn create_invoice(
        &self,
        draft: InvoiceDraft,
        items: Vec<NewInvoiceItem>,
    ) -> EngineResult<InvoiceDetails> {
        draft.validate()?;
        validate_items(&items)?;
        self.ensure_customer(draft.customer_id).await?;
        self.ensure_products(&items).await?;

        let max_attempts = self.settings.numbering_max_attempts.max(1);
        let mut attempt = 0;
        let stored = loop {
            attempt += 1;
            let record = NewInvoiceRecord {
                id: InvoiceId::new(),
                draft: draft.clone(),
                items: items.clone(),
                created_at: self.clock.now(),
            };
            match self
                .store
                .create_invoice(record, self.settings.stock_policy)
                .await
            {
                Ok(stored) => break stored,
                Err(StoreError::Conflict(reason)) if attempt < max_attempts => {
                    warn!(attempt, max_attempts, %reason, "invoice number taken, retrying");
                }
                Err(StoreError::Conflict(reason)) => {
                    return Err(EngineError::Conflict(format!(
                        "no free invoice number after {max_attempts} attempts ({reason})"
                    )));
                }
                Err(err) => return Err(err.into()),
            }
        };

        info!(
            invoice_id = %stored.invoice.id,
            invoice_number = %stored.invoice.invoice_number,
            attempt,
            "invoice created"
        );
        self.hydrate_stored(stored).await
    }

    /// Patch header fields and optionally replace the whole item set.
    ///
    /// Stock is left as it is, whatever the items change to.
    #[instrument(skip(self, patch, items), fields(invoice_id = %id), err)]
    pub async fn update_invoice(
        &self,
        id: InvoiceId,
        patch: InvoicePatch,
        items: Option<Vec<NewInvoiceItem>>,
    ) -> EngineResult<InvoiceDetails> {
        if let Some(items) = &items {
            validate_items(items)?;
            self.ensure_products(items).await?;
        }
        if let Some(customer_id) = patch.customer_id {
            self.ensure_customer(customer_id).await?;
        }

        let stored = self
            .store
            .update_invoice(id, &patch, items.as_deref(), self.clock.now())
            .await?;

        info!(
            invoice_number = %stored.invoice.invoice_number,
            items_replaced = items.is_some(),
            "invoice updated"
        );
        self.hydrate_stored(stored).await
    }

    /// Delete an invoice and its items. Stock is not restored.
    #[instrument(skip(self), fields(invoice_id = %id), err)]
    pub async fn delete_invoice(&self, id: InvoiceId) -> EngineResult<bool> {
        let deleted = self.store.delete_invoice(id).await?;
        if deleted {
            info!("invoice deleted");
        }
        Ok(deleted)
    }

    /// Turn a pre-invoice into a final invoice, consuming stock for its items.
    #[instrument(skip(self), fields(invoice_id = %id), err)]
    pub async fn convert_pre_invoice(&self, id: InvoiceId) -> EngineResult<InvoiceDetails> {
        let stored = self
            .store
            .convert_pre_invoice(id, self.clock.now(), self.settings.stock_policy)
            .await?;

        info!(
            invoice_number = %stored.invoice.invoice_number,
            "pre-invoice converted"
        );
        self.hydrate_stored(stored).await
    }

    #[instrument(skip(self, filter), err)]
    pub async fn list_invoices(&self, filter: &InvoiceFilter) -> EngineResult<Vec<InvoiceDetails>> {
        let invoices = self.store.list_invoices(filter, None).await?;
        self.hydrate(invoices).await
    }

    #[instrument(skip(self), fields(invoice_id = %id), err)]
    pub async fn get_invoice(&self, id: InvoiceId) -> EngineResult<InvoiceDetails> {
        let invoice = self
            .store
            .get_invoice(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("invoice {id}")))?;
        let mut hydrated = self.hydrate(vec![invoice]).await?;
        hydrated
            .pop()
            .ok_or_else(|| EngineError::NotFound(format!("invoice {id}")))
    }

    /// Number the next creation would receive. Not a reservation.
    pub async fn next_invoice_number(&self) -> EngineResult<InvoiceNumber> {
        Ok(self.store.next_invoice_number().await?)
    }

    /// Canonical subtotal, discount and total for a prospective item set.
    /// Nothing is stored and no records are looked up.
    pub fn preview_totals(
        &self,
        items: &[NewInvoiceItem],
        discount_type: DiscountType,
        discount_value: Money,
    ) -> EngineResult<Totals> {
        validate_items(items)?;
        Ok(Totals::compute(items, discount_type, discount_value)?)
    }

    /// Attach customers, items and products to invoice headers, keeping order.
    pub(crate) async fn hydrate(&self, invoices: Vec<Invoice>) -> EngineResult<Vec<InvoiceDetails>> {
        if invoices.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<InvoiceId> = invoices.iter().map(|i| i.id).collect();
        let mut items_by_invoice: HashMap<InvoiceId, Vec<InvoiceItem>> = HashMap::new();
        for item in self.store.items_for_invoices(&ids).await? {
            items_by_invoice.entry(item.invoice_id).or_default().push(item);
        }

        let rows: Vec<(Invoice, Vec<InvoiceItem>)> = invoices
            .into_iter()
            .map(|invoice| {
                let items = items_by_invoice.remove(&invoice.id).unwrap_or_default();
                (invoice, items)
            })
            .collect();
        self.compose(rows).await
    }

    async fn hydrate_stored(&self, stored: StoredInvoice) -> EngineResult<InvoiceDetails> {
        let number = stored.invoice.invoice_number;
        self.compose(vec![(stored.invoice, stored.items)])
            .await?
            .pop()
            .ok_or_else(|| EngineError::NotFound(format!("invoice {number}")))
    }

    async fn compose(
        &self,
        rows: Vec<(Invoice, Vec<InvoiceItem>)>,
    ) -> EngineResult<Vec<InvoiceDetails>> {
        let customer_ids: Vec<CustomerId> = rows
            .iter()
            .map(|(invoice, _)| invoice.customer_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let product_ids: Vec<ProductId> = rows
            .iter()
            .flat_map(|(_, items)| items.iter().map(|i| i.product_id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let customers: HashMap<CustomerId, Customer> = self
            .store
            .customers_by_ids(&customer_ids)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let products: HashMap<ProductId, Product> = self
            .store
            .products_by_ids(&product_ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        Ok(rows
            .into_iter()
            .map(|(invoice, items)| InvoiceDetails {
                customer: customers.get(&invoice.customer_id).cloned(),
                items: items
                    .into_iter()
                    .map(|item| InvoiceItemDetails {
                        product: products.get(&item.product_id).cloned(),
                        item,
                    })
                    .collect(),
                invoice,
            })
            .collect())
    }

    async fn ensure_customer(&self, id: CustomerId) -> EngineResult<()> {
        match self.store.get_customer(id).await? {
            Some(_) => Ok(()),
            None => Err(EngineError::NotFound(format!("customer {id}"))),
        }
    }

    async fn ensure_products(&self, items: &[NewInvoiceItem]) -> EngineResult<()> {
        let wanted: BTreeSet<ProductId> = items.iter().map(|i| i.product_id).collect();
        if wanted.is_empty() {
            return Ok(());
        }
        let ids: Vec<ProductId> = wanted.iter().copied().collect();
        let found: BTreeSet<ProductId> = self
            .store
            .products_by_ids(&ids)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        match wanted.difference(&found).next() {
            Some(missing) => Err(EngineError::NotFound(format!("product {missing}"))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_field_keeps_its_field_name() {
        let err: EngineError = DomainError::invalid_field("total", "must equal subtotal").into();
        assert_eq!(
            err,
            EngineError::Validation {
                field: Some("total".to_string()),
                message: "must equal subtotal".to_string(),
            }
        );
    }

    #[test]
    fn rejected_store_errors_unwrap_to_domain_meaning() {
        let err: EngineError =
            StoreError::Rejected(DomainError::invariant("insufficient stock")).into();
        assert!(matches!(err, EngineError::InvariantViolation(_)));

        let err: EngineError = StoreError::Rejected(DomainError::not_found("pre-invoice 1001")).into();
        assert_eq!(err, EngineError::NotFound("pre-invoice 1001".to_string()));
    }

    #[test]
    fn backend_failures_become_storage_errors() {
        let err: EngineError = StoreError::Backend("connection reset".to_string()).into();
        assert!(matches!(err, EngineError::Storage(_)));
    }

    #[test]
    fn default_settings_allow_negative_stock_and_five_attempts() {
        let settings = EngineSettings::default();
        assert_eq!(settings.stock_policy, StockPolicy::AllowNegative);
        assert_eq!(settings.numbering_max_attempts, 5);
    }
}
