use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
#[cfg(test)]
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};

use tapor_core::{CustomerId, InvoiceId, InvoiceItemId, ProductId};
use tapor_customers::Customer;
use tapor_invoicing::{
    Invoice, InvoiceFilter, InvoiceItem, InvoiceKind, InvoiceNumber, InvoicePatch, NewInvoiceItem,
    StockMovement, stock_decrements,
};
use tapor_products::{Product, StockPolicy};

use super::r#trait::{
    AnalyticsStore, CustomerStore, InvoiceStore, NewInvoiceRecord, ProductSales, ProductStore,
    SALES_TOTAL_OVERFLOW, SOLD_QUANTITY_OVERFLOW, SalesSummary, StoreError, StoreResult,
    StoredInvoice, aggregate_overflow,
};

#[derive(Debug, Default)]
struct State {
    customers: HashMap<CustomerId, Customer>,
    products: HashMap<ProductId, Product>,
    invoices: HashMap<InvoiceId, Invoice>,
    items: HashMap<InvoiceId, Vec<InvoiceItem>>,
    /// Highest number ever issued, including deleted invoices.
    number_watermark: Option<InvoiceNumber>,
}

impl State {
    fn allocate_number(&self) -> StoreResult<InvoiceNumber> {
        let max_existing = self.invoices.values().map(|i| i.invoice_number).max();
        Ok(InvoiceNumber::allocate(self.number_watermark, max_existing)?)
    }

    fn ensure_customer(&self, id: CustomerId) -> StoreResult<()> {
        if self.customers.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("customer {id}")))
        }
    }

    fn ensure_products(&self, items: &[NewInvoiceItem]) -> StoreResult<()> {
        match items.iter().find(|i| !self.products.contains_key(&i.product_id)) {
            Some(missing) => Err(StoreError::NotFound(format!("product {}", missing.product_id))),
            None => Ok(()),
        }
    }

    /// Resolve the quantities stock movements would produce without applying them.
    fn plan_stock(
        &self,
        moves: &[StockMovement],
        policy: StockPolicy,
    ) -> StoreResult<Vec<(ProductId, i64)>> {
        moves
            .iter()
            .map(|m| {
                let product = self
                    .products
                    .get(&m.product_id)
                    .ok_or_else(|| StoreError::NotFound(format!("product {}", m.product_id)))?;
                let next = policy.apply(m.product_id, product.quantity, m.delta)?;
                Ok((m.product_id, next))
            })
            .collect()
    }

    fn commit_stock(&mut self, planned: Vec<(ProductId, i64)>) {
        for (product_id, quantity) in planned {
            if let Some(product) = self.products.get_mut(&product_id) {
                product.quantity = quantity;
            }
        }
    }

    fn stored(&self, invoice: &Invoice) -> StoredInvoice {
        StoredInvoice {
            invoice: invoice.clone(),
            items: self.items.get(&invoice.id).cloned().unwrap_or_default(),
        }
    }
}

fn build_items(invoice_id: InvoiceId, items: &[NewInvoiceItem]) -> Vec<InvoiceItem> {
    items
        .iter()
        .map(|i| InvoiceItem::from_new(InvoiceItemId::new(), invoice_id, i))
        .collect()
}

fn newest_first(a: &Invoice, b: &Invoice) -> std::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.invoice_number.cmp(&a.invoice_number))
}

/// In-memory backend holding every collection behind one lock.
///
/// Intended for tests/dev. Each operation runs under a single write guard,
/// which gives it the same all-or-nothing behaviour as a database transaction.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    #[cfg(test)]
    forced_conflicts: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    /// Make the next `n` creations fail as if another writer took their number.
    #[cfg(test)]
    pub(crate) fn fail_next_creations(&self, n: u32) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn take_forced_conflict(&self) -> bool {
        self.forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[cfg(not(test))]
    fn take_forced_conflict(&self) -> bool {
        false
    }
}

#[async_trait::async_trait]
impl CustomerStore for InMemoryStore {
    async fn insert_customer(&self, customer: Customer) -> StoreResult<Customer> {
        let mut state = self.write()?;
        if state.customers.contains_key(&customer.id) {
            return Err(StoreError::Conflict(format!("customer {} already exists", customer.id)));
        }
        state.customers.insert(customer.id, customer.clone());
        Ok(customer)
    }

    async fn get_customer(&self, id: CustomerId) -> StoreResult<Option<Customer>> {
        Ok(self.read()?.customers.get(&id).cloned())
    }

    async fn customers_by_ids(&self, ids: &[CustomerId]) -> StoreResult<Vec<Customer>> {
        let state = self.read()?;
        Ok(ids.iter().filter_map(|id| state.customers.get(id).cloned()).collect())
    }

    async fn list_customers(&self, search: Option<&str>) -> StoreResult<Vec<Customer>> {
        let state = self.read()?;
        let mut out: Vec<Customer> = state
            .customers
            .values()
            .filter(|c| search.is_none_or(|s| c.matches_search(s)))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.first_name.cmp(&b.first_name).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }
}

#[async_trait::async_trait]
impl ProductStore for InMemoryStore {
    async fn insert_product(&self, product: Product) -> StoreResult<Product> {
        let mut state = self.write()?;
        if state.products.contains_key(&product.id) {
            return Err(StoreError::Conflict(format!("product {} already exists", product.id)));
        }
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn get_product(&self, id: ProductId) -> StoreResult<Option<Product>> {
        Ok(self.read()?.products.get(&id).cloned())
    }

    async fn products_by_ids(&self, ids: &[ProductId]) -> StoreResult<Vec<Product>> {
        let state = self.read()?;
        Ok(ids.iter().filter_map(|id| state.products.get(id).cloned()).collect())
    }

    async fn list_products(&self, search: Option<&str>) -> StoreResult<Vec<Product>> {
        let state = self.read()?;
        let mut out: Vec<Product> = state
            .products
            .values()
            .filter(|p| search.is_none_or(|s| p.matches_search(s)))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn low_stock_products(&self, threshold: i64) -> StoreResult<Vec<Product>> {
        let state = self.read()?;
        let mut out: Vec<Product> = state
            .products
            .values()
            .filter(|p| p.quantity < threshold)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.quantity.cmp(&b.quantity).then_with(|| a.name.cmp(&b.name)));
        Ok(out)
    }

    async fn adjust_quantity(
        &self,
        id: ProductId,
        delta: i64,
        policy: StockPolicy,
    ) -> StoreResult<i64> {
        let mut state = self.write()?;
        let planned = state.plan_stock(&[StockMovement { product_id: id, delta }], policy)?;
        let quantity = planned.first().map(|(_, q)| *q).unwrap_or_default();
        state.commit_stock(planned);
        Ok(quantity)
    }
}

#[async_trait::async_trait]
impl InvoiceStore for InMemoryStore {
    async fn next_invoice_number(&self) -> StoreResult<InvoiceNumber> {
        self.read()?.allocate_number()
    }

    async fn create_invoice(
        &self,
        record: NewInvoiceRecord,
        policy: StockPolicy,
    ) -> StoreResult<StoredInvoice> {
        let mut state = self.write()?;

        if self.take_forced_conflict() {
            return Err(StoreError::Conflict("invoice number already taken".to_string()));
        }

        state.ensure_customer(record.draft.customer_id)?;
        state.ensure_products(&record.items)?;

        let number = state.allocate_number()?;
        if state.invoices.values().any(|i| i.invoice_number == number) {
            return Err(StoreError::Conflict(format!("invoice number {number} already taken")));
        }

        let planned = if record.draft.kind.consumes_stock() {
            let moves = stock_decrements(record.items.iter().map(|i| (i.product_id, i.quantity)));
            state.plan_stock(&moves, policy)?
        } else {
            Vec::new()
        };

        let invoice = Invoice::from_draft(record.id, number, &record.draft, record.created_at);
        let items = build_items(invoice.id, &record.items);

        state.commit_stock(planned);
        state.number_watermark = Some(number).max(state.number_watermark);
        state.invoices.insert(invoice.id, invoice.clone());
        state.items.insert(invoice.id, items.clone());

        Ok(StoredInvoice { invoice, items })
    }

    async fn update_invoice(
        &self,
        id: InvoiceId,
        patch: &InvoicePatch,
        items: Option<&[NewInvoiceItem]>,
        now: DateTime<Utc>,
    ) -> StoreResult<StoredInvoice> {
        let mut state = self.write()?;

        let mut invoice = state
            .invoices
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("invoice {id}")))?;
        invoice.apply_patch(patch, now)?;
        state.ensure_customer(invoice.customer_id)?;
        if let Some(items) = items {
            state.ensure_products(items)?;
        }

        if let Some(items) = items {
            state.items.insert(id, build_items(id, items));
        }
        state.invoices.insert(id, invoice.clone());

        Ok(state.stored(&invoice))
    }

    async fn delete_invoice(&self, id: InvoiceId) -> StoreResult<bool> {
        let mut state = self.write()?;
        state.items.remove(&id);
        Ok(state.invoices.remove(&id).is_some())
    }

    async fn convert_pre_invoice(
        &self,
        id: InvoiceId,
        now: DateTime<Utc>,
        policy: StockPolicy,
    ) -> StoreResult<StoredInvoice> {
        let mut state = self.write()?;

        let mut invoice = state
            .invoices
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("pre-invoice {id}")))?;
        invoice.convert(now)?;

        let moves = stock_decrements(
            state
                .items
                .get(&id)
                .into_iter()
                .flatten()
                .map(|i| (i.product_id, i.quantity)),
        );
        let planned = state.plan_stock(&moves, policy)?;

        state.commit_stock(planned);
        state.invoices.insert(id, invoice.clone());

        Ok(state.stored(&invoice))
    }

    async fn get_invoice(&self, id: InvoiceId) -> StoreResult<Option<Invoice>> {
        Ok(self.read()?.invoices.get(&id).cloned())
    }

    async fn list_invoices(
        &self,
        filter: &InvoiceFilter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Invoice>> {
        let state = self.read()?;
        let mut out: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        out.sort_by(newest_first);
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn items_for_invoices(&self, ids: &[InvoiceId]) -> StoreResult<Vec<InvoiceItem>> {
        let state = self.read()?;
        let mut seen = HashSet::new();
        Ok(ids
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| state.items.get(id))
            .flatten()
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl AnalyticsStore for InMemoryStore {
    async fn sales_summary(
        &self,
        from: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> StoreResult<SalesSummary> {
        let state = self.read()?;
        state
            .invoices
            .values()
            .filter(|i| i.kind == InvoiceKind::Invoice)
            .filter(|i| i.created_at >= from && until.is_none_or(|u| i.created_at < u))
            .try_fold(SalesSummary::default(), |acc, i| -> StoreResult<SalesSummary> {
                Ok(SalesSummary {
                    total: acc
                        .total
                        .checked_add(i.total)
                        .ok_or_else(|| aggregate_overflow(SALES_TOTAL_OVERFLOW))?,
                    count: acc.count + 1,
                })
            })
    }

    async fn count_low_stock(&self, threshold: i64) -> StoreResult<u64> {
        let state = self.read()?;
        Ok(state.products.values().filter(|p| p.quantity < threshold).count() as u64)
    }

    async fn top_products(&self, limit: usize) -> StoreResult<Vec<ProductSales>> {
        let state = self.read()?;

        let mut sold: HashMap<ProductId, i64> = HashMap::new();
        for invoice in state.invoices.values().filter(|i| i.kind == InvoiceKind::Invoice) {
            for item in state.items.get(&invoice.id).into_iter().flatten() {
                let total = sold.entry(item.product_id).or_insert(0);
                *total = total
                    .checked_add(item.quantity)
                    .ok_or_else(|| aggregate_overflow(SOLD_QUANTITY_OVERFLOW))?;
            }
        }

        let mut ranked: Vec<ProductSales> = state
            .products
            .values()
            .map(|p| ProductSales {
                product: p.clone(),
                sold_quantity: sold.get(&p.id).copied().unwrap_or(0),
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.sold_quantity
                .cmp(&a.sold_quantity)
                .then_with(|| a.product.name.cmp(&b.product.name))
                .then_with(|| a.product.id.cmp(&b.product.id))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapor_core::DomainError;
    use tapor_customers::NewCustomer;
    use tapor_invoicing::{DiscountType, InvoiceDraft, InvoiceStatus};
    use tapor_products::NewProduct;

    async fn seed(store: &InMemoryStore, quantity: i64) -> (CustomerId, ProductId) {
        let customer = Customer::from_new(
            CustomerId::new(),
            NewCustomer {
                first_name: "Ali".to_string(),
                last_name: "Rezaei".to_string(),
                ..NewCustomer::default()
            },
            Utc::now(),
        );
        let product = Product::from_new(
            ProductId::new(),
            NewProduct {
                name: "Bolt".to_string(),
                quantity,
                purchase_price: None,
                sale_price: 100,
                description: None,
            },
            Utc::now(),
        );
        let c = store.insert_customer(customer).await.unwrap().id;
        let p = store.insert_product(product).await.unwrap().id;
        (c, p)
    }

    fn record(customer_id: CustomerId, kind: InvoiceKind, product_id: ProductId, qty: i64) -> NewInvoiceRecord {
        let items = vec![NewInvoiceItem::new(product_id, qty, 100)];
        let subtotal = qty * 100;
        NewInvoiceRecord {
            id: InvoiceId::new(),
            draft: InvoiceDraft {
                customer_id,
                kind,
                subtotal,
                discount_type: DiscountType::Percent,
                discount_value: 0,
                discount_amount: 0,
                total: subtotal,
            },
            items,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn adjust_quantity_is_plain_arithmetic() {
        let store = InMemoryStore::new();
        let (_, p) = seed(&store, 3).await;
        let q = store.adjust_quantity(p, -5, StockPolicy::AllowNegative).await.unwrap();
        assert_eq!(q, -2);
        let q = store.adjust_quantity(p, 4, StockPolicy::AllowNegative).await.unwrap();
        assert_eq!(q, 2);
    }

    #[tokio::test]
    async fn adjust_unknown_product_is_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .adjust_quantity(ProductId::new(), -1, StockPolicy::AllowNegative)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn rejected_oversell_rolls_back_the_whole_creation() {
        let store = InMemoryStore::new();
        let (c, p) = seed(&store, 1).await;

        let err = store
            .create_invoice(record(c, InvoiceKind::Invoice, p, 2), StockPolicy::Reject)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Rejected(DomainError::InvariantViolation(_))));
        assert_eq!(store.get_product(p).await.unwrap().unwrap().quantity, 1);
        assert!(store.list_invoices(&InvoiceFilter::default(), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleted_numbers_are_not_reissued() {
        let store = InMemoryStore::new();
        let (c, p) = seed(&store, 10).await;

        let first = store
            .create_invoice(record(c, InvoiceKind::PreInvoice, p, 1), StockPolicy::AllowNegative)
            .await
            .unwrap();
        assert_eq!(first.invoice.invoice_number.value(), 1001);
        assert!(store.delete_invoice(first.invoice.id).await.unwrap());

        assert_eq!(store.next_invoice_number().await.unwrap().value(), 1002);
    }

    #[tokio::test]
    async fn conversion_keeps_number_and_consumes_stock() {
        let store = InMemoryStore::new();
        let (c, p) = seed(&store, 10).await;
        let created = store
            .create_invoice(record(c, InvoiceKind::PreInvoice, p, 4), StockPolicy::AllowNegative)
            .await
            .unwrap();

        let converted = store
            .convert_pre_invoice(created.invoice.id, Utc::now(), StockPolicy::AllowNegative)
            .await
            .unwrap();

        assert_eq!(converted.invoice.invoice_number, created.invoice.invoice_number);
        assert_eq!(converted.invoice.status, InvoiceStatus::Final);
        assert_eq!(store.get_product(p).await.unwrap().unwrap().quantity, 6);
    }

    #[tokio::test]
    async fn items_for_invoices_preserves_insertion_order() {
        let store = InMemoryStore::new();
        let (c, p) = seed(&store, 10).await;
        let (_, p2) = seed(&store, 10).await;
        let mut rec = record(c, InvoiceKind::PreInvoice, p, 1);
        rec.items.push(NewInvoiceItem::new(p2, 2, 100));
        rec.draft.subtotal = 300;
        rec.draft.total = 300;
        let created = store.create_invoice(rec, StockPolicy::AllowNegative).await.unwrap();

        let items = store.items_for_invoices(&[created.invoice.id]).await.unwrap();
        assert_eq!(items.iter().map(|i| i.product_id).collect::<Vec<_>>(), vec![p, p2]);
    }
}
