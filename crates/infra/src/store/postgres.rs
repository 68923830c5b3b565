//! Postgres-backed storage.
//!
//! Every mutating operation runs in one transaction. The invoice engine's
//! guarantees are enforced by the database rather than by in-process locks:
//!
//! - **Numbering**: the next number is derived inside the creating transaction
//!   from the `invoice_numbering` high-water mark and `MAX(invoice_number)`.
//!   Two racing creations can pick the same number; the `UNIQUE` constraint
//!   rejects the loser, which surfaces as `StoreError::Conflict` and is retried
//!   by the engine.
//! - **Stock**: quantities change only through
//!   `UPDATE products SET quantity = quantity + $delta`, never read-then-write.
//!   Movements are applied in product-id order so concurrent transactions lock
//!   rows in the same order.
//! - **Conversion / update**: the invoice row is locked with `FOR UPDATE`, so a
//!   pre-invoice cannot be converted (and its stock consumed) twice.
//!
//! ## Error Mapping
//!
//! | SQLx error | SQLSTATE | `StoreError` |
//! |------------|----------|--------------|
//! | unique violation | `23505` | `Conflict` |
//! | serialization failure / deadlock | `40001` / `40P01` | `Conflict` |
//! | foreign key violation | `23503` | `NotFound` |
//! | dashboard sum out of `BIGINT` range | `22003` | `Rejected` (invariant) |
//! | anything else | | `Backend` |

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use tapor_core::{CustomerId, DomainError, InvoiceId, InvoiceItemId, ProductId};
use tapor_customers::Customer;
use tapor_invoicing::{
    DiscountType, Invoice, InvoiceFilter, InvoiceItem, InvoiceKind, InvoiceNumber, InvoicePatch,
    InvoiceStatus, NewInvoiceItem, StockMovement, stock_decrements,
};
use tapor_products::{Product, StockPolicy};

use super::r#trait::{
    AnalyticsStore, CustomerStore, InvoiceStore, NewInvoiceRecord, ProductSales, ProductStore,
    SALES_TOTAL_OVERFLOW, SOLD_QUANTITY_OVERFLOW, SalesSummary, StoreError, StoreResult,
    StoredInvoice, aggregate_overflow,
};

const INVOICE_COLUMNS: &str = "id, invoice_number, customer_id, kind, subtotal, discount_type, \
     discount_value, discount_amount, total, status, created_at, updated_at";

const PRODUCT_COLUMNS: &str =
    "id, name, quantity, purchase_price, sale_price, description, created_at";

const CUSTOMER_COLUMNS: &str =
    "id, first_name, last_name, address, phone, national_id, notes, created_at";

/// Postgres-backed implementation of every store trait.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a connection pool.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        info!(max_connections, "connecting to PostgreSQL");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply pending schema migrations.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&*self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))?;
        info!("database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self, operation: &str) -> StoreResult<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

/// Commit on success, roll back on failure.
async fn finish<T>(
    tx: Transaction<'static, Postgres>,
    operation: &str,
    result: StoreResult<T>,
) -> StoreResult<T> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| map_sqlx_error(operation, e))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(operation, error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

#[async_trait::async_trait]
impl CustomerStore for PostgresStore {
    #[instrument(skip(self, customer), fields(customer_id = %customer.id), err)]
    async fn insert_customer(&self, customer: Customer) -> StoreResult<Customer> {
        sqlx::query(
            r#"
            INSERT INTO customers (id, first_name, last_name, address, phone, national_id, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(customer.id.as_uuid())
        .bind(&customer.first_name)
        .bind(&customer.last_name)
        .bind(&customer.address)
        .bind(&customer.phone)
        .bind(&customer.national_id)
        .bind(&customer.notes)
        .bind(customer.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_customer", e))?;
        Ok(customer)
    }

    #[instrument(skip(self), fields(customer_id = %id), err)]
    async fn get_customer(&self, id: CustomerId) -> StoreResult<Option<Customer>> {
        let row = sqlx::query(&format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_customer", e))?;
        row.as_ref().map(customer_from_row).transpose()
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn customers_by_ids(&self, ids: &[CustomerId]) -> StoreResult<Vec<Customer>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ANY($1)"
        ))
        .bind(&uuids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("customers_by_ids", e))?;
        rows.iter().map(customer_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn list_customers(&self, search: Option<&str>) -> StoreResult<Vec<Customer>> {
        let pattern = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CUSTOMER_COLUMNS} FROM customers
            WHERE $1::text IS NULL OR (first_name || ' ' || last_name) ILIKE $1
            ORDER BY first_name ASC, id ASC
            "#
        ))
        .bind(pattern)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_customers", e))?;
        rows.iter().map(customer_from_row).collect()
    }
}

#[async_trait::async_trait]
impl ProductStore for PostgresStore {
    #[instrument(skip(self, product), fields(product_id = %product.id), err)]
    async fn insert_product(&self, product: Product) -> StoreResult<Product> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, quantity, purchase_price, sale_price, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.quantity)
        .bind(product.purchase_price)
        .bind(product.sale_price)
        .bind(&product.description)
        .bind(product.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(product)
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn get_product(&self, id: ProductId) -> StoreResult<Option<Product>> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_product", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn products_by_ids(&self, ids: &[ProductId]) -> StoreResult<Vec<Product>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1)"
        ))
        .bind(&uuids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("products_by_ids", e))?;
        rows.iter().map(product_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn list_products(&self, search: Option<&str>) -> StoreResult<Vec<Product>> {
        let pattern = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS} FROM products
            WHERE $1::text IS NULL OR name ILIKE $1
            ORDER BY name ASC, id ASC
            "#
        ))
        .bind(pattern)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_products", e))?;
        rows.iter().map(product_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn low_stock_products(&self, threshold: i64) -> StoreResult<Vec<Product>> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE quantity < $1 ORDER BY quantity ASC, name ASC"
        ))
        .bind(threshold)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("low_stock_products", e))?;
        rows.iter().map(product_from_row).collect()
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn adjust_quantity(
        &self,
        id: ProductId,
        delta: i64,
        policy: StockPolicy,
    ) -> StoreResult<i64> {
        let mut tx = self.begin("adjust_quantity").await?;
        let result = apply_movement(&mut tx, StockMovement { product_id: id, delta }, policy).await;
        finish(tx, "adjust_quantity", result).await
    }
}

#[async_trait::async_trait]
impl InvoiceStore for PostgresStore {
    #[instrument(skip(self), err)]
    async fn next_invoice_number(&self) -> StoreResult<InvoiceNumber> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("next_invoice_number", e))?;
        allocate_number(&mut *conn).await
    }

    #[instrument(
        skip(self, record),
        fields(invoice_id = %record.id, kind = record.draft.kind.as_str(), items = record.items.len()),
        err
    )]
    async fn create_invoice(
        &self,
        record: NewInvoiceRecord,
        policy: StockPolicy,
    ) -> StoreResult<StoredInvoice> {
        let mut tx = self.begin("create_invoice").await?;
        let result = create_in_tx(&mut tx, record, policy).await;
        finish(tx, "create_invoice", result).await
    }

    #[instrument(skip(self, patch, items), fields(invoice_id = %id, replace_items = items.is_some()), err)]
    async fn update_invoice(
        &self,
        id: InvoiceId,
        patch: &InvoicePatch,
        items: Option<&[NewInvoiceItem]>,
        now: DateTime<Utc>,
    ) -> StoreResult<StoredInvoice> {
        let mut tx = self.begin("update_invoice").await?;
        let result = update_in_tx(&mut tx, id, patch, items, now).await;
        finish(tx, "update_invoice", result).await
    }

    #[instrument(skip(self), fields(invoice_id = %id), err)]
    async fn delete_invoice(&self, id: InvoiceId) -> StoreResult<bool> {
        let mut tx = self.begin("delete_invoice").await?;
        let result = delete_in_tx(&mut tx, id).await;
        finish(tx, "delete_invoice", result).await
    }

    #[instrument(skip(self), fields(invoice_id = %id), err)]
    async fn convert_pre_invoice(
        &self,
        id: InvoiceId,
        now: DateTime<Utc>,
        policy: StockPolicy,
    ) -> StoreResult<StoredInvoice> {
        let mut tx = self.begin("convert_pre_invoice").await?;
        let result = convert_in_tx(&mut tx, id, now, policy).await;
        finish(tx, "convert_pre_invoice", result).await
    }

    #[instrument(skip(self), fields(invoice_id = %id), err)]
    async fn get_invoice(&self, id: InvoiceId) -> StoreResult<Option<Invoice>> {
        let row = sqlx::query(&format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_invoice", e))?;
        row.as_ref().map(invoice_from_row).transpose()
    }

    #[instrument(skip(self, filter), err)]
    async fn list_invoices(
        &self,
        filter: &InvoiceFilter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Invoice>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE TRUE"));

        if let Some(kind) = filter.kind {
            qb.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(customer_id) = filter.customer_id {
            qb.push(" AND customer_id = ").push_bind(*customer_id.as_uuid());
        }
        if let Some(start) = filter.start_date {
            qb.push(" AND created_at >= ").push_bind(start);
        }
        if let Some(end) = filter.end_date {
            qb.push(" AND created_at <= ").push_bind(end);
        }
        if let Some(term) = filter.search_term() {
            qb.push(" AND invoice_number::text LIKE ")
                .push_bind(like_pattern(term));
        }
        qb.push(" ORDER BY created_at DESC, invoice_number DESC");
        if let Some(limit) = limit {
            qb.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_invoices", e))?;
        rows.iter().map(invoice_from_row).collect()
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn items_for_invoices(&self, ids: &[InvoiceId]) -> StoreResult<Vec<InvoiceItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, invoice_id, product_id, quantity, price, total
            FROM invoice_items
            WHERE invoice_id = ANY($1)
            ORDER BY invoice_id, position
            "#,
        )
        .bind(&uuids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("items_for_invoices", e))?;
        rows.iter().map(item_from_row).collect()
    }
}

#[async_trait::async_trait]
impl AnalyticsStore for PostgresStore {
    #[instrument(skip(self), err)]
    async fn sales_summary(
        &self,
        from: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> StoreResult<SalesSummary> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(total), 0)::BIGINT AS total, COUNT(*) AS count
            FROM invoices
            WHERE kind = 'invoice'
              AND created_at >= $1
              AND ($2::timestamptz IS NULL OR created_at < $2)
            "#,
        )
        .bind(from)
        .bind(until)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_aggregate_error("sales_summary", SALES_TOTAL_OVERFLOW, e))?;

        let total: i64 = row.try_get("total").map_err(decode_error)?;
        let count: i64 = row.try_get("count").map_err(decode_error)?;
        Ok(SalesSummary {
            total,
            count: u64::try_from(count).unwrap_or_default(),
        })
    }

    #[instrument(skip(self), err)]
    async fn count_low_stock(&self, threshold: i64) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE quantity < $1")
            .bind(threshold)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_low_stock", e))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    #[instrument(skip(self), err)]
    async fn top_products(&self, limit: usize) -> StoreResult<Vec<ProductSales>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.name, p.quantity, p.purchase_price, p.sale_price, p.description, p.created_at,
                   COALESCE(s.sold, 0)::BIGINT AS sold_quantity
            FROM products p
            LEFT JOIN (
                SELECT ii.product_id, SUM(ii.quantity) AS sold
                FROM invoice_items ii
                JOIN invoices i ON i.id = ii.invoice_id
                WHERE i.kind = 'invoice'
                GROUP BY ii.product_id
            ) s ON s.product_id = p.id
            ORDER BY sold_quantity DESC, p.name ASC, p.id ASC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_aggregate_error("top_products", SOLD_QUANTITY_OVERFLOW, e))?;

        rows.iter()
            .map(|row| {
                Ok(ProductSales {
                    product: product_from_row(row)?,
                    sold_quantity: row.try_get("sold_quantity").map_err(decode_error)?,
                })
            })
            .collect()
    }
}

// Transaction bodies

async fn allocate_number(conn: &mut sqlx::PgConnection) -> StoreResult<InvoiceNumber> {
    let row = sqlx::query(
        r#"
        SELECT
            (SELECT last_number FROM invoice_numbering WHERE id = 1) AS watermark,
            (SELECT MAX(invoice_number) FROM invoices) AS max_existing
        "#,
    )
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("allocate_number", e))?;

    let watermark: Option<i64> = row.try_get("watermark").map_err(decode_error)?;
    let max_existing: Option<i64> = row.try_get("max_existing").map_err(decode_error)?;

    Ok(InvoiceNumber::allocate(
        watermark.map(InvoiceNumber::new),
        max_existing.map(InvoiceNumber::new),
    )?)
}

async fn create_in_tx(
    tx: &mut Transaction<'static, Postgres>,
    record: NewInvoiceRecord,
    policy: StockPolicy,
) -> StoreResult<StoredInvoice> {
    let number = allocate_number(&mut **tx).await?;
    let invoice = Invoice::from_draft(record.id, number, &record.draft, record.created_at);

    sqlx::query(
        r#"
        INSERT INTO invoices (
            id, invoice_number, customer_id, kind, subtotal, discount_type,
            discount_value, discount_amount, total, status, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(invoice.id.as_uuid())
    .bind(invoice.invoice_number.value())
    .bind(invoice.customer_id.as_uuid())
    .bind(invoice.kind.as_str())
    .bind(invoice.subtotal)
    .bind(invoice.discount_type.as_str())
    .bind(invoice.discount_value)
    .bind(invoice.discount_amount)
    .bind(invoice.total)
    .bind(invoice.status.as_str())
    .bind(invoice.created_at)
    .bind(invoice.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            StoreError::Conflict(format!("invoice number {number} already taken"))
        } else {
            map_sqlx_error("insert_invoice", e)
        }
    })?;

    sqlx::query("UPDATE invoice_numbering SET last_number = GREATEST(last_number, $1) WHERE id = 1")
        .bind(number.value())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("bump_numbering", e))?;

    let items = insert_items(tx, invoice.id, &record.items).await?;

    if invoice.kind.consumes_stock() {
        let moves = stock_decrements(items.iter().map(|i| (i.product_id, i.quantity)));
        for movement in moves {
            apply_movement(tx, movement, policy).await?;
        }
    }

    Ok(StoredInvoice { invoice, items })
}

async fn update_in_tx(
    tx: &mut Transaction<'static, Postgres>,
    id: InvoiceId,
    patch: &InvoicePatch,
    items: Option<&[NewInvoiceItem]>,
    now: DateTime<Utc>,
) -> StoreResult<StoredInvoice> {
    let mut invoice = lock_invoice(tx, id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("invoice {id}")))?;
    invoice.apply_patch(patch, now)?;

    sqlx::query(
        r#"
        UPDATE invoices
        SET customer_id = $2,
            subtotal = $3,
            discount_type = $4,
            discount_value = $5,
            discount_amount = $6,
            total = $7,
            updated_at = $8
        WHERE id = $1
        "#,
    )
    .bind(invoice.id.as_uuid())
    .bind(invoice.customer_id.as_uuid())
    .bind(invoice.subtotal)
    .bind(invoice.discount_type.as_str())
    .bind(invoice.discount_value)
    .bind(invoice.discount_amount)
    .bind(invoice.total)
    .bind(invoice.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_invoice", e))?;

    let items = match items {
        Some(replacement) => {
            sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
                .bind(id.as_uuid())
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("delete_items", e))?;
            insert_items(tx, id, replacement).await?
        }
        None => load_items(tx, id).await?,
    };

    Ok(StoredInvoice { invoice, items })
}

async fn delete_in_tx(tx: &mut Transaction<'static, Postgres>, id: InvoiceId) -> StoreResult<bool> {
    sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
        .bind(id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("delete_items", e))?;

    let result = sqlx::query("DELETE FROM invoices WHERE id = $1")
        .bind(id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("delete_invoice", e))?;

    Ok(result.rows_affected() > 0)
}

async fn convert_in_tx(
    tx: &mut Transaction<'static, Postgres>,
    id: InvoiceId,
    now: DateTime<Utc>,
    policy: StockPolicy,
) -> StoreResult<StoredInvoice> {
    let mut invoice = lock_invoice(tx, id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("pre-invoice {id}")))?;
    invoice.convert(now)?;

    sqlx::query("UPDATE invoices SET kind = $2, status = $3, updated_at = $4 WHERE id = $1")
        .bind(invoice.id.as_uuid())
        .bind(invoice.kind.as_str())
        .bind(invoice.status.as_str())
        .bind(invoice.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("convert_invoice", e))?;

    let items = load_items(tx, id).await?;
    let moves = stock_decrements(items.iter().map(|i| (i.product_id, i.quantity)));
    for movement in moves {
        apply_movement(tx, movement, policy).await?;
    }

    Ok(StoredInvoice { invoice, items })
}

async fn lock_invoice(
    tx: &mut Transaction<'static, Postgres>,
    id: InvoiceId,
) -> StoreResult<Option<Invoice>> {
    let row = sqlx::query(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1 FOR UPDATE"
    ))
    .bind(id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_invoice", e))?;
    row.as_ref().map(invoice_from_row).transpose()
}

async fn insert_items(
    tx: &mut Transaction<'static, Postgres>,
    invoice_id: InvoiceId,
    items: &[NewInvoiceItem],
) -> StoreResult<Vec<InvoiceItem>> {
    let mut stored = Vec::with_capacity(items.len());
    for (position, input) in items.iter().enumerate() {
        let item = InvoiceItem::from_new(InvoiceItemId::new(), invoice_id, input);
        sqlx::query(
            r#"
            INSERT INTO invoice_items (id, invoice_id, product_id, position, quantity, price, total)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(item.invoice_id.as_uuid())
        .bind(item.product_id.as_uuid())
        .bind(i32::try_from(position).unwrap_or(i32::MAX))
        .bind(item.quantity)
        .bind(item.price)
        .bind(item.total)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_item", e))?;
        stored.push(item);
    }
    Ok(stored)
}

async fn load_items(
    tx: &mut Transaction<'static, Postgres>,
    invoice_id: InvoiceId,
) -> StoreResult<Vec<InvoiceItem>> {
    let rows = sqlx::query(
        r#"
        SELECT id, invoice_id, product_id, quantity, price, total
        FROM invoice_items
        WHERE invoice_id = $1
        ORDER BY position
        "#,
    )
    .bind(invoice_id.as_uuid())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("load_items", e))?;
    rows.iter().map(item_from_row).collect()
}

/// Single-statement stock change guarded by the oversell policy.
async fn apply_movement(
    tx: &mut Transaction<'static, Postgres>,
    movement: StockMovement,
    policy: StockPolicy,
) -> StoreResult<i64> {
    let updated: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE products
        SET quantity = quantity + $2
        WHERE id = $1 AND (NOT $3 OR quantity + $2 >= 0)
        RETURNING quantity
        "#,
    )
    .bind(movement.product_id.as_uuid())
    .bind(movement.delta)
    .bind(policy.rejects_negative())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("adjust_quantity", e))?;

    if let Some(quantity) = updated {
        return Ok(quantity);
    }

    // No row updated: either the product is missing or the guard refused it.
    let current: Option<i64> = sqlx::query_scalar("SELECT quantity FROM products WHERE id = $1")
        .bind(movement.product_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("adjust_quantity", e))?;

    match current {
        None => Err(StoreError::NotFound(format!("product {}", movement.product_id))),
        Some(quantity) => Err(StoreError::Rejected(
            policy
                .apply(movement.product_id, quantity, movement.delta)
                .err()
                .unwrap_or_else(|| {
                    DomainError::invariant(format!(
                        "stock adjustment refused for product {}",
                        movement.product_id
                    ))
                }),
        )),
    }
}

// Row decoding

fn customer_from_row(row: &PgRow) -> StoreResult<Customer> {
    Ok(Customer {
        id: CustomerId::from_uuid(row.try_get("id").map_err(decode_error)?),
        first_name: row.try_get("first_name").map_err(decode_error)?,
        last_name: row.try_get("last_name").map_err(decode_error)?,
        address: row.try_get("address").map_err(decode_error)?,
        phone: row.try_get("phone").map_err(decode_error)?,
        national_id: row.try_get("national_id").map_err(decode_error)?,
        notes: row.try_get("notes").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn product_from_row(row: &PgRow) -> StoreResult<Product> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get("id").map_err(decode_error)?),
        name: row.try_get("name").map_err(decode_error)?,
        quantity: row.try_get("quantity").map_err(decode_error)?,
        purchase_price: row.try_get("purchase_price").map_err(decode_error)?,
        sale_price: row.try_get("sale_price").map_err(decode_error)?,
        description: row.try_get("description").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn invoice_from_row(row: &PgRow) -> StoreResult<Invoice> {
    let kind: String = row.try_get("kind").map_err(decode_error)?;
    let discount_type: String = row.try_get("discount_type").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;

    Ok(Invoice {
        id: InvoiceId::from_uuid(row.try_get("id").map_err(decode_error)?),
        invoice_number: InvoiceNumber::new(row.try_get("invoice_number").map_err(decode_error)?),
        customer_id: CustomerId::from_uuid(row.try_get("customer_id").map_err(decode_error)?),
        kind: InvoiceKind::parse(&kind).map_err(corrupt_row)?,
        subtotal: row.try_get("subtotal").map_err(decode_error)?,
        discount_type: DiscountType::parse(&discount_type).map_err(corrupt_row)?,
        discount_value: row.try_get("discount_value").map_err(decode_error)?,
        discount_amount: row.try_get("discount_amount").map_err(decode_error)?,
        total: row.try_get("total").map_err(decode_error)?,
        status: InvoiceStatus::parse(&status).map_err(corrupt_row)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
    })
}

fn item_from_row(row: &PgRow) -> StoreResult<InvoiceItem> {
    Ok(InvoiceItem {
        id: InvoiceItemId::from_uuid(row.try_get("id").map_err(decode_error)?),
        invoice_id: InvoiceId::from_uuid(row.try_get("invoice_id").map_err(decode_error)?),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(decode_error)?),
        quantity: row.try_get("quantity").map_err(decode_error)?,
        price: row.try_get("price").map_err(decode_error)?,
        total: row.try_get("total").map_err(decode_error)?,
    })
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode row: {err}"))
}

fn corrupt_row(err: DomainError) -> StoreError {
    StoreError::Backend(format!("corrupt row: {err}"))
}

/// `%term%` with LIKE metacharacters escaped.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Map SQLx errors to store errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                Some("23503") => StoreError::NotFound(format!("record referenced by {operation}")),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("{operation}: {other}")),
    }
}

/// Like `map_sqlx_error`, but a `BIGINT` cast that overflows (`22003`) is the
/// same invariant failure the in-memory backend reports.
fn map_aggregate_error(operation: &str, overflow: &str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("22003") {
            return aggregate_overflow(overflow);
        }
    }
    map_sqlx_error(operation, err)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("10"), "%10%");
        assert_eq!(like_pattern("5%_"), "%5\\%\\_%");
    }

    #[test]
    fn pool_closed_is_a_backend_error() {
        let err = map_sqlx_error("get_invoice", sqlx::Error::PoolClosed);
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
