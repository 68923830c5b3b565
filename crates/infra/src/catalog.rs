//! Customer and product registration/lookup used by invoicing.
//!
//! Only the operations invoices depend on: add a record, fetch one, search,
//! and the low-stock listing. Records are never updated or removed here.

use std::sync::Arc;

use tracing::{info, instrument};

use tapor_core::{Clock, CustomerId, ProductId, SystemClock};
use tapor_customers::{Customer, NewCustomer};
use tapor_products::{LOW_STOCK_THRESHOLD, NewProduct, Product};

use crate::engine::{EngineError, EngineResult};
use crate::store::Storage;

pub struct Catalog<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: ?Sized> Clone for Catalog<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: ?Sized> Catalog<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn with_store(store: Arc<S>) -> Self {
        Self::new(store, Arc::new(SystemClock))
    }
}

impl<S: Storage + ?Sized> Catalog<S> {
    #[instrument(skip(self, input), err)]
    pub async fn register_customer(&self, input: NewCustomer) -> EngineResult<Customer> {
        input.validate()?;
        let customer = Customer::from_new(CustomerId::new(), input, self.clock.now());
        let customer = self.store.insert_customer(customer).await?;
        info!(customer_id = %customer.id, "customer registered");
        Ok(customer)
    }

    pub async fn get_customer(&self, id: CustomerId) -> EngineResult<Customer> {
        self.store
            .get_customer(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("customer {id}")))
    }

    pub async fn list_customers(&self, search: Option<&str>) -> EngineResult<Vec<Customer>> {
        Ok(self.store.list_customers(search).await?)
    }

    #[instrument(skip(self, input), err)]
    pub async fn add_product(&self, input: NewProduct) -> EngineResult<Product> {
        input.validate()?;
        let product = Product::from_new(ProductId::new(), input, self.clock.now());
        let product = self.store.insert_product(product).await?;
        info!(product_id = %product.id, quantity = product.quantity, "product added");
        Ok(product)
    }

    pub async fn get_product(&self, id: ProductId) -> EngineResult<Product> {
        self.store
            .get_product(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("product {id}")))
    }

    pub async fn list_products(&self, search: Option<&str>) -> EngineResult<Vec<Product>> {
        Ok(self.store.list_products(search).await?)
    }

    /// Products with fewer than `LOW_STOCK_THRESHOLD` units, lowest first.
    pub async fn low_stock_products(&self) -> EngineResult<Vec<Product>> {
        Ok(self.store.low_stock_products(LOW_STOCK_THRESHOLD).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn catalog() -> Catalog<InMemoryStore> {
        Catalog::with_store(Arc::new(InMemoryStore::new()))
    }

    fn customer(first: &str, last: &str) -> NewCustomer {
        NewCustomer {
            first_name: first.to_string(),
            last_name: last.to_string(),
            ..NewCustomer::default()
        }
    }

    fn product(name: &str, quantity: i64) -> NewProduct {
        NewProduct {
            name: name.to_string(),
            quantity,
            sale_price: 1_000,
            ..NewProduct::default()
        }
    }

    #[tokio::test]
    async fn registered_customer_can_be_fetched_and_searched() {
        let catalog = catalog();
        let sara = catalog.register_customer(customer("Sara", "Ahmadi")).await.unwrap();
        catalog.register_customer(customer("Ali", "Rezaei")).await.unwrap();

        assert_eq!(catalog.get_customer(sara.id).await.unwrap(), sara);

        let found = catalog.list_customers(Some("ahma")).await.unwrap();
        assert_eq!(found, vec![sara]);

        let all = catalog.list_customers(None).await.unwrap();
        let names: Vec<_> = all.iter().map(|c| c.first_name.as_str()).collect();
        assert_eq!(names, vec!["Ali", "Sara"]);
    }

    #[tokio::test]
    async fn invalid_customer_reports_the_field() {
        let err = catalog()
            .register_customer(customer("", "Ahmadi"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation { field: Some(ref f), .. } if f == "firstName"
        ));
    }

    #[tokio::test]
    async fn unknown_records_are_not_found() {
        let catalog = catalog();
        assert!(matches!(
            catalog.get_customer(CustomerId::new()).await,
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            catalog.get_product(ProductId::new()).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn low_stock_lists_products_below_five() {
        let catalog = catalog();
        catalog.add_product(product("Plenty", 5)).await.unwrap();
        catalog.add_product(product("Few", 4)).await.unwrap();
        catalog.add_product(product("None", 0)).await.unwrap();

        let low = catalog.low_stock_products().await.unwrap();
        let names: Vec<_> = low.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["None", "Few"]);
    }
}
