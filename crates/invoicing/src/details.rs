//! Hydrated invoice views returned to callers.
//!
//! Referenced customers and products are attached at read time; a reference
//! whose record no longer exists hydrates as `None`.

use serde::Serialize;

use tapor_customers::Customer;
use tapor_products::Product;

use crate::invoice::Invoice;
use crate::item::InvoiceItem;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceItemDetails {
    #[serde(flatten)]
    pub item: InvoiceItem,
    pub product: Option<Product>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceDetails {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub customer: Option<Customer>,
    pub items: Vec<InvoiceItemDetails>,
}
