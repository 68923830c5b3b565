use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tapor_core::{DomainError, DomainResult, Entity, InvoiceId, InvoiceItemId, Money, ProductId};

/// Line item as submitted by the caller.
///
/// `price` is a snapshot of the unit price at the time of invoicing and is not
/// linked to the product's current sale price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvoiceItem {
    pub product_id: ProductId,
    pub quantity: i64,
    /// Unit price in smallest currency unit.
    pub price: Money,
    /// `quantity * price`, supplied by the caller.
    pub total: Money,
}

impl NewInvoiceItem {
    pub fn new(product_id: ProductId, quantity: i64, price: Money) -> Self {
        Self {
            product_id,
            quantity,
            price,
            total: quantity.saturating_mul(price),
        }
    }

    pub fn validate(&self, index: usize) -> DomainResult<()> {
        if self.quantity <= 0 {
            return Err(DomainError::invalid_field(
                format!("items[{index}].quantity"),
                "must be positive",
            ));
        }
        if self.price < 0 {
            return Err(DomainError::invalid_field(
                format!("items[{index}].price"),
                "cannot be negative",
            ));
        }
        let expected = self.quantity.checked_mul(self.price).ok_or_else(|| {
            DomainError::invalid_field(format!("items[{index}].total"), "line amount overflow")
        })?;
        if self.total != expected {
            return Err(DomainError::invalid_field(
                format!("items[{index}].total"),
                format!("must equal quantity * price ({expected})"),
            ));
        }
        Ok(())
    }
}

/// Validate a whole item set. An empty set is accepted.
pub fn validate_items(items: &[NewInvoiceItem]) -> DomainResult<()> {
    items
        .iter()
        .enumerate()
        .try_for_each(|(index, item)| item.validate(index))
}

/// Persisted line item, owned by exactly one invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceItem {
    pub id: InvoiceItemId,
    pub invoice_id: InvoiceId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub price: Money,
    pub total: Money,
}

impl InvoiceItem {
    pub fn from_new(id: InvoiceItemId, invoice_id: InvoiceId, input: &NewInvoiceItem) -> Self {
        Self {
            id,
            invoice_id,
            product_id: input.product_id,
            quantity: input.quantity,
            price: input.price,
            total: input.total,
        }
    }
}

impl Entity for InvoiceItem {
    type Id = InvoiceItemId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// A signed change to one product's on-hand quantity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StockMovement {
    pub product_id: ProductId,
    pub delta: i64,
}

/// Stock decrements for a set of sold lines, one movement per product.
///
/// Lines for the same product are merged and the result is ordered by product
/// id, so concurrent transactions lock product rows in the same order.
pub fn stock_decrements(lines: impl IntoIterator<Item = (ProductId, i64)>) -> Vec<StockMovement> {
    let mut per_product: BTreeMap<ProductId, i64> = BTreeMap::new();
    for (product_id, quantity) in lines {
        *per_product.entry(product_id).or_insert(0) -= quantity;
    }
    per_product
        .into_iter()
        .map(|(product_id, delta)| StockMovement { product_id, delta })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_computes_line_total() {
        let item = NewInvoiceItem::new(ProductId::new(), 3, 250);
        assert_eq!(item.total, 750);
        assert!(item.validate(0).is_ok());
    }

    #[test]
    fn rejects_non_positive_quantity() {
        let item = NewInvoiceItem::new(ProductId::new(), 0, 250);
        let err = item.validate(2).unwrap_err();
        assert_eq!(err.field(), Some("items[2].quantity"));
    }

    #[test]
    fn rejects_mismatched_line_total() {
        let mut item = NewInvoiceItem::new(ProductId::new(), 2, 100);
        item.total = 150;
        let err = item.validate(0).unwrap_err();
        assert_eq!(err.field(), Some("items[0].total"));
    }

    #[test]
    fn empty_item_set_is_valid() {
        assert!(validate_items(&[]).is_ok());
    }

    #[test]
    fn decrements_merge_lines_of_the_same_product() {
        let a = ProductId::new();
        let b = ProductId::new();
        let moves = stock_decrements([(a, 2), (b, 1), (a, 3)]);
        assert_eq!(moves.len(), 2);
        let a_move = moves.iter().find(|m| m.product_id == a).unwrap();
        let b_move = moves.iter().find(|m| m.product_id == b).unwrap();
        assert_eq!(a_move.delta, -5);
        assert_eq!(b_move.delta, -1);
        assert!(moves.windows(2).all(|w| w[0].product_id < w[1].product_id));
    }
}
