use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tapor_core::{DomainError, DomainResult, Entity, Money, ProductId};

/// Products with strictly fewer units on hand than this are "low stock".
pub const LOW_STOCK_THRESHOLD: i64 = 5;

const NAME_MAX_LEN: usize = 200;

/// Persisted product record.
///
/// `quantity` may be negative when the oversell policy allows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub quantity: i64,
    /// Price in smallest currency unit.
    pub purchase_price: Option<Money>,
    /// Price in smallest currency unit.
    pub sale_price: Money,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn from_new(id: ProductId, input: NewProduct, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: input.name.trim().to_string(),
            quantity: input.quantity,
            purchase_price: input.purchase_price,
            sale_price: input.sale_price,
            description: input.description,
            created_at,
        }
    }

    pub fn is_low_stock(&self) -> bool {
        self.quantity < LOW_STOCK_THRESHOLD
    }

    /// Case-insensitive substring match over the product name.
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.trim();
        needle.is_empty() || self.name.to_lowercase().contains(&needle.to_lowercase())
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// Input for adding a product to the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub purchase_price: Option<Money>,
    pub sale_price: Money,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewProduct {
    pub fn validate(&self) -> DomainResult<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DomainError::invalid_field("name", "cannot be empty"));
        }
        if name.chars().count() > NAME_MAX_LEN {
            return Err(DomainError::invalid_field(
                "name",
                format!("must be at most {NAME_MAX_LEN} characters"),
            ));
        }
        if self.quantity < 0 {
            return Err(DomainError::invalid_field("quantity", "cannot be negative"));
        }
        if self.sale_price < 0 {
            return Err(DomainError::invalid_field("salePrice", "cannot be negative"));
        }
        if matches!(self.purchase_price, Some(p) if p < 0) {
            return Err(DomainError::invalid_field("purchasePrice", "cannot be negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_product(quantity: i64) -> NewProduct {
        NewProduct {
            name: "Widget".to_string(),
            quantity,
            purchase_price: Some(700),
            sale_price: 1_000,
            description: None,
        }
    }

    #[test]
    fn valid_product_passes() {
        assert!(new_product(10).validate().is_ok());
    }

    #[test]
    fn rejects_empty_name() {
        let mut input = new_product(1);
        input.name = "  ".to_string();
        let err = input.validate().unwrap_err();
        assert_eq!(err.field(), Some("name"));
    }

    #[test]
    fn rejects_negative_prices() {
        let mut input = new_product(1);
        input.sale_price = -1;
        assert_eq!(input.validate().unwrap_err().field(), Some("salePrice"));

        let mut input = new_product(1);
        input.purchase_price = Some(-5);
        assert_eq!(input.validate().unwrap_err().field(), Some("purchasePrice"));
    }

    #[test]
    fn low_stock_is_strictly_below_threshold() {
        let at = Product::from_new(ProductId::new(), new_product(5), Utc::now());
        let below = Product::from_new(ProductId::new(), new_product(4), Utc::now());
        assert!(!at.is_low_stock());
        assert!(below.is_low_stock());
    }

    #[test]
    fn search_is_case_insensitive() {
        let product = Product::from_new(ProductId::new(), new_product(1), Utc::now());
        assert!(product.matches_search("widg"));
        assert!(product.matches_search("WIDGET"));
        assert!(!product.matches_search("gadget"));
    }
}
