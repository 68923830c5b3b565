//! Oversell policy for stock adjustments.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use tapor_core::{DomainError, DomainResult, ProductId};

/// What happens when an adjustment would leave a product below zero units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StockPolicy {
    /// Negative on-hand quantities are recorded as-is.
    #[default]
    AllowNegative,
    /// Adjustments that would go below zero are refused.
    Reject,
}

impl StockPolicy {
    /// Compute the quantity after applying `delta` to `current`.
    pub fn apply(self, product_id: ProductId, current: i64, delta: i64) -> DomainResult<i64> {
        let next = current
            .checked_add(delta)
            .ok_or_else(|| DomainError::invariant(format!("stock overflow for product {product_id}")))?;

        if self == StockPolicy::Reject && next < 0 {
            return Err(DomainError::invariant(format!(
                "insufficient stock for product {product_id}: {current} on hand, {} requested",
                -delta
            )));
        }

        Ok(next)
    }

    /// Whether the store must guard the update with `quantity + delta >= 0`.
    pub fn rejects_negative(self) -> bool {
        self == StockPolicy::Reject
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StockPolicy::AllowNegative => "allow-negative",
            StockPolicy::Reject => "reject",
        }
    }
}

impl FromStr for StockPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow-negative" | "allow" => Ok(StockPolicy::AllowNegative),
            "reject" => Ok(StockPolicy::Reject),
            other => Err(DomainError::validation(format!(
                "unknown oversell policy '{other}' (expected allow-negative or reject)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_negative_goes_below_zero() {
        let next = StockPolicy::AllowNegative.apply(ProductId::new(), 2, -5).unwrap();
        assert_eq!(next, -3);
    }

    #[test]
    fn reject_refuses_oversell() {
        let err = StockPolicy::Reject.apply(ProductId::new(), 2, -5).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn reject_allows_exact_depletion() {
        assert_eq!(StockPolicy::Reject.apply(ProductId::new(), 5, -5).unwrap(), 0);
    }

    #[test]
    fn overflow_is_an_invariant_violation() {
        let err = StockPolicy::AllowNegative
            .apply(ProductId::new(), i64::MAX, 1)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn parses_config_values() {
        assert_eq!("reject".parse::<StockPolicy>().unwrap(), StockPolicy::Reject);
        assert_eq!(
            "Allow-Negative".parse::<StockPolicy>().unwrap(),
            StockPolicy::AllowNegative
        );
        assert!("sometimes".parse::<StockPolicy>().is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 1000,
                ..ProptestConfig::default()
            })]

            /// Property: with the permissive policy, an adjustment is plain addition.
            #[test]
            fn allow_negative_is_addition(
                current in -1_000_000i64..1_000_000,
                delta in -1_000_000i64..1_000_000,
            ) {
                let next = StockPolicy::AllowNegative.apply(ProductId::new(), current, delta).unwrap();
                prop_assert_eq!(next, current + delta);
            }

            /// Property: the rejecting policy never yields a negative quantity.
            #[test]
            fn reject_never_goes_negative(
                current in 0i64..10_000,
                delta in -20_000i64..10_000,
            ) {
                match StockPolicy::Reject.apply(ProductId::new(), current, delta) {
                    Ok(next) => prop_assert!(next >= 0),
                    Err(_) => prop_assert!(current + delta < 0),
                }
            }
        }
    }
}
