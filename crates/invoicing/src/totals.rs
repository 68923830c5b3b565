//! Totals preview for callers assembling an invoice.
//!
//! Stored invoices keep whatever `subtotal`, `discount_amount` and `total` the
//! caller supplied; this type only offers the canonical computation. Its
//! result always passes the header amount rules of `InvoiceDraft::validate`.

use serde::{Deserialize, Serialize};

use tapor_core::{DomainError, DomainResult, Money};

use crate::invoice::DiscountType;
use crate::item::NewInvoiceItem;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub subtotal: Money,
    pub discount_amount: Money,
    pub total: Money,
}

impl Totals {
    /// Sum the line totals and apply the discount.
    ///
    /// Percent discounts are whole percent points, rounded half-up to the
    /// smallest currency unit. A discount above the subtotal is rejected.
    pub fn compute(
        items: &[NewInvoiceItem],
        discount_type: DiscountType,
        discount_value: Money,
    ) -> DomainResult<Totals> {
        if discount_value < 0 {
            return Err(DomainError::invalid_field("discountValue", "cannot be negative"));
        }
        if discount_type == DiscountType::Percent && discount_value > 100 {
            return Err(DomainError::invalid_field(
                "discountValue",
                "percent discount cannot exceed 100",
            ));
        }

        let subtotal = items.iter().try_fold(0i64, |acc, item| {
            acc.checked_add(item.total)
                .ok_or_else(|| DomainError::invariant("invoice subtotal overflow"))
        })?;

        let discount_amount = match discount_type {
            DiscountType::Percent => {
                let scaled = (subtotal as i128) * (discount_value as i128);
                i64::try_from((scaled + 50).div_euclid(100))
                    .map_err(|_| DomainError::invariant("discount overflow"))?
            }
            DiscountType::Amount => discount_value,
        };
        if discount_amount > subtotal {
            return Err(DomainError::invalid_field(
                "discountValue",
                "discount cannot exceed the subtotal",
            ));
        }

        let total = subtotal
            .checked_sub(discount_amount)
            .ok_or_else(|| DomainError::invariant("invoice total overflow"))?;

        Ok(Totals {
            subtotal,
            discount_amount,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapor_core::ProductId;

    fn items() -> Vec<NewInvoiceItem> {
        vec![
            NewInvoiceItem::new(ProductId::new(), 2, 1_000),
            NewInvoiceItem::new(ProductId::new(), 1, 500),
        ]
    }

    #[test]
    fn percent_discount() {
        let totals = Totals::compute(&items(), DiscountType::Percent, 10).unwrap();
        assert_eq!(totals.subtotal, 2_500);
        assert_eq!(totals.discount_amount, 250);
        assert_eq!(totals.total, 2_250);
    }

    #[test]
    fn percent_discount_rounds_half_up() {
        let items = vec![NewInvoiceItem::new(ProductId::new(), 1, 5)];
        let totals = Totals::compute(&items, DiscountType::Percent, 10).unwrap();
        assert_eq!(totals.discount_amount, 1);
        assert_eq!(totals.total, 4);
    }

    #[test]
    fn fixed_amount_discount() {
        let totals = Totals::compute(&items(), DiscountType::Amount, 300).unwrap();
        assert_eq!(totals.discount_amount, 300);
        assert_eq!(totals.total, 2_200);
    }

    #[test]
    fn amount_discount_above_subtotal_is_rejected() {
        let err = Totals::compute(&items(), DiscountType::Amount, 2_501).unwrap_err();
        assert_eq!(err.field(), Some("discountValue"));

        let exact = Totals::compute(&items(), DiscountType::Amount, 2_500).unwrap();
        assert_eq!(exact.total, 0);
    }

    #[test]
    fn out_of_range_discount_values_are_rejected() {
        let err = Totals::compute(&items(), DiscountType::Percent, 101).unwrap_err();
        assert_eq!(err.field(), Some("discountValue"));
        let err = Totals::compute(&items(), DiscountType::Amount, -1).unwrap_err();
        assert_eq!(err.field(), Some("discountValue"));
    }

    #[test]
    fn no_items_is_zero() {
        let totals = Totals::compute(&[], DiscountType::Percent, 50).unwrap();
        assert_eq!(totals, Totals { subtotal: 0, discount_amount: 0, total: 0 });
    }

    mod proptest_tests {
        use super::*;
        use crate::invoice::{InvoiceDraft, InvoiceKind};
        use proptest::prelude::*;
        use tapor_core::CustomerId;

        proptest! {
            /// Property: computed totals always satisfy total = subtotal - discount.
            #[test]
            fn totals_are_consistent(
                lines in prop::collection::vec((1i64..100, 0i64..100_000), 0..20),
                percent in 0i64..=100,
            ) {
                let items: Vec<NewInvoiceItem> = lines
                    .into_iter()
                    .map(|(q, p)| NewInvoiceItem::new(ProductId::new(), q, p))
                    .collect();
                let totals = Totals::compute(&items, DiscountType::Percent, percent).unwrap();
                prop_assert_eq!(totals.total, totals.subtotal - totals.discount_amount);
                prop_assert!(totals.discount_amount <= totals.subtotal);
                prop_assert!(totals.total >= 0);
            }

            /// Property: whatever compute accepts, header validation accepts too.
            #[test]
            fn computed_totals_pass_header_validation(
                lines in prop::collection::vec((1i64..100, 0i64..100_000), 0..20),
                amount in 0i64..5_000_000,
            ) {
                let items: Vec<NewInvoiceItem> = lines
                    .into_iter()
                    .map(|(q, p)| NewInvoiceItem::new(ProductId::new(), q, p))
                    .collect();
                if let Ok(totals) = Totals::compute(&items, DiscountType::Amount, amount) {
                    let draft = InvoiceDraft {
                        customer_id: CustomerId::new(),
                        kind: InvoiceKind::Invoice,
                        subtotal: totals.subtotal,
                        discount_type: DiscountType::Amount,
                        discount_value: amount,
                        discount_amount: totals.discount_amount,
                        total: totals.total,
                    };
                    prop_assert!(draft.validate().is_ok());
                }
            }
        }
    }
}
