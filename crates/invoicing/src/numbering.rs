//! Invoice numbering rules.
//!
//! Numbers are shared by both invoice kinds and start at 1001. The next number
//! is one past the highest number ever issued: storage keeps a high-water mark
//! next to the invoices so numbers freed by deletion are not handed out again.
//! Uniqueness is enforced by storage.

use serde::{Deserialize, Serialize};

use tapor_core::{DomainError, DomainResult};

/// Number assigned to the first invoice of an empty store.
pub const FIRST_INVOICE_NUMBER: i64 = 1001;

/// Human-facing invoice number.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceNumber(i64);

impl InvoiceNumber {
    pub const FIRST: InvoiceNumber = InvoiceNumber(FIRST_INVOICE_NUMBER);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(self) -> i64 {
        self.0
    }

    /// Next number given the highest one currently persisted.
    pub fn next_after(max: Option<InvoiceNumber>) -> DomainResult<InvoiceNumber> {
        match max {
            None => Ok(Self::FIRST),
            Some(InvoiceNumber(n)) => n
                .checked_add(1)
                .map(InvoiceNumber)
                .ok_or_else(|| DomainError::invariant("invoice number space exhausted")),
        }
    }

    /// Next number given the persisted high-water mark and the highest number
    /// still present among invoices (either may be absent).
    pub fn allocate(
        watermark: Option<InvoiceNumber>,
        max_existing: Option<InvoiceNumber>,
    ) -> DomainResult<InvoiceNumber> {
        Self::next_after(watermark.max(max_existing))
    }

    /// Substring match over the decimal rendering of the number.
    pub fn matches_search(self, needle: &str) -> bool {
        self.0.to_string().contains(needle.trim())
    }
}

impl core::fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}
