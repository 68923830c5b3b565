use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tapor_core::CustomerId;

use crate::invoice::{Invoice, InvoiceKind};

/// Invoice list filter. Every populated criterion must match.
///
/// `start_date` and `end_date` are both inclusive bounds on `created_at`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceFilter {
    #[serde(rename = "type")]
    pub kind: Option<InvoiceKind>,
    pub customer_id: Option<CustomerId>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Substring of the invoice number.
    pub search: Option<String>,
}

impl InvoiceFilter {
    pub fn kind(kind: InvoiceKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Search text with surrounding whitespace removed; `None` when blank.
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn matches(&self, invoice: &Invoice) -> bool {
        if self.kind.is_some_and(|k| k != invoice.kind) {
            return false;
        }
        if self.customer_id.is_some_and(|c| c != invoice.customer_id) {
            return false;
        }
        if self.start_date.is_some_and(|start| invoice.created_at < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| invoice.created_at > end) {
            return false;
        }
        match self.search_term() {
            Some(term) => invoice.invoice_number.matches_search(term),
            None => true,
        }
    }
}
