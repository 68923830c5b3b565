//! Invoicing domain module.
//!
//! Business rules for invoices and pre-invoices: the kind/status state
//! machine, totals and discount rules, line items, invoice numbering and list
//! filters. Pure domain logic (no IO, no HTTP, no storage).

pub mod details;
pub mod filter;
pub mod invoice;
pub mod item;
pub mod numbering;
pub mod totals;

pub use details::{InvoiceDetails, InvoiceItemDetails};
pub use filter::InvoiceFilter;
pub use invoice::{DiscountType, Invoice, InvoiceDraft, InvoiceKind, InvoicePatch, InvoiceStatus};
pub use item::{InvoiceItem, NewInvoiceItem, StockMovement, stock_decrements, validate_items};
pub use numbering::{FIRST_INVOICE_NUMBER, InvoiceNumber};
pub use totals::Totals;
