//! Customers domain module.
//!
//! Customer records referenced by invoices. Validation and search matching
//! only; persistence lives in `tapor-infra`.

pub mod customer;

pub use customer::{Customer, NewCustomer, NATIONAL_ID_MAX_LEN};
