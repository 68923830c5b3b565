//! Infrastructure layer: storage backends, the invoice engine, dashboard
//! analytics and process configuration.
//!
//! ```text
//! API ──► InvoiceEngine ──► Storage (CustomerStore + ProductStore
//!   │         │                      + InvoiceStore + AnalyticsStore)
//!   │         └─ hydration              ├─ InMemoryStore
//!   └────► Dashboard / Catalog          └─ PostgresStore
//! ```

pub mod analytics;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod store;


pub use analytics::{DEFAULT_DASHBOARD_LIMIT, Dashboard, DashboardStats};
pub use catalog::Catalog;
pub use config::{AppConfig, ConfigError, StorageBackend};
pub use engine::{EngineError, EngineResult, EngineSettings, InvoiceEngine};
