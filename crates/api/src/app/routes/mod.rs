use axum::Router;

pub mod customers;
pub mod dashboard;
pub mod invoices;
pub mod products;
pub mod system;

/// Router for every `/api` endpoint.
pub fn router() -> Router {
    Router::new()
        .nest("/invoices", invoices::router())
        .nest("/dashboard", dashboard::router())
        .nest("/customers", customers::router())
        .nest("/products", products::router())
}
