use axum::Router;

pub mod products;
pub mod purchases;
pub mod reports;
pub mod sales;
pub mod system;

/// Router for all ledger endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/products", products::router())
        .nest("/purchases", purchases::router())
        .nest("/sales", sales::router())
        .nest("/reports", reports::router())
}
