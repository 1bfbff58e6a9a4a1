use std::sync::Arc;

use axum::{extract::Extension, Json};

use crate::app::{dto::HealthResponse, services::AppServices};

/// Liveness plus the mode the ledger is running in.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        mode: services.ledger().mode(),
    })
}
