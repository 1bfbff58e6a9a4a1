use std::sync::Arc;

use axum::{
    extract::{rejection::{JsonRejection, QueryRejection}, Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/", post(record_purchase).get(list_purchases))
}

pub async fn record_purchase(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::RecordPurchaseRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    match services
        .ledger()
        .record_purchase(body.product_id, body.quantity, body.unit_cost)
        .await
    {
        Ok(batch) => (StatusCode::CREATED, Json(batch)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// Purchase batches, newest first. `?product_id=` narrows to one product.
pub async fn list_purchases(
    Extension(services): Extension<Arc<AppServices>>,
    filter: Result<Query<dto::HistoryFilter>, QueryRejection>,
) -> axum::response::Response {
    let Query(filter) = match filter {
        Ok(filter) => filter,
        Err(rejection) => return errors::query_rejection_to_response(rejection),
    };

    match services.ledger().history(filter.product_id).await {
        Ok(history) => (StatusCode::OK, Json(history.purchases)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
