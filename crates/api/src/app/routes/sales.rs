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
    Router::new().route("/", post(record_sale).get(list_sales))
}

pub async fn record_sale(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::RecordSaleRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    match services
        .ledger()
        .record_sale(body.product_id, body.quantity, body.unit_price)
        .await
    {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_sales(
    Extension(services): Extension<Arc<AppServices>>,
    filter: Result<Query<dto::HistoryFilter>, QueryRejection>,
) -> axum::response::Response {
    let Query(filter) = match filter {
        Ok(filter) => filter,
        Err(rejection) => return errors::query_rejection_to_response(rejection),
    };

    match services.ledger().history(filter.product_id).await {
        Ok(history) => (StatusCode::OK, Json(history.sales)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
