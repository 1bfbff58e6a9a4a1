use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use stockledger_infra::projections::ReportPeriod;

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/valuation", get(valuation))
        .route("/profit-loss", get(profit_and_loss))
        .route("/audit", get(audit))
}

pub async fn valuation(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.ledger().current_valuation().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// `?from=&to=` are RFC 3339 timestamps bounding a half-open window.
pub async fn profit_and_loss(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<dto::PeriodQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return errors::query_rejection_to_response(rejection),
    };

    let period = match ReportPeriod::new(query.from, query.to) {
        Ok(period) => period,
        Err(e) => return errors::ledger_error_to_response(e.into()),
    };

    match services.ledger().profit_and_loss(period).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// Products whose stock aggregate disagrees with their batches.
pub async fn audit(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.ledger().audit().await {
        Ok(divergences) => (StatusCode::OK, Json(divergences)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
