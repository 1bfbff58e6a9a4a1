use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::Instrument;

use crate::context::OperatorContext;

/// Attach an [`OperatorContext`] to the request and run the handler inside a
/// span that carries it.
pub async fn operator_middleware(mut req: Request<Body>, next: Next) -> Response {
    let operator = OperatorContext::from_headers(req.headers());
    let span = tracing::info_span!(
        "request",
        method = %req.method(),
        path = %req.uri().path(),
        operator = %operator.operator(),
    );
    req.extensions_mut().insert(operator);

    let response = next.run(req).instrument(span.clone()).await;
    span.in_scope(|| {
        tracing::debug!(status = response.status().as_u16(), "request finished");
    });
    response
}
