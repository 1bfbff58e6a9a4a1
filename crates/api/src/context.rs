use axum::http::HeaderMap;

/// Header naming the person or system acting on the ledger.
pub const OPERATOR_HEADER: &str = "x-operator";

const ANONYMOUS: &str = "anonymous";

/// Who issued the request.
///
/// Recorded on the request span for audit trails. The ledger itself takes no
/// identity and never branches on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorContext {
    operator: String,
}

impl OperatorContext {
    pub fn new(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS)
    }

    /// Blank, missing or non-ASCII header values read as anonymous.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(OPERATOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(Self::new)
            .unwrap_or_else(Self::anonymous)
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }
}
