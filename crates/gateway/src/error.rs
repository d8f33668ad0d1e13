use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ewerelay_api::{FetchError, FetchErrorKind};
use thiserror::Error;

// ── Error codes ─────────────────────────────────────────────────────
//
// Stable, machine-readable identifiers returned as `code`.

pub mod error_code {
    pub const AUTHENTICATION_REQUIRED: &str = "AuthenticationRequired";
    pub const NO_RECIPIENT: &str = "NoRecipient";
    pub const STATE_MISMATCH: &str = "StateMismatch";
    pub const TOKEN_EXCHANGE_FAILED: &str = "TokenExchangeFailed";
    pub const INVALID_REQUEST: &str = "InvalidRequest";
    pub const DATA_UNAVAILABLE: &str = "DataUnavailable";
    pub const INTERNAL: &str = "Internal";
}

/// Errors surfaced synchronously to HTTP callers.
///
/// The JSON body is always `{"code": "...", "message": "..."}`.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No session, or a session without an access token. HTTP 401.
    #[error("authentication required")]
    AuthenticationRequired,

    /// Authenticated, but no push channel has ever been opened. HTTP 403.
    #[error("no push recipient registered for this session; open the push channel first")]
    NoRecipient,

    /// OAuth CSRF state missing or different. HTTP 403.
    #[error("OAuth state mismatch")]
    StateMismatch,

    /// Vendor token endpoint failed. HTTP 500.
    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// Malformed request parameters. HTTP 400.
    #[error("{0}")]
    InvalidRequest(String),

    /// Device fetch failed. HTTP 502 or 500 depending on the kind.
    #[error(transparent)]
    Upstream(#[from] FetchError),

    /// Nothing cached for the polled endpoint yet. HTTP 503.
    #[error("{0}")]
    DataUnavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::AuthenticationRequired => error_code::AUTHENTICATION_REQUIRED,
            GatewayError::NoRecipient => error_code::NO_RECIPIENT,
            GatewayError::StateMismatch => error_code::STATE_MISMATCH,
            GatewayError::TokenExchange(_) => error_code::TOKEN_EXCHANGE_FAILED,
            GatewayError::InvalidRequest(_) => error_code::INVALID_REQUEST,
            GatewayError::Upstream(err) => err.kind().as_str(),
            GatewayError::DataUnavailable(_) => error_code::DATA_UNAVAILABLE,
            GatewayError::Internal(_) => error_code::INTERNAL,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            GatewayError::NoRecipient | GatewayError::StateMismatch => StatusCode::FORBIDDEN,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Upstream(err) => match err.kind() {
                FetchErrorKind::UpstreamRequestFailed => StatusCode::BAD_GATEWAY,
                FetchErrorKind::UpstreamDataMalformed => StatusCode::INTERNAL_SERVER_ERROR,
            },
            GatewayError::DataUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::TokenExchange(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!("{} ({})", self, self.error_code());
        }
        let body = serde_json::json!({
            "code": self.error_code(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}
