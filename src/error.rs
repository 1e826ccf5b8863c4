//! The stable error taxonomy surfaced to callers.
//!
//! Library code returns `Result<T, GatewayError>` and never panics on
//! well-formed input. `commands/*` and `main` wrap these (and other
//! startup-time failures) in `anyhow::Result` with added context.

use axum::http::StatusCode;
use thiserror::Error;

/// Terminal-for-the-request errors plus the handful of
/// locally-recoverable substitutions that still need a stable name
/// (`UpstreamFailure` after retries are exhausted).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("tenant disabled")]
    TenantDisabled,

    #[error("provider '{0}' not allowed for this tenant")]
    ProviderNotAllowed(String),

    #[error("model '{0}' not allowed for this tenant")]
    ModelNotAllowed(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("admission queue full")]
    QueueFull,

    #[error("load shed: {0}")]
    LoadShed(String),

    #[error("circuit open")]
    CircuitOpen,

    #[error("blocked by policy '{policy_id}': {message}")]
    PolicyBlocked { policy_id: String, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl GatewayError {
    /// HTTP status mapping from  (e.g. `QuotaExceeded` -> 429).
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::TenantDisabled => StatusCode::FORBIDDEN,
            GatewayError::ProviderNotAllowed(_) => StatusCode::FORBIDDEN,
            GatewayError::ModelNotAllowed(_) => StatusCode::FORBIDDEN,
            GatewayError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::BudgetExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::LoadShed(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::PolicyBlocked { .. } => StatusCode::FORBIDDEN,
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            GatewayError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The stable string identifier from , independent of display text.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized => "Unauthorized",
            GatewayError::TenantDisabled => "TenantDisabled",
            GatewayError::ProviderNotAllowed(_) => "ProviderNotAllowed",
            GatewayError::ModelNotAllowed(_) => "ModelNotAllowed",
            GatewayError::QuotaExceeded(_) => "QuotaExceeded",
            GatewayError::BudgetExceeded(_) => "BudgetExceeded",
            GatewayError::QueueFull => "QueueFull",
            GatewayError::LoadShed(_) => "LoadShed",
            GatewayError::CircuitOpen => "CircuitOpen",
            GatewayError::PolicyBlocked { .. } => "PolicyBlocked",
            GatewayError::Timeout => "Timeout",
            GatewayError::UpstreamFailure(_) => "UpstreamFailure",
            GatewayError::InternalError(_) => "InternalError",
        }
    }

    /// Whether findings evidence may accompany this error to the caller.
    /// Only `PolicyBlocked` carries evidence, and only when the policy
    /// action says so; all other errors get a sanitized message.
    pub fn is_policy_blocked(&self) -> bool {
        matches!(self, GatewayError::PolicyBlocked { .. })
    }
}
