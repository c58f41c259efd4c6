//! Failure taxonomy surfaced by the session bridge.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Missing or malformed caller input.
    #[error("{0}")]
    Validation(String),
    #[error("no pending login: {0}")]
    NoPendingLogin(String),
    #[error("session is not authenticated yet")]
    NotAuthenticated,
    /// Code accepted but the account requires its second-factor password.
    #[error("two-factor password required for {phone}")]
    TwoFactorRequired { phone: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("could not resolve '{target}': {reason}")]
    EntityResolution { target: String, reason: String },
    #[error("send failed: {0}")]
    Send(String),
}

impl BridgeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Stable machine-readable code for HTTP bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NoPendingLogin(_) => "no_pending_login",
            Self::NotAuthenticated => "not_authenticated",
            Self::TwoFactorRequired { .. } => "two_factor_required",
            Self::Network(_) => "network_error",
            Self::Timeout { .. } => "timeout",
            Self::Auth(_) => "auth_error",
            Self::EntityResolution { .. } => "entity_resolution_error",
            Self::Send(_) => "send_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout { .. })
    }
}
