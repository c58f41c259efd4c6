//! Query and response payloads plus the error-to-HTTP mapping.

use super::*;

#[derive(Debug)]
pub(super) struct BridgeApiError {
    pub(super) status: StatusCode,
    pub(super) code: &'static str,
    pub(super) message: String,
    /// Transient failures the caller may simply repeat.
    pub(super) retryable: bool,
}

impl BridgeApiError {
    pub(super) fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retryable: false,
        }
    }

    pub(super) fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub(super) fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub(super) fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl From<BridgeError> for BridgeApiError {
    fn from(error: BridgeError) -> Self {
        let status = match &error {
            BridgeError::Validation(_)
            | BridgeError::NoPendingLogin(_)
            | BridgeError::NotAuthenticated
            | BridgeError::TwoFactorRequired { .. }
            | BridgeError::Auth(_) => StatusCode::BAD_REQUEST,
            BridgeError::Network(_)
            | BridgeError::Timeout { .. }
            | BridgeError::EntityResolution { .. }
            | BridgeError::Send(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            retryable: error.is_retryable(),
            ..Self::new(status, error.kind(), error.to_string())
        }
    }
}

impl IntoResponse for BridgeApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "status": "error",
                "error": self.message,
                "code": self.code,
                "retryable": self.retryable,
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct LoginQuery {
    pub(super) phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CodeQuery {
    pub(super) code: Option<String>,
    pub(super) phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct PasswordQuery {
    pub(super) password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SendQuery {
    pub(super) chat_id: Option<String>,
    pub(super) msg: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct IndexResponse {
    pub(super) status: &'static str,
    pub(super) public_url: String,
    pub(super) endpoints: BTreeMap<&'static str, &'static str>,
}

#[derive(Debug, Serialize)]
pub(super) struct HealthResponse {
    pub(super) status: &'static str,
    pub(super) uptime_seconds: u64,
    pub(super) buffered_events: usize,
    pub(super) buffer_capacity: usize,
    pub(super) bridge_running: bool,
    pub(super) auth_state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) pending_login_since_unix_ms: Option<u64>,
    pub(super) keepalive: relay_bridge::KeepAliveHealth,
}

#[derive(Debug, Serialize)]
pub(super) struct StatusResponse {
    pub(super) authorized: bool,
    #[serde(rename = "pendingPhone")]
    pub(super) pending_phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct LoginResponse {
    pub(super) status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) phone: Option<String>,
}

impl From<LoginOutcome> for LoginResponse {
    fn from(outcome: LoginOutcome) -> Self {
        match outcome {
            LoginOutcome::CodeSent { phone } => Self {
                status: "code_sent",
                phone: Some(phone),
            },
            LoginOutcome::AlreadyAuthorized => Self {
                status: "already_authorized",
                phone: None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct CodeResponse {
    pub(super) status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) phone: Option<String>,
    #[serde(rename = "sessionToken", skip_serializing_if = "Option::is_none")]
    pub(super) session_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct SendResponse {
    pub(super) status: &'static str,
    pub(super) to: String,
    pub(super) msg: String,
}

#[derive(Debug, Serialize)]
pub(super) struct GetResponse {
    pub(super) message: &'static str,
    pub(super) result: GetResult,
}

#[derive(Debug, Serialize)]
pub(super) struct GetResult {
    pub(super) quantity: usize,
    pub(super) coincidences: Vec<relay_bridge::InboundEvent>,
}
