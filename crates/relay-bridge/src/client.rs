//! Remote messaging connection seam.
//!
//! [`MessagingClient`] is the only surface through which the bridge touches the
//! remote network. Implementations may be asynchronous internally, but every
//! call made by the bridge happens on the dedicated execution context owned by
//! [`crate::BridgeExecutor`], so an implementation never sees two bridge calls
//! racing from different OS threads.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Deserialize;
use thiserror::Error;

/// RPC code the network returns when the account has a second factor enabled.
pub const PASSWORD_NEEDED_RPC_CODE: &str = "SESSION_PASSWORD_NEEDED";
/// RPC code for a login code that can no longer be used.
pub const PHONE_CODE_EXPIRED_RPC_CODE: &str = "PHONE_CODE_EXPIRED";

const UNAUTHORIZED_RPC_CODES: &[&str] = &[
    "AUTH_KEY_UNREGISTERED",
    "AUTH_RESTART",
    "SESSION_REVOKED",
    "SESSION_EXPIRED",
    "USER_DEACTIVATED",
];

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection is not established")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote returned non-success status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("rpc error {code}: {message}")]
    Rpc { code: String, message: String },
    #[error("two-factor password required")]
    PasswordNeeded,
    #[error("invalid response: {0}")]
    Parse(String),
}

impl ClientError {
    pub fn rpc(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rpc {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn rpc_code(&self) -> Option<&str> {
        match self {
            Self::Rpc { code, .. } => Some(code.as_str()),
            Self::PasswordNeeded => Some(PASSWORD_NEEDED_RPC_CODE),
            _ => None,
        }
    }

    /// True when the failure means the link itself is gone and a reconnect is needed.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Transport(_))
    }

    /// True when the network rejected the call because the session is not signed in.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 401,
            Self::Rpc { code, .. } => UNAUTHORIZED_RPC_CODES.contains(&code.as_str()),
            _ => false,
        }
    }
}

/// Result of a successful login-code request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CodeRequest {
    pub phone_code_hash: String,
}

/// Outbound destination as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerTarget {
    Id(i64),
    Handle(String),
}

impl PeerTarget {
    /// All-digit input is a numeric identifier; anything else is a handle.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
            if let Ok(id) = trimmed.parse::<i64>() {
                return Some(Self::Id(id));
            }
        }
        Some(Self::Handle(trimmed.to_string()))
    }
}

impl fmt::Display for PeerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Handle(handle) => f.write_str(handle),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub i64);

/// Reference to remote media that can be fetched with [`MessagingClient::download_media`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

/// Raw inbound message as delivered by the connection, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteMessage {
    pub chat_id: Option<i64>,
    pub sender_id: Option<i64>,
    pub date: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub attachment: Option<AttachmentRef>,
}

/// Handler invoked on the execution context for every inbound message.
pub type InboundHandler = Arc<dyn Fn(RemoteMessage) -> BoxFuture<'static, ()> + Send + Sync>;

#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn connect(&self) -> Result<(), ClientError>;

    async fn disconnect(&self) -> Result<(), ClientError>;

    fn is_connected(&self) -> bool;

    async fn is_authorized(&self) -> Result<bool, ClientError>;

    async fn send_code(&self, phone: &str) -> Result<CodeRequest, ClientError>;

    /// Completes a code login and returns the session credential.
    async fn sign_in(
        &self,
        phone: &str,
        code: &str,
        request: &CodeRequest,
    ) -> Result<String, ClientError>;

    /// Completes a two-factor login and returns the session credential.
    async fn check_password(&self, password: &str) -> Result<String, ClientError>;

    async fn resolve_peer(&self, target: &PeerTarget) -> Result<PeerId, ClientError>;

    async fn send_message(&self, peer: PeerId, text: &str) -> Result<(), ClientError>;

    async fn download_media(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, ClientError>;

    /// Registers the single inbound handler, replacing any previous one.
    fn subscribe(&self, handler: InboundHandler);
}
