//! The single managed session, as seen by synchronous callers.
//!
//! Every operation that touches the connection is marshalled through
//! [`BridgeExecutor::submit`] and blocks the caller for a bounded time, so these
//! methods must be called from blocking-capable threads (never from an async
//! task directly). The inbound handler registered at construction only holds
//! weak references back into the bridge; events that arrive after shutdown are
//! dropped instead of touching freed state.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::auth::{AuthCompletion, AuthSnapshot, AuthStateMachine, AuthStatus, LoginOutcome};
use crate::client::{ClientError, InboundHandler, MessagingClient, PeerTarget};
use crate::credential_store::SessionCredentialSink;
use crate::error::BridgeError;
use crate::event_buffer::{InboundEvent, InboundEventBuffer, DEFAULT_EVENT_BUFFER_CAPACITY};
use crate::executor::{BridgeExecutor, BridgeExecutorConfig};
use crate::keepalive::{KeepAliveConfig, KeepAliveHealth, KeepAliveSupervisor};
use crate::media_store::MediaStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBridgeConfig {
    pub executor: BridgeExecutorConfig,
    /// Bound for connect-class operations (login, code, send).
    pub operation_timeout: Duration,
    pub status_timeout: Duration,
    pub event_buffer_capacity: usize,
    /// Externally reachable base used to build `/files/{name}` links.
    pub public_url: String,
    pub keepalive: KeepAliveConfig,
    /// Include the freshly issued session credential in confirmation results.
    pub expose_session_token: bool,
}

impl Default for SessionBridgeConfig {
    fn default() -> Self {
        Self {
            executor: BridgeExecutorConfig::default(),
            operation_timeout: Duration::from_secs(20),
            status_timeout: Duration::from_secs(5),
            event_buffer_capacity: DEFAULT_EVENT_BUFFER_CAPACITY,
            public_url: "http://localhost".to_string(),
            keepalive: KeepAliveConfig::default(),
            expose_session_token: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeStatus {
    pub authorized: bool,
    pub pending_phone: Option<String>,
    pub auth_status: AuthStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeConfirmation {
    pub phone: String,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundSnapshot {
    pub found: bool,
    pub quantity: usize,
    pub events: Vec<InboundEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeHealth {
    pub running: bool,
    pub buffered_events: usize,
    pub buffer_capacity: usize,
    pub auth_status: AuthStatus,
    /// When the outstanding login code was requested, if one is pending.
    pub pending_login_since_unix_ms: Option<u64>,
    pub keepalive: KeepAliveHealth,
}

pub struct SessionBridge {
    config: SessionBridgeConfig,
    executor: BridgeExecutor,
    auth: Arc<AuthStateMachine>,
    events: Arc<InboundEventBuffer>,
    keepalive: Arc<KeepAliveSupervisor>,
    credentials: Arc<dyn SessionCredentialSink>,
}

impl SessionBridge {
    pub fn new(
        config: SessionBridgeConfig,
        client: Arc<dyn MessagingClient>,
        media: Arc<dyn MediaStore>,
        credentials: Arc<dyn SessionCredentialSink>,
    ) -> Self {
        let config = SessionBridgeConfig {
            public_url: config.public_url.trim_end_matches('/').to_string(),
            ..config
        };
        let events = Arc::new(InboundEventBuffer::new(config.event_buffer_capacity));
        client.subscribe(inbound_handler(
            Arc::downgrade(&events),
            Arc::downgrade(&client),
            media,
            config.public_url.clone(),
        ));

        let keepalive = Arc::new(KeepAliveSupervisor::new(config.keepalive.clone()));
        let executor = BridgeExecutor::new(client, config.executor.clone())
            .with_background_task(keepalive.background_task());

        Self {
            config,
            executor,
            auth: Arc::new(AuthStateMachine::new()),
            events,
            keepalive,
            credentials,
        }
    }

    pub fn config(&self) -> &SessionBridgeConfig {
        &self.config
    }

    /// Eagerly starts the execution context; later operations start it lazily anyway.
    pub fn start(&self) -> Result<(), BridgeError> {
        self.executor.start()
    }

    pub fn auth_snapshot(&self) -> AuthSnapshot {
        self.auth.snapshot()
    }

    /// Never fails: any error reaching the connection reports `authorized: false`.
    pub fn get_status(&self) -> BridgeStatus {
        let authorized = self
            .executor
            .submit("status", self.config.status_timeout, |client| async move {
                client
                    .is_authorized()
                    .await
                    .map_err(|error| BridgeError::network(error.to_string()))
            })
            .unwrap_or_else(|error| {
                debug!(error = %error, "status check degraded to unauthorized");
                false
            });
        let snapshot = self.auth.snapshot();
        BridgeStatus {
            authorized,
            pending_phone: snapshot.pending_phone,
            auth_status: snapshot.status,
        }
    }

    pub fn login(&self, phone: &str) -> Result<LoginOutcome, BridgeError> {
        let phone = phone.trim().to_string();
        if phone.is_empty() {
            return Err(BridgeError::validation("missing required parameter 'phone'"));
        }
        let auth = Arc::clone(&self.auth);
        self.executor
            .submit("login", self.config.operation_timeout, move |client| async move {
                auth.begin_login(client.as_ref(), &phone).await
            })
    }

    pub fn confirm_code(
        &self,
        code: &str,
        phone: Option<&str>,
    ) -> Result<CodeConfirmation, BridgeError> {
        let code = code.trim().to_string();
        if code.is_empty() {
            return Err(BridgeError::validation("missing required parameter 'code'"));
        }
        let phone = phone.map(str::to_string);
        let auth = Arc::clone(&self.auth);
        let completion = self.executor.submit(
            "confirm_code",
            self.config.operation_timeout,
            move |client| async move {
                auth.confirm_code(client.as_ref(), &code, phone.as_deref())
                    .await
            },
        )?;
        Ok(self.finish_authentication(completion))
    }

    pub fn confirm_password(&self, password: &str) -> Result<CodeConfirmation, BridgeError> {
        if password.is_empty() {
            return Err(BridgeError::validation(
                "missing required parameter 'password'",
            ));
        }
        let password = password.to_string();
        let auth = Arc::clone(&self.auth);
        let completion = self.executor.submit(
            "confirm_password",
            self.config.operation_timeout,
            move |client| async move { auth.confirm_password(client.as_ref(), &password).await },
        )?;
        Ok(self.finish_authentication(completion))
    }

    pub fn send_message(&self, target: &str, text: &str) -> Result<SentMessage, BridgeError> {
        let Some(peer_target) = PeerTarget::parse(target) else {
            return Err(BridgeError::validation(
                "missing required parameter 'chat_id'",
            ));
        };
        if text.is_empty() {
            return Err(BridgeError::validation("missing required parameter 'msg'"));
        }
        let outgoing = text.to_string();
        self.executor
            .submit("send", self.config.operation_timeout, move |client| async move {
                let peer = client
                    .resolve_peer(&peer_target)
                    .await
                    .map_err(|error| {
                        classify_delivery_error(error, |error| BridgeError::EntityResolution {
                            target: peer_target.to_string(),
                            reason: error.to_string(),
                        })
                    })?;
                client
                    .send_message(peer, &outgoing)
                    .await
                    .map_err(|error| {
                        classify_delivery_error(error, |error| BridgeError::Send(error.to_string()))
                    })
            })?;
        info!(to = target.trim(), "message sent");
        Ok(SentMessage {
            to: target.trim().to_string(),
            text: text.to_string(),
        })
    }

    pub fn inbound_events(&self) -> InboundSnapshot {
        let events = self.events.snapshot();
        InboundSnapshot {
            found: !events.is_empty(),
            quantity: events.len(),
            events,
        }
    }

    pub fn health(&self) -> BridgeHealth {
        let auth = self.auth.snapshot();
        BridgeHealth {
            running: self.executor.is_running(),
            buffered_events: self.events.len(),
            buffer_capacity: self.events.capacity(),
            auth_status: auth.status,
            pending_login_since_unix_ms: auth.challenge_issued_unix_ms,
            keepalive: self.keepalive.health(),
        }
    }

    /// Stops the keepalive, disconnects on the context and joins its thread.
    pub fn shutdown(&self) {
        self.keepalive.stop();
        self.executor.shutdown();
        info!("session bridge shut down");
    }

    fn finish_authentication(&self, completion: AuthCompletion) -> CodeConfirmation {
        if let Err(error) = self.credentials.persist(&completion.session_token) {
            warn!(error = %format!("{error:#}"), "failed to persist session credential");
        }
        CodeConfirmation {
            phone: completion.phone,
            session_token: self
                .config
                .expose_session_token
                .then_some(completion.session_token),
        }
    }
}

fn classify_delivery_error(
    error: ClientError,
    otherwise: impl FnOnce(ClientError) -> BridgeError,
) -> BridgeError {
    if error.is_unauthorized() {
        BridgeError::NotAuthenticated
    } else if error.is_connection_loss() {
        BridgeError::network(error.to_string())
    } else {
        otherwise(error)
    }
}

fn inbound_handler(
    events: Weak<InboundEventBuffer>,
    client: Weak<dyn MessagingClient>,
    media: Arc<dyn MediaStore>,
    public_url: String,
) -> InboundHandler {
    Arc::new(move |message| {
        let events = events.clone();
        let client = client.clone();
        let media = Arc::clone(&media);
        let public_url = public_url.clone();
        Box::pin(async move {
            let mut event = InboundEvent::from_remote(&message, Utc::now());
            if let Some(attachment) = &message.attachment {
                match client.upgrade() {
                    Some(client) => match media.save(client.as_ref(), attachment).await {
                        Ok(path) => match file_url(&public_url, &path) {
                            Some(url) => event.url = Some(url),
                            None => {
                                event.media_error =
                                    Some(format!("stored media has no file name: {}", path.display()))
                            }
                        },
                        Err(error) => {
                            warn!(error = %error, file_id = %attachment.file_id, "inbound media not stored");
                            event.media_error = Some(error.to_string());
                        }
                    },
                    None => {
                        event.media_error = Some("connection closed before download".to_string())
                    }
                }
            }
            let Some(events) = events.upgrade() else {
                debug!("dropping inbound event after bridge shutdown");
                return;
            };
            debug!(chat_id = ?event.chat_id, from_id = ?event.from_id, "inbound event buffered");
            events.append(event);
        })
    })
}

fn file_url(public_url: &str, path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    Some(format!("{public_url}/files/{name}"))
}
