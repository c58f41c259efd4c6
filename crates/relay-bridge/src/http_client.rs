//! [`MessagingClient`] backed by a JSON-over-HTTP user-API gateway.
//!
//! Every call is `POST {api_base}/{method}` with a JSON body and answers with an
//! `{ok, result, error, error_code}` envelope. Application credentials and the
//! current session credential travel as headers. Inbound traffic is pulled by a
//! long-poll loop over `updates.get`, started on `connect` on whatever runtime
//! called it (the bridge's dedicated context) and dispatched to the subscriber.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{
    AttachmentRef, ClientError, CodeRequest, InboundHandler, MessagingClient, PeerId, PeerTarget,
    RemoteMessage, PASSWORD_NEEDED_RPC_CODE,
};
use crate::lock_or_recover;

const API_ID_HEADER: &str = "x-relay-api-id";
const API_HASH_HEADER: &str = "x-relay-api-hash";
const SESSION_HEADER: &str = "x-relay-session";
const MAX_ERROR_BODY_CHARS: usize = 800;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMessagingClientConfig {
    pub api_base: String,
    pub api_id: i64,
    pub api_hash: String,
    pub request_timeout: Duration,
    /// Server-side wait for a single `updates.get` long poll.
    pub poll_timeout_seconds: u64,
    pub poll_retry_delay: Duration,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for HttpMessagingClientConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8081".to_string(),
            api_id: 0,
            api_hash: String::new(),
            request_timeout: Duration::from_secs(30),
            poll_timeout_seconds: 25,
            poll_retry_delay: Duration::from_secs(2),
            retry_max_attempts: 3,
            retry_base_delay_ms: 250,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    result: Value,
    error: Option<String>,
    error_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthStatusResult {
    authorized: bool,
}

#[derive(Debug, Deserialize)]
struct SessionResult {
    session: String,
}

#[derive(Debug, Deserialize)]
struct ResolvedPeer {
    peer_id: i64,
}

#[derive(Debug, Deserialize)]
struct WireUpdate {
    update_id: i64,
    message: Option<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    chat_id: Option<i64>,
    sender_id: Option<i64>,
    date: Option<i64>,
    text: Option<String>,
    attachment: Option<WireAttachment>,
}

#[derive(Debug, Deserialize)]
struct WireAttachment {
    file_id: String,
    file_name: Option<String>,
    mime_type: Option<String>,
}

impl WireMessage {
    fn into_remote(self) -> RemoteMessage {
        RemoteMessage {
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            date: self
                .date
                .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0)),
            text: self.text,
            attachment: self.attachment.map(|attachment| AttachmentRef {
                file_id: attachment.file_id,
                file_name: attachment.file_name,
                mime_type: attachment.mime_type,
            }),
        }
    }
}

struct Inner {
    http: reqwest::Client,
    config: HttpMessagingClientConfig,
    session: Mutex<Option<String>>,
    connected: AtomicBool,
    handler: Mutex<Option<InboundHandler>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    update_offset: AtomicI64,
}

#[derive(Clone)]
pub struct HttpMessagingClient {
    inner: Arc<Inner>,
}

impl HttpMessagingClient {
    pub fn new(
        config: HttpMessagingClientConfig,
        session: Option<String>,
    ) -> Result<Self, ClientError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("relay-bridge"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;
        let config = HttpMessagingClientConfig {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
            ..config
        };
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                config,
                session: Mutex::new(session.filter(|token| !token.trim().is_empty())),
                connected: AtomicBool::new(false),
                handler: Mutex::new(None),
                poller: Mutex::new(None),
                update_offset: AtomicI64::new(0),
            }),
        })
    }
}

impl Inner {
    fn request(&self, method: &str, body: &Value) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .post(format!("{}/{method}", self.config.api_base))
            .header(API_ID_HEADER, self.config.api_id.to_string())
            .header(API_HASH_HEADER, &self.config.api_hash)
            .json(body);
        if let Some(session) = lock_or_recover(&self.session).as_deref() {
            request = request.header(SESSION_HEADER, session);
        }
        request
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, ClientError> {
        let response = self.send_with_retry(method, &body, None).await?;
        let status = response.status();
        let text = response.text().await?;
        decode_envelope(status.as_u16(), &text)
    }

    async fn send_with_retry(
        &self,
        method: &str,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, ClientError> {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let mut request = self.request(method, body);
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }
            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if attempt < self.config.retry_max_attempts && is_retryable_status(status) {
                        tokio::time::sleep(retry_delay(self.config.retry_base_delay_ms, attempt))
                            .await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(error) => {
                    if attempt < self.config.retry_max_attempts
                        && is_retryable_transport_error(&error)
                    {
                        tokio::time::sleep(retry_delay(self.config.retry_base_delay_ms, attempt))
                            .await;
                        continue;
                    }
                    if error.is_connect() {
                        self.connected.store(false, Ordering::SeqCst);
                    }
                    return Err(ClientError::Transport(error));
                }
            }
        }
    }

    fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    fn store_session(&self, session: String) {
        *lock_or_recover(&self.session) = Some(session);
    }

    async fn fetch_updates(&self) -> Result<Vec<WireUpdate>, ClientError> {
        let offset = self.update_offset.load(Ordering::SeqCst);
        let body = json!({
            "offset": offset,
            "timeout": self.config.poll_timeout_seconds,
        });
        let timeout = self
            .config
            .request_timeout
            .saturating_add(Duration::from_secs(self.config.poll_timeout_seconds));
        let response = self.send_with_retry("updates.get", &body, Some(timeout)).await?;
        let status = response.status();
        let text = response.text().await?;
        decode_envelope(status.as_u16(), &text)
    }

    async fn dispatch(&self, updates: Vec<WireUpdate>) {
        for update in updates {
            self.update_offset
                .fetch_max(update.update_id.saturating_add(1), Ordering::SeqCst);
            let Some(message) = update.message else {
                continue;
            };
            let handler = lock_or_recover(&self.handler).clone();
            match handler {
                Some(handler) => handler(message.into_remote()).await,
                None => debug!(update_id = update.update_id, "dropping update without subscriber"),
            }
        }
    }
}

async fn run_update_loop(inner: Weak<Inner>) {
    loop {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !inner.connected.load(Ordering::SeqCst) {
            return;
        }
        match inner.fetch_updates().await {
            Ok(updates) => inner.dispatch(updates).await,
            Err(error) => {
                if error.is_unauthorized() {
                    debug!("update poll skipped: session not signed in");
                } else {
                    warn!(error = %error, "update poll failed");
                }
                let delay = inner.config.poll_retry_delay;
                drop(inner);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[async_trait]
impl MessagingClient for HttpMessagingClient {
    async fn connect(&self) -> Result<(), ClientError> {
        let _: Value = self.inner.call("connection.open", json!({})).await?;
        self.inner.connected.store(true, Ordering::SeqCst);

        {
            let mut poller = lock_or_recover(&self.inner.poller);
            if let Some(previous) = poller.take() {
                previous.abort();
            }
            *poller = Some(tokio::spawn(run_update_loop(Arc::downgrade(&self.inner))));
        }
        info!(api_base = %self.inner.config.api_base, "connected to messaging gateway");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        self.inner.connected.store(false, Ordering::SeqCst);
        if let Some(poller) = lock_or_recover(&self.inner.poller).take() {
            poller.abort();
        }
        if let Err(error) = self
            .inner
            .call::<Value>("connection.close", json!({}))
            .await
        {
            debug!(error = %error, "connection.close failed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn is_authorized(&self) -> Result<bool, ClientError> {
        self.inner.ensure_connected()?;
        if lock_or_recover(&self.inner.session).is_none() {
            return Ok(false);
        }
        match self
            .inner
            .call::<AuthStatusResult>("auth.status", json!({}))
            .await
        {
            Ok(status) => Ok(status.authorized),
            Err(error) if error.is_unauthorized() => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn send_code(&self, phone: &str) -> Result<CodeRequest, ClientError> {
        self.inner.ensure_connected()?;
        self.inner
            .call::<CodeRequest>("auth.sendCode", json!({ "phone": phone }))
            .await
    }

    async fn sign_in(
        &self,
        phone: &str,
        code: &str,
        request: &CodeRequest,
    ) -> Result<String, ClientError> {
        self.inner.ensure_connected()?;
        let result: SessionResult = self
            .inner
            .call(
                "auth.signIn",
                json!({
                    "phone": phone,
                    "code": code,
                    "phone_code_hash": request.phone_code_hash,
                }),
            )
            .await?;
        self.inner.store_session(result.session.clone());
        Ok(result.session)
    }

    async fn check_password(&self, password: &str) -> Result<String, ClientError> {
        self.inner.ensure_connected()?;
        let result: SessionResult = self
            .inner
            .call("auth.checkPassword", json!({ "password": password }))
            .await?;
        self.inner.store_session(result.session.clone());
        Ok(result.session)
    }

    async fn resolve_peer(&self, target: &PeerTarget) -> Result<PeerId, ClientError> {
        self.inner.ensure_connected()?;
        let body = match target {
            PeerTarget::Id(id) => json!({ "id": id }),
            PeerTarget::Handle(handle) => json!({ "username": handle.trim_start_matches('@') }),
        };
        let resolved: ResolvedPeer = self.inner.call("contacts.resolve", body).await?;
        Ok(PeerId(resolved.peer_id))
    }

    async fn send_message(&self, peer: PeerId, text: &str) -> Result<(), ClientError> {
        self.inner.ensure_connected()?;
        let _: Value = self
            .inner
            .call("messages.send", json!({ "peer_id": peer.0, "text": text }))
            .await?;
        Ok(())
    }

    async fn download_media(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, ClientError> {
        self.inner.ensure_connected()?;
        let response = self
            .inner
            .send_with_retry(
                "media.download",
                &json!({ "file_id": attachment.file_id }),
                None,
            )
            .await?;
        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(response.bytes().await?.to_vec());
        }
        let text = response.text().await?;
        Err(decode_envelope::<Value>(status, &text)
            .err()
            .unwrap_or_else(|| ClientError::Status {
                status,
                body: truncate_for_error(&text, MAX_ERROR_BODY_CHARS),
            }))
    }

    fn subscribe(&self, handler: InboundHandler) {
        *lock_or_recover(&self.inner.handler) = Some(handler);
    }
}

fn decode_envelope<T: DeserializeOwned>(status: u16, text: &str) -> Result<T, ClientError> {
    let envelope = match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) => envelope,
        Err(error) if (200..300).contains(&status) => {
            return Err(ClientError::Parse(format!("malformed envelope: {error}")));
        }
        Err(_) => {
            return Err(ClientError::Status {
                status,
                body: truncate_for_error(text, MAX_ERROR_BODY_CHARS),
            });
        }
    };
    if !envelope.ok {
        let message = envelope
            .error
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(match envelope.error_code {
            Some(code) if code == PASSWORD_NEEDED_RPC_CODE => ClientError::PasswordNeeded,
            Some(code) => ClientError::rpc(code, message),
            None => ClientError::Status {
                status,
                body: message,
            },
        });
    }
    if !(200..300).contains(&status) {
        return Err(ClientError::Status {
            status,
            body: truncate_for_error(text, MAX_ERROR_BODY_CHARS),
        });
    }
    serde_json::from_value(envelope.result)
        .map_err(|error| ClientError::Parse(format!("unexpected result shape: {error}")))
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

fn retry_delay(base_delay_ms: u64, attempt: usize) -> Duration {
    let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX).min(6);
    Duration::from_millis(base_delay_ms.saturating_mul(1_u64 << exponent))
}

fn truncate_for_error(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}
