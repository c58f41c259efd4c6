//! In-memory [`MessagingClient`] with scripted behavior for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{
    AttachmentRef, ClientError, CodeRequest, InboundHandler, MessagingClient, PeerId, PeerTarget,
    RemoteMessage, PHONE_CODE_EXPIRED_RPC_CODE,
};
use crate::lock_or_recover;

#[derive(Debug, Default)]
struct Script {
    connect_delay: Duration,
    connect_failure: Option<String>,
    login_code: Option<String>,
    password: Option<String>,
    expiring_codes: bool,
    send_code_failure: Option<String>,
    send_failure: Option<String>,
    peers: HashMap<String, i64>,
    media: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
pub struct ScriptedMessagingClient {
    script: Script,
    connected: AtomicBool,
    authorized: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    sign_in_calls: AtomicUsize,
    code_requests: Mutex<Vec<String>>,
    sent: Mutex<Vec<(PeerId, String)>>,
    handler: Mutex<Option<InboundHandler>>,
}

impl ScriptedMessagingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.script.connect_delay = delay;
        self
    }

    pub fn failing_connect(mut self, reason: &str) -> Self {
        self.script.connect_failure = Some(reason.to_string());
        self
    }

    /// Code accepted by `sign_in`; any other code is rejected as invalid.
    pub fn with_login_code(mut self, code: &str) -> Self {
        self.script.login_code = Some(code.to_string());
        self
    }

    /// Enables the second factor with the given password.
    pub fn with_password(mut self, password: &str) -> Self {
        self.script.password = Some(password.to_string());
        self
    }

    pub fn expiring_codes(mut self) -> Self {
        self.script.expiring_codes = true;
        self
    }

    pub fn failing_send_code(mut self, rpc_code: &str) -> Self {
        self.script.send_code_failure = Some(rpc_code.to_string());
        self
    }

    pub fn failing_send(mut self, rpc_code: &str) -> Self {
        self.script.send_failure = Some(rpc_code.to_string());
        self
    }

    pub fn authorized(self) -> Self {
        self.authorized.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_peer(mut self, handle: &str, id: i64) -> Self {
        self.script
            .peers
            .insert(handle.trim_start_matches('@').to_ascii_lowercase(), id);
        self
    }

    pub fn with_media(mut self, file_id: &str, bytes: &[u8]) -> Self {
        self.script.media.insert(file_id.to_string(), bytes.to_vec());
        self
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn sign_in_calls(&self) -> usize {
        self.sign_in_calls.load(Ordering::SeqCst)
    }

    pub fn code_requests(&self) -> Vec<String> {
        lock_or_recover(&self.code_requests).clone()
    }

    pub fn sent_messages(&self) -> Vec<(PeerId, String)> {
        lock_or_recover(&self.sent).clone()
    }

    pub fn has_subscriber(&self) -> bool {
        lock_or_recover(&self.handler).is_some()
    }

    /// Delivers `message` to the subscribed handler, if any, and waits for it.
    pub async fn emit(&self, message: RemoteMessage) -> bool {
        let handler = lock_or_recover(&self.handler).clone();
        match handler {
            Some(handler) => {
                handler(message).await;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl MessagingClient for ScriptedMessagingClient {
    async fn connect(&self) -> Result<(), ClientError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.script.connect_delay.is_zero() {
            tokio::time::sleep(self.script.connect_delay).await;
        }
        if let Some(reason) = &self.script.connect_failure {
            return Err(ClientError::Status {
                status: 503,
                body: reason.clone(),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn is_authorized(&self) -> Result<bool, ClientError> {
        Ok(self.authorized.load(Ordering::SeqCst))
    }

    async fn send_code(&self, phone: &str) -> Result<CodeRequest, ClientError> {
        if let Some(code) = &self.script.send_code_failure {
            return Err(ClientError::rpc(code.clone(), "code request rejected"));
        }
        let mut requests = lock_or_recover(&self.code_requests);
        requests.push(phone.to_string());
        Ok(CodeRequest {
            phone_code_hash: format!("hash-{}", requests.len()),
        })
    }

    async fn sign_in(
        &self,
        phone: &str,
        code: &str,
        _request: &CodeRequest,
    ) -> Result<String, ClientError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        if self.script.expiring_codes {
            return Err(ClientError::rpc(
                PHONE_CODE_EXPIRED_RPC_CODE,
                "the confirmation code has expired",
            ));
        }
        if self.script.login_code.as_deref() != Some(code) {
            return Err(ClientError::rpc(
                "PHONE_CODE_INVALID",
                "the provided code is invalid",
            ));
        }
        if self.script.password.is_some() {
            return Err(ClientError::PasswordNeeded);
        }
        self.authorized.store(true, Ordering::SeqCst);
        Ok(format!("session-{phone}"))
    }

    async fn check_password(&self, password: &str) -> Result<String, ClientError> {
        if self.script.password.as_deref() != Some(password) {
            return Err(ClientError::rpc(
                "PASSWORD_HASH_INVALID",
                "the password is invalid",
            ));
        }
        self.authorized.store(true, Ordering::SeqCst);
        Ok("session-2fa".to_string())
    }

    async fn resolve_peer(&self, target: &PeerTarget) -> Result<PeerId, ClientError> {
        match target {
            PeerTarget::Id(id) => Ok(PeerId(*id)),
            PeerTarget::Handle(handle) => self
                .script
                .peers
                .get(&handle.trim_start_matches('@').to_ascii_lowercase())
                .map(|id| PeerId(*id))
                .ok_or_else(|| {
                    ClientError::rpc("USERNAME_NOT_OCCUPIED", format!("no peer named {handle}"))
                }),
        }
    }

    async fn send_message(&self, peer: PeerId, text: &str) -> Result<(), ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }
        if !self.authorized.load(Ordering::SeqCst) {
            return Err(ClientError::rpc(
                "AUTH_KEY_UNREGISTERED",
                "the session is not signed in",
            ));
        }
        if let Some(code) = &self.script.send_failure {
            return Err(ClientError::rpc(code.clone(), "send rejected"));
        }
        lock_or_recover(&self.sent).push((peer, text.to_string()));
        Ok(())
    }

    async fn download_media(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, ClientError> {
        self.script
            .media
            .get(&attachment.file_id)
            .cloned()
            .ok_or_else(|| ClientError::rpc("FILE_REFERENCE_EXPIRED", "media is unavailable"))
    }

    fn subscribe(&self, handler: InboundHandler) {
        *lock_or_recover(&self.handler) = Some(handler);
    }
}
