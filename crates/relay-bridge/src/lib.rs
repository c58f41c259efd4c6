//! Session bridge between synchronous callers and one long-lived messaging connection.
//!
//! Owns the dedicated execution context, the login state machine, the inbound
//! event buffer and the keepalive supervisor, and composes them into
//! [`SessionBridge`].

use std::sync::{Mutex, MutexGuard};

pub mod auth;
pub mod client;
pub mod credential_store;
pub mod error;
pub mod event_buffer;
pub mod executor;
pub mod http_client;
pub mod keepalive;
pub mod media_store;
pub mod session_bridge;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use auth::{AuthSnapshot, AuthStateMachine, AuthStatus, LoginOutcome};
pub use client::{
    AttachmentRef, ClientError, CodeRequest, InboundHandler, MessagingClient, PeerId, PeerTarget,
    RemoteMessage,
};
pub use credential_store::{DiscardSessionCredentials, FileSessionStore, SessionCredentialSink};
pub use error::BridgeError;
pub use event_buffer::{InboundEvent, InboundEventBuffer, DEFAULT_EVENT_BUFFER_CAPACITY};
pub use executor::{BackgroundTask, BridgeExecutor, BridgeExecutorConfig};
pub use http_client::{HttpMessagingClient, HttpMessagingClientConfig};
pub use keepalive::{KeepAliveConfig, KeepAliveHealth, KeepAliveSupervisor};
pub use media_store::{DownloadDirMediaStore, MediaStore, MediaStoreError};
pub use session_bridge::{
    BridgeHealth, BridgeStatus, CodeConfirmation, InboundSnapshot, SentMessage, SessionBridge,
    SessionBridgeConfig,
};

pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
