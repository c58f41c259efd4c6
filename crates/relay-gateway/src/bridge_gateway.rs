//! Axum routes that expose the session bridge as plain `GET` endpoints.
//!
//! Handlers never call the bridge from an async task directly: every bridge
//! operation blocks its caller, so it is moved onto the blocking pool first.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use relay_bridge::{BridgeError, LoginOutcome, SessionBridge};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

mod endpoints;
mod files_runtime;
mod handlers;
mod server_bootstrap;
#[cfg(test)]
mod tests;
mod types;

use endpoints::*;
use files_runtime::handle_file_download;
use handlers::{
    handle_code, handle_get, handle_health, handle_index, handle_login, handle_password,
    handle_send, handle_status,
};
use types::{
    BridgeApiError, CodeQuery, CodeResponse, GetResponse, GetResult, HealthResponse,
    IndexResponse, LoginQuery, LoginResponse, PasswordQuery, SendQuery, SendResponse,
    StatusResponse,
};

pub use server_bootstrap::{
    build_bridge_gateway_router, run_bridge_gateway_server, serve_bridge_gateway,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeGatewayConfig {
    pub bind: SocketAddr,
    pub public_url: String,
    pub download_dir: PathBuf,
}

pub struct BridgeGatewayState {
    bridge: Arc<SessionBridge>,
    config: BridgeGatewayConfig,
    started_at: Instant,
}

impl BridgeGatewayState {
    pub fn new(bridge: Arc<SessionBridge>, config: BridgeGatewayConfig) -> Self {
        Self {
            bridge,
            config,
            started_at: Instant::now(),
        }
    }

    pub fn bridge(&self) -> &Arc<SessionBridge> {
        &self.bridge
    }

    pub fn config(&self) -> &BridgeGatewayConfig {
        &self.config
    }

    fn download_dir(&self) -> &Path {
        self.config.download_dir.as_path()
    }

    /// Runs a blocking bridge call on the blocking pool.
    async fn run_bridge<T, F>(&self, operation: &'static str, call: F) -> Result<T, BridgeApiError>
    where
        T: Send + 'static,
        F: FnOnce(&SessionBridge) -> Result<T, BridgeError> + Send + 'static,
    {
        let bridge = Arc::clone(&self.bridge);
        match tokio::task::spawn_blocking(move || call(&bridge)).await {
            Ok(result) => result.map_err(BridgeApiError::from),
            Err(error) => {
                warn!(operation, error = %error, "bridge call aborted");
                Err(BridgeApiError::internal(format!(
                    "bridge call '{operation}' aborted: {error}"
                )))
            }
        }
    }
}
