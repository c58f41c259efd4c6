use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use relay_bridge::{
    BridgeExecutorConfig, DownloadDirMediaStore, FileSessionStore, HttpMessagingClient,
    HttpMessagingClientConfig, KeepAliveConfig, SessionBridge, SessionBridgeConfig,
};
use relay_gateway::{run_bridge_gateway_server, BridgeGatewayConfig};
use tracing::{info, warn};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use crate::cli_args::Cli;

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

/// Everything startup needs, validated before any network activity.
#[derive(Debug, Clone)]
pub(crate) struct RelayConfig {
    pub(crate) gateway: BridgeGatewayConfig,
    pub(crate) client: HttpMessagingClientConfig,
    pub(crate) bridge: SessionBridgeConfig,
    pub(crate) session_file: std::path::PathBuf,
}

impl RelayConfig {
    pub(crate) fn from_cli(cli: &Cli) -> Result<Self> {
        if cli.api_id == 0 {
            bail!("--api-id / RELAY_API_ID must be a non-zero application id");
        }
        if cli.api_hash.trim().is_empty() {
            bail!("--api-hash / RELAY_API_HASH must not be empty");
        }
        if cli.event_buffer_capacity == 0 {
            bail!("--event-buffer-capacity must be greater than 0");
        }
        if cli.keepalive_interval_seconds == 0 {
            bail!("--keepalive-interval-seconds must be greater than 0");
        }
        let ip = cli
            .bind
            .parse::<IpAddr>()
            .with_context(|| format!("invalid --bind address '{}'", cli.bind))?;
        let public_url = cli.public_url.trim().trim_end_matches('/').to_string();
        if public_url.is_empty() {
            bail!("--public-url must not be empty");
        }

        let keepalive = KeepAliveConfig {
            interval: Duration::from_secs(cli.keepalive_interval_seconds),
            self_probe_url: cli
                .keepalive_self_probe
                .then(|| format!("{public_url}/health")),
            ..KeepAliveConfig::default()
        };

        Ok(Self {
            gateway: BridgeGatewayConfig {
                bind: SocketAddr::new(ip, cli.port),
                public_url: public_url.clone(),
                download_dir: cli.download_dir.clone(),
            },
            client: HttpMessagingClientConfig {
                api_base: cli.api_base.clone(),
                api_id: cli.api_id,
                api_hash: cli.api_hash.trim().to_string(),
                request_timeout: Duration::from_millis(cli.request_timeout_ms),
                ..HttpMessagingClientConfig::default()
            },
            bridge: SessionBridgeConfig {
                executor: BridgeExecutorConfig {
                    connect_timeout: Duration::from_millis(cli.connect_timeout_ms),
                    ..BridgeExecutorConfig::default()
                },
                operation_timeout: Duration::from_millis(cli.operation_timeout_ms),
                status_timeout: Duration::from_millis(cli.status_timeout_ms),
                event_buffer_capacity: cli.event_buffer_capacity,
                public_url,
                keepalive,
                expose_session_token: cli.expose_session_token,
            },
            session_file: cli.session_file.clone(),
        })
    }
}

pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = RelayConfig::from_cli(&cli)?;

    let session_store = FileSessionStore::new(config.session_file.clone());
    let stored_session = session_store.load()?;
    if stored_session.is_some() {
        info!(path = %session_store.path().display(), "loaded stored session");
    }
    let client = HttpMessagingClient::new(config.client.clone(), stored_session)
        .context("failed to build messaging client")?;

    let bridge = Arc::new(SessionBridge::new(
        config.bridge.clone(),
        Arc::new(client),
        Arc::new(DownloadDirMediaStore::new(config.gateway.download_dir.clone())),
        Arc::new(session_store),
    ));

    let starter = Arc::clone(&bridge);
    match tokio::task::spawn_blocking(move || starter.start()).await {
        Ok(Ok(())) => info!("session bridge connected"),
        Ok(Err(error)) => warn!(error = %error, "session bridge not connected yet; retrying on first use"),
        Err(error) => warn!(error = %error, "session bridge startup task failed"),
    }

    let serve_result = run_bridge_gateway_server(config.gateway, Arc::clone(&bridge)).await;

    let stopper = Arc::clone(&bridge);
    if let Err(error) = tokio::task::spawn_blocking(move || stopper.shutdown()).await {
        warn!(error = %error, "session bridge shutdown task failed");
    }
    serve_result
}
