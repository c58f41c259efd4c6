//! Router wiring and server lifecycle.

use std::future::Future;

use super::*;

pub fn build_bridge_gateway_router(state: Arc<BridgeGatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);
    Router::new()
        .route(INDEX_ENDPOINT, get(handle_index))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .route(STATUS_ENDPOINT, get(handle_status))
        .route(LOGIN_ENDPOINT, get(handle_login))
        .route(CODE_ENDPOINT, get(handle_code))
        .route(PASSWORD_ENDPOINT, get(handle_password))
        .route(SEND_ENDPOINT, get(handle_send))
        .route(GET_ENDPOINT, get(handle_get))
        .route(FILES_ENDPOINT, get(handle_file_download))
        .layer(cors)
        .with_state(state)
}

/// Serves on an already-bound listener until `shutdown` resolves.
pub async fn serve_bridge_gateway<S>(
    listener: TcpListener,
    state: Arc<BridgeGatewayState>,
    shutdown: S,
) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let app = build_bridge_gateway_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("bridge gateway server exited unexpectedly")
}

/// Binds `config.bind` and serves until Ctrl-C.
pub async fn run_bridge_gateway_server(
    config: BridgeGatewayConfig,
    bridge: Arc<SessionBridge>,
) -> Result<()> {
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind bridge gateway on {}", config.bind))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound gateway address")?;
    info!(
        addr = %local_addr,
        public_url = %config.public_url,
        download_dir = %config.download_dir.display(),
        "bridge gateway listening"
    );

    let state = Arc::new(BridgeGatewayState::new(bridge, config));
    serve_bridge_gateway(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await
}
