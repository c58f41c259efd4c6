use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue};
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use relay_bridge::{
    BridgeExecutorConfig, DiscardSessionCredentials, DownloadDirMediaStore, HttpMessagingClient,
    HttpMessagingClientConfig, KeepAliveConfig, SessionBridge, SessionBridgeConfig,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

async fn close_connection(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

fn ok_envelope(result: Value) -> Json<Value> {
    Json(json!({"ok": true, "result": result}))
}

fn upstream_router(delivered: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route("/connection.open", post(|| async { ok_envelope(json!({})) }))
        .route("/connection.close", post(|| async { ok_envelope(json!({})) }))
        .route(
            "/updates.get",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                ok_envelope(json!([]))
            }),
        )
        .route(
            "/contacts.resolve",
            post(|| async { ok_envelope(json!({"peer_id": 9001})) }),
        )
        .route(
            "/messages.send",
            post(move || {
                let delivered = Arc::clone(&delivered);
                async move {
                    delivered.fetch_add(1, Ordering::SeqCst);
                    ok_envelope(json!({}))
                }
            }),
        )
        .layer(axum::middleware::map_response(close_connection))
}

async fn serve_upstream(listener: TcpListener, delivered: Arc<AtomicUsize>) -> JoinHandle<()> {
    let app = upstream_router(delivered);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    })
}

fn bridge_for(addr: SocketAddr, downloads: &std::path::Path) -> Arc<SessionBridge> {
    let client = HttpMessagingClient::new(
        HttpMessagingClientConfig {
            api_base: format!("http://{addr}"),
            api_id: 611335,
            api_hash: "d524b414d21f4d37f08684c1df41ac9c".to_string(),
            request_timeout: Duration::from_secs(2),
            poll_timeout_seconds: 0,
            poll_retry_delay: Duration::from_millis(25),
            retry_max_attempts: 1,
            retry_base_delay_ms: 1,
        },
        Some("sess-1".to_string()),
    )
    .expect("client");
    Arc::new(SessionBridge::new(
        SessionBridgeConfig {
            executor: BridgeExecutorConfig {
                connect_timeout: Duration::from_secs(2),
                ..BridgeExecutorConfig::default()
            },
            operation_timeout: Duration::from_secs(5),
            status_timeout: Duration::from_secs(2),
            event_buffer_capacity: 10,
            public_url: "http://relay.test".to_string(),
            keepalive: KeepAliveConfig {
                interval: Duration::from_secs(300),
                ..KeepAliveConfig::default()
            },
            expose_session_token: false,
        },
        Arc::new(client),
        Arc::new(DownloadDirMediaStore::new(downloads)),
        Arc::new(DiscardSessionCredentials),
    ))
}

async fn send(bridge: &Arc<SessionBridge>) -> Result<(), relay_bridge::BridgeError> {
    let bridge = Arc::clone(bridge);
    tokio::task::spawn_blocking(move || bridge.send_message("@lederdata_bot", "hola").map(|_| ()))
        .await
        .expect("join send")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn integration_bridge_recovers_after_upstream_outage_without_keepalive_tick() {
    let downloads = tempfile::tempdir().expect("downloads");
    let delivered = Arc::new(AtomicUsize::new(0));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    let upstream = serve_upstream(listener, Arc::clone(&delivered)).await;
    let bridge = bridge_for(addr, downloads.path());

    send(&bridge).await.expect("send before outage");
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    upstream.abort();
    let _ = upstream.await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let error = send(&bridge).await.expect_err("upstream down");
    assert_eq!(error.kind(), "network_error", "error={error}");

    let listener = TcpListener::bind(addr).await.expect("rebind upstream");
    let upstream = serve_upstream(listener, Arc::clone(&delivered)).await;

    send(&bridge).await.expect("send after upstream returns");
    assert_eq!(delivered.load(Ordering::SeqCst), 2);
    assert!(bridge.health().running);

    upstream.abort();
    let stopper = Arc::clone(&bridge);
    tokio::task::spawn_blocking(move || stopper.shutdown())
        .await
        .expect("bridge shutdown");
}
