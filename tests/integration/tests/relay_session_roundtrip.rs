use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use relay_bridge::{
    BridgeExecutorConfig, DownloadDirMediaStore, FileSessionStore, HttpMessagingClient,
    HttpMessagingClientConfig, KeepAliveConfig, SessionBridge, SessionBridgeConfig,
};
use relay_gateway::{serve_bridge_gateway, BridgeGatewayConfig, BridgeGatewayState};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct RunningRelay {
    addr: SocketAddr,
    bridge: Arc<SessionBridge>,
    workspace: TempDir,
    stop: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl RunningRelay {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn session_path(&self) -> std::path::PathBuf {
        self.workspace.path().join("relay.session")
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = self.server.await;
        let bridge = Arc::clone(&self.bridge);
        tokio::task::spawn_blocking(move || bridge.shutdown())
            .await
            .expect("bridge shutdown");
    }
}

async fn start_relay(upstream: &MockServer) -> RunningRelay {
    let workspace = tempfile::tempdir().expect("workspace");
    let session_store = FileSessionStore::new(workspace.path().join("relay.session"));
    let client = HttpMessagingClient::new(
        HttpMessagingClientConfig {
            api_base: upstream.base_url(),
            api_id: 611335,
            api_hash: "d524b414d21f4d37f08684c1df41ac9c".to_string(),
            request_timeout: Duration::from_secs(5),
            poll_timeout_seconds: 0,
            poll_retry_delay: Duration::from_millis(25),
            retry_max_attempts: 1,
            retry_base_delay_ms: 1,
        },
        session_store.load().expect("load session"),
    )
    .expect("client");

    let downloads = workspace.path().join("downloads");
    let bridge = Arc::new(SessionBridge::new(
        SessionBridgeConfig {
            executor: BridgeExecutorConfig {
                connect_timeout: Duration::from_secs(2),
                ..BridgeExecutorConfig::default()
            },
            operation_timeout: Duration::from_secs(5),
            status_timeout: Duration::from_secs(2),
            event_buffer_capacity: 100,
            public_url: "http://relay.test".to_string(),
            keepalive: KeepAliveConfig {
                interval: Duration::from_secs(300),
                ..KeepAliveConfig::default()
            },
            expose_session_token: true,
        },
        Arc::new(client),
        Arc::new(DownloadDirMediaStore::new(downloads.clone())),
        Arc::new(session_store),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = Arc::new(BridgeGatewayState::new(
        Arc::clone(&bridge),
        BridgeGatewayConfig {
            bind: addr,
            public_url: "http://relay.test".to_string(),
            download_dir: downloads,
        },
    ));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve_bridge_gateway(listener, state, async {
        let _ = stop_rx.await;
    }));
    tokio::time::sleep(Duration::from_millis(20)).await;

    RunningRelay {
        addr,
        bridge,
        workspace,
        stop: Some(stop_tx),
        server,
    }
}

fn mock_connection(upstream: &MockServer) {
    upstream.mock(|when, then| {
        when.method(POST).path("/connection.open");
        then.status(200).json_body(json!({"ok": true, "result": {}}));
    });
    upstream.mock(|when, then| {
        when.method(POST).path("/connection.close");
        then.status(200).json_body(json!({"ok": true}));
    });
}

async fn get_json(client: &reqwest::Client, url: &str) -> (u16, Value) {
    let response = client.get(url).send().await.expect("request");
    let status = response.status().as_u16();
    (status, response.json::<Value>().await.expect("json"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn integration_login_code_status_send_through_http_client() {
    let upstream = MockServer::start();
    mock_connection(&upstream);
    upstream.mock(|when, then| {
        when.method(POST).path("/updates.get");
        then.status(200)
            .delay(Duration::from_millis(50))
            .json_body(json!({"ok": true, "result": []}));
    });
    let send_code = upstream.mock(|when, then| {
        when.method(POST)
            .path("/auth.sendCode")
            .header("x-relay-api-id", "611335")
            .body_includes("\"phone\":\"+51987654321\"");
        then.status(200)
            .json_body(json!({"ok": true, "result": {"phone_code_hash": "h-1"}}));
    });
    let sign_in = upstream.mock(|when, then| {
        when.method(POST)
            .path("/auth.signIn")
            .body_includes("\"code\":\"12345\"")
            .body_includes("\"phone_code_hash\":\"h-1\"");
        then.status(200)
            .json_body(json!({"ok": true, "result": {"session": "sess-42"}}));
    });
    let auth_status = upstream.mock(|when, then| {
        when.method(POST)
            .path("/auth.status")
            .header("x-relay-session", "sess-42");
        then.status(200)
            .json_body(json!({"ok": true, "result": {"authorized": true}}));
    });
    let resolve = upstream.mock(|when, then| {
        when.method(POST)
            .path("/contacts.resolve")
            .body_includes("\"username\":\"lederdata_bot\"");
        then.status(200)
            .json_body(json!({"ok": true, "result": {"peer_id": 9001}}));
    });
    let send = upstream.mock(|when, then| {
        when.method(POST)
            .path("/messages.send")
            .header("x-relay-session", "sess-42")
            .body_includes("\"peer_id\":9001")
            .body_includes("\"text\":\"hola\"");
        then.status(200).json_body(json!({"ok": true, "result": {}}));
    });

    let relay = start_relay(&upstream).await;
    let http = reqwest::Client::new();

    let (status, login) = get_json(&http, &relay.url("/login?phone=%2B51987654321")).await;
    assert_eq!(status, 200);
    assert_eq!(login, json!({"status": "code_sent", "phone": "+51987654321"}));

    let (status, code) = get_json(&http, &relay.url("/code?code=12345")).await;
    assert_eq!(status, 200);
    assert_eq!(code["status"], "authenticated");
    assert_eq!(code["sessionToken"], "sess-42");
    assert_eq!(
        std::fs::read_to_string(relay.session_path())
            .expect("session file")
            .trim(),
        "sess-42"
    );

    let (status, current) = get_json(&http, &relay.url("/status")).await;
    assert_eq!(status, 200);
    assert_eq!(current, json!({"authorized": true, "pendingPhone": null}));

    let (status, sent) = get_json(
        &http,
        &relay.url("/send?chat_id=%40lederdata_bot&msg=hola"),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(
        sent,
        json!({"status": "sent", "to": "@lederdata_bot", "msg": "hola"})
    );

    let (status, missing) = get_json(&http, &relay.url("/send?msg=hola")).await;
    assert_eq!(status, 400);
    assert!(missing["error"].is_string());

    send_code.assert();
    sign_in.assert();
    auth_status.assert();
    resolve.assert();
    send.assert();
    relay.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn integration_polled_updates_surface_through_get_with_media_links() {
    let upstream = MockServer::start();
    mock_connection(&upstream);
    upstream.mock(|when, then| {
        when.method(POST)
            .path("/updates.get")
            .body_includes("\"offset\":0");
        then.status(200).json_body(json!({
            "ok": true,
            "result": [
                {"update_id": 1, "message": {"chat_id": 5, "sender_id": 6, "date": 1760000000, "text": "hola"}},
                {"update_id": 2, "message": {"chat_id": 5, "sender_id": 6, "date": 1760000001,
                    "attachment": {"file_id": "AgAD", "file_name": "voice.ogg", "mime_type": "audio/ogg"}}}
            ]
        }));
    });
    upstream.mock(|when, then| {
        when.method(POST)
            .path("/updates.get")
            .body_includes("\"offset\":3");
        then.status(200)
            .delay(Duration::from_millis(50))
            .json_body(json!({"ok": true, "result": []}));
    });
    upstream.mock(|when, then| {
        when.method(POST)
            .path("/media.download")
            .body_includes("\"file_id\":\"AgAD\"");
        then.status(200).body("OggS-bytes");
    });

    let relay = start_relay(&upstream).await;
    let http = reqwest::Client::new();
    tokio::task::spawn_blocking({
        let bridge = Arc::clone(&relay.bridge);
        move || bridge.start()
    })
    .await
    .expect("join")
    .expect("bridge start");

    let mut body = Value::Null;
    for _ in 0..100 {
        let (_, polled) = get_json(&http, &relay.url("/get")).await;
        if polled["result"]["quantity"] == 2 {
            body = polled;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(body["message"], "found data");
    let events = body["result"]["coincidences"].as_array().expect("events");
    assert_eq!(events[0]["url"], "http://relay.test/files/AgAD_voice.ogg");
    assert_eq!(events[1]["message"], "hola");
    assert_eq!(events[1]["date"], "2025-10-09T08:53:20Z");

    let response = http
        .get(relay.url("/files/AgAD_voice.ogg"))
        .send()
        .await
        .expect("download");
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.expect("body"), "OggS-bytes");
    relay.stop().await;
}
