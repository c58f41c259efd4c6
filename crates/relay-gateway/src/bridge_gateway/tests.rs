use std::time::Duration;

use chrono::{TimeZone, Utc};
use relay_bridge::testing::ScriptedMessagingClient;
use relay_bridge::{
    AttachmentRef, BridgeExecutorConfig, DiscardSessionCredentials, DownloadDirMediaStore,
    KeepAliveConfig, RemoteMessage, SessionBridgeConfig,
};
use reqwest::Client;
use serde_json::Value;
use tempfile::TempDir;

use super::*;

struct TestGateway {
    addr: SocketAddr,
    client: Arc<ScriptedMessagingClient>,
    downloads: TempDir,
    handle: tokio::task::JoinHandle<()>,
}

impl TestGateway {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

fn bridge_config() -> SessionBridgeConfig {
    SessionBridgeConfig {
        executor: BridgeExecutorConfig {
            connect_timeout: Duration::from_secs(1),
            start_retry_backoff: Duration::from_millis(50),
            thread_name: "relay-gateway-test".to_string(),
        },
        operation_timeout: Duration::from_secs(2),
        status_timeout: Duration::from_secs(1),
        event_buffer_capacity: 50,
        public_url: "http://relay.test".to_string(),
        keepalive: KeepAliveConfig {
            interval: Duration::ZERO,
            ..KeepAliveConfig::default()
        },
        expose_session_token: false,
    }
}

async fn spawn_test_gateway(client: ScriptedMessagingClient) -> TestGateway {
    let downloads = tempfile::tempdir().expect("tempdir");
    let client = Arc::new(client);
    let bridge = Arc::new(SessionBridge::new(
        bridge_config(),
        client.clone(),
        Arc::new(DownloadDirMediaStore::new(downloads.path())),
        Arc::new(DiscardSessionCredentials),
    ));
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral listener");
    let addr = listener.local_addr().expect("resolve listener addr");
    let state = Arc::new(BridgeGatewayState::new(
        bridge,
        BridgeGatewayConfig {
            bind: addr,
            public_url: "http://relay.test".to_string(),
            download_dir: downloads.path().to_path_buf(),
        },
    ));
    let app = build_bridge_gateway_router(state);
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    TestGateway {
        addr,
        client,
        downloads,
        handle,
    }
}

async fn get_json(client: &Client, url: &str) -> (StatusCode, Value) {
    let response = client.get(url).send().await.expect("send request");
    let status = StatusCode::from_u16(response.status().as_u16()).expect("status");
    let body = response.json::<Value>().await.expect("json body");
    (status, body)
}

#[tokio::test]
async fn functional_index_and_health_describe_the_service() {
    let gateway = spawn_test_gateway(ScriptedMessagingClient::new()).await;
    let client = Client::new();

    let (status, index) = get_json(&client, &gateway.url(INDEX_ENDPOINT)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(index["status"], "ok");
    assert_eq!(index["public_url"], "http://relay.test");
    assert!(index["endpoints"][GET_ENDPOINT].is_string());

    let (status, health) = get_json(&client, &gateway.url(HEALTH_ENDPOINT)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["buffered_events"], 0);
    assert_eq!(health["auth_state"], "unauthenticated");
    assert!(health.get("pending_login_since_unix_ms").is_none());
    gateway.handle.abort();
}

#[tokio::test]
async fn integration_login_code_status_scenario() {
    let gateway =
        spawn_test_gateway(ScriptedMessagingClient::new().with_login_code("12345")).await;
    let client = Client::new();

    let (status, login) = get_json(
        &client,
        &gateway.url("/login?phone=%2B51987654321"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login["status"], "code_sent");
    assert_eq!(login["phone"], "+51987654321");

    let (_, pending) = get_json(&client, &gateway.url(STATUS_ENDPOINT)).await;
    assert_eq!(pending["authorized"], false);
    assert_eq!(pending["pendingPhone"], "+51987654321");

    let (status, code) = get_json(&client, &gateway.url("/code?code=12345")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(code["status"], "authenticated");
    assert!(code.get("sessionToken").is_none());

    let (_, after) = get_json(&client, &gateway.url(STATUS_ENDPOINT)).await;
    assert_eq!(after["authorized"], true);
    assert_eq!(after["pendingPhone"], Value::Null);

    let (_, again) = get_json(&client, &gateway.url("/login?phone=%2B51987654321")).await;
    assert_eq!(again["status"], "already_authorized");
    gateway.handle.abort();
}

#[tokio::test]
async fn functional_two_factor_code_reports_password_required_then_password_completes() {
    let gateway = spawn_test_gateway(
        ScriptedMessagingClient::new()
            .with_login_code("12345")
            .with_password("hunter2"),
    )
    .await;
    let client = Client::new();
    get_json(&client, &gateway.url("/login?phone=%2B51999")).await;

    let (status, code) = get_json(&client, &gateway.url("/code?code=12345")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(code["status"], "password_required");
    assert_eq!(code["phone"], "+51999");

    let (status, wrong) = get_json(&client, &gateway.url("/password?password=nope")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(wrong["code"], "auth_error");

    let (status, done) = get_json(&client, &gateway.url("/password?password=hunter2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "authenticated");
    gateway.handle.abort();
}

#[tokio::test]
async fn regression_code_without_login_is_bad_request() {
    let gateway = spawn_test_gateway(ScriptedMessagingClient::new()).await;
    let client = Client::new();

    let (status, body) = get_json(&client, &gateway.url("/code?code=12345")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], "no_pending_login");
    assert_eq!(body["retryable"], false);

    let (status, body) = get_json(&client, &gateway.url(CODE_ENDPOINT)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
    gateway.handle.abort();
}

#[tokio::test]
async fn functional_send_validates_params_and_reports_delivery() {
    let gateway = spawn_test_gateway(
        ScriptedMessagingClient::new()
            .authorized()
            .with_peer("lederdata_bot", 77),
    )
    .await;
    let client = Client::new();

    let (status, missing) = get_json(&client, &gateway.url("/send?msg=hola")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(missing["error"]
        .as_str()
        .is_some_and(|error| error.contains("chat_id")));

    let (status, sent) = get_json(
        &client,
        &gateway.url("/send?chat_id=%40lederdata_bot&msg=hola"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent["status"], "sent");
    assert_eq!(sent["to"], "@lederdata_bot");
    assert_eq!(sent["msg"], "hola");

    let (status, unknown) =
        get_json(&client, &gateway.url("/send?chat_id=%40ghost&msg=hola")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(unknown["code"], "entity_resolution_error");
    assert_eq!(gateway.client.sent_messages().len(), 1);
    gateway.handle.abort();
}

#[tokio::test]
async fn regression_unreachable_network_is_server_error_and_status_stays_soft() {
    let gateway =
        spawn_test_gateway(ScriptedMessagingClient::new().failing_connect("DC unreachable")).await;
    let client = Client::new();

    let (status, body) = get_json(&client, &gateway.url("/login?phone=%2B51999")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "network_error");
    assert_eq!(body["retryable"], true);

    let (status, body) = get_json(&client, &gateway.url(STATUS_ENDPOINT)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authorized"], false);
    gateway.handle.abort();
}

#[tokio::test]
async fn functional_get_returns_buffered_events_newest_first() {
    let gateway = spawn_test_gateway(ScriptedMessagingClient::new()).await;
    let client = Client::new();

    let (_, empty) = get_json(&client, &gateway.url(GET_ENDPOINT)).await;
    assert_eq!(empty["message"], "no data");
    assert_eq!(empty["result"]["quantity"], 0);

    let date = Utc.timestamp_opt(1_760_000_000, 0).single().expect("ts");
    for text in ["first", "second"] {
        gateway
            .client
            .emit(RemoteMessage {
                chat_id: Some(10),
                sender_id: Some(20),
                date: Some(date),
                text: Some(text.to_string()),
                attachment: None,
            })
            .await;
    }

    let (status, body) = get_json(&client, &gateway.url(GET_ENDPOINT)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "found data");
    assert_eq!(body["result"]["quantity"], 2);
    assert_eq!(body["result"]["coincidences"][0]["message"], "second");
    assert_eq!(body["result"]["coincidences"][1]["message"], "first");
    assert_eq!(body["result"]["coincidences"][0]["from_id"], 20);
    gateway.handle.abort();
}

#[tokio::test]
async fn integration_received_media_is_downloadable_through_files_route() {
    let gateway =
        spawn_test_gateway(ScriptedMessagingClient::new().with_media("F9", b"\x89PNG")).await;
    let client = Client::new();

    gateway
        .client
        .emit(RemoteMessage {
            chat_id: Some(1),
            sender_id: Some(2),
            date: None,
            text: None,
            attachment: Some(AttachmentRef {
                file_id: "F9".to_string(),
                file_name: Some("chart.png".to_string()),
                mime_type: Some("image/png".to_string()),
            }),
        })
        .await;

    let (_, body) = get_json(&client, &gateway.url(GET_ENDPOINT)).await;
    let url = body["result"]["coincidences"][0]["url"]
        .as_str()
        .expect("media url")
        .to_string();
    assert_eq!(url, "http://relay.test/files/F9_chart.png");
    assert!(gateway.downloads.path().join("F9_chart.png").exists());

    let response = client
        .get(gateway.url("/files/F9_chart.png"))
        .send()
        .await
        .expect("download");
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok()),
        Some("image/png")
    );
    assert_eq!(response.bytes().await.expect("bytes").as_ref(), b"\x89PNG");
    gateway.handle.abort();
}

#[tokio::test]
async fn regression_files_route_rejects_missing_and_hidden_names() {
    let gateway = spawn_test_gateway(ScriptedMessagingClient::new()).await;
    std::fs::write(gateway.downloads.path().join(".secret"), "x").expect("write hidden");
    let client = Client::new();

    for path in ["/files/absent.png", "/files/.secret", "/files/..%2F..%2Fetc%2Fpasswd"] {
        let (status, body) = get_json(&client, &gateway.url(path)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "path={path}");
        assert_eq!(body["status"], "error");
    }
    gateway.handle.abort();
}

#[tokio::test]
async fn functional_cors_allows_any_origin_for_get() {
    let gateway = spawn_test_gateway(ScriptedMessagingClient::new()).await;
    let response = Client::new()
        .get(gateway.url(HEALTH_ENDPOINT))
        .header("origin", "https://dashboard.example")
        .send()
        .await
        .expect("send");
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|value| value.to_str().ok()),
        Some("*")
    );
    gateway.handle.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn integration_concurrent_get_during_appends_never_fails() {
    let gateway = spawn_test_gateway(ScriptedMessagingClient::new()).await;
    let client = Client::new();

    let producer = {
        let scripted = Arc::clone(&gateway.client);
        tokio::spawn(async move {
            for seq in 0..200_i64 {
                scripted
                    .emit(RemoteMessage {
                        chat_id: Some(seq),
                        sender_id: Some(seq),
                        date: None,
                        text: Some(format!("event {seq}")),
                        attachment: None,
                    })
                    .await;
            }
        })
    };

    let readers = (0..100)
        .map(|_| {
            let client = client.clone();
            let url = gateway.url(GET_ENDPOINT);
            tokio::spawn(async move { get_json(&client, &url).await })
        })
        .collect::<Vec<_>>();
    for reader in readers {
        let (status, body) = reader.await.expect("reader task");
        assert_eq!(status, StatusCode::OK);
        let quantity = body["result"]["quantity"].as_u64().expect("quantity");
        assert!(quantity <= 50);
        let events = body["result"]["coincidences"].as_array().expect("events");
        assert_eq!(events.len() as u64, quantity);
        for event in events {
            let seq = event["chat_id"].as_i64().expect("chat id");
            assert_eq!(event["from_id"].as_i64(), Some(seq));
            assert_eq!(event["message"].as_str(), Some(format!("event {seq}").as_str()));
        }
    }
    producer.await.expect("producer");
    gateway.handle.abort();
}
