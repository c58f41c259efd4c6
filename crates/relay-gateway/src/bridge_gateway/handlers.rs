//! Route handlers for the bridge gateway.

use super::*;

fn require_param(value: Option<String>, name: &str) -> Result<String, BridgeApiError> {
    value
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| {
            BridgeApiError::bad_request(
                "validation_error",
                format!("missing required parameter '{name}'"),
            )
        })
}

pub(super) async fn handle_index(State(state): State<Arc<BridgeGatewayState>>) -> Json<IndexResponse> {
    Json(IndexResponse {
        status: "ok",
        public_url: state.config.public_url.clone(),
        endpoints: endpoint_descriptions(),
    })
}

pub(super) async fn handle_health(
    State(state): State<Arc<BridgeGatewayState>>,
) -> Json<HealthResponse> {
    let health = state.bridge.health();
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs(),
        buffered_events: health.buffered_events,
        buffer_capacity: health.buffer_capacity,
        bridge_running: health.running,
        auth_state: health.auth_status.as_str(),
        pending_login_since_unix_ms: health.pending_login_since_unix_ms,
        keepalive: health.keepalive,
    })
}

pub(super) async fn handle_status(
    State(state): State<Arc<BridgeGatewayState>>,
) -> Json<StatusResponse> {
    let status = state
        .run_bridge("status", |bridge| Ok(bridge.get_status()))
        .await;
    match status {
        Ok(status) => Json(StatusResponse {
            authorized: status.authorized,
            pending_phone: status.pending_phone,
        }),
        Err(error) => {
            warn!(error = %error.message, "status degraded to unauthorized");
            Json(StatusResponse {
                authorized: false,
                pending_phone: state.bridge.auth_snapshot().pending_phone,
            })
        }
    }
}

pub(super) async fn handle_login(
    State(state): State<Arc<BridgeGatewayState>>,
    Query(query): Query<LoginQuery>,
) -> Result<Json<LoginResponse>, BridgeApiError> {
    let phone = require_param(query.phone, "phone")?;
    let outcome = state
        .run_bridge("login", move |bridge| bridge.login(&phone))
        .await?;
    Ok(Json(LoginResponse::from(outcome)))
}

pub(super) async fn handle_code(
    State(state): State<Arc<BridgeGatewayState>>,
    Query(query): Query<CodeQuery>,
) -> Result<Response, BridgeApiError> {
    let code = require_param(query.code, "code")?;
    let phone = query.phone.filter(|phone| !phone.trim().is_empty());
    let bridge = Arc::clone(&state.bridge);
    let result = tokio::task::spawn_blocking(move || bridge.confirm_code(&code, phone.as_deref()))
        .await
        .map_err(|error| BridgeApiError::internal(format!("bridge call 'code' aborted: {error}")))?;

    match result {
        Ok(confirmation) => Ok(Json(CodeResponse {
            status: "authenticated",
            phone: Some(confirmation.phone),
            session_token: confirmation.session_token,
        })
        .into_response()),
        Err(BridgeError::TwoFactorRequired { phone }) => Ok(Json(CodeResponse {
            status: "password_required",
            phone: Some(phone),
            session_token: None,
        })
        .into_response()),
        Err(error) => Err(BridgeApiError::from(error)),
    }
}

pub(super) async fn handle_password(
    State(state): State<Arc<BridgeGatewayState>>,
    Query(query): Query<PasswordQuery>,
) -> Result<Json<CodeResponse>, BridgeApiError> {
    let password = query
        .password
        .filter(|password| !password.is_empty())
        .ok_or_else(|| {
            BridgeApiError::bad_request(
                "validation_error",
                "missing required parameter 'password'",
            )
        })?;
    let confirmation = state
        .run_bridge("password", move |bridge| bridge.confirm_password(&password))
        .await?;
    Ok(Json(CodeResponse {
        status: "authenticated",
        phone: Some(confirmation.phone),
        session_token: confirmation.session_token,
    }))
}

pub(super) async fn handle_send(
    State(state): State<Arc<BridgeGatewayState>>,
    Query(query): Query<SendQuery>,
) -> Result<Json<SendResponse>, BridgeApiError> {
    let chat_id = require_param(query.chat_id, "chat_id")?;
    let msg = query
        .msg
        .filter(|msg| !msg.is_empty())
        .ok_or_else(|| {
            BridgeApiError::bad_request("validation_error", "missing required parameter 'msg'")
        })?;
    let sent = state
        .run_bridge("send", move |bridge| bridge.send_message(&chat_id, &msg))
        .await?;
    Ok(Json(SendResponse {
        status: "sent",
        to: sent.to,
        msg: sent.text,
    }))
}

pub(super) async fn handle_get(State(state): State<Arc<BridgeGatewayState>>) -> Json<GetResponse> {
    let snapshot = state.bridge.inbound_events();
    Json(GetResponse {
        message: if snapshot.found { "found data" } else { "no data" },
        result: GetResult {
            quantity: snapshot.quantity,
            coincidences: snapshot.events,
        },
    })
}
