use std::path::PathBuf;

use clap::{ArgAction, Parser};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "relay",
    about = "HTTP relay for a single long-lived messaging session",
    version
)]
pub struct Cli {
    #[arg(long, env = "RELAY_BIND", default_value = "0.0.0.0", help = "Address to bind the HTTP server on")]
    pub bind: String,

    #[arg(long, env = "PORT", default_value_t = 8080, help = "Port to bind the HTTP server on")]
    pub port: u16,

    #[arg(
        long = "api-id",
        env = "RELAY_API_ID",
        help = "Application id issued by the messaging network"
    )]
    pub api_id: i64,

    #[arg(
        long = "api-hash",
        env = "RELAY_API_HASH",
        hide_env_values = true,
        help = "Application secret issued by the messaging network"
    )]
    pub api_hash: String,

    #[arg(
        long = "api-base",
        env = "RELAY_API_BASE",
        default_value = "http://127.0.0.1:8081",
        help = "Base URL of the user-API gateway"
    )]
    pub api_base: String,

    #[arg(
        long = "public-url",
        env = "RELAY_PUBLIC_URL",
        default_value = "http://localhost",
        help = "Externally reachable base URL, used for file links and the keepalive self-probe"
    )]
    pub public_url: String,

    #[arg(
        long = "session-file",
        env = "RELAY_SESSION_FILE",
        default_value = "relay.session",
        help = "File holding the persisted session credential"
    )]
    pub session_file: PathBuf,

    #[arg(
        long = "download-dir",
        env = "RELAY_DOWNLOAD_DIR",
        default_value = "downloads",
        help = "Directory where received attachments are stored and served from"
    )]
    pub download_dir: PathBuf,

    #[arg(
        long = "keepalive-interval-seconds",
        env = "RELAY_KEEPALIVE_INTERVAL_SECONDS",
        default_value_t = 300,
        value_parser = parse_positive_u64,
        help = "Seconds between keepalive cycles"
    )]
    pub keepalive_interval_seconds: u64,

    #[arg(
        long = "keepalive-self-probe",
        env = "RELAY_KEEPALIVE_SELF_PROBE",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Probe {public-url}/health on every keepalive cycle"
    )]
    pub keepalive_self_probe: bool,

    #[arg(
        long = "event-buffer-capacity",
        env = "RELAY_EVENT_BUFFER_CAPACITY",
        default_value_t = 2000,
        value_parser = parse_positive_usize,
        help = "Maximum number of inbound events kept for polling"
    )]
    pub event_buffer_capacity: usize,

    #[arg(
        long = "connect-timeout-ms",
        env = "RELAY_CONNECT_TIMEOUT_MS",
        default_value_t = 20_000,
        value_parser = parse_positive_u64,
        help = "Bound on establishing the connection"
    )]
    pub connect_timeout_ms: u64,

    #[arg(
        long = "operation-timeout-ms",
        env = "RELAY_OPERATION_TIMEOUT_MS",
        default_value_t = 20_000,
        value_parser = parse_positive_u64,
        help = "Bound on login, code and send operations"
    )]
    pub operation_timeout_ms: u64,

    #[arg(
        long = "status-timeout-ms",
        env = "RELAY_STATUS_TIMEOUT_MS",
        default_value_t = 5_000,
        value_parser = parse_positive_u64,
        help = "Bound on the authorization check behind /status"
    )]
    pub status_timeout_ms: u64,

    #[arg(
        long = "request-timeout-ms",
        env = "RELAY_REQUEST_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "HTTP timeout for calls to the user-API gateway"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "expose-session-token",
        env = "RELAY_EXPOSE_SESSION_TOKEN",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Return the issued session credential in the /code and /password responses"
    )]
    pub expose_session_token: bool,
}
