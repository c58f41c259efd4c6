//! Periodic connection supervision on the bridge execution context.
//!
//! Every tick re-establishes a dropped connection, refreshes the authorization
//! flag, and optionally probes the service's own `/health` endpoint so hosting
//! platforms that idle out quiet instances keep it warm. A cycle never fails;
//! problems are counted and logged.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use relay_core::current_unix_timestamp_ms;

use crate::client::MessagingClient;
use crate::executor::BackgroundTask;
use crate::lock_or_recover;

pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAliveConfig {
    /// Zero disables the loop.
    pub interval: Duration,
    pub self_probe_url: Option<String>,
    pub probe_timeout: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_KEEPALIVE_INTERVAL,
            self_probe_url: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeepAliveHealth {
    pub ticks: u64,
    pub last_tick_unix_ms: u64,
    pub connected: bool,
    pub authorized: bool,
    pub reconnects: u64,
    pub failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub struct KeepAliveSupervisor {
    config: KeepAliveConfig,
    probe_client: Option<reqwest::Client>,
    health: Mutex<KeepAliveHealth>,
    stop_tx: watch::Sender<bool>,
}

impl KeepAliveSupervisor {
    pub fn new(config: KeepAliveConfig) -> Self {
        let probe_client = config.self_probe_url.as_ref().and_then(|_| {
            reqwest::Client::builder()
                .timeout(config.probe_timeout)
                .build()
                .map_err(|error| warn!(error = %error, "keepalive probe client unavailable"))
                .ok()
        });
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            probe_client,
            health: Mutex::new(KeepAliveHealth::default()),
            stop_tx,
        }
    }

    pub fn config(&self) -> &KeepAliveConfig {
        &self.config
    }

    pub fn health(&self) -> KeepAliveHealth {
        lock_or_recover(&self.health).clone()
    }

    /// Ends a running loop at its next wakeup. Later loops exit immediately.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Adapts the supervisor into an executor background task.
    pub fn background_task(self: &Arc<Self>) -> BackgroundTask {
        let supervisor = Arc::clone(self);
        Arc::new(move |client| {
            let supervisor = Arc::clone(&supervisor);
            Box::pin(async move { supervisor.run(client).await })
        })
    }

    pub async fn run(&self, client: Arc<dyn MessagingClient>) {
        if self.config.interval.is_zero() {
            debug!("keepalive disabled");
            return;
        }
        let mut stop_rx = self.stop_tx.subscribe();
        if *stop_rx.borrow_and_update() {
            return;
        }
        let start = tokio::time::Instant::now() + self.config.interval;
        let mut interval = tokio::time::interval_at(start, self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let interval_ms = u64::try_from(self.config.interval.as_millis()).unwrap_or(u64::MAX);
        info!(interval_ms, "keepalive started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle(client.as_ref()).await;
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("keepalive stopped");
    }

    pub async fn run_cycle(&self, client: &dyn MessagingClient) {
        let mut errors = Vec::new();
        let mut reconnected = false;

        if !client.is_connected() {
            match client.connect().await {
                Ok(()) => {
                    reconnected = true;
                    info!("keepalive reconnected");
                }
                Err(error) => errors.push(format!("reconnect failed: {error}")),
            }
        }
        let connected = client.is_connected();

        let authorized = if connected {
            match client.is_authorized().await {
                Ok(authorized) => authorized,
                Err(error) => {
                    errors.push(format!("authorization check failed: {error}"));
                    false
                }
            }
        } else {
            false
        };

        if let Some(error) = self.probe_self().await {
            errors.push(error);
        }

        let mut health = lock_or_recover(&self.health);
        health.ticks = health.ticks.saturating_add(1);
        health.last_tick_unix_ms = current_unix_timestamp_ms();
        health.connected = connected;
        health.authorized = authorized;
        if reconnected {
            health.reconnects = health.reconnects.saturating_add(1);
        }
        if errors.is_empty() {
            debug!(connected, authorized, "keepalive cycle ok");
        } else {
            health.failures = health.failures.saturating_add(1);
            let joined = errors.join("; ");
            warn!(error = %joined, "keepalive cycle degraded");
            health.last_error = Some(joined);
        }
    }

    async fn probe_self(&self) -> Option<String> {
        let (Some(url), Some(http)) = (&self.config.self_probe_url, &self.probe_client) else {
            return None;
        };
        match http.get(url).send().await {
            Ok(response) if response.status().is_success() => None,
            Ok(response) => Some(format!(
                "self probe returned status {}",
                response.status().as_u16()
            )),
            Err(error) => Some(format!("self probe failed: {error}")),
        }
    }
}
