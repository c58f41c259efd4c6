//! Dedicated execution context that owns the remote connection.
//!
//! The executor runs one OS thread hosting a current-thread Tokio runtime. The
//! connection is only ever driven from that thread: callers hand operations
//! over a channel and block on a bounded reply. Startup (thread spawn plus the
//! initial connect) is lazy and single-flight: the first caller marks the start
//! slot as starting and spawns the worker, and every caller then waits on a
//! condition variable for the worker's report. Each caller's wait is bounded by
//! its own deadline; a caller that gives up leaves the startup running for the
//! next one. Before each operation the worker re-establishes a dropped
//! connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::client::MessagingClient;
use crate::error::BridgeError;
use crate::lock_or_recover;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_START_RETRY_BACKOFF: Duration = Duration::from_secs(2);
const STARTUP_REPLY_GRACE: Duration = Duration::from_secs(1);
const DEFAULT_WORKER_THREAD_NAME: &str = "relay-bridge";

type BoxedOperation = Box<dyn FnOnce(Arc<dyn MessagingClient>) -> BoxFuture<'static, ()> + Send>;

/// Long-running task spawned on the context after every successful connect.
pub type BackgroundTask =
    Arc<dyn Fn(Arc<dyn MessagingClient>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeExecutorConfig {
    /// Bound on the initial connect and on each on-demand reconnect.
    pub connect_timeout: Duration,
    /// How long a failed startup is reported to new callers before retrying.
    pub start_retry_backoff: Duration,
    pub thread_name: String,
}

impl Default for BridgeExecutorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            start_retry_backoff: DEFAULT_START_RETRY_BACKOFF,
            thread_name: DEFAULT_WORKER_THREAD_NAME.to_string(),
        }
    }
}

enum WorkerCommand {
    Run(BoxedOperation),
    Shutdown,
}

struct WorkerHandle {
    commands: UnboundedSender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    fn is_alive(&self) -> bool {
        !self.commands.is_closed()
    }

    fn has_exited(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn stop(mut self, join: bool) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        let Some(thread) = self.thread.take() else {
            return;
        };
        if join && thread.thread().id() != std::thread::current().id() {
            if thread.join().is_err() {
                warn!("bridge worker thread panicked during shutdown");
            }
        }
    }
}

enum ExecutorState {
    Idle,
    Starting { generation: u64, worker: WorkerHandle },
    Running(WorkerHandle),
    Failed { at: Instant, error: BridgeError },
    ShutDown,
}

/// Shared between callers and the worker thread, which reports its own startup.
struct StartSlot {
    state: Mutex<ExecutorState>,
    changed: Condvar,
    generations: AtomicU64,
}

impl StartSlot {
    /// Records a worker's startup result and wakes every waiting caller.
    /// Returns whether that worker is still the current one and may serve.
    fn report_started(&self, generation: u64, result: Result<(), BridgeError>) -> bool {
        let mut state = lock_or_recover(&self.state);
        let accepted = match std::mem::replace(&mut *state, ExecutorState::Idle) {
            ExecutorState::Starting {
                generation: current,
                worker,
            } if current == generation => match result {
                Ok(()) => {
                    info!("bridge worker started");
                    *state = ExecutorState::Running(worker);
                    true
                }
                Err(error) => {
                    warn!(error = %error, "bridge startup failed");
                    *state = ExecutorState::Failed {
                        at: Instant::now(),
                        error,
                    };
                    false
                }
            },
            other => {
                *state = other;
                false
            }
        };
        self.changed.notify_all();
        accepted
    }
}

enum StartStep {
    Ready(UnboundedSender<WorkerCommand>),
    Fail(BridgeError),
    Wait,
    Spawn,
}

pub struct BridgeExecutor {
    client: Arc<dyn MessagingClient>,
    config: BridgeExecutorConfig,
    background_tasks: Vec<BackgroundTask>,
    slot: Arc<StartSlot>,
}

impl BridgeExecutor {
    pub fn new(client: Arc<dyn MessagingClient>, config: BridgeExecutorConfig) -> Self {
        Self {
            client,
            config,
            background_tasks: Vec::new(),
            slot: Arc::new(StartSlot {
                state: Mutex::new(ExecutorState::Idle),
                changed: Condvar::new(),
                generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_background_task(mut self, task: BackgroundTask) -> Self {
        self.background_tasks.push(task);
        self
    }

    pub fn config(&self) -> &BridgeExecutorConfig {
        &self.config
    }

    /// Starts the context if needed and waits for the initial connect.
    /// Idempotent and safe to call from many threads.
    pub fn start(&self) -> Result<(), BridgeError> {
        let timeout = self.config.connect_timeout.saturating_add(STARTUP_REPLY_GRACE);
        self.ensure_started("connect", timeout, deadline_after(timeout))
            .map(|_| ())
    }

    /// Non-blocking liveness probe; reports `false` while a startup is in flight.
    pub fn is_running(&self) -> bool {
        let state = match self.slot.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        matches!(&*state, ExecutorState::Running(worker) if worker.is_alive())
    }

    /// Runs `operation` on the context and blocks the caller for at most `timeout`,
    /// lazy startup included.
    ///
    /// A timed-out operation keeps running in the background; its late result is
    /// discarded. Must not be called from the context itself.
    pub fn submit<T, F, Fut>(
        &self,
        operation_name: &str,
        timeout: Duration,
        operation: F,
    ) -> Result<T, BridgeError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn MessagingClient>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T, BridgeError>> + Send + 'static,
    {
        let deadline = deadline_after(timeout);
        let commands = self.ensure_started(operation_name, timeout, deadline)?;
        let (reply_tx, reply_rx) = sync_channel::<Result<T, BridgeError>>(1);
        let job: BoxedOperation = Box::new(move |client| {
            Box::pin(async move {
                let result = operation(client).await;
                // The caller may have timed out and dropped the receiver.
                let _ = reply_tx.send(result);
            })
        });
        commands
            .send(WorkerCommand::Run(job))
            .map_err(|_| BridgeError::network("bridge worker is not running"))?;

        match reply_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                debug!(operation = operation_name, "bridge operation timed out");
                Err(timeout_error(operation_name, timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::network(format!(
                "bridge worker stopped before '{operation_name}' completed"
            ))),
        }
    }

    /// Disconnects the client on the context and joins the worker thread.
    pub fn shutdown(&self) {
        let previous = {
            let mut state = lock_or_recover(&self.slot.state);
            std::mem::replace(&mut *state, ExecutorState::ShutDown)
        };
        self.slot.changed.notify_all();
        if let ExecutorState::Running(worker) | ExecutorState::Starting { worker, .. } = previous {
            info!("stopping bridge worker");
            worker.stop(true);
        }
    }

    fn ensure_started(
        &self,
        operation_name: &str,
        timeout: Duration,
        deadline: Instant,
    ) -> Result<UnboundedSender<WorkerCommand>, BridgeError> {
        let mut state = lock_or_recover(&self.slot.state);
        loop {
            let step = match &*state {
                ExecutorState::Running(worker) if worker.is_alive() => {
                    StartStep::Ready(worker.commands.clone())
                }
                ExecutorState::Failed { at, error }
                    if at.elapsed() < self.config.start_retry_backoff =>
                {
                    StartStep::Fail(error.clone())
                }
                ExecutorState::ShutDown => {
                    StartStep::Fail(BridgeError::network("bridge is shut down"))
                }
                // A worker that died before reporting is replaced.
                ExecutorState::Starting { worker, .. } if !worker.has_exited() => StartStep::Wait,
                _ => StartStep::Spawn,
            };

            match step {
                StartStep::Ready(commands) => return Ok(commands),
                StartStep::Fail(error) => return Err(error),
                StartStep::Wait => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        debug!(operation = operation_name, "bridge still starting at deadline");
                        return Err(timeout_error(operation_name, timeout));
                    }
                    state = match self.slot.changed.wait_timeout(state, remaining) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    };
                }
                StartStep::Spawn => {
                    if let ExecutorState::Running(worker) =
                        std::mem::replace(&mut *state, ExecutorState::Idle)
                    {
                        warn!("bridge worker exited unexpectedly; restarting");
                        worker.stop(false);
                    }
                    match self.spawn_worker() {
                        Ok((generation, worker)) => {
                            *state = ExecutorState::Starting { generation, worker };
                        }
                        Err(error) => {
                            warn!(error = %error, "bridge startup failed");
                            *state = ExecutorState::Failed {
                                at: Instant::now(),
                                error: error.clone(),
                            };
                            self.slot.changed.notify_all();
                            return Err(error);
                        }
                    }
                }
            }
        }
    }

    /// Spawns the worker thread without waiting for it; the worker reports
    /// through the start slot once its connect settles.
    fn spawn_worker(&self) -> Result<(u64, WorkerHandle), BridgeError> {
        let generation = self
            .slot
            .generations
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1);
        let (command_tx, command_rx) = unbounded_channel();
        let context = WorkerContext {
            client: Arc::clone(&self.client),
            tasks: self.background_tasks.clone(),
            connect_timeout: self.config.connect_timeout,
            slot: Arc::clone(&self.slot),
            generation,
        };

        let thread = std::thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || run_worker(context, command_rx))
            .map_err(|error| {
                BridgeError::network(format!("failed to spawn bridge worker thread: {error}"))
            })?;
        Ok((
            generation,
            WorkerHandle {
                commands: command_tx,
                thread: Some(thread),
            },
        ))
    }
}

impl Drop for BridgeExecutor {
    fn drop(&mut self) {
        let previous = std::mem::replace(
            &mut *lock_or_recover(&self.slot.state),
            ExecutorState::ShutDown,
        );
        self.slot.changed.notify_all();
        if let ExecutorState::Running(worker) | ExecutorState::Starting { worker, .. } = previous {
            worker.stop(false);
        }
    }
}

struct WorkerContext {
    client: Arc<dyn MessagingClient>,
    tasks: Vec<BackgroundTask>,
    connect_timeout: Duration,
    slot: Arc<StartSlot>,
    generation: u64,
}

fn run_worker(context: WorkerContext, mut commands: UnboundedReceiver<WorkerCommand>) {
    let WorkerContext {
        client,
        tasks,
        connect_timeout,
        slot,
        generation,
    } = context;
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            slot.report_started(
                generation,
                Err(BridgeError::network(format!(
                    "failed to build bridge runtime: {error}"
                ))),
            );
            return;
        }
    };

    runtime.block_on(async move {
        let connected = connect_within(client.as_ref(), connect_timeout).await;
        let was_connected = connected.is_ok();
        if !slot.report_started(generation, connected) {
            if was_connected {
                // Shut down while connecting; do not leave the connection open.
                let _ = client.disconnect().await;
            }
            return;
        }

        let reconnect_gate = Arc::new(AsyncMutex::new(()));
        for task in &tasks {
            tokio::spawn(task(Arc::clone(&client)));
        }
        while let Some(command) = commands.recv().await {
            match command {
                WorkerCommand::Run(operation) => {
                    let client = Arc::clone(&client);
                    let gate = Arc::clone(&reconnect_gate);
                    tokio::spawn(async move {
                        reconnect_if_needed(client.as_ref(), &gate, connect_timeout).await;
                        operation(client).await;
                    });
                }
                WorkerCommand::Shutdown => break,
            }
        }
        if let Err(error) = client.disconnect().await {
            warn!(error = %error, "bridge disconnect failed during shutdown");
        }
    });
}

async fn connect_within(
    client: &dyn MessagingClient,
    timeout: Duration,
) -> Result<(), BridgeError> {
    match tokio::time::timeout(timeout, client.connect()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(BridgeError::network(format!("connect failed: {error}"))),
        Err(_) => Err(timeout_error("connect", timeout)),
    }
}

/// Single-flight reconnect ahead of an operation; the operation then reports
/// its own error if the link is still down.
async fn reconnect_if_needed(
    client: &dyn MessagingClient,
    gate: &AsyncMutex<()>,
    timeout: Duration,
) {
    if client.is_connected() {
        return;
    }
    let _guard = gate.lock().await;
    if client.is_connected() {
        return;
    }
    match connect_within(client, timeout).await {
        Ok(()) => info!("bridge reconnected on demand"),
        Err(error) => warn!(error = %error, "on-demand reconnect failed"),
    }
}

fn timeout_error(operation: &str, timeout: Duration) -> BridgeError {
    BridgeError::Timeout {
        operation: operation.to_string(),
        timeout_ms: duration_ms(timeout),
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 60 * 60))
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
