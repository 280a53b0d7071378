//! Fleet lifecycle: launch, liveness, shutdown.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PollerConfig;
use crate::error::{ConfigError, Result, StartupError};
use crate::mail::{FetcherFactory, MessageSink};
use crate::poller::state::{WorkerSnapshot, WorkerStatus};
use crate::poller::worker::PollWorker;

/// Aggregate outcome of a `start()` attempt.
///
/// Launch failures are per-account and do not abort the rest of the fleet;
/// they are collected here instead of being raised.
#[derive(Debug, Default)]
pub struct StartReport {
    /// Number of workers launched.
    pub launched: usize,
    /// Per-account launch failures. These accounts have no worker.
    pub failures: Vec<StartupFailure>,
}

impl StartReport {
    /// True when every enabled account got a worker.
    pub fn all_launched(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One account's failed launch.
#[derive(Debug)]
pub struct StartupFailure {
    /// Account that failed to launch.
    pub account_id: String,
    /// Why the launch failed.
    pub error: StartupError,
}

/// Handle to one running polling task.
struct WorkerHandle {
    account_id: String,
    status: Arc<WorkerStatus>,
    task: JoinHandle<()>,
}

/// Fans worker completions into a watch channel carrying the running count.
///
/// Each worker task holds a [`RunningGuard`]; the count drops on task exit
/// through any path, including panic and abort.
struct FleetGauge {
    running: watch::Sender<usize>,
}

impl FleetGauge {
    fn new() -> (Arc<Self>, watch::Receiver<usize>) {
        let (running, rx) = watch::channel(0);
        (Arc::new(Self { running }), rx)
    }

    fn guard(self: &Arc<Self>) -> RunningGuard {
        self.running.send_modify(|n| *n += 1);
        RunningGuard {
            gauge: Arc::clone(self),
        }
    }
}

struct RunningGuard {
    gauge: Arc<FleetGauge>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.gauge.running.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Per-run fleet state, created by `start()` and torn down by `stop()`.
struct Fleet {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<WorkerHandle>,
    running_rx: watch::Receiver<usize>,
}

/// Owns and coordinates the per-account polling workers.
///
/// One explicitly constructed instance per process; the hosting entry
/// point owns it and drives `start()` / `wait_idle()` / `stop()`.
pub struct PollerSupervisor {
    config: PollerConfig,
    fetchers: Arc<dyn FetcherFactory>,
    sink: Arc<dyn MessageSink>,
    fleet: Mutex<Option<Fleet>>,
}

impl PollerSupervisor {
    /// Create a supervisor over a validated configuration.
    pub fn new(
        config: PollerConfig,
        fetchers: Arc<dyn FetcherFactory>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            config,
            fetchers,
            sink,
            fleet: Mutex::new(None),
        }
    }

    /// Launch one worker per enabled account, in config order.
    ///
    /// Idempotent: starting an already-started supervisor logs and returns
    /// an empty report. A per-account launch failure is recorded in the
    /// report and the remaining accounts launch normally.
    pub async fn start(&self) -> Result<StartReport> {
        let mut fleet_slot = self.fleet.lock().await;
        if fleet_slot.is_some() {
            info!("Supervisor already started, ignoring start()");
            return Ok(StartReport::default());
        }

        if self.config.enabled_count() == 0 {
            return Err(ConfigError::NoEnabledAccounts.into());
        }

        let (shutdown_tx, _) = watch::channel(false);
        let (gauge, running_rx) = FleetGauge::new();

        let mut report = StartReport::default();
        let mut handles = Vec::with_capacity(self.config.enabled_count());

        for account in self.config.enabled_accounts() {
            let fetcher = match self.fetchers.fetcher_for(account) {
                Ok(f) => f,
                Err(error) => {
                    warn!(account = %account.id, %error, "Failed to launch worker");
                    report.failures.push(StartupFailure {
                        account_id: account.id.clone(),
                        error,
                    });
                    continue;
                }
            };

            let status = Arc::new(WorkerStatus::new(account.id.clone()));
            let worker = PollWorker::new(
                Arc::new(account.clone()),
                fetcher,
                Arc::clone(&self.sink),
                Arc::clone(&status),
                shutdown_tx.subscribe(),
            );

            let running = gauge.guard();
            let task = tokio::spawn(async move {
                let _running = running;
                worker.run().await;
            });

            handles.push(WorkerHandle {
                account_id: account.id.clone(),
                status,
                task,
            });
            report.launched += 1;
        }

        info!(
            launched = report.launched,
            failed = report.failures.len(),
            "Poller supervisor started"
        );

        *fleet_slot = Some(Fleet {
            shutdown_tx,
            handles,
            running_rx,
        });
        Ok(report)
    }

    /// True while at least one worker is still running.
    ///
    /// Read-only snapshot; the hosting process uses it to decide whether
    /// the whole fleet has died and the process should exit.
    pub async fn is_healthy(&self) -> bool {
        let fleet = self.fleet.lock().await;
        match fleet.as_ref() {
            Some(f) => f.handles.iter().any(|h| h.status.state().is_running()),
            None => false,
        }
    }

    /// Per-account worker snapshots, in config order.
    pub async fn status(&self) -> Vec<WorkerSnapshot> {
        let fleet = self.fleet.lock().await;
        match fleet.as_ref() {
            Some(f) => f.handles.iter().map(|h| h.status.snapshot()).collect(),
            None => Vec::new(),
        }
    }

    /// Wait until no workers remain running.
    ///
    /// Completion is fanned in from the workers over a watch channel, so
    /// this suspends without polling. Returns immediately when the
    /// supervisor is not started.
    pub async fn wait_idle(&self) {
        let mut running_rx = {
            let fleet = self.fleet.lock().await;
            match fleet.as_ref() {
                Some(f) => f.running_rx.clone(),
                None => return,
            }
        };

        while *running_rx.borrow_and_update() > 0 {
            if running_rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Signal every worker to stop and wait for the fleet to drain.
    ///
    /// Waits are concurrent and bounded by the configured grace period;
    /// workers that overrun it are aborted and marked failed with reason
    /// `"shutdown-timeout"`. Returns the fleet's final snapshots.
    /// Idempotent: stopping an already-stopped supervisor is a no-op
    /// returning an empty list.
    pub async fn stop(&self) -> Vec<WorkerSnapshot> {
        let mut fleet_slot = self.fleet.lock().await;
        let Some(fleet) = fleet_slot.take() else {
            debug!("Supervisor already stopped, ignoring stop()");
            return Vec::new();
        };

        info!(workers = fleet.handles.len(), "Stopping poller supervisor");

        // Send only fails when every receiver is already gone, i.e. all
        // workers exited on their own.
        let _ = fleet.shutdown_tx.send(true);

        let grace = self.config.supervisor.shutdown_grace();
        let finals = join_all(
            fleet
                .handles
                .into_iter()
                .map(|handle| join_with_grace(handle, grace)),
        )
        .await;

        info!("Poller supervisor stopped");
        finals
    }
}

/// Wait for one worker to finish, aborting it once the grace period runs
/// out. Returns the worker's final snapshot.
async fn join_with_grace(mut handle: WorkerHandle, grace: Duration) -> WorkerSnapshot {
    match tokio::time::timeout(grace, &mut handle.task).await {
        Ok(Ok(())) => {}
        Ok(Err(join_err)) => {
            if join_err.is_panic() {
                warn!(account = %handle.account_id, "Worker panicked during shutdown");
                handle.status.force_fail("worker-panic");
            }
        }
        Err(_) => {
            handle.task.abort();
            let _ = handle.task.await;
            if handle.status.force_fail("shutdown-timeout") {
                warn!(
                    account = %handle.account_id,
                    grace_secs = grace.as_secs(),
                    "Worker did not stop within grace period, aborted"
                );
            }
        }
    }
    handle.status.snapshot()
}
