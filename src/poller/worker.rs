//! Per-account poll loop.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::config::AccountConfig;
use crate::error::CycleError;
use crate::mail::{MailFetcher, MessageSink};
use crate::poller::state::{WorkerState, WorkerStatus};

/// One account's polling task.
///
/// Runs fetch-and-dispatch cycles at the configured interval until the
/// shutdown signal arrives or a permanent error ends the loop. Cycles for
/// one account are strictly sequential; a cycle in flight always completes
/// before the shutdown signal is observed.
pub(crate) struct PollWorker {
    account: Arc<AccountConfig>,
    fetcher: Box<dyn MailFetcher>,
    sink: Arc<dyn MessageSink>,
    status: Arc<WorkerStatus>,
    shutdown: watch::Receiver<bool>,
}

impl PollWorker {
    pub(crate) fn new(
        account: Arc<AccountConfig>,
        fetcher: Box<dyn MailFetcher>,
        sink: Arc<dyn MessageSink>,
        status: Arc<WorkerStatus>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            account,
            fetcher,
            sink,
            status,
            shutdown,
        }
    }

    /// Run the poll loop to completion. Consumes the worker.
    pub(crate) async fn run(self) {
        let PollWorker {
            account,
            mut fetcher,
            sink,
            status,
            mut shutdown,
        } = self;

        status.transition(WorkerState::Running, None);
        info!(
            account = %account.id,
            interval_secs = account.poll_interval_secs,
            "Poll worker started"
        );

        // The first tick fires immediately, so a fresh worker polls right
        // away instead of idling a full interval.
        let mut ticker = interval(account.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A closed channel means the supervisor is gone; treat
                    // it the same as an explicit shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        status.transition(WorkerState::Stopping, None);
                        debug!(account = %account.id, "Shutdown signal observed");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match poll_cycle(&account, fetcher.as_mut(), sink.as_ref(), &status).await {
                        Ok(0) => {}
                        Ok(count) => {
                            debug!(account = %account.id, count, "Dispatched new messages");
                        }
                        Err(e) if e.is_permanent() => {
                            error!(
                                account = %account.id,
                                error = %e,
                                "Permanent fetch error, stopping worker"
                            );
                            status.transition(WorkerState::Failed, Some(e.to_string()));
                            return;
                        }
                        Err(e) => {
                            warn!(
                                account = %account.id,
                                error = %e,
                                "Poll cycle failed, retrying next interval"
                            );
                        }
                    }
                }
            }
        }

        status.transition(WorkerState::Stopped, None);
        info!(account = %account.id, "Poll worker stopped");
    }
}

/// One fetch-and-dispatch cycle. Returns the number of messages handed to
/// the sink.
async fn poll_cycle(
    account: &AccountConfig,
    fetcher: &mut dyn MailFetcher,
    sink: &dyn MessageSink,
    status: &WorkerStatus,
) -> Result<usize, CycleError> {
    let messages = fetcher.fetch_new().await?;
    let count = messages.len();
    if count > 0 {
        sink.deliver(&account.id, messages).await?;
    }
    status.touch();
    Ok(count)
}
