//! Integration tests for the poller supervisor.
//!
//! Each test wires the supervisor to scripted fetchers and an in-memory
//! sink through the public API, then exercises the full fleet lifecycle:
//! start, liveness, partial failure, shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use mail_poller::config::{AccountConfig, PollerConfig};
use mail_poller::error::{FetchError, SinkError, StartupError};
use mail_poller::mail::{FetchedMessage, FetcherFactory, MailFetcher, MessageSink};
use mail_poller::poller::{PollerSupervisor, WorkerState};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// What a scripted fetcher does on every call.
#[derive(Clone)]
enum Behavior {
    /// One message per fetch, uid counting up.
    OneMessage,
    /// Empty inbox.
    Quiet,
    /// Transient failures for the first `n` calls, then one message each.
    FlakyFor(usize),
    /// Permanent failure on the first call.
    BadCredentials,
    /// Stall for the given duration, then return empty.
    Stall(Duration),
}

struct ScriptedFactory {
    behaviors: HashMap<String, Behavior>,
    fetches: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    fn new(behaviors: &[(&str, Behavior)]) -> Arc<Self> {
        Arc::new(Self {
            behaviors: behaviors
                .iter()
                .map(|(id, b)| (id.to_string(), b.clone()))
                .collect(),
            fetches: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl FetcherFactory for ScriptedFactory {
    fn fetcher_for(&self, account: &AccountConfig) -> Result<Box<dyn MailFetcher>, StartupError> {
        let behavior = self
            .behaviors
            .get(&account.id)
            .cloned()
            .unwrap_or(Behavior::Quiet);
        Ok(Box::new(ScriptedFetcher {
            account_id: account.id.clone(),
            username: account.username.clone(),
            behavior,
            calls: 0,
            fetches: Arc::clone(&self.fetches),
        }))
    }
}

struct ScriptedFetcher {
    account_id: String,
    username: String,
    behavior: Behavior,
    calls: usize,
    fetches: Arc<AtomicUsize>,
}

impl ScriptedFetcher {
    fn message(&self) -> FetchedMessage {
        FetchedMessage {
            uid: format!("{}-{}", self.account_id, self.calls),
            sender: "sender@example.org".to_string(),
            subject: Some("integration".to_string()),
            received_at: Utc::now(),
            raw: b"Subject: integration\r\n\r\nbody".to_vec(),
        }
    }
}

#[async_trait]
impl MailFetcher for ScriptedFetcher {
    async fn fetch_new(&mut self) -> Result<Vec<FetchedMessage>, FetchError> {
        self.calls += 1;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::OneMessage => Ok(vec![self.message()]),
            Behavior::Quiet => Ok(Vec::new()),
            Behavior::FlakyFor(n) if self.calls <= n => Err(FetchError::Connection {
                host: "imap.example.com".to_string(),
                reason: "connection reset by peer".to_string(),
            }),
            Behavior::FlakyFor(_) => Ok(vec![self.message()]),
            Behavior::BadCredentials => Err(FetchError::Auth {
                username: self.username.clone(),
            }),
            Behavior::Stall(delay) => {
                tokio::time::sleep(delay).await;
                Ok(Vec::new())
            }
        }
    }
}

/// Collects every delivered message uid, grouped by account.
#[derive(Default)]
struct CollectingSink {
    received: Mutex<HashMap<String, Vec<String>>>,
}

impl CollectingSink {
    fn uids_for(&self, account_id: &str) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .get(account_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageSink for CollectingSink {
    async fn deliver(
        &self,
        account_id: &str,
        messages: Vec<FetchedMessage>,
    ) -> Result<(), SinkError> {
        let mut received = self.received.lock().unwrap();
        let entry = received.entry(account_id.to_string()).or_default();
        entry.extend(messages.into_iter().map(|m| m.uid));
        Ok(())
    }
}

fn config_json() -> &'static str {
    r#"{
        "supervisor": { "shutdown_grace_secs": 2 },
        "accounts": [
            {"id": "alpha", "host": "imap.example.com", "username": "alpha@example.com",
             "password": "pw", "poll_interval_secs": 5},
            {"id": "beta", "host": "imap.example.com", "username": "beta@example.com",
             "password": "pw", "poll_interval_secs": 10},
            {"id": "gamma", "host": "imap.example.com", "username": "gamma@example.com",
             "password": "pw", "poll_interval_secs": 15},
            {"id": "dormant", "host": "imap.example.com", "username": "dormant@example.com",
             "password": "pw", "poll_interval_secs": 5, "enabled": false}
        ]
    }"#
}

fn build(
    behaviors: &[(&str, Behavior)],
) -> (PollerSupervisor, Arc<ScriptedFactory>, Arc<CollectingSink>) {
    let config = PollerConfig::from_json(config_json()).unwrap();
    let factory = ScriptedFactory::new(behaviors);
    let sink = Arc::new(CollectingSink::default());
    let sup = PollerSupervisor::new(
        config,
        Arc::clone(&factory) as Arc<dyn FetcherFactory>,
        Arc::clone(&sink) as Arc<dyn MessageSink>,
    );
    (sup, factory, sink)
}

/// Poll a condition until it holds, bounded by (virtual) time.
async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(120), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(start_paused = true)]
async fn fleet_polls_and_dispatches_per_account() {
    init_tracing();
    let (sup, _, sink) = build(&[
        ("alpha", Behavior::OneMessage),
        ("beta", Behavior::OneMessage),
        ("gamma", Behavior::Quiet),
    ]);

    let report = sup.start().await.unwrap();
    assert_eq!(report.launched, 3);
    assert!(report.all_launched());

    // The disabled account never gets a worker.
    let status = sup.status().await;
    assert_eq!(status.len(), 3);
    assert!(status.iter().all(|s| s.account_id != "dormant"));

    // alpha polls every 5s, beta every 10s: after ~21 virtual seconds alpha
    // has produced strictly more messages.
    wait_until(|| async { sink.uids_for("alpha").len() >= 5 }).await;
    assert!(sink.uids_for("alpha").len() > sink.uids_for("beta").len());
    assert!(sink.uids_for("gamma").is_empty());
    assert!(sink.uids_for("dormant").is_empty());

    let finals = sup.stop().await;
    assert!(finals.iter().all(|s| s.state == WorkerState::Stopped));
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_leaves_other_accounts_polling() {
    init_tracing();
    let (sup, _, sink) = build(&[
        ("alpha", Behavior::BadCredentials),
        ("beta", Behavior::OneMessage),
        ("gamma", Behavior::Quiet),
    ]);
    sup.start().await.unwrap();

    // alpha dies on its first cycle.
    wait_until(|| async {
        sup.status()
            .await
            .iter()
            .any(|s| s.account_id == "alpha" && s.state == WorkerState::Failed)
    })
    .await;

    let status = sup.status().await;
    for snapshot in &status {
        match snapshot.account_id.as_str() {
            "alpha" => {
                assert_eq!(snapshot.state, WorkerState::Failed);
                assert!(snapshot.reason.as_deref().unwrap().contains("alpha"));
            }
            _ => assert_eq!(snapshot.state, WorkerState::Running),
        }
    }
    assert!(sup.is_healthy().await);

    // beta keeps producing after alpha's death.
    let seen = sink.uids_for("beta").len();
    wait_until(|| async { sink.uids_for("beta").len() > seen }).await;
    assert!(sink.uids_for("alpha").is_empty());

    sup.stop().await;
}

#[tokio::test(start_paused = true)]
async fn transient_errors_never_trip_a_breaker() {
    init_tracing();
    let (sup, factory, sink) = build(&[
        ("alpha", Behavior::FlakyFor(6)),
        ("beta", Behavior::Quiet),
        ("gamma", Behavior::Quiet),
    ]);
    sup.start().await.unwrap();

    // Six failed cycles at 5s intervals, then deliveries resume.
    wait_until(|| async { !sink.uids_for("alpha").is_empty() }).await;

    let status = sup.status().await;
    let alpha = status.iter().find(|s| s.account_id == "alpha").unwrap();
    assert_eq!(alpha.state, WorkerState::Running);
    assert!(factory.fetch_count() >= 7);

    sup.stop().await;
}

#[tokio::test(start_paused = true)]
async fn host_observes_fleet_death_and_stops() {
    init_tracing();
    let (sup, _, _) = build(&[
        ("alpha", Behavior::BadCredentials),
        ("beta", Behavior::BadCredentials),
        ("gamma", Behavior::BadCredentials),
    ]);
    sup.start().await.unwrap();

    // The §6 exit behavior: wait for the fleet to die, then stop.
    tokio::time::timeout(Duration::from_secs(60), sup.wait_idle())
        .await
        .expect("wait_idle never resolved");
    assert!(!sup.is_healthy().await);

    let finals = sup.stop().await;
    assert_eq!(finals.len(), 3);
    assert!(finals.iter().all(|s| s.state == WorkerState::Failed));
}

#[tokio::test(start_paused = true)]
async fn overrunning_fetch_is_force_terminated() {
    init_tracing();
    let (sup, factory, _) = build(&[
        ("alpha", Behavior::Stall(Duration::from_secs(600))),
        ("beta", Behavior::Quiet),
        ("gamma", Behavior::Quiet),
    ]);
    sup.start().await.unwrap();

    // Wait until alpha is inside its stalled fetch.
    wait_until(|| async { factory.fetch_count() >= 3 }).await;

    let started = tokio::time::Instant::now();
    let finals = sup.stop().await;
    // Grace period is 2s; the whole fleet drains concurrently.
    assert!(
        started.elapsed() <= Duration::from_secs(3),
        "stop took {:?}",
        started.elapsed()
    );

    let alpha = finals.iter().find(|s| s.account_id == "alpha").unwrap();
    assert_eq!(alpha.state, WorkerState::Failed);
    assert_eq!(alpha.reason.as_deref(), Some("shutdown-timeout"));
    assert!(
        finals
            .iter()
            .filter(|s| s.account_id != "alpha")
            .all(|s| s.state == WorkerState::Stopped)
    );
}

#[tokio::test(start_paused = true)]
async fn lifecycle_is_idempotent_at_both_ends() {
    init_tracing();
    let (sup, _, _) = build(&[]);

    let first = sup.start().await.unwrap();
    assert_eq!(first.launched, 3);
    let second = sup.start().await.unwrap();
    assert_eq!(second.launched, 0);

    let finals = sup.stop().await;
    assert_eq!(finals.len(), 3);
    assert!(sup.stop().await.is_empty());
    assert!(!sup.is_healthy().await);
}
