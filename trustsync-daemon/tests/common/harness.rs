//! Test harness for orchestrator E2E tests.
//!
//! Every collaborator is a fake the test drives by hand: pending provider and
//! enroller calls are parked on oneshot channels until the test answers them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use trustsync_core::{AppMetadata, EnrollmentResult, InvocationReason, PolicyReference};
use trustsync_daemon::prefs::{self, PrefStore};
use trustsync_daemon::providers::{
    AppMetadataProvider, EnrollRequest, Enroller, EnrollmentObserver, ProviderError,
    PushRegistrationProvider,
};
use trustsync_daemon::scheduler::{AttemptTrigger, Scheduler};
use trustsync_daemon::{
    Collaborators, Database, EnrollmentState, KeyRegistry, Orchestrator, OrchestratorConfig,
    OrchestratorHandle, SqlitePrefStore,
};

pub const REFRESH_PERIOD: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Upper bound on any single wait in a test.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Parked calls
// ============================================================================

/// Calls waiting for the test to answer them.
struct Parked<T> {
    pending: Mutex<VecDeque<oneshot::Sender<T>>>,
    arrived: Notify,
}

impl<T> Parked<T> {
    fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            arrived: Notify::new(),
        }
    }

    fn park(&self) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().push_back(tx);
        self.arrived.notify_one();
        rx
    }

    /// Answer the oldest parked call, waiting for one to arrive if needed.
    async fn answer(&self, value: T) {
        loop {
            let next = self.pending.lock().unwrap().pop_front();
            if let Some(tx) = next {
                let _ = tx.send(value);
                return;
            }
            self.arrived.notified().await;
        }
    }

    fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

// ============================================================================
// Fakes
// ============================================================================

/// Scheduler fake with the result bookkeeping of a real scheduler.
pub struct FakeScheduler {
    trigger: Mutex<Option<AttemptTrigger>>,
    last_success_time: Mutex<Option<DateTime<Utc>>>,
    consecutive_failures: Mutex<u32>,
    results: Mutex<Vec<EnrollmentResult>>,
    attempt_now_requests: Mutex<usize>,
}

impl FakeScheduler {
    pub fn new(last_success_time: Option<DateTime<Utc>>, consecutive_failures: u32) -> Self {
        Self {
            trigger: Mutex::new(None),
            last_success_time: Mutex::new(last_success_time),
            consecutive_failures: Mutex::new(consecutive_failures),
            results: Mutex::new(Vec::new()),
            attempt_now_requests: Mutex::new(0),
        }
    }

    /// Deliver an attempt request as the real scheduler would.
    pub fn run_attempt(&self, policy_reference: Option<PolicyReference>) {
        let trigger = self.trigger.lock().unwrap().clone();
        let delivered = trigger
            .expect("scheduler not started")
            .request(policy_reference);
        assert!(delivered, "orchestrator is gone");
    }

    pub fn attempt_now_requests(&self) -> usize {
        *self.attempt_now_requests.lock().unwrap()
    }

    pub fn results(&self) -> Vec<EnrollmentResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn is_started(&self) -> bool {
        self.trigger.lock().unwrap().is_some()
    }

    /// Whether the trigger still reaches a running orchestrator.
    pub fn trigger_delivers(&self) -> bool {
        let trigger = self.trigger.lock().unwrap().clone();
        trigger.is_some_and(|trigger| trigger.request(None))
    }
}

impl Scheduler for FakeScheduler {
    fn start(&self, trigger: AttemptTrigger) {
        *self.trigger.lock().unwrap() = Some(trigger);
    }

    fn request_attempt_now(&self) {
        *self.attempt_now_requests.lock().unwrap() += 1;
    }

    fn last_success_time(&self) -> Option<DateTime<Utc>> {
        *self.last_success_time.lock().unwrap()
    }

    fn time_to_next_attempt(&self) -> Duration {
        Duration::from_secs(60)
    }

    fn consecutive_failure_count(&self) -> u32 {
        *self.consecutive_failures.lock().unwrap()
    }

    fn refresh_period(&self) -> Duration {
        REFRESH_PERIOD
    }

    fn handle_result(&self, result: &EnrollmentResult) {
        if result.is_success() {
            *self.last_success_time.lock().unwrap() = Some(Utc::now());
            *self.consecutive_failures.lock().unwrap() = 0;
        } else {
            *self.consecutive_failures.lock().unwrap() += 1;
        }
        self.results.lock().unwrap().push(result.clone());
    }
}

pub struct FakePushProvider {
    current_id: Mutex<Option<String>>,
    calls: Parked<Result<String, ProviderError>>,
    register_calls: Mutex<usize>,
}

impl FakePushProvider {
    pub fn new(current_id: Option<&str>) -> Self {
        Self {
            current_id: Mutex::new(current_id.map(String::from)),
            calls: Parked::new(),
            register_calls: Mutex::new(0),
        }
    }

    pub async fn complete(&self, result: Result<String, ProviderError>) {
        self.calls.answer(result).await;
    }

    pub fn register_calls(&self) -> usize {
        *self.register_calls.lock().unwrap()
    }
}

#[async_trait]
impl PushRegistrationProvider for FakePushProvider {
    fn current_id(&self) -> Option<String> {
        self.current_id.lock().unwrap().clone()
    }

    async fn register(&self) -> Result<String, ProviderError> {
        *self.register_calls.lock().unwrap() += 1;
        let rx = self.calls.park();
        rx.await
            .unwrap_or_else(|_| Err(ProviderError::Unavailable("test dropped".into())))
    }
}

pub struct FakeMetadataProvider {
    calls: Parked<Result<AppMetadata, ProviderError>>,
    push_ids: Mutex<Vec<String>>,
}

impl FakeMetadataProvider {
    pub fn new() -> Self {
        Self {
            calls: Parked::new(),
            push_ids: Mutex::new(Vec::new()),
        }
    }

    pub async fn complete(&self, result: Result<AppMetadata, ProviderError>) {
        self.calls.answer(result).await;
    }

    pub fn push_ids(&self) -> Vec<String> {
        self.push_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl AppMetadataProvider for FakeMetadataProvider {
    async fn fetch(&self, push_id: &str) -> Result<AppMetadata, ProviderError> {
        self.push_ids.lock().unwrap().push(push_id.to_string());
        let rx = self.calls.park();
        rx.await
            .unwrap_or_else(|_| Err(ProviderError::Unavailable("test dropped".into())))
    }
}

pub struct FakeEnroller {
    calls: Parked<EnrollmentResult>,
    requests: Mutex<Vec<EnrollRequest>>,
    requested: Notify,
}

impl FakeEnroller {
    pub fn new() -> Self {
        Self {
            calls: Parked::new(),
            requests: Mutex::new(Vec::new()),
            requested: Notify::new(),
        }
    }

    /// The `index`-th request, waiting for it to be made if needed.
    pub async fn request(&self, index: usize) -> EnrollRequest {
        loop {
            let request = self.requests.lock().unwrap().get(index).cloned();
            if let Some(request) = request {
                return request;
            }
            self.requested.notified().await;
        }
    }

    pub async fn complete(&self, result: EnrollmentResult) {
        self.calls.answer(result).await;
    }

    pub fn requests(&self) -> Vec<EnrollRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn pending(&self) -> usize {
        self.calls.len()
    }
}

#[async_trait]
impl Enroller for FakeEnroller {
    async fn enroll(&self, request: EnrollRequest) -> EnrollmentResult {
        self.requests.lock().unwrap().push(request);
        self.requested.notify_one();
        let rx = self.calls.park();
        rx.await.unwrap_or_else(|_| {
            EnrollmentResult::from_code(trustsync_core::ResultCode::ErrorEnrollKeysRequestFailed)
        })
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    started: Mutex<usize>,
    finished: Mutex<Vec<bool>>,
    finished_changed: Notify,
}

impl RecordingObserver {
    pub fn started(&self) -> usize {
        *self.started.lock().unwrap()
    }

    pub fn finished(&self) -> Vec<bool> {
        self.finished.lock().unwrap().clone()
    }

    /// Wait until `count` attempts have finished.
    pub async fn wait_finished(&self, count: usize) {
        let wait = async {
            loop {
                let notified = self.finished_changed.notified();
                if self.finished.lock().unwrap().len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(WAIT_TIMEOUT, wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {count} finished attempts"));
    }
}

impl EnrollmentObserver for RecordingObserver {
    fn on_attempt_started(&self) {
        *self.started.lock().unwrap() += 1;
    }

    fn on_attempt_finished(&self, success: bool) {
        self.finished.lock().unwrap().push(success);
        self.finished_changed.notify_waiters();
    }
}

// ============================================================================
// Harness
// ============================================================================

pub fn app_metadata() -> AppMetadata {
    AppMetadata::new("instance-1", "1.0.0").with_feature("device_sync", true)
}

/// A database plus the fakes an orchestrator is built from.
pub struct TestEnv {
    pub dir: TempDir,
    pub db: Database,
    pub prefs: Arc<SqlitePrefStore>,
    pub scheduler: Arc<FakeScheduler>,
    pub push: Arc<FakePushProvider>,
    pub metadata: Arc<FakeMetadataProvider>,
    pub enroller: Arc<FakeEnroller>,
    pub observer: Arc<RecordingObserver>,
    pub config: OrchestratorConfig,
}

impl TestEnv {
    pub async fn new(scheduler: FakeScheduler, push: FakePushProvider) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("trustsync.db")).await.unwrap();
        let prefs = Arc::new(SqlitePrefStore::new(db.pool().clone()));

        Self {
            dir,
            db,
            prefs,
            scheduler: Arc::new(scheduler),
            push: Arc::new(push),
            metadata: Arc::new(FakeMetadataProvider::new()),
            enroller: Arc::new(FakeEnroller::new()),
            observer: Arc::new(RecordingObserver::default()),
            config: OrchestratorConfig::default(),
        }
    }

    /// Build and start an orchestrator over this environment.
    ///
    /// Can be called again after shutdown to simulate a process restart with
    /// the same database and scheduler.
    pub async fn start(&self) -> OrchestratorHandle {
        self.start_with_task().await.0
    }

    /// Like [`TestEnv::start`], also returning the orchestrator task.
    pub async fn start_with_task(&self) -> (OrchestratorHandle, JoinHandle<()>) {
        let registry = Arc::new(KeyRegistry::load(self.db.pool().clone()).await.unwrap());
        let collaborators = Collaborators {
            scheduler: self.scheduler.clone(),
            push_provider: self.push.clone(),
            metadata_provider: self.metadata.clone(),
            enroller: self.enroller.clone(),
        };

        let mut orchestrator =
            Orchestrator::new(self.config, collaborators, self.prefs.clone(), registry)
                .await
                .unwrap();
        orchestrator.add_observer(self.observer.clone());

        orchestrator.start()
    }

    pub async fn persisted_reason(&self) -> InvocationReason {
        prefs::load_failure_recovery_reason(&*self.prefs)
            .await
            .unwrap()
    }

    pub async fn set_string_pref(&self, key: &str, value: &str) {
        self.prefs.set_string(key, value).await.unwrap();
    }
}

/// Wait until the orchestrator reports `state`.
pub async fn wait_for_state(handle: &OrchestratorHandle, state: EnrollmentState) {
    let mut rx = handle.subscribe_state();
    tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .unwrap();
}
