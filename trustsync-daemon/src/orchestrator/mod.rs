//! Enrollment orchestrator.
//!
//! Drives one enrollment attempt at a time through its prerequisites:
//!
//! ```text
//! Idle -> WaitingForPushRegistration -> WaitingForAppMetadata -> WaitingForEnrollmentResult -> Idle
//! ```
//!
//! Steps whose input is already cached are skipped. The two waiting-for-dependency
//! states are bounded by a timeout. Every attempt ends in exactly one result,
//! which is persisted (as the failure-recovery reason), reported to the
//! scheduler and announced to observers.
//!
//! # Concurrency
//!
//! A single tokio task owns all orchestrator state. Collaborator calls run on
//! their own tasks and post their outcome back through the same channel,
//! tagged with the attempt token that was current when they were issued.
//! Finishing an attempt advances the token, so late results are dropped.
//!
//! Only [`OrchestratorHandle`]s keep the channel open. The task stops on
//! [`OrchestratorHandle::shutdown`] or once the last handle is dropped.

mod handle;
mod state;
mod timer;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use trustsync_core::{
    AppMetadata, ClientMetadata, EnrollmentResult, InvocationReason, PolicyReference, ResultCode,
    TelemetryEvent, LEGACY_KEY_HANDLE,
};

pub use handle::OrchestratorHandle;
pub use state::{EnrollmentState, EnrollmentStatus};

use self::state::{is_enrollment_valid, AttemptContext};
use self::timer::StepTimer;
use crate::db::StoreError;
use crate::prefs::{self, PrefStore};
use crate::providers::{
    AppMetadataProvider, EnrollRequest, Enroller, EnrollmentObserver, ProviderError,
    PushRegistrationProvider,
};
use crate::registry::{KeyRegistry, RegistryError};
use crate::scheduler::{AttemptTrigger, Scheduler};
use crate::telemetry;

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced by the orchestrator API.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("orchestrator has shut down")]
    Closed,
    #[error("preference store error: {0}")]
    Store(#[from] StoreError),
    #[error("key registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Per-step timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub push_registration_timeout: Duration,
    pub app_metadata_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            push_registration_timeout: DEFAULT_STEP_TIMEOUT,
            app_metadata_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }
}

/// The external parties an attempt depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub scheduler: Arc<dyn Scheduler>,
    pub push_provider: Arc<dyn PushRegistrationProvider>,
    pub metadata_provider: Arc<dyn AppMetadataProvider>,
    pub enroller: Arc<dyn Enroller>,
}

/// Messages processed by the orchestrator task.
pub(crate) enum Event {
    // Requests
    ForceEnrollment(InvocationReason),
    AttemptRequested(Option<PolicyReference>),
    Status(oneshot::Sender<EnrollmentStatus>),
    Shutdown,

    // Collaborator outcomes
    PushRegistered {
        token: u64,
        result: Result<String, ProviderError>,
    },
    AppMetadataFetched {
        token: u64,
        result: Result<AppMetadata, ProviderError>,
    },
    EnrollmentFinished {
        token: u64,
        result: EnrollmentResult,
    },
    TimerFired {
        seq: u64,
    },
}

/// A configured orchestrator that has not been started yet.
pub struct Orchestrator {
    config: OrchestratorConfig,
    collaborators: Collaborators,
    prefs: Arc<dyn PrefStore>,
    registry: Arc<KeyRegistry>,
    observers: Vec<Arc<dyn EnrollmentObserver>>,
}

impl Orchestrator {
    /// Build an orchestrator and reconcile the legacy user key pair.
    pub async fn new(
        config: OrchestratorConfig,
        collaborators: Collaborators,
        prefs: Arc<dyn PrefStore>,
        registry: Arc<KeyRegistry>,
    ) -> Result<Self, OrchestratorError> {
        let legacy = prefs::load_legacy_key_pair(prefs.as_ref()).await?;
        let key_pair_state = registry
            .migrate_legacy_pair_if_needed(legacy.as_ref(), LEGACY_KEY_HANDLE)
            .await?;
        tracing::info!(state = %key_pair_state, "User key pair reconciled");

        Ok(Self {
            config,
            collaborators,
            prefs,
            registry,
            observers: Vec::new(),
        })
    }

    pub fn add_observer(&mut self, observer: Arc<dyn EnrollmentObserver>) {
        self.observers.push(observer);
    }

    /// Spawn the orchestrator task and start the scheduler.
    pub fn start(self) -> (OrchestratorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(EnrollmentState::Idle);

        self.collaborators
            .scheduler
            .start(AttemptTrigger::new(tx.downgrade()));

        let actor = Actor {
            config: self.config,
            collaborators: self.collaborators,
            prefs: self.prefs,
            observers: self.observers,
            tx: tx.downgrade(),
            state_tx,
            state: EnrollmentState::Idle,
            token: 0,
            timer: StepTimer::default(),
            context: AttemptContext::default(),
            forced_reason: None,
            push_id: None,
            app_metadata: None,
        };

        let handle = OrchestratorHandle::new(tx, state_rx, Arc::clone(&self.registry));
        (handle, tokio::spawn(actor.run(rx)))
    }
}

/// Deliver an event to the task unless every handle has been dropped.
pub(crate) fn post(tx: &mpsc::WeakUnboundedSender<Event>, event: Event) {
    if let Some(tx) = tx.upgrade() {
        let _ = tx.send(event);
    }
}

// ============================================================================
// Actor
// ============================================================================

struct Actor {
    config: OrchestratorConfig,
    collaborators: Collaborators,
    prefs: Arc<dyn PrefStore>,
    observers: Vec<Arc<dyn EnrollmentObserver>>,
    tx: mpsc::WeakUnboundedSender<Event>,
    state_tx: watch::Sender<EnrollmentState>,

    state: EnrollmentState,
    /// Identifies the current attempt. Advanced at start and at finish.
    token: u64,
    timer: StepTimer,
    context: AttemptContext,
    forced_reason: Option<InvocationReason>,

    // Cached for the life of the process
    push_id: Option<String>,
    app_metadata: Option<AppMetadata>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Event>) {
        tracing::debug!("Enrollment orchestrator started");

        while let Some(event) = rx.recv().await {
            match event {
                Event::Shutdown => break,
                Event::ForceEnrollment(reason) => self.force_enrollment(reason),
                Event::AttemptRequested(policy_reference) => {
                    self.start_attempt(policy_reference).await
                }
                Event::Status(reply) => {
                    let _ = reply.send(self.status());
                }
                Event::PushRegistered { token, result } => {
                    self.on_push_registered(token, result).await
                }
                Event::AppMetadataFetched { token, result } => {
                    self.on_app_metadata_fetched(token, result).await
                }
                Event::EnrollmentFinished { token, result } => {
                    self.on_enrollment_finished(token, result).await
                }
                Event::TimerFired { seq } => self.on_timer_fired(seq).await,
            }
        }

        self.timer.cancel();
        tracing::debug!(state = %self.state, "Enrollment orchestrator stopped");
    }

    fn force_enrollment(&mut self, reason: InvocationReason) {
        if !self.state.is_idle() {
            tracing::warn!(
                reason = %reason,
                state = %self.state,
                "Enrollment already in progress; ignoring forced request"
            );
            return;
        }

        // A later force replaces an earlier one that has not started yet
        tracing::info!(reason = %reason, replaced = ?self.forced_reason, "Forcing enrollment");
        self.forced_reason = Some(reason);
        self.collaborators.scheduler.request_attempt_now();
    }

    fn status(&self) -> EnrollmentStatus {
        let scheduler = &self.collaborators.scheduler;
        let last_success_time = scheduler.last_success_time();
        let consecutive_failure_count = scheduler.consecutive_failure_count();

        EnrollmentStatus {
            state: self.state,
            last_success_time,
            is_enrollment_valid: is_enrollment_valid(
                last_success_time,
                scheduler.refresh_period(),
                Utc::now(),
            ),
            time_to_next_attempt: scheduler.time_to_next_attempt(),
            consecutive_failure_count,
            is_recovering_from_failure: consecutive_failure_count > 0,
        }
    }

    // ------------------------------------------------------------------------
    // Attempt steps
    // ------------------------------------------------------------------------

    async fn start_attempt(&mut self, policy_reference: Option<PolicyReference>) {
        if !self.state.is_idle() {
            tracing::warn!(state = %self.state, "Attempt requested while enrollment in progress; ignoring");
            return;
        }

        self.token = self.token.wrapping_add(1);
        for observer in &self.observers {
            observer.on_attempt_started();
        }

        let reason = self.resolve_reason().await;
        telemetry::record(&TelemetryEvent::invocation_reason(reason));
        tracing::info!(
            reason = %reason,
            policy = ?policy_reference,
            "Starting enrollment attempt"
        );
        self.context = AttemptContext {
            reason,
            policy_reference,
        };

        match self.cached_push_id() {
            Some(push_id) => self.gate_on_app_metadata(push_id),
            None => self.request_push_registration(),
        }
    }

    /// Pick the invocation reason for a new attempt.
    async fn resolve_reason(&mut self) -> InvocationReason {
        if let Some(reason) = self.forced_reason.take() {
            return reason;
        }

        match prefs::load_failure_recovery_reason(self.prefs.as_ref()).await {
            Ok(InvocationReason::Unspecified) => {}
            Ok(reason) => return reason,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring persisted failure-recovery reason")
            }
        }

        let scheduler = &self.collaborators.scheduler;
        let last_success_time = scheduler.last_success_time();
        if last_success_time.is_none() {
            InvocationReason::Initialization
        } else if !is_enrollment_valid(last_success_time, scheduler.refresh_period(), Utc::now())
        {
            InvocationReason::Periodic
        } else {
            InvocationReason::Unspecified
        }
    }

    fn cached_push_id(&mut self) -> Option<String> {
        if self.push_id.is_none() {
            self.push_id = self
                .collaborators
                .push_provider
                .current_id()
                .filter(|id| !id.is_empty());
        }
        self.push_id.clone()
    }

    fn request_push_registration(&mut self) {
        self.set_state(EnrollmentState::WaitingForPushRegistration);
        self.timer
            .arm(self.config.push_registration_timeout, self.tx.clone());

        let provider = Arc::clone(&self.collaborators.push_provider);
        let tx = self.tx.clone();
        let token = self.token;
        tokio::spawn(async move {
            let result = provider.register().await;
            post(&tx, Event::PushRegistered { token, result });
        });
    }

    async fn on_push_registered(&mut self, token: u64, result: Result<String, ProviderError>) {
        if !self.is_current(token, EnrollmentState::WaitingForPushRegistration) {
            tracing::debug!(token, "Dropping stale push registration result");
            return;
        }
        self.timer.cancel();

        match result {
            Ok(push_id) if !push_id.is_empty() => {
                self.push_id = Some(push_id.clone());
                self.gate_on_app_metadata(push_id);
            }
            Ok(_) => {
                tracing::warn!("Push registration returned an empty id");
                self.finish_with_code(ResultCode::ErrorPushRegistrationFailed)
                    .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Push registration failed");
                self.finish_with_code(ResultCode::ErrorPushRegistrationFailed)
                    .await;
            }
        }
    }

    fn gate_on_app_metadata(&mut self, push_id: String) {
        if let Some(app_metadata) = self.app_metadata.clone() {
            self.invoke_enroller(app_metadata);
            return;
        }

        self.set_state(EnrollmentState::WaitingForAppMetadata);
        self.timer
            .arm(self.config.app_metadata_timeout, self.tx.clone());

        let provider = Arc::clone(&self.collaborators.metadata_provider);
        let tx = self.tx.clone();
        let token = self.token;
        tokio::spawn(async move {
            let result = provider.fetch(&push_id).await;
            post(&tx, Event::AppMetadataFetched { token, result });
        });
    }

    async fn on_app_metadata_fetched(
        &mut self,
        token: u64,
        result: Result<AppMetadata, ProviderError>,
    ) {
        if !self.is_current(token, EnrollmentState::WaitingForAppMetadata) {
            tracing::debug!(token, "Dropping stale app metadata result");
            return;
        }
        self.timer.cancel();

        match result {
            Ok(app_metadata) => {
                self.app_metadata = Some(app_metadata.clone());
                self.invoke_enroller(app_metadata);
            }
            Err(e) => {
                tracing::warn!(error = %e, "App metadata fetch failed");
                self.finish_with_code(ResultCode::ErrorAppMetadataFetchFailed)
                    .await;
            }
        }
    }

    fn invoke_enroller(&mut self, app_metadata: AppMetadata) {
        let request = EnrollRequest {
            client_metadata: ClientMetadata::new(
                self.context.reason,
                self.collaborators.scheduler.consecutive_failure_count(),
            ),
            app_metadata,
            policy_reference: self.context.policy_reference.clone(),
        };

        self.set_state(EnrollmentState::WaitingForEnrollmentResult);

        let enroller = Arc::clone(&self.collaborators.enroller);
        let tx = self.tx.clone();
        let token = self.token;
        tokio::spawn(async move {
            let result = enroller.enroll(request).await;
            post(&tx, Event::EnrollmentFinished { token, result });
        });
    }

    async fn on_enrollment_finished(&mut self, token: u64, result: EnrollmentResult) {
        if !self.is_current(token, EnrollmentState::WaitingForEnrollmentResult) {
            tracing::debug!(token, "Dropping stale enrollment result");
            return;
        }
        self.finish(result).await;
    }

    async fn on_timer_fired(&mut self, seq: u64) {
        if !self.timer.take_fired(seq) {
            return;
        }
        if let Some(code) = self.state.timeout_code() {
            tracing::warn!(state = %self.state, "Timed out waiting for enrollment dependency");
            self.finish_with_code(code).await;
        }
    }

    async fn finish_with_code(&mut self, code: ResultCode) {
        self.finish(EnrollmentResult::from_code(code)).await;
    }

    /// End the current attempt with `result` and return to Idle.
    async fn finish(&mut self, result: EnrollmentResult) {
        self.token = self.token.wrapping_add(1);
        self.timer.cancel();

        let success = result.is_success();
        let recovery_reason = if success {
            InvocationReason::Unspecified
        } else {
            self.context.reason
        };
        if let Err(e) =
            prefs::store_failure_recovery_reason(self.prefs.as_ref(), recovery_reason).await
        {
            tracing::error!(error = %e, reason = %recovery_reason, "Failed to persist failure-recovery reason");
        }

        telemetry::record(&TelemetryEvent::enrollment_result(result.code));
        let scheduler = &self.collaborators.scheduler;
        scheduler.handle_result(&result);

        if success {
            tracing::info!(
                code = %result.code,
                time_to_next_attempt = ?scheduler.time_to_next_attempt(),
                "Enrollment attempt succeeded"
            );
        } else {
            tracing::warn!(
                code = %result.code,
                reason = %self.context.reason,
                consecutive_failures = scheduler.consecutive_failure_count(),
                time_to_next_attempt = ?scheduler.time_to_next_attempt(),
                "Enrollment attempt failed"
            );
        }

        for observer in &self.observers {
            observer.on_attempt_finished(success);
        }

        self.context = AttemptContext::default();
        self.set_state(EnrollmentState::Idle);
    }

    fn is_current(&self, token: u64, expected: EnrollmentState) -> bool {
        token == self.token && self.state == expected
    }

    fn set_state(&mut self, next: EnrollmentState) {
        tracing::info!("Transitioning from {} to {}", self.state, next);
        self.state = next;
        self.state_tx.send_replace(next);
    }
}
