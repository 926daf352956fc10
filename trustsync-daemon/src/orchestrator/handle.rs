//! Cloneable handle to a running orchestrator.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use trustsync_core::{InvocationReason, KeyBundleName, PrivateMaterial};

use super::state::{EnrollmentState, EnrollmentStatus};
use super::{Event, OrchestratorError};
use crate::registry::KeyRegistry;

/// Handle used by the rest of the process to talk to the orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::UnboundedSender<Event>,
    state: watch::Receiver<EnrollmentState>,
    registry: Arc<KeyRegistry>,
}

impl OrchestratorHandle {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<Event>,
        state: watch::Receiver<EnrollmentState>,
        registry: Arc<KeyRegistry>,
    ) -> Self {
        Self {
            tx,
            state,
            registry,
        }
    }

    /// Ask for an immediate attempt with the given reason.
    ///
    /// Ignored (with a warning) while an attempt is running. While Idle the
    /// latest reason wins over any earlier force that has not started yet.
    pub fn force_enrollment_now(&self, reason: InvocationReason) -> Result<(), OrchestratorError> {
        self.send(Event::ForceEnrollment(reason))
    }

    /// The trust authority asked this device to re-enroll.
    pub fn on_reenrollment_signal(&self) -> Result<(), OrchestratorError> {
        self.force_enrollment_now(InvocationReason::ServerInitiated)
    }

    pub fn is_in_progress(&self) -> bool {
        !self.state.borrow().is_idle()
    }

    pub fn state(&self) -> EnrollmentState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EnrollmentState> {
        self.state.clone()
    }

    /// Snapshot of enrollment health.
    ///
    /// Answered in order with other requests, so it also serves as a barrier
    /// for anything sent before it.
    pub async fn status(&self) -> Result<EnrollmentStatus, OrchestratorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Event::Status(reply_tx))?;
        reply_rx.await.map_err(|_| OrchestratorError::Closed)
    }

    /// Public half of the active user key pair.
    pub fn user_public_key(&self) -> Option<Vec<u8>> {
        self.registry
            .get_active(KeyBundleName::UserKeyPair)
            .map(|key| key.public_key().to_vec())
    }

    /// Private half of the active user key pair.
    pub fn user_private_key(&self) -> Option<PrivateMaterial> {
        self.registry
            .get_active(KeyBundleName::UserKeyPair)
            .map(|key| key.private_key().clone())
    }

    /// Stop the orchestrator task. In-flight collaborator calls are abandoned.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Event::Shutdown);
    }

    fn send(&self, event: Event) -> Result<(), OrchestratorError> {
        self.tx.send(event).map_err(|_| OrchestratorError::Closed)
    }
}
