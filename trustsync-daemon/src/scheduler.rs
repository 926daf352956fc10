//! Contract of the enrollment scheduler.
//!
//! The scheduler owns the timing policy: when periodic attempts happen, how
//! failures back off and what the server's directive says. The orchestrator
//! only asks it for attempts and reports results back.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use trustsync_core::{EnrollmentResult, PolicyReference};

use crate::orchestrator::Event;

/// Enrollment scheduling policy.
pub trait Scheduler: Send + Sync {
    /// Begin scheduling. The scheduler calls [`AttemptTrigger::request`]
    /// whenever an attempt should run.
    fn start(&self, trigger: AttemptTrigger);

    /// Ask for an attempt as soon as possible.
    fn request_attempt_now(&self);

    fn last_success_time(&self) -> Option<DateTime<Utc>>;

    fn time_to_next_attempt(&self) -> Duration;

    fn consecutive_failure_count(&self) -> u32;

    /// How long a successful enrollment stays valid.
    fn refresh_period(&self) -> Duration;

    /// Report the outcome of a finished attempt.
    fn handle_result(&self, result: &EnrollmentResult);
}

/// Delivers scheduler-initiated attempt requests onto the orchestrator task.
///
/// The trigger does not keep the orchestrator alive.
#[derive(Clone)]
pub struct AttemptTrigger {
    tx: mpsc::WeakUnboundedSender<Event>,
}

impl AttemptTrigger {
    pub(crate) fn new(tx: mpsc::WeakUnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// Request an attempt under the given server policy.
    ///
    /// Returns false if the orchestrator has shut down.
    pub fn request(&self, policy_reference: Option<PolicyReference>) -> bool {
        self.tx.upgrade().is_some_and(|tx| {
            tx.send(Event::AttemptRequested(policy_reference))
                .is_ok()
        })
    }
}

impl std::fmt::Debug for AttemptTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptTrigger").finish_non_exhaustive()
    }
}
