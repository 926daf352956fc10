//! Orchestrator states and the status snapshot.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use trustsync_core::{InvocationReason, PolicyReference, ResultCode};

/// Where the orchestrator is in an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentState {
    #[default]
    Idle,
    WaitingForPushRegistration,
    WaitingForAppMetadata,
    WaitingForEnrollmentResult,
}

impl EnrollmentState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Result code reported when this state's timer fires.
    ///
    /// Only the two dependency-waiting states are timed.
    pub fn timeout_code(&self) -> Option<ResultCode> {
        match self {
            Self::WaitingForPushRegistration => {
                Some(ResultCode::ErrorTimeoutWaitingForPushRegistration)
            }
            Self::WaitingForAppMetadata => Some(ResultCode::ErrorTimeoutWaitingForAppMetadata),
            Self::Idle | Self::WaitingForEnrollmentResult => None,
        }
    }
}

impl fmt::Display for EnrollmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::WaitingForPushRegistration => "WaitingForPushRegistration",
            Self::WaitingForAppMetadata => "WaitingForAppMetadata",
            Self::WaitingForEnrollmentResult => "WaitingForEnrollmentResult",
        };
        f.write_str(s)
    }
}

/// Context fixed at the start of an attempt.
#[derive(Debug, Clone, Default)]
pub(crate) struct AttemptContext {
    pub reason: InvocationReason,
    pub policy_reference: Option<PolicyReference>,
}

/// Point-in-time view of enrollment health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentStatus {
    pub state: EnrollmentState,
    pub last_success_time: Option<DateTime<Utc>>,
    /// The last success is within the scheduler's refresh period.
    pub is_enrollment_valid: bool,
    pub time_to_next_attempt: Duration,
    pub consecutive_failure_count: u32,
    pub is_recovering_from_failure: bool,
}

/// Returns true if `last_success` is younger than `refresh_period`.
pub(crate) fn is_enrollment_valid(
    last_success: Option<DateTime<Utc>>,
    refresh_period: Duration,
    now: DateTime<Utc>,
) -> bool {
    match last_success {
        None => false,
        // A success in the future counts as just now.
        Some(at) => (now - at).to_std().unwrap_or_default() < refresh_period,
    }
}
