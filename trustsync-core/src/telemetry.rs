//! Observability events recorded during enrollment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::migration::UserKeyPairState;
use crate::reason::InvocationReason;
use crate::result::ResultCode;

/// What was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TelemetryKind {
    /// Legacy key pair classified at startup.
    UserKeyPairState { state: UserKeyPairState },
    /// Invocation reason resolved for a new attempt.
    InvocationReason { reason: InvocationReason },
    /// An attempt finished.
    EnrollmentResult { code: ResultCode, success: bool },
}

/// A timestamped telemetry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TelemetryKind,
}

impl TelemetryEvent {
    pub fn new(kind: TelemetryKind) -> Self {
        Self { ts: Utc::now(), kind }
    }

    pub fn user_key_pair_state(state: UserKeyPairState) -> Self {
        Self::new(TelemetryKind::UserKeyPairState { state })
    }

    pub fn invocation_reason(reason: InvocationReason) -> Self {
        Self::new(TelemetryKind::InvocationReason { reason })
    }

    pub fn enrollment_result(code: ResultCode) -> Self {
        Self::new(TelemetryKind::EnrollmentResult {
            code,
            success: code.is_success(),
        })
    }

    /// Stable name of the event kind, used as a log field.
    pub fn name(&self) -> &'static str {
        match self.kind {
            TelemetryKind::UserKeyPairState { .. } => "user_key_pair_state",
            TelemetryKind::InvocationReason { .. } => "invocation_reason",
            TelemetryKind::EnrollmentResult { .. } => "enrollment_result",
        }
    }
}
