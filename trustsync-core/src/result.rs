//! Enrollment outcomes and the server's policy directive.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome code of an enrollment attempt.
///
/// Codes the orchestrator does not know about are carried as
/// [`ResultCode::Other`] and treated as failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    // Success
    SuccessNoNewKeysNeeded,
    SuccessNewKeysEnrolled,

    // Raised by the orchestrator
    ErrorPushRegistrationFailed,
    ErrorTimeoutWaitingForPushRegistration,
    ErrorAppMetadataFetchFailed,
    ErrorTimeoutWaitingForAppMetadata,

    // Passed through from the enroller
    ErrorServerOverloaded,
    ErrorSyncKeysRequestFailed,
    ErrorEnrollKeysRequestFailed,
    ErrorTimeoutWaitingForSyncKeysResponse,
    ErrorTimeoutWaitingForEnrollKeysResponse,
    ErrorKeyCreationFailed,

    /// A code outside the known set.
    Other(u32),
}

impl ResultCode {
    const KNOWN: [ResultCode; 12] = [
        Self::SuccessNoNewKeysNeeded,
        Self::SuccessNewKeysEnrolled,
        Self::ErrorPushRegistrationFailed,
        Self::ErrorTimeoutWaitingForPushRegistration,
        Self::ErrorAppMetadataFetchFailed,
        Self::ErrorTimeoutWaitingForAppMetadata,
        Self::ErrorServerOverloaded,
        Self::ErrorSyncKeysRequestFailed,
        Self::ErrorEnrollKeysRequestFailed,
        Self::ErrorTimeoutWaitingForSyncKeysResponse,
        Self::ErrorTimeoutWaitingForEnrollKeysResponse,
        Self::ErrorKeyCreationFailed,
    ];

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::SuccessNoNewKeysNeeded | Self::SuccessNewKeysEnrolled
        )
    }

    /// Numeric form used in telemetry.
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::SuccessNoNewKeysNeeded => 0,
            Self::SuccessNewKeysEnrolled => 1,
            Self::ErrorPushRegistrationFailed => 2,
            Self::ErrorTimeoutWaitingForPushRegistration => 3,
            Self::ErrorAppMetadataFetchFailed => 4,
            Self::ErrorTimeoutWaitingForAppMetadata => 5,
            Self::ErrorServerOverloaded => 6,
            Self::ErrorSyncKeysRequestFailed => 7,
            Self::ErrorEnrollKeysRequestFailed => 8,
            Self::ErrorTimeoutWaitingForSyncKeysResponse => 9,
            Self::ErrorTimeoutWaitingForEnrollKeysResponse => 10,
            Self::ErrorKeyCreationFailed => 11,
            Self::Other(code) => *code,
        }
    }

    pub fn from_u32(code: u32) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|known| known.as_u32() == code)
            .unwrap_or(Self::Other(code))
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "other({code})"),
            known => write!(f, "{known:?}"),
        }
    }
}

/// Identifies the server policy a directive was issued under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyReference {
    pub name: String,
    pub version: i64,
}

impl PolicyReference {
    pub fn new(name: impl Into<String>, version: i64) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

/// Scheduling instructions returned by the trust authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDirective {
    pub policy_reference: PolicyReference,
    /// Delay before the next periodic check-in.
    pub checkin_delay: Duration,
    /// How many retries to make after a failure.
    pub retry_attempts: u32,
    /// Delay between retries.
    pub retry_period: Duration,
}

/// Result of one enrollment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentResult {
    pub code: ResultCode,
    pub client_directive: Option<ClientDirective>,
}

impl EnrollmentResult {
    pub fn new(code: ResultCode, client_directive: Option<ClientDirective>) -> Self {
        Self {
            code,
            client_directive,
        }
    }

    /// A result with no directive, as produced by orchestrator-side failures.
    pub fn from_code(code: ResultCode) -> Self {
        Self::new(code, None)
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}
