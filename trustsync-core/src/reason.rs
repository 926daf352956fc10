//! Why an enrollment attempt was started.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The reason an enrollment attempt was invoked.
///
/// Integer values are persisted as the failure-recovery reason and must stay
/// stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationReason {
    #[default]
    Unspecified = 0,
    /// First enrollment on this device.
    Initialization = 1,
    /// The previous enrollment is older than the refresh period.
    Periodic = 2,
    SlowPeriodic = 3,
    FastPeriodic = 4,
    Expiration = 5,
    FailureRecovery = 6,
    NewAccount = 7,
    ChangedAccount = 8,
    FeatureToggled = 9,
    /// The trust authority asked the device to re-enroll.
    ServerInitiated = 10,
    AddressChange = 11,
    SoftwareUpdate = 12,
    Manual = 13,
}

impl InvocationReason {
    pub const ALL: [InvocationReason; 14] = [
        Self::Unspecified,
        Self::Initialization,
        Self::Periodic,
        Self::SlowPeriodic,
        Self::FastPeriodic,
        Self::Expiration,
        Self::FailureRecovery,
        Self::NewAccount,
        Self::ChangedAccount,
        Self::FeatureToggled,
        Self::ServerInitiated,
        Self::AddressChange,
        Self::SoftwareUpdate,
        Self::Manual,
    ];

    /// The persisted integer value.
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    /// Interpret a persisted integer. Unknown values yield `None`.
    pub fn from_persisted(value: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_i64() == value)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Initialization => "initialization",
            Self::Periodic => "periodic",
            Self::SlowPeriodic => "slow_periodic",
            Self::FastPeriodic => "fast_periodic",
            Self::Expiration => "expiration",
            Self::FailureRecovery => "failure_recovery",
            Self::NewAccount => "new_account",
            Self::ChangedAccount => "changed_account",
            Self::FeatureToggled => "feature_toggled",
            Self::ServerInitiated => "server_initiated",
            Self::AddressChange => "address_change",
            Self::SoftwareUpdate => "software_update",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for InvocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
