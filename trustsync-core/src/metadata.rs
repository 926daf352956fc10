//! Metadata handed to the enroller with every attempt.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::reason::InvocationReason;

/// Per-attempt metadata describing why and how often enrollment ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub invocation_reason: InvocationReason,
    /// Number of consecutive failed attempts before this one.
    pub retry_count: u32,
}

impl ClientMetadata {
    pub fn new(invocation_reason: InvocationReason, retry_count: u32) -> Self {
        Self {
            invocation_reason,
            retry_count,
        }
    }
}

/// Signed description of this client, produced by the app metadata provider.
///
/// The orchestrator treats it as opaque and only forwards it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub instance_id: String,
    pub software_version: String,
    /// Feature name to enabled flag. Ordered for deterministic serialization.
    pub features: BTreeMap<String, bool>,
}

impl AppMetadata {
    pub fn new(instance_id: impl Into<String>, software_version: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            software_version: software_version.into(),
            features: BTreeMap::new(),
        }
    }

    /// Add a feature flag (builder pattern).
    pub fn with_feature(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.features.insert(name.into(), enabled);
        self
    }
}
