//! Collaborators the orchestrator drives during an attempt.

use async_trait::async_trait;
use trustsync_core::{AppMetadata, ClientMetadata, EnrollmentResult, PolicyReference};

/// Failure reported by a push registration or app metadata provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("request failed: {0}")]
    Failed(String),
}

/// Source of the push-messaging registration id.
#[async_trait]
pub trait PushRegistrationProvider: Send + Sync {
    /// The id from a previous registration, if one is known.
    fn current_id(&self) -> Option<String>;

    /// Register with the push service and return the new id.
    async fn register(&self) -> Result<String, ProviderError>;
}

/// Source of the signed client app metadata.
#[async_trait]
pub trait AppMetadataProvider: Send + Sync {
    async fn fetch(&self, push_id: &str) -> Result<AppMetadata, ProviderError>;
}

/// Everything the enroller needs for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollRequest {
    pub client_metadata: ClientMetadata,
    pub app_metadata: AppMetadata,
    pub policy_reference: Option<PolicyReference>,
}

/// Performs the enrollment exchange with the trust authority.
///
/// Protocol failures are reported through the result code, not as errors.
#[async_trait]
pub trait Enroller: Send + Sync {
    async fn enroll(&self, request: EnrollRequest) -> EnrollmentResult;
}

/// Notified when attempts start and finish.
pub trait EnrollmentObserver: Send + Sync {
    fn on_attempt_started(&self);
    fn on_attempt_finished(&self, success: bool);
}
