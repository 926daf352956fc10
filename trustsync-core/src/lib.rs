//! # Trustsync Core
//!
//! Pure domain types for enrolling a device's cryptographic identity with a
//! remote trust authority.
//!
//! ## Design Principles
//!
//! This crate is intentionally **IO-free**:
//! - No filesystem operations
//! - No network calls
//! - No database interactions
//! - No logging
//!
//! Persistence, timers and the orchestrator actor live in `trustsync-daemon`.
//!
//! ## Stability
//!
//! Integer values of [`InvocationReason`] and [`UserKeyPairState`] are persisted
//! and reported in telemetry. Entries must not be renumbered.
//!
//! ## Modules
//!
//! - [`key`] - Keys, key bundles and fingerprints
//! - [`reason`] - Invocation reasons for enrollment attempts
//! - [`result`] - Result codes, enrollment results and client directives
//! - [`metadata`] - Client and app metadata handed to the enroller
//! - [`migration`] - Legacy user key pair classification
//! - [`telemetry`] - Observability events

pub mod key;
pub mod metadata;
pub mod migration;
pub mod reason;
pub mod result;
pub mod telemetry;

pub use key::{
    Key, KeyBundle, KeyBundleName, KeyError, KeyFingerprint, KeyHandle, KeyStatus, KeyType,
    PrivateMaterial,
};
pub use metadata::{AppMetadata, ClientMetadata};
pub use migration::{
    classify_user_key_pair, decode_legacy_value, LegacyKeyPair, UserKeyPairState,
    LEGACY_KEY_HANDLE,
};
pub use reason::InvocationReason;
pub use result::{ClientDirective, EnrollmentResult, PolicyReference, ResultCode};
pub use telemetry::{TelemetryEvent, TelemetryKind};
