//! # Trustsync Daemon
//!
//! Owns everything in enrollment that touches the outside world:
//!
//! - [`db`] - SQLite database and migrations
//! - [`prefs`] - Durable preferences (failure-recovery reason, legacy key pair)
//! - [`registry`] - Persistent key registry with an in-memory snapshot
//! - [`scheduler`] - Scheduler contract and the attempt trigger it is handed
//! - [`providers`] - Push registration, app metadata, enroller and observer contracts
//! - [`orchestrator`] - The enrollment state machine task
//! - [`config`] - TOML configuration
//! - [`telemetry`] - Emission of telemetry events

pub mod config;
pub mod db;
pub mod orchestrator;
pub mod prefs;
pub mod providers;
pub mod registry;
pub mod scheduler;
pub mod telemetry;

pub use db::{Database, StoreError};
pub use orchestrator::{
    Collaborators, EnrollmentState, EnrollmentStatus, Orchestrator, OrchestratorConfig,
    OrchestratorError, OrchestratorHandle,
};
pub use prefs::{PrefStore, SqlitePrefStore};
pub use registry::{KeyRegistry, RegistryError};
