//! Emits [`TelemetryEvent`]s on the `trustsync::telemetry` tracing target.

use trustsync_core::TelemetryEvent;

pub const TELEMETRY_TARGET: &str = "trustsync::telemetry";

/// Record a telemetry event.
pub fn record(event: &TelemetryEvent) {
    match serde_json::to_string(event) {
        Ok(payload) => {
            tracing::info!(target: TELEMETRY_TARGET, event = event.name(), payload = %payload, "telemetry");
        }
        Err(e) => {
            tracing::warn!(event = event.name(), error = %e, "Failed to serialize telemetry event");
        }
    }
}
