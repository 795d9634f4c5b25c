//! Observability for the entity store
//!
//! - Structured JSON-line logging
//! - Typed lifecycle events
//! - Begin/complete scopes around whole-type passes
//!
//! Observability is read-only: nothing here can fail an operation.

mod events;
mod logger;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use scope::ObservationScope;

/// Log a lifecycle event with fields.
///
/// Anomalies go out at WARN, everything else at INFO.
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    let severity = if event.is_anomaly() {
        Severity::Warn
    } else {
        Severity::Info
    };
    Logger::log(severity, event.as_str(), fields);
}
