//! Structured audit logging for device lifecycle operations.
//!
//! Every state-changing operation on an appliance (launch, reuse, hot-plug,
//! teardown, service configuration) emits one [`AuditRecord`] through the
//! [`audit_log!`](crate::audit_log) macro. Records carry:
//!
//! - Timestamp (UTC, microsecond precision)
//! - Source component and action
//! - Outcome (success, failure, in-progress, denied)
//! - Object identifier and type
//! - Free-form JSON details and error text
//!
//! Records are emitted on the `audit` tracing target with the full record
//! serialized as JSON in the `audit_json` field, so they can be filtered and
//! shipped separately from operational logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Audit event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// Appliance or network function creation
    ResourceCreate,
    /// Interface plug/unplug, status changes
    ResourceModify,
    /// Appliance or network function deletion
    ResourceDelete,
    /// Daemon startup and shutdown
    SystemLifecycle,
    /// Vendor service configuration
    ServiceConfig,
    /// Error and failure events
    ErrorCondition,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditCategory::ResourceCreate => write!(f, "RESOURCE_CREATE"),
            AuditCategory::ResourceModify => write!(f, "RESOURCE_MODIFY"),
            AuditCategory::ResourceDelete => write!(f, "RESOURCE_DELETE"),
            AuditCategory::SystemLifecycle => write!(f, "SYSTEM_LIFECYCLE"),
            AuditCategory::ServiceConfig => write!(f, "SERVICE_CONFIG"),
            AuditCategory::ErrorCondition => write!(f, "ERROR_CONDITION"),
        }
    }
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// Action completed successfully
    Success,
    /// Action failed
    Failure,
    /// Action is in progress
    InProgress,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Failure => write!(f, "failure"),
            AuditOutcome::InProgress => write!(f, "in_progress"),
        }
    }
}

/// A single audit record.
///
/// Built with the `with_*` methods and emitted with
/// [`audit_log!`](crate::audit_log).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// UTC timestamp
    pub timestamp: DateTime<Utc>,

    /// Event category
    pub category: AuditCategory,

    /// Component that generated the event (e.g. "DeviceOrch")
    pub source: String,

    /// Action performed (e.g. "create_device")
    pub action: String,

    /// Outcome of the action
    pub outcome: AuditOutcome,

    /// Identifier of the affected object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,

    /// Type of the affected object ("device", "network_function", ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,

    /// Additional context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Error message when the outcome is a failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Correlation id (network function request id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AuditRecord {
    /// Creates a new in-progress record.
    pub fn new(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            details: None,
            error: None,
            correlation_id: None,
        }
    }

    /// Sets the outcome.
    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Sets the affected object id.
    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    /// Sets the affected object type.
    pub fn with_object_type(mut self, obj_type: impl Into<String>) -> Self {
        self.object_type = Some(obj_type.into());
        self
    }

    /// Attaches JSON details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Records an error; also marks the outcome as a failure.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.outcome = AuditOutcome::Failure;
        self
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Serializes the record to JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Emits an [`AuditRecord`] on the `audit` target.
///
/// Successes log at INFO, in-progress records at DEBUG, failures and denials
/// at WARN.
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        let record = $record;
        match record.outcome {
            $crate::audit::AuditOutcome::Success => {
                tracing::info!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::InProgress => {
                tracing::debug!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::Failure => {
                tracing::warn!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    error = record.error.as_deref().unwrap_or(""),
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
        }
    };
}

/// Initializes JSON logging.
///
/// `RUST_LOG` takes precedence over `log_level`. Records from crates using
/// the `log` facade are forwarded to the subscriber.
pub fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .json(),
        )
        .init();
}

/// Initializes human-readable logging for interactive use.
pub fn init_logging_pretty(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .pretty(),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_record_creation() {
        let record = AuditRecord::new(AuditCategory::ResourceCreate, "DeviceOrch", "create_device")
            .with_outcome(AuditOutcome::Success)
            .with_object_id("vm-1")
            .with_object_type("device")
            .with_correlation_id("nf-1");

        assert_eq!(record.category, AuditCategory::ResourceCreate);
        assert_eq!(record.source, "DeviceOrch");
        assert_eq!(record.action, "create_device");
        assert_eq!(record.outcome, AuditOutcome::Success);
        assert_eq!(record.object_id, Some("vm-1".to_string()));
        assert_eq!(record.object_type, Some("device".to_string()));
        assert_eq!(record.correlation_id, Some("nf-1".to_string()));
    }

    #[test]
    fn test_with_error_marks_failure() {
        let record = AuditRecord::new(AuditCategory::ResourceModify, "DeviceOrch", "plug_interfaces")
            .with_outcome(AuditOutcome::Success)
            .with_error("attach_interface failed");

        assert_eq!(record.outcome, AuditOutcome::Failure);
        assert_eq!(record.error.as_deref(), Some("attach_interface failed"));
    }

    #[test]
    fn test_json_skips_empty_fields() {
        let record = AuditRecord::new(AuditCategory::SystemLifecycle, "OrchDaemon", "start")
            .with_details(serde_json::json!({"orch_count": 1}));

        let json = record.to_json();
        assert!(json.contains(r#""category":"SYSTEM_LIFECYCLE""#));
        assert!(json.contains(r#""outcome":"in_progress""#));
        assert!(json.contains(r#""orch_count":1"#));
        assert!(!json.contains("object_id"));
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_display() {
        assert_eq!(AuditCategory::ServiceConfig.to_string(), "SERVICE_CONFIG");
        assert_eq!(AuditOutcome::InProgress.to_string(), "in_progress");
    }
}
