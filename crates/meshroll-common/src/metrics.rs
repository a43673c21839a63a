//! Metrics registry for member-roll observability
//!
//! Provides OpenTelemetry metrics for:
//! - Reconciliation (duration, errors)
//! - Member namespace label writes
//! - Mesh RoleBinding writes

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for member-roll metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("meshroll"));

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Histogram of member roll reconciliation duration
///
/// Labels:
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("meshroll_reconcile_duration_seconds")
        .with_description("Duration of member roll reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of member roll reconciliation errors
///
/// Labels:
/// - `error_type`: transient, permanent
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("meshroll_reconcile_errors_total")
        .with_description("Total number of member roll reconciliation errors")
        .with_unit("{errors}")
        .build()
});

// ============================================================================
// Member Operation Metrics
// ============================================================================

/// Counter of namespace label writes
///
/// Labels:
/// - `operation`: join, leave
/// - `result`: success, error
pub static NAMESPACE_OPERATIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("meshroll_namespace_operations_total")
        .with_description("Total number of member namespace label writes")
        .with_unit("{operations}")
        .build()
});

/// Counter of mesh RoleBinding writes in member namespaces
///
/// Labels:
/// - `operation`: create, delete
/// - `result`: success, error
pub static ROLE_BINDING_OPERATIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("meshroll_role_binding_operations_total")
        .with_description("Total number of mesh RoleBinding writes")
        .with_unit("{operations}")
        .build()
});

// ============================================================================
// Recording helpers
// ============================================================================

/// Reconcile result label values
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileResult {
    /// Pass finished without error
    Success,
    /// Pass returned an error
    Error,
}

impl ReconcileResult {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Record how long one reconciliation took
pub fn record_reconcile(result: ReconcileResult, seconds: f64) {
    RECONCILE_DURATION.record(seconds, &[KeyValue::new("result", result.as_str())]);
}

/// Count a failed reconciliation
pub fn record_reconcile_error(retryable: bool) {
    let error_type = if retryable { "transient" } else { "permanent" };
    RECONCILE_ERRORS.add(1, &[KeyValue::new("error_type", error_type)]);
}

/// Count a namespace label write
pub fn record_namespace_operation(operation: &'static str, succeeded: bool) {
    NAMESPACE_OPERATIONS.add(
        1,
        &[
            KeyValue::new("operation", operation),
            KeyValue::new("result", outcome(succeeded)),
        ],
    );
}

/// Count a RoleBinding write
pub fn record_role_binding_operation(operation: &'static str, succeeded: bool) {
    ROLE_BINDING_OPERATIONS.add(
        1,
        &[
            KeyValue::new("operation", operation),
            KeyValue::new("result", outcome(succeeded)),
        ],
    );
}

fn outcome(succeeded: bool) -> &'static str {
    if succeeded {
        ReconcileResult::Success.as_str()
    } else {
        ReconcileResult::Error.as_str()
    }
}
