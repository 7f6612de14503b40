//! Prometheus metrics for the tributary connector manager
//!
//! This module provides metrics tracking for:
//! - Batches: started, completed by delay policy, timed out
//! - Traversal: documents pushed per connector
//! - Change detection: events by kind
//! - Registry: configured connectors
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};
use std::sync::OnceLock;

use crate::scheduler::DelayPolicy;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all manager metrics
struct ManagerMetrics {
    batches_started: CounterVec,
    batches_completed: CounterVec,
    task_timeouts: Counter,
    documents: CounterVec,
    change_events: CounterVec,
    configured_connectors: Gauge,
}

/// Global storage for manager metrics
static MANAGER_METRICS: OnceLock<ManagerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, subsequent metric operations become
/// no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = tributary::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = ManagerMetrics {
        batches_started: register_counter_vec!(
            "tributary_batches_started_total",
            "Total traversal batches submitted",
            &["connector"]
        )?,
        batches_completed: register_counter_vec!(
            "tributary_batches_completed_total",
            "Total traversal batches completed by delay policy",
            &["connector", "policy"]
        )?,
        task_timeouts: register_counter!(
            "tributary_task_timeouts_total",
            "Total tasks that exceeded their maximum lifetime"
        )?,
        documents: register_counter_vec!(
            "tributary_documents_traversed_total",
            "Total documents accepted by the pusher",
            &["connector"]
        )?,
        change_events: register_counter_vec!(
            "tributary_change_events_total",
            "Total change events delivered by kind",
            &["kind"]
        )?,
        configured_connectors: register_gauge!(
            "tributary_configured_connectors",
            "Number of configured connector instances"
        )?,
    };

    MANAGER_METRICS
        .set(metrics)
        .map_err(|_| "Manager metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    MANAGER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all registered metrics in the Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_batch_started(connector: &str) {
    if let Some(m) = MANAGER_METRICS.get() {
        m.batches_started.with_label_values(&[connector]).inc();
    }
}

pub fn record_batch_completed(connector: &str, policy: DelayPolicy) {
    if let Some(m) = MANAGER_METRICS.get() {
        m.batches_completed
            .with_label_values(&[connector, policy.as_str()])
            .inc();
    }
}

pub fn record_task_timeout() {
    if let Some(m) = MANAGER_METRICS.get() {
        m.task_timeouts.inc();
    }
}

pub fn record_documents(connector: &str, count: u64) {
    let Some(m) = MANAGER_METRICS.get() else {
        return;
    };

    if count > 0 {
        m.documents
            .with_label_values(&[connector])
            .inc_by(count as f64);
    }
}

pub fn record_change_event(kind: &str) {
    if let Some(m) = MANAGER_METRICS.get() {
        m.change_events.with_label_values(&[kind]).inc();
    }
}

pub fn set_configured_connectors(count: usize) {
    if let Some(m) = MANAGER_METRICS.get() {
        m.configured_connectors.set(count as f64);
    }
}
