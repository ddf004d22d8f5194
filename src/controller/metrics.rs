//! Prometheus metrics for the fencing operator

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

/// Labels for the lost node metric
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct LossLabels {
    pub severity: String,
}

/// Nodes observed as lost, by severity
pub static NODES_LOST: Lazy<Family<LossLabels, Counter>> = Lazy::new(Family::default);

/// Fencing requests created
pub static REQUESTS_CREATED: Lazy<Counter> = Lazy::new(Counter::default);

/// Fencing request creations that failed after retries
pub static REQUEST_CREATE_FAILURES: Lazy<Counter> = Lazy::new(Counter::default);

/// Fencing requests observed complete
pub static REQUESTS_COMPLETED: Lazy<Counter> = Lazy::new(Counter::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();
    registry.register(
        "fencing_nodes_lost",
        "Nodes whose Ready condition became Unknown",
        NODES_LOST.clone(),
    );
    registry.register(
        "fencing_requests_created",
        "Fencing requests created by the operator",
        REQUESTS_CREATED.clone(),
    );
    registry.register(
        "fencing_request_create_failures",
        "Fencing request creations that failed after all retries",
        REQUEST_CREATE_FAILURES.clone(),
    );
    registry.register(
        "fencing_requests_completed",
        "Completed fencing requests observed by the watch",
        REQUESTS_COMPLETED.clone(),
    );
    registry
});

/// Count a lost node
pub fn record_node_lost(severity: &str) {
    let labels = LossLabels {
        severity: severity.to_string(),
    };
    NODES_LOST.get_or_create(&labels).inc();
}

/// Encode the registry in the OpenMetrics text format
pub fn encode() -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}
