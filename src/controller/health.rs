//! Node health evaluation
//!
//! Decides whether a node needs fencing. The only signal acted on is the
//! kubelet's `Ready` condition turning `Unknown`: the control plane can no
//! longer tell whether the node is alive. A node that reports `Ready=False`
//! is alive enough to say so and is left alone.
//!
//! Nodes running pods with PersistentVolumeClaims are the dangerous case: if
//! the node is in fact still running, its pods keep writing to volumes that
//! the scheduler may attach elsewhere. That distinction is reported as the
//! [`LossSeverity`] of the node but does not change the fencing decision.
//!
//! Problem reports from node-problem-detector style sources (Warning events
//! from an allow-listed component) also trigger fencing of the reporting
//! host.

use std::collections::BTreeSet;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Event, Node, NodeCondition, Pod};
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use super::gateway::ClusterGateway;
use super::lifecycle::{CreateOutcome, FencingRequestManager};
use super::metrics;
use crate::error::Result;

/// How risky a lost node is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossSeverity {
    /// Health unknown, no persistent volumes attached
    Lost,
    /// Health unknown, with pods holding PersistentVolumeClaims
    LostWithStorage,
}

impl LossSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            LossSeverity::Lost => "Lost",
            LossSeverity::LostWithStorage => "LostWithStorage",
        }
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self, LossSeverity::LostWithStorage)
    }
}

/// Whether a condition says the node's health cannot be determined
pub fn is_node_lost(condition: &NodeCondition) -> bool {
    condition.type_ == "Ready" && condition.status == "Unknown"
}

/// Names of the PersistentVolumeClaims a pod mounts, in volume order
pub fn claimed_volumes(pod: &Pod) -> Vec<&str> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref())
        .map(|volumes| {
            volumes
                .iter()
                .filter_map(|v| v.persistent_volume_claim.as_ref())
                .map(|pvc| pvc.claim_name.as_str())
                .collect()
        })
        .unwrap_or_default()
}

/// A pod is dirty when it mounts at least one PersistentVolumeClaim
pub fn is_pod_dirty(pod: &Pod) -> bool {
    !claimed_volumes(pod).is_empty()
}

/// Human-readable cause recorded on requests triggered by a node condition
pub fn condition_cause(condition: &NodeCondition) -> String {
    let mut cause = format!("NodeCondition {}={}", condition.type_, condition.status);
    if let Some(reason) = condition.reason.as_deref().filter(|r| !r.is_empty()) {
        cause.push_str(&format!(" ({})", reason));
    }
    if let Some(time) = &condition.last_transition_time {
        cause.push_str(&format!(" since {}", time.0.to_rfc3339()));
    }
    if let Some(message) = condition.message.as_deref().filter(|m| !m.is_empty()) {
        cause.push_str(&format!(": {}", message));
    }
    cause
}

/// Evaluates nodes and problem events, creating fencing requests as needed
pub struct NodeHealthEvaluator {
    gateway: Arc<dyn ClusterGateway>,
    requests: Arc<FencingRequestManager>,
    event_sources: BTreeSet<String>,
}

impl NodeHealthEvaluator {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        requests: Arc<FencingRequestManager>,
        event_sources: BTreeSet<String>,
    ) -> Self {
        Self {
            gateway,
            requests,
            event_sources,
        }
    }

    /// React to a node being applied or deleted
    ///
    /// A deleted node cannot need fencing, so its requests are cancelled.
    /// Otherwise the first condition reporting the node as lost triggers a
    /// request and the remaining conditions are not evaluated.
    #[instrument(skip(self, node), fields(node = %node.name_any()))]
    pub async fn on_node_changed(&self, node: &Node, deleted: bool) -> Result<()> {
        let name = node.name_any();

        if deleted {
            warn!("Node {} deleted, cancelling its fencing requests", name);
            self.requests.delete_requests(&name, None).await?;
            return Ok(());
        }

        let conditions = node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_deref())
            .unwrap_or_default();

        for condition in conditions {
            if self.evaluate_condition(node, condition).await.is_some() {
                self.requests
                    .create_request_if_absent(&name, &condition_cause(condition))
                    .await?;
                return Ok(());
            }
        }

        debug!("Node {} has no condition requiring fencing", name);
        Ok(())
    }

    /// Decide whether `condition` reports `node` as lost, and how severely
    ///
    /// Failing to enumerate the node's pods is logged and the node is
    /// treated as having no storage attached.
    pub async fn evaluate_condition(
        &self,
        node: &Node,
        condition: &NodeCondition,
    ) -> Option<LossSeverity> {
        if !is_node_lost(condition) {
            return None;
        }

        let name = node.name_any();
        let pods = match self.gateway.list_pods_on_node(&name).await {
            Ok(pods) => pods,
            Err(e) => {
                error!("Failed to get pod list for node {}: {}", name, e);
                Vec::new()
            }
        };

        let mut dirty = false;
        for pod in pods.iter().filter(|p| is_pod_dirty(p)) {
            dirty = true;
            self.log_attached_storage(pod, &name).await;
        }

        let severity = if dirty {
            warn!("Node {} is lost with attached persistent volumes", name);
            LossSeverity::LostWithStorage
        } else {
            warn!("Node {} is lost", name);
            LossSeverity::Lost
        };
        metrics::record_node_lost(severity.as_str());

        Some(severity)
    }

    async fn log_attached_storage(&self, pod: &Pod, node: &str) {
        let namespace = pod.namespace().unwrap_or_else(|| "default".to_string());
        info!("Pod {}/{} on {} has persistent volumes", namespace, pod.name_any(), node);

        for claim in claimed_volumes(pod) {
            match self.gateway.get_volume_claim(&namespace, claim).await {
                Ok(pvc) => {
                    let volume = pvc
                        .spec
                        .as_ref()
                        .and_then(|s| s.volume_name.clone())
                        .unwrap_or_else(|| "<unbound>".to_string());
                    info!("  pvc {} -> pv {}", claim, volume);
                }
                Err(e) => {
                    error!("Failed to get persistent volume claim {}/{}: {}", namespace, claim, e);
                }
            }
        }
    }

    /// React to a Warning event from a node problem source
    ///
    /// Events of other types or from other components are ignored. The
    /// node named by the event's source host must exist; a lookup failure
    /// is returned to the caller.
    #[instrument(skip(self, event), fields(event = %event.name_any()))]
    pub async fn on_warning_event(&self, event: &Event, deleted: bool) -> Result<()> {
        if deleted || !self.is_node_problem(event) {
            return Ok(());
        }

        let host = match event.source.as_ref().and_then(|s| s.host.as_deref()) {
            Some(host) if !host.is_empty() => host,
            _ => {
                debug!("Problem event {} names no host, ignoring", event.name_any());
                return Ok(());
            }
        };

        let node = self.gateway.get_node(host).await.map_err(|e| {
            error!("Failed to get node '{}': {}", host, e);
            e
        })?;

        let cause = event.reason.clone().unwrap_or_else(|| "NodeProblem".to_string());
        match self
            .requests
            .create_request_if_absent(&node.name_any(), &cause)
            .await?
        {
            CreateOutcome::Created(_) => {
                info!("Problem event {} on {} triggered fencing", cause, host)
            }
            CreateOutcome::AlreadyPending(_) => {}
        }
        Ok(())
    }

    /// Whether the event is a Warning from an allow-listed component
    pub fn is_node_problem(&self, event: &Event) -> bool {
        if event.type_.as_deref() != Some("Warning") {
            return false;
        }
        event
            .source
            .as_ref()
            .and_then(|s| s.component.as_deref())
            .map(|c| self.event_sources.contains(c))
            .unwrap_or(false)
    }
}
