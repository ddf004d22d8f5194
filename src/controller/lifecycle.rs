//! FencingRequest lifecycle
//!
//! Creates, deduplicates, lists and deletes [`FencingRequest`]s.
//!
//! A request moves through three states and never returns to an earlier one:
//!
//! - **Pending**: created by the operator, `status.complete` unset
//! - **Complete**: the executor fenced the node and set `status.complete`
//! - **Deleted**: removed by the operator or an administrator
//!
//! At most one Pending request should exist per node. The check is a plain
//! list followed by a create, so two concurrent triggers for the same node
//! can both pass it; the API server's conflict detection is the backstop.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::gateway::ClusterGateway;
use super::metrics;
use super::retry::RetryPolicy;
use crate::crd::{
    target_label_value, FencingOperation, FencingRequest, FencingRequestSpec, FencingSet,
    MANAGED_BY_LABEL, MANAGER_NAME, TARGET_LABEL,
};
use crate::error::Result;

/// Outcome of [`FencingRequestManager::create_request_if_absent`]
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// A new request was stored (`None` when the create reported a conflict)
    Created(Option<String>),
    /// A pending request for the node already exists
    AlreadyPending(String),
}

/// Manages the FencingRequests for the cluster's nodes
pub struct FencingRequestManager {
    gateway: Arc<dyn ClusterGateway>,
    namespace: String,
    retry: RetryPolicy,
    owner: Option<OwnerReference>,
}

impl FencingRequestManager {
    pub fn new(gateway: Arc<dyn ClusterGateway>, namespace: impl Into<String>) -> Self {
        Self {
            gateway,
            namespace: namespace.into(),
            retry: RetryPolicy::default(),
            owner: None,
        }
    }

    /// Replace the retry policy used for creates
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Make new requests owned by a FencingSet
    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Make new requests owned by the FencingSet `name` in the manager's namespace
    ///
    /// Fails when the set cannot be fetched. A set without a uid leaves
    /// requests unowned.
    pub async fn owned_by_set(self, name: &str) -> Result<Self> {
        let set = self.gateway.get_fencing_set(&self.namespace, name).await?;
        match owner_reference(&set) {
            Some(owner) => {
                info!("Fencing requests will be owned by FencingSet {}", name);
                Ok(self.with_owner(owner))
            }
            None => Ok(self),
        }
    }

    /// Nodes with at least one pending request
    pub async fn pending_targets(&self) -> Result<BTreeSet<String>> {
        let requests = self.gateway.list_all_fencing_requests().await?;
        Ok(requests
            .into_iter()
            .filter(|r| r.is_active())
            .map(|r| r.spec.target)
            .collect())
    }

    /// List the requests targeting `node`, optionally only the one named `name`
    pub async fn list_requests(&self, node: &str, name: Option<&str>) -> Result<Vec<FencingRequest>> {
        self.gateway
            .list_fencing_requests(node, name)
            .await
            .map_err(|e| {
                error!("Failed to get fencing request list for {}: {}", node, e);
                e
            })
    }

    /// Create a request to fence `node` unless one is already pending
    #[instrument(skip(self, cause))]
    pub async fn create_request_if_absent(&self, node: &str, cause: &str) -> Result<CreateOutcome> {
        let existing = self.list_requests(node, None).await?;

        if let Some(pending) = existing.iter().find(|r| r.is_active()) {
            info!(
                "Node {} is already scheduled for fencing by {}",
                node,
                pending.name_any()
            );
            return Ok(CreateOutcome::AlreadyPending(pending.name_any()));
        }

        let request = self.build_request(node, cause);

        let created = self
            .retry
            .run(
                || async {
                    match self.gateway.create_fencing_request(&request).await {
                        Ok(created) => Ok(Some(created)),
                        Err(e) if e.is_already_exists() => {
                            debug!("Fencing request for {} already exists", node);
                            Ok(None)
                        }
                        // Writes to the API server fail often enough to retry everything else
                        Err(e) => Err(e),
                    }
                },
                |_| true,
            )
            .await;

        match created {
            Ok(created) => {
                metrics::REQUESTS_CREATED.inc();
                let name = created.map(|r| r.name_any());
                info!(
                    "Created fencing request {} for node {}: {}",
                    name.as_deref().unwrap_or("(existing)"),
                    node,
                    cause
                );
                Ok(CreateOutcome::Created(name))
            }
            Err(e) => {
                metrics::REQUEST_CREATE_FAILURES.inc();
                error!("Failed to create fencing request for node {}: {}", node, e);
                Err(e)
            }
        }
    }

    /// Delete the requests targeting `node`, or just the one named `name`
    ///
    /// Failures are logged per request and do not stop the remaining
    /// deletions. Returns how many requests were deleted.
    #[instrument(skip(self))]
    pub async fn delete_requests(&self, node: &str, name: Option<&str>) -> Result<usize> {
        let requests = self.list_requests(node, name).await?;
        let mut deleted = 0;

        for request in &requests {
            match self.gateway.delete_fencing_request(request).await {
                Ok(()) => {
                    info!("Deleted fencing request {}", request.name_any());
                    deleted += 1;
                }
                Err(e) if e.is_not_found() => {
                    debug!("Fencing request {} already deleted", request.name_any());
                }
                Err(e) => {
                    error!(
                        "Failed to delete fencing request {} ({}): {}",
                        request.name_any(),
                        request.uid().unwrap_or_default(),
                        e
                    );
                }
            }
        }

        Ok(deleted)
    }

    /// Observe a request change reported by the watch
    pub fn on_request_changed(&self, request: &FencingRequest, deleted: bool) {
        let name = request.name_any();
        if deleted {
            debug!(
                "Fencing request {} for {} deleted",
                name, request.spec.target
            );
            return;
        }

        if request.is_active() {
            debug!(
                "Fencing request {} for {} is {}",
                name,
                request.spec.target,
                request.phase()
            );
        } else {
            metrics::REQUESTS_COMPLETED.inc();
            let message = request
                .status
                .as_ref()
                .and_then(|s| s.message.clone())
                .unwrap_or_default();
            info!(
                "Node {} fenced by request {} {}",
                request.spec.target, name, message
            );
        }
    }

    fn build_request(&self, node: &str, cause: &str) -> FencingRequest {
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGER_NAME.to_string());
        labels.insert(TARGET_LABEL.to_string(), target_label_value(node));

        FencingRequest {
            metadata: ObjectMeta {
                generate_name: Some(format!("node-fence-{}-", node)),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                owner_references: self.owner.clone().map(|o| vec![o]),
                ..Default::default()
            },
            spec: FencingRequestSpec {
                target: node.to_string(),
                origin: cause.to_string(),
                operation: FencingOperation::Off,
                requested_at: Some(chrono::Utc::now().to_rfc3339()),
            },
            status: None,
        }
    }
}

/// Create an OwnerReference pointing at a FencingSet
pub fn owner_reference(set: &FencingSet) -> Option<OwnerReference> {
    let uid = set.metadata.uid.clone();
    if uid.is_none() {
        warn!("FencingSet {} has no uid, requests will be unowned", set.name_any());
    }
    Some(OwnerReference {
        api_version: FencingSet::api_version(&()).to_string(),
        kind: FencingSet::kind(&()).to_string(),
        name: set.name_any(),
        uid: uid?,
        controller: Some(true),
        block_owner_deletion: Some(false),
    })
}
