//! FencingRequest Custom Resource Definition
//!
//! A FencingRequest records the decision to fence one node. The operator
//! creates it; an executor marks it complete once the node is powered off.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::types::FencingOperation;

/// Label carrying the target node name, used to list requests per node
pub const TARGET_LABEL: &str = "fencing.clusterlabs.org/target";

/// Label marking resources created by this operator
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGER_NAME: &str = "fencing-operator";

/// Longest value the API server accepts for a label
pub const MAX_LABEL_VALUE_LEN: usize = 63;

const TARGET_HASH_LEN: usize = 10;

/// Value of [`TARGET_LABEL`] for a node
///
/// Node names up to 63 characters are used as they are. Longer names are
/// cut down to a prefix followed by a hash of the full name, so distinct
/// nodes keep distinct values. The value only narrows list queries; the
/// request's `spec.target` stays the exact match.
pub fn target_label_value(node: &str) -> String {
    if node.len() <= MAX_LABEL_VALUE_LEN {
        return node.to_string();
    }

    let digest = hex::encode(Sha256::digest(node.as_bytes()));
    let budget = MAX_LABEL_VALUE_LEN - TARGET_HASH_LEN - 1;
    // Keep the cut on a char boundary
    let mut end = budget;
    while !node.is_char_boundary(end) {
        end -= 1;
    }
    let prefix = node[..end].trim_end_matches(|c: char| !c.is_ascii_alphanumeric());

    format!("{}-{}", prefix, &digest[..TARGET_HASH_LEN])
}

/// The FencingRequest CRD asks for one node to be fenced.
///
/// # Example
///
/// ```yaml
/// apiVersion: fencing.clusterlabs.org/v1alpha1
/// kind: FencingRequest
/// metadata:
///   generateName: node-fence-worker-1-
///   namespace: default
/// spec:
///   target: worker-1
///   origin: "NodeCondition Ready=Unknown (NodeStatusUnknown)"
///   operation: Off
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "fencing.clusterlabs.org",
    version = "v1alpha1",
    kind = "FencingRequest",
    namespaced,
    status = "FencingRequestStatus",
    shortname = "fr",
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.target"}"#,
    printcolumn = r#"{"name":"Operation","type":"string","jsonPath":".spec.operation"}"#,
    printcolumn = r#"{"name":"Complete","type":"boolean","jsonPath":".status.complete"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FencingRequestSpec {
    /// Name of the node to fence
    pub target: String,

    /// What caused the request (node condition or problem event reason)
    pub origin: String,

    /// Operation to perform on the target
    #[serde(default)]
    pub operation: FencingOperation,

    /// RFC3339 time the operator created the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<String>,
}

/// Status subresource for FencingRequest
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FencingRequestStatus {
    /// Set by the executor once the operation has been carried out
    #[serde(default)]
    pub complete: bool,

    /// Human-readable message from the executor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// RFC3339 time the request completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl FencingRequest {
    /// A request is active until its executor marks it complete
    pub fn is_active(&self) -> bool {
        !self.status.as_ref().map(|s| s.complete).unwrap_or(false)
    }

    /// Lifecycle phase derived from the status
    pub fn phase(&self) -> &'static str {
        if self.metadata.deletion_timestamp.is_some() {
            "Deleting"
        } else if self.is_active() {
            "Pending"
        } else {
            "Complete"
        }
    }
}
