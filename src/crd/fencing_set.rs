//! FencingSet Custom Resource Definition
//!
//! Groups the mechanisms available to fence the cluster's nodes. Requests
//! created by the operator may be owned by a set.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::FencingMechanism;

/// The FencingSet CRD lists the ways nodes can be fenced, in order of preference.
///
/// # Example
///
/// ```yaml
/// apiVersion: fencing.clusterlabs.org/v1alpha1
/// kind: FencingSet
/// metadata:
///   name: workers
///   namespace: default
/// spec:
///   mechanisms:
///     - driver: cloud-delete
///       config:
///         OS_AUTH_URL: https://keystone.example.com:5000/v3
///       secrets:
///         OS_PASSWORD: os-password
///       dynamicConfig:
///         - field: OS_REGION_NAME
///           default: RegionOne
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "fencing.clusterlabs.org",
    version = "v1alpha1",
    kind = "FencingSet",
    namespaced,
    shortname = "fs",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FencingSetSpec {
    /// Mechanisms to try, first one first
    #[serde(default)]
    pub mechanisms: Vec<FencingMechanism>,
}

impl FencingSetSpec {
    /// Validate every mechanism, reporting the first failure with its index
    pub fn validate(&self) -> Result<(), String> {
        if self.mechanisms.is_empty() {
            return Err("mechanisms must not be empty".to_string());
        }
        for (i, mechanism) in self.mechanisms.iter().enumerate() {
            mechanism
                .validate()
                .map_err(|e| format!("mechanisms[{}]: {}", i, e))?;
        }
        Ok(())
    }
}
