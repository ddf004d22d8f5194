//! Cluster resource gateway
//!
//! The controller talks to the API server only through [`ClusterGateway`],
//! so the evaluation and lifecycle logic can run against an in-memory
//! cluster in tests. [`KubeGateway`] is the real implementation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, PersistentVolumeClaim, Pod};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    Client, ResourceExt,
};
use tracing::debug;

use crate::crd::{target_label_value, FencingRequest, FencingSet, TARGET_LABEL};
use crate::error::{Error, Result};

#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Fetch a node by name
    async fn get_node(&self, name: &str) -> Result<Node>;

    /// List pods scheduled on a node, across all namespaces
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>>;

    /// Fetch a PersistentVolumeClaim
    async fn get_volume_claim(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim>;

    /// List fencing requests targeting a node, optionally only the one named `name`
    async fn list_fencing_requests(
        &self,
        target: &str,
        name: Option<&str>,
    ) -> Result<Vec<FencingRequest>>;

    /// List every fencing request in the cluster
    async fn list_all_fencing_requests(&self) -> Result<Vec<FencingRequest>>;

    /// Create a fencing request, returning the stored object
    async fn create_fencing_request(&self, request: &FencingRequest) -> Result<FencingRequest>;

    /// Delete a fencing request
    async fn delete_fencing_request(&self, request: &FencingRequest) -> Result<()>;

    /// Fetch a fencing set
    async fn get_fencing_set(&self, namespace: &str, name: &str) -> Result<FencingSet>;
}

/// [`ClusterGateway`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn get_node(&self, name: &str) -> Result<Node> {
        let api: Api<Node> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(|e| Error::from_kube(e, "Node", "", name))
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let selector = format!("spec.nodeName={}", node_name);
        let pods = api
            .list(&ListParams::default().fields(&selector))
            .await
            .map_err(Error::KubeError)?;
        Ok(pods.items)
    }

    async fn get_volume_claim(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::from_kube(e, "PersistentVolumeClaim", namespace, name))
    }

    async fn list_fencing_requests(
        &self,
        target: &str,
        name: Option<&str>,
    ) -> Result<Vec<FencingRequest>> {
        let api: Api<FencingRequest> = Api::all(self.client.clone());

        // Custom resources only support metadata field selectors, so the
        // target is matched through its label and re-checked on the spec.
        let selector = format!("{}={}", TARGET_LABEL, target_label_value(target));
        let mut params = ListParams::default().labels(&selector);
        if let Some(name) = name {
            params = params.fields(&format!("metadata.name={}", name));
        }

        let requests = api.list(&params).await.map_err(Error::KubeError)?;
        debug!(
            "Found {} fencing request(s) labelled for {}",
            requests.items.len(),
            target
        );

        Ok(requests
            .items
            .into_iter()
            .filter(|r| r.spec.target == target)
            .collect())
    }

    async fn list_all_fencing_requests(&self) -> Result<Vec<FencingRequest>> {
        let api: Api<FencingRequest> = Api::all(self.client.clone());
        let requests = api
            .list(&ListParams::default())
            .await
            .map_err(Error::KubeError)?;
        Ok(requests.items)
    }

    async fn create_fencing_request(&self, request: &FencingRequest) -> Result<FencingRequest> {
        let namespace = request.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<FencingRequest> = Api::namespaced(self.client.clone(), &namespace);
        let name = request
            .metadata
            .name
            .clone()
            .or_else(|| request.metadata.generate_name.clone())
            .unwrap_or_default();

        api.create(&PostParams::default(), request)
            .await
            .map_err(|e| Error::from_kube(e, "FencingRequest", &namespace, &name))
    }

    async fn delete_fencing_request(&self, request: &FencingRequest) -> Result<()> {
        let namespace = request.namespace().unwrap_or_else(|| "default".to_string());
        let name = request.name_any();
        let api: Api<FencingRequest> = Api::namespaced(self.client.clone(), &namespace);

        api.delete(&name, &DeleteParams::default())
            .await
            .map_err(|e| Error::from_kube(e, "FencingRequest", &namespace, &name))?;
        Ok(())
    }

    async fn get_fencing_set(&self, namespace: &str, name: &str) -> Result<FencingSet> {
        let api: Api<FencingSet> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::from_kube(e, "FencingSet", namespace, name))
    }
}
