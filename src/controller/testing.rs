//! In-memory cluster used by the controller tests

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Node, NodeCondition, NodeStatus, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Pod, PodSpec, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use super::gateway::ClusterGateway;
use crate::crd::{
    target_label_value, FencingOperation, FencingRequest, FencingRequestSpec,
    FencingRequestStatus, FencingSet, MAX_LABEL_VALUE_LEN, TARGET_LABEL,
};
use crate::error::{Error, Result};

#[derive(Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    pods: Vec<Pod>,
    claims: BTreeMap<(String, String), PersistentVolumeClaim>,
    requests: Vec<FencingRequest>,
    sets: BTreeMap<(String, String), FencingSet>,
    next_id: u32,
    create_calls: u32,
    failing_creates: u32,
    conflict_on_create: bool,
    fail_request_lists: bool,
    fail_pod_lists: bool,
    failing_deletes: HashSet<String>,
}

#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<State>,
}

fn transient(what: &str) -> Error {
    Error::ConfigError(format!("simulated API failure: {}", what))
}

impl FakeGateway {
    pub fn add_node(&self, node: Node) {
        let mut state = self.state.lock().unwrap();
        state.nodes.insert(node.name_any(), node);
    }

    pub fn add_pod(&self, pod: Pod) {
        self.state.lock().unwrap().pods.push(pod);
    }

    pub fn add_claim(&self, namespace: &str, name: &str, volume: &str) {
        let claim = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                volume_name: Some(volume.to_string()),
                ..Default::default()
            }),
            status: None,
        };
        self.state
            .lock()
            .unwrap()
            .claims
            .insert((namespace.to_string(), name.to_string()), claim);
    }

    pub fn add_set(&self, set: FencingSet) {
        let key = (set.namespace().unwrap_or_default(), set.name_any());
        self.state.lock().unwrap().sets.insert(key, set);
    }

    /// Store an existing request for `target`, returning its name
    pub fn insert_request(&self, target: &str, complete: bool) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let name = format!("node-fence-{}-{:05}", target, state.next_id);
        let mut request = FencingRequest::new(
            &name,
            FencingRequestSpec {
                target: target.to_string(),
                origin: "seeded".to_string(),
                operation: FencingOperation::Off,
                requested_at: None,
            },
        );
        request.metadata.namespace = Some("default".to_string());
        request.metadata.labels = Some(
            [(TARGET_LABEL.to_string(), target_label_value(target))]
                .into_iter()
                .collect(),
        );
        request.status = Some(FencingRequestStatus {
            complete,
            ..Default::default()
        });
        state.requests.push(request);
        name
    }

    pub fn fail_next_creates(&self, count: u32) {
        self.state.lock().unwrap().failing_creates = count;
    }

    pub fn conflict_on_create(&self) {
        self.state.lock().unwrap().conflict_on_create = true;
    }

    pub fn fail_request_lists(&self) {
        self.state.lock().unwrap().fail_request_lists = true;
    }

    pub fn fail_pod_lists(&self) {
        self.state.lock().unwrap().fail_pod_lists = true;
    }

    pub fn fail_delete_of(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert(name.to_string());
    }

    pub fn create_calls(&self) -> u32 {
        self.state.lock().unwrap().create_calls
    }

    pub fn requests(&self) -> Vec<FencingRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Mark every stored request for `target` complete
    pub fn complete_requests(&self, target: &str) {
        let mut state = self.state.lock().unwrap();
        for request in state.requests.iter_mut().filter(|r| r.spec.target == target) {
            request.status = Some(FencingRequestStatus {
                complete: true,
                ..Default::default()
            });
        }
    }
}

#[async_trait]
impl ClusterGateway for FakeGateway {
    async fn get_node(&self, name: &str) -> Result<Node> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "Node".to_string(),
                name: name.to_string(),
                namespace: String::new(),
            })
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        let state = self.state.lock().unwrap();
        if state.fail_pod_lists {
            return Err(transient("list pods"));
        }
        Ok(state
            .pods
            .iter()
            .filter(|p| {
                p.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(node_name)
            })
            .cloned()
            .collect())
    }

    async fn get_volume_claim(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim> {
        self.state
            .lock()
            .unwrap()
            .claims
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "PersistentVolumeClaim".to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn list_fencing_requests(
        &self,
        target: &str,
        name: Option<&str>,
    ) -> Result<Vec<FencingRequest>> {
        let state = self.state.lock().unwrap();
        if state.fail_request_lists {
            return Err(transient("list fencing requests"));
        }
        let label = target_label_value(target);
        Ok(state
            .requests
            .iter()
            .filter(|r| r.labels().get(TARGET_LABEL) == Some(&label))
            .filter(|r| r.spec.target == target)
            .filter(|r| name.map_or(true, |n| r.name_any() == n))
            .cloned()
            .collect())
    }

    async fn list_all_fencing_requests(&self) -> Result<Vec<FencingRequest>> {
        let state = self.state.lock().unwrap();
        if state.fail_request_lists {
            return Err(transient("list fencing requests"));
        }
        Ok(state.requests.clone())
    }

    async fn create_fencing_request(&self, request: &FencingRequest) -> Result<FencingRequest> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;

        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(transient("create fencing request"));
        }
        // The API server rejects oversized label values with 422 Invalid
        if let Some((key, value)) = request
            .labels()
            .iter()
            .find(|(_, v)| v.len() > MAX_LABEL_VALUE_LEN)
        {
            return Err(Error::ValidationError(format!(
                "label {}={} must be no more than {} characters",
                key, value, MAX_LABEL_VALUE_LEN
            )));
        }
        if state.conflict_on_create {
            return Err(Error::AlreadyExists {
                kind: "FencingRequest".to_string(),
                name: request.metadata.generate_name.clone().unwrap_or_default(),
            });
        }

        state.next_id += 1;
        let mut stored = request.clone();
        let prefix = request.metadata.generate_name.clone().unwrap_or_default();
        stored.metadata.name = Some(format!("{}{:05}", prefix, state.next_id));
        stored.metadata.uid = Some(format!("uid-{}", state.next_id));
        state.requests.push(stored.clone());
        Ok(stored)
    }

    async fn delete_fencing_request(&self, request: &FencingRequest) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let name = request.name_any();
        if state.failing_deletes.contains(&name) {
            return Err(transient("delete fencing request"));
        }
        let before = state.requests.len();
        state.requests.retain(|r| r.name_any() != name);
        if state.requests.len() == before {
            return Err(Error::NotFound {
                kind: "FencingRequest".to_string(),
                name,
                namespace: request.namespace().unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn get_fencing_set(&self, namespace: &str, name: &str) -> Result<FencingSet> {
        self.state
            .lock()
            .unwrap()
            .sets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "FencingSet".to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }
}

/// A node with the given (type, status) conditions
pub fn node(name: &str, conditions: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: None,
        status: Some(NodeStatus {
            conditions: Some(
                conditions
                    .iter()
                    .map(|(type_, status)| NodeCondition {
                        type_: type_.to_string(),
                        status: status.to_string(),
                        reason: Some("Test".to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
    }
}

/// A pod scheduled on `node_name` mounting the given claims
pub fn pod(namespace: &str, name: &str, node_name: &str, claims: &[&str]) -> Pod {
    let mut volumes = vec![Volume {
        name: "scratch".to_string(),
        empty_dir: Some(Default::default()),
        ..Default::default()
    }];
    volumes.extend(claims.iter().map(|claim| Volume {
        name: format!("{}-vol", claim),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim.to_string(),
            read_only: None,
        }),
        ..Default::default()
    }));

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node_name.to_string()),
            volumes: Some(volumes),
            ..Default::default()
        }),
        status: None,
    }
}
