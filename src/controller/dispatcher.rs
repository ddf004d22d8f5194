//! Watch loop and event routing
//!
//! Merges the node, event, FencingSet and FencingRequest watches into one
//! stream and hands each notification to its handler in order.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Event, Node};
use kube::{
    api::Api,
    client::Client,
    runtime::{watcher, WatchStreamExt},
    Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use super::gateway::ClusterGateway;
use super::health::NodeHealthEvaluator;
use super::lifecycle::FencingRequestManager;
use crate::config::OperatorConfig;
use crate::crd::{FencingRequest, FencingSet};
use crate::error::{Error, Result};
use crate::mechanism::build_execution_unit;

/// A change notification from one of the watched resource kinds
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    Node(Node),
    Warning(Event),
    Config(FencingSet),
    FencingRequest(FencingRequest),
}

impl ClusterEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterEvent::Node(_) => "Node",
            ClusterEvent::Warning(_) => "Event",
            ClusterEvent::Config(_) => "FencingSet",
            ClusterEvent::FencingRequest(_) => "FencingRequest",
        }
    }

    pub fn name(&self) -> String {
        match self {
            ClusterEvent::Node(o) => o.name_any(),
            ClusterEvent::Warning(o) => o.name_any(),
            ClusterEvent::Config(o) => o.name_any(),
            ClusterEvent::FencingRequest(o) => o.name_any(),
        }
    }
}

/// Shared state for the controller
pub struct ControllerState {
    pub requests: Arc<FencingRequestManager>,
    pub evaluator: NodeHealthEvaluator,
    pub config: OperatorConfig,
}

impl ControllerState {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        requests: FencingRequestManager,
        config: OperatorConfig,
    ) -> Self {
        let requests = Arc::new(requests);
        let evaluator =
            NodeHealthEvaluator::new(gateway, requests.clone(), config.event_source_set());
        Self {
            requests,
            evaluator,
            config,
        }
    }

    /// Route a notification to its handler
    ///
    /// Handler errors are logged here and never returned, so one failing
    /// object cannot stall the watch.
    pub async fn dispatch(&self, event: ClusterEvent, deleted: bool) {
        let kind = event.kind();
        let name = event.name();

        let result = match event {
            ClusterEvent::Node(node) => self.evaluator.on_node_changed(&node, deleted).await,
            ClusterEvent::Warning(ev) => self.evaluator.on_warning_event(&ev, deleted).await,
            ClusterEvent::Config(set) => self.on_config_changed(&set, deleted).await.map(|_| ()),
            ClusterEvent::FencingRequest(request) => {
                self.requests.on_request_changed(&request, deleted);
                Ok(())
            }
        };

        if let Err(e) = result {
            error!("Failed to handle {} {}: {}", kind, name, e);
        }
    }

    /// Validate a changed FencingSet and check its mechanisms against the
    /// nodes awaiting fencing
    ///
    /// Every mechanism is built for every node with a pending request, using
    /// the configured secrets directory and images. Returns how many
    /// (mechanism, node) pairs cannot be built.
    async fn on_config_changed(&self, set: &FencingSet, deleted: bool) -> Result<usize> {
        let name = set.name_any();
        if deleted {
            info!("FencingSet {} deleted", name);
            return Ok(0);
        }

        if let Err(e) = set.spec.validate() {
            warn!("FencingSet {} is invalid: {}", name, e);
            return Ok(0);
        }
        info!(
            "FencingSet {} accepted with {} mechanism(s)",
            name,
            set.spec.mechanisms.len()
        );

        let targets = self.requests.pending_targets().await?;
        Ok(self.check_mechanisms(set, &targets))
    }

    fn check_mechanisms(&self, set: &FencingSet, targets: &BTreeSet<String>) -> usize {
        let mut unusable = 0;
        for target in targets {
            for (i, mechanism) in set.spec.mechanisms.iter().enumerate() {
                match build_execution_unit(
                    mechanism,
                    target,
                    &self.config.secrets_dir,
                    &self.config.images,
                    self.config.operator_image.as_deref(),
                ) {
                    Ok(unit) => debug!(
                        "FencingSet {} mechanism {} ({}) can fence {} with {}",
                        set.name_any(),
                        i,
                        mechanism.driver,
                        target,
                        unit.image
                    ),
                    Err(e) => {
                        unusable += 1;
                        warn!(
                            "FencingSet {} mechanism {} ({}) cannot fence {}: {}",
                            set.name_any(),
                            i,
                            mechanism.driver,
                            target,
                            e
                        );
                    }
                }
            }
        }
        unusable
    }
}

type Notifications = BoxStream<'static, Result<Vec<(ClusterEvent, bool)>, watcher::Error>>;

fn watch<K, F>(api: Api<K>, config: watcher::Config, wrap: F) -> Notifications
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    F: Fn(K) -> ClusterEvent + Send + 'static,
{
    watcher(api, config)
        .default_backoff()
        .map(move |res| {
            res.map(|event| match event {
                watcher::Event::Applied(obj) => vec![(wrap(obj), false)],
                watcher::Event::Deleted(obj) => vec![(wrap(obj), true)],
                watcher::Event::Restarted(objs) => {
                    objs.into_iter().map(|obj| (wrap(obj), false)).collect()
                }
            })
        })
        .boxed()
}

/// Main entry point to start the controller
///
/// Watches nodes, Warning events, FencingSets and FencingRequests and
/// handles each notification in turn until a shutdown signal arrives.
pub async fn run_controller(client: Client, state: Arc<ControllerState>) -> Result<()> {
    let requests: Api<FencingRequest> = Api::all(client.clone());

    info!("Starting fencing controller");

    // Verify CRD exists
    match requests.list(&Default::default()).await {
        Ok(_) => info!("FencingRequest CRD is available"),
        Err(e) => {
            error!(
                "FencingRequest CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "FencingRequest CRD not installed".to_string(),
            ));
        }
    }

    let notifications = stream::select_all(vec![
        watch(
            Api::<Node>::all(client.clone()),
            watcher::Config::default(),
            ClusterEvent::Node,
        ),
        watch(
            Api::<Event>::all(client.clone()),
            watcher::Config::default().fields("type=Warning"),
            ClusterEvent::Warning,
        ),
        watch(
            Api::<FencingSet>::all(client.clone()),
            watcher::Config::default(),
            ClusterEvent::Config,
        ),
        watch(requests, watcher::Config::default(), ClusterEvent::FencingRequest),
    ]);

    let handle = notifications.for_each(|res| {
        let state = state.clone();
        async move {
            match res {
                Ok(batch) => {
                    for (event, deleted) in batch {
                        debug!(
                            "Dispatching {} {} (deleted={})",
                            event.kind(),
                            event.name(),
                            deleted
                        );
                        state.dispatch(event, deleted).await;
                    }
                }
                Err(e) => warn!("Watch error: {}", e),
            }
        }
    });

    tokio::select! {
        _ = handle => warn!("Watch streams ended"),
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::retry::RetryPolicy;
    use crate::controller::testing::{node, FakeGateway};
    use crate::config::ImageCatalog;
    use crate::crd::{DynamicConfig, FencingMechanism, FencingSetSpec, MechanismDriver};

    fn state_with(gateway: &Arc<FakeGateway>, config: OperatorConfig) -> ControllerState {
        let requests = FencingRequestManager::new(gateway.clone(), "default")
            .with_retry(RetryPolicy::immediate());
        ControllerState::new(gateway.clone(), requests, config)
    }

    fn state(gateway: &Arc<FakeGateway>) -> ControllerState {
        state_with(gateway, OperatorConfig::default())
    }

    fn agent_set(ips: &[(&str, &str)]) -> FencingSet {
        FencingSet::new(
            "workers",
            FencingSetSpec {
                mechanisms: vec![FencingMechanism {
                    driver: MechanismDriver::OutOfBandAgent,
                    module: Some("ipmilan".to_string()),
                    config: Default::default(),
                    secrets: Default::default(),
                    dynamic_config: vec![DynamicConfig {
                        field: "ip".to_string(),
                        values: ips
                            .iter()
                            .map(|(n, ip)| (n.to_string(), ip.to_string()))
                            .collect(),
                        default: None,
                    }],
                    image: None,
                }],
            },
        )
    }

    #[tokio::test]
    async fn test_node_notifications_reach_evaluator() {
        let gateway = Arc::new(FakeGateway::default());
        let state = state(&gateway);

        state
            .dispatch(ClusterEvent::Node(node("n1", &[("Ready", "Unknown")])), false)
            .await;
        state
            .dispatch(ClusterEvent::Node(node("n1", &[("Ready", "Unknown")])), false)
            .await;

        assert_eq!(gateway.requests().len(), 1);
        assert_eq!(gateway.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_handler_errors_are_swallowed() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.fail_next_creates(10);
        let state = state(&gateway);

        state
            .dispatch(ClusterEvent::Node(node("n1", &[("Ready", "Unknown")])), false)
            .await;

        assert_eq!(gateway.create_calls(), 5);
        assert!(gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn test_node_deletion_cancels_requests() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.insert_request("n1", false);
        let state = state(&gateway);

        state
            .dispatch(ClusterEvent::Node(node("n1", &[])), true)
            .await;

        assert!(gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn test_config_and_request_notifications_do_not_write() {
        let gateway = Arc::new(FakeGateway::default());
        let name = gateway.insert_request("n1", true);
        let state = state(&gateway);

        let set = FencingSet::new(
            "workers",
            FencingSetSpec {
                mechanisms: vec![FencingMechanism {
                    driver: MechanismDriver::NoOpEcho,
                    module: None,
                    config: Default::default(),
                    secrets: Default::default(),
                    dynamic_config: vec![],
                    image: None,
                }],
            },
        );
        state.dispatch(ClusterEvent::Config(set), false).await;

        let request = gateway.requests().into_iter().find(|r| r.name_any() == name).unwrap();
        state
            .dispatch(ClusterEvent::FencingRequest(request), false)
            .await;

        assert_eq!(gateway.create_calls(), 0);
        assert_eq!(gateway.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_config_change_checks_pending_targets() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.insert_request("n1", false);
        gateway.insert_request("n2", false);
        gateway.insert_request("n3", true);
        let state = state(&gateway);

        let set = agent_set(&[("n1", "10.0.0.1"), ("n3", "10.0.0.3")]);
        assert_eq!(state.on_config_changed(&set, false).await.unwrap(), 1);

        let set = agent_set(&[("n1", "10.0.0.1"), ("n2", "10.0.0.2")]);
        assert_eq!(state.on_config_changed(&set, false).await.unwrap(), 0);
        assert_eq!(gateway.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_config_change_uses_configured_images() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.insert_request("n1", false);
        let set = agent_set(&[("n1", "10.0.0.1")]);

        let no_images = OperatorConfig {
            images: ImageCatalog {
                out_of_band_agent: String::new(),
                ..Default::default()
            },
            ..Default::default()
        };
        let state = state_with(&gateway, no_images.clone());
        assert_eq!(state.on_config_changed(&set, false).await.unwrap(), 1);

        let with_operator_image = OperatorConfig {
            operator_image: Some("quay.io/example/fencing-operator:1".to_string()),
            ..no_images
        };
        let state = state_with(&gateway, with_operator_image);
        assert_eq!(state.on_config_changed(&set, false).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_config_change_list_failure_is_returned() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.fail_request_lists();
        let state = state(&gateway);

        assert!(state
            .on_config_changed(&agent_set(&[]), false)
            .await
            .is_err());
        assert_eq!(state.on_config_changed(&agent_set(&[]), true).await.unwrap(), 0);
    }

    #[test]
    fn test_event_identity() {
        let event = ClusterEvent::Node(node("n1", &[]));
        assert_eq!(event.kind(), "Node");
        assert_eq!(event.name(), "n1");
    }
}
