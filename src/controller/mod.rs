//! Controller module for node fencing
//!
//! This module contains the watch loop, node health evaluation, and the
//! lifecycle management of FencingRequests.

mod dispatcher;
mod gateway;
mod health;
mod lifecycle;
pub mod metrics;
mod retry;
#[cfg(test)]
mod testing;

pub use dispatcher::{run_controller, ClusterEvent, ControllerState};
pub use gateway::{ClusterGateway, KubeGateway};
pub use health::{
    claimed_volumes, is_node_lost, is_pod_dirty, LossSeverity, NodeHealthEvaluator,
};
pub use lifecycle::{owner_reference, CreateOutcome, FencingRequestManager};
pub use retry::RetryPolicy;
