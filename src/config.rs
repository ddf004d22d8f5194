//! Operator configuration
//!
//! Parsed from command line flags with environment fallbacks.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::crd::MechanismDriver;

/// Event source components reported by node-problem-detector and friends
pub const DEFAULT_EVENT_SOURCES: &[&str] = &[
    "abrt-notification",
    "abrt-adaptor",
    "docker-monitor",
    "kernel-monitor",
    "kernel",
];

#[derive(Parser, Debug)]
#[command(name = "fencing-operator")]
#[command(about = "Fences Kubernetes nodes that become unreachable", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: OperatorConfig,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "FENCING_LOG_JSON")]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the operator (default)
    Run,
    /// Print the CustomResourceDefinitions as YAML
    Crd,
}

/// Runtime configuration shared by the controller components
#[derive(Args, Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace fencing requests are created in
    #[arg(long, env = "FENCING_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// The operator's own image, last-resort image for mechanisms
    #[arg(long, env = "OPERATOR_IMAGE")]
    pub operator_image: Option<String>,

    /// Directory mechanism secrets are mounted at inside execution units
    #[arg(long, env = "FENCING_SECRETS_DIR", default_value = "/etc/fencing/secrets")]
    pub secrets_dir: PathBuf,

    /// FencingSet (in --namespace) that owns the requests the operator creates
    #[arg(long, env = "FENCING_SET")]
    pub fencing_set: Option<String>,

    /// Event source components whose Warning events can trigger fencing
    #[arg(
        long,
        env = "FENCING_EVENT_SOURCES",
        value_delimiter = ',',
        default_values_t = DEFAULT_EVENT_SOURCES.iter().map(|s| s.to_string()).collect::<Vec<_>>()
    )]
    pub event_sources: Vec<String>,

    /// Address for the /health and /metrics endpoints
    #[arg(long, env = "FENCING_METRICS_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_addr: SocketAddr,

    #[command(flatten)]
    pub images: ImageCatalog,
}

impl OperatorConfig {
    /// The event source allow-list as an immutable set
    pub fn event_source_set(&self) -> BTreeSet<String> {
        self.event_sources
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            operator_image: None,
            secrets_dir: PathBuf::from("/etc/fencing/secrets"),
            fencing_set: None,
            event_sources: DEFAULT_EVENT_SOURCES.iter().map(|s| s.to_string()).collect(),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            images: ImageCatalog::default(),
        }
    }
}

/// Well-known images per driver
///
/// Setting a driver's image to an empty string makes mechanisms without an
/// explicit image fall back to the operator image.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ImageCatalog {
    #[arg(
        long = "cloud-delete-image",
        env = "FENCING_CLOUD_DELETE_IMAGE",
        default_value = "quay.io/beekhof/openstack-novaclient"
    )]
    pub cloud_delete: String,

    #[arg(
        long = "agent-image",
        env = "FENCING_AGENT_IMAGE",
        default_value = "quay.io/beekhof/rhelha-fencing"
    )]
    pub out_of_band_agent: String,

    #[arg(long = "echo-image", env = "FENCING_ECHO_IMAGE", default_value = "busybox")]
    pub no_op_echo: String,
}

impl ImageCatalog {
    /// The well-known image for a driver, if one is configured
    pub fn image_for(&self, driver: MechanismDriver) -> Option<&str> {
        let image = match driver {
            MechanismDriver::CloudDelete => &self.cloud_delete,
            MechanismDriver::OutOfBandAgent => &self.out_of_band_agent,
            MechanismDriver::NoOpEcho => &self.no_op_echo,
        };
        Some(image.as_str()).filter(|i| !i.is_empty())
    }
}

impl Default for ImageCatalog {
    fn default() -> Self {
        Self {
            cloud_delete: "quay.io/beekhof/openstack-novaclient".to_string(),
            out_of_band_agent: "quay.io/beekhof/rhelha-fencing".to_string(),
            no_op_echo: "busybox".to_string(),
        }
    }
}
