//! Shared types for fencing mechanism specifications
//!
//! These types are used across the CRD definitions, the controller, and the
//! mechanism driver.

use std::collections::BTreeMap;

use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Supported fencing drivers
///
/// Parsed from the `driver` string of a mechanism. Unknown names are
/// rejected with [`Error::UnsupportedDriver`].
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum MechanismDriver {
    /// Delete the target instance through the cloud compute API
    CloudDelete,
    /// Power the target off through an out-of-band fence agent
    OutOfBandAgent,
    /// Same argument vector as the agent, printed with /bin/echo instead of run
    NoOpEcho,
}

impl MechanismDriver {
    /// Every name accepted when parsing, canonical names first
    pub const ACCEPTED_NAMES: &'static [&'static str] = &[
        "cloud-delete",
        "out-of-band-agent",
        "no-op-echo",
        "openstack",
        "baremetal",
        "echo",
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MechanismDriver::CloudDelete => "cloud-delete",
            MechanismDriver::OutOfBandAgent => "out-of-band-agent",
            MechanismDriver::NoOpEcho => "no-op-echo",
        }
    }

    /// Whether the driver runs a fence agent binary (and so needs a module)
    pub fn uses_agent(&self) -> bool {
        matches!(
            self,
            MechanismDriver::OutOfBandAgent | MechanismDriver::NoOpEcho
        )
    }
}

impl std::fmt::Display for MechanismDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MechanismDriver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cloud-delete" | "openstack" => Ok(MechanismDriver::CloudDelete),
            "out-of-band-agent" | "baremetal" => Ok(MechanismDriver::OutOfBandAgent),
            "no-op-echo" | "echo" => Ok(MechanismDriver::NoOpEcho),
            other => Err(Error::UnsupportedDriver(other.to_string())),
        }
    }
}

// Published as a string enum so the API server rejects unknown drivers
impl JsonSchema for MechanismDriver {
    fn schema_name() -> String {
        "MechanismDriver".to_string()
    }

    fn is_referenceable() -> bool {
        false
    }

    fn json_schema(_: &mut SchemaGenerator) -> Schema {
        SchemaObject {
            instance_type: Some(InstanceType::String.into()),
            enum_values: Some(
                Self::ACCEPTED_NAMES
                    .iter()
                    .map(|name| serde_json::Value::from(*name))
                    .collect(),
            ),
            ..Default::default()
        }
        .into()
    }
}

impl TryFrom<String> for MechanismDriver {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MechanismDriver> for String {
    fn from(driver: MechanismDriver) -> Self {
        driver.as_str().to_string()
    }
}

/// A configuration field whose value depends on the fencing target
///
/// For example the IPMI address of each node, or the cloud region an
/// instance lives in.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DynamicConfig {
    /// Name of the option passed to the driver
    pub field: String,

    /// Per-target values, keyed by node name
    #[serde(default)]
    pub values: BTreeMap<String, String>,

    /// Value used for targets without an entry in `values`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl DynamicConfig {
    /// Resolve the value for `target`
    ///
    /// The per-target value wins, then a non-empty default. `None` means
    /// the mechanism cannot be used against this target.
    pub fn lookup(&self, target: &str) -> Option<&str> {
        if let Some(value) = self.values.get(target) {
            return Some(value.as_str());
        }
        self.default.as_deref().filter(|d| !d.is_empty())
    }
}

/// How to fence a node with one backend family
///
/// # Example
///
/// ```yaml
/// driver: out-of-band-agent
/// module: ipmilan
/// config:
///   lanplus: "1"
/// secrets:
///   password: ipmi-password
/// dynamicConfig:
///   - field: ip
///     values:
///       worker-0: 10.0.0.10
///       worker-1: 10.0.0.11
/// ```
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FencingMechanism {
    /// Driver family (cloud-delete, out-of-band-agent, no-op-echo)
    pub driver: MechanismDriver,

    /// Fence agent module, e.g. "ipmilan" runs /sbin/fence_ipmilan
    /// Required for out-of-band-agent and no-op-echo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,

    /// Static options passed to every invocation
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,

    /// Options whose values are read from mounted secret files
    /// (option name -> file name inside the secrets directory)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, String>,

    /// Options resolved per target
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dynamic_config: Vec<DynamicConfig>,

    /// Container image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl FencingMechanism {
    /// Validate the mechanism independent of any target
    pub fn validate(&self) -> Result<(), String> {
        if self.driver.uses_agent() {
            match self.module.as_deref().map(str::trim) {
                None | Some("") => {
                    return Err(format!("module is required for {} mechanisms", self.driver));
                }
                Some(m) if m.contains('/') => {
                    return Err(format!("module must be a bare agent name, got '{}'", m));
                }
                _ => {}
            }
        }

        for (i, dc) in self.dynamic_config.iter().enumerate() {
            if dc.field.trim().is_empty() {
                return Err(format!("dynamicConfig[{}].field must not be empty", i));
            }
        }

        for (name, file) in &self.secrets {
            if file.trim().is_empty() {
                return Err(format!("secrets.{} must name a file", name));
            }
        }

        Ok(())
    }
}

/// Fencing operation requested for a target
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum FencingOperation {
    /// Power the target off
    #[default]
    Off,
}

impl std::fmt::Display for FencingOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FencingOperation::Off => write!(f, "Off"),
        }
    }
}
