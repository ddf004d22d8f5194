use std::path::Path;

use k8s_openapi::api::core::v1::{Container, EnvVar, VolumeMount};
use tracing::debug;

use crate::config::ImageCatalog;
use crate::crd::{FencingMechanism, MechanismDriver};
use crate::error::{Error, Result};

/// Name of the pod volume the executor mounts mechanism secrets from
pub const SECRETS_VOLUME_NAME: &str = "fencing-secrets";

/// Everything needed to run one fencing action
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionUnit {
    /// Prefix for the generated container/pod name
    pub name_prefix: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<EnvVar>,
    /// Directory the secrets referenced by `SECRETPATH_*` live in
    pub secrets_dir: String,
}

impl ExecutionUnit {
    /// Look up an environment variable by name
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    /// Build the container an executor schedules for this unit
    ///
    /// The pod is expected to provide a volume named [`SECRETS_VOLUME_NAME`].
    pub fn into_container(self) -> Container {
        Container {
            name: self.name_prefix.trim_end_matches('-').to_string(),
            image: Some(self.image),
            command: Some(self.command),
            env: Some(self.env),
            volume_mounts: Some(vec![VolumeMount {
                name: SECRETS_VOLUME_NAME.to_string(),
                mount_path: self.secrets_dir,
                read_only: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }
}

/// Build the execution unit that fences `target` with `mechanism`
///
/// Fails when a dynamic config field has no value for `target`, or when no
/// image can be determined. Builds are deterministic: the same inputs
/// always yield the same unit.
pub fn build_execution_unit(
    mechanism: &FencingMechanism,
    target: &str,
    secrets_dir: &Path,
    images: &ImageCatalog,
    operator_image: Option<&str>,
) -> Result<ExecutionUnit> {
    debug!(
        "Building {} execution unit for target {}",
        mechanism.driver, target
    );

    let image = resolve_image(mechanism, images, operator_image)?;
    let secrets_dir = secrets_dir.to_string_lossy().trim_end_matches('/').to_string();

    match mechanism.driver {
        MechanismDriver::CloudDelete => cloud_delete_unit(mechanism, target, secrets_dir, image),
        MechanismDriver::OutOfBandAgent => agent_unit(mechanism, target, secrets_dir, image, false),
        MechanismDriver::NoOpEcho => agent_unit(mechanism, target, secrets_dir, image, true),
    }
}

fn cloud_delete_unit(
    mechanism: &FencingMechanism,
    target: &str,
    secrets_dir: String,
    image: String,
) -> Result<ExecutionUnit> {
    let mut env = vec![env_var("SECRET_FORMAT", "env")];

    for (name, value) in &mechanism.config {
        env.push(env_var(name, value));
    }

    env.extend(secret_path_vars(mechanism, &secrets_dir));

    for dc in &mechanism.dynamic_config {
        let value = resolve_dynamic(mechanism, &dc.field, dc.lookup(target), target)?;
        env.push(env_var(&dc.field, value));
    }

    Ok(ExecutionUnit {
        name_prefix: "nova-".to_string(),
        image,
        command: vec![
            "/bin/nova".to_string(),
            "delete".to_string(),
            target.to_string(),
        ],
        env,
        secrets_dir,
    })
}

fn agent_unit(
    mechanism: &FencingMechanism,
    target: &str,
    secrets_dir: String,
    image: String,
    echo: bool,
) -> Result<ExecutionUnit> {
    let module = mechanism
        .module
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| {
            Error::ValidationError(format!(
                "module is required for {} mechanisms",
                mechanism.driver
            ))
        })?;

    let mut command = Vec::new();
    if echo {
        command.push("/bin/echo".to_string());
    }
    command.push(format!("/sbin/fence_{}", module));
    command.push("-v".to_string());

    for (name, value) in &mechanism.config {
        command.push(format!("--{}", name));
        command.push(value.clone());
    }

    for dc in &mechanism.dynamic_config {
        let value = resolve_dynamic(mechanism, &dc.field, dc.lookup(target), target)?;
        command.push(format!("--{}", dc.field));
        command.push(value.to_string());
    }

    let mut env = vec![env_var("SECRET_FORMAT", "args")];
    env.extend(secret_path_vars(mechanism, &secrets_dir));

    Ok(ExecutionUnit {
        name_prefix: "baremetal-".to_string(),
        image,
        command,
        env,
        secrets_dir,
    })
}

fn resolve_dynamic<'a>(
    mechanism: &FencingMechanism,
    field: &str,
    value: Option<&'a str>,
    target: &str,
) -> Result<&'a str> {
    value.ok_or_else(|| {
        debug!(
            "{} mechanism has no '{}' for target {}",
            mechanism.driver, field, target
        );
        Error::MissingDynamicConfig {
            field: field.to_string(),
            target: target.to_string(),
        }
    })
}

fn secret_path_vars<'a>(
    mechanism: &'a FencingMechanism,
    secrets_dir: &'a str,
) -> impl Iterator<Item = EnvVar> + 'a {
    mechanism.secrets.iter().map(move |(name, file)| {
        env_var(
            &format!("SECRETPATH_{}", name),
            &format!("{}/{}", secrets_dir, file),
        )
    })
}

fn resolve_image(
    mechanism: &FencingMechanism,
    images: &ImageCatalog,
    operator_image: Option<&str>,
) -> Result<String> {
    mechanism
        .image
        .as_deref()
        .filter(|i| !i.is_empty())
        .or_else(|| images.image_for(mechanism.driver))
        .or(operator_image.filter(|i| !i.is_empty()))
        .map(String::from)
        .ok_or_else(|| {
            Error::ValidationError(format!(
                "no image configured for {} mechanism and OPERATOR_IMAGE is not set",
                mechanism.driver
            ))
        })
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}
