//! fencing-operator: fences Kubernetes nodes that become unreachable

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kube::{Client, CustomResourceExt};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fencing_operator::config::{Cli, Command, OperatorConfig};
use fencing_operator::controller::{
    run_controller, ControllerState, FencingRequestManager, KubeGateway,
};
use fencing_operator::crd::{FencingRequest, FencingSet};
use fencing_operator::rest_api;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command.unwrap_or(Command::Run) {
        Command::Crd => print_crds(),
        Command::Run => run(cli.config).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_crds() -> Result<()> {
    let request = serde_yaml::to_string(&FencingRequest::crd())?;
    let set = serde_yaml::to_string(&FencingSet::crd())?;
    println!("{}---\n{}", request, set);
    Ok(())
}

async fn run(config: OperatorConfig) -> Result<()> {
    info!(
        "Starting fencing-operator {} (namespace: {})",
        env!("CARGO_PKG_VERSION"),
        config.namespace
    );

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let gateway = Arc::new(KubeGateway::new(client.clone()));

    let mut requests = FencingRequestManager::new(gateway.clone(), config.namespace.clone());
    if let Some(set_name) = &config.fencing_set {
        requests = requests
            .owned_by_set(set_name)
            .await
            .with_context(|| format!("failed to get FencingSet {}", set_name))?;
    }

    if config.operator_image.is_none() {
        warn!("OPERATOR_IMAGE is not set, mechanisms without a known image cannot run");
    }

    let metrics_addr = config.metrics_addr;
    let state = Arc::new(ControllerState::new(gateway, requests, config));

    tokio::spawn(async move {
        if let Err(e) = rest_api::run_server(metrics_addr).await {
            error!("HTTP server stopped: {}", e);
        }
    });

    run_controller(client, state).await?;
    info!("fencing-operator stopped");
    Ok(())
}
