//! meshroll operator - reconciles ServiceMeshMemberRoll resources

use clap::Parser;
use kube::CustomResourceExt;

use meshroll_common::crd::ServiceMeshMemberRoll;
use meshroll_common::kube_utils::create_client;
use meshroll_common::telemetry::{init_telemetry, TelemetryConfig};
use meshroll_operator::config::OperatorConfig;
use meshroll_operator::controller_runner::build_member_roll_controller;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::parse();

    if config.crd {
        let crd = serde_yaml::to_string(&ServiceMeshMemberRoll::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    config.validate()?;

    init_telemetry(TelemetryConfig {
        otlp_endpoint: config.otlp_endpoint.clone(),
        json_logs: config.log_json,
        watch_namespace: config.watch_namespace().map(str::to_string),
        ..Default::default()
    })?;

    let client = create_client(config.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    tracing::info!(
        watch_namespace = config.watch_namespace().unwrap_or("<all>"),
        sync_service_accounts = config.sync_service_accounts,
        "Starting meshroll operator"
    );

    build_member_roll_controller(client, &config).await;

    tracing::info!("Controller stopped");
    Ok(())
}
