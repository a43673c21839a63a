//! Operator configuration from flags and environment

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use meshroll_common::kube_utils::DEFAULT_READ_TIMEOUT;
use meshroll_common::Error;

/// meshroll-operator - joins namespaces listed in ServiceMeshMemberRolls to their mesh
#[derive(Parser, Debug, Clone)]
#[command(name = "meshroll-operator", version, about, long_about = None)]
pub struct OperatorConfig {
    /// Print the ServiceMeshMemberRoll CRD as YAML and exit
    #[arg(long)]
    pub crd: bool,

    /// Path to a kubeconfig file (inferred when omitted)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Only watch member rolls and control planes in this namespace (empty = all)
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    pub watch_namespace: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "MESHROLL_LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// OTLP endpoint for traces and metrics
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Grant SCCs to the service accounts of injected pods in member namespaces
    #[arg(long, env = "MESHROLL_SYNC_SERVICE_ACCOUNTS", default_value = "false")]
    pub sync_service_accounts: bool,

    /// Seconds before a retryable reconcile failure is retried
    #[arg(long, env = "MESHROLL_ERROR_REQUEUE_SECS", default_value_t = 30)]
    pub error_requeue_secs: u64,

    /// Watch timeout in seconds; must stay below the client read timeout
    #[arg(long, default_value_t = 25)]
    pub watch_timeout_secs: u32,
}

impl OperatorConfig {
    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.error_requeue_secs == 0 {
            return Err(Error::validation_for(
                "--error-requeue-secs",
                "must be at least 1 second",
            ));
        }
        if self.watch_timeout_secs == 0
            || u64::from(self.watch_timeout_secs) >= DEFAULT_READ_TIMEOUT.as_secs()
        {
            return Err(Error::validation_for(
                "--watch-timeout-secs",
                format!(
                    "must be between 1 and {} seconds",
                    DEFAULT_READ_TIMEOUT.as_secs() - 1
                ),
            ));
        }
        if let Some(endpoint) = &self.otlp_endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(Error::validation_for(
                    "--otlp-endpoint",
                    format!("{} is not an http(s) URL", endpoint),
                ));
            }
        }
        Ok(())
    }

    /// Namespace to scope watches to, if any
    pub fn watch_namespace(&self) -> Option<&str> {
        Some(self.watch_namespace.as_str()).filter(|ns| !ns.is_empty())
    }

    /// Delay before a retryable failure is retried
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }
}
