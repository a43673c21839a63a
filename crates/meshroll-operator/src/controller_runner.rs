//! Controller runner - builds the member roll controller future
//!
//! Besides the rolls themselves the controller watches namespaces, so a member
//! namespace created after its roll is joined promptly, and control planes, so
//! rolls rejoin their members once the mesh finishes installing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};

use meshroll_common::crd::{ServiceMeshControlPlane, ServiceMeshMemberRoll};
use meshroll_member_roll::{error_policy, reconcile, rolls_for_namespace, rolls_in_namespace, Context};

use crate::config::OperatorConfig;

/// Build the ServiceMeshMemberRoll controller future
pub fn build_member_roll_controller(
    client: Client,
    config: &OperatorConfig,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let ctx = Arc::new(
        Context::builder(client.clone())
            .sync_service_accounts(config.sync_service_accounts)
            .error_requeue(config.error_requeue())
            .build(),
    );

    let (rolls, control_planes): (Api<ServiceMeshMemberRoll>, Api<ServiceMeshControlPlane>) =
        match config.watch_namespace() {
            Some(ns) => {
                tracing::info!(namespace = %ns, "Watching a single namespace for member rolls");
                (
                    Api::namespaced(client.clone(), ns),
                    Api::namespaced(client.clone(), ns),
                )
            }
            None => (Api::all(client.clone()), Api::all(client.clone())),
        };
    let namespaces: Api<Namespace> = Api::all(client);

    let watch_timeout = config.watch_timeout_secs;
    let watcher = move || WatcherConfig::default().timeout(watch_timeout);

    let controller = Controller::new(rolls, watcher());
    let rolls_by_member = controller.store();
    let rolls_by_mesh = rolls_by_member.clone();

    tracing::info!("- ServiceMeshMemberRoll controller");

    Box::pin(
        controller
            .watches(namespaces, watcher(), move |namespace| {
                let name = namespace.name_any();
                let affected = rolls_for_namespace(&rolls_by_member.state(), &name);
                if !affected.is_empty() {
                    tracing::debug!(
                        namespace = %name,
                        rolls = affected.len(),
                        "Namespace change triggers member roll reconciliation"
                    );
                }
                affected
            })
            .watches(control_planes, watcher(), move |control_plane| {
                match control_plane.namespace() {
                    Some(ns) => rolls_in_namespace(&rolls_by_mesh.state(), &ns),
                    None => Vec::new(),
                }
            })
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("MemberRoll")),
    )
}

/// Creates a closure for logging reconciliation results
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
