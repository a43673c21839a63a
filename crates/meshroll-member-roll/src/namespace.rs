//! Joining and releasing member namespaces

use std::collections::BTreeMap;

use kube::ResourceExt;
use tracing::{error, info, instrument, warn};

use meshroll_common::mesh::{LEGACY_MEMBER_OF_LABEL, MEMBER_OF_LABEL};
use meshroll_common::metrics::record_namespace_operation;
use meshroll_common::Error;

use crate::client::MeshClient;
use crate::role_binding::{remove_role_bindings, sync_role_bindings};
use crate::service_accounts::ServiceAccountSync;

/// Applies mesh membership to individual namespaces
pub struct NamespaceSync<'a> {
    client: &'a dyn MeshClient,
    service_accounts: Option<&'a ServiceAccountSync>,
}

impl<'a> NamespaceSync<'a> {
    /// Create a synchronizer; `service_accounts` enables SCC grants
    pub fn new(client: &'a dyn MeshClient, service_accounts: Option<&'a ServiceAccountSync>) -> Self {
        Self {
            client,
            service_accounts,
        }
    }

    /// Configure `namespace` as a member of the mesh in `mesh_namespace`
    ///
    /// A missing namespace is skipped. The membership label is only written
    /// when the namespace carries none yet.
    #[instrument(skip(self), fields(namespace = %namespace, mesh = %mesh_namespace))]
    pub async fn join(&self, namespace: &str, mesh_namespace: &str) -> Result<(), Error> {
        info!("configuring namespace for use with mesh");
        let Some(ns) = self.client.get_namespace(namespace).await? else {
            warn!("namespace to configure with mesh is missing");
            return Ok(());
        };

        let mut errors = Vec::new();
        if let Err(e) = sync_role_bindings(self.client, namespace, mesh_namespace).await {
            errors.push(e);
        }
        if let Some(service_accounts) = self.service_accounts {
            if let Err(e) = service_accounts.sync(namespace, mesh_namespace).await {
                errors.push(e);
            }
        }

        if !ns.labels().contains_key(MEMBER_OF_LABEL) {
            let labels = membership_labels(Some(mesh_namespace));
            let result = self.client.patch_namespace_labels(namespace, &labels).await;
            record_namespace_operation("join", result.is_ok());
            if let Err(e) = result {
                error!(error = %e, "error adding member-of label to namespace");
                errors.push(e);
            }
        }

        Error::aggregate(errors)
    }

    /// Remove `namespace` from the mesh in `mesh_namespace`
    ///
    /// Every cleanup step runs even when an earlier one fails.
    #[instrument(skip(self), fields(namespace = %namespace, mesh = %mesh_namespace))]
    pub async fn leave(&self, namespace: &str, mesh_namespace: &str) -> Result<(), Error> {
        info!("cleaning up resources in namespace removed from mesh");
        let Some(ns) = self.client.get_namespace(namespace).await? else {
            warn!("namespace to remove from mesh is missing");
            return Ok(());
        };

        let mut errors = Vec::new();
        if let Some(service_accounts) = self.service_accounts {
            if let Err(e) = service_accounts.release(namespace, mesh_namespace).await {
                errors.push(e);
            }
        }
        if let Err(e) = remove_role_bindings(self.client, namespace, mesh_namespace).await {
            errors.push(e);
        }

        let labels = ns.labels();
        if labels.contains_key(MEMBER_OF_LABEL) || labels.contains_key(LEGACY_MEMBER_OF_LABEL) {
            let result = self
                .client
                .patch_namespace_labels(namespace, &membership_labels(None))
                .await;
            record_namespace_operation("leave", result.is_ok());
            if let Err(e) = result {
                error!(error = %e, "error removing member-of label from namespace");
                errors.push(e);
            }
        }

        Error::aggregate(errors)
    }
}

/// Label patch for the membership label and its legacy duplicate
fn membership_labels(mesh_namespace: Option<&str>) -> BTreeMap<String, Option<String>> {
    [MEMBER_OF_LABEL, LEGACY_MEMBER_OF_LABEL]
        .into_iter()
        .map(|key| (key.to_string(), mesh_namespace.map(str::to_string)))
        .collect()
}
