//! Service-account privilege grants for injected workloads (optional)
//!
//! When enabled, joining a namespace labels the service accounts of pods that
//! request sidecar injection and grants them the `privileged` and `anyuid`
//! SecurityContextConstraints. Accounts that no longer run injected pods are
//! revoked and unlabeled. This is a best-effort heuristic and is off unless
//! the operator runs with `--sync-service-accounts`.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, ServiceAccount};
use kube::api::{Api, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use meshroll_common::error::is_not_found;
use meshroll_common::mesh::{is_injection_enabled, member_of_selector, MEMBER_OF_LABEL, SIDECAR_INJECT_ANNOTATION};
use meshroll_common::{Error, FIELD_MANAGER};

use crate::sets::{difference, name_set, to_list};

/// SCCs granted to injected workloads
pub const MESH_SCCS: [&str; 2] = ["privileged", "anyuid"];

/// Service account used by pods that do not name one
const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// SCC user name for a namespaced service account
pub fn service_account_user(namespace: &str, name: &str) -> String {
    format!("system:serviceaccount:{}:{}", namespace, name)
}

/// Service accounts of pods in `pods` that request sidecar injection
pub fn injected_service_accounts(pods: &[Pod]) -> BTreeSet<String> {
    pods.iter()
        .filter(|pod| {
            pod.annotations()
                .get(SIDECAR_INJECT_ANNOTATION)
                .is_some_and(|v| is_injection_enabled(v))
        })
        .map(|pod| {
            pod.spec
                .as_ref()
                .and_then(|spec| spec.service_account_name.clone())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_SERVICE_ACCOUNT.to_string())
        })
        .collect()
}

/// Cluster operations the service-account extension needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceAccountClient: Send + Sync {
    /// List all pods in a namespace
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, Error>;

    /// List service accounts in `namespace` labeled as managed by the mesh in `mesh_namespace`
    async fn list_member_service_accounts(
        &self,
        namespace: &str,
        mesh_namespace: &str,
    ) -> Result<Vec<ServiceAccount>, Error>;

    /// Get a service account; `None` when it does not exist
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, Error>;

    /// Set (`Some`) or remove (`None`) a label on a service account
    async fn patch_service_account_label(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: Option<String>,
    ) -> Result<(), Error>;

    /// Add users to an SCC's user list
    async fn add_scc_users(&self, scc: &str, users: &[String]) -> Result<(), Error>;

    /// Remove users from an SCC's user list
    async fn remove_scc_users(&self, scc: &str, users: &[String]) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
///
/// SCCs are an OpenShift API, accessed untyped.
pub struct KubeServiceAccountClient {
    client: Client,
}

impl KubeServiceAccountClient {
    /// Create a new KubeServiceAccountClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn scc_api(&self) -> Api<DynamicObject> {
        Api::all_with(
            self.client.clone(),
            &ApiResource::from_gvk_with_plural(
                &GroupVersionKind {
                    group: "security.openshift.io".to_string(),
                    version: "v1".to_string(),
                    kind: "SecurityContextConstraints".to_string(),
                },
                "securitycontextconstraints",
            ),
        )
    }

    /// Rewrite an SCC's user list, skipping the write when nothing changes
    async fn update_scc_users(
        &self,
        scc: &str,
        update: impl FnOnce(&mut Vec<String>) + Send,
    ) -> Result<(), Error> {
        let api = self.scc_api();
        let current = api
            .get(scc)
            .await
            .map_err(|e| Error::cluster_operation("get", "SecurityContextConstraints", scc, e))?;
        let before: Vec<String> = current
            .data
            .get("users")
            .and_then(|users| users.as_array())
            .map(|users| {
                users
                    .iter()
                    .filter_map(|u| u.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let mut after = before.clone();
        update(&mut after);
        if after == before {
            debug!(scc, "SCC users unchanged");
            return Ok(());
        }

        let patch = serde_json::json!({
            "metadata": { "resourceVersion": current.resource_version() },
            "users": after,
        });
        api.patch(scc, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::cluster_operation("patch", "SecurityContextConstraints", scc, e))?;
        Ok(())
    }
}

#[async_trait]
impl ServiceAccountClient for KubeServiceAccountClient {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_member_service_accounts(
        &self,
        namespace: &str,
        mesh_namespace: &str,
    ) -> Result<Vec<ServiceAccount>, Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&member_of_selector(mesh_namespace));
        Ok(api.list(&lp).await?.items)
    }

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(sa) => Ok(Some(sa)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_service_account_label(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: Option<String>,
    ) -> Result<(), Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "metadata": { "labels": { key: value } }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::operation("patch", "ServiceAccount", namespace, name, e))?;
        Ok(())
    }

    async fn add_scc_users(&self, scc: &str, users: &[String]) -> Result<(), Error> {
        self.update_scc_users(scc, |current| {
            for user in users {
                if !current.contains(user) {
                    current.push(user.clone());
                }
            }
        })
        .await
    }

    async fn remove_scc_users(&self, scc: &str, users: &[String]) -> Result<(), Error> {
        self.update_scc_users(scc, |current| current.retain(|u| !users.contains(u)))
            .await
    }
}

/// Keeps SCC grants in step with the injected workloads of member namespaces
pub struct ServiceAccountSync {
    client: Arc<dyn ServiceAccountClient>,
}

impl ServiceAccountSync {
    /// Create a sync over the given client
    pub fn new(client: Arc<dyn ServiceAccountClient>) -> Self {
        Self { client }
    }

    /// Grant injected workloads in `namespace` and revoke accounts no longer injected
    #[instrument(skip(self), fields(namespace = %namespace, mesh = %mesh_namespace))]
    pub async fn sync(&self, namespace: &str, mesh_namespace: &str) -> Result<(), Error> {
        let required = match self.client.list_pods(namespace).await {
            Ok(pods) => injected_service_accounts(&pods),
            Err(e) => {
                // skip granting, but still revoke what is left
                error!(error = %e, "cannot update ServiceAccount SCC settings: error scanning for Pods");
                BTreeSet::new()
            }
        };
        let managed = match self
            .client
            .list_member_service_accounts(namespace, mesh_namespace)
            .await
        {
            Ok(accounts) => name_set(&accounts),
            Err(e) => {
                error!(error = %e, "cannot list ServiceAccounts configured for use with mesh");
                BTreeSet::new()
            }
        };

        let mut errors = Vec::new();

        if !required.is_empty() {
            let mut errored = BTreeSet::new();
            for name in difference(&required, &managed) {
                if let Err(e) = self.label_service_account(namespace, mesh_namespace, &name).await {
                    error!(service_account = %name, error = %e, "error labeling ServiceAccount to configure SCC");
                    errored.insert(name);
                    errors.push(e);
                }
            }

            let users: Vec<String> = difference(&required, &errored)
                .iter()
                .map(|name| service_account_user(namespace, name))
                .collect();
            for scc in MESH_SCCS {
                if let Err(e) = self.client.add_scc_users(scc, &users).await {
                    error!(scc, error = %e, "error adding ServiceAccounts to SecurityContextConstraints");
                    errors.push(e);
                }
            }
        }

        let removed = difference(&managed, &required);
        errors.extend(self.revoke(namespace, &to_list(&removed)).await);
        Error::aggregate(errors)
    }

    /// Revoke every managed service account in `namespace`
    #[instrument(skip(self), fields(namespace = %namespace, mesh = %mesh_namespace))]
    pub async fn release(&self, namespace: &str, mesh_namespace: &str) -> Result<(), Error> {
        let managed = self
            .client
            .list_member_service_accounts(namespace, mesh_namespace)
            .await
            .inspect_err(|e| error!(error = %e, "could not retrieve ServiceAccounts associated with mesh"))?;
        let names = to_list(&name_set(&managed));
        Error::aggregate(self.revoke(namespace, &names).await)
    }

    async fn label_service_account(
        &self,
        namespace: &str,
        mesh_namespace: &str,
        name: &str,
    ) -> Result<(), Error> {
        let Some(account) = self.client.get_service_account(namespace, name).await? else {
            return Err(Error::MissingResource {
                kind: "ServiceAccount",
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: "used by an injected pod".to_string(),
            });
        };
        if account.labels().contains_key(MEMBER_OF_LABEL) {
            return Ok(());
        }
        info!(service_account = %name, "labeling ServiceAccount for mesh");
        self.client
            .patch_service_account_label(
                namespace,
                name,
                MEMBER_OF_LABEL,
                Some(mesh_namespace.to_string()),
            )
            .await
    }

    /// Remove accounts from the SCCs, then clear their labels
    ///
    /// Label failures are logged only.
    async fn revoke(&self, namespace: &str, names: &[String]) -> Vec<Error> {
        if names.is_empty() {
            return Vec::new();
        }
        let users: Vec<String> = names
            .iter()
            .map(|name| service_account_user(namespace, name))
            .collect();

        let mut errors = Vec::new();
        for scc in MESH_SCCS {
            if let Err(e) = self.client.remove_scc_users(scc, &users).await {
                error!(scc, error = %e, "error removing ServiceAccounts from SecurityContextConstraints");
                errors.push(e);
            }
        }
        for name in names {
            if let Err(e) = self
                .client
                .patch_service_account_label(namespace, name, MEMBER_OF_LABEL, None)
                .await
            {
                warn!(service_account = %name, error = %e, "error removing member-of label from ServiceAccount");
            }
        }
        errors
    }
}
