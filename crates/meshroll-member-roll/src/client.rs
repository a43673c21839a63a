//! Cluster access for the member-roll reconciler
//!
//! [`MeshClient`] is the seam between the reconciliation logic and the API
//! server. Reads return `None`/empty for absent objects; writes wrap failures
//! with the identity of the object they touched.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::RoleBinding;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use meshroll_common::crd::{
    ServiceMeshControlPlane, ServiceMeshMemberRoll, ServiceMeshMemberRollStatus,
};
use meshroll_common::error::{is_already_exists, is_not_found};
use meshroll_common::kube_utils::{with_finalizer, with_owner_reference, without_finalizer};
use meshroll_common::mesh::member_of_selector;
use meshroll_common::{Error, FIELD_MANAGER};

/// How dependents of a deleted object are collected
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletePropagation {
    /// Whatever the API server defaults to for the kind
    Default,
    /// Dependents are removed before the object disappears
    Foreground,
}

impl DeletePropagation {
    fn params(self) -> DeleteParams {
        match self {
            Self::Default => DeleteParams::default(),
            Self::Foreground => DeleteParams::foreground(),
        }
    }
}

/// Trait abstracting Kubernetes client operations for ServiceMeshMemberRoll
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MeshClient: Send + Sync {
    /// Get a ServiceMeshMemberRoll; `None` when it is gone
    async fn get_member_roll(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceMeshMemberRoll>, Error>;

    /// List the ServiceMeshControlPlanes in a namespace
    async fn list_control_planes(
        &self,
        namespace: &str,
    ) -> Result<Vec<ServiceMeshControlPlane>, Error>;

    /// Get a Namespace; `None` when it does not exist
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error>;

    /// List namespaces labeled as members of the mesh in `mesh_namespace`
    async fn list_member_namespaces(&self, mesh_namespace: &str) -> Result<Vec<Namespace>, Error>;

    /// Merge-patch namespace labels. `None` values remove the label.
    async fn patch_namespace_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<(), Error>;

    /// List RoleBindings in `namespace` matching `label_selector`
    async fn list_role_bindings(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<RoleBinding>, Error>;

    /// Create a RoleBinding in its own namespace
    ///
    /// A binding that already exists counts as created.
    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<(), Error>;

    /// Delete a RoleBinding
    ///
    /// A binding that is already gone counts as deleted.
    async fn delete_role_binding(
        &self,
        namespace: &str,
        name: &str,
        propagation: DeletePropagation,
    ) -> Result<(), Error>;

    /// Attach the cleanup finalizer and, when given, a controller owner reference
    ///
    /// The patch is conditional on the roll's `resourceVersion`.
    async fn add_member_roll_finalizer(
        &self,
        roll: &ServiceMeshMemberRoll,
        finalizer: &str,
        owner: Option<OwnerReference>,
    ) -> Result<(), Error>;

    /// Remove the cleanup finalizer
    ///
    /// The patch is conditional on the roll's `resourceVersion`.
    async fn remove_member_roll_finalizer(
        &self,
        roll: &ServiceMeshMemberRoll,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Write the status sub-resource
    async fn patch_member_roll_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ServiceMeshMemberRollStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeMeshClient {
    client: Client,
}

impl KubeMeshClient {
    /// Create a new KubeMeshClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn member_rolls(&self, namespace: &str) -> Api<ServiceMeshMemberRoll> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_member_roll_metadata(
        &self,
        roll: &ServiceMeshMemberRoll,
        metadata: serde_json::Value,
    ) -> Result<(), Error> {
        let namespace = roll.namespace().unwrap_or_default();
        let name = roll.name_any();
        let patch = serde_json::json!({ "metadata": metadata });
        self.member_rolls(&namespace)
            .patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::operation("patch", "ServiceMeshMemberRoll", namespace, name, e))?;
        Ok(())
    }
}

#[async_trait]
impl MeshClient for KubeMeshClient {
    async fn get_member_roll(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceMeshMemberRoll>, Error> {
        match self.member_rolls(namespace).get(name).await {
            Ok(roll) => Ok(Some(roll)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_control_planes(
        &self,
        namespace: &str,
    ) -> Result<Vec<ServiceMeshControlPlane>, Error> {
        let api: Api<ServiceMeshControlPlane> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(ns) => Ok(Some(ns)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_member_namespaces(&self, mesh_namespace: &str) -> Result<Vec<Namespace>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let lp = ListParams::default().labels(&member_of_selector(mesh_namespace));
        Ok(api.list(&lp).await?.items)
    }

    async fn patch_namespace_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let patch = serde_json::json!({
            "metadata": {
                "labels": labels
            }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::cluster_operation("patch", "Namespace", name, e))?;
        Ok(())
    }

    async fn list_role_bindings(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<RoleBinding>, Error> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(label_selector);
        Ok(api.list(&lp).await?.items)
    }

    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<(), Error> {
        let name = binding.name_any();
        let namespace = binding.namespace().ok_or_else(|| {
            Error::validation_for(format!("RoleBinding/{}", name), "namespace is required")
        })?;
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), &namespace);
        match api
            .create(
                &PostParams {
                    field_manager: Some(FIELD_MANAGER.to_string()),
                    ..Default::default()
                },
                binding,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_already_exists(&e) => {
                debug!(namespace = %namespace, role_binding = %name, "RoleBinding already exists");
                Ok(())
            }
            Err(e) => Err(Error::operation("create", "RoleBinding", namespace, name, e)),
        }
    }

    async fn delete_role_binding(
        &self,
        namespace: &str,
        name: &str,
        propagation: DeletePropagation,
    ) -> Result<(), Error> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &propagation.params()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(namespace, role_binding = name, "RoleBinding already deleted");
                Ok(())
            }
            Err(e) => Err(Error::operation("delete", "RoleBinding", namespace, name, e)),
        }
    }

    async fn add_member_roll_finalizer(
        &self,
        roll: &ServiceMeshMemberRoll,
        finalizer: &str,
        owner: Option<OwnerReference>,
    ) -> Result<(), Error> {
        let mut metadata = serde_json::json!({
            "finalizers": with_finalizer(&roll.metadata, finalizer),
            "resourceVersion": roll.resource_version(),
        });
        if let Some(owner) = owner {
            metadata["ownerReferences"] =
                serde_json::to_value(with_owner_reference(&roll.metadata, owner)).map_err(|e| {
                    Error::serialization_for_kind("OwnerReference", e.to_string())
                })?;
        }
        self.patch_member_roll_metadata(roll, metadata).await
    }

    async fn remove_member_roll_finalizer(
        &self,
        roll: &ServiceMeshMemberRoll,
        finalizer: &str,
    ) -> Result<(), Error> {
        let metadata = serde_json::json!({
            "finalizers": without_finalizer(&roll.metadata, finalizer),
            "resourceVersion": roll.resource_version(),
        });
        self.patch_member_roll_metadata(roll, metadata).await
    }

    async fn patch_member_roll_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ServiceMeshMemberRollStatus,
    ) -> Result<(), Error> {
        let status_patch = serde_json::json!({
            "status": status
        });
        self.member_rolls(namespace)
            .patch_status(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&status_patch),
            )
            .await
            .map_err(|e| {
                Error::operation("patch status of", "ServiceMeshMemberRoll", namespace, name, e)
            })?;
        Ok(())
    }
}
