//! Mesh RoleBinding replication into member namespaces
//!
//! Templates are the RoleBindings in the control-plane namespace carrying the
//! owner label. Every member namespace gets a copy of each template, matched by
//! name only. Copies that no longer have a template are deleted.

use k8s_openapi::api::rbac::v1::RoleBinding;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument};

use meshroll_common::kube_utils::set_label;
use meshroll_common::mesh::{member_of_selector, owner_selector, MEMBER_OF_LABEL};
use meshroll_common::metrics::record_role_binding_operation;
use meshroll_common::Error;

use crate::client::{DeletePropagation, MeshClient};
use crate::sets::{difference, name_set, to_set, union};

/// Copy of `template` for `namespace`, labeled as a member of `mesh_namespace`
///
/// Labels and annotations are copied, `subjects` and `roleRef` verbatim.
pub fn member_role_binding(
    template: &RoleBinding,
    namespace: &str,
    mesh_namespace: &str,
) -> RoleBinding {
    let mut metadata = ObjectMeta {
        name: Some(template.name_any()),
        namespace: Some(namespace.to_string()),
        labels: template.metadata.labels.clone(),
        annotations: template.metadata.annotations.clone(),
        ..Default::default()
    };
    set_label(&mut metadata, MEMBER_OF_LABEL, mesh_namespace);
    RoleBinding {
        metadata,
        role_ref: template.role_ref.clone(),
        subjects: template.subjects.clone(),
    }
}

/// Bring the mesh RoleBindings in `namespace` in line with the templates
///
/// Missing copies are created before obsolete ones are deleted. Every
/// operation is attempted; failures are returned together.
#[instrument(skip(client), fields(namespace = %namespace, mesh = %mesh_namespace))]
pub async fn sync_role_bindings(
    client: &dyn MeshClient,
    namespace: &str,
    mesh_namespace: &str,
) -> Result<(), Error> {
    let templates = client
        .list_role_bindings(mesh_namespace, &owner_selector(mesh_namespace))
        .await
        .inspect_err(|e| error!(error = %e, "could not read RoleBinding templates for mesh"))?;
    let existing = client
        .list_role_bindings(namespace, &member_of_selector(mesh_namespace))
        .await
        .inspect_err(|e| error!(error = %e, "could not read mesh RoleBindings in namespace"))?;

    let existing = name_set(&existing);
    let required = name_set(&templates);
    let mut errors = Vec::new();
    let mut added = Vec::new();

    for template in &templates {
        let name = template.name_any();
        if existing.contains(&name) {
            continue;
        }
        info!(role_binding = %name, "creating RoleBinding for mesh ServiceAccount");
        let binding = member_role_binding(template, namespace, mesh_namespace);
        match client.create_role_binding(&binding).await {
            Ok(()) => {
                record_role_binding_operation("create", true);
                added.push(name);
            }
            Err(e) => {
                record_role_binding_operation("create", false);
                error!(role_binding = %name, error = %e, "error creating RoleBinding for mesh ServiceAccount");
                errors.push(e);
            }
        }
    }

    let present = union(&existing, &to_set(added));
    for name in difference(&present, &required) {
        info!(role_binding = %name, "deleting RoleBinding for mesh ServiceAccount");
        match client
            .delete_role_binding(namespace, &name, DeletePropagation::Foreground)
            .await
        {
            Ok(()) => record_role_binding_operation("delete", true),
            Err(e) => {
                record_role_binding_operation("delete", false);
                error!(role_binding = %name, error = %e, "error deleting RoleBinding for mesh ServiceAccount");
                errors.push(e);
            }
        }
    }

    debug!(
        templates = required.len(),
        failures = errors.len(),
        "RoleBinding sync finished"
    );
    Error::aggregate(errors)
}

/// Delete every mesh RoleBinding in `namespace`
///
/// Used when a namespace leaves the mesh. Deletes use the server's default
/// propagation.
#[instrument(skip(client), fields(namespace = %namespace, mesh = %mesh_namespace))]
pub async fn remove_role_bindings(
    client: &dyn MeshClient,
    namespace: &str,
    mesh_namespace: &str,
) -> Result<(), Error> {
    let bindings = client
        .list_role_bindings(namespace, &member_of_selector(mesh_namespace))
        .await
        .inspect_err(|e| error!(error = %e, "could not retrieve RoleBindings associated with mesh"))?;

    let mut errors = Vec::new();
    for name in name_set(&bindings) {
        match client
            .delete_role_binding(namespace, &name, DeletePropagation::Default)
            .await
        {
            Ok(()) => record_role_binding_operation("delete", true),
            Err(e) => {
                record_role_binding_operation("delete", false);
                error!(role_binding = %name, error = %e, "error removing RoleBinding associated with mesh");
                errors.push(e);
            }
        }
    }
    Error::aggregate(errors)
}
