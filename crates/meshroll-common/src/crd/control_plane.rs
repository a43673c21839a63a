//! ServiceMeshControlPlane CRD: the mesh deployment owning a project
//!
//! The control plane is reconciled by the mesh installer. This operator only
//! reads it: to find the single control plane in a member roll's namespace and
//! to notice when its generation moves.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec for a ServiceMeshControlPlane, carried opaquely
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "maistra.io",
    version = "v1",
    kind = "ServiceMeshControlPlane",
    plural = "servicemeshcontrolplanes",
    shortname = "smcp",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMeshControlPlaneSpec {
    /// Mesh version to install
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Installation template name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Helm values passed through to the mesh installer
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub istio: BTreeMap<String, serde_json::Value>,
}

impl ServiceMeshControlPlane {
    /// Current `metadata.generation`; zero means the mesh is not installed yet
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or_default()
    }

    /// Whether the control plane has been installed at least once
    pub fn is_installed(&self) -> bool {
        self.generation() != 0
    }
}
