//! ServiceMeshMemberRoll CRD: the declared set of mesh member namespaces

use std::collections::BTreeSet;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::kube_utils::has_finalizer;
use crate::mesh::MEMBER_ROLL_FINALIZER;

// =============================================================================
// CRD
// =============================================================================

/// Spec for a ServiceMeshMemberRoll listing the namespaces that belong to the mesh
/// whose control plane lives in the roll's own namespace
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "maistra.io",
    version = "v1",
    kind = "ServiceMeshMemberRoll",
    plural = "servicemeshmemberrolls",
    shortname = "smmr",
    namespaced,
    status = "ServiceMeshMemberRollStatus",
    printcolumn = r#"{"name":"Members","type":"string","jsonPath":".spec.members"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMeshMemberRollSpec {
    /// Namespaces to join to the mesh. Order and duplicates carry no meaning.
    #[serde(default)]
    pub members: Vec<String>,
}

impl ServiceMeshMemberRollSpec {
    /// Deduplicated member namespaces
    pub fn member_set(&self) -> BTreeSet<String> {
        self.members.iter().cloned().collect()
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status of a ServiceMeshMemberRoll
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMeshMemberRollStatus {
    /// Last roll generation whose members were fully configured
    #[serde(default)]
    pub observed_generation: i64,
    /// Control plane generation the members were last configured against
    #[serde(default, rename = "meshGeneration")]
    pub control_plane_generation: i64,
}

// =============================================================================
// Helpers
// =============================================================================

impl ServiceMeshMemberRoll {
    /// Current `metadata.generation`, zero when the store has not set one
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or_default()
    }

    /// Status, or the zero status for a roll never reconciled
    pub fn status_or_default(&self) -> ServiceMeshMemberRollStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Whether the store has been asked to delete this roll
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the operator's cleanup finalizer is attached
    pub fn has_member_roll_finalizer(&self) -> bool {
        has_finalizer(&self.metadata, MEMBER_ROLL_FINALIZER)
    }
}
