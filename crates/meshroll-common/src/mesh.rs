//! Mesh membership constants
//!
//! Single source of truth for the labels, annotations, and finalizer that
//! tie member namespaces and RoleBindings to a control plane.

// =============================================================================
// Labels
// =============================================================================

/// Label key marking a namespace (or a RoleBinding/ServiceAccount inside it) as
/// a member of the mesh whose control plane lives in the label value namespace.
pub const MEMBER_OF_LABEL: &str = "maistra.io/member-of";

/// Legacy duplicate of [`MEMBER_OF_LABEL`], still read by older mesh components.
pub const LEGACY_MEMBER_OF_LABEL: &str = "istio.openshift.com/member-of";

/// Label key on resources owned by a control plane (value: control plane namespace).
///
/// RoleBindings carrying this label in the control plane namespace are the
/// templates replicated into every member namespace.
pub const OWNER_LABEL: &str = "maistra.io/owner";

// =============================================================================
// Annotations
// =============================================================================

/// Pod annotation requesting sidecar injection.
pub const SIDECAR_INJECT_ANNOTATION: &str = "sidecar.istio.io/inject";

/// Annotation values that enable sidecar injection.
pub const SIDECAR_INJECT_ENABLED_VALUES: [&str; 4] = ["y", "yes", "true", "on"];

// =============================================================================
// Finalizer
// =============================================================================

/// Finalizer held on a ServiceMeshMemberRoll until its member namespaces are cleaned up.
pub const MEMBER_ROLL_FINALIZER: &str = "istio-operator-MemberRoll";

// =============================================================================
// Selectors
// =============================================================================

/// Label selector matching resources that are members of the mesh in `mesh_namespace`.
pub fn member_of_selector(mesh_namespace: &str) -> String {
    format!("{}={}", MEMBER_OF_LABEL, mesh_namespace)
}

/// Label selector matching resources owned by the control plane in `mesh_namespace`.
pub fn owner_selector(mesh_namespace: &str) -> String {
    format!("{}={}", OWNER_LABEL, mesh_namespace)
}

/// Whether a sidecar injection annotation value turns injection on.
pub fn is_injection_enabled(value: &str) -> bool {
    SIDECAR_INJECT_ENABLED_VALUES.contains(&value)
}
