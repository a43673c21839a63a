//! ServiceMeshMemberRoll reconciler
//!
//! Keeps the namespaces declared by a member roll joined to the mesh whose
//! control plane lives in the roll's namespace:
//! - member namespaces carry the `maistra.io/member-of` label
//! - mesh RoleBindings are replicated into every member namespace
//! - a finalizer releases all members when the roll is deleted

pub mod client;
pub mod controller;
pub mod namespace;
pub mod reconciler;
pub mod role_binding;
pub mod service_accounts;
pub mod sets;
pub mod state;

#[cfg(test)]
mod testing;

pub use client::{DeletePropagation, KubeMeshClient, MeshClient};
pub use controller::{error_policy, members_index, reconcile, rolls_for_namespace, rolls_in_namespace};
pub use reconciler::{reconcile_member_roll, Context, ContextBuilder, MemberRollKey, ReconcileOutcome};
pub use state::{MemberRollState, Staleness, Transition};
