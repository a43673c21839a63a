//! Custom Resource Definitions for the member-roll operator
//!
//! `ServiceMeshMemberRoll` is reconciled by this operator. `ServiceMeshControlPlane`
//! is owned by the mesh installer; only its namespace and generation are read here.

mod control_plane;
mod member_roll;

pub use control_plane::{ServiceMeshControlPlane, ServiceMeshControlPlaneSpec};
pub use member_roll::{
    ServiceMeshMemberRoll, ServiceMeshMemberRollSpec, ServiceMeshMemberRollStatus,
};
