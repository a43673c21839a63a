//! Member roll lifecycle state machine
//!
//! A pass first classifies the roll against its control plane
//! ([`MemberRollState::observe`]) and then derives the side-effect plan for
//! that state ([`MemberRollState::transition`]). Both steps are pure; the
//! reconciler applies the plan.
//!
//! ```text
//!   Unfinalized ──attach finalizer──▶ AwaitingControlPlane ──▶ Stale ──pass ok──▶ Synced
//!        │                                                      ▲                   │
//!        │                                                      └──generation bump──┘
//!        └──────────────── any state ──deletion requested──▶ Deleting
//! ```

use std::collections::BTreeSet;

use meshroll_common::crd::{ServiceMeshControlPlane, ServiceMeshMemberRoll};

/// Which generation moved since the last clean pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Staleness {
    /// The roll's own generation differs from `observedGeneration`
    MembersChanged,
    /// Only the control plane's generation differs from `meshGeneration`
    ControlPlaneChanged,
}

/// Where a member roll is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberRollState {
    /// Deletion was requested; cleanup is pending while our finalizer remains
    Deleting {
        /// Whether the cleanup finalizer is still attached
        cleanup_pending: bool,
    },
    /// Live roll without the cleanup finalizer
    Unfinalized,
    /// The control plane has not been installed yet
    AwaitingControlPlane,
    /// Members must be reconfigured
    Stale(Staleness),
    /// Both generations are recorded in status
    Synced,
}

/// Side effects one pass applies
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Release every declared member, then drop the finalizer
    Cleanup {
        /// Namespaces to release
        members: BTreeSet<String>,
    },
    /// Attach the finalizer and the control-plane owner reference
    AttachFinalizer,
    /// Release labeled namespaces no longer declared, then join every declared one
    Resync {
        /// Declared members
        desired: BTreeSet<String>,
    },
    /// Re-join every declared member against a changed control plane
    Rejoin {
        /// Declared members
        desired: BTreeSet<String>,
    },
    /// Nothing to do
    Idle,
}

impl MemberRollState {
    /// Classify `roll` against the control plane that governs it
    pub fn observe(roll: &ServiceMeshMemberRoll, control_plane: &ServiceMeshControlPlane) -> Self {
        if roll.is_deleting() {
            return Self::Deleting {
                cleanup_pending: roll.has_member_roll_finalizer(),
            };
        }
        if !roll.has_member_roll_finalizer() {
            return Self::Unfinalized;
        }
        if !control_plane.is_installed() {
            return Self::AwaitingControlPlane;
        }

        let status = roll.status_or_default();
        if roll.generation() != status.observed_generation {
            Self::Stale(Staleness::MembersChanged)
        } else if control_plane.generation() != status.control_plane_generation {
            Self::Stale(Staleness::ControlPlaneChanged)
        } else {
            Self::Synced
        }
    }

    /// The plan for this state
    pub fn transition(&self, roll: &ServiceMeshMemberRoll) -> Transition {
        match self {
            Self::Deleting {
                cleanup_pending: true,
            } => Transition::Cleanup {
                members: roll.spec.member_set(),
            },
            Self::Deleting {
                cleanup_pending: false,
            } => Transition::Idle,
            Self::Unfinalized => Transition::AttachFinalizer,
            Self::AwaitingControlPlane | Self::Synced => Transition::Idle,
            Self::Stale(Staleness::MembersChanged) => Transition::Resync {
                desired: roll.spec.member_set(),
            },
            Self::Stale(Staleness::ControlPlaneChanged) => Transition::Rejoin {
                desired: roll.spec.member_set(),
            },
        }
    }
}
