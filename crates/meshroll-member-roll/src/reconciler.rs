//! One reconciliation pass over a ServiceMeshMemberRoll
//!
//! The pass re-reads the roll and its control plane, classifies them with
//! [`MemberRollState`], and applies the resulting [`Transition`]. Per-namespace
//! failures are collected so every member is attempted once per pass; the
//! status generations only advance when nothing failed.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, info, warn};

use meshroll_common::crd::{
    ServiceMeshControlPlane, ServiceMeshMemberRoll, ServiceMeshMemberRollStatus,
};
use meshroll_common::events::{actions, reasons};
use meshroll_common::mesh::MEMBER_ROLL_FINALIZER;
use meshroll_common::{Error, EventPublisher, KubeEventPublisher, FIELD_MANAGER};

use crate::client::{KubeMeshClient, MeshClient};
use crate::namespace::NamespaceSync;
use crate::service_accounts::{KubeServiceAccountClient, ServiceAccountClient, ServiceAccountSync};
use crate::sets::{difference, name_set};
use crate::state::{MemberRollState, Transition};

/// Requeue interval for retryable errors unless configured otherwise
pub const DEFAULT_ERROR_REQUEUE: Duration = Duration::from_secs(30);

// =============================================================================
// Context
// =============================================================================

/// Shared context for the member-roll controller
pub struct Context {
    /// Cluster access (trait object for testability)
    pub mesh: Arc<dyn MeshClient>,
    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// SCC grants for injected workloads; `None` when disabled
    pub service_accounts: Option<Arc<ServiceAccountSync>>,
    /// Delay before a retryable failure is retried
    pub error_requeue: Duration,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context with default settings
    pub fn new(client: Client) -> Self {
        Self::builder(client).build()
    }

    /// Create a context over a mock or in-memory client
    #[cfg(test)]
    pub fn for_testing(mesh: Arc<dyn MeshClient>) -> Self {
        Self {
            mesh,
            events: Arc::new(meshroll_common::NoopEventPublisher),
            service_accounts: None,
            error_requeue: DEFAULT_ERROR_REQUEUE,
        }
    }

    fn namespaces(&self) -> NamespaceSync<'_> {
        NamespaceSync::new(self.mesh.as_ref(), self.service_accounts.as_deref())
    }
}

/// Builder for constructing [`Context`] instances
///
/// ```text
/// let ctx = Context::builder(client)
///     .sync_service_accounts(true)
///     .error_requeue(Duration::from_secs(10))
///     .build();
/// ```
pub struct ContextBuilder {
    client: Client,
    mesh: Option<Arc<dyn MeshClient>>,
    events: Option<Arc<dyn EventPublisher>>,
    service_account_client: Option<Arc<dyn ServiceAccountClient>>,
    sync_service_accounts: bool,
    error_requeue: Duration,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            mesh: None,
            events: None,
            service_account_client: None,
            sync_service_accounts: false,
            error_requeue: DEFAULT_ERROR_REQUEUE,
        }
    }

    /// Override the cluster client (primarily for testing)
    pub fn mesh_client(mut self, mesh: Arc<dyn MeshClient>) -> Self {
        self.mesh = Some(mesh);
        self
    }

    /// Override the event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Override the service-account client (primarily for testing)
    pub fn service_account_client(mut self, client: Arc<dyn ServiceAccountClient>) -> Self {
        self.service_account_client = Some(client);
        self
    }

    /// Grant SCCs to the service accounts of injected pods in member namespaces
    pub fn sync_service_accounts(mut self, enabled: bool) -> Self {
        self.sync_service_accounts = enabled;
        self
    }

    /// Delay before a retryable failure is retried
    pub fn error_requeue(mut self, interval: Duration) -> Self {
        self.error_requeue = interval;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let service_accounts = self.sync_service_accounts.then(|| {
            let client = self
                .service_account_client
                .unwrap_or_else(|| Arc::new(KubeServiceAccountClient::new(self.client.clone())));
            Arc::new(ServiceAccountSync::new(client))
        });
        Context {
            mesh: self
                .mesh
                .unwrap_or_else(|| Arc::new(KubeMeshClient::new(self.client.clone()))),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(self.client.clone(), FIELD_MANAGER))),
            service_accounts,
            error_requeue: self.error_requeue,
        }
    }
}

// =============================================================================
// Pass
// =============================================================================

/// Identity of a member roll
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemberRollKey {
    /// Namespace of the roll, which is also the control plane's namespace
    pub namespace: String,
    /// Name of the roll
    pub name: String,
}

impl MemberRollKey {
    /// Key of a roll as delivered by the watch
    pub fn from_roll(roll: &ServiceMeshMemberRoll) -> Result<Self, Error> {
        let namespace = roll.namespace().ok_or_else(|| {
            Error::validation_for(roll.name_any(), "ServiceMeshMemberRoll has no namespace")
        })?;
        Ok(Self {
            namespace,
            name: roll.name_any(),
        })
    }
}

impl fmt::Display for MemberRollKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What the caller should do after a successful pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Wait for the next watch event
    Done,
    /// Run another pass right away
    Requeue,
}

/// Run one reconciliation pass for the roll identified by `key`
pub async fn reconcile_member_roll(
    key: &MemberRollKey,
    ctx: &Context,
) -> Result<ReconcileOutcome, Error> {
    let Some(roll) = ctx.mesh.get_member_roll(&key.namespace, &key.name).await? else {
        debug!(member_roll = %key, "member roll is gone");
        return Ok(ReconcileOutcome::Done);
    };

    let control_plane = resolve_control_plane(&roll, &key.namespace, ctx).await?;
    let state = MemberRollState::observe(&roll, &control_plane);
    let transition = state.transition(&roll);
    debug!(?state, "observed member roll");

    match transition {
        Transition::Cleanup { members } => {
            cleanup(&roll, &key.namespace, &members, ctx).await?;
            Ok(ReconcileOutcome::Done)
        }
        Transition::AttachFinalizer => {
            info!(finalizer = MEMBER_ROLL_FINALIZER, "adding finalizer");
            let owner = control_plane.controller_owner_ref(&());
            ctx.mesh
                .add_member_roll_finalizer(&roll, MEMBER_ROLL_FINALIZER, owner)
                .await?;
            publish(ctx, &roll, EventType::Normal, reasons::FINALIZER_ADDED, actions::RECONCILE, None)
                .await;
            Ok(ReconcileOutcome::Requeue)
        }
        Transition::Resync { desired } => {
            info!(members = desired.len(), "reconciling member roll");
            let existing = name_set(&ctx.mesh.list_member_namespaces(&key.namespace).await?);
            let mut errors = Vec::new();
            for namespace in difference(&existing, &desired) {
                if let Err(e) = ctx.namespaces().leave(&namespace, &key.namespace).await {
                    errors.push(e);
                }
            }
            errors.extend(join_all(&desired, &key.namespace, ctx).await);
            finish_pass(&roll, &control_plane, errors, ctx).await
        }
        Transition::Rejoin { desired } => {
            info!(
                control_plane_generation = control_plane.generation(),
                "control plane changed, reconfiguring members"
            );
            let errors = join_all(&desired, &key.namespace, ctx).await;
            finish_pass(&roll, &control_plane, errors, ctx).await
        }
        Transition::Idle => Ok(ReconcileOutcome::Done),
    }
}

/// The single control plane in the roll's namespace
async fn resolve_control_plane(
    roll: &ServiceMeshMemberRoll,
    namespace: &str,
    ctx: &Context,
) -> Result<ServiceMeshControlPlane, Error> {
    let mut control_planes = ctx.mesh.list_control_planes(namespace).await?;
    if control_planes.len() != 1 {
        let err = Error::ControlPlaneCardinality {
            namespace: namespace.to_string(),
            found: control_planes.len(),
        };
        warn!(found = control_planes.len(), "cannot reconcile member roll without a single control plane");
        publish(
            ctx,
            roll,
            EventType::Warning,
            reasons::CONTROL_PLANE_NOT_FOUND,
            actions::RECONCILE,
            Some(err.to_string()),
        )
        .await;
        return Err(err);
    }
    Ok(control_planes.remove(0))
}

async fn join_all(desired: &BTreeSet<String>, mesh_namespace: &str, ctx: &Context) -> Vec<Error> {
    let mut errors = Vec::new();
    for namespace in desired {
        if let Err(e) = ctx.namespaces().join(namespace, mesh_namespace).await {
            errors.push(e);
        }
    }
    errors
}

/// Release every member, then drop the finalizer whatever the cleanup outcome
async fn cleanup(
    roll: &ServiceMeshMemberRoll,
    mesh_namespace: &str,
    members: &BTreeSet<String>,
    ctx: &Context,
) -> Result<(), Error> {
    info!(members = members.len(), "deleting member roll");
    let mut errors = Vec::new();
    for namespace in members {
        if let Err(e) = ctx.namespaces().leave(namespace, mesh_namespace).await {
            warn!(namespace = %namespace, error = %e, "error cleaning up mesh member namespace");
            errors.push(e);
        }
    }
    if let Err(e) = Error::aggregate(errors) {
        publish(
            ctx,
            roll,
            EventType::Warning,
            reasons::CLEANUP_INCOMPLETE,
            actions::CLEANUP,
            Some(e.to_string()),
        )
        .await;
    }

    ctx.mesh
        .remove_member_roll_finalizer(roll, MEMBER_ROLL_FINALIZER)
        .await
}

/// Record both generations when the pass was clean, otherwise surface the failures
async fn finish_pass(
    roll: &ServiceMeshMemberRoll,
    control_plane: &ServiceMeshControlPlane,
    errors: Vec<Error>,
    ctx: &Context,
) -> Result<ReconcileOutcome, Error> {
    if let Err(e) = Error::aggregate(errors) {
        publish(
            ctx,
            roll,
            EventType::Warning,
            reasons::MEMBER_CONFIGURATION_FAILED,
            actions::CONFIGURE,
            Some(e.to_string()),
        )
        .await;
        return Err(e);
    }

    let status = ServiceMeshMemberRollStatus {
        observed_generation: roll.generation(),
        control_plane_generation: control_plane.generation(),
    };
    ctx.mesh
        .patch_member_roll_status(
            &roll.namespace().unwrap_or_default(),
            &roll.name_any(),
            &status,
        )
        .await?;
    info!(
        observed_generation = status.observed_generation,
        control_plane_generation = status.control_plane_generation,
        "member roll reconciled"
    );
    publish(
        ctx,
        roll,
        EventType::Normal,
        reasons::MEMBERS_CONFIGURED,
        actions::CONFIGURE,
        Some(format!("{} member namespaces configured", roll.spec.member_set().len())),
    )
    .await;
    Ok(ReconcileOutcome::Done)
}

async fn publish(
    ctx: &Context,
    roll: &ServiceMeshMemberRoll,
    type_: EventType,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    ctx.events
        .publish(&roll.object_ref(&()), type_, reason, action, note)
        .await;
}
