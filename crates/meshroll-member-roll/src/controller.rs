//! kube-runtime entry points for the ServiceMeshMemberRoll controller
//!
//! [`reconcile`] and [`error_policy`] plug into `kube::runtime::Controller`.
//! The mapping functions turn Namespace and control-plane watch events into
//! the member rolls they affect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use tracing::{error, instrument};

use meshroll_common::crd::ServiceMeshMemberRoll;
use meshroll_common::metrics::{record_reconcile, record_reconcile_error, ReconcileResult};
use meshroll_common::Error;

use crate::reconciler::{reconcile_member_roll, Context, MemberRollKey, ReconcileOutcome};
use crate::sets::contains;

/// Delay before the pass that follows attaching the finalizer
pub const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

impl ReconcileOutcome {
    /// The controller action for this outcome
    pub fn into_action(self) -> Action {
        match self {
            ReconcileOutcome::Done => Action::await_change(),
            ReconcileOutcome::Requeue => Action::requeue(FINALIZER_REQUEUE),
        }
    }
}

/// Reconcile a ServiceMeshMemberRoll
///
/// The watched object only supplies the key; the pass re-reads current state.
#[instrument(
    skip(roll, ctx),
    fields(member_roll = %roll.name_any(), namespace = %roll.namespace().unwrap_or_default())
)]
pub async fn reconcile(
    roll: Arc<ServiceMeshMemberRoll>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let start = Instant::now();
    let key = MemberRollKey::from_roll(&roll)?;
    let result = reconcile_member_roll(&key, &ctx).await;

    let outcome = if result.is_ok() {
        ReconcileResult::Success
    } else {
        ReconcileResult::Error
    };
    record_reconcile(outcome, start.elapsed().as_secs_f64());

    result.map(ReconcileOutcome::into_action)
}

/// Error policy: retryable errors requeue, terminal ones wait for the next event
pub fn error_policy(roll: Arc<ServiceMeshMemberRoll>, error: &Error, ctx: Arc<Context>) -> Action {
    let retryable = error.is_retryable();
    error!(
        ?error,
        member_roll = %roll.name_any(),
        namespace = %roll.namespace().unwrap_or_default(),
        retryable,
        "member roll reconciliation failed"
    );
    record_reconcile_error(retryable);

    if retryable {
        Action::requeue(ctx.error_requeue)
    } else {
        Action::await_change()
    }
}

/// Index values of a roll: the namespaces it declares
pub fn members_index(roll: &ServiceMeshMemberRoll) -> Vec<String> {
    roll.spec.members.clone()
}

/// Rolls that declare `namespace` as a member
pub fn rolls_for_namespace<'a, I>(rolls: I, namespace: &str) -> Vec<ObjectRef<ServiceMeshMemberRoll>>
where
    I: IntoIterator<Item = &'a Arc<ServiceMeshMemberRoll>>,
{
    rolls
        .into_iter()
        .filter(|roll| contains(&members_index(roll), namespace))
        .map(|roll| ObjectRef::from_obj(roll.as_ref()))
        .collect()
}

/// Rolls governed by a control plane in `namespace`
pub fn rolls_in_namespace<'a, I>(rolls: I, namespace: &str) -> Vec<ObjectRef<ServiceMeshMemberRoll>>
where
    I: IntoIterator<Item = &'a Arc<ServiceMeshMemberRoll>>,
{
    rolls
        .into_iter()
        .filter(|roll| roll.namespace().as_deref() == Some(namespace))
        .map(|roll| ObjectRef::from_obj(roll.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockMeshClient;
    use crate::testing::{api_error, control_plane, member_roll, MESH};
    use meshroll_common::crd::ServiceMeshMemberRollSpec;

    fn roll_in(namespace: &str, name: &str, members: &[&str]) -> Arc<ServiceMeshMemberRoll> {
        let mut roll = ServiceMeshMemberRoll::new(
            name,
            ServiceMeshMemberRollSpec {
                members: members.iter().map(|m| m.to_string()).collect(),
            },
        );
        roll.metadata.namespace = Some(namespace.to_string());
        Arc::new(roll)
    }

    fn names(refs: Vec<ObjectRef<ServiceMeshMemberRoll>>) -> Vec<String> {
        refs.into_iter()
            .map(|r| format!("{}/{}", r.namespace.unwrap_or_default(), r.name))
            .collect()
    }

    #[test]
    fn outcome_actions() {
        assert_eq!(ReconcileOutcome::Done.into_action(), Action::await_change());
        assert_eq!(
            ReconcileOutcome::Requeue.into_action(),
            Action::requeue(FINALIZER_REQUEUE)
        );
    }

    #[test]
    fn namespace_events_map_to_declaring_rolls() {
        let rolls = vec![
            roll_in("mesh-a", "default", &["bookinfo", "shop"]),
            roll_in("mesh-b", "default", &["shop"]),
            roll_in("mesh-c", "default", &[]),
        ];
        assert_eq!(
            names(rolls_for_namespace(&rolls, "shop")),
            vec!["mesh-a/default", "mesh-b/default"]
        );
        assert_eq!(names(rolls_for_namespace(&rolls, "bookinfo")), vec!["mesh-a/default"]);
        assert!(rolls_for_namespace(&rolls, "unrelated").is_empty());
    }

    #[test]
    fn control_plane_events_map_to_rolls_in_same_namespace() {
        let rolls = vec![
            roll_in("mesh-a", "default", &["bookinfo"]),
            roll_in("mesh-b", "default", &["bookinfo"]),
        ];
        assert_eq!(names(rolls_in_namespace(&rolls, "mesh-b")), vec!["mesh-b/default"]);
        assert!(rolls_in_namespace(&rolls, "bookinfo").is_empty());
    }

    #[test]
    fn members_index_lists_declared_namespaces() {
        let roll = roll_in(MESH, "default", &["a", "b"]);
        assert_eq!(members_index(&roll), vec!["a", "b"]);
    }

    #[test]
    fn error_policy_requeues_only_retryable_errors() {
        let ctx = Arc::new(Context::for_testing(Arc::new(MockMeshClient::new())));
        let roll = roll_in(MESH, "default", &[]);

        let transient = Error::internal("api server unavailable");
        assert_eq!(
            error_policy(roll.clone(), &transient, ctx.clone()),
            Action::requeue(ctx.error_requeue)
        );

        let terminal = Error::ControlPlaneCardinality {
            namespace: MESH.to_string(),
            found: 2,
        };
        assert_eq!(error_policy(roll, &terminal, ctx), Action::await_change());
    }

    /// Story: the operator lacks RBAC for a member write; the grant fires no
    /// watch event, so the pass must come back on its own
    #[test]
    fn forbidden_member_write_is_requeued() {
        let ctx = Arc::new(Context::for_testing(Arc::new(MockMeshClient::new())));
        let roll = roll_in(MESH, "default", &["ns1"]);

        let forbidden = Error::operation(
            "create",
            "RoleBinding",
            "ns1",
            "mesh-users",
            api_error(403, "Forbidden"),
        );
        assert_eq!(
            error_policy(roll.clone(), &forbidden, ctx.clone()),
            Action::requeue(ctx.error_requeue)
        );

        let pass = Error::aggregate(vec![
            forbidden,
            Error::cluster_operation("patch", "Namespace", "ns2", api_error(422, "Invalid")),
        ])
        .expect_err("two member failures");
        assert_eq!(
            error_policy(roll, &pass, ctx.clone()),
            Action::requeue(ctx.error_requeue)
        );
    }

    #[tokio::test]
    async fn reconcile_maps_finalizer_pass_to_short_requeue() {
        let mut mesh = MockMeshClient::new();
        mesh.expect_get_member_roll()
            .returning(|_, _| Ok(Some(member_roll(&["ns1"]))));
        mesh.expect_list_control_planes()
            .returning(|ns| Ok(vec![control_plane(ns, 1)]));
        mesh.expect_add_member_roll_finalizer()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let ctx = Arc::new(Context::for_testing(Arc::new(mesh)));
        let action = reconcile(Arc::new(member_roll(&["ns1"])), ctx)
            .await
            .expect("reconcile should succeed");
        assert_eq!(action, Action::requeue(FINALIZER_REQUEUE));
    }

    #[tokio::test]
    async fn reconcile_rejects_roll_without_namespace() {
        let ctx = Arc::new(Context::for_testing(Arc::new(MockMeshClient::new())));
        let roll = Arc::new(ServiceMeshMemberRoll::new(
            "default",
            ServiceMeshMemberRollSpec::default(),
        ));
        let err = reconcile(roll, ctx).await.expect_err("no namespace");
        assert!(matches!(err, Error::Validation { .. }));
    }
}
