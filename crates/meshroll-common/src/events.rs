//! Kubernetes Event recording for the member-roll controller.
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so that the reconciler can emit standard Kubernetes Events visible via
//! `kubectl describe smmr`.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "MembersConfigured")
    /// * `action` - What action was taken (e.g. "Reconcile")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
///
/// These appear in `kubectl get events` under the REASON column.
pub mod reasons {
    /// Cleanup finalizer attached to a new member roll
    pub const FINALIZER_ADDED: &str = "FinalizerAdded";
    /// Every member namespace was configured against the current control plane
    pub const MEMBERS_CONFIGURED: &str = "MembersConfigured";
    /// At least one member namespace could not be configured
    pub const MEMBER_CONFIGURATION_FAILED: &str = "MemberConfigurationFailed";
    /// Deletion cleanup left members configured; the finalizer is released anyway
    pub const CLEANUP_INCOMPLETE: &str = "CleanupIncomplete";
    /// The roll's namespace does not hold exactly one control plane
    pub const CONTROL_PLANE_NOT_FOUND: &str = "ControlPlaneNotFound";
}

/// Well-known event action strings.
///
/// These appear in `kubectl get events` under the ACTION column.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Joining or re-syncing member namespaces
    pub const CONFIGURE: &str = "Configure";
    /// Releasing member namespaces on deletion
    pub const CLEANUP: &str = "Cleanup";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_publisher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
    }

    #[test]
    fn reason_constants_are_pascal_case() {
        assert_eq!(reasons::FINALIZER_ADDED, "FinalizerAdded");
        assert_eq!(reasons::MEMBERS_CONFIGURED, "MembersConfigured");
        assert_eq!(reasons::CONTROL_PLANE_NOT_FOUND, "ControlPlaneNotFound");
    }

    #[tokio::test]
    async fn noop_publisher_does_not_panic() {
        let publisher = NoopEventPublisher;
        publisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::CLEANUP_INCOMPLETE,
                actions::CLEANUP,
                Some("test".to_string()),
            )
            .await;
    }
}
