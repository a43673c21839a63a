//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction plus small pure helpers over `ObjectMeta` for the
//! label, finalizer and owner-reference bookkeeping the member-roll
//! controller performs.

use std::path::Path;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::Error;

// =============================================================================
// Client construction
// =============================================================================

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
///
/// Without a path the config is inferred: in-cluster service account first,
/// then `KUBECONFIG` and `~/.kube/config`.
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

// =============================================================================
// Labels
// =============================================================================

/// Whether `key` is present with exactly `value`
pub fn has_label(meta: &ObjectMeta, key: &str, value: &str) -> bool {
    meta.labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .is_some_and(|v| v == value)
}

/// Set `key` to `value`, creating the label map if needed.
///
/// Returns `true` when the metadata changed.
pub fn set_label(meta: &mut ObjectMeta, key: &str, value: &str) -> bool {
    if has_label(meta, key, value) {
        return false;
    }
    meta.labels
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
    true
}

/// Remove `key`. Returns `true` when the label was present.
pub fn delete_label(meta: &mut ObjectMeta, key: &str) -> bool {
    meta.labels
        .as_mut()
        .is_some_and(|labels| labels.remove(key).is_some())
}

// =============================================================================
// Finalizers
// =============================================================================

/// Whether `finalizer` is in the metadata's finalizer list
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// The finalizer list with `finalizer` appended, if it is not already there
pub fn with_finalizer(meta: &ObjectMeta, finalizer: &str) -> Vec<String> {
    let mut finalizers = meta.finalizers.clone().unwrap_or_default();
    if !finalizers.iter().any(|f| f == finalizer) {
        finalizers.push(finalizer.to_string());
    }
    finalizers
}

/// The finalizer list with every occurrence of `finalizer` removed
pub fn without_finalizer(meta: &ObjectMeta, finalizer: &str) -> Vec<String> {
    meta.finalizers
        .iter()
        .flatten()
        .filter(|f| f.as_str() != finalizer)
        .cloned()
        .collect()
}

// =============================================================================
// Owner references
// =============================================================================

/// The owner reference list with `owner` added, replacing any reference with
/// the same UID
///
/// An object has at most one controller reference. When another owner
/// already controls the object, `owner` is added without the controller flag.
pub fn with_owner_reference(meta: &ObjectMeta, mut owner: OwnerReference) -> Vec<OwnerReference> {
    let mut refs: Vec<OwnerReference> = meta
        .owner_references
        .iter()
        .flatten()
        .filter(|r| r.uid != owner.uid)
        .cloned()
        .collect();
    if refs.iter().any(|r| r.controller == Some(true)) {
        owner.controller = None;
    }
    refs.push(owner);
    refs
}
