//! In-memory cluster for scenario tests
//!
//! [`FakeCluster`] implements [`MeshClient`] over plain maps, with just enough
//! API-server behavior to exercise whole reconciliation passes: label
//! selectors, `resourceVersion` conflicts, finalizer-gated deletion and
//! per-object failure injection.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, ObjectReference};
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
use kube::runtime::events::EventType;
use kube::ResourceExt;

use meshroll_common::crd::{
    ServiceMeshControlPlane, ServiceMeshControlPlaneSpec, ServiceMeshMemberRoll,
    ServiceMeshMemberRollSpec, ServiceMeshMemberRollStatus,
};
use meshroll_common::kube_utils::{with_finalizer, with_owner_reference, without_finalizer};
use meshroll_common::mesh::{LEGACY_MEMBER_OF_LABEL, MEMBER_OF_LABEL, OWNER_LABEL};
use meshroll_common::{Error, EventPublisher};

use crate::client::{DeletePropagation, MeshClient};

pub const MESH: &str = "istio-system";
pub const ROLL: &str = "default";

/// Build a kube API error with the given status code and reason
pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} ({})", reason, code),
        reason: reason.to_string(),
        code,
    })
}

/// A template RoleBinding in `namespace` owned by that mesh
pub fn template_binding(namespace: &str, name: &str) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                OWNER_LABEL.to_string(),
                namespace.to_string(),
            )])),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: format!("mesh-{}", name),
        },
        subjects: None,
    }
}

/// A mesh-owned RoleBinding copy in a member namespace
pub fn role_binding(namespace: &str, name: &str, mesh_namespace: &str) -> RoleBinding {
    let mut rb = template_binding(namespace, name);
    rb.metadata.labels = Some(BTreeMap::from([(
        MEMBER_OF_LABEL.to_string(),
        mesh_namespace.to_string(),
    )]));
    rb
}

/// A member roll in [`MESH`] with the given members
pub fn member_roll(members: &[&str]) -> ServiceMeshMemberRoll {
    let mut roll = ServiceMeshMemberRoll::new(
        ROLL,
        ServiceMeshMemberRollSpec {
            members: members.iter().map(|m| m.to_string()).collect(),
        },
    );
    roll.metadata.namespace = Some(MESH.to_string());
    roll.metadata.uid = Some("roll-uid".to_string());
    roll.metadata.generation = Some(1);
    roll.metadata.resource_version = Some("1".to_string());
    roll
}

/// An installed control plane in `namespace`
pub fn control_plane(namespace: &str, generation: i64) -> ServiceMeshControlPlane {
    let mut cp = ServiceMeshControlPlane::new("basic", ServiceMeshControlPlaneSpec::default());
    cp.metadata.namespace = Some(namespace.to_string());
    cp.metadata.uid = Some(format!("{}-smcp-uid", namespace));
    cp.metadata.generation = Some(generation);
    cp
}

fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
            None => labels.contains_key(term),
        })
}

#[derive(Default)]
struct State {
    rolls: BTreeMap<(String, String), ServiceMeshMemberRoll>,
    control_planes: Vec<ServiceMeshControlPlane>,
    namespaces: BTreeMap<String, Namespace>,
    role_bindings: BTreeMap<(String, String), RoleBinding>,
    failures: BTreeSet<(String, String)>,
    writes: Vec<String>,
    next_version: u64,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn check(&self, verb: &str, name: &str) -> Result<(), kube::Error> {
        if self.failures.contains(&(verb.to_string(), name.to_string())) {
            Err(api_error(500, "InternalError"))
        } else {
            Ok(())
        }
    }
}

/// In-memory [`MeshClient`]
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_version: 100,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake cluster mutex poisoned")
    }

    // ===== Seeding =====

    pub fn with_roll(self, roll: ServiceMeshMemberRoll) -> Self {
        self.state().rolls.insert(
            (roll.namespace().unwrap_or_default(), roll.name_any()),
            roll,
        );
        self
    }

    pub fn with_control_plane(self, cp: ServiceMeshControlPlane) -> Self {
        self.state().control_planes.push(cp);
        self
    }

    pub fn with_namespace(self, name: &str) -> Self {
        self.state().namespaces.insert(
            name.to_string(),
            Namespace {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        self
    }

    pub fn with_member_namespace(self, name: &str, mesh_namespace: &str) -> Self {
        let cluster = self.with_namespace(name);
        if let Some(ns) = cluster.state().namespaces.get_mut(name) {
            ns.metadata.labels = Some(BTreeMap::from([
                (MEMBER_OF_LABEL.to_string(), mesh_namespace.to_string()),
                (LEGACY_MEMBER_OF_LABEL.to_string(), mesh_namespace.to_string()),
            ]));
        }
        cluster
    }

    pub fn with_role_binding(self, binding: RoleBinding) -> Self {
        self.state().role_bindings.insert(
            (binding.namespace().unwrap_or_default(), binding.name_any()),
            binding,
        );
        self
    }

    /// Make every `verb` against the object called `name` fail with a 500
    pub fn fail_on(&self, verb: &str, name: &str) {
        self.state()
            .failures
            .insert((verb.to_string(), name.to_string()));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    // ===== External changes =====

    /// Replace the roll's members and bump its generation, as the API server does
    pub fn set_members(&self, members: &[&str]) {
        let mut state = self.state();
        let version = state.bump();
        if let Some(roll) = state.rolls.get_mut(&(MESH.to_string(), ROLL.to_string())) {
            roll.spec.members = members.iter().map(|m| m.to_string()).collect();
            roll.metadata.generation = Some(roll.generation() + 1);
            roll.metadata.resource_version = Some(version);
        }
    }

    pub fn request_roll_deletion(&self) {
        let mut state = self.state();
        let version = state.bump();
        if let Some(roll) = state.rolls.get_mut(&(MESH.to_string(), ROLL.to_string())) {
            roll.metadata.deletion_timestamp = Some(Time(Default::default()));
            roll.metadata.resource_version = Some(version);
        }
    }

    pub fn bump_control_plane(&self, namespace: &str) {
        for cp in self
            .state()
            .control_planes
            .iter_mut()
            .filter(|cp| cp.namespace().as_deref() == Some(namespace))
        {
            cp.metadata.generation = Some(cp.generation() + 1);
        }
    }

    // ===== Observation =====

    pub fn roll(&self) -> Option<ServiceMeshMemberRoll> {
        self.state()
            .rolls
            .get(&(MESH.to_string(), ROLL.to_string()))
            .cloned()
    }

    /// Namespaces whose member-of label names `mesh_namespace`
    pub fn member_namespaces(&self, mesh_namespace: &str) -> BTreeSet<String> {
        self.state()
            .namespaces
            .values()
            .filter(|ns| {
                ns.labels().get(MEMBER_OF_LABEL).map(String::as_str) == Some(mesh_namespace)
            })
            .map(ResourceExt::name_any)
            .collect()
    }

    pub fn namespace_labels(&self, name: &str) -> BTreeMap<String, String> {
        self.state()
            .namespaces
            .get(name)
            .map(|ns| ns.labels().clone())
            .unwrap_or_default()
    }

    pub fn role_binding_names(&self, namespace: &str) -> BTreeSet<String> {
        self.state()
            .role_bindings
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Every mutating call made so far, as `verb kind name`
    pub fn writes(&self) -> Vec<String> {
        self.state().writes.clone()
    }
}

#[async_trait]
impl MeshClient for FakeCluster {
    async fn get_member_roll(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceMeshMemberRoll>, Error> {
        let state = self.state();
        state.check("get", name)?;
        Ok(state
            .rolls
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_control_planes(
        &self,
        namespace: &str,
    ) -> Result<Vec<ServiceMeshControlPlane>, Error> {
        let state = self.state();
        Ok(state
            .control_planes
            .iter()
            .filter(|cp| cp.namespace().as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error> {
        let state = self.state();
        state.check("get", name)?;
        Ok(state.namespaces.get(name).cloned())
    }

    async fn list_member_namespaces(&self, mesh_namespace: &str) -> Result<Vec<Namespace>, Error> {
        let state = self.state();
        state.check("list", "namespaces")?;
        Ok(state
            .namespaces
            .values()
            .filter(|ns| ns.labels().get(MEMBER_OF_LABEL).map(String::as_str) == Some(mesh_namespace))
            .cloned()
            .collect())
    }

    async fn patch_namespace_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<(), Error> {
        let mut state = self.state();
        state
            .check("patch", name)
            .map_err(|e| Error::cluster_operation("patch", "Namespace", name, e))?;
        state.writes.push(format!("patch Namespace {}", name));
        let ns = state
            .namespaces
            .get_mut(name)
            .ok_or_else(|| Error::cluster_operation("patch", "Namespace", name, api_error(404, "NotFound")))?;
        let current = ns.metadata.labels.get_or_insert_with(Default::default);
        for (key, value) in labels {
            match value {
                Some(v) => current.insert(key.clone(), v.clone()),
                None => current.remove(key),
            };
        }
        Ok(())
    }

    async fn list_role_bindings(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<RoleBinding>, Error> {
        let state = self.state();
        state.check("list", namespace)?;
        Ok(state
            .role_bindings
            .values()
            .filter(|rb| rb.namespace().as_deref() == Some(namespace))
            .filter(|rb| selector_matches(label_selector, rb.labels()))
            .cloned()
            .collect())
    }

    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<(), Error> {
        let mut state = self.state();
        let namespace = binding.namespace().unwrap_or_default();
        let name = binding.name_any();
        state
            .check("create", &name)
            .map_err(|e| Error::operation("create", "RoleBinding", &namespace, &name, e))?;
        state
            .writes
            .push(format!("create RoleBinding {}/{}", namespace, name));
        state
            .role_bindings
            .entry((namespace, name))
            .or_insert_with(|| binding.clone());
        Ok(())
    }

    async fn delete_role_binding(
        &self,
        namespace: &str,
        name: &str,
        _propagation: DeletePropagation,
    ) -> Result<(), Error> {
        let mut state = self.state();
        state
            .check("delete", name)
            .map_err(|e| Error::operation("delete", "RoleBinding", namespace, name, e))?;
        state
            .writes
            .push(format!("delete RoleBinding {}/{}", namespace, name));
        state
            .role_bindings
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn add_member_roll_finalizer(
        &self,
        roll: &ServiceMeshMemberRoll,
        finalizer: &str,
        owner: Option<OwnerReference>,
    ) -> Result<(), Error> {
        let mut state = self.state();
        let version = state.bump();
        let stored = state
            .rolls
            .get_mut(&(roll.namespace().unwrap_or_default(), roll.name_any()))
            .ok_or_else(|| Error::from(api_error(404, "NotFound")))?;
        if stored.metadata.resource_version != roll.metadata.resource_version {
            return Err(Error::from(api_error(409, "Conflict")));
        }
        if let Some(owner) = owner {
            let refs = with_owner_reference(&roll.metadata, owner);
            // apiserver validation: at most one controller reference
            if refs.iter().filter(|r| r.controller == Some(true)).count() > 1 {
                return Err(Error::from(api_error(422, "Invalid")));
            }
            stored.metadata.owner_references = Some(refs);
        }
        stored.metadata.finalizers = Some(with_finalizer(&roll.metadata, finalizer));
        stored.metadata.resource_version = Some(version);
        state.writes.push(format!("add finalizer {}", finalizer));
        Ok(())
    }

    async fn remove_member_roll_finalizer(
        &self,
        roll: &ServiceMeshMemberRoll,
        finalizer: &str,
    ) -> Result<(), Error> {
        let mut state = self.state();
        let version = state.bump();
        let key = (roll.namespace().unwrap_or_default(), roll.name_any());
        let stored = state
            .rolls
            .get_mut(&key)
            .ok_or_else(|| Error::from(api_error(404, "NotFound")))?;
        if stored.metadata.resource_version != roll.metadata.resource_version {
            return Err(Error::from(api_error(409, "Conflict")));
        }
        let finalizers = without_finalizer(&roll.metadata, finalizer);
        let release = finalizers.is_empty() && stored.metadata.deletion_timestamp.is_some();
        stored.metadata.finalizers = Some(finalizers);
        stored.metadata.resource_version = Some(version);
        if release {
            state.rolls.remove(&key);
        }
        state.writes.push(format!("remove finalizer {}", finalizer));
        Ok(())
    }

    async fn patch_member_roll_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ServiceMeshMemberRollStatus,
    ) -> Result<(), Error> {
        let mut state = self.state();
        state
            .check("patch_status", name)
            .map_err(|e| Error::operation("patch status of", "ServiceMeshMemberRoll", namespace, name, e))?;
        let version = state.bump();
        let stored = state
            .rolls
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::from(api_error(404, "NotFound")))?;
        stored.status = Some(status.clone());
        stored.metadata.resource_version = Some(version);
        state.writes.push(format!("patch status {}/{}", namespace, name));
        Ok(())
    }
}

/// Event publisher that remembers every reason it was asked to publish
#[derive(Default)]
pub struct RecordingEvents {
    published: Mutex<Vec<(EventType, String)>>,
}

impl RecordingEvents {
    pub fn reasons(&self) -> Vec<String> {
        self.published
            .lock()
            .expect("events mutex poisoned")
            .iter()
            .map(|(_, reason)| reason.clone())
            .collect()
    }

    pub fn warnings(&self) -> usize {
        self.published
            .lock()
            .expect("events mutex poisoned")
            .iter()
            .filter(|(type_, _)| *type_ == EventType::Warning)
            .count()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        self.published
            .lock()
            .expect("events mutex poisoned")
            .push((type_, reason.to_string()));
    }
}
