//! In-memory [`ClusterState`] for exercising probes and install steps.

use helpers::{ClusterError, ClusterState, NamespacedResource};
use kube::api::DynamicObject;
use kube::core::ErrorResponse;
use kube::Resource;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

type Key = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    namespaces: BTreeSet<String>,
    created: Vec<String>,
    deleted: Vec<String>,
    applied: Vec<String>,
    deny_creates: Option<String>,
    forbid_creates: Option<String>,
    unreachable: bool,
    failing_apply: Option<String>,
    /// how long after a pod deletion the owning deployment is whole again;
    /// `None` means it never recovers
    recovery: Option<Duration>,
    recover_at: Option<(Instant, Key, i64)>,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

fn key_of<K: NamespacedResource>(namespace: &str, name: &str) -> Key {
    (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
}

fn unavailable() -> ClusterError {
    ClusterError::Api(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: "connection refused".to_string(),
        reason: "ServiceUnavailable".to_string(),
        code: 503,
    }))
}

fn matches_selector(obj: &Value, selector: Option<&str>) -> bool {
    let Some(selector) = selector else {
        return true;
    };
    let labels = &obj["metadata"]["labels"];
    selector.split(',').all(|term| match term.split_once('=') {
        Some((k, v)) => labels[k.trim()].as_str() == Some(v.trim()),
        None => !labels[term.trim()].is_null(),
    })
}

impl FakeCluster {
    pub fn new() -> Self {
        FakeCluster::default()
    }

    pub fn with_namespace(self, name: &str) -> Self {
        self.state.lock().unwrap().namespaces.insert(name.to_string());
        self
    }

    pub fn with<K: NamespacedResource>(self, obj: K) -> Self {
        let namespace = obj.meta().namespace.clone().unwrap_or_default();
        let name = obj.meta().name.clone().unwrap_or_default();
        let value = serde_json::to_value(&obj).unwrap();
        {
            let mut state = self.state.lock().unwrap();
            state.namespaces.insert(namespace.clone());
            state.objects.insert(key_of::<K>(&namespace, &name), value);
        }
        self
    }

    /// Every create is rejected the way an admission webhook would.
    pub fn denying_creates(self, message: &str) -> Self {
        self.state.lock().unwrap().deny_creates = Some(message.to_string());
        self
    }

    /// Every create fails authorization, as for a user without RBAC grants.
    pub fn forbidding_creates(self, message: &str) -> Self {
        self.state.lock().unwrap().forbid_creates = Some(message.to_string());
        self
    }

    /// Every call fails as if the API server could not be reached.
    pub fn unreachable(self) -> Self {
        self.state.lock().unwrap().unreachable = true;
        self
    }

    pub fn failing_apply_of(self, name: &str) -> Self {
        self.state.lock().unwrap().failing_apply = Some(name.to_string());
        self
    }

    pub fn recovering_after(self, recovery: Option<Duration>) -> Self {
        self.state.lock().unwrap().recovery = recovery;
        self
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn applied(&self) -> Vec<String> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state.lock().unwrap().namespaces.contains(name)
    }

    /// A deleted pod takes one ready replica away from the deployment named
    /// by its `app` label until the configured recovery time has passed.
    fn disrupt(state: &mut State, pod: &Value, namespace: &str) {
        let Some(app) = pod["metadata"]["labels"]["app"].as_str() else {
            return;
        };
        let key = ("Deployment".to_string(), namespace.to_string(), app.to_string());
        let Some(deployment) = state.objects.get_mut(&key) else {
            return;
        };
        let ready = deployment["status"]["readyReplicas"].as_i64().unwrap_or(0);
        deployment["status"]["readyReplicas"] = Value::from((ready - 1).max(0));
        if let Some(recovery) = state.recovery {
            state.recover_at = Some((Instant::now() + recovery, key, ready));
        }
    }

    fn heal(state: &mut State) {
        let due = matches!(&state.recover_at, Some((at, _, _)) if Instant::now() >= *at);
        if !due {
            return;
        }
        if let Some((_, key, ready)) = state.recover_at.take() {
            if let Some(deployment) = state.objects.get_mut(&key) {
                deployment["status"]["readyReplicas"] = Value::from(ready);
            }
        }
    }
}

impl ClusterState for FakeCluster {
    async fn get<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<K, ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(unavailable());
        }
        Self::heal(&mut state);
        let key = key_of::<K>(namespace, name);
        match state.objects.get(&key) {
            Some(value) => Ok(serde_json::from_value(value.clone()).unwrap()),
            None => Err(ClusterError::NotFound(format!("{} \"{}\" not found", key.0, name))),
        }
    }

    async fn list<K: NamespacedResource>(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, ClusterError> {
        let state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(unavailable());
        }
        let kind = K::kind(&()).to_string();
        Ok(state
            .objects
            .iter()
            .filter(|((k, ns, _), v)| *k == kind && ns == namespace && matches_selector(v, label_selector))
            .map(|(_, v)| serde_json::from_value(v.clone()).unwrap())
            .collect())
    }

    async fn create<K: NamespacedResource>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<K, ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(unavailable());
        }
        if !state.namespaces.contains(namespace) {
            return Err(ClusterError::NotFound(format!("namespaces \"{namespace}\" not found")));
        }
        if let Some(message) = &state.forbid_creates {
            return Err(ClusterError::Forbidden(message.clone()));
        }
        if let Some(message) = &state.deny_creates {
            return Err(ClusterError::Denied(message.clone()));
        }
        let name = obj.meta().name.clone().unwrap_or_default();
        let key = key_of::<K>(namespace, &name);
        if state.objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(name));
        }
        state.objects.insert(key.clone(), serde_json::to_value(obj).unwrap());
        state.created.push(format!("{}/{}", key.0, name));
        Ok(obj.clone())
    }

    async fn delete<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(unavailable());
        }
        let key = key_of::<K>(namespace, name);
        let Some(removed) = state.objects.remove(&key) else {
            return Err(ClusterError::NotFound(format!("{} \"{}\" not found", key.0, name)));
        };
        if key.0 == "Pod" {
            Self::disrupt(&mut state, &removed, namespace);
        }
        state.deleted.push(format!("{}/{}", key.0, name));
        Ok(())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(unavailable());
        }
        state.namespaces.insert(name.to_string());
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(unavailable());
        }
        if !state.namespaces.remove(name) {
            return Err(ClusterError::NotFound(format!("namespaces \"{name}\" not found")));
        }
        state.objects.retain(|(_, ns, _), _| ns != name);
        state.deleted.push(format!("Namespace/{name}"));
        Ok(())
    }

    async fn apply(&self, obj: &DynamicObject) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(unavailable());
        }
        let kind = obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
        let name = obj.metadata.name.clone().unwrap_or_default();
        if state.failing_apply.as_deref() == Some(name.as_str()) {
            return Err(ClusterError::Denied(format!("{kind} {name} rejected")));
        }
        state.applied.push(format!("{kind}/{name}"));
        Ok(())
    }
}
