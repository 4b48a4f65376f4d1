use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    core::GroupVersionKind,
    discovery::{self, Scope},
    Client, Resource, ResourceExt,
};
use log::debug;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use thiserror::Error;

pub const FIELD_MANAGER: &str = "kubac";

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Admission control (a webhook or Pod Security) rejected the request.
    #[error("denied: {0}")]
    Denied(String),

    /// The caller is not authorized for the request.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("kubernetes api error: {0}")]
    Api(kube::Error),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}

const ADMISSION_MARKERS: [&str; 3] = ["admission webhook", "denied the request", "violates PodSecurity"];

fn is_admission_rejection(message: &str) -> bool {
    ADMISSION_MARKERS.iter().any(|m| message.contains(m))
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => ClusterError::NotFound(resp.message),
                409 => ClusterError::AlreadyExists(resp.message),
                400 | 403 if is_admission_rejection(&resp.message) => {
                    ClusterError::Denied(resp.message)
                }
                403 => ClusterError::Forbidden(resp.message),
                _ => ClusterError::Api(kube::Error::Api(resp)),
            },
            other => ClusterError::Api(other),
        }
    }
}

/// Namespaced, statically typed objects the accessor can read and write.
pub trait NamespacedResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
{
}

impl<K> NamespacedResource for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
{
}

/// Read and mutate access to cluster objects.
///
/// Everything kubac does against a cluster goes through this trait, so the
/// install steps and verification probes can run against an in-memory
/// cluster in tests.
#[allow(async_fn_in_trait)]
pub trait ClusterState {
    async fn get<K: NamespacedResource>(&self, namespace: &str, name: &str)
        -> Result<K, ClusterError>;

    async fn list<K: NamespacedResource>(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, ClusterError>;

    async fn create<K: NamespacedResource>(&self, namespace: &str, obj: &K)
        -> Result<K, ClusterError>;

    async fn delete<K: NamespacedResource>(&self, namespace: &str, name: &str)
        -> Result<(), ClusterError>;

    /// Creates the namespace; an existing one is left untouched.
    async fn ensure_namespace(&self, name: &str) -> Result<(), ClusterError>;

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError>;

    /// Server-side applies an arbitrary manifest object.
    async fn apply(&self, obj: &DynamicObject) -> Result<(), ClusterError>;
}

/// [`ClusterState`] backed by a live API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        KubeCluster { client }
    }

    /// Connects with the ambient kubeconfig or in-cluster service account.
    pub async fn try_default() -> Result<Self, ClusterError> {
        let client = Client::try_default().await.map_err(ClusterError::Api)?;
        Ok(KubeCluster::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl ClusterState for KubeCluster {
    async fn get<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<K, ClusterError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn list<K: NamespacedResource>(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, ClusterError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        Ok(api.list(&params).await?.items)
    }

    async fn create<K: NamespacedResource>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<K, ClusterError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), obj).await?)
    }

    async fn delete<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => Ok(()),
            Err(e) => match ClusterError::from(e) {
                ClusterError::AlreadyExists(_) => {
                    debug!("namespace {name} already exists");
                    Ok(())
                }
                other => Err(other),
            },
        }
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn apply(&self, obj: &DynamicObject) -> Result<(), ClusterError> {
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| ClusterError::InvalidManifest("missing apiVersion/kind".to_string()))?;
        let gvk = GroupVersionKind::try_from(types)
            .map_err(|e| ClusterError::InvalidManifest(e.to_string()))?;
        let name = obj.metadata.name.clone().ok_or_else(|| {
            ClusterError::InvalidManifest(format!("{} without metadata.name", types.kind))
        })?;

        let (resource, caps) = discovery::pinned_kind(&self.client, &gvk).await?;
        let api: Api<DynamicObject> = match caps.scope {
            Scope::Namespaced => {
                let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
                Api::namespaced_with(self.client.clone(), &namespace, &resource)
            }
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
        };

        debug!("applying {} {}", types.kind, name);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&name, &params, &Patch::Apply(obj)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn classifies_api_errors() {
        assert!(ClusterError::from(api_error(404, "pods \"x\" not found")).is_not_found());
        assert!(matches!(
            ClusterError::from(api_error(409, "exists")),
            ClusterError::AlreadyExists(_)
        ));
        assert!(matches!(
            ClusterError::from(api_error(400, "admission webhook denied the request")),
            ClusterError::Denied(_)
        ));
        assert!(matches!(
            ClusterError::from(api_error(403, "pods \"x\" is forbidden: violates PodSecurity \"restricted:latest\"")),
            ClusterError::Denied(_)
        ));
        assert!(matches!(
            ClusterError::from(api_error(503, "unavailable")),
            ClusterError::Api(_)
        ));
    }

    #[test]
    fn authorization_errors_are_not_admission_denials() {
        let rbac = api_error(
            403,
            "pods is forbidden: User \"dev\" cannot create resource \"pods\" in API group \"\" in the namespace \"kubac-demo\"",
        );
        assert!(matches!(ClusterError::from(rbac), ClusterError::Forbidden(_)));

        let invalid = api_error(422, "Pod \"x\" is invalid: spec.containers: Required value");
        assert!(matches!(ClusterError::from(invalid), ClusterError::Api(_)));

        let bad_request = api_error(400, "the server rejected our request for an unknown reason");
        assert!(matches!(ClusterError::from(bad_request), ClusterError::Api(_)));
    }

    #[test]
    fn denial_message_is_kept() {
        let message = "admission webhook \"validate.kyverno.svc-fail\" denied the request: disallow-privileged: blocked";
        let err = ClusterError::from(api_error(400, message));
        assert_eq!(err.to_string(), format!("denied: {message}"));
    }
}
