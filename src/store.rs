use async_trait::async_trait;
use k8s_openapi::api::core::v1 as corev1;
use kube::{
    api::{Api, PostParams},
    Client,
};
use kube_client;
use kube_core;
use std::fmt;

use crate::echo_types::Echo;

/// Identity of an object within the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        ObjectKey {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Typed access to the objects the reconciler reads and writes.
///
/// The `get_*` operations map the API server's "NotFound" response to
/// `Ok(None)`; every other error is returned unmodified so the caller can
/// classify it. Updates go through the API server's usual resourceVersion
/// check, so a concurrent writer surfaces as a "Conflict" error.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_echo(&self, key: &ObjectKey) -> Result<Option<Echo>, kube::Error>;
    async fn get_pod(&self, key: &ObjectKey) -> Result<Option<corev1::Pod>, kube::Error>;
    async fn create_pod(&self, pod: &corev1::Pod) -> Result<(), kube::Error>;
    async fn update_pod(&self, pod: &corev1::Pod) -> Result<(), kube::Error>;
    async fn update_echo_status(&self, echo: &Echo) -> Result<(), kube::Error>;
}

/// `ClusterStore` backed by the kube client.
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        KubeStore { client }
    }

    fn echo_api(&self, namespace: &str) -> Api<Echo> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pod_api(&self, namespace: &str) -> Api<corev1::Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Reject writes for objects missing the metadata their request path needs,
/// instead of silently targeting an empty namespace or name.
fn require_meta<'a>(field: Option<&'a str>, what: &'static str) -> Result<&'a str, kube::Error> {
    field.ok_or_else(|| {
        kube::Error::Api(kube_core::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("object misses {}", what),
            reason: "BadRequest".to_string(),
            code: 400,
        })
    })
}

fn ignore_not_found<K>(res: Result<K, kube::Error>) -> Result<Option<K>, kube::Error> {
    match res {
        Ok(obj) => Ok(Some(obj)),
        Err(kube_client::Error::Api(kube_core::ErrorResponse { ref reason, .. }))
            if reason == "NotFound" =>
        {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_echo(&self, key: &ObjectKey) -> Result<Option<Echo>, kube::Error> {
        ignore_not_found(self.echo_api(&key.namespace).get(&key.name).await)
    }

    async fn get_pod(&self, key: &ObjectKey) -> Result<Option<corev1::Pod>, kube::Error> {
        ignore_not_found(self.pod_api(&key.namespace).get(&key.name).await)
    }

    async fn create_pod(&self, pod: &corev1::Pod) -> Result<(), kube::Error> {
        let namespace = require_meta(pod.metadata.namespace.as_deref(), ".metadata.namespace")?;
        self.pod_api(namespace)
            .create(&PostParams::default(), pod)
            .await?;
        Ok(())
    }

    async fn update_pod(&self, pod: &corev1::Pod) -> Result<(), kube::Error> {
        let namespace = require_meta(pod.metadata.namespace.as_deref(), ".metadata.namespace")?;
        let name = require_meta(pod.metadata.name.as_deref(), ".metadata.name")?;
        self.pod_api(namespace)
            .replace(name, &PostParams::default(), pod)
            .await?;
        Ok(())
    }

    async fn update_echo_status(&self, echo: &Echo) -> Result<(), kube::Error> {
        let namespace = require_meta(echo.metadata.namespace.as_deref(), ".metadata.namespace")?;
        let name = require_meta(echo.metadata.name.as_deref(), ".metadata.name")?;
        let data = serde_json::to_vec(echo).map_err(kube::Error::SerdeError)?;
        self.echo_api(namespace)
            .replace_status(name, &PostParams::default(), data)
            .await?;
        Ok(())
    }
}
