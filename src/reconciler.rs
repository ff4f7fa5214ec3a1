use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ObjectMeta, Resource};
use kube::runtime::controller::Action;
use thiserror::Error;
use tokio::time::Duration;
use tracing::*;

use crate::echo_types::{Echo, EchoStatus};
use crate::store::{ClusterStore, ObjectKey};

/// Image run by every pod this controller creates. The pod payload is a
/// policy constant, not derived from the Echo spec.
pub const BASELINE_IMAGE: &str = "nginx:latest";
pub const BASELINE_CONTAINER_NAME: &str = "nginx";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to fetch object: {0}")]
    FetchFailed(#[source] kube::Error),
    #[error("Failed to converge pod: {0}")]
    ConvergeFailed(#[source] kube::Error),
    #[error("Failed to update Echo status: {0}")]
    StatusUpdateFailed(#[source] kube::Error),
    #[error("MissingObjectKey: {0}")]
    MissingObjectKey(&'static str),
}

/// Drives the observed state of one Echo toward its declared state:
/// exactly one pod with the Echo's identity, controlled by the Echo, and a
/// status carrying the declared message and the pod's phase.
pub struct EchoReconciler<S> {
    store: S,
}

impl<S: ClusterStore> EchoReconciler<S> {
    pub fn new(store: S) -> Self {
        EchoReconciler { store }
    }

    /// One full reconciliation pass for the Echo at `key`.
    ///
    /// Every invocation re-derives its actions from the current observed
    /// state and issues at most one mutation per branch, so the pass may be
    /// repeated any number of times and always converges to the same state.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action, Error> {
        let echo = match self.store.get_echo(key).await.map_err(Error::FetchFailed)? {
            Some(echo) => echo,
            None => {
                // Deleted or never created; any owned pod is removed by the
                // owner-reference cascade.
                info!("Echo {} not found, end reconcile", key);
                return Ok(Action::await_change());
            }
        };
        info!("Echo {} has spec.message: {}", key, echo.spec.message);

        let pod = match self.store.get_pod(key).await.map_err(Error::FetchFailed)? {
            None => {
                let pod = baseline_pod(&echo)?;
                info!("Create pod: {}", key);
                self.store
                    .create_pod(&pod)
                    .await
                    .map_err(Error::ConvergeFailed)?;
                // Status projection waits for the pass triggered by the
                // pod's own creation event.
                return Ok(Action::requeue(Duration::from_secs(60)));
            }
            Some(mut pod) => {
                if !is_controlled_by(&pod, &echo) {
                    set_controller_ref(&mut pod, &echo)?;
                    info!("Claim pod: {}", key);
                    self.store
                        .update_pod(&pod)
                        .await
                        .map_err(Error::ConvergeFailed)?;
                }
                pod
            }
        };

        self.project_status(&echo, &pod).await?;
        Ok(Action::requeue(Duration::from_secs(60)))
    }

    /// Fold (spec.message, pod phase) into the Echo's status subresource.
    /// The write is issued even when the stored status already matches.
    async fn project_status(&self, echo: &Echo, pod: &corev1::Pod) -> Result<(), Error> {
        let phase = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_default();
        let status = EchoStatus {
            spec_echo: echo.spec.message.clone(),
            pod_status: phase,
        };
        let mut echo = echo.clone();
        echo.status = Some(status);
        self.store
            .update_echo_status(&echo)
            .await
            .map_err(Error::StatusUpdateFailed)
    }
}

/// The pod a fresh Echo gets: same identity as the Echo, baseline payload,
/// controller reference stamped before the create goes out.
fn baseline_pod(echo: &Echo) -> Result<corev1::Pod, Error> {
    let oref = controller_ref(echo)?;
    Ok(corev1::Pod {
        metadata: ObjectMeta {
            name: echo.metadata.name.clone(),
            namespace: echo.metadata.namespace.clone(),
            owner_references: Some(vec![oref]),
            ..ObjectMeta::default()
        },
        spec: Some(corev1::PodSpec {
            containers: vec![corev1::Container {
                name: BASELINE_CONTAINER_NAME.to_string(),
                image: Some(BASELINE_IMAGE.to_string()),
                ..corev1::Container::default()
            }],
            ..corev1::PodSpec::default()
        }),
        ..corev1::Pod::default()
    })
}

fn controller_ref(echo: &Echo) -> Result<OwnerReference, Error> {
    echo.controller_owner_ref(&())
        .ok_or_else(|| Error::MissingObjectKey(".metadata.uid"))
}

/// Does the pod's controller owner reference carry this Echo's UID?
fn is_controlled_by(pod: &corev1::Pod, echo: &Echo) -> bool {
    let uid = match echo.metadata.uid.as_deref() {
        Some(uid) => uid,
        None => return false,
    };
    pod.metadata
        .owner_references
        .as_ref()
        .map_or(false, |orefs| {
            orefs
                .iter()
                .any(|oref| oref.controller == Some(true) && oref.uid == uid)
        })
}

/// Stamp `echo` as the pod's controller, displacing a stale controller
/// reference if one is present. Non-controller references are left alone.
fn set_controller_ref(pod: &mut corev1::Pod, echo: &Echo) -> Result<(), Error> {
    let oref = controller_ref(echo)?;
    let orefs = pod.metadata.owner_references.get_or_insert_with(Vec::new);
    orefs.retain(|r| r.controller != Some(true));
    orefs.push(oref);
    Ok(())
}
