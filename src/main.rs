// Nightly clippy (0.1.64) considers Drop a side effect, see https://github.com/rust-lang/rust-clippy/issues/9608
#![allow(clippy::unnecessary_lazy_evaluations)]

pub mod echo_types;
pub mod reconciler;
pub mod store;

use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::core::v1 as corev1;
use kube::{
    api::{Api, ListParams},
    runtime::controller::{Action, Controller},
    Client, CustomResourceExt,
};
use std::{env, sync::Arc};
use tokio::time::Duration;
use tracing::*;

use crate::echo_types::Echo;
use crate::reconciler::{EchoReconciler, Error};
use crate::store::{KubeStore, ObjectKey};

/// Controller triggers this whenever our main object or our owned pod changed
async fn reconcile(echo: Arc<Echo>, ctx: Arc<EchoReconciler<KubeStore>>) -> Result<Action, Error> {
    let echo_name = echo
        .metadata
        .name
        .as_ref()
        .ok_or_else(|| Error::MissingObjectKey(".metadata.name"))?;
    let echo_ns = echo
        .metadata
        .namespace
        .as_ref()
        .ok_or_else(|| Error::MissingObjectKey(".metadata.namespace"))?;

    ctx.reconcile(&ObjectKey::new(echo_ns, echo_name)).await
}

/// The controller triggers this on reconcile errors
fn error_policy(_object: Arc<Echo>, _error: &Error, _ctx: Arc<EchoReconciler<KubeStore>>) -> Action {
    Action::requeue(Duration::from_secs(10))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let cmd = args.get(1).cloned().unwrap_or_default();
    if cmd == String::from("export") {
        info!("exporting custom resource definition");
        println!("{}", serde_yaml::to_string(&Echo::crd())?);
        Ok(())
    } else if cmd == String::from("run") {
        info!("running echo-controller");
        let client = Client::try_default().await?;
        let echoes = Api::<Echo>::all(client.clone());
        let pods = Api::<corev1::Pod>::all(client.clone());
        let reconciler = EchoReconciler::new(KubeStore::new(client));

        Controller::new(echoes, ListParams::default())
            .owns(pods, ListParams::default()) // feed the owned pod changes back to the controller
            .shutdown_on_signal()
            .run(reconcile, error_policy, Arc::new(reconciler))
            .for_each(|res| async move {
                match res {
                    Ok(o) => info!("reconciled {:?}", o),
                    Err(e) => warn!("reconcile failed: {}", e),
                }
            })
            .await;
        info!("controller terminated");
        Ok(())
    } else {
        warn!("wrong command; please use \"export\" or \"run\"");
        Ok(())
    }
}
