use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(group = "anvil.dev", version = "v1", kind = "Echo")]
#[kube(shortname = "echo", namespaced)]
#[kube(status = "EchoStatus")]
pub struct EchoSpec {
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EchoStatus {
    /// The spec message as last observed by the controller.
    pub spec_echo: String,
    /// Phase of the owned pod as last observed, "" before the pod is scheduled.
    pub pod_status: String,
}
