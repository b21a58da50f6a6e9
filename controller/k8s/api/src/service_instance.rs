use crate::conditions::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "korifi.cloudfoundry.org",
    version = "v1alpha1",
    kind = "CFServiceInstance",
    status = "CFServiceInstanceStatus",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct CFServiceInstanceSpec {
    pub display_name: String,
    pub secret_name: String,
    #[serde(rename = "type")]
    pub type_: InstanceType,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_plan: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceType {
    UserProvided,
    Managed,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CFServiceInstanceStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// === impl InstanceType ===

impl InstanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserProvided => "user-provided",
            Self::Managed => "managed",
        }
    }
}

impl std::fmt::Display for InstanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

crate::impl_has_conditions!(CFServiceInstance);
