use crate::{conditions::Condition, LocalObjectReference};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A runnable component of an app, e.g. `web` or `worker`.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "korifi.cloudfoundry.org",
    version = "v1alpha1",
    kind = "CFProcess",
    status = "CFProcessStatus",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct CFProcessSpec {
    pub app_ref: LocalObjectReference,
    pub process_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detected_command: String,
    pub health_check: HealthCheck,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_instances: Option<i32>,
    #[serde(rename = "memoryMB")]
    pub memory_mb: i64,
    #[serde(rename = "diskQuotaMB")]
    pub disk_quota_mb: i64,
    #[serde(default)]
    pub ports: Vec<i32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct HealthCheck {
    #[serde(rename = "type")]
    pub type_: HealthCheckType,
    #[serde(default)]
    pub data: HealthCheckData,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckType {
    Http,
    #[default]
    Port,
    Process,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckData {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub http_endpoint: String,
    #[serde(default)]
    pub invocation_timeout_seconds: i64,
    #[serde(default)]
    pub timeout_seconds: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CFProcessStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

crate::impl_has_conditions!(CFProcess);
