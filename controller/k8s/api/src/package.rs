use crate::{build::Registry, conditions::Condition, LocalObjectReference};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "korifi.cloudfoundry.org",
    version = "v1alpha1",
    kind = "CFPackage",
    status = "CFPackageStatus",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct CFPackageSpec {
    #[serde(rename = "type")]
    pub type_: PackageType,
    pub app_ref: LocalObjectReference,
    #[serde(default)]
    pub source: PackageSource,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Bits,
    Docker,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PackageSource {
    #[serde(default)]
    pub registry: Registry,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CFPackageStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

crate::impl_has_conditions!(CFPackage);
