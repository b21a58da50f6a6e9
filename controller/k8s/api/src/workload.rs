use crate::{conditions::Condition, LocalObjectReference};
pub use k8s_openapi::api::core::v1::{
    EnvVar, EnvVarSource, HTTPGetAction, Probe, ResourceRequirements, SecretKeySelector,
    TCPSocketAction,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The scheduled unit backing a process at one app revision.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "korifi.cloudfoundry.org",
    version = "v1alpha1",
    kind = "AppWorkload",
    status = "AppWorkloadStatus",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct AppWorkloadSpec {
    #[serde(rename = "GUID")]
    pub guid: String,
    pub version: String,
    #[serde(rename = "appGUID")]
    pub app_guid: String,
    pub process_type: String,
    #[serde(default)]
    pub command: Vec<String>,
    pub image: String,
    #[serde(default)]
    pub image_pull_secrets: Vec<LocalObjectReference>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub ports: Vec<i32>,
    pub instances: i32,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,
    pub runner_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppWorkloadStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A literal environment variable.
pub fn env_value(name: impl ToString, value: impl ToString) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

/// An environment variable read from the key of the same name in `secret`.
pub fn env_from_secret(name: impl ToString, secret: impl ToString) -> EnvVar {
    let name = name.to_string();
    EnvVar {
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        value: None,
        name,
    }
}

crate::impl_has_conditions!(AppWorkload);

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::{api::resource::Quantity, util::intstr::IntOrString};
    use maplit::btreemap;

    #[test]
    fn spec_uses_core_container_shapes() {
        let spec = AppWorkloadSpec {
            guid: "p1".to_string(),
            version: "r1".to_string(),
            app_guid: "a1".to_string(),
            process_type: "web".to_string(),
            command: vec![],
            image: "registry/a1".to_string(),
            image_pull_secrets: vec![],
            env: vec![
                env_value("PORT", 8080),
                env_from_secret("DATABASE_URL", "a1-env"),
            ],
            ports: vec![8080],
            instances: 1,
            resources: ResourceRequirements {
                limits: Some(btreemap! {
                    "memory".to_string() => Quantity("1024Mi".to_string()),
                }),
                ..Default::default()
            },
            startup_probe: Some(Probe {
                http_get: Some(HTTPGetAction {
                    path: Some("/".to_string()),
                    port: IntOrString::Int(8080),
                    ..Default::default()
                }),
                failure_threshold: Some(30),
                ..Default::default()
            }),
            liveness_probe: None,
            runner_name: "statefulset-runner".to_string(),
        };

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["env"][0], serde_json::json!({ "name": "PORT", "value": "8080" }));
        assert_eq!(
            json["env"][1],
            serde_json::json!({
                "name": "DATABASE_URL",
                "valueFrom": { "secretKeyRef": { "name": "a1-env", "key": "DATABASE_URL" } },
            })
        );
        assert_eq!(json["resources"]["limits"]["memory"], "1024Mi");
        assert_eq!(json["startupProbe"]["httpGet"]["port"], 8080);
        assert_eq!(json["startupProbe"]["failureThreshold"], 30);
        assert!(json.get("livenessProbe").is_none());

        let parsed: AppWorkloadSpec = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, spec);
    }
}
