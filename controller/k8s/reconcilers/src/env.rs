//! Assembly of the environment an app's workloads run with.

use crate::Error;
use cf_control_plane_core::{
    k8s::{
        is_deleting, workload, CFApp, CFServiceBinding, CFServiceInstance, EnvVar,
        InstanceType, ResourceExt, Secret,
    },
    Labels, Store,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// The key under which the VCAP services secret holds its document.
pub const VCAP_SERVICES: &str = "VCAP_SERVICES";

/// `VCAP_SERVICES`: bound service details grouped by service label.
pub type VcapServices = BTreeMap<String, Vec<ServiceDetails>>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceDetails {
    pub label: String,
    pub name: String,
    pub plan: String,
    pub tags: Vec<String>,
    pub instance_guid: String,
    pub instance_name: String,
    pub binding_guid: String,
    pub binding_name: Option<String>,
    pub credentials: BTreeMap<String, String>,
    pub syslog_drain_url: Option<String>,
    pub volume_mounts: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VcapApplication {
    pub application_id: String,
    pub application_name: String,
    pub application_uris: Vec<String>,
    pub cf_api: String,
    pub limits: Limits,
    pub name: String,
    pub organization_id: String,
    pub organization_name: String,
    pub space_id: String,
    pub space_name: String,
    pub uris: Vec<String>,
    pub users: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Limits {
    pub fds: u32,
}

/// References every key of the app's env secret, then every key of its VCAP
/// services secret. The latter is listed last so its `VCAP_SERVICES` wins.
pub async fn app_env<S: Store>(store: &S, app: &CFApp) -> Result<Vec<EnvVar>, Error> {
    let namespace = app.namespace();
    let vcap_services_secret = app
        .status
        .as_ref()
        .map(|s| s.vcap_services_secret_name.as_str())
        .unwrap_or_default();

    let mut env = Vec::new();
    for name in [app.spec.env_secret_name.as_str(), vcap_services_secret] {
        if name.is_empty() {
            continue;
        }
        let secret = store.get::<Secret>(namespace.as_deref(), name).await?;
        env.extend(
            secret
                .data
                .iter()
                .flatten()
                .map(|(key, _)| workload::env_from_secret(key, name)),
        );
    }
    Ok(env)
}

/// Builds the `VCAP_SERVICES` document for an app from its bindings.
///
/// Bindings being deleted, and bindings whose secret has not been provisioned
/// yet, are left out.
pub async fn vcap_services<S: Store>(
    store: &S,
    namespace: &str,
    app: &str,
) -> Result<VcapServices, Error> {
    let mut services = VcapServices::new();
    let bindings = store
        .list::<CFServiceBinding>(Some(namespace), &Labels::new())
        .await?
        .into_iter()
        .filter(|b| b.spec.app_ref.name == app && !is_deleting(b));
    for binding in bindings {
        let Some(secret) = binding
            .status
            .as_ref()
            .and_then(|s| s.binding.as_ref())
            .map(|b| b.name.clone())
            .filter(|name| !name.is_empty())
        else {
            tracing::debug!(binding = %binding.name_any(), "Binding secret not provisioned yet");
            continue;
        };
        let instance = store
            .get::<CFServiceInstance>(Some(namespace), &binding.spec.service.name)
            .await?;
        let secret = store.get::<Secret>(Some(namespace), &secret).await?;
        let details = service_details(&binding, &instance, &secret);
        services.entry(details.label.clone()).or_default().push(details);
    }
    Ok(services)
}

pub fn service_details(
    binding: &CFServiceBinding,
    instance: &CFServiceInstance,
    secret: &Secret,
) -> ServiceDetails {
    let binding_name = binding.spec.display_name.clone();
    let plan = match instance.spec.type_ {
        InstanceType::Managed => instance.spec.service_plan.clone().unwrap_or_default(),
        InstanceType::UserProvided => String::new(),
    };
    ServiceDetails {
        label: instance.spec.type_.to_string(),
        name: binding_name
            .clone()
            .unwrap_or_else(|| instance.spec.display_name.clone()),
        plan,
        tags: instance.spec.tags.clone(),
        instance_guid: instance.name_any(),
        instance_name: instance.spec.display_name.clone(),
        binding_guid: binding.name_any(),
        binding_name,
        credentials: secret
            .data
            .iter()
            .flatten()
            .map(|(k, v)| (k.clone(), String::from_utf8_lossy(&v.0).into_owned()))
            .collect(),
        syslog_drain_url: None,
        volume_mounts: vec![],
    }
}

/// The port variables a workload listens with.
pub fn port_env(port: i32) -> [EnvVar; 3] {
    [
        workload::env_value("VCAP_APP_HOST", "0.0.0.0"),
        workload::env_value("VCAP_APP_PORT", port),
        workload::env_value("PORT", port),
    ]
}
