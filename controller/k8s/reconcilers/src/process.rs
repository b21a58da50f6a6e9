use crate::{
    env::{self, Limits, VcapApplication},
    patch, Error,
};
use cf_control_plane_core::{
    k8s::{
        is_deleting, labels,
        workload::{self, HTTPGetAction, TCPSocketAction},
        AppWorkload, AppWorkloadSpec, CFApp, CFBuild, CFOrg, CFProcess, CFRoute, CFSpace,
        DesiredState, HealthCheckType, IntOrString, LifecycleType, Probe, Quantity, Resource,
        ResourceExt, ResourceRequirements,
    },
    store::create_or_patch,
    Labels, Object, Store,
};
use kube::runtime::controller::Action;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

const DEFAULT_PORT: i32 = 8080;

const CPU_REQUEST_RATIO: i64 = 1024;
const CPU_REQUEST_MIN_MILLICORES: i64 = 5;

const STARTUP_PERIOD_SECONDS: i32 = 2;
const LIVENESS_PERIOD_SECONDS: i32 = 30;

/// Startup window used when a process's health check sets no timeout.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT_SECONDS: i64 = 60;

/// Values applied to processes that leave them unset (zero).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProcessDefaults {
    pub memory_mb: i64,
    pub disk_quota_mb: i64,
    pub timeout_seconds: i64,
}

// === impl ProcessDefaults ===

impl Default for ProcessDefaults {
    fn default() -> Self {
        Self {
            memory_mb: 0,
            disk_quota_mb: 0,
            timeout_seconds: DEFAULT_HEALTH_CHECK_TIMEOUT_SECONDS,
        }
    }
}

/// Converges a process into at most one workload for its app's current
/// revision.
pub struct ProcessReconciler<S> {
    store: S,
    cf_api: String,
    runner_name: String,
    defaults: ProcessDefaults,
}

// === impl ProcessReconciler ===

impl<S: Store> ProcessReconciler<S> {
    /// `cf_api` is the external API URL advertised in `VCAP_APPLICATION`.
    pub fn new(store: S, cf_api: String, runner_name: String) -> Self {
        Self {
            store,
            cf_api,
            runner_name,
            defaults: ProcessDefaults::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: ProcessDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub async fn reconcile(&self, process: &CFProcess) -> Result<Action, Error> {
        // Processes own nothing outside the cluster; workloads go with them.
        if is_deleting(process) {
            return Ok(Action::await_change());
        }

        let namespace = process.namespace().unwrap_or_default();
        let app = self
            .store
            .get::<CFApp>(Some(&namespace), &process.spec.app_ref.name)
            .await?;

        let space_guid = labels::guid_from_name(&namespace);
        let owner = app.controller_owner_ref(&());
        let process = patch::update(&self.store, process.clone(), |process| {
            process
                .labels_mut()
                .insert(labels::SPACE_GUID.to_string(), space_guid);
            patch::set_controller(process, owner);
        })
        .await?;

        let revision = app_revision(&app);
        if needs_app_workload(&app, &process) {
            self.create_or_patch_workload(&app, &process, &revision)
                .await?;
        }
        self.clean_up_workloads(&app, &process, &revision).await?;
        Ok(Action::await_change())
    }

    async fn create_or_patch_workload(
        &self,
        app: &CFApp,
        process: &CFProcess,
        revision: &str,
    ) -> Result<(), Error> {
        let namespace = process.namespace().unwrap_or_default();
        let droplet_ref = app
            .spec
            .current_droplet_ref
            .as_ref()
            .ok_or_else(|| Error::NoCurrentDroplet {
                app: app.name_any(),
            })?;
        let build = self
            .store
            .get::<CFBuild>(Some(&namespace), &droplet_ref.name)
            .await?;
        let Some(droplet) = build.status.and_then(|s| s.droplet) else {
            tracing::error!(%namespace, build = %droplet_ref.name, "No build droplet status");
            return Err(Error::NoBuildDroplet);
        };

        let routes = self.routes_for(app).await?;
        let port = port_for(&routes, app, process);

        let mut env = env::app_env(&self.store, app).await?;
        env.extend(env::port_env(port));
        let vcap_application = self.vcap_application(app, &routes).await?;
        let vcap_application =
            serde_json::to_string(&vcap_application).map_err(|source| Error::Encode {
                what: "VCAP_APPLICATION",
                source,
            })?;
        env.push(workload::env_value("VCAP_APPLICATION", vcap_application));

        let spec = AppWorkloadSpec {
            guid: process.name_any(),
            version: revision.to_string(),
            app_guid: app.name_any(),
            process_type: process.spec.process_type.clone(),
            command: command_for(process, app),
            image: droplet.registry.image,
            image_pull_secrets: droplet.registry.image_pull_secrets,
            env,
            ports: process.spec.ports.clone(),
            instances: process.spec.desired_instances.unwrap_or_default(),
            resources: resources_for(process, &self.defaults),
            startup_probe: startup_probe(process, port, self.defaults.timeout_seconds),
            liveness_probe: liveness_probe(process, port),
            runner_name: self.runner_name.clone(),
        };
        let workload_labels = Labels::from([
            (labels::APP_GUID.to_string(), app.name_any()),
            (labels::APP_REVISION.to_string(), revision.to_string()),
            (labels::PROCESS_GUID.to_string(), process.name_any()),
            (
                labels::PROCESS_TYPE.to_string(),
                process.spec.process_type.clone(),
            ),
        ]);
        let owner = process.controller_owner_ref(&());

        let name = workload_name(revision, &process.name_any());
        let mut workload = AppWorkload::new(&name, spec.clone());
        workload.metadata.namespace = Some(namespace);
        let (workload, op) = create_or_patch(&self.store, workload, |workload| {
            workload.metadata.labels = Some(workload_labels.clone());
            workload.metadata.owner_references = owner.clone().map(|o| vec![o]);
            workload.spec = spec.clone();
        })
        .await?;
        tracing::info!(workload = %workload.name_any(), ?op, "Reconciled app workload");
        Ok(())
    }

    /// Deletes the process's workloads that should not run: all of them when
    /// the app is stopped or scaled to zero, otherwise those built for an
    /// older revision.
    async fn clean_up_workloads(
        &self,
        app: &CFApp,
        process: &CFProcess,
        revision: &str,
    ) -> Result<(), Error> {
        let namespace = process.namespace();
        let selector = Labels::from([(labels::PROCESS_GUID.to_string(), process.name_any())]);
        let workloads = self
            .store
            .list::<AppWorkload>(namespace.as_deref(), &selector)
            .await?;
        for workload in workloads {
            if !needs_to_delete(app, process, &workload, revision) {
                continue;
            }
            let name = workload.name_any();
            match self.store.delete::<AppWorkload>(namespace.as_deref(), &name).await {
                Ok(()) => tracing::info!(workload = %name, "Deleted app workload"),
                Err(error) if error.is_not_found() => {}
                Err(error) => return Err(error.into()),
            }
        }
        Ok(())
    }

    /// Routes with a destination on the app, oldest first.
    async fn routes_for(&self, app: &CFApp) -> Result<Vec<CFRoute>, Error> {
        let app_name = app.name_any();
        let mut routes = self
            .store
            .list::<CFRoute>(app.namespace().as_deref(), &Labels::new())
            .await?
            .into_iter()
            .filter(|route| {
                route
                    .spec
                    .destinations
                    .iter()
                    .any(|d| d.app_ref.name == app_name)
            })
            .collect::<Vec<_>>();
        routes.sort_by_cached_key(|route| {
            let created = route
                .meta()
                .creation_timestamp
                .as_ref()
                .and_then(|t| serde_json::to_value(t).ok())
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            (created, route.name_any())
        });
        Ok(routes)
    }

    async fn vcap_application(
        &self,
        app: &CFApp,
        routes: &[CFRoute],
    ) -> Result<VcapApplication, Error> {
        let space_guid = app
            .labels()
            .get(labels::SPACE_GUID)
            .cloned()
            .unwrap_or_default();
        let space = self
            .locate::<CFSpace>(labels::SPACE_GUID, &space_guid)
            .await?;
        let org_guid = space
            .labels()
            .get(labels::ORG_GUID)
            .cloned()
            .unwrap_or_default();
        let org = self.locate::<CFOrg>(labels::ORG_GUID, &org_guid).await?;

        let uris = routes
            .iter()
            .filter_map(|r| r.status.as_ref())
            .filter(|s| !s.uri.is_empty())
            .map(|s| format!("https://{}", s.uri))
            .collect::<Vec<_>>();
        Ok(VcapApplication {
            application_id: app.name_any(),
            application_name: app.spec.display_name.clone(),
            application_uris: uris.clone(),
            cf_api: self.cf_api.clone(),
            limits: Limits::default(),
            name: app.spec.display_name.clone(),
            organization_id: org_guid,
            organization_name: org.spec.display_name,
            space_id: space_guid,
            space_name: space.spec.display_name,
            uris,
            users: None,
        })
    }

    /// Finds the single object of a kind carrying `key=guid`.
    async fn locate<K: Object>(&self, key: &str, guid: &str) -> Result<K, Error> {
        let selector = Labels::from([(key.to_string(), guid.to_string())]);
        let mut found = self.store.list::<K>(None, &selector).await?;
        if found.len() != 1 {
            return Err(Error::Unlocatable {
                kind: K::kind(&()).into_owned(),
                guid: guid.to_string(),
            });
        }
        Ok(found.remove(0))
    }
}

fn app_revision(app: &CFApp) -> String {
    app.annotations()
        .get(labels::APP_REVISION)
        .cloned()
        .unwrap_or_else(|| labels::APP_REVISION_DEFAULT.to_string())
}

/// A workload runs only for started apps with at least one instance.
pub fn needs_app_workload(app: &CFApp, process: &CFProcess) -> bool {
    app.spec.desired_state == DesiredState::Started
        && process.spec.desired_instances.is_some_and(|n| n > 0)
}

fn needs_to_delete(
    app: &CFApp,
    process: &CFProcess,
    workload: &AppWorkload,
    revision: &str,
) -> bool {
    app.spec.desired_state == DesiredState::Stopped
        || process.spec.desired_instances == Some(0)
        || workload.labels().get(labels::APP_REVISION).map(String::as_str) != Some(revision)
}

/// Names the workload for a process at a revision. A new revision always
/// yields a new name.
pub fn workload_name(revision: &str, process: &str) -> String {
    let digest = hex::encode(Sha1::digest(revision.as_bytes()));
    format!("{process}-{}", &digest[..4])
}

/// The port of the first matching destination on the oldest route, or 8080.
fn port_for(routes: &[CFRoute], app: &CFApp, process: &CFProcess) -> i32 {
    let app_name = app.name_any();
    routes
        .iter()
        .filter_map(|route| route.status.as_ref())
        .flat_map(|status| status.destinations.iter())
        .find(|d| {
            d.app_ref.name == app_name
                && d.process_type == process.spec.process_type
                && d.port != 0
        })
        .map(|d| d.port)
        .unwrap_or(DEFAULT_PORT)
}

fn command_for(process: &CFProcess, app: &CFApp) -> Vec<String> {
    let command = if process.spec.command.is_empty() {
        &process.spec.detected_command
    } else {
        &process.spec.command
    };
    if command.is_empty() {
        return vec![];
    }
    match app.spec.lifecycle.type_ {
        LifecycleType::Buildpack => vec!["/cnb/lifecycle/launcher".to_string(), command.clone()],
        LifecycleType::Docker => vec!["/bin/sh".to_string(), "-c".to_string(), command.clone()],
    }
}

fn resources_for(process: &CFProcess, defaults: &ProcessDefaults) -> ResourceRequirements {
    let or_default = |value: i64, default: i64| if value == 0 { default } else { value };
    let memory_mb = or_default(process.spec.memory_mb, defaults.memory_mb);
    let disk_mb = or_default(process.spec.disk_quota_mb, defaults.disk_quota_mb);

    let cpu = (100 * memory_mb / CPU_REQUEST_RATIO).max(CPU_REQUEST_MIN_MILLICORES);
    let memory = Quantity(format!("{memory_mb}Mi"));
    let disk = Quantity(format!("{disk_mb}Mi"));
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(format!("{cpu}m"))),
            ("ephemeral-storage".to_string(), disk.clone()),
            ("memory".to_string(), memory.clone()),
        ])),
        limits: Some(BTreeMap::from([
            ("ephemeral-storage".to_string(), disk),
            ("memory".to_string(), memory),
        ])),
        ..Default::default()
    }
}

fn probe(
    process: &CFProcess,
    port: i32,
    period_seconds: i32,
    failure_threshold: i32,
) -> Option<Probe> {
    let check = &process.spec.health_check;
    let port = IntOrString::Int(port);
    let (http_get, tcp_socket) = match check.type_ {
        HealthCheckType::Process => return None,
        HealthCheckType::Http => (
            Some(HTTPGetAction {
                path: Some(check.data.http_endpoint.clone()),
                port,
                ..Default::default()
            }),
            None,
        ),
        HealthCheckType::Port => (
            None,
            Some(TCPSocketAction {
                port,
                ..Default::default()
            }),
        ),
    };
    Some(Probe {
        http_get,
        tcp_socket,
        timeout_seconds: Some(check.data.invocation_timeout_seconds as i32),
        period_seconds: Some(period_seconds),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    })
}

/// Probes every 2s for up to the health check timeout.
fn startup_probe(process: &CFProcess, port: i32, default_timeout: i64) -> Option<Probe> {
    let timeout = match process.spec.health_check.data.timeout_seconds {
        0 => default_timeout,
        timeout => timeout,
    };
    let failure_threshold = (timeout / 2 + timeout % 2) as i32;
    probe(process, port, STARTUP_PERIOD_SECONDS, failure_threshold)
}

fn liveness_probe(process: &CFProcess, port: i32) -> Option<Probe> {
    probe(process, port, LIVENESS_PERIOD_SECONDS, 1)
}
