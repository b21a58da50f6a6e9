use crate::{
    config::ControllerConfig,
    k8s_store::KubeStore,
    reconcilers::{
        self, Metrics, OrgReconciler, ProcessReconciler, ServiceBindingReconciler,
        SpaceReconciler,
    },
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::path::PathBuf;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "cf-control-plane",
    about = "Reconciles CF resources into the cluster objects backing them"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "cf_control_plane=info,warn",
        env = "CF_CONTROL_PLANE_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Path to the controller configuration file.
    #[clap(
        long,
        default_value = "/etc/cf-control-plane/config.yaml",
        env = "CF_CONTROL_PLANE_CONFIG"
    )]
    config: PathBuf,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            config,
        } = self;

        let config = ControllerConfig::load(&config)?;

        let mut prom = <Registry>::default();
        let metrics = Metrics::register(prom.sub_registry_with_prefix("controller"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let client = runtime.client();
        let store = KubeStore::new(client.clone());
        let ControllerConfig {
            api_server_url,
            cf_root_namespace,
            container_registry_secret_name,
            runner_name,
            namespace_labels,
            ..
        } = config.clone();

        // Spawn one controller per kind.

        let orgs = OrgReconciler::new(
            store.clone(),
            container_registry_secret_name.clone(),
            namespace_labels.clone(),
        );
        tokio::spawn(
            reconcilers::controller::orgs(client.clone(), &cf_root_namespace, orgs, metrics.clone())
                .instrument(info_span!("cforgs")),
        );

        let spaces = SpaceReconciler::new(
            store.clone(),
            container_registry_secret_name,
            namespace_labels,
        );
        tokio::spawn(
            reconcilers::controller::spaces(client.clone(), spaces, metrics.clone())
                .instrument(info_span!("cfspaces")),
        );

        let processes = ProcessReconciler::new(store.clone(), api_server_url, runner_name)
            .with_defaults(config.process_defaults());
        tokio::spawn(
            reconcilers::controller::processes(client.clone(), processes, metrics.clone())
                .instrument(info_span!("cfprocesses")),
        );

        let bindings = ServiceBindingReconciler::new(store);
        tokio::spawn(
            reconcilers::controller::service_bindings(client, bindings, metrics)
                .instrument(info_span!("cfservicebindings")),
        );

        info!(root_namespace = %cf_root_namespace, "Controllers started");

        // Block the main thread on the shutdown signal. Once it fires, wait
        // for the background tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
