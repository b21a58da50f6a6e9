//! Drives the reconcilers from cluster watches.

use crate::{
    namespace::{NamespaceOwner, NamespaceReconciler},
    Error, ProcessReconciler, ServiceBindingReconciler,
};
use cf_control_plane_core::{
    k8s::{
        AppWorkload, CFApp, CFOrg, CFProcess, CFRoute, CFServiceBinding, CFServiceInstance,
        CFSpace, ResourceExt, RoleBinding, Secret,
    },
    Object, Store,
};
use futures::prelude::*;
use kube::{
    runtime::{
        controller::Action,
        reflector::{self, ObjectRef},
        watcher, Controller,
    },
    Api, Client,
};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::{sync::Arc, time::Duration};
use tracing::Instrument;

/// How long a failed reconciliation waits before it is retried.
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Converges a single object of kind `K`.
#[async_trait::async_trait]
pub trait Reconcile<K>: Send + Sync + 'static {
    async fn reconcile(&self, obj: &K) -> Result<Action, Error>;
}

#[derive(Clone, Debug)]
pub struct Metrics {
    reconciles: Family<Labels, Counter>,
    failures: Family<Labels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct Labels {
    controller: &'static str,
}

struct Context<R> {
    name: &'static str,
    reconciler: R,
    metrics: Metrics,
}

// === impl Metrics ===

impl Metrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reconciles = Family::<Labels, Counter>::default();
        reg.register(
            "reconciles",
            "Total number of reconciliations started",
            reconciles.clone(),
        );

        let failures = Family::<Labels, Counter>::default();
        reg.register(
            "failures",
            "Total number of reconciliations that failed and were requeued",
            failures.clone(),
        );

        Self {
            reconciles,
            failures,
        }
    }
}

// === impl Reconcile ===

#[async_trait::async_trait]
impl<K, S> Reconcile<K> for NamespaceReconciler<K, S>
where
    K: NamespaceOwner,
    S: Store,
{
    async fn reconcile(&self, obj: &K) -> Result<Action, Error> {
        NamespaceReconciler::reconcile(self, obj).await
    }
}

#[async_trait::async_trait]
impl<S: Store> Reconcile<CFProcess> for ProcessReconciler<S> {
    async fn reconcile(&self, obj: &CFProcess) -> Result<Action, Error> {
        ProcessReconciler::reconcile(self, obj).await
    }
}

#[async_trait::async_trait]
impl<S: Store> Reconcile<CFServiceBinding> for ServiceBindingReconciler<S> {
    async fn reconcile(&self, obj: &CFServiceBinding) -> Result<Action, Error> {
        ServiceBindingReconciler::reconcile(self, obj).await
    }
}

async fn reconcile<K, R>(obj: Arc<K>, ctx: Arc<Context<R>>) -> Result<Action, Error>
where
    K: Object,
    R: Reconcile<K>,
{
    ctx.metrics
        .reconciles
        .get_or_create(&Labels {
            controller: ctx.name,
        })
        .inc();
    let span = tracing::info_span!(
        "reconcile",
        controller = ctx.name,
        ns = %obj.namespace().unwrap_or_default(),
        name = %obj.name_any(),
    );
    ctx.reconciler.reconcile(&obj).instrument(span).await
}

fn error_policy<K, R>(obj: Arc<K>, error: &Error, ctx: Arc<Context<R>>) -> Action
where
    K: Object,
{
    ctx.metrics
        .failures
        .get_or_create(&Labels {
            controller: ctx.name,
        })
        .inc();
    tracing::warn!(
        controller = ctx.name,
        ns = %obj.namespace().unwrap_or_default(),
        name = %obj.name_any(),
        %error,
        "Reconcile failed",
    );
    Action::requeue(RETRY_INTERVAL)
}

fn log_result<K, E>(
    name: &'static str,
) -> impl Fn(Result<(ObjectRef<K>, Action), E>) -> future::Ready<()>
where
    K: Object,
    E: std::fmt::Display,
{
    move |result| {
        match result {
            Ok((obj, action)) => tracing::trace!(controller = name, %obj, ?action, "Reconciled"),
            Err(error) => tracing::debug!(controller = name, %error, "Controller error"),
        }
        future::ready(())
    }
}

fn context<R>(name: &'static str, reconciler: R, metrics: Metrics) -> Arc<Context<R>> {
    Arc::new(Context {
        name,
        reconciler,
        metrics,
    })
}

fn refs<K: Object>(objs: impl IntoIterator<Item = Arc<K>>) -> Vec<ObjectRef<K>> {
    objs.into_iter().map(|o| ObjectRef::from_obj(&*o)).collect()
}

/// Reconciles the orgs in the root namespace, revisiting all of them when the
/// root namespace's role bindings or secrets change.
pub fn orgs<S: Store>(
    client: Client,
    root_namespace: &str,
    reconciler: NamespaceReconciler<CFOrg, S>,
    metrics: Metrics,
) -> impl Future<Output = ()> + Send {
    let controller = Controller::new(
        Api::<CFOrg>::namespaced(client.clone(), root_namespace),
        watcher::Config::default(),
    );
    let by_binding = controller.store();
    let by_secret = by_binding.clone();
    controller
        .watches(
            Api::<RoleBinding>::namespaced(client.clone(), root_namespace),
            watcher::Config::default(),
            move |_| refs(by_binding.state()),
        )
        .watches(
            Api::<Secret>::namespaced(client, root_namespace),
            watcher::Config::default(),
            move |_| refs(by_secret.state()),
        )
        .shutdown_on_signal()
        .run(
            reconcile,
            error_policy,
            context("CFOrg", reconciler, metrics),
        )
        .for_each(log_result("CFOrg"))
}

/// Reconciles spaces, revisiting a namespace's spaces when its role bindings
/// change.
pub fn spaces<S: Store>(
    client: Client,
    reconciler: NamespaceReconciler<CFSpace, S>,
    metrics: Metrics,
) -> impl Future<Output = ()> + Send {
    let controller = Controller::new(Api::<CFSpace>::all(client.clone()), watcher::Config::default());
    let spaces = controller.store();
    controller
        .watches(
            Api::<RoleBinding>::all(client),
            watcher::Config::default(),
            move |binding| in_namespace(&spaces, binding.namespace(), |_| true),
        )
        .shutdown_on_signal()
        .run(
            reconcile,
            error_policy,
            context("CFSpace", reconciler, metrics),
        )
        .for_each(log_result("CFSpace"))
}

/// Reconciles processes, revisiting an app's processes when the app or a
/// route to it changes.
pub fn processes<S: Store>(
    client: Client,
    reconciler: ProcessReconciler<S>,
    metrics: Metrics,
) -> impl Future<Output = ()> + Send {
    let controller = Controller::new(
        Api::<CFProcess>::all(client.clone()),
        watcher::Config::default(),
    );
    let by_app = controller.store();
    let by_route = by_app.clone();
    controller
        .owns(
            Api::<AppWorkload>::all(client.clone()),
            watcher::Config::default(),
        )
        .watches(
            Api::<CFApp>::all(client.clone()),
            watcher::Config::default(),
            move |app| {
                let name = app.name_any();
                in_namespace(&by_app, app.namespace(), |p: &CFProcess| {
                    p.spec.app_ref.name == name
                })
            },
        )
        .watches(
            Api::<CFRoute>::all(client),
            watcher::Config::default(),
            move |route| {
                let apps = route
                    .spec
                    .destinations
                    .iter()
                    .map(|d| d.app_ref.name.clone())
                    .collect::<Vec<_>>();
                in_namespace(&by_route, route.namespace(), |p: &CFProcess| {
                    apps.contains(&p.spec.app_ref.name)
                })
            },
        )
        .shutdown_on_signal()
        .run(
            reconcile,
            error_policy,
            context("CFProcess", reconciler, metrics),
        )
        .for_each(log_result("CFProcess"))
}

/// Reconciles service bindings, revisiting an instance's bindings when the
/// instance changes.
pub fn service_bindings<S: Store>(
    client: Client,
    reconciler: ServiceBindingReconciler<S>,
    metrics: Metrics,
) -> impl Future<Output = ()> + Send {
    let controller = Controller::new(
        Api::<CFServiceBinding>::all(client.clone()),
        watcher::Config::default(),
    );
    let bindings = controller.store();
    controller
        .owns(Api::<Secret>::all(client.clone()), watcher::Config::default())
        .watches(
            Api::<CFServiceInstance>::all(client),
            watcher::Config::default(),
            move |instance| {
                let name = instance.name_any();
                in_namespace(&bindings, instance.namespace(), |b: &CFServiceBinding| {
                    b.spec.service.name == name
                })
            },
        )
        .shutdown_on_signal()
        .run(
            reconcile,
            error_policy,
            context("CFServiceBinding", reconciler, metrics),
        )
        .for_each(log_result("CFServiceBinding"))
}

/// References the cached objects in `namespace` that match `filter`.
fn in_namespace<K: Object>(
    cache: &reflector::Store<K>,
    namespace: Option<String>,
    filter: impl Fn(&K) -> bool,
) -> Vec<ObjectRef<K>> {
    let Some(namespace) = namespace else {
        return vec![];
    };
    refs(
        cache
            .state()
            .into_iter()
            .filter(|o| o.namespace().as_deref() == Some(namespace.as_str()) && filter(o)),
    )
}
