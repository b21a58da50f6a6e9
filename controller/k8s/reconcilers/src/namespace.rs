use crate::{patch, propagate, Error};
use cf_control_plane_core::{
    k8s::{
        conditions::{self, Condition, READY},
        is_deleting, labels, HasConditions, Namespace, ObjectMeta, ResourceExt,
    },
    store::create_or_patch,
    Labels, Object, Store,
};
use kube::runtime::controller::Action;
use std::{marker::PhantomData, time::Duration};

/// How soon to look again for a namespace that was created but is not yet
/// visible.
const NAMESPACE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A resource that owns the namespace named after it.
pub trait NamespaceOwner: Object + HasConditions {
    const FINALIZER: &'static str;

    /// The namespace label and annotation key for the display name.
    const NAME_KEY: &'static str;

    /// The namespace label key for the resource name.
    const GUID_KEY: &'static str;

    fn display_name(&self) -> &str;

    /// The GUID labels the resource carries.
    fn guid_labels(&self) -> Labels;

    fn set_status_guid(&mut self, guid: String);
}

/// Converges a [`NamespaceOwner`] into its namespace, with the registry secret
/// and propagated role bindings of the parent namespace copied in.
pub struct NamespaceReconciler<K, S> {
    store: S,
    registry_secret: String,
    namespace_labels: Labels,
    _kind: PhantomData<fn(K)>,
}

// === impl NamespaceReconciler ===

impl<K: NamespaceOwner, S: Store> NamespaceReconciler<K, S> {
    /// An empty `registry_secret` disables secret propagation.
    pub fn new(store: S, registry_secret: String, namespace_labels: Labels) -> Self {
        Self {
            store,
            registry_secret,
            namespace_labels,
            _kind: PhantomData,
        }
    }

    pub async fn reconcile(&self, obj: &K) -> Result<Action, Error> {
        if is_deleting(obj) {
            return self.finalize(obj.clone()).await;
        }

        let name = obj.name_any();
        let parent = obj.namespace().unwrap_or_default();
        let guid_labels = obj.guid_labels();
        let obj = patch::update(&self.store, obj.clone(), |obj| {
            patch::add_finalizer(obj, K::FINALIZER);
            obj.labels_mut().extend(guid_labels);
        })
        .await?;

        let obj = patch::update_status(&self.store, obj, |obj| {
            let guid = obj.name_any();
            obj.set_status_guid(guid);
            conditions::set_unknown_if_absent(obj.conditions_mut(), READY);
        })
        .await?;

        let namespace_labels = labels::compile(
            &self.namespace_labels,
            [
                (
                    K::NAME_KEY.to_string(),
                    labels::ORG_SPACE_DEPRECATED_NAME.to_string(),
                ),
                (K::GUID_KEY.to_string(), name.clone()),
            ],
        );
        let display_name = obj.display_name().to_string();
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        let (_, op) = create_or_patch(&self.store, namespace, |ns| {
            ns.labels_mut().extend(namespace_labels.clone());
            ns.annotations_mut()
                .insert(K::NAME_KEY.to_string(), display_name.clone());
        })
        .await?;
        tracing::debug!(namespace = %name, ?op, "Reconciled namespace");

        if let Err(error) = self.store.get::<Namespace>(None, &name).await {
            if error.is_not_found() {
                tracing::debug!(namespace = %name, "Namespace not visible yet");
                return Ok(Action::requeue(NAMESPACE_POLL_INTERVAL));
            }
            return Err(error.into());
        }

        if !self.registry_secret.is_empty() {
            propagate::secret(&self.store, &parent, &name, &self.registry_secret).await?;
        }
        propagate::role_bindings(&self.store, &parent, &name).await?;

        let generation = obj.meta().generation;
        patch::update_status(&self.store, obj, |obj| {
            conditions::set(
                obj.conditions_mut(),
                Condition {
                    observed_generation: generation,
                    ..conditions::new(READY, true, READY)
                },
            );
        })
        .await?;
        tracing::info!(kind = %K::kind(&()), %name, "Ready");
        Ok(Action::await_change())
    }

    async fn finalize(&self, obj: K) -> Result<Action, Error> {
        if !patch::has_finalizer(&obj, K::FINALIZER) {
            return Ok(Action::await_change());
        }

        let name = obj.name_any();
        match self.store.delete::<Namespace>(None, &name).await {
            Ok(()) => tracing::info!(namespace = %name, "Deleted namespace"),
            Err(error) if error.is_not_found() => {}
            Err(error) => return Err(error.into()),
        }

        patch::update(&self.store, obj, |obj| {
            patch::remove_finalizer(obj, K::FINALIZER)
        })
        .await?;
        tracing::info!(kind = %K::kind(&()), %name, "Finalizer removed");
        Ok(Action::await_change())
    }
}
