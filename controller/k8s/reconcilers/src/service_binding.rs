use crate::{env, patch, Error};
use cf_control_plane_core::{
    k8s::{
        conditions::{self, Condition, BINDING_SECRET_AVAILABLE, READY, VCAP_SERVICES_SECRET_AVAILABLE},
        is_deleting, labels, ByteString, CFApp, CFServiceBinding, CFServiceInstance,
        HasConditions, LocalObjectReference, ObjectMeta, Resource, ResourceExt, Secret,
    },
    store::create_or_patch,
    Store, StoreError,
};
use kube::runtime::controller::Action;
use std::{collections::BTreeMap, time::Duration};

pub const FINALIZER: &str = "cfServiceBinding.korifi.cloudfoundry.org";

/// How soon to look again for a service instance that does not exist yet.
const INSTANCE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Provisions a binding's credentials secret and keeps its app's
/// `VCAP_SERVICES` secret in step with the app's bindings.
pub struct ServiceBindingReconciler<S> {
    store: S,
}

// === impl ServiceBindingReconciler ===

impl<S: Store> ServiceBindingReconciler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn reconcile(&self, binding: &CFServiceBinding) -> Result<Action, Error> {
        if is_deleting(binding) {
            return self.finalize(binding.clone()).await;
        }

        let namespace = binding.namespace().unwrap_or_default();
        let guid = binding.name_any();
        let instance_guid = binding.spec.service.name.clone();
        let binding = patch::update(&self.store, binding.clone(), |binding| {
            patch::add_finalizer(binding, FINALIZER);
            let labels = binding.labels_mut();
            labels.insert(labels::SERVICE_BINDING_GUID.to_string(), guid.clone());
            labels.insert(labels::SERVICE_INSTANCE_GUID.to_string(), instance_guid);
        })
        .await?;
        let binding = patch::update_status(&self.store, binding, |binding| {
            let conditions = binding.conditions_mut();
            conditions::set_unknown_if_absent(conditions, BINDING_SECRET_AVAILABLE);
            conditions::set_unknown_if_absent(conditions, VCAP_SERVICES_SECRET_AVAILABLE);
            conditions::set_unknown_if_absent(conditions, READY);
        })
        .await?;

        let instance = match self
            .store
            .get::<CFServiceInstance>(Some(&namespace), &binding.spec.service.name)
            .await
        {
            Ok(instance) => instance,
            Err(error) if error.is_not_found() => {
                tracing::info!(instance = %binding.spec.service.name, "Service instance not found");
                self.set_condition(
                    binding,
                    Condition {
                        message: "Service instance does not exist".to_string(),
                        ..conditions::new(BINDING_SECRET_AVAILABLE, false, "ServiceInstanceNotFound")
                    },
                )
                .await?;
                return Ok(Action::requeue(INSTANCE_POLL_INTERVAL));
            }
            Err(error) => return Err(error.into()),
        };
        let credentials = self
            .store
            .get::<Secret>(Some(&namespace), &instance.spec.secret_name)
            .await?;

        let secret = self.binding_secret(&binding, &credentials).await?;
        let binding = patch::update_status(&self.store, binding, |binding| {
            binding.status.get_or_insert_with(Default::default).binding =
                Some(LocalObjectReference {
                    name: secret.name_any(),
                });
            conditions::set(
                binding.conditions_mut(),
                conditions::new(BINDING_SECRET_AVAILABLE, true, "SecretFound"),
            );
        })
        .await?;

        self.reconcile_vcap_services(&namespace, &binding.spec.app_ref.name)
            .await?;

        let generation = binding.meta().generation;
        patch::update_status(&self.store, binding, |binding| {
            let conditions = binding.conditions_mut();
            conditions::set(
                conditions,
                Condition {
                    observed_generation: generation,
                    ..conditions::new(VCAP_SERVICES_SECRET_AVAILABLE, true, "SecretFound")
                },
            );
            conditions::set(
                conditions,
                Condition {
                    observed_generation: generation,
                    ..conditions::new(READY, true, "Ready")
                },
            );
        })
        .await?;
        tracing::info!(binding = %guid, "Ready");
        Ok(Action::await_change())
    }

    /// Drops the binding from its app's `VCAP_SERVICES` before letting it go.
    async fn finalize(&self, binding: CFServiceBinding) -> Result<Action, Error> {
        if !patch::has_finalizer(&binding, FINALIZER) {
            return Ok(Action::await_change());
        }

        let namespace = binding.namespace().unwrap_or_default();
        match self
            .reconcile_vcap_services(&namespace, &binding.spec.app_ref.name)
            .await
        {
            Ok(()) => {}
            // The app went first; there is nothing left to update.
            Err(Error::Store(error)) if error.is_not_found() => {}
            Err(error) => return Err(error),
        }

        let guid = binding.name_any();
        patch::update(&self.store, binding, |binding| {
            patch::remove_finalizer(binding, FINALIZER)
        })
        .await?;
        tracing::info!(binding = %guid, "Finalizer removed");
        Ok(Action::await_change())
    }

    /// Copies the instance credentials into a secret owned by the binding.
    async fn binding_secret(
        &self,
        binding: &CFServiceBinding,
        credentials: &Secret,
    ) -> Result<Secret, StoreError> {
        let secret = Secret {
            metadata: ObjectMeta {
                namespace: binding.namespace(),
                name: Some(binding.name_any()),
                ..Default::default()
            },
            ..Default::default()
        };
        let owner = binding.controller_owner_ref(&());
        let guid = binding.name_any();
        let (secret, op) = create_or_patch(&self.store, secret, |secret| {
            secret.labels_mut().insert(
                labels::SERVICE_BINDING_GUID.to_string(),
                guid.clone(),
            );
            patch::set_controller(secret, owner.clone());
            secret.data = credentials.data.clone();
            secret.type_ = credentials.type_.clone();
        })
        .await?;
        tracing::debug!(secret = %secret.name_any(), ?op, "Reconciled binding secret");
        Ok(secret)
    }

    /// Rewrites `<app>-vcap-services` from the app's current bindings and
    /// points the app at it.
    async fn reconcile_vcap_services(&self, namespace: &str, app: &str) -> Result<(), Error> {
        let app = self.store.get::<CFApp>(Some(namespace), app).await?;
        let services = env::vcap_services(&self.store, namespace, &app.name_any()).await?;
        let document = serde_json::to_vec(&services).map_err(|source| Error::Encode {
            what: env::VCAP_SERVICES,
            source,
        })?;

        let name = format!("{}-vcap-services", app.name_any());
        let secret = Secret {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        let owner = app.controller_owner_ref(&());
        create_or_patch(&self.store, secret, |secret| {
            patch::set_controller(secret, owner.clone());
            secret.data = Some(BTreeMap::from([(
                env::VCAP_SERVICES.to_string(),
                ByteString(document.clone()),
            )]));
        })
        .await?;

        patch::update_status(&self.store, app, |app| {
            app.status.get_or_insert_with(Default::default).vcap_services_secret_name = name;
        })
        .await?;
        Ok(())
    }

    async fn set_condition(
        &self,
        binding: CFServiceBinding,
        condition: Condition,
    ) -> Result<CFServiceBinding, StoreError> {
        patch::update_status(&self.store, binding, |binding| {
            conditions::set(binding.conditions_mut(), condition)
        })
        .await
    }
}
