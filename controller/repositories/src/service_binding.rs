use crate::{matches_filter, sort_by_creation, timestamps, Context};
use cf_control_plane_core::{
    k8s::{
        conditions::VCAP_SERVICES_SECRET_AVAILABLE, labels, CFApp, CFServiceBinding,
        CFServiceBindingSpec, CFServiceInstance, LocalObjectReference, ObjectMeta, Resource,
        ResourceExt, ServiceReference,
    },
    wait, ApiError, AuthInfo, ClientFactory, Labels, Store,
};

const RESOURCE: &str = "Service Binding";

pub const BINDING_TYPE_APP: &str = "app";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateServiceBindingMessage {
    pub name: Option<String>,
    pub service_instance_guid: String,
    pub app_guid: String,
    pub space_guid: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListServiceBindingsMessage {
    pub app_guids: Vec<String>,
    pub service_instance_guids: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceBindingRecord {
    pub guid: String,
    pub type_: &'static str,
    pub name: Option<String>,
    pub app_guid: String,
    pub service_instance_guid: String,
    pub space_guid: String,
    pub created_at: String,
    pub updated_at: String,
    pub last_operation: LastOperation,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LastOperation {
    pub type_: &'static str,
    pub state: &'static str,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct ServiceBindingRepository<F, S> {
    ctx: Context<F, S>,
}

// === impl ServiceBindingRepository ===

impl<F: ClientFactory, S: Store> ServiceBindingRepository<F, S> {
    pub fn new(ctx: Context<F, S>) -> Self {
        Self { ctx }
    }

    /// Binds an app the caller can read to a service instance, then waits
    /// until the app's VCAP_SERVICES secret reflects the binding.
    pub async fn create_service_binding(
        &self,
        auth: &AuthInfo,
        message: CreateServiceBindingMessage,
    ) -> Result<ServiceBindingRecord, ApiError> {
        let store = self.ctx.user_store(auth)?;
        let namespace = self.ctx.namespaces().space(&message.space_guid).await?.name;

        if let Err(error) = store.get::<CFApp>(Some(&namespace), &message.app_guid).await {
            let error = ApiError::from_store(error, RESOURCE);
            if error.is_not_found() || error.is_forbidden() {
                return Err(ApiError::unprocessable(
                    "Unable to use app. Ensure that the app exists and you have access to it.",
                ));
            }
            return Err(error.wrap("failed to get app"));
        }

        let already_exists = || {
            ApiError::unprocessable(format!(
                "Service binding already exists: App: {} Service Instance: {}",
                message.app_guid, message.service_instance_guid
            ))
        };
        if self
            .binding_exists_in(&store, &namespace, &message.app_guid, &message.service_instance_guid)
            .await?
        {
            return Err(already_exists());
        }

        let binding = CFServiceBinding {
            metadata: ObjectMeta {
                name: Some(binding_guid(&message.app_guid, &message.service_instance_guid)),
                namespace: Some(namespace),
                labels: Some(Labels::from([(
                    labels::PROVISIONED_SERVICE.to_string(),
                    "true".to_string(),
                )])),
                ..Default::default()
            },
            spec: CFServiceBindingSpec {
                display_name: message.name,
                service: ServiceReference {
                    kind: CFServiceInstance::kind(&()).into_owned(),
                    api_version: CFServiceInstance::api_version(&()).into_owned(),
                        name: message.service_instance_guid.clone(),
                },
                app_ref: LocalObjectReference {
                    name: message.app_guid.clone(),
                },
            },
            status: None,
        };
        let created = store.create(&binding).await.map_err(|error| {
            if error.is_already_exists() {
                already_exists()
            } else {
                ApiError::from_store(error, RESOURCE).wrap("failed to create service binding")
            }
        })?;
        tracing::debug!(binding = %created.name_any(), "Created service binding; awaiting secret");

        let bound = wait::await_condition(
            &store,
            created,
            VCAP_SERVICES_SECRET_AVAILABLE,
            self.ctx.timeout(),
        )
        .await?;
        Ok(binding_record(bound))
    }

    pub async fn get_service_binding(
        &self,
        auth: &AuthInfo,
        guid: &str,
    ) -> Result<ServiceBindingRecord, ApiError> {
        let binding = self.fetch(auth, guid).await?;
        Ok(binding_record(binding))
    }

    /// Lists bindings in every space the caller holds a role in.
    pub async fn list_service_bindings(
        &self,
        auth: &AuthInfo,
        filter: ListServiceBindingsMessage,
    ) -> Result<Vec<ServiceBindingRecord>, ApiError> {
        let spaces = self
            .ctx
            .permissions()
            .authorized_space_namespaces(&auth.identity)
            .await?;
        let store = self.ctx.user_store(auth)?;

        let mut bindings = Vec::new();
        for space in &spaces {
            match store.list::<CFServiceBinding>(Some(space), &Labels::new()).await {
                Ok(found) => bindings.extend(found),
                Err(error) if error.is_forbidden() => continue,
                Err(error) => {
                    return Err(ApiError::from_store(error, RESOURCE).wrap(format!(
                        "failed to list service bindings in namespace {space}"
                    )))
                }
            }
        }
        bindings.retain(|binding| {
            matches_filter(&binding.spec.app_ref.name, &filter.app_guids)
                && matches_filter(&binding.spec.service.name, &filter.service_instance_guids)
        });
        sort_by_creation(&mut bindings);

        Ok(bindings.into_iter().map(binding_record).collect())
    }

    /// Deletes a binding. Bindings the caller may not see are reported as not
    /// found.
    pub async fn delete_service_binding(&self, auth: &AuthInfo, guid: &str) -> Result<(), ApiError> {
        let binding = self.fetch(auth, guid).await?;
        let store = self.ctx.user_store(auth)?;
        store
            .delete::<CFServiceBinding>(binding.namespace().as_deref(), guid)
            .await
            .map_err(|error| {
                ApiError::from_store(error, RESOURCE).wrap("failed to delete service binding")
            })?;
        tracing::info!(binding = %guid, "Deleted service binding");
        Ok(())
    }

    /// Whether the app is already bound to the instance in the given space.
    pub async fn service_binding_exists(
        &self,
        auth: &AuthInfo,
        space_guid: &str,
        app_guid: &str,
        service_instance_guid: &str,
    ) -> Result<bool, ApiError> {
        let store = self.ctx.user_store(auth)?;
        let namespace = self.ctx.namespaces().space(space_guid).await?.name;
        self.binding_exists_in(&store, &namespace, app_guid, service_instance_guid)
            .await
    }

    async fn binding_exists_in(
        &self,
        store: &F::Store,
        namespace: &str,
        app_guid: &str,
        service_instance_guid: &str,
    ) -> Result<bool, ApiError> {
        let bindings = store
            .list::<CFServiceBinding>(Some(namespace), &Labels::new())
            .await
            .map_err(|error| {
                ApiError::from_store(error, RESOURCE).wrap("failed to list service bindings")
            })?;
        Ok(bindings.iter().any(|binding| {
            binding.spec.app_ref.name == app_guid && binding.spec.service.name == service_instance_guid
        }))
    }

    async fn fetch(&self, auth: &AuthInfo, guid: &str) -> Result<CFServiceBinding, ApiError> {
        let namespace = self
            .ctx
            .namespaces()
            .namespace_for::<CFServiceBinding>(guid, RESOURCE)
            .await?;
        let store = self.ctx.user_store(auth)?;
        store
            .get::<CFServiceBinding>(Some(&namespace), guid)
            .await
            .map_err(|error| ApiError::from_store(error, RESOURCE).forbidden_as_not_found())
    }
}

/// The GUID of the binding between an app and a service instance. At most
/// one binding per pair can exist in a namespace.
pub fn binding_guid(app_guid: &str, service_instance_guid: &str) -> String {
    let key = format!("{app_guid}::{service_instance_guid}");
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

fn binding_record(binding: CFServiceBinding) -> ServiceBindingRecord {
    let (created_at, updated_at) = timestamps(&binding.metadata);
    ServiceBindingRecord {
        guid: binding.name_any(),
        type_: BINDING_TYPE_APP,
        space_guid: labels::guid_from_name(&binding.namespace().unwrap_or_default()),
        name: binding.spec.display_name,
        app_guid: binding.spec.app_ref.name,
        service_instance_guid: binding.spec.service.name,
        last_operation: LastOperation {
            type_: "create",
            state: "succeeded",
            description: None,
            created_at: created_at.clone(),
            updated_at: updated_at.clone(),
        },
        created_at,
        updated_at,
    }
}
