use crate::{matches_filter, matches_labels, sort_by_creation, timestamps, Context};
use cf_control_plane_core::{
    k8s::{
        labels, ByteString, CFServiceInstance, CFServiceInstanceSpec, InstanceType, ObjectMeta,
        Resource, ResourceExt, Secret,
    },
    store::create_or_patch,
    ApiError, AuthInfo, ClientFactory, Labels, MetadataPatch, Store,
};
use std::collections::BTreeMap;

const RESOURCE: &str = "Service Instance";

pub const SECRET_TYPE_PREFIX: &str = "servicebinding.io/";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateServiceInstanceMessage {
    pub name: String,
    pub space_guid: String,
    pub service_plan_guid: Option<String>,
    pub credentials: BTreeMap<String, String>,
    pub type_: InstanceType,
    pub tags: Vec<String>,
    pub labels: Labels,
    pub annotations: Labels,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListServiceInstancesMessage {
    pub names: Vec<String>,
    pub space_guids: Vec<String>,
    /// Every entry must be present on a matching instance.
    pub labels: Labels,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInstanceRecord {
    pub guid: String,
    pub name: String,
    pub space_guid: String,
    pub secret_name: String,
    pub service_plan: Option<String>,
    pub tags: Vec<String>,
    pub type_: InstanceType,
    pub labels: Labels,
    pub annotations: Labels,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct ServiceInstanceRepository<F, S> {
    ctx: Context<F, S>,
}

// === impl ServiceInstanceRepository ===

impl<F: ClientFactory, S: Store> ServiceInstanceRepository<F, S> {
    pub fn new(ctx: Context<F, S>) -> Self {
        Self { ctx }
    }

    /// Creates the instance and its credentials secret. The secret shares
    /// the instance's name and is owned by it.
    pub async fn create_service_instance(
        &self,
        auth: &AuthInfo,
        message: CreateServiceInstanceMessage,
    ) -> Result<ServiceInstanceRecord, ApiError> {
        let store = self.ctx.user_store(auth)?;
        let location = self.ctx.namespaces().space(&message.space_guid).await?;

        let guid = uuid::Uuid::new_v4().to_string();
        let mut labels = message.labels;
        labels.insert(labels::SPACE_GUID.to_string(), message.space_guid);
        let instance = CFServiceInstance {
            metadata: ObjectMeta {
                name: Some(guid.clone()),
                namespace: Some(location.name),
                labels: Some(labels),
                annotations: Some(message.annotations),
                ..Default::default()
            },
            spec: CFServiceInstanceSpec {
                display_name: message.name,
                secret_name: guid,
                type_: message.type_,
                tags: message.tags,
                service_plan: match message.type_ {
                    InstanceType::Managed => message.service_plan_guid,
                    InstanceType::UserProvided => None,
                },
            },
            status: None,
        };
        let created = store.create(&instance).await.map_err(|error| {
            ApiError::from_store(error, RESOURCE).wrap("failed to create service instance")
        })?;

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(created.spec.secret_name.clone()),
                namespace: created.namespace(),
                labels: Some(Labels::from([(
                    labels::SERVICE_INSTANCE_GUID.to_string(),
                    created.name_any(),
                )])),
                owner_references: created.owner_ref(&()).map(|owner| vec![owner]),
                ..Default::default()
            },
            ..Default::default()
        };
        let data = message
            .credentials
            .into_iter()
            .map(|(k, v)| (k, ByteString(v.into_bytes())))
            .collect::<BTreeMap<_, _>>();
        let secret_type = format!("{SECRET_TYPE_PREFIX}{}", created.spec.type_);
        create_or_patch(&store, secret, |secret| {
            secret.data = Some(data.clone());
            secret.type_ = Some(secret_type.clone());
        })
        .await
        .map_err(|error| {
            ApiError::from_store(error, RESOURCE).wrap("failed to write credentials secret")
        })?;

        tracing::info!(instance = %created.name_any(), "Created service instance");
        Ok(instance_record(created))
    }

    /// Lists instances in every space the caller holds a role in.
    pub async fn list_service_instances(
        &self,
        auth: &AuthInfo,
        filter: ListServiceInstancesMessage,
    ) -> Result<Vec<ServiceInstanceRecord>, ApiError> {
        let spaces = self
            .ctx
            .permissions()
            .authorized_space_namespaces(&auth.identity)
            .await?;
        let store = self.ctx.user_store(auth)?;

        let mut instances = Vec::new();
        for space in &spaces {
            match store.list::<CFServiceInstance>(Some(space), &Labels::new()).await {
                Ok(found) => instances.extend(found),
                Err(error) if error.is_forbidden() => continue,
                Err(error) => {
                    return Err(ApiError::from_store(error, RESOURCE).wrap(format!(
                        "failed to list service instances in namespace {space}"
                    )))
                }
            }
        }
        instances.retain(|instance| {
            matches_filter(&instance.spec.display_name, &filter.names)
                && matches_filter(&space_guid(instance), &filter.space_guids)
                && matches_labels(instance.labels(), &filter.labels)
        });
        sort_by_creation(&mut instances);

        Ok(instances.into_iter().map(instance_record).collect())
    }

    pub async fn get_service_instance(
        &self,
        auth: &AuthInfo,
        guid: &str,
    ) -> Result<ServiceInstanceRecord, ApiError> {
        let store = self.ctx.user_store(auth)?;
        let namespace = self
            .ctx
            .namespaces()
            .namespace_for::<CFServiceInstance>(guid, RESOURCE)
            .await?;
        let instance = store
            .get::<CFServiceInstance>(Some(&namespace), guid)
            .await
            .map_err(|error| {
                ApiError::from_store(error, RESOURCE).wrap("failed to get service instance")
            })?;
        Ok(instance_record(instance))
    }

    pub async fn patch_service_instance_metadata(
        &self,
        auth: &AuthInfo,
        guid: &str,
        patch: &MetadataPatch,
    ) -> Result<ServiceInstanceRecord, ApiError> {
        let store = self.ctx.user_store(auth)?;
        let namespace = self
            .ctx
            .namespaces()
            .namespace_for::<CFServiceInstance>(guid, RESOURCE)
            .await?;
        let instance = crate::patch_metadata::<_, CFServiceInstance>(
            &store, &namespace, guid, patch, RESOURCE,
        )
        .await?;
        Ok(instance_record(instance))
    }

    /// Deletes an instance. Its credentials secret is garbage collected with
    /// it.
    pub async fn delete_service_instance(
        &self,
        auth: &AuthInfo,
        guid: &str,
    ) -> Result<(), ApiError> {
        let store = self.ctx.user_store(auth)?;
        let namespace = self
            .ctx
            .namespaces()
            .namespace_for::<CFServiceInstance>(guid, RESOURCE)
            .await?;
        store
            .delete::<CFServiceInstance>(Some(&namespace), guid)
            .await
            .map_err(|error| {
                ApiError::from_store(error, RESOURCE).wrap("failed to delete service instance")
            })?;
        tracing::info!(instance = %guid, %namespace, "Deleted service instance");
        Ok(())
    }
}

fn space_guid(instance: &CFServiceInstance) -> String {
    instance
        .labels()
        .get(labels::SPACE_GUID)
        .cloned()
        .unwrap_or_else(|| labels::guid_from_name(&instance.namespace().unwrap_or_default()))
}

fn instance_record(instance: CFServiceInstance) -> ServiceInstanceRecord {
    let space_guid = space_guid(&instance);
    let (created_at, updated_at) = timestamps(instance.meta());
    ServiceInstanceRecord {
        guid: instance.metadata.name.unwrap_or_default(),
        name: instance.spec.display_name,
        space_guid,
        secret_name: instance.spec.secret_name,
        service_plan: instance.spec.service_plan,
        tags: instance.spec.tags,
        type_: instance.spec.type_,
        labels: instance.metadata.labels.unwrap_or_default(),
        annotations: instance.metadata.annotations.unwrap_or_default(),
        created_at,
        updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_control_plane_core::{Identity, IdentityKind, RoleMappings, Token};
    use cf_control_plane_test::{fixtures, MemoryStore, StaticClientFactory};
    use maplit::btreemap;
    use std::{sync::Arc, time::Duration};

    const SPACE_DEVELOPER: &str = "korifi-controllers-space-developer";

    fn alice() -> AuthInfo {
        AuthInfo {
            identity: Identity {
                name: "alice".to_string(),
                guid: String::new(),
                kind: IdentityKind::User,
            },
            token: Token::parse("alice-token"),
        }
    }

    async fn setup() -> (MemoryStore, ServiceInstanceRepository<StaticClientFactory, MemoryStore>) {
        let store = MemoryStore::new();
        store.create(&fixtures::org("o1", "o1")).await.unwrap();
        for space in ["s1", "s2"] {
            store
                .create(&fixtures::space("o1", space, space))
                .await
                .unwrap();
        }
        store
            .create(&fixtures::role_binding("s1", "dev", "alice", SPACE_DEVELOPER))
            .await
            .unwrap();
        let repo = ServiceInstanceRepository::new(Context::new(
            StaticClientFactory(store.clone()),
            store.clone(),
            fixtures::ROOT_NAMESPACE,
            Arc::new(RoleMappings::default()),
            Duration::from_secs(1),
        ));
        (store, repo)
    }

    fn message(name: &str, space: &str, type_: InstanceType) -> CreateServiceInstanceMessage {
        CreateServiceInstanceMessage {
            name: name.to_string(),
            space_guid: space.to_string(),
            service_plan_guid: Some("plan-1".to_string()),
            credentials: btreemap! { "password".to_string() => "hunter2".to_string() },
            type_,
            tags: vec!["db".to_string()],
            labels: btreemap! { "tier".to_string() => "data".to_string() },
            annotations: Labels::new(),
        }
    }

    #[tokio::test]
    async fn creates_instance_with_credentials_secret() {
        let (store, repo) = setup().await;
        let record = repo
            .create_service_instance(&alice(), message("db", "s1", InstanceType::UserProvided))
            .await
            .unwrap();

        assert_eq!(record.name, "db");
        assert_eq!(record.space_guid, "s1");
        assert_eq!(record.secret_name, record.guid);
        assert_eq!(record.service_plan, None);
        assert_eq!(record.tags, ["db"]);

        let secret = store.get::<Secret>(Some("s1"), &record.guid).await.unwrap();
        assert_eq!(secret.type_.as_deref(), Some("servicebinding.io/user-provided"));
        assert_eq!(
            secret.data.unwrap()["password"],
            ByteString(b"hunter2".to_vec())
        );
        assert_eq!(
            secret.metadata.labels.unwrap()[labels::SERVICE_INSTANCE_GUID],
            record.guid
        );
        let owners = secret.metadata.owner_references.unwrap();
        assert_eq!(owners[0].kind, "CFServiceInstance");
        assert_eq!(owners[0].name, record.guid);

        repo.delete_service_instance(&alice(), &record.guid).await.unwrap();
        assert!(store.all::<Secret>().is_empty(), "secret is owned by the instance");
    }

    #[tokio::test]
    async fn managed_instances_keep_their_plan() {
        let (_store, repo) = setup().await;
        let record = repo
            .create_service_instance(&alice(), message("db", "s1", InstanceType::Managed))
            .await
            .unwrap();
        assert_eq!(record.service_plan.as_deref(), Some("plan-1"));
        assert_eq!(record.type_, InstanceType::Managed);
    }

    #[tokio::test]
    async fn lists_authorized_instances() {
        let (_store, repo) = setup().await;
        for (name, space) in [("a", "s1"), ("b", "s1"), ("c", "s2")] {
            repo.create_service_instance(&alice(), message(name, space, InstanceType::UserProvided))
                .await
                .unwrap();
        }

        let all = repo
            .list_service_instances(&alice(), ListServiceInstancesMessage::default())
            .await
            .unwrap();
        let mut names = all.iter().map(|i| i.name.as_str()).collect::<Vec<_>>();
        names.sort_unstable();
        assert_eq!(names, ["a", "b"]);

        let filtered = repo
            .list_service_instances(
                &alice(),
                ListServiceInstancesMessage {
                    names: vec!["b".to_string()],
                    space_guids: vec!["s1".to_string()],
                    labels: btreemap! { "tier".to_string() => "data".to_string() },
                },
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "b");

        let none = repo
            .list_service_instances(
                &alice(),
                ListServiceInstancesMessage {
                    labels: btreemap! { "tier".to_string() => "web".to_string() },
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn gets_and_patches() {
        let (_store, repo) = setup().await;
        let created = repo
            .create_service_instance(&alice(), message("db", "s1", InstanceType::UserProvided))
            .await
            .unwrap();

        let fetched = repo.get_service_instance(&alice(), &created.guid).await.unwrap();
        assert_eq!(fetched, created);

        let patch = MetadataPatch {
            labels: btreemap! { "tier".to_string() => None },
            ..Default::default()
        };
        let patched = repo
            .patch_service_instance_metadata(&alice(), &created.guid, &patch)
            .await
            .unwrap();
        assert!(!patched.labels.contains_key("tier"));
        assert!(repo
            .get_service_instance(&alice(), "missing")
            .await
            .unwrap_err()
            .is_not_found());
    }
}
