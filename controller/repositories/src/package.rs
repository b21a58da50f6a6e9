use crate::{matches_filter, timestamps, Context};
use cf_control_plane_core::{
    k8s::{labels, CFPackage, CFPackageSpec, LocalObjectReference, ObjectMeta, PackageType},
    ApiError, AuthInfo, ClientFactory, Labels, MetadataPatch, Store,
};
use std::{cmp::Ordering, str::FromStr};

const RESOURCE: &str = "Package";

pub const STATE_AWAITING_UPLOAD: &str = "AWAITING_UPLOAD";
pub const STATE_READY: &str = "READY";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatePackageMessage {
    pub type_: PackageType,
    pub app_guid: String,
    pub space_guid: String,
    pub labels: Labels,
    pub annotations: Labels,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPackagesMessage {
    pub app_guids: Vec<String>,
    pub order_by: PackageOrder,
}

/// Sort order for package listings, parsed from `created_at`, `updated_at`,
/// or either prefixed with `-` for descending order.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PackageOrder {
    pub field: PackageSortField,
    pub descending: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PackageSortField {
    #[default]
    CreatedAt,
    UpdatedAt,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackageRecord {
    pub guid: String,
    pub type_: Option<PackageType>,
    pub app_guid: String,
    pub space_guid: String,
    pub state: &'static str,
    pub image_ref: String,
    pub labels: Labels,
    pub annotations: Labels,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct PackageRepository<F, S> {
    ctx: Context<F, S>,
}

// === impl PackageOrder ===

impl FromStr for PackageOrder {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (descending, field) = match s.strip_prefix('-') {
            Some(field) => (true, field),
            None => (false, s),
        };
        let field = match field {
            "" | "created_at" => PackageSortField::CreatedAt,
            "updated_at" => PackageSortField::UpdatedAt,
            other => {
                return Err(ApiError::InvalidRequest(format!(
                    "unsupported order_by value {other:?}"
                )))
            }
        };
        Ok(Self { field, descending })
    }
}

impl PackageOrder {
    fn compare(&self, a: &PackageRecord, b: &PackageRecord) -> Ordering {
        let ord = match self.field {
            PackageSortField::CreatedAt => a.created_at.cmp(&b.created_at),
            PackageSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        }
        .then_with(|| a.guid.cmp(&b.guid));
        if self.descending {
            ord.reverse()
        } else {
            ord
        }
    }
}

// === impl PackageRepository ===

impl<F: ClientFactory, S: Store> PackageRepository<F, S> {
    pub fn new(ctx: Context<F, S>) -> Self {
        Self { ctx }
    }

    pub async fn create_package(
        &self,
        auth: &AuthInfo,
        message: CreatePackageMessage,
    ) -> Result<PackageRecord, ApiError> {
        let store = self.ctx.user_store(auth)?;
        let location = self.ctx.namespaces().space(&message.space_guid).await?;

        let mut labels = message.labels;
        labels.insert(labels::APP_GUID.to_string(), message.app_guid.clone());
        labels.insert(labels::SPACE_GUID.to_string(), message.space_guid);
        let package = CFPackage {
            metadata: ObjectMeta {
                name: Some(uuid::Uuid::new_v4().to_string()),
                namespace: Some(location.name),
                labels: Some(labels),
                annotations: Some(message.annotations),
                ..Default::default()
            },
            spec: CFPackageSpec {
                type_: message.type_,
                app_ref: LocalObjectReference {
                    name: message.app_guid,
                },
                source: Default::default(),
            },
            status: None,
        };

        let created = store.create(&package).await.map_err(|error| {
            ApiError::from_store(error, RESOURCE).wrap("failed to create package")
        })?;
        Ok(package_record(created))
    }

    pub async fn get_package(&self, auth: &AuthInfo, guid: &str) -> Result<PackageRecord, ApiError> {
        let namespace = self
            .ctx
            .namespaces()
            .namespace_for::<CFPackage>(guid, RESOURCE)
            .await?;
        let store = self.ctx.user_store(auth)?;
        let package = store
            .get::<CFPackage>(Some(&namespace), guid)
            .await
            .map_err(|error| ApiError::from_store(error, RESOURCE).wrap("failed to get package"))?;
        Ok(package_record(package))
    }

    /// Lists packages in every space the caller holds a role in.
    pub async fn list_packages(
        &self,
        auth: &AuthInfo,
        filter: ListPackagesMessage,
    ) -> Result<Vec<PackageRecord>, ApiError> {
        let store = self.ctx.user_store(auth)?;
        let spaces = self
            .ctx
            .permissions()
            .authorized_space_namespaces(&auth.identity)
            .await?;

        let mut records = Vec::new();
        for space in &spaces {
            let packages = match store.list::<CFPackage>(Some(space), &Labels::new()).await {
                Ok(packages) => packages,
                Err(error) if error.is_forbidden() => continue,
                Err(error) => {
                    return Err(
                        ApiError::from_store(error, RESOURCE).wrap("failed to list packages")
                    )
                }
            };
            records.extend(
                packages
                    .into_iter()
                    .filter(|p| matches_filter(&p.spec.app_ref.name, &filter.app_guids))
                    .map(package_record),
            );
        }
        records.sort_by(|a, b| filter.order_by.compare(a, b));
        Ok(records)
    }

    pub async fn update_package_metadata(
        &self,
        auth: &AuthInfo,
        guid: &str,
        patch: &MetadataPatch,
    ) -> Result<PackageRecord, ApiError> {
        let namespace = self
            .ctx
            .namespaces()
            .namespace_for::<CFPackage>(guid, RESOURCE)
            .await?;
        let store = self.ctx.user_store(auth)?;
        let package =
            crate::patch_metadata::<_, CFPackage>(&store, &namespace, guid, patch, RESOURCE)
                .await?;
        Ok(package_record(package))
    }
}

fn package_record(package: CFPackage) -> PackageRecord {
    let (created_at, updated_at) = timestamps(&package.metadata);
    let image_ref = package.spec.source.registry.image;
    let state = if image_ref.is_empty() {
        STATE_AWAITING_UPLOAD
    } else {
        STATE_READY
    };
    PackageRecord {
        guid: package.metadata.name.unwrap_or_default(),
        type_: Some(package.spec.type_),
        app_guid: package.spec.app_ref.name,
        space_guid: package
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(labels::SPACE_GUID).cloned())
            .unwrap_or_else(|| {
                labels::guid_from_name(package.metadata.namespace.as_deref().unwrap_or_default())
            }),
        state,
        image_ref,
        labels: package.metadata.labels.unwrap_or_default(),
        annotations: package.metadata.annotations.unwrap_or_default(),
        created_at,
        updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_control_plane_core::{Identity, IdentityKind, RoleMappings, Token};
    use cf_control_plane_test::{fixtures, MemoryStore, StaticClientFactory};
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

    fn repo(store: &MemoryStore) -> PackageRepository<StaticClientFactory, MemoryStore> {
        PackageRepository::new(Context::new(
            StaticClientFactory(store.clone()),
            store.clone(),
            fixtures::ROOT_NAMESPACE,
            Arc::new(RoleMappings::default()),
            Duration::from_secs(1),
        ))
    }

    fn record(guid: &str, created_at: &str, updated_at: &str) -> PackageRecord {
        PackageRecord {
            guid: guid.to_string(),
            created_at: created_at.to_string(),
            updated_at: updated_at.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn parses_order_by() {
        assert_eq!("".parse::<PackageOrder>().unwrap(), PackageOrder::default());
        assert_eq!(
            "-updated_at".parse::<PackageOrder>().unwrap(),
            PackageOrder {
                field: PackageSortField::UpdatedAt,
                descending: true,
            }
        );
        assert_eq!(
            "created_at".parse::<PackageOrder>().unwrap(),
            PackageOrder::default()
        );
        assert!(matches!(
            "size".parse::<PackageOrder>(),
            Err(ApiError::InvalidRequest(_))
        ));
    }

    #[test]
    fn orders_records() {
        let mut records = vec![
            record("a", "2024-01-02T00:00:00Z", "2024-01-05T00:00:00Z"),
            record("b", "2024-01-01T00:00:00Z", "2024-01-03T00:00:00Z"),
            record("c", "2024-01-03T00:00:00Z", "2024-01-04T00:00:00Z"),
        ];
        let guids = |records: &[PackageRecord]| {
            records.iter().map(|r| r.guid.clone()).collect::<Vec<_>>()
        };

        let order = PackageOrder::default();
        records.sort_by(|a, b| order.compare(a, b));
        assert_eq!(guids(&records), ["b", "a", "c"]);

        let order: PackageOrder = "-updated_at".parse().unwrap();
        records.sort_by(|a, b| order.compare(a, b));
        assert_eq!(guids(&records), ["a", "c", "b"]);

        let order: PackageOrder = "updated_at".parse().unwrap();
        records.sort_by(|a, b| order.compare(a, b));
        assert_eq!(guids(&records), ["b", "c", "a"]);
    }

    #[tokio::test]
    async fn creates_gets_and_lists() {
        let store = MemoryStore::new();
        store.create(&fixtures::org("o1", "o1")).await.unwrap();
        for space in ["s1", "s2"] {
            store
                .create(&fixtures::ready(fixtures::space("o1", space, space)))
                .await
                .unwrap();
        }
        store
            .create(&fixtures::role_binding("s1", "dev", "alice", SPACE_DEVELOPER))
            .await
            .unwrap();
        let repo = repo(&store);

        let mut created = Vec::new();
        for (app, space) in [("app1", "s1"), ("app2", "s1"), ("app3", "s2")] {
            created.push(
                repo.create_package(
                    &alice(),
                    CreatePackageMessage {
                        type_: PackageType::Bits,
                        app_guid: app.to_string(),
                        space_guid: space.to_string(),
                        labels: Labels::new(),
                        annotations: Labels::new(),
                    },
                )
                .await
                .unwrap(),
            );
        }
        assert_eq!(created[0].state, STATE_AWAITING_UPLOAD);
        assert_eq!(created[0].space_guid, "s1");
        assert_eq!(created[0].type_, Some(PackageType::Bits));

        let fetched = repo.get_package(&alice(), &created[2].guid).await.unwrap();
        assert_eq!(fetched.app_guid, "app3");

        // Only s1 is authorized.
        let listed = repo
            .list_packages(&alice(), ListPackagesMessage::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);

        let filtered = repo
            .list_packages(
                &alice(),
                ListPackagesMessage {
                    app_guids: vec!["app2".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].guid, created[1].guid);
    }

    #[tokio::test]
    async fn updates_metadata() {
        let store = MemoryStore::new();
        store.create(&fixtures::org("o1", "o1")).await.unwrap();
        store
            .create(&fixtures::space("o1", "s1", "s1"))
            .await
            .unwrap();
        let repo = repo(&store);
        let package = repo
            .create_package(
                &alice(),
                CreatePackageMessage {
                    type_: PackageType::Bits,
                    app_guid: "app1".to_string(),
                    space_guid: "s1".to_string(),
                    labels: Labels::new(),
                    annotations: Labels::new(),
                },
            )
            .await
            .unwrap();

        let patch = MetadataPatch {
            labels: maplit::btreemap! { "release".to_string() => Some("1".to_string()) },
            ..Default::default()
        };
        let updated = repo
            .update_package_metadata(&alice(), &package.guid, &patch)
            .await
            .unwrap();
        assert_eq!(updated.labels.get("release").map(String::as_str), Some("1"));
        assert_eq!(updated.labels.get(labels::APP_GUID).map(String::as_str), Some("app1"));
    }
}
