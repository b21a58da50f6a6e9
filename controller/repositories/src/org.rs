use crate::{matches_filter, sort_by_creation, timestamps, Context};
use cf_control_plane_core::{
    k8s::{conditions::READY, labels, CFOrg, CFOrgSpec, HasConditions, ObjectMeta, ResourceExt},
    wait, ApiError, AuthInfo, ClientFactory, Labels, MetadataPatch, Store,
};

pub const ORG_PREFIX: &str = "cf-org-";
const RESOURCE: &str = "Org";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateOrgMessage {
    pub name: String,
    pub labels: Labels,
    pub annotations: Labels,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListOrgsMessage {
    pub guids: Vec<String>,
    pub names: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrgRecord {
    pub guid: String,
    pub name: String,
    /// The org's backing namespace.
    pub namespace: String,
    pub labels: Labels,
    pub annotations: Labels,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct OrgRepository<F, S> {
    ctx: Context<F, S>,
}

// === impl OrgRepository ===

impl<F: ClientFactory, S: Store> OrgRepository<F, S> {
    pub fn new(ctx: Context<F, S>) -> Self {
        Self { ctx }
    }

    /// Creates an org and waits for it to become ready.
    pub async fn create_org(
        &self,
        auth: &AuthInfo,
        message: CreateOrgMessage,
    ) -> Result<OrgRecord, ApiError> {
        let store = self.ctx.user_store(auth)?;

        let name = format!("{ORG_PREFIX}{}", uuid::Uuid::new_v4());
        let mut labels = message.labels;
        labels.insert(labels::ORG_GUID.to_string(), labels::guid_from_name(&name));
        let org = CFOrg {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(self.ctx.root_namespace().to_string()),
                labels: Some(labels),
                annotations: Some(message.annotations),
                ..Default::default()
            },
            spec: CFOrgSpec {
                display_name: message.name,
            },
            status: None,
        };

        let created = store.create(&org).await.map_err(|error| {
            ApiError::from_store(error, RESOURCE).wrap("failed to create cf org")
        })?;
        tracing::debug!(org = %created.name_any(), "Created org; awaiting readiness");

        let ready = wait::await_condition(&store, created, READY, self.ctx.timeout()).await?;
        Ok(org_record(ready))
    }

    pub async fn list_orgs(
        &self,
        auth: &AuthInfo,
        filter: ListOrgsMessage,
    ) -> Result<Vec<OrgRecord>, ApiError> {
        let authorized = self
            .ctx
            .permissions()
            .authorized_org_namespaces(&auth.identity)
            .await?;

        let store = self.ctx.user_store(auth)?;
        let mut orgs = store
            .list::<CFOrg>(Some(self.ctx.root_namespace()), &Labels::new())
            .await
            .map_err(|error| ApiError::from_store(error, RESOURCE).wrap("failed to list orgs"))?;
        orgs.retain(|org| {
            org.is_condition_true(READY)
                && matches_filter(&org_guid(org), &filter.guids)
                && matches_filter(&org.spec.display_name, &filter.names)
                && authorized.contains(&org.name_any())
        });
        sort_by_creation(&mut orgs);

        Ok(orgs.into_iter().map(org_record).collect())
    }

    pub async fn get_org(&self, auth: &AuthInfo, guid: &str) -> Result<OrgRecord, ApiError> {
        let filter = ListOrgsMessage {
            guids: vec![guid.to_string()],
            ..Default::default()
        };
        self.list_orgs(auth, filter)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::not_found(RESOURCE))
    }

    pub async fn patch_org_metadata(
        &self,
        auth: &AuthInfo,
        guid: &str,
        patch: &MetadataPatch,
    ) -> Result<OrgRecord, ApiError> {
        let store = self.ctx.user_store(auth)?;
        let location = self.ctx.namespaces().org(guid).await?;
        let org = crate::patch_metadata::<_, CFOrg>(
            &store,
            &location.namespace,
            &location.name,
            patch,
            RESOURCE,
        )
        .await?;
        Ok(org_record(org))
    }

    pub async fn delete_org(&self, auth: &AuthInfo, guid: &str) -> Result<(), ApiError> {
        let store = self.ctx.user_store(auth)?;
        let location = self.ctx.namespaces().org(guid).await?;
        store
            .delete::<CFOrg>(Some(&location.namespace), &location.name)
            .await
            .map_err(|error| ApiError::from_store(error, RESOURCE).wrap("failed to delete org"))?;
        tracing::info!(org = %location.name, "Deleted org");
        Ok(())
    }
}

/// The org's GUID: its GUID label, or the GUID embedded in its name.
pub(crate) fn org_guid(org: &CFOrg) -> String {
    org.labels()
        .get(labels::ORG_GUID)
        .cloned()
        .unwrap_or_else(|| labels::guid_from_name(&org.name_any()))
}

fn org_record(org: CFOrg) -> OrgRecord {
    let guid = org_guid(&org);
    let (created_at, updated_at) = timestamps(&org.metadata);
    let namespace = org.name_any();
    let mut labels = org.metadata.labels.unwrap_or_default();
    labels.remove(labels::ORG_GUID);
    OrgRecord {
        guid,
        name: org.spec.display_name,
        namespace,
        labels,
        annotations: org.metadata.annotations.unwrap_or_default(),
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

    const ORG_MANAGER: &str = "korifi-controllers-organization-manager";

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

    fn repo(store: &MemoryStore, timeout: Duration) -> OrgRepository<StaticClientFactory, MemoryStore> {
        OrgRepository::new(Context::new(
            StaticClientFactory(store.clone()),
            store.clone(),
            fixtures::ROOT_NAMESPACE,
            Arc::new(RoleMappings::default()),
            timeout,
        ))
    }

    async fn seed_org(store: &MemoryStore, name: &str, display: &str, ready: bool) {
        let org = fixtures::org(name, display);
        let org = if ready { fixtures::ready(org) } else { org };
        store.create(&org).await.unwrap();
    }

    #[tokio::test]
    async fn creates_and_awaits_readiness() {
        let store = MemoryStore::new();
        let _setter =
            cf_control_plane_test::spawn_condition_setter::<CFOrg>(store.clone(), READY);

        let message = CreateOrgMessage {
            name: "my-org".to_string(),
            labels: maplit::btreemap! { "env".to_string() => "prod".to_string() },
            ..Default::default()
        };
        let record = repo(&store, Duration::from_secs(5))
            .create_org(&alice(), message)
            .await
            .unwrap();

        assert_eq!(record.name, "my-org");
        assert!(record.namespace.starts_with(ORG_PREFIX));
        assert_eq!(record.guid, labels::guid_from_name(&record.namespace));
        assert_ne!(record.guid, record.namespace);
        assert_eq!(
            record.labels,
            maplit::btreemap! { "env".to_string() => "prod".to_string() }
        );
        assert!(!record.created_at.is_empty());
    }

    #[tokio::test]
    async fn create_times_out_when_never_ready() {
        let store = MemoryStore::new();
        let error = repo(&store, Duration::from_millis(20))
            .create_org(
                &alice(),
                CreateOrgMessage {
                    name: "stuck".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(error, ApiError::Timeout { .. }), "{error}");
        assert_eq!(
            error.to_string(),
            "CFOrg did not get Condition `Ready`: 'True' within timeout period 20 ms"
        );
    }

    #[tokio::test]
    async fn lists_only_ready_authorized_orgs() {
        let store = MemoryStore::new();
        seed_org(&store, "o1", "one", true).await;
        seed_org(&store, "o2", "two", true).await;
        seed_org(&store, "o3", "three", false).await;
        for ns in ["o1", "o3"] {
            store
                .create(&fixtures::role_binding(ns, "b", "alice", ORG_MANAGER))
                .await
                .unwrap();
        }

        let repo = repo(&store, Duration::from_secs(1));
        let orgs = repo.list_orgs(&alice(), ListOrgsMessage::default()).await.unwrap();
        assert_eq!(
            orgs.iter().map(|o| o.guid.as_str()).collect::<Vec<_>>(),
            ["o1"]
        );

        let by_name = repo
            .list_orgs(
                &alice(),
                ListOrgsMessage {
                    names: vec!["two".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(by_name.is_empty());

        assert_eq!(repo.get_org(&alice(), "o1").await.unwrap().name, "one");
        assert!(repo.get_org(&alice(), "o2").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn patches_metadata() {
        let store = MemoryStore::new();
        seed_org(&store, "o1", "one", true).await;

        let patch: MetadataPatch = serde_json::from_value(serde_json::json!({
            "labels": { "team": "a" },
            "annotations": { "note": "hi" },
        }))
        .unwrap();
        let record = repo(&store, Duration::from_secs(1))
            .patch_org_metadata(&alice(), "o1", &patch)
            .await
            .unwrap();
        assert_eq!(record.labels.get("team").map(String::as_str), Some("a"));
        assert_eq!(record.annotations.get("note").map(String::as_str), Some("hi"));

        let stored = store
            .get::<CFOrg>(Some(fixtures::ROOT_NAMESPACE), "o1")
            .await
            .unwrap();
        assert_eq!(stored.labels().get("team").map(String::as_str), Some("a"));
    }

    #[tokio::test]
    async fn deletes_by_guid() {
        let store = MemoryStore::new();
        seed_org(&store, "o1", "one", true).await;
        let repo = repo(&store, Duration::from_secs(1));

        repo.delete_org(&alice(), "o1").await.unwrap();
        assert!(store.all::<CFOrg>().is_empty());
        assert!(repo.delete_org(&alice(), "o1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn forbidden_delete_stays_forbidden() {
        let store = MemoryStore::new();
        seed_org(&store, "o1", "one", true).await;
        store.forbid_namespace(fixtures::ROOT_NAMESPACE);

        let error = repo(&store, Duration::from_secs(1))
            .delete_org(&alice(), "o1")
            .await
            .unwrap_err();
        assert!(error.is_forbidden(), "{error}");
    }
}
