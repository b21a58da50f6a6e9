use crate::{matches_filter, org::OrgRepository, sort_by_creation, timestamps, Context};
use cf_control_plane_core::{
    k8s::{
        conditions::READY, labels, CFSpace, CFSpaceSpec, HasConditions, ObjectMeta, ResourceExt,
    },
    wait, ApiError, AuthInfo, ClientFactory, Labels, MetadataPatch, Store,
};

pub const SPACE_PREFIX: &str = "cf-space-";
const RESOURCE: &str = "Space";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateSpaceMessage {
    pub name: String,
    pub organization_guid: String,
    pub labels: Labels,
    pub annotations: Labels,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListSpacesMessage {
    pub organization_guids: Vec<String>,
    pub guids: Vec<String>,
    pub names: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpaceRecord {
    pub guid: String,
    pub name: String,
    /// The space's backing namespace.
    pub namespace: String,
    pub organization_guid: String,
    /// The namespace of the parent org, where the `CFSpace` lives.
    pub org_namespace: String,
    pub labels: Labels,
    pub annotations: Labels,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct SpaceRepository<F, S> {
    ctx: Context<F, S>,
    orgs: OrgRepository<F, S>,
}

// === impl SpaceRepository ===

impl<F: ClientFactory, S: Store> SpaceRepository<F, S> {
    pub fn new(ctx: Context<F, S>) -> Self {
        Self {
            orgs: OrgRepository::new(ctx.clone()),
            ctx,
        }
    }

    /// Creates a space in an org the caller can see and waits for it to
    /// become ready.
    pub async fn create_space(
        &self,
        auth: &AuthInfo,
        message: CreateSpaceMessage,
    ) -> Result<SpaceRecord, ApiError> {
        let org = match self.orgs.get_org(auth, &message.organization_guid).await {
            Ok(org) => org,
            Err(error) if error.is_not_found() || error.is_forbidden() => {
                return Err(ApiError::unprocessable("failed to get parent organization"))
            }
            Err(error) => return Err(error.wrap("failed to get parent organization")),
        };

        let store = self.ctx.user_store(auth)?;
        let name = format!("{SPACE_PREFIX}{}", uuid::Uuid::new_v4());
        let mut labels = message.labels;
        labels.insert(labels::SPACE_GUID.to_string(), labels::guid_from_name(&name));
        labels.insert(labels::ORG_GUID.to_string(), org.guid);
        let space = CFSpace {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(org.namespace),
                labels: Some(labels),
                annotations: Some(message.annotations),
                ..Default::default()
            },
            spec: CFSpaceSpec {
                display_name: message.name,
            },
            status: None,
        };

        let created = store.create(&space).await.map_err(|error| {
            ApiError::from_store(error, RESOURCE).wrap("failed to create cf space")
        })?;
        tracing::debug!(space = %created.name_any(), "Created space; awaiting readiness");

        let ready = wait::await_condition(&store, created, READY, self.ctx.timeout()).await?;
        Ok(space_record(ready))
    }

    /// Lists ready spaces in the caller's orgs that the caller holds a role
    /// in. Orgs the caller cannot list spaces in are skipped.
    pub async fn list_spaces(
        &self,
        auth: &AuthInfo,
        filter: ListSpacesMessage,
    ) -> Result<Vec<SpaceRecord>, ApiError> {
        let store = self.ctx.user_store(auth)?;
        let permissions = self.ctx.permissions();
        let orgs = permissions.authorized_org_namespaces(&auth.identity).await?;

        let mut spaces = Vec::new();
        for org in &orgs {
            match store.list::<CFSpace>(Some(org), &Labels::new()).await {
                Ok(found) => spaces.extend(found),
                Err(error) if error.is_forbidden() => {
                    tracing::debug!(%org, "Skipping org namespace");
                }
                Err(error) => {
                    return Err(ApiError::from_store(error, RESOURCE).wrap("failed to list spaces"))
                }
            }
        }

        let authorized = permissions.authorized_space_namespaces(&auth.identity).await?;
        spaces.retain(|space| {
            space.is_condition_true(READY)
                && matches_filter(&organization_guid(space), &filter.organization_guids)
                && matches_filter(&space_guid(space), &filter.guids)
                && matches_filter(&space.spec.display_name, &filter.names)
                && authorized.contains(&space.name_any())
        });
        sort_by_creation(&mut spaces);

        Ok(spaces.into_iter().map(space_record).collect())
    }

    pub async fn get_space(&self, auth: &AuthInfo, guid: &str) -> Result<SpaceRecord, ApiError> {
        let filter = ListSpacesMessage {
            guids: vec![guid.to_string()],
            ..Default::default()
        };
        self.list_spaces(auth, filter)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::not_found(RESOURCE))
    }

    pub async fn patch_space_metadata(
        &self,
        auth: &AuthInfo,
        guid: &str,
        patch: &MetadataPatch,
    ) -> Result<SpaceRecord, ApiError> {
        let store = self.ctx.user_store(auth)?;
        let location = self.ctx.namespaces().space(guid).await?;
        let space = crate::patch_metadata::<_, CFSpace>(
            &store,
            &location.namespace,
            &location.name,
            patch,
            RESOURCE,
        )
        .await?;
        Ok(space_record(space))
    }

    pub async fn delete_space(&self, auth: &AuthInfo, guid: &str) -> Result<(), ApiError> {
        let store = self.ctx.user_store(auth)?;
        let location = self.ctx.namespaces().space(guid).await?;
        store
            .delete::<CFSpace>(Some(&location.namespace), &location.name)
            .await
            .map_err(|error| {
                ApiError::from_store(error, RESOURCE).wrap("failed to delete space")
            })?;
        tracing::info!(space = %location.name, org = %location.namespace, "Deleted space");
        Ok(())
    }
}

fn space_guid(space: &CFSpace) -> String {
    space
        .labels()
        .get(labels::SPACE_GUID)
        .cloned()
        .unwrap_or_else(|| labels::guid_from_name(&space.name_any()))
}

/// The parent org's GUID label, falling back to the GUID embedded in the
/// parent namespace's name.
fn organization_guid(space: &CFSpace) -> String {
    space
        .labels()
        .get(labels::ORG_GUID)
        .cloned()
        .unwrap_or_else(|| labels::guid_from_name(&space.namespace().unwrap_or_default()))
}

fn space_record(space: CFSpace) -> SpaceRecord {
    let guid = space_guid(&space);
    let organization_guid = organization_guid(&space);
    let (created_at, updated_at) = timestamps(&space.metadata);
    let namespace = space.name_any();
    let org_namespace = space.namespace().unwrap_or_default();
    let mut labels = space.metadata.labels.unwrap_or_default();
    labels.remove(labels::SPACE_GUID);
    labels.remove(labels::ORG_GUID);
    SpaceRecord {
        guid,
        name: space.spec.display_name,
        namespace,
        organization_guid,
        org_namespace,
        labels,
        annotations: space.metadata.annotations.unwrap_or_default(),
        created_at,
        updated_at,
    }
}
