use crate::{matches_filter, sort_by_creation, timestamps, Context};
use cf_control_plane_core::{
    k8s::{labels, CFDomain, CFDomainSpec, ObjectMeta, ResourceExt},
    ApiError, AuthInfo, ClientFactory, Labels, MetadataPatch, Store,
};

const RESOURCE: &str = "Domain";

/// Labels containing this are internal and not reported.
const INTERNAL_LABEL: &str = "korifi.cloudfoundry.org";
/// Annotations containing this are internal and not reported.
const INTERNAL_ANNOTATION: &str = "kubernetes.io";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateDomainMessage {
    pub name: String,
    /// Scopes the domain to one org when set.
    pub org_guid: Option<String>,
    pub labels: Labels,
    pub annotations: Labels,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListDomainsMessage {
    pub names: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainRecord {
    pub guid: String,
    pub name: String,
    pub is_default: bool,
    pub org_guid: Option<String>,
    pub namespace: String,
    pub labels: Labels,
    pub annotations: Labels,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct DomainRepository<F, S> {
    ctx: Context<F, S>,
}

// === impl DomainRepository ===

impl<F: ClientFactory, S: Store> DomainRepository<F, S> {
    pub fn new(ctx: Context<F, S>) -> Self {
        Self { ctx }
    }

    pub async fn create_domain(
        &self,
        auth: &AuthInfo,
        message: CreateDomainMessage,
    ) -> Result<DomainRecord, ApiError> {
        let store = self.ctx.user_store(auth)?;
        let mut labels = message.labels;
        if let Some(org_guid) = message.org_guid {
            labels.insert(labels::ORG_GUID.to_string(), org_guid);
        }
        let domain = CFDomain {
            metadata: ObjectMeta {
                name: Some(uuid::Uuid::new_v4().to_string()),
                namespace: Some(self.ctx.root_namespace().to_string()),
                labels: Some(labels),
                annotations: Some(message.annotations),
                ..Default::default()
            },
            spec: CFDomainSpec { name: message.name },
        };

        let created = store.create(&domain).await.map_err(|error| {
            ApiError::from_store(error, RESOURCE).wrap("failed to create domain")
        })?;
        tracing::info!(domain = %created.spec.name, guid = %created.name_any(), "Created domain");
        Ok(domain_record(created))
    }

    /// Lists domains in the root namespace. A caller that may not list them
    /// sees none.
    pub async fn list_domains(
        &self,
        auth: &AuthInfo,
        filter: ListDomainsMessage,
    ) -> Result<Vec<DomainRecord>, ApiError> {
        let store = self.ctx.user_store(auth)?;
        let mut domains = match store
            .list::<CFDomain>(Some(self.ctx.root_namespace()), &Labels::new())
            .await
        {
            Ok(domains) => domains,
            Err(error) if error.is_forbidden() => return Ok(vec![]),
            Err(error) => {
                return Err(ApiError::from_store(error, RESOURCE).wrap(format!(
                    "failed to list domains in namespace {}",
                    self.ctx.root_namespace()
                )))
            }
        };
        domains.retain(|domain| matches_filter(&domain.spec.name, &filter.names));
        sort_by_creation(&mut domains);
        Ok(domains.into_iter().map(domain_record).collect())
    }

    pub async fn get_domain(&self, auth: &AuthInfo, guid: &str) -> Result<DomainRecord, ApiError> {
        self.list_domains(auth, ListDomainsMessage::default())
            .await?
            .into_iter()
            .find(|domain| domain.guid == guid)
            .ok_or_else(|| ApiError::not_found(RESOURCE))
    }

    pub async fn get_domain_by_name(
        &self,
        auth: &AuthInfo,
        name: &str,
    ) -> Result<DomainRecord, ApiError> {
        let filter = ListDomainsMessage {
            names: vec![name.to_string()],
        };
        self.list_domains(auth, filter)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::not_found(RESOURCE))
    }

    pub async fn update_domain(
        &self,
        auth: &AuthInfo,
        guid: &str,
        patch: &MetadataPatch,
    ) -> Result<DomainRecord, ApiError> {
        let store = self.ctx.user_store(auth)?;
        let domain = crate::patch_metadata::<_, CFDomain>(
            &store,
            self.ctx.root_namespace(),
            guid,
            patch,
            RESOURCE,
        )
        .await?;
        Ok(domain_record(domain))
    }

    pub async fn delete_domain(&self, auth: &AuthInfo, guid: &str) -> Result<(), ApiError> {
        let store = self.ctx.user_store(auth)?;
        store
            .delete::<CFDomain>(Some(self.ctx.root_namespace()), guid)
            .await
            .map_err(|error| {
                ApiError::from_store(error, RESOURCE).wrap("failed to delete domain")
            })?;
        tracing::info!(%guid, "Deleted domain");
        Ok(())
    }
}

fn domain_record(domain: CFDomain) -> DomainRecord {
    let (created_at, updated_at) = timestamps(&domain.metadata);
    let labels = domain.metadata.labels.unwrap_or_default();
    let is_default = labels.get(labels::DEFAULT_DOMAIN).map(String::as_str) == Some("true");
    let org_guid = labels.get(labels::ORG_GUID).cloned();
    DomainRecord {
        guid: domain.metadata.name.unwrap_or_default(),
        name: domain.spec.name,
        is_default,
        org_guid,
        namespace: domain.metadata.namespace.unwrap_or_default(),
        labels: labels
            .into_iter()
            .filter(|(k, _)| !k.contains(INTERNAL_LABEL))
            .collect(),
        annotations: domain
            .metadata
            .annotations
            .unwrap_or_default()
            .into_iter()
            .filter(|(k, _)| !k.contains(INTERNAL_ANNOTATION))
            .collect(),
        created_at,
        updated_at,
    }
}
