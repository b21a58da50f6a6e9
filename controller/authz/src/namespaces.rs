use cf_control_plane_core::{
    k8s::{labels, CFOrg, CFSpace, ResourceExt},
    ApiError, Labels, Object, Store,
};
use std::sync::Arc;

/// Where a custom resource lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub namespace: String,
    pub name: String,
}

/// Resolves CF GUIDs to cluster locations through the privileged store, so
/// that callers learn where to direct a user-scoped request without needing
/// cluster-wide read access themselves.
#[derive(Clone)]
pub struct NamespaceRetriever<S> {
    store: S,
    root_namespace: Arc<str>,
}

// === impl NamespaceRetriever ===

impl<S: Store> NamespaceRetriever<S> {
    pub fn new(store: S, root_namespace: impl Into<Arc<str>>) -> Self {
        Self {
            store,
            root_namespace: root_namespace.into(),
        }
    }

    /// Locates the `CFOrg` carrying the given org GUID label.
    pub async fn org(&self, guid: &str) -> Result<Location, ApiError> {
        let orgs = self
            .store
            .list::<CFOrg>(Some(&*self.root_namespace), &guid_selector(labels::ORG_GUID, guid))
            .await
            .map_err(|error| ApiError::from_store(error, "Org").wrap("failed to resolve org"))?;
        single(orgs, "Org", guid)
    }

    /// Locates the `CFSpace` carrying the given space GUID label. Its name is
    /// also the space's namespace.
    pub async fn space(&self, guid: &str) -> Result<Location, ApiError> {
        let spaces = self
            .store
            .list::<CFSpace>(None, &guid_selector(labels::SPACE_GUID, guid))
            .await
            .map_err(|error| {
                ApiError::from_store(error, "Space").wrap("failed to resolve space")
            })?;
        single(spaces, "Space", guid)
    }

    /// Finds the namespace of the object of kind `K` named `name`.
    pub async fn namespace_for<K: Object>(
        &self,
        name: &str,
        resource: &str,
    ) -> Result<String, ApiError> {
        let objects = self.store.list_named::<K>(name).await.map_err(|error| {
            ApiError::from_store(error, resource)
                .wrap(format!("failed to resolve namespace for {resource}"))
        })?;
        let location = single(objects, resource, name)?;
        Ok(location.namespace)
    }
}

fn guid_selector(key: &str, guid: &str) -> Labels {
    Labels::from([(key.to_string(), guid.to_string())])
}

fn single<K: Object>(objects: Vec<K>, resource: &str, key: &str) -> Result<Location, ApiError> {
    match objects.as_slice() {
        [] => Err(ApiError::not_found(resource)),
        [obj] => Ok(Location {
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
        }),
        many => Err(ApiError::unknown(
            format!("{resource} lookup failed"),
            anyhow::anyhow!("{} objects match {key:?}", many.len()),
        )),
    }
}
