#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Repositories translating CF resource operations into cluster objects.
//!
//! Every operation acts with the caller's own credentials. The privileged
//! store is only consulted to resolve GUIDs to namespaces and to compute the
//! namespaces a caller is authorized in.

pub mod domain;
pub mod org;
pub mod package;
pub mod role;
pub mod service_binding;
pub mod service_instance;
pub mod space;

pub use self::{
    domain::{DomainRecord, DomainRepository},
    org::{OrgRecord, OrgRepository},
    package::{PackageOrder, PackageRecord, PackageRepository},
    role::{RoleRecord, RoleRepository},
    service_binding::{ServiceBindingRecord, ServiceBindingRepository},
    service_instance::{ServiceInstanceRecord, ServiceInstanceRepository},
    space::{SpaceRecord, SpaceRepository},
};
use cf_control_plane_authz::{NamespacePermissions, NamespaceRetriever};
use cf_control_plane_core::{
    k8s::{ObjectMeta, Resource, ResourceExt, Time},
    ApiError, AuthInfo, ClientFactory, Labels, MetadataPatch, Object, RoleMappings, Store,
};
use std::{sync::Arc, time::Duration};

/// State shared by all repositories.
#[derive(Clone)]
pub struct Context<F, S> {
    clients: F,
    permissions: NamespacePermissions<S>,
    namespaces: NamespaceRetriever<S>,
    root_namespace: Arc<str>,
    timeout: Duration,
}

// === impl Context ===

impl<F, S> Context<F, S>
where
    F: ClientFactory,
    S: Store,
{
    /// `privileged` is the controller's own store. `timeout` bounds every
    /// wait for a created resource to become ready.
    pub fn new(
        clients: F,
        privileged: S,
        root_namespace: impl Into<Arc<str>>,
        roles: Arc<RoleMappings>,
        timeout: Duration,
    ) -> Self {
        let root_namespace = root_namespace.into();
        Self {
            clients,
            permissions: NamespacePermissions::new(
                privileged.clone(),
                root_namespace.clone(),
                roles,
            ),
            namespaces: NamespaceRetriever::new(privileged, root_namespace.clone()),
            root_namespace,
            timeout,
        }
    }

    pub fn root_namespace(&self) -> &str {
        &self.root_namespace
    }

    pub fn permissions(&self) -> &NamespacePermissions<S> {
        &self.permissions
    }

    pub fn namespaces(&self) -> &NamespaceRetriever<S> {
        &self.namespaces
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Builds a store acting with the caller's credentials.
    pub fn user_store(&self, auth: &AuthInfo) -> Result<F::Store, ApiError> {
        self.clients
            .for_token(&auth.token)
            .map_err(|error| ApiError::unknown("failed to build user client", error))
    }
}

/// An exact-match filter; an empty filter matches everything.
pub(crate) fn matches_filter(value: &str, filter: &[String]) -> bool {
    filter.is_empty() || filter.iter().any(|f| f == value)
}

/// Whether `labels` contains every entry of `selector`.
pub(crate) fn matches_labels(labels: &Labels, selector: &Labels) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// Formats a timestamp as it appears on the wire (RFC 3339).
pub(crate) fn format_time(time: &Time) -> String {
    match serde_json::to_value(time) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

/// Returns the `(created_at, updated_at)` timestamps of an object. The
/// update time is the latest managed-fields entry, falling back to the
/// creation time.
pub(crate) fn timestamps(meta: &ObjectMeta) -> (String, String) {
    let created = meta
        .creation_timestamp
        .as_ref()
        .map(format_time)
        .unwrap_or_default();
    let updated = meta
        .managed_fields
        .iter()
        .flatten()
        .filter_map(|entry| entry.time.as_ref().map(format_time))
        .max()
        .unwrap_or_else(|| created.clone());
    (created, updated)
}

/// Orders objects by creation time, then name.
pub(crate) fn sort_by_creation<K: Object>(objects: &mut [K]) {
    objects.sort_by_cached_key(|obj| (timestamps(obj.meta()).0, obj.name_any()));
}

/// Reads an object, applies a metadata patch, and writes it back pinned to the
/// version that was read.
pub(crate) async fn patch_metadata<S, K>(
    store: &S,
    namespace: &str,
    name: &str,
    patch: &MetadataPatch,
    resource: &str,
) -> Result<K, ApiError>
where
    S: Store,
    K: Object,
{
    let current = store
        .get::<K>(Some(namespace), name)
        .await
        .map_err(|error| {
            ApiError::from_store(error, resource)
                .wrap(format!("failed to get {}", resource.to_lowercase()))
        })?;
    let mut desired = current.clone();
    patch.apply(desired.meta_mut());
    store.patch(&current, &desired).await.map_err(|error| {
        ApiError::from_store(error, resource)
            .wrap(format!("failed to patch {} metadata", resource.to_lowercase()))
    })
}
