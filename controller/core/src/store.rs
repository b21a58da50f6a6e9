//! The cluster object store, as seen by repositories and reconcilers.

use cf_control_plane_k8s_api::{Resource, ResourceExt};
use futures::stream::BoxStream;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, fmt};

pub type Labels = BTreeMap<String, String>;

pub type WatchStream<K> = BoxStream<'static, Result<WatchEvent<K>, StoreError>>;

/// A typed cluster object.
pub trait Object:
    Resource<DynamicType = ()>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Object for K where
    K: Resource<DynamicType = ()>
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent<K> {
    Applied(K),
    Deleted(K),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("{kind} {name:?} was modified concurrently")]
    Conflict { kind: String, name: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid {kind}: {message}")]
    Invalid { kind: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Typed CRUD and watch access to cluster objects.
///
/// `namespace` is `None` for cluster-scoped kinds and for listing across all
/// namespaces.
#[async_trait::async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    async fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<K, StoreError>;

    /// Lists objects whose labels contain every entry in `labels`.
    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        labels: &Labels,
    ) -> Result<Vec<K>, StoreError>;

    /// Lists objects named `name` in every namespace.
    async fn list_named<K: Object>(&self, name: &str) -> Result<Vec<K>, StoreError>;

    async fn create<K: Object>(&self, obj: &K) -> Result<K, StoreError>;

    /// Writes the difference between `current` and `desired`. Fails with
    /// [`StoreError::Conflict`] when `current` is stale.
    async fn patch<K: Object>(&self, current: &K, desired: &K) -> Result<K, StoreError>;

    /// Like [`Store::patch`], for the status subresource.
    async fn patch_status<K: Object>(&self, current: &K, desired: &K) -> Result<K, StoreError>;

    async fn delete<K: Object>(&self, namespace: Option<&str>, name: &str)
        -> Result<(), StoreError>;

    /// Watches a single object, starting after `resource_version`.
    async fn watch<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        resource_version: &str,
    ) -> Result<WatchStream<K>, StoreError>;
}

/// Whether a write created or changed an object.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Created,
    Patched,
    Unchanged,
}

// === impl StoreError ===

impl StoreError {
    pub fn not_found<K: Resource<DynamicType = ()>>(name: impl ToString) -> Self {
        Self::NotFound {
            kind: K::kind(&()).into_owned(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Other(error.into())
    }
}

/// Fetches `obj` by name and applies `mutate` to it, creating it when it does
/// not exist. Nothing is written when `mutate` changes nothing.
pub async fn create_or_patch<S, K, F>(
    store: &S,
    obj: K,
    mutate: F,
) -> Result<(K, Operation), StoreError>
where
    S: Store,
    K: Object,
    F: Fn(&mut K),
{
    let name = obj.name_any();
    let namespace = obj.namespace();
    match store.get::<K>(namespace.as_deref(), &name).await {
        Ok(current) => {
            let mut desired = current.clone();
            mutate(&mut desired);
            if serde_json::to_value(&current)? == serde_json::to_value(&desired)? {
                return Ok((current, Operation::Unchanged));
            }
            let patched = store.patch(&current, &desired).await?;
            Ok((patched, Operation::Patched))
        }
        Err(error) if error.is_not_found() => {
            let mut obj = obj;
            mutate(&mut obj);
            let created = store.create(&obj).await?;
            Ok((created, Operation::Created))
        }
        Err(error) => Err(error),
    }
}

/// Builds a JSON merge patch (RFC 7386) from `current` to `desired` that is
/// only accepted while the object is still at `current`'s resource version.
pub fn conditional_merge_patch<K: Object>(current: &K, desired: &K) -> Result<Value, StoreError> {
    let mut patch = merge_patch(
        &serde_json::to_value(current)?,
        &serde_json::to_value(desired)?,
    );
    if let (Some(version), Value::Object(fields)) = (current.resource_version(), &mut patch) {
        let metadata = fields
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(metadata) = metadata {
            metadata.insert("resourceVersion".to_string(), Value::String(version));
        }
    }
    Ok(patch)
}

/// Computes the merge patch transforming `from` into `to`.
pub fn merge_patch(from: &Value, to: &Value) -> Value {
    match (from, to) {
        (Value::Object(from), Value::Object(to)) => {
            let mut patch = Map::new();
            for (key, value) in to {
                match from.get(key) {
                    Some(old) if old == value => {}
                    Some(old) => {
                        patch.insert(key.clone(), merge_patch(old, value));
                    }
                    None => {
                        patch.insert(key.clone(), value.clone());
                    }
                }
            }
            for key in from.keys() {
                if !to.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            Value::Object(patch)
        }
        (_, to) => to.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_patch_describes_changes_only() {
        let from = json!({
            "metadata": { "name": "a", "labels": { "keep": "1", "drop": "2" } },
            "spec": { "displayName": "old", "tags": ["x"] },
        });
        let to = json!({
            "metadata": { "name": "a", "labels": { "keep": "1", "add": "3" } },
            "spec": { "displayName": "new", "tags": ["x", "y"] },
        });
        assert_eq!(
            merge_patch(&from, &to),
            json!({
                "metadata": { "labels": { "add": "3", "drop": null } },
                "spec": { "displayName": "new", "tags": ["x", "y"] },
            })
        );
        assert_eq!(merge_patch(&from, &from), json!({}));
    }

    #[test]
    fn conditional_patch_pins_resource_version() {
        use cf_control_plane_k8s_api::{Namespace, ObjectMeta};

        let current = Namespace {
            metadata: ObjectMeta {
                name: Some("ns".to_string()),
                resource_version: Some("42".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut desired = current.clone();
        desired.metadata.labels = Some([("a".to_string(), "b".to_string())].into());

        let patch = conditional_merge_patch(&current, &desired).unwrap();
        assert_eq!(
            patch,
            json!({ "metadata": { "labels": { "a": "b" }, "resourceVersion": "42" } })
        );
    }
}
