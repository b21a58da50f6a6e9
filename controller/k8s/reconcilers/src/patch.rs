//! Write helpers shared by the reconcilers.

use cf_control_plane_core::{
    k8s::{OwnerReference, Resource},
    Object, Store, StoreError,
};

/// Applies `mutate` to `obj` and writes the result, unless nothing changed.
pub(crate) async fn update<S, K>(
    store: &S,
    obj: K,
    mutate: impl FnOnce(&mut K),
) -> Result<K, StoreError>
where
    S: Store,
    K: Object,
{
    let mut desired = obj.clone();
    mutate(&mut desired);
    if serde_json::to_value(&obj)? == serde_json::to_value(&desired)? {
        return Ok(obj);
    }
    store.patch(&obj, &desired).await
}

/// Like [`update`], through the status subresource.
pub(crate) async fn update_status<S, K>(
    store: &S,
    obj: K,
    mutate: impl FnOnce(&mut K),
) -> Result<K, StoreError>
where
    S: Store,
    K: Object,
{
    let mut desired = obj.clone();
    mutate(&mut desired);
    if serde_json::to_value(&obj)? == serde_json::to_value(&desired)? {
        return Ok(obj);
    }
    store.patch_status(&obj, &desired).await
}

pub(crate) fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.meta()
        .finalizers
        .iter()
        .flatten()
        .any(|f| f == finalizer)
}

pub(crate) fn add_finalizer<K: Resource>(obj: &mut K, finalizer: &str) {
    if !has_finalizer(obj, finalizer) {
        obj.meta_mut()
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(finalizer.to_string());
    }
}

pub(crate) fn remove_finalizer<K: Resource>(obj: &mut K, finalizer: &str) {
    let meta = obj.meta_mut();
    if let Some(finalizers) = meta.finalizers.as_mut() {
        finalizers.retain(|f| f != finalizer);
        if finalizers.is_empty() {
            meta.finalizers = None;
        }
    }
}

/// Makes `owner` the controlling owner of `obj`, replacing any earlier
/// reference to the same owner.
pub(crate) fn set_controller<K: Resource>(obj: &mut K, owner: Option<OwnerReference>) {
    let Some(owner) = owner else {
        return;
    };
    let refs = obj.meta_mut().owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.uid != owner.uid);
    refs.push(owner);
}
