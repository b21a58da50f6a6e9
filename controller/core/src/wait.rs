use crate::{
    error::ApiError,
    store::{Object, Store, StoreError, WatchEvent},
};
use cf_control_plane_k8s_api::{HasConditions, ResourceExt};
use futures::prelude::*;
use tokio::time;

/// Waits until `obj`'s status condition `condition` is `True`.
///
/// The watch starts at `obj`'s resource version, so no update made after `obj`
/// was read can be missed. Returns [`ApiError::Timeout`] if the condition is
/// not observed within `timeout`.
pub async fn await_condition<S, K>(
    store: &S,
    obj: K,
    condition: &str,
    timeout: time::Duration,
) -> Result<K, ApiError>
where
    S: Store,
    K: Object + HasConditions,
{
    if obj.is_condition_true(condition) {
        return Ok(obj);
    }

    let kind = K::kind(&()).into_owned();
    match time::timeout(timeout, watch_until(store, &obj, condition)).await {
        Ok(Ok(obj)) => Ok(obj),
        Ok(Err(error)) => Err(ApiError::from_store(error, &kind)),
        Err(_) => Err(ApiError::Timeout {
            message: format!(
                "{kind} did not get Condition `{condition}`: 'True' within timeout period {} ms",
                timeout.as_millis()
            ),
        }),
    }
}

async fn watch_until<S, K>(store: &S, obj: &K, condition: &str) -> Result<K, StoreError>
where
    S: Store,
    K: Object + HasConditions,
{
    let name = obj.name_any();
    let namespace = obj.namespace();
    let mut version = obj.resource_version().unwrap_or_default();
    loop {
        let mut events = store
            .watch::<K>(namespace.as_deref(), &name, &version)
            .await?;
        while let Some(event) = events.try_next().await? {
            match event {
                WatchEvent::Applied(obj) => {
                    if obj.is_condition_true(condition) {
                        return Ok(obj);
                    }
                    if let Some(v) = obj.resource_version() {
                        version = v;
                    }
                }
                WatchEvent::Deleted(_) => return Err(StoreError::not_found::<K>(&name)),
            }
        }
        tracing::debug!(kind = %K::kind(&()), %name, %version, "Watch ended; restarting");
    }
}
