#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Kubernetes API-backed implementations of the store seams.

use cf_control_plane_core::{
    k8s::{TokenReview, TokenReviewSpec, TokenReviewStatus},
    store::{conditional_merge_patch, Labels, Object, Store, StoreError, WatchEvent, WatchStream},
    ClientFactory, Token, TokenReviewer, FIELD_MANAGER,
};
use futures::prelude::*;
use kube::{
    api::{
        Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
        WatchEvent as ApiWatchEvent, WatchParams,
    },
    config::AuthInfo,
    Client, Config,
};
use secrecy::SecretString;

/// Limits how long a single watch request stays open.
///
/// Must be less than 295 or Kubernetes rejects the request.
const WATCH_TIMEOUT_SECS: u32 = 290;

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

/// Builds stores that authenticate with the caller's bearer token, so that
/// the API server applies the caller's RBAC to every request.
#[derive(Clone)]
pub struct UserClientFactory {
    config: Config,
}

#[derive(Clone)]
pub struct KubeTokenReviewer {
    client: Client,
}

// === impl KubeStore ===

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: Object>(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = ApiResource::erase::<K>(&());
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }

    fn patch_params() -> PatchParams {
        PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl Store for KubeStore {
    async fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<K, StoreError> {
        let obj = self
            .api::<K>(namespace)
            .get(name)
            .await
            .map_err(|error| classify::<K>(error, name))?;
        from_dynamic(obj)
    }

    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        labels: &Labels,
    ) -> Result<Vec<K>, StoreError> {
        let mut params = ListParams::default();
        if !labels.is_empty() {
            let selector = labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",");
            params = params.labels(&selector);
        }
        let list = self
            .api::<K>(namespace)
            .list(&params)
            .await
            .map_err(|error| classify::<K>(error, ""))?;
        list.items.into_iter().map(from_dynamic).collect()
    }

    async fn list_named<K: Object>(&self, name: &str) -> Result<Vec<K>, StoreError> {
        let params = ListParams::default().fields(&format!("metadata.name={name}"));
        let list = self
            .api::<K>(None)
            .list(&params)
            .await
            .map_err(|error| classify::<K>(error, name))?;
        list.items.into_iter().map(from_dynamic).collect()
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K, StoreError> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let created = self
            .api::<K>(obj.meta().namespace.as_deref())
            .create(
                &PostParams {
                    dry_run: false,
                    field_manager: Some(FIELD_MANAGER.to_string()),
                },
                &to_dynamic(obj)?,
            )
            .await
            .map_err(|error| classify::<K>(error, &name))?;
        from_dynamic(created)
    }

    async fn patch<K: Object>(&self, current: &K, desired: &K) -> Result<K, StoreError> {
        let name = current.meta().name.clone().unwrap_or_default();
        let patch = conditional_merge_patch(current, desired)?;
        let patched = self
            .api::<K>(current.meta().namespace.as_deref())
            .patch(&name, &Self::patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|error| classify::<K>(error, &name))?;
        from_dynamic(patched)
    }

    async fn patch_status<K: Object>(&self, current: &K, desired: &K) -> Result<K, StoreError> {
        let name = current.meta().name.clone().unwrap_or_default();
        let patch = conditional_merge_patch(current, desired)?;
        let patched = self
            .api::<K>(current.meta().namespace.as_deref())
            .patch_status(&name, &Self::patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|error| classify::<K>(error, &name))?;
        from_dynamic(patched)
    }

    async fn delete<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|error| classify::<K>(error, name))?;
        Ok(())
    }

    async fn watch<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        resource_version: &str,
    ) -> Result<WatchStream<K>, StoreError> {
        let params = WatchParams::default()
            .fields(&format!("metadata.name={name}"))
            .timeout(WATCH_TIMEOUT_SECS);
        let events = self
            .api::<K>(namespace)
            .watch(&params, resource_version)
            .await
            .map_err(|error| classify::<K>(error, name))?;

        let name = name.to_string();
        let events = events.filter_map(move |event| {
            future::ready(match event {
                Ok(ApiWatchEvent::Added(obj)) | Ok(ApiWatchEvent::Modified(obj)) => {
                    Some(from_dynamic(obj).map(WatchEvent::Applied))
                }
                Ok(ApiWatchEvent::Deleted(obj)) => Some(from_dynamic(obj).map(WatchEvent::Deleted)),
                Ok(ApiWatchEvent::Bookmark(_)) => None,
                Ok(ApiWatchEvent::Error(error)) => Some(Err(StoreError::Other(anyhow::anyhow!(
                    "watch of {} {name:?} failed: {error:?}",
                    K::kind(&())
                )))),
                Err(error) => Some(Err(classify::<K>(error, &name))),
            })
        });
        Ok(events.boxed())
    }
}

fn to_dynamic<K: Object>(obj: &K) -> Result<DynamicObject, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn from_dynamic<K: Object>(obj: DynamicObject) -> Result<K, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn classify<K: Object>(error: kube::Error, name: &str) -> StoreError {
    let kind = K::kind(&()).into_owned();
    let name = name.to_string();
    match error {
        kube::Error::Api(response) => match response.code {
            401 => StoreError::Unauthorized(response.message),
            403 => StoreError::Forbidden(response.message),
            404 => StoreError::NotFound { kind, name },
            409 if response.reason == "AlreadyExists" => StoreError::AlreadyExists { kind, name },
            409 => StoreError::Conflict { kind, name },
            422 => StoreError::Invalid {
                kind,
                message: response.message,
            },
            _ => StoreError::Other(kube::Error::Api(response).into()),
        },
        error => StoreError::Other(error.into()),
    }
}

// === impl UserClientFactory ===

impl UserClientFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ClientFactory for UserClientFactory {
    type Store = KubeStore;

    fn for_token(&self, token: &Token) -> Result<KubeStore, StoreError> {
        let mut config = self.config.clone();
        config.auth_info = AuthInfo {
            token: Some(SecretString::from(token.as_str().to_string())),
            ..Default::default()
        };
        let client = Client::try_from(config).map_err(anyhow::Error::from)?;
        Ok(KubeStore::new(client))
    }
}

// === impl KubeTokenReviewer ===

impl KubeTokenReviewer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl TokenReviewer for KubeTokenReviewer {
    async fn review(&self, token: &str) -> Result<TokenReviewStatus, StoreError> {
        let review = TokenReview {
            metadata: kube::api::ObjectMeta {
                name: Some("tokenReview".to_string()),
                ..Default::default()
            },
            spec: TokenReviewSpec {
                token: Some(token.to_string()),
                ..Default::default()
            },
            status: None,
        };
        let review = Api::<TokenReview>::all(self.client.clone())
            .create(&PostParams::default(), &review)
            .await
            .map_err(|error| classify::<TokenReview>(error, "tokenReview"))?;
        Ok(review.status.unwrap_or_default())
    }
}
