#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Test support: an in-memory cluster store, a scripted token reviewer and
//! object fixtures.

pub mod fixtures;
mod reviewer;
mod store;

pub use self::{reviewer::FakeTokenReviewer, store::MemoryStore};
use cf_control_plane_core::{
    k8s::{conditions, HasConditions},
    ClientFactory, Object, Store, StoreError, Token,
};
use std::time::Duration;

/// Hands every caller the same store, ignoring their credentials.
#[derive(Clone)]
pub struct StaticClientFactory(pub MemoryStore);

impl ClientFactory for StaticClientFactory {
    type Store = MemoryStore;

    fn for_token(&self, _: &Token) -> Result<MemoryStore, StoreError> {
        Ok(self.0.clone())
    }
}

/// Keeps setting `condition` on every object of kind `K`, in place of the
/// reconciler that would normally do so.
pub fn spawn_condition_setter<K>(
    store: MemoryStore,
    condition: &'static str,
) -> tokio::task::JoinHandle<()>
where
    K: Object + HasConditions,
{
    tokio::spawn(async move {
        loop {
            for obj in store.all::<K>() {
                if obj.is_condition_true(condition) {
                    continue;
                }
                let mut desired = obj.clone();
                conditions::set(
                    desired.conditions_mut(),
                    conditions::new(condition, true, condition),
                );
                if let Err(error) = store.patch_status(&obj, &desired).await {
                    tracing::debug!(%error, "Condition not set; retrying");
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
}

/// Installs a test-scoped tracing subscriber.
pub fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "cf_control_plane=trace,debug".parse().unwrap()),
            )
            .finish(),
    )
}
