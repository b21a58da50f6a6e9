use cf_control_plane_core::store::{
    conditional_merge_patch, Labels, Object, Store, StoreError, WatchEvent, WatchStream,
};
use chrono::{SecondsFormat, Utc};
use futures::prelude::*;
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

const EVENT_BUFFER: usize = 1024;

/// An in-memory cluster store.
///
/// Mirrors the API server behaviors the control plane depends on: resource
/// versions and conflicts, finalizers and deletion timestamps, namespace and
/// owner-reference garbage collection, and single-object watches. Namespaces
/// can be marked forbidden to simulate RBAC denials.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    events: broadcast::Sender<Event>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    version: u64,
    forbidden: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    api_version: String,
    kind: String,
    namespace: Option<String>,
    name: String,
}

#[derive(Clone, Debug)]
struct Event {
    key: Key,
    value: Value,
    deleted: bool,
}

// === impl MemoryStore ===

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Default::default(),
            events,
        }
    }

    /// Makes every namespaced request against `namespace` fail as forbidden.
    pub fn forbid_namespace(&self, namespace: impl ToString) {
        self.state.lock().forbidden.insert(namespace.to_string());
    }

    /// Returns every stored object of a kind, bypassing access checks.
    pub fn all<K: Object>(&self) -> Vec<K> {
        let state = self.state.lock();
        state
            .objects
            .iter()
            .filter(|(key, _)| key.is::<K>())
            .filter_map(|(_, value)| serde_json::from_value(value.clone()).ok())
            .collect()
    }

    fn check_access(state: &State, namespace: Option<&str>) -> Result<(), StoreError> {
        match namespace {
            Some(ns) if state.forbidden.contains(ns) => Err(StoreError::Forbidden(format!(
                "access to namespace {ns:?} is forbidden"
            ))),
            _ => Ok(()),
        }
    }

    fn emit(&self, key: Key, value: Value, deleted: bool) {
        let _ = self.events.send(Event {
            key,
            value,
            deleted,
        });
    }

    fn write<K: Object>(&self, current: &K, desired: &K) -> Result<K, StoreError> {
        let name = current.meta().name.clone().unwrap_or_default();
        let key = Key::of::<K>(current.meta().namespace.as_deref(), &name);
        let patch = conditional_merge_patch(current, desired)?;

        let mut state = self.state.lock();
        Self::check_access(&state, key.namespace.as_deref())?;
        let mut value = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found::<K>(&name))?;

        let expected = patch.pointer("/metadata/resourceVersion");
        if expected.is_some() && expected != value.pointer("/metadata/resourceVersion") {
            return Err(StoreError::Conflict {
                kind: key.kind,
                name,
            });
        }

        json_patch::merge(&mut value, &patch);
        value["metadata"]["resourceVersion"] = Value::String(state.next_version());

        if value.pointer("/metadata/deletionTimestamp").is_some() && !has_finalizers(&value) {
            self.remove_cascading(&mut state, key);
        } else {
            state.objects.insert(key.clone(), value.clone());
            self.emit(key, value.clone(), false);
        }
        Ok(serde_json::from_value(value)?)
    }

    fn remove_cascading(&self, state: &mut State, key: Key) {
        let mut pending = vec![key];
        while let Some(key) = pending.pop() {
            let Some(mut value) = state.objects.remove(&key) else {
                continue;
            };
            value["metadata"]["resourceVersion"] = Value::String(state.next_version());
            let uid = value
                .pointer("/metadata/uid")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let is_namespace = key.api_version == "v1" && key.kind == "Namespace";
            pending.extend(
                state
                    .objects
                    .iter()
                    .filter(|(k, v)| {
                        (is_namespace && k.namespace.as_deref() == Some(key.name.as_str()))
                            || (!uid.is_empty() && is_owned_by(v, &uid))
                    })
                    .map(|(k, _)| k.clone()),
            );
            self.emit(key, value, true);
        }
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<K, StoreError> {
        let state = self.state.lock();
        Self::check_access(&state, namespace)?;
        let value = state
            .objects
            .get(&Key::of::<K>(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::not_found::<K>(name))?;
        Ok(serde_json::from_value(value)?)
    }

    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        labels: &Labels,
    ) -> Result<Vec<K>, StoreError> {
        let state = self.state.lock();
        Self::check_access(&state, namespace)?;
        state
            .objects
            .iter()
            .filter(|(key, _)| key.is::<K>())
            .filter(|(key, _)| namespace.is_none() || key.namespace.as_deref() == namespace)
            .filter(|(_, value)| {
                labels.iter().all(|(k, v)| {
                    value
                        .pointer("/metadata/labels")
                        .and_then(|l| l.get(k))
                        .and_then(Value::as_str)
                        == Some(v.as_str())
                })
            })
            .map(|(_, value)| Ok(serde_json::from_value(value.clone())?))
            .collect()
    }

    async fn list_named<K: Object>(&self, name: &str) -> Result<Vec<K>, StoreError> {
        let state = self.state.lock();
        state
            .objects
            .iter()
            .filter(|(key, _)| key.is::<K>() && key.name == name)
            .map(|(_, value)| Ok(serde_json::from_value(value.clone())?))
            .collect()
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K, StoreError> {
        let meta = obj.meta();
        let name = match (&meta.name, &meta.generate_name) {
            (Some(name), _) => name.clone(),
            (None, Some(prefix)) => {
                format!("{prefix}{}", &uuid::Uuid::new_v4().simple().to_string()[..5])
            }
            (None, None) => {
                return Err(StoreError::Invalid {
                    kind: K::kind(&()).into_owned(),
                    message: "metadata.name is required".to_string(),
                })
            }
        };
        let key = Key::of::<K>(meta.namespace.as_deref(), &name);
        let mut value = serde_json::to_value(obj)?;

        let mut state = self.state.lock();
        Self::check_access(&state, key.namespace.as_deref())?;
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: key.kind,
                name,
            });
        }

        let version = state.next_version();
        let metadata = &mut value["metadata"];
        metadata["name"] = Value::String(name);
        metadata["resourceVersion"] = Value::String(version);
        metadata["uid"] = Value::String(uuid::Uuid::new_v4().to_string());
        metadata["generation"] = Value::from(1);
        if metadata.get("creationTimestamp").map_or(true, Value::is_null) {
            metadata["creationTimestamp"] =
                Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        }

        state.objects.insert(key.clone(), value.clone());
        self.emit(key, value.clone(), false);
        Ok(serde_json::from_value(value)?)
    }

    async fn patch<K: Object>(&self, current: &K, desired: &K) -> Result<K, StoreError> {
        self.write(current, desired)
    }

    async fn patch_status<K: Object>(&self, current: &K, desired: &K) -> Result<K, StoreError> {
        self.write(current, desired)
    }

    async fn delete<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        let key = Key::of::<K>(namespace, name);
        let mut state = self.state.lock();
        Self::check_access(&state, namespace)?;
        let Some(mut value) = state.objects.get(&key).cloned() else {
            return Err(StoreError::not_found::<K>(name));
        };

        if has_finalizers(&value) {
            if value.pointer("/metadata/deletionTimestamp").is_none() {
                value["metadata"]["deletionTimestamp"] =
                    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
                value["metadata"]["resourceVersion"] = Value::String(state.next_version());
                state.objects.insert(key.clone(), value.clone());
                self.emit(key, value, false);
            }
            return Ok(());
        }

        self.remove_cascading(&mut state, key);
        Ok(())
    }

    async fn watch<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        resource_version: &str,
    ) -> Result<WatchStream<K>, StoreError> {
        let key = Key::of::<K>(namespace, name);
        let since = resource_version.parse::<u64>().unwrap_or(0);

        // Subscribe before reading the current state so nothing is missed.
        let updates = BroadcastStream::new(self.events.subscribe());
        let initial = {
            let state = self.state.lock();
            Self::check_access(&state, namespace)?;
            state
                .objects
                .get(&key)
                .filter(|value| version_of(value) > since)
                .cloned()
        };

        let initial = initial
            .map(|value| {
                decode::<K>(Event {
                    key: key.clone(),
                    value,
                    deleted: false,
                })
            })
            .into_iter()
            .collect::<Vec<_>>();
        let updates = updates.filter_map(move |event| {
            future::ready(match event {
                Ok(event) if event.key == key && version_of(&event.value) > since => {
                    Some(decode::<K>(event))
                }
                Ok(_) => None,
                Err(error) => Some(Err(StoreError::Other(anyhow::anyhow!(
                    "watch failed: {error}"
                )))),
            })
        });
        Ok(stream::iter(initial).chain(updates).boxed())
    }
}

// === impl State ===

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

// === impl Key ===

impl Key {
    fn of<K: Object>(namespace: Option<&str>, name: &str) -> Self {
        Self {
            api_version: K::api_version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    fn is<K: Object>(&self) -> bool {
        self.api_version == K::api_version(&()) && self.kind == K::kind(&())
    }
}

fn decode<K: Object>(event: Event) -> Result<WatchEvent<K>, StoreError> {
    let obj = serde_json::from_value(event.value)?;
    Ok(if event.deleted {
        WatchEvent::Deleted(obj)
    } else {
        WatchEvent::Applied(obj)
    })
}

fn version_of(value: &Value) -> u64 {
    value
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn has_finalizers(value: &Value) -> bool {
    value
        .pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .is_some_and(|finalizers| !finalizers.is_empty())
}

fn is_owned_by(value: &Value, uid: &str) -> bool {
    value
        .pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .is_some_and(|refs| {
            refs.iter()
                .any(|r| r.get("uid").and_then(Value::as_str) == Some(uid))
        })
}
