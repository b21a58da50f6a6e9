//! Copies objects from a parent namespace into the namespaces it owns.

use cf_control_plane_core::{
    k8s::{labels, ObjectMeta, ResourceExt, RoleBinding, Secret},
    store::create_or_patch,
    Labels, Store, StoreError,
};
use std::collections::BTreeSet;

/// Copies the secret `name` from `from` into `to`.
pub(crate) async fn secret<S: Store>(
    store: &S,
    from: &str,
    to: &str,
    name: &str,
) -> Result<(), StoreError> {
    let source = store.get::<Secret>(Some(from), name).await?;
    let copy = Secret {
        metadata: meta(to, name),
        ..Default::default()
    };
    let (_, op) = create_or_patch(store, copy, |secret| {
        secret.metadata.labels = source.metadata.labels.clone();
        secret.metadata.annotations = source.metadata.annotations.clone();
        secret.data = source.data.clone();
        secret.string_data = source.string_data.clone();
        secret.type_ = source.type_.clone();
        secret.immutable = source.immutable;
    })
    .await?;
    tracing::debug!(%from, %to, secret = %name, ?op, "Propagated secret");
    Ok(())
}

/// Mirrors the role bindings in `from` that are marked for propagation into
/// `to`, and deletes copies whose source is gone or no longer propagated.
///
/// Copies keep the propagation annotation, so bindings cascade from an org to
/// its spaces.
pub(crate) async fn role_bindings<S: Store>(
    store: &S,
    from: &str,
    to: &str,
) -> Result<(), StoreError> {
    let sources = store
        .list::<RoleBinding>(Some(from), &Labels::new())
        .await?
        .into_iter()
        .filter(is_propagated);

    let mut current = BTreeSet::new();
    for source in sources {
        let name = source.name_any();
        let copy = RoleBinding {
            metadata: meta(to, &name),
            role_ref: source.role_ref.clone(),
            subjects: None,
        };
        create_or_patch(store, copy, |binding| {
            let mut labels = source.labels().clone();
            labels.insert(labels::PROPAGATED_FROM.to_string(), from.to_string());
            binding.metadata.labels = Some(labels);
            binding.metadata.annotations = source.metadata.annotations.clone();
            binding.subjects = source.subjects.clone();
        })
        .await?;
        current.insert(name);
    }

    let selector = Labels::from([(labels::PROPAGATED_FROM.to_string(), from.to_string())]);
    for stale in store.list::<RoleBinding>(Some(to), &selector).await? {
        let name = stale.name_any();
        if current.contains(&name) {
            continue;
        }
        match store.delete::<RoleBinding>(Some(to), &name).await {
            Ok(()) => tracing::info!(namespace = %to, binding = %name, "Deleted stale role binding"),
            Err(error) if error.is_not_found() => {}
            Err(error) => return Err(error),
        }
    }
    Ok(())
}

fn is_propagated(binding: &RoleBinding) -> bool {
    binding
        .annotations()
        .get(labels::PROPAGATE_ROLE_BINDING)
        .is_some_and(|v| v == "true")
}

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_control_plane_core::k8s::ByteString;
    use cf_control_plane_test::{fixtures, MemoryStore};
    use maplit::btreemap;

    #[tokio::test]
    async fn copies_secret_contents() {
        let store = MemoryStore::new();
        let source = Secret {
            metadata: meta("cf", "registry"),
            data: Some(btreemap! {
                ".dockerconfigjson".to_string() => ByteString(b"{}".to_vec()),
            }),
            type_: Some("kubernetes.io/dockerconfigjson".to_string()),
            ..Default::default()
        };
        store.create(&source).await.unwrap();

        secret(&store, "cf", "o1", "registry").await.unwrap();
        secret(&store, "cf", "o1", "registry").await.unwrap();

        let copy = store.get::<Secret>(Some("o1"), "registry").await.unwrap();
        assert_eq!(copy.data, source.data);
        assert_eq!(copy.type_, source.type_);
    }

    #[tokio::test]
    async fn missing_secret_fails() {
        let store = MemoryStore::new();
        let error = secret(&store, "cf", "o1", "registry").await.unwrap_err();
        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn mirrors_propagated_bindings() {
        let store = MemoryStore::new();
        store
            .create(&fixtures::propagated_role_binding("cf", "admins", "alice", "cf-admin"))
            .await
            .unwrap();
        store
            .create(&fixtures::role_binding("cf", "local", "bob", "cf-admin"))
            .await
            .unwrap();

        role_bindings(&store, "cf", "o1").await.unwrap();

        let copy = store.get::<RoleBinding>(Some("o1"), "admins").await.unwrap();
        assert_eq!(copy.labels()[labels::PROPAGATED_FROM], "cf");
        assert!(is_propagated(&copy));
        assert_eq!(copy.subjects.unwrap()[0].name, "alice");
        assert!(store
            .get::<RoleBinding>(Some("o1"), "local")
            .await
            .unwrap_err()
            .is_not_found());

        store.delete::<RoleBinding>(Some("cf"), "admins").await.unwrap();
        role_bindings(&store, "cf", "o1").await.unwrap();
        assert!(store
            .list::<RoleBinding>(Some("o1"), &Labels::new())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn keeps_bindings_from_other_parents() {
        let store = MemoryStore::new();
        let mut unrelated = fixtures::role_binding("s1", "from-elsewhere", "carol", "cf-space-developer");
        unrelated.metadata.labels = Some(btreemap! {
            labels::PROPAGATED_FROM.to_string() => "o2".to_string(),
        });
        store.create(&unrelated).await.unwrap();

        role_bindings(&store, "o1", "s1").await.unwrap();

        store
            .get::<RoleBinding>(Some("s1"), "from-elsewhere")
            .await
            .unwrap();
    }
}
