use crate::namespace::{NamespaceOwner, NamespaceReconciler};
use cf_control_plane_core::{
    k8s::{labels, CFOrg},
    Labels,
};

pub const FINALIZER: &str = "cfOrg.korifi.cloudfoundry.org";

/// Provisions an org's namespace from the root namespace.
pub type OrgReconciler<S> = NamespaceReconciler<CFOrg, S>;

impl NamespaceOwner for CFOrg {
    const FINALIZER: &'static str = FINALIZER;
    const NAME_KEY: &'static str = labels::ORG_NAME_KEY;
    const GUID_KEY: &'static str = labels::ORG_GUID_KEY;

    fn display_name(&self) -> &str {
        &self.spec.display_name
    }

    fn guid_labels(&self) -> Labels {
        let name = self.metadata.name.as_deref().unwrap_or_default();
        Labels::from([(labels::ORG_GUID.to_string(), labels::guid_from_name(name))])
    }

    fn set_status_guid(&mut self, guid: String) {
        self.status.get_or_insert_with(Default::default).guid = guid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_control_plane_core::{
        k8s::{
            conditions::READY, ByteString, HasConditions, Namespace, ObjectMeta, ResourceExt,
            RoleBinding, Secret,
        },
        Store,
    };
    use cf_control_plane_test::{fixtures, MemoryStore};
    use kube::runtime::controller::Action;
    use maplit::btreemap;

    const ORG: &str = "cf-org-2f35885d-0c9d-4423-83ad-fd05066f8576";

    async fn seed() -> (MemoryStore, OrgReconciler<MemoryStore>) {
        let store = MemoryStore::new();
        store
            .create(&Secret {
                metadata: ObjectMeta {
                    namespace: Some(fixtures::ROOT_NAMESPACE.to_string()),
                    name: Some("registry".to_string()),
                    ..Default::default()
                },
                data: Some(btreemap! {
                    ".dockerconfigjson".to_string() => ByteString(b"{}".to_vec()),
                }),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .create(&fixtures::propagated_role_binding(
                fixtures::ROOT_NAMESPACE,
                "cf-admin",
                "alice",
                "cf-admin",
            ))
            .await
            .unwrap();
        let reconciler = OrgReconciler::new(
            store.clone(),
            "registry".to_string(),
            btreemap! {
                "pod-security.kubernetes.io/enforce".to_string() => "restricted".to_string(),
            },
        );
        (store, reconciler)
    }

    async fn reconcile(store: &MemoryStore, reconciler: &OrgReconciler<MemoryStore>) -> Action {
        let org = store
            .get::<CFOrg>(Some(fixtures::ROOT_NAMESPACE), ORG)
            .await
            .unwrap();
        reconciler.reconcile(&org).await.unwrap()
    }

    #[tokio::test]
    async fn provisions_namespace() {
        let (store, reconciler) = seed().await;
        store.create(&fixtures::org(ORG, "my-org")).await.unwrap();

        assert_eq!(reconcile(&store, &reconciler).await, Action::await_change());

        let org = store
            .get::<CFOrg>(Some(fixtures::ROOT_NAMESPACE), ORG)
            .await
            .unwrap();
        assert!(org.is_condition_true(READY));
        assert_eq!(org.status.as_ref().unwrap().guid, ORG);
        assert_eq!(org.finalizers(), [FINALIZER]);
        assert_eq!(
            org.labels()[labels::ORG_GUID],
            "2f35885d-0c9d-4423-83ad-fd05066f8576"
        );

        let ns = store.get::<Namespace>(None, ORG).await.unwrap();
        assert_eq!(
            ns.labels(),
            &btreemap! {
                "pod-security.kubernetes.io/enforce".to_string() => "restricted".to_string(),
                labels::ORG_NAME_KEY.to_string() => labels::ORG_SPACE_DEPRECATED_NAME.to_string(),
                labels::ORG_GUID_KEY.to_string() => ORG.to_string(),
            }
        );
        assert_eq!(ns.annotations()[labels::ORG_NAME_KEY], "my-org");

        store.get::<Secret>(Some(ORG), "registry").await.unwrap();
        let binding = store
            .get::<RoleBinding>(Some(ORG), "cf-admin")
            .await
            .unwrap();
        assert_eq!(
            binding.labels()[labels::PROPAGATED_FROM],
            fixtures::ROOT_NAMESPACE
        );
    }

    #[tokio::test]
    async fn reconciling_twice_changes_nothing() {
        let (store, reconciler) = seed().await;
        store.create(&fixtures::org(ORG, "my-org")).await.unwrap();

        reconcile(&store, &reconciler).await;
        let first = store
            .get::<CFOrg>(Some(fixtures::ROOT_NAMESPACE), ORG)
            .await
            .unwrap();
        reconcile(&store, &reconciler).await;
        let second = store
            .get::<CFOrg>(Some(fixtures::ROOT_NAMESPACE), ORG)
            .await
            .unwrap();
        assert_eq!(first.resource_version(), second.resource_version());
    }

    #[tokio::test]
    async fn display_name_changes_reach_namespace() {
        let (store, reconciler) = seed().await;
        store.create(&fixtures::org(ORG, "my-org")).await.unwrap();
        reconcile(&store, &reconciler).await;

        let org = store
            .get::<CFOrg>(Some(fixtures::ROOT_NAMESPACE), ORG)
            .await
            .unwrap();
        let mut renamed = org.clone();
        renamed.spec.display_name = "renamed".to_string();
        store.patch(&org, &renamed).await.unwrap();
        reconcile(&store, &reconciler).await;

        let ns = store.get::<Namespace>(None, ORG).await.unwrap();
        assert_eq!(ns.annotations()[labels::ORG_NAME_KEY], "renamed");
    }

    #[tokio::test]
    async fn missing_registry_secret_is_retried() {
        let store = MemoryStore::new();
        let reconciler = OrgReconciler::new(store.clone(), "registry".to_string(), Labels::new());
        store.create(&fixtures::org(ORG, "my-org")).await.unwrap();

        let org = store
            .get::<CFOrg>(Some(fixtures::ROOT_NAMESPACE), ORG)
            .await
            .unwrap();
        reconciler.reconcile(&org).await.unwrap_err();

        let org = store
            .get::<CFOrg>(Some(fixtures::ROOT_NAMESPACE), ORG)
            .await
            .unwrap();
        assert!(!org.is_condition_true(READY));
        assert_eq!(org.conditions()[0].status, "Unknown");
    }

    #[tokio::test]
    async fn deletion_removes_namespace_then_org() {
        let (store, reconciler) = seed().await;
        store.create(&fixtures::org(ORG, "my-org")).await.unwrap();
        reconcile(&store, &reconciler).await;

        store
            .delete::<CFOrg>(Some(fixtures::ROOT_NAMESPACE), ORG)
            .await
            .unwrap();
        let deleting = store
            .get::<CFOrg>(Some(fixtures::ROOT_NAMESPACE), ORG)
            .await
            .unwrap();
        assert!(deleting.metadata.deletion_timestamp.is_some());

        reconciler.reconcile(&deleting).await.unwrap();

        assert!(store.get::<Namespace>(None, ORG).await.unwrap_err().is_not_found());
        assert!(store
            .get::<Secret>(Some(ORG), "registry")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(store
            .get::<CFOrg>(Some(fixtures::ROOT_NAMESPACE), ORG)
            .await
            .unwrap_err()
            .is_not_found());
    }
}
