use crate::namespace::{NamespaceOwner, NamespaceReconciler};
use cf_control_plane_core::{
    k8s::{labels, CFSpace},
    Labels,
};

pub const FINALIZER: &str = "cfSpace.korifi.cloudfoundry.org";

/// Provisions a space's namespace from its org's namespace.
pub type SpaceReconciler<S> = NamespaceReconciler<CFSpace, S>;

impl NamespaceOwner for CFSpace {
    const FINALIZER: &'static str = FINALIZER;
    const NAME_KEY: &'static str = labels::SPACE_NAME_KEY;
    const GUID_KEY: &'static str = labels::SPACE_GUID_KEY;

    fn display_name(&self) -> &str {
        &self.spec.display_name
    }

    fn guid_labels(&self) -> Labels {
        let name = self.metadata.name.as_deref().unwrap_or_default();
        let org = self.metadata.namespace.as_deref().unwrap_or_default();
        Labels::from([
            (labels::SPACE_GUID.to_string(), labels::guid_from_name(name)),
            (labels::ORG_GUID.to_string(), labels::guid_from_name(org)),
        ])
    }

    fn set_status_guid(&mut self, guid: String) {
        self.status.get_or_insert_with(Default::default).guid = guid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::org::OrgReconciler;
    use cf_control_plane_core::{
        k8s::{conditions::READY, CFOrg, HasConditions, Namespace, ResourceExt, RoleBinding},
        Store,
    };
    use cf_control_plane_test::{fixtures, MemoryStore};

    const ORG: &str = "cf-org-2f35885d-0c9d-4423-83ad-fd05066f8576";
    const SPACE: &str = "cf-space-6e2f3e4c-1d3a-4f5b-9c8d-7a6b5c4d3e2f";

    #[tokio::test]
    async fn provisions_namespace_under_org() {
        let store = MemoryStore::new();
        let reconciler = SpaceReconciler::new(store.clone(), String::new(), Labels::new());
        store.create(&fixtures::namespace(ORG)).await.unwrap();
        let space = store
            .create(&fixtures::space(ORG, SPACE, "dev"))
            .await
            .unwrap();

        reconciler.reconcile(&space).await.unwrap();

        let space = store.get::<CFSpace>(Some(ORG), SPACE).await.unwrap();
        assert!(space.is_condition_true(READY));
        assert_eq!(space.status.as_ref().unwrap().guid, SPACE);
        assert_eq!(
            space.labels()[labels::SPACE_GUID],
            "6e2f3e4c-1d3a-4f5b-9c8d-7a6b5c4d3e2f"
        );
        assert_eq!(
            space.labels()[labels::ORG_GUID],
            "2f35885d-0c9d-4423-83ad-fd05066f8576"
        );

        let ns = store.get::<Namespace>(None, SPACE).await.unwrap();
        assert_eq!(ns.labels()[labels::SPACE_GUID_KEY], SPACE);
        assert_eq!(
            ns.labels()[labels::SPACE_NAME_KEY],
            labels::ORG_SPACE_DEPRECATED_NAME
        );
        assert_eq!(ns.annotations()[labels::SPACE_NAME_KEY], "dev");
    }

    #[tokio::test]
    async fn root_bindings_cascade_through_org_to_space() {
        let store = MemoryStore::new();
        let orgs = OrgReconciler::new(store.clone(), String::new(), Labels::new());
        let spaces = SpaceReconciler::new(store.clone(), String::new(), Labels::new());
        store
            .create(&fixtures::propagated_role_binding(
                fixtures::ROOT_NAMESPACE,
                "admins",
                "alice",
                "cf-admin",
            ))
            .await
            .unwrap();

        let org = store.create(&fixtures::org(ORG, "org")).await.unwrap();
        orgs.reconcile(&org).await.unwrap();
        let space = store
            .create(&fixtures::space(ORG, SPACE, "dev"))
            .await
            .unwrap();
        spaces.reconcile(&space).await.unwrap();

        let binding = store
            .get::<RoleBinding>(Some(SPACE), "admins")
            .await
            .unwrap();
        assert_eq!(binding.labels()[labels::PROPAGATED_FROM], ORG);

        store
            .delete::<RoleBinding>(Some(fixtures::ROOT_NAMESPACE), "admins")
            .await
            .unwrap();
        let org = store
            .get::<CFOrg>(Some(fixtures::ROOT_NAMESPACE), ORG)
            .await
            .unwrap();
        orgs.reconcile(&org).await.unwrap();
        let space = store.get::<CFSpace>(Some(ORG), SPACE).await.unwrap();
        spaces.reconcile(&space).await.unwrap();

        assert!(store
            .get::<RoleBinding>(Some(SPACE), "admins")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn deletion_without_finalizer_is_ignored() {
        let store = MemoryStore::new();
        let reconciler = SpaceReconciler::new(store.clone(), String::new(), Labels::new());
        let mut space = fixtures::space(ORG, SPACE, "dev");
        space.metadata.deletion_timestamp = Some(serde_json::from_value(
            serde_json::json!("2024-01-01T00:00:00Z"),
        )
        .unwrap());
        store.create(&fixtures::namespace(SPACE)).await.unwrap();

        reconciler.reconcile(&space).await.unwrap();

        store.get::<Namespace>(None, SPACE).await.unwrap();
    }
}
