use cf_control_plane_core::{
    k8s::{CFOrg, CFSpace, ResourceExt, RoleBinding},
    ApiError, Identity, Labels, RoleMappings, Store,
};
use std::{collections::BTreeSet, sync::Arc};

/// Answers whether an identity holds any role in a namespace.
#[async_trait::async_trait]
pub trait AuthorizedInChecker: Send + Sync + 'static {
    async fn authorized_in(&self, identity: &Identity, namespace: &str) -> Result<bool, ApiError>;
}

/// Computes the org and space namespaces an identity may act within.
///
/// Nothing is cached: every call reads the current role bindings through the
/// privileged store.
#[derive(Clone)]
pub struct NamespacePermissions<S> {
    store: S,
    root_namespace: Arc<str>,
    roles: Arc<RoleMappings>,
}

/// Whether `binding` names `identity` as one of its subjects.
pub fn has_subject(binding: &RoleBinding, identity: &Identity) -> bool {
    binding
        .subjects
        .iter()
        .flatten()
        .any(|subject| subject.kind == identity.kind.as_str() && subject.name == identity.name)
}

// === impl NamespacePermissions ===

impl<S: Store> NamespacePermissions<S> {
    pub fn new(store: S, root_namespace: impl Into<Arc<str>>, roles: Arc<RoleMappings>) -> Self {
        Self {
            store,
            root_namespace: root_namespace.into(),
            roles,
        }
    }

    pub async fn authorized_org_namespaces(
        &self,
        identity: &Identity,
    ) -> Result<BTreeSet<String>, ApiError> {
        let orgs = self
            .store
            .list::<CFOrg>(Some(&*self.root_namespace), &Labels::new())
            .await
            .map_err(|error| ApiError::from_store(error, "Org").wrap("failed to list orgs"))?;
        let hosts = orgs.iter().map(|org| org.name_any()).collect();

        let namespaces = self.granted_namespaces(identity, &hosts).await?;
        tracing::debug!(identity = %identity.name, ?namespaces, "Authorized org namespaces");
        Ok(namespaces)
    }

    pub async fn authorized_space_namespaces(
        &self,
        identity: &Identity,
    ) -> Result<BTreeSet<String>, ApiError> {
        let spaces = self
            .store
            .list::<CFSpace>(None, &Labels::new())
            .await
            .map_err(|error| ApiError::from_store(error, "Space").wrap("failed to list spaces"))?;
        let hosts = spaces.iter().map(|space| space.name_any()).collect();

        let namespaces = self.granted_namespaces(identity, &hosts).await?;
        tracing::debug!(identity = %identity.name, ?namespaces, "Authorized space namespaces");
        Ok(namespaces)
    }

    /// Returns the namespaces among `hosts` in which `identity` is bound to a
    /// configured org- or space-level role.
    async fn granted_namespaces(
        &self,
        identity: &Identity,
        hosts: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, ApiError> {
        if hosts.is_empty() {
            return Ok(BTreeSet::new());
        }

        let bindings = self
            .store
            .list::<RoleBinding>(None, &Labels::new())
            .await
            .map_err(|error| {
                ApiError::from_store(error, "Role").wrap("failed to list role bindings")
            })?;

        Ok(bindings
            .into_iter()
            .filter(|binding| self.roles.grants_namespace_access(&binding.role_ref.name))
            .filter(|binding| has_subject(binding, identity))
            .filter_map(|binding| binding.metadata.namespace)
            .filter(|namespace| hosts.contains(namespace))
            .collect())
    }
}

#[async_trait::async_trait]
impl<S: Store> AuthorizedInChecker for NamespacePermissions<S> {
    async fn authorized_in(&self, identity: &Identity, namespace: &str) -> Result<bool, ApiError> {
        let bindings = self
            .store
            .list::<RoleBinding>(Some(namespace), &Labels::new())
            .await
            .map_err(|error| {
                ApiError::from_store(error, "Role").wrap("failed to list role bindings")
            })?;
        Ok(bindings.iter().any(|binding| has_subject(binding, identity)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_control_plane_core::IdentityKind;
    use cf_control_plane_test::{fixtures, MemoryStore};

    const ORG_USER: &str = "korifi-controllers-organization-user";
    const SPACE_DEVELOPER: &str = "korifi-controllers-space-developer";
    const ROOT_USER: &str = "korifi-controllers-root-namespace-user";

    fn alice() -> Identity {
        Identity {
            name: "alice".to_string(),
            guid: String::new(),
            kind: IdentityKind::User,
        }
    }

    async fn seeded() -> (MemoryStore, NamespacePermissions<MemoryStore>) {
        let store = MemoryStore::new();
        for org in ["o1", "o2"] {
            store.create(&fixtures::org(org, org)).await.unwrap();
        }
        store.create(&fixtures::space("o1", "s1", "s1")).await.unwrap();
        store.create(&fixtures::space("o1", "s2", "s2")).await.unwrap();

        let perms = NamespacePermissions::new(
            store.clone(),
            fixtures::ROOT_NAMESPACE,
            Arc::new(RoleMappings::default()),
        );
        (store, perms)
    }

    #[tokio::test]
    async fn empty_without_bindings() {
        let (_store, perms) = seeded().await;
        assert!(perms.authorized_org_namespaces(&alice()).await.unwrap().is_empty());
        assert!(perms
            .authorized_space_namespaces(&alice())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn collects_bound_namespaces() {
        let (store, perms) = seeded().await;
        for binding in [
            fixtures::role_binding("o1", "b1", "alice", ORG_USER),
            fixtures::role_binding("s1", "b2", "alice", SPACE_DEVELOPER),
            // Another principal.
            fixtures::role_binding("o2", "b3", "bob", ORG_USER),
            // Not a configured org or space role.
            fixtures::role_binding("s2", "b4", "alice", "view"),
            // Not an org namespace.
            fixtures::role_binding("elsewhere", "b5", "alice", ORG_USER),
            // Root-level role without propagation.
            fixtures::role_binding("o2", "b6", "alice", ROOT_USER),
        ] {
            store.create(&binding).await.unwrap();
        }

        assert_eq!(
            perms.authorized_org_namespaces(&alice()).await.unwrap(),
            BTreeSet::from(["o1".to_string()])
        );
        assert_eq!(
            perms.authorized_space_namespaces(&alice()).await.unwrap(),
            BTreeSet::from(["s1".to_string()])
        );
    }

    #[tokio::test]
    async fn subject_kind_must_match() {
        let (store, perms) = seeded().await;
        store
            .create(&fixtures::role_binding("o1", "b1", "alice", ORG_USER))
            .await
            .unwrap();

        let service_account = Identity {
            kind: IdentityKind::ServiceAccount,
            ..alice()
        };
        assert!(perms
            .authorized_org_namespaces(&service_account)
            .await
            .unwrap()
            .is_empty());
        assert!(!perms.authorized_in(&service_account, "o1").await.unwrap());
        assert!(perms.authorized_in(&alice(), "o1").await.unwrap());
        assert!(!perms.authorized_in(&alice(), "o2").await.unwrap());
    }
}
