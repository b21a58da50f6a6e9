use crate::{org::OrgRepository, space::SpaceRepository, timestamps, Context};
use cf_control_plane_authz::AuthorizedInChecker;
use cf_control_plane_core::{
    k8s::{labels, ObjectMeta, ResourceExt, RoleBinding, RoleRef, Subject},
    role::{binding_name, CF_USER},
    ApiError, AuthInfo, ClientFactory, Identity, IdentityKind, Labels, RoleMappings, Store,
};
use std::sync::Arc;

const RESOURCE: &str = "Role";
const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateRoleMessage {
    pub guid: String,
    pub type_: String,
    pub user: String,
    pub kind: IdentityKind,
    pub service_account_namespace: Option<String>,
    /// Org GUID, for org roles.
    pub org: Option<String>,
    /// Space GUID, for space roles.
    pub space: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleRecord {
    pub guid: String,
    pub type_: String,
    pub user: String,
    pub kind: String,
    pub org: Option<String>,
    pub space: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Grants CF roles by creating role bindings.
#[derive(Clone)]
pub struct RoleRepository<F, S, C> {
    ctx: Context<F, S>,
    orgs: OrgRepository<F, S>,
    spaces: SpaceRepository<F, S>,
    checker: C,
    roles: Arc<RoleMappings>,
}

enum Scope {
    Org { guid: String, namespace: String },
    Space { guid: String, namespace: String },
}

// === impl RoleRepository ===

impl<F, S, C> RoleRepository<F, S, C>
where
    F: ClientFactory,
    S: Store,
    C: AuthorizedInChecker,
{
    pub fn new(ctx: Context<F, S>, roles: Arc<RoleMappings>, checker: C) -> Self {
        Self {
            orgs: OrgRepository::new(ctx.clone()),
            spaces: SpaceRepository::new(ctx.clone()),
            ctx,
            checker,
            roles,
        }
    }

    /// Binds a principal to a role in an org or space.
    ///
    /// A space role may only be granted to a principal that already holds a
    /// role in the space's org. Granting any org role also grants the
    /// `cf_user` role in the root namespace.
    pub async fn create_role(
        &self,
        auth: &AuthInfo,
        message: CreateRoleMessage,
    ) -> Result<RoleRecord, ApiError> {
        let role = self.roles.get(&message.type_).ok_or_else(|| {
            ApiError::InvalidRequest(format!("invalid role type: {:?}", message.type_))
        })?;
        let principal = Identity {
            name: message.user.clone(),
            guid: String::new(),
            kind: message.kind,
        };
        let scope = self.resolve_scope(auth, &message, &principal).await?;
        let namespace = match &scope {
            Scope::Org { namespace, .. } | Scope::Space { namespace, .. } => namespace.clone(),
        };

        let store = self.ctx.user_store(auth)?;
        let binding = self.role_binding(
            &namespace,
            &message,
            &role.name,
            role.propagate,
        );
        let created = store.create(&binding).await.map_err(|error| {
            if error.is_already_exists() {
                ApiError::unprocessable(format!(
                    "User '{}' already has '{}' role",
                    message.user, message.type_
                ))
            } else {
                ApiError::from_store(error, RESOURCE).wrap("failed to create role binding")
            }
        })?;
        tracing::info!(
            role = %message.type_,
            user = %message.user,
            %namespace,
            binding = %created.name_any(),
            "Created role binding"
        );

        if let Scope::Org { .. } = scope {
            self.ensure_cf_user(&store, &message).await?;
        }

        let (created_at, updated_at) = timestamps(&created.metadata);
        let (org, space) = match scope {
            Scope::Org { guid, .. } => (Some(guid), None),
            Scope::Space { guid, .. } => (None, Some(guid)),
        };
        Ok(RoleRecord {
            guid: message.guid,
            type_: message.type_,
            user: message.user,
            kind: message.kind.to_string(),
            org,
            space,
            created_at,
            updated_at,
        })
    }

    /// Lists the roles bound in the orgs and spaces the caller holds a role
    /// in. Propagated copies and bindings to unknown cluster roles are
    /// omitted.
    pub async fn list_roles(&self, auth: &AuthInfo) -> Result<Vec<RoleRecord>, ApiError> {
        let permissions = self.ctx.permissions();
        let orgs = permissions.authorized_org_namespaces(&auth.identity).await?;
        let spaces = permissions.authorized_space_namespaces(&auth.identity).await?;
        let store = self.ctx.user_store(auth)?;

        let mut records = Vec::new();
        for namespace in orgs.iter().chain(&spaces) {
            if namespace == self.ctx.root_namespace() {
                continue;
            }
            let bindings = match store.list::<RoleBinding>(Some(namespace), &Labels::new()).await {
                Ok(bindings) => bindings,
                Err(error) if error.is_forbidden() => continue,
                Err(error) => {
                    return Err(
                        ApiError::from_store(error, RESOURCE).wrap("failed to list role bindings")
                    )
                }
            };
            let is_org = orgs.contains(namespace);
            records.extend(
                bindings
                    .into_iter()
                    .filter_map(|binding| self.role_record(binding, namespace, is_org)),
            );
        }
        Ok(records)
    }

    async fn resolve_scope(
        &self,
        auth: &AuthInfo,
        message: &CreateRoleMessage,
        principal: &Identity,
    ) -> Result<Scope, ApiError> {
        if let Some(space_guid) = &message.space {
            let space = match self.spaces.get_space(auth, space_guid).await {
                Ok(space) => space,
                Err(error) if error.is_not_found() || error.is_forbidden() => {
                    return Err(ApiError::unprocessable(
                        "Invalid space. Ensure that the space exists and you have access to it.",
                    ))
                }
                Err(error) => return Err(error),
            };

            let in_org = self
                .checker
                .authorized_in(principal, &space.org_namespace)
                .await
                .map_err(|error| ApiError::unknown("failed to check for role in parent org", error))?;
            if !in_org {
                return Err(ApiError::unprocessable("no RoleBinding found for parent org"));
            }

            return Ok(Scope::Space {
                guid: space.guid,
                namespace: space.namespace,
            });
        }

        if let Some(org_guid) = &message.org {
            let org = match self.orgs.get_org(auth, org_guid).await {
                Ok(org) => org,
                Err(error) if error.is_not_found() || error.is_forbidden() => {
                    return Err(ApiError::unprocessable(
                        "Invalid organization. Ensure that the organization exists and you have access to it.",
                    ))
                }
                Err(error) => return Err(error),
            };
            return Ok(Scope::Org {
                guid: org.guid,
                namespace: org.namespace,
            });
        }

        Err(ApiError::InvalidRequest(
            "a role must target an org or a space".to_string(),
        ))
    }

    /// Grants `cf_user` in the root namespace. An existing grant is kept.
    async fn ensure_cf_user(
        &self,
        store: &F::Store,
        message: &CreateRoleMessage,
    ) -> Result<(), ApiError> {
        let role = self.roles.get(CF_USER).ok_or_else(|| {
            ApiError::unknown(
                "failed to create root namespace role binding",
                anyhow::anyhow!("no {CF_USER} role is configured"),
            )
        })?;
        let message = CreateRoleMessage {
            type_: CF_USER.to_string(),
            ..message.clone()
        };
        let binding = self.role_binding(self.ctx.root_namespace(), &message, &role.name, false);
        match store.create(&binding).await {
            Ok(_) => Ok(()),
            Err(error) if error.is_already_exists() => {
                tracing::debug!(user = %message.user, "Root namespace role binding exists");
                Ok(())
            }
            Err(error) => Err(ApiError::from_store(error, RESOURCE)
                .wrap("failed to create root namespace role binding")),
        }
    }

    fn role_binding(
        &self,
        namespace: &str,
        message: &CreateRoleMessage,
        cluster_role: &str,
        propagate: bool,
    ) -> RoleBinding {
        let subject = match message.kind {
            IdentityKind::User => Subject {
                api_group: Some(RBAC_GROUP.to_string()),
                kind: message.kind.to_string(),
                name: message.user.clone(),
                namespace: None,
            },
            IdentityKind::ServiceAccount => Subject {
                api_group: None,
                kind: message.kind.to_string(),
                name: message.user.clone(),
                namespace: message.service_account_namespace.clone(),
            },
        };
        RoleBinding {
            metadata: ObjectMeta {
                name: Some(binding_name(&message.type_, &message.user)),
                namespace: Some(namespace.to_string()),
                labels: Some(Labels::from([(
                    labels::ROLE_GUID.to_string(),
                    message.guid.clone(),
                )])),
                annotations: Some(Labels::from([(
                    labels::PROPAGATE_ROLE_BINDING.to_string(),
                    propagate.to_string(),
                )])),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: RBAC_GROUP.to_string(),
                kind: "ClusterRole".to_string(),
                name: cluster_role.to_string(),
            },
            subjects: Some(vec![subject]),
        }
    }

    fn role_record(&self, binding: RoleBinding, namespace: &str, is_org: bool) -> Option<RoleRecord> {
        if binding.labels().contains_key(labels::PROPAGATED_FROM) {
            return None;
        }
        let type_ = self.roles.role_type_for(&binding.role_ref.name)?.to_string();
        let subject = binding.subjects.as_ref()?.first()?.clone();
        let (created_at, updated_at) = timestamps(&binding.metadata);
        let guid = binding
            .labels()
            .get(labels::ROLE_GUID)
            .cloned()
            .or_else(|| binding.uid())
            .unwrap_or_else(|| binding.name_any());
        let scope = Some(labels::guid_from_name(namespace));
        let (org, space) = if is_org { (scope, None) } else { (None, scope) };
        Some(RoleRecord {
            guid,
            type_,
            user: subject.name,
            kind: subject.kind,
            org,
            space,
            created_at,
            updated_at,
        })
    }
}
