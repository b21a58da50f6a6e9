use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// The role type granted to every user holding an org role.
pub const CF_USER: &str = "cf_user";

const BINDING_NAME_PREFIX: &str = "cf-";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleLevel {
    #[default]
    Cluster,
    Org,
    Space,
}

/// A configured role type: the cluster role it grants and where it applies.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub level: RoleLevel,
    #[serde(default)]
    pub propagate: bool,
}

/// Maps CF role types (e.g. `space_developer`) to cluster roles.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RoleMappings(BTreeMap<String, Role>);

/// Computes the name of the role binding for a role type and principal.
///
/// This must stay stable: bindings created by earlier releases are found by
/// recomputing their names.
pub fn binding_name(role_type: &str, principal: &str) -> String {
    let digest = Sha256::digest(format!("{role_type}::{principal}").as_bytes());
    format!("{BINDING_NAME_PREFIX}{}", hex::encode(digest))
}

// === impl RoleMappings ===

impl RoleMappings {
    pub fn get(&self, role_type: &str) -> Option<&Role> {
        self.0.get(role_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Role)> {
        self.0.iter().map(|(t, r)| (t.as_str(), r))
    }

    /// Finds the role type granting a cluster role. The `cf_user` type is
    /// only returned when no other type maps to the same cluster role.
    pub fn role_type_for(&self, cluster_role: &str) -> Option<&str> {
        let mut found = None;
        for (role_type, role) in self.iter() {
            if role.name != cluster_role {
                continue;
            }
            if role_type != CF_USER {
                return Some(role_type);
            }
            found = Some(role_type);
        }
        found
    }

    /// Whether a binding to this cluster role grants access to an org or space
    /// namespace.
    pub fn grants_namespace_access(&self, cluster_role: &str) -> bool {
        self.0.values().any(|role| {
            role.name == cluster_role
                && (matches!(role.level, RoleLevel::Org | RoleLevel::Space) || role.propagate)
        })
    }
}

impl Default for RoleMappings {
    fn default() -> Self {
        let role = |name: &str, level, propagate| Role {
            name: format!("korifi-controllers-{name}"),
            level,
            propagate,
        };
        Self(
            [
                ("admin", role("admin", RoleLevel::Cluster, true)),
                (
                    "admin_read_only",
                    role("admin-read-only", RoleLevel::Cluster, true),
                ),
                (
                    "global_auditor",
                    role("global-auditor", RoleLevel::Cluster, true),
                ),
                (
                    CF_USER,
                    role("root-namespace-user", RoleLevel::Cluster, false),
                ),
                (
                    "organization_manager",
                    role("organization-manager", RoleLevel::Org, true),
                ),
                (
                    "organization_auditor",
                    role("organization-auditor", RoleLevel::Org, false),
                ),
                (
                    "organization_billing_manager",
                    role("organization-billing-manager", RoleLevel::Org, false),
                ),
                (
                    "organization_user",
                    role("organization-user", RoleLevel::Org, false),
                ),
                (
                    "space_developer",
                    role("space-developer", RoleLevel::Space, false),
                ),
                ("space_manager", role("space-manager", RoleLevel::Space, false)),
                ("space_auditor", role("space-auditor", RoleLevel::Space, false)),
                (
                    "space_supporter",
                    role("space-supporter", RoleLevel::Space, false),
                ),
            ]
            .into_iter()
            .map(|(t, r)| (t.to_string(), r))
            .collect(),
        )
    }
}

impl FromIterator<(String, Role)> for RoleMappings {
    fn from_iter<T: IntoIterator<Item = (String, Role)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_names_are_stable() {
        let cases = [
            (
                "organization_manager",
                "myuser@example.com",
                "cf-172b9594a1f617258057870643bce8476179a4078845cb4d9d44171d7a8b648b",
            ),
            (
                "cf_user",
                "myuser@example.com",
                "cf-156eb9a28b4143e61a5b43fb7e7a6b8de98495aa4b5da4ba871dc4eaa4c35433",
            ),
            (
                "organization_user",
                "myuser@example.com",
                "cf-2a6f4cbdd1777d57b5b7b2ee835785dafa68c147719c10948397cfc2ea7246a3",
            ),
            (
                "organization_manager",
                "my-service-account",
                "cf-6af123f3cf60cbba6c34bfa5f13314151ba309a9d7a9a19464aa052c773542e0",
            ),
            (
                "space_developer",
                "myuser@example.com",
                "cf-94662df3659074e12fbb2a05fbda554db8fd0bf2f59394874412ebb0dddf6ba4",
            ),
        ];
        for (role_type, principal, expected) in cases {
            assert_eq!(binding_name(role_type, principal), expected);
            assert_eq!(binding_name(role_type, principal), expected);
        }
    }

    #[test]
    fn parses_yaml_mappings() {
        let mappings: RoleMappings = serde_yaml::from_str(
            r#"
admin:
  name: cf-admin
  propagate: true
cf_user:
  name: cf-root-user
space_developer:
  name: cf-space-developer
  level: space
"#,
        )
        .expect("mappings must parse");

        let developer = mappings.get("space_developer").expect("space_developer");
        assert_eq!(developer.level, RoleLevel::Space);
        assert!(!developer.propagate);
        assert_eq!(mappings.get("admin").unwrap().level, RoleLevel::Cluster);
        assert!(mappings.get("organization_user").is_none());

        assert!(mappings.grants_namespace_access("cf-admin"));
        assert!(mappings.grants_namespace_access("cf-space-developer"));
        assert!(!mappings.grants_namespace_access("cf-root-user"));
        assert!(!mappings.grants_namespace_access("unknown"));
    }

    #[test]
    fn reverse_lookup_prefers_non_root_types() {
        let mappings: RoleMappings = [
            (
                CF_USER.to_string(),
                Role {
                    name: "shared".to_string(),
                    level: RoleLevel::Cluster,
                    propagate: false,
                },
            ),
            (
                "organization_user".to_string(),
                Role {
                    name: "shared".to_string(),
                    level: RoleLevel::Org,
                    propagate: false,
                },
            ),
        ]
        .into_iter()
        .collect();
        assert_eq!(mappings.role_type_for("shared"), Some("organization_user"));
        assert_eq!(
            RoleMappings::default().role_type_for("korifi-controllers-root-namespace-user"),
            Some(CF_USER)
        );
        assert_eq!(mappings.role_type_for("other"), None);
    }
}
