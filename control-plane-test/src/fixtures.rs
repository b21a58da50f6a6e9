//! Builders for the objects tests seed into a [`crate::MemoryStore`].

use cf_control_plane_core::k8s::{
    conditions::{self, READY},
    labels, BuildDropletStatus, CFApp, CFAppSpec, CFBuild, CFBuildSpec, CFBuildStatus, CFOrg,
    CFOrgSpec, CFProcess, CFProcessSpec, CFSpace, CFSpaceSpec, DesiredState, HasConditions,
    HealthCheck, Lifecycle, LifecycleType, LocalObjectReference, Namespace, ObjectMeta, Registry,
    RoleBinding, RoleRef, Subject,
};
use maplit::btreemap;

pub const ROOT_NAMESPACE: &str = "cf";

pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: meta(None, name),
        ..Default::default()
    }
}

/// An org whose resource name (and backing namespace) is `name`.
pub fn org(name: &str, display_name: &str) -> CFOrg {
    let mut metadata = meta(Some(ROOT_NAMESPACE), name);
    metadata.labels = Some(btreemap! {
        labels::ORG_GUID.to_string() => labels::guid_from_name(name),
    });
    CFOrg {
        metadata,
        spec: CFOrgSpec {
            display_name: display_name.to_string(),
        },
        status: None,
    }
}

pub fn space(org: &str, name: &str, display_name: &str) -> CFSpace {
    let mut metadata = meta(Some(org), name);
    metadata.labels = Some(btreemap! {
        labels::ORG_GUID.to_string() => labels::guid_from_name(org),
        labels::SPACE_GUID.to_string() => labels::guid_from_name(name),
    });
    CFSpace {
        metadata,
        spec: CFSpaceSpec {
            display_name: display_name.to_string(),
        },
        status: None,
    }
}

/// Binds `user` to `cluster_role` in `namespace`.
pub fn role_binding(namespace: &str, name: &str, user: &str, cluster_role: &str) -> RoleBinding {
    RoleBinding {
        metadata: meta(Some(namespace), name),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: cluster_role.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "User".to_string(),
            name: user.to_string(),
            ..Default::default()
        }]),
    }
}

/// A role binding that the org and space reconcilers copy into child
/// namespaces.
pub fn propagated_role_binding(
    namespace: &str,
    name: &str,
    user: &str,
    cluster_role: &str,
) -> RoleBinding {
    let mut binding = role_binding(namespace, name, user, cluster_role);
    binding.metadata.annotations = Some(btreemap! {
        labels::PROPAGATE_ROLE_BINDING.to_string() => "true".to_string(),
    });
    binding
}

pub fn app(space: &str, name: &str, state: DesiredState, revision: &str) -> CFApp {
    let mut metadata = meta(Some(space), name);
    metadata.labels = Some(btreemap! {
        labels::SPACE_GUID.to_string() => space.to_string(),
    });
    metadata.annotations = Some(btreemap! {
        labels::APP_REVISION.to_string() => revision.to_string(),
    });
    CFApp {
        metadata,
        spec: CFAppSpec {
            display_name: format!("{name}-display"),
            desired_state: state,
            lifecycle: Lifecycle {
                type_: LifecycleType::Buildpack,
            },
            current_droplet_ref: Some(LocalObjectReference {
                name: format!("{name}-build"),
            }),
            env_secret_name: String::new(),
        },
        status: None,
    }
}

/// A staged build for `app`, named as [`app`] expects its droplet.
pub fn build(space: &str, app: &str, image: &str) -> CFBuild {
    CFBuild {
        metadata: meta(Some(space), &format!("{app}-build")),
        spec: CFBuildSpec {
            app_ref: LocalObjectReference {
                name: app.to_string(),
            },
            package_ref: None,
        },
        status: Some(CFBuildStatus {
            conditions: vec![],
            droplet: Some(BuildDropletStatus {
                registry: Registry {
                    image: image.to_string(),
                    image_pull_secrets: vec![LocalObjectReference {
                        name: "registry-secret".to_string(),
                    }],
                },
                ports: vec![],
            }),
        }),
    }
}

pub fn process(space: &str, name: &str, app: &str, instances: i32) -> CFProcess {
    let mut metadata = meta(Some(space), name);
    metadata.labels = Some(btreemap! {
        labels::APP_GUID.to_string() => app.to_string(),
    });
    CFProcess {
        metadata,
        spec: CFProcessSpec {
            app_ref: LocalObjectReference {
                name: app.to_string(),
            },
            process_type: "web".to_string(),
            command: "bundle exec rackup".to_string(),
            detected_command: String::new(),
            health_check: HealthCheck::default(),
            desired_instances: Some(instances),
            memory_mb: 1024,
            disk_quota_mb: 512,
            ports: vec![8080],
        },
        status: None,
    }
}

/// Marks an object `Ready`, as its reconciler would.
pub fn ready<K: HasConditions>(mut obj: K) -> K {
    conditions::set(obj.conditions_mut(), conditions::new(READY, true, READY));
    obj
}

fn meta(namespace: Option<&str>, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: namespace.map(str::to_string),
        name: Some(name.to_string()),
        ..Default::default()
    }
}
