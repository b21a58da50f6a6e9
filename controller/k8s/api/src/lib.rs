#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod app;
pub mod build;
pub mod conditions;
pub mod domain;
pub mod labels;
pub mod org;
pub mod package;
pub mod process;
pub mod route;
pub mod service_binding;
pub mod service_instance;
pub mod space;
pub mod workload;

pub use self::{
    app::{CFApp, CFAppSpec, CFAppStatus, DesiredState, Lifecycle, LifecycleType},
    build::{BuildDropletStatus, CFBuild, CFBuildSpec, CFBuildStatus, Registry},
    conditions::{Condition, HasConditions},
    domain::{CFDomain, CFDomainSpec},
    org::{CFOrg, CFOrgSpec, CFOrgStatus},
    package::{CFPackage, CFPackageSpec, CFPackageStatus, PackageSource, PackageType},
    process::{
        CFProcess, CFProcessSpec, CFProcessStatus, HealthCheck, HealthCheckData, HealthCheckType,
    },
    route::{CFRoute, CFRouteSpec, CFRouteStatus, Destination},
    service_binding::{
        CFServiceBinding, CFServiceBindingSpec, CFServiceBindingStatus, ServiceReference,
    },
    service_instance::{
        CFServiceInstance, CFServiceInstanceSpec, CFServiceInstanceStatus, InstanceType,
    },
    space::{CFSpace, CFSpaceSpec, CFSpaceStatus},
    workload::{AppWorkload, AppWorkloadSpec, EnvVar, Probe, ResourceRequirements},
};
pub use k8s_openapi::{
    api::{
        self,
        authentication::v1::{TokenReview, TokenReviewSpec, TokenReviewStatus, UserInfo},
        core::v1::{Namespace, Secret},
        rbac::v1::{RoleBinding, RoleRef, Subject},
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{OwnerReference, Time},
        util::intstr::IntOrString,
    },
    ByteString,
};
pub use kube::{
    api::{Api, ObjectMeta, ResourceExt},
    Client, Error, Resource,
};

pub const GROUP: &str = "korifi.cloudfoundry.org";
pub const API_VERSION: &str = "korifi.cloudfoundry.org/v1alpha1";

/// A reference to an object in the same namespace.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
pub struct LocalObjectReference {
    pub name: String,
}

/// Returns true when the object carries a deletion timestamp.
pub fn is_deleting<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}
