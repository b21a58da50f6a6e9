#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Controllers that converge CF resources into the cluster objects backing
//! them.

pub mod controller;
pub mod env;
mod error;
mod namespace;
pub mod org;
mod patch;
pub mod process;
mod propagate;
pub mod service_binding;
pub mod space;

pub use self::{
    controller::{Metrics, Reconcile},
    error::Error,
    namespace::{NamespaceOwner, NamespaceReconciler},
    org::OrgReconciler,
    process::ProcessReconciler,
    service_binding::ServiceBindingReconciler,
    space::SpaceReconciler,
};
