#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod error;
pub mod identity;
pub mod metadata;
pub mod role;
pub mod store;
pub mod wait;

pub use self::{
    error::ApiError,
    identity::{AuthInfo, ClientFactory, Identity, IdentityKind, Token, TokenReviewer},
    metadata::MetadataPatch,
    role::{Role, RoleLevel, RoleMappings},
    store::{Labels, Object, Store, StoreError, WatchEvent, WatchStream},
};
pub use cf_control_plane_k8s_api as k8s;

/// Field manager recorded on every write made by the control plane.
pub const FIELD_MANAGER: &str = "cf-control-plane";
