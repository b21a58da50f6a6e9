#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Request authorization: who the caller is, and which org and space
//! namespaces they may act within.

mod identity;
mod namespaces;
mod permissions;

pub use self::{
    identity::IdentityResolver,
    namespaces::{Location, NamespaceRetriever},
    permissions::{has_subject, AuthorizedInChecker, NamespacePermissions},
};
