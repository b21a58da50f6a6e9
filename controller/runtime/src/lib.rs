#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use cf_control_plane_core as core;
pub use cf_control_plane_k8s_store as k8s_store;
pub use cf_control_plane_reconcilers as reconcilers;

mod args;
pub mod config;

pub use self::{args::Args, config::ControllerConfig};
