use cf_control_plane_core::StoreError;

/// A failed reconciliation. Every variant is retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("CFApp {app} has no current droplet")]
    NoCurrentDroplet { app: String },

    #[error("no build droplet status on CFBuild")]
    NoBuildDroplet,

    #[error("unable to locate {kind} with guid {guid:?}")]
    Unlocatable { kind: String, guid: String },
}
