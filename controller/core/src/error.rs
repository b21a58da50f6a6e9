use crate::store::StoreError;

/// Errors surfaced by repositories and the identity resolver.
///
/// Each error is classified once, where it is produced, and passed upward
/// unchanged in kind.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid auth: {0}")]
    InvalidAuth(String),

    #[error("{resource} forbidden")]
    Forbidden {
        resource: String,
        #[source]
        source: Option<StoreError>,
    },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("{detail}")]
    UnprocessableEntity { detail: String },

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{message}")]
    Timeout { message: String },

    #[error("{context}: {source}")]
    Unknown {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

// === impl ApiError ===

impl ApiError {
    pub fn not_found(resource: impl ToString) -> Self {
        Self::NotFound {
            resource: resource.to_string(),
        }
    }

    pub fn forbidden(resource: impl ToString) -> Self {
        Self::Forbidden {
            resource: resource.to_string(),
            source: None,
        }
    }

    pub fn unprocessable(detail: impl ToString) -> Self {
        Self::UnprocessableEntity {
            detail: detail.to_string(),
        }
    }

    pub fn unknown(context: impl ToString, source: impl Into<anyhow::Error>) -> Self {
        Self::Unknown {
            context: context.to_string(),
            source: source.into(),
        }
    }

    /// Classifies a store error for the named resource type.
    pub fn from_store(error: StoreError, resource: &str) -> Self {
        match error {
            StoreError::NotFound { .. } => Self::not_found(resource),
            StoreError::Forbidden(_) => Self::Forbidden {
                resource: resource.to_string(),
                source: Some(error),
            },
            StoreError::Unauthorized(message) => Self::InvalidAuth(message),
            StoreError::AlreadyExists { .. }
            | StoreError::Conflict { .. }
            | StoreError::Invalid { .. } => {
                Self::unprocessable(error.to_string())
            }
            error => Self::unknown(format!("{resource} request failed"), error),
        }
    }

    /// Hides the existence of resources the caller may not see.
    pub fn forbidden_as_not_found(self) -> Self {
        match self {
            Self::Forbidden { resource, .. } => Self::NotFound { resource },
            error => error,
        }
    }

    /// Adds context to transport errors, leaving classified errors as they are.
    pub fn wrap(self, context: impl std::fmt::Display) -> Self {
        match self {
            Self::Unknown {
                context: inner,
                source,
            } => Self::Unknown {
                context: format!("{context}: {inner}"),
                source,
            },
            error => error,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }
}
