use cf_control_plane_core::{
    k8s::{TokenReviewStatus, UserInfo},
    StoreError, TokenReviewer,
};
use std::collections::HashMap;

/// Answers token reviews from a fixed table of known tokens.
#[derive(Clone, Debug, Default)]
pub struct FakeTokenReviewer {
    users: HashMap<String, UserInfo>,
    unavailable: bool,
}

impl FakeTokenReviewer {
    pub fn user(mut self, token: impl ToString, username: impl ToString) -> Self {
        self.users.insert(
            token.to_string(),
            UserInfo {
                username: Some(username.to_string()),
                ..Default::default()
            },
        );
        self
    }

    /// Registers a token whose principal is in the service-account group.
    /// `username` is reported verbatim.
    pub fn service_account(mut self, token: impl ToString, username: impl ToString) -> Self {
        self.users.insert(
            token.to_string(),
            UserInfo {
                username: Some(username.to_string()),
                groups: Some(vec![
                    "system:serviceaccounts".to_string(),
                    "system:authenticated".to_string(),
                ]),
                ..Default::default()
            },
        );
        self
    }

    /// Makes every review fail as if the API server were unreachable.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }
}

#[async_trait::async_trait]
impl TokenReviewer for FakeTokenReviewer {
    async fn review(&self, token: &str) -> Result<TokenReviewStatus, StoreError> {
        if self.unavailable {
            return Err(StoreError::Other(anyhow::anyhow!("connection refused")));
        }
        Ok(match self.users.get(token) {
            Some(user) => TokenReviewStatus {
                authenticated: Some(true),
                user: Some(user.clone()),
                ..Default::default()
            },
            None => TokenReviewStatus {
                authenticated: Some(false),
                error: Some("invalid bearer token".to_string()),
                ..Default::default()
            },
        })
    }
}
