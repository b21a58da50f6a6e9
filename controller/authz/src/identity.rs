use cf_control_plane_core::{ApiError, AuthInfo, Identity, IdentityKind, Token, TokenReviewer};
use std::sync::Arc;

const SERVICE_ACCOUNTS_GROUP: &str = "system:serviceaccounts";
const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

/// Exchanges bearer tokens for verified identities.
#[derive(Clone)]
pub struct IdentityResolver<R> {
    reviewer: Arc<R>,
}

// === impl IdentityResolver ===

impl<R: TokenReviewer> IdentityResolver<R> {
    pub fn new(reviewer: R) -> Self {
        Self {
            reviewer: Arc::new(reviewer),
        }
    }

    /// Parses and verifies a raw bearer token.
    pub async fn authenticate(&self, raw: &str) -> Result<AuthInfo, ApiError> {
        let token = Token::parse(raw);
        let identity = self.who_am_i(&token).await?;
        Ok(AuthInfo { identity, token })
    }

    pub async fn who_am_i(&self, token: &Token) -> Result<Identity, ApiError> {
        let status = self
            .reviewer
            .review(token.as_str())
            .await
            .map_err(|error| {
                ApiError::from_store(error, "TokenReview").wrap("failed to create token review")
            })?;

        if !status.authenticated.unwrap_or(false) {
            tracing::debug!(error = ?status.error, "Token review rejected the token");
            return Err(ApiError::InvalidAuth("not authenticated".to_string()));
        }

        let user = status.user.unwrap_or_default();
        let username = user.username.unwrap_or_default();
        let is_service_account = user
            .groups
            .iter()
            .flatten()
            .any(|group| group == SERVICE_ACCOUNTS_GROUP);

        let (kind, name) = if is_service_account {
            if !username.starts_with(SERVICE_ACCOUNT_PREFIX) {
                return Err(ApiError::unknown(
                    "invalid serviceaccount name",
                    anyhow::anyhow!("{username:?}"),
                ));
            }
            let name = username.rsplit(':').next().unwrap_or_default().to_string();
            (IdentityKind::ServiceAccount, name)
        } else {
            (IdentityKind::User, username)
        };

        Ok(Identity {
            name,
            guid: token.claim("user_id").unwrap_or_default().to_string(),
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use cf_control_plane_test::FakeTokenReviewer;

    fn jwt_with_user_id(user_id: &str) -> String {
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        format!(
            "{}.{}.{}",
            engine.encode(r#"{"alg":"none"}"#),
            engine.encode(format!(r#"{{"user_id":"{user_id}"}}"#)),
            engine.encode("sig"),
        )
    }

    #[tokio::test]
    async fn resolves_users() {
        let resolver = IdentityResolver::new(FakeTokenReviewer::default().user("t1", "alice"));
        let identity = resolver.who_am_i(&Token::parse("t1")).await.unwrap();
        assert_eq!(
            identity,
            Identity {
                name: "alice".to_string(),
                guid: String::new(),
                kind: IdentityKind::User,
            }
        );
    }

    #[tokio::test]
    async fn claims_tokens_carry_a_guid() {
        let raw = jwt_with_user_id("user-guid");
        let resolver = IdentityResolver::new(FakeTokenReviewer::default().user(&raw, "alice"));
        let auth = resolver.authenticate(&raw).await.unwrap();
        assert_eq!(auth.identity.guid, "user-guid");
        assert_eq!(auth.identity.kind, IdentityKind::User);
    }

    #[tokio::test]
    async fn resolves_service_accounts() {
        let resolver = IdentityResolver::new(
            FakeTokenReviewer::default()
                .service_account("sa", "system:serviceaccount:cf:deployer"),
        );
        let identity = resolver.who_am_i(&Token::parse("sa")).await.unwrap();
        assert_eq!(identity.kind, IdentityKind::ServiceAccount);
        assert_eq!(identity.name, "deployer");
    }

    #[tokio::test]
    async fn rejects_malformed_service_account_names() {
        let resolver =
            IdentityResolver::new(FakeTokenReviewer::default().service_account("sa", "deployer"));
        let error = resolver.who_am_i(&Token::parse("sa")).await.unwrap_err();
        assert!(matches!(error, ApiError::Unknown { .. }), "{error}");
        assert_eq!(error.to_string(), r#"invalid serviceaccount name: "deployer""#);
    }

    #[tokio::test]
    async fn unknown_tokens_are_invalid_auth() {
        let resolver = IdentityResolver::new(FakeTokenReviewer::default());
        let error = resolver.who_am_i(&Token::parse("nope")).await.unwrap_err();
        assert!(matches!(error, ApiError::InvalidAuth(_)), "{error}");
    }

    #[tokio::test]
    async fn review_failures_are_wrapped() {
        let resolver = IdentityResolver::new(FakeTokenReviewer::default().unavailable());
        let error = resolver.who_am_i(&Token::parse("t1")).await.unwrap_err();
        assert!(
            error.to_string().starts_with("failed to create token review"),
            "{error}"
        );
    }
}
