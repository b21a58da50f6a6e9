use crate::store::{Store, StoreError};
use base64::Engine;
use cf_control_plane_k8s_api::TokenReviewStatus;
use serde_json::{Map, Value};
use std::fmt;

/// The verified caller of a request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Identity {
    pub name: String,
    pub guid: String,
    pub kind: IdentityKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    User,
    ServiceAccount,
}

pub type ClaimSet = Map<String, Value>;

/// A bearer credential.
///
/// Tokens that look like JWTs carry their decoded claims. Signatures are not
/// checked here; the cluster verifies the token.
#[derive(Clone, PartialEq)]
pub enum Token {
    Opaque(String),
    Claims(String, ClaimSet),
}

/// An authenticated request: the caller's identity and the credential used to
/// act on their behalf.
#[derive(Clone, Debug)]
pub struct AuthInfo {
    pub identity: Identity,
    pub token: Token,
}

/// Verifies bearer tokens with the cluster's authentication subsystem.
#[async_trait::async_trait]
pub trait TokenReviewer: Send + Sync + 'static {
    async fn review(&self, token: &str) -> Result<TokenReviewStatus, StoreError>;
}

/// Builds stores that act with the caller's credentials.
pub trait ClientFactory: Clone + Send + Sync + 'static {
    type Store: Store;

    fn for_token(&self, token: &Token) -> Result<Self::Store, StoreError>;
}

// === impl IdentityKind ===

impl IdentityKind {
    /// The RBAC subject kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::ServiceAccount => "ServiceAccount",
        }
    }

    pub fn from_subject_kind(kind: &str) -> Option<Self> {
        match kind {
            "User" => Some(Self::User),
            "ServiceAccount" => Some(Self::ServiceAccount),
            _ => None,
        }
    }
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Token ===

impl Token {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        match decode_claims(&raw) {
            Some(claims) => Self::Claims(raw, claims),
            None => Self::Opaque(raw),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Opaque(raw) | Self::Claims(raw, _) => raw,
        }
    }

    /// Returns a string claim. Opaque tokens have no claims.
    pub fn claim(&self, key: &str) -> Option<&str> {
        match self {
            Self::Opaque(_) => None,
            Self::Claims(_, claims) => claims.get(key).and_then(Value::as_str),
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opaque(_) => f.write_str("Opaque(..)"),
            Self::Claims(_, claims) => f
                .debug_tuple("Claims")
                .field(&"..")
                .field(&claims.keys().collect::<Vec<_>>())
                .finish(),
        }
    }
}

fn decode_claims(raw: &str) -> Option<ClaimSet> {
    let mut segments = raw.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    match serde_json::from_slice(&bytes).ok()? {
        Value::Object(claims) => Some(claims),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(payload: &str) -> String {
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        format!(
            "{}.{}.{}",
            engine.encode(r#"{"alg":"RS256"}"#),
            engine.encode(payload),
            engine.encode("signature"),
        )
    }

    #[test]
    fn jwt_tokens_carry_claims() {
        let token = Token::parse(jwt(r#"{"user_id":"the-guid","sub":"alice"}"#));
        assert!(matches!(token, Token::Claims(..)));
        assert_eq!(token.claim("user_id"), Some("the-guid"));
        assert_eq!(token.claim("missing"), None);
    }

    #[test]
    fn other_tokens_are_opaque() {
        for raw in ["abc123", "a.b", "a.b.c.d", "x.bm90LWpzb24.y", "x.WzEsMl0.y"] {
            let token = Token::parse(raw);
            assert_eq!(token, Token::Opaque(raw.to_string()), "{raw}");
            assert_eq!(token.claim("user_id"), None);
            assert_eq!(token.as_str(), raw);
        }
    }

    #[test]
    fn debug_redacts_credentials() {
        let token = Token::parse(jwt(r#"{"user_id":"g"}"#));
        assert!(!format!("{token:?}").contains(token.as_str()));
        assert_eq!(format!("{:?}", Token::parse("secret")), "Opaque(..)");
    }
}
