//! Bearer-token verification for HS256 JWTs.
//!
//! The signing key is configured base64-encoded. Only the signature (and
//! `exp`, when present) is checked here; audience and scope are policy that
//! the ingress layer applies per endpoint.

use base64::prelude::{Engine as _, BASE64_STANDARD};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("signing key is not valid base64: {0}")]
    InvalidKey(String),
    #[error("token expired")]
    Expired,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("token encoding failed: {0}")]
    Encoding(String),
}

/// Claims the notifier reads. Everything is optional; callers decide which
/// ones they need.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "prospectId", default, skip_serializing_if = "Option::is_none")]
    pub prospect_id: Option<String>,
    /// Either `"internal"` or `["internal", ...]` on the wire.
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub aud: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

impl Claims {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope
            .iter()
            .any(|s| s.trim().eq_ignore_ascii_case(scope))
    }

    pub fn has_audience(&self, audience: &str) -> bool {
        self.aud.iter().any(|a| a.eq_ignore_ascii_case(audience))
    }

    /// The `userId` claim as a UUID, if present and well-formed.
    pub fn user_uuid(&self) -> Option<Result<Uuid, uuid::Error>> {
        self.user_id.as_deref().map(Uuid::parse_str)
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<Option<String>>),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Raw::One(s)) => vec![s],
        Some(Raw::Many(items)) => items.into_iter().flatten().collect(),
    })
}

/// Verifies (and, for tests and tooling, issues) HS256 tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn from_base64_secret(secret: &str) -> Result<Self, TokenError> {
        let bytes = BASE64_STANDARD
            .decode(secret.trim())
            .map_err(|e| TokenError::InvalidKey(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        Ok(Self {
            encoding_key: EncodingKey::from_secret(&bytes),
            decoding_key: DecodingKey::from_secret(&bytes),
            validation,
        })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token.trim(), &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                _ => TokenError::Malformed(e.to_string()),
            })
    }

    pub fn issue(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("algorithm", &"HS256")
            .finish()
    }
}

/// Strips a case-insensitive `Bearer ` prefix.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
}
