//! RS256 bearer token verification for the `authorize` action (spec.md
//! §4.3/§4.4). The broker only ever verifies tokens issued elsewhere; it
//! holds no private key and issues nothing itself.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::TokenError;

/// Claims decoded from a `kuksa-vss` bearer token.
#[derive(Debug, Clone)]
pub struct Claims {
    pub expiry: DateTime<Utc>,
    pub vss_scope: HashMap<String, String>,
    pub modify_tree: bool,
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    exp: i64,
    #[serde(rename = "kuksa-vss")]
    kuksa_vss: HashMap<String, String>,
    #[serde(default, rename = "modifyTree")]
    modify_tree: bool,
}

/// Verifies tokens against a single RS256 public key, as configured at
/// startup (spec.md §4.4: the broker is handed a public key, never a
/// private one).
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Build a verifier from a PEM-encoded RSA public key.
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, TokenError> {
        let key = DecodingKey::from_rsa_pem(pem)
            .map_err(|e| TokenError::Invalid(format!("invalid RSA public key: {e}")))?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        Ok(Self { key, validation })
    }

    /// A verifier over a throwaway HMAC secret, for tests elsewhere in
    /// the crate that need a working `TokenVerifier` but never exercise
    /// an actual `authorize` success.
    #[cfg(test)]
    pub(crate) fn for_testing() -> Self {
        let key = DecodingKey::from_secret(b"test-only-secret");
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self { key, validation }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let data = jsonwebtoken::decode::<RawClaims>(token, &self.key, &self.validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })?;

        if data.claims.kuksa_vss.is_empty() {
            return Err(TokenError::MissingClaim("kuksa-vss".to_owned()));
        }

        let expiry = Utc
            .timestamp_opt(data.claims.exp, 0)
            .single()
            .ok_or_else(|| TokenError::Invalid("exp out of range".to_owned()))?;

        Ok(Claims {
            expiry,
            vss_scope: data.claims.kuksa_vss,
            modify_tree: data.claims.modify_tree,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_key() {
        assert!(TokenVerifier::from_rsa_pem(b"not a key").is_err());
    }
}
