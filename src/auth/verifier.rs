// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer token verification against the identity provider key set.
//!
//! The header is read first, unverified, to pick the algorithm and the key
//! ID. Only RSA algorithms are accepted; `alg: none` and HMAC tokens are
//! rejected before any key is touched.

use std::time::Duration;

use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::{Deserialize, Serialize};

use super::error::AuthError;
use super::jwks::KeySet;

/// Claims of a verified bearer token.
///
/// Registered claims are typed; everything else is kept verbatim in
/// `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedClaims {
    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Subject (Azure object ID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Audience, a string or an array of strings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
    /// Expiration timestamp
    pub exp: i64,
    /// Not before timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Issued at timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Remaining claims
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Verifies identity provider bearer tokens.
#[derive(Debug, Clone, Default)]
pub struct TokenVerifier {
    /// Expected `iss`, unchecked when `None`
    issuer: Option<String>,
    /// Expected `aud`, unchecked when `None`
    audience: Option<String>,
    /// Clock skew tolerance in seconds for `exp`/`nbf`
    leeway: u64,
}

impl TokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require tokens to carry this issuer.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Require tokens to carry this audience.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Tolerate this much clock skew on `exp` and `nbf`.
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway.as_secs();
        self
    }

    /// Verify `raw` against `keys` and return its claims.
    pub fn verify(&self, raw: &str, keys: &KeySet) -> Result<ParsedClaims, AuthError> {
        let header = decode_header(raw)
            .map_err(|e| AuthError::MalformedToken(format!("unreadable header: {e}")))?;

        let algorithm = header.alg;
        if !is_rsa(algorithm) {
            return Err(AuthError::MalformedToken(format!(
                "unsupported algorithm {algorithm:?}"
            )));
        }

        let kid = header
            .kid
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| AuthError::MalformedToken("header has no kid".to_string()))?;

        let key = keys
            .get(&kid)
            .ok_or_else(|| AuthError::UnknownKey(kid.clone()))?;

        if let Some(pinned) = key.algorithm() {
            if pinned != algorithm {
                return Err(AuthError::MalformedToken(format!(
                    "kid {kid} is published for {pinned:?}, token uses {algorithm:?}"
                )));
            }
        }

        let mut validation = Validation::new(algorithm);
        validation.leeway = self.leeway;
        validation.validate_exp = true;
        validation.validate_nbf = true;

        // A configured check also requires the claim to be present.
        let mut required = vec!["exp"];
        if self.issuer.is_some() {
            required.push("iss");
        }
        if self.audience.is_some() {
            required.push("aud");
        }
        validation.set_required_spec_claims(&required);

        if let Some(ref issuer) = self.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = self.audience {
            validation.set_audience(&[audience]);
        } else {
            validation.validate_aud = false;
        }

        let token_data = decode::<ParsedClaims>(raw, key.decoding_key(), &validation)
            .map_err(|e| AuthError::from_jwt(&e))?;

        tracing::debug!(target: "auth.verifier", kid = %kid, alg = ?algorithm, "Bearer token verified");
        Ok(token_data.claims)
    }
}

fn is_rsa(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512
    )
}
