// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Internally issued claim tokens.
//!
//! The claim token travels in the `X` header next to the bearer token. It is
//! an RSA-signed JWT whose `payload` claim carries the business identity:
//!
//! ```json
//! { "payload": { "user": { "uname": "alice@example.com" },
//!                "policy": [ { "code": "P1" }, { "code": "P2" } ] } }
//! ```
//!
//! It is verified against one long-lived public key supplied through
//! configuration, never against the identity provider's JWKS.

use std::fmt;

use base64ct::{Base64, Base64Unpadded, Encoding};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::AuthError;

/// PEM tag the claim verification key must carry (SPKI).
const PUBLIC_KEY_TAG: &str = "PUBLIC KEY";

/// RSA public key that verifies claim tokens.
#[derive(Clone)]
pub struct ClaimKey {
    decoding_key: DecodingKey,
}

impl ClaimKey {
    /// Load from PEM text (`-----BEGIN PUBLIC KEY-----`).
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self, AuthError> {
        let block = pem::parse(pem_bytes)
            .map_err(|e| AuthError::ClaimKey(format!("not a PEM document: {e}")))?;

        if block.tag() != PUBLIC_KEY_TAG {
            return Err(AuthError::ClaimKey(format!(
                "expected a {PUBLIC_KEY_TAG:?} PEM block, found {:?}",
                block.tag()
            )));
        }

        let decoding_key = DecodingKey::from_rsa_pem(pem_bytes)
            .map_err(|e| AuthError::ClaimKey(format!("not an RSA public key: {e}")))?;

        Ok(Self { decoding_key })
    }

    /// Load from base64-wrapped PEM, the form used by the `PEM` variable.
    pub fn from_base64_pem(encoded: &str) -> Result<Self, AuthError> {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let pem_bytes = Base64::decode_vec(&compact)
            .or_else(|_| Base64Unpadded::decode_vec(&compact))
            .map_err(|e| AuthError::ClaimKey(format!("not valid base64: {e}")))?;

        Self::from_pem(&pem_bytes)
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimKey").finish_non_exhaustive()
    }
}

/// Authorization data carried by a claim token.
///
/// Only the first policy entry of the token is used; further entries are
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// `uname` up to the first `@`
    pub username: String,
    /// `code` of the first policy entry
    pub code: String,
}

impl Claim {
    /// Project a decoded `payload` object into a claim.
    pub fn from_payload(payload: &Value) -> Result<Self, AuthError> {
        let payload: ClaimPayload = serde_json::from_value(payload.clone())
            .map_err(|e| AuthError::InvalidClaim(format!("payload has the wrong shape: {e}")))?;

        let uname = payload
            .user
            .and_then(|user| user.uname)
            .filter(|uname| !uname.is_empty())
            .ok_or_else(|| AuthError::InvalidClaim("uname is empty".to_string()))?;

        let username = uname
            .split_once('@')
            .map_or(uname.as_str(), |(local, _)| local);
        if username.is_empty() {
            return Err(AuthError::InvalidClaim(
                "uname has nothing before '@'".to_string(),
            ));
        }

        let first_policy = payload
            .policy
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| AuthError::InvalidClaim("policy is empty".to_string()))?;

        let policy: PolicyEntry = serde_json::from_value(first_policy)
            .map_err(|e| AuthError::InvalidClaim(format!("policy entry has the wrong shape: {e}")))?;

        let code = policy
            .code
            .filter(|code| !code.is_empty())
            .ok_or_else(|| AuthError::InvalidClaim("code is empty".to_string()))?;

        Ok(Claim {
            username: username.to_string(),
            code,
        })
    }
}

/// Registered claims of the claim token plus the nested `payload`.
#[derive(Debug, Deserialize)]
struct ClaimTokenClaims {
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ClaimPayload {
    #[serde(default)]
    user: Option<ClaimUser>,
    /// Entries stay untyped; only the first one is ever read.
    #[serde(default)]
    policy: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct ClaimUser {
    #[serde(default)]
    uname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PolicyEntry {
    #[serde(default)]
    code: Option<String>,
}

/// Verifies claim tokens and projects them into a [`Claim`].
#[derive(Debug, Clone, Default)]
pub struct ClaimDecoder {
    /// Clock skew tolerance in seconds for `exp`/`nbf`
    leeway: u64,
}

impl ClaimDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_leeway(mut self, leeway: std::time::Duration) -> Self {
        self.leeway = leeway.as_secs();
        self
    }

    /// Verify `raw` with `key` and decode its claim.
    ///
    /// `exp` is optional on claim tokens but enforced when present.
    pub fn decode(&self, raw: &str, key: &ClaimKey) -> Result<Claim, AuthError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.algorithms = vec![Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];
        validation.set_required_spec_claims::<&str>(&[]);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.leeway = self.leeway;

        let token_data = decode::<ClaimTokenClaims>(raw, key.decoding_key(), &validation)
            .map_err(|e| AuthError::from_jwt(&e))?;

        let payload = token_data
            .claims
            .payload
            .ok_or_else(|| AuthError::InvalidClaim("payload is empty".to_string()))?;

        let claim = Claim::from_payload(&payload)?;
        tracing::debug!(target: "auth.claim", code = %claim.code, "Claim token decoded");
        Ok(claim)
    }
}
