// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) resolution.
//!
//! Resolves the identity provider's OpenID discovery document to its
//! `jwks_uri`, fetches the key set and turns every usable RSA entry into a
//! [`SigningKey`] indexed by key ID.
//!
//! ## Entry policy
//!
//! Entries are decoded leniently: a JWK that is not an RSA signing key, has
//! no `kid`, or whose `n`/`e` do not decode is skipped with a warning. The
//! fetch only fails when no usable key is left. Every usable key is kept so
//! that tokens signed with any published key verify.
//!
//! ## Usage
//!
//! `KeySource::fetch_key_set` is called once at startup to populate the
//! [`KeyCache`](super::cache::KeyCache) and again only on a throttled
//! rotation refresh. It never retries on its own.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;

use super::error::AuthError;

/// Default timeout for discovery and JWKS requests.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Smallest RSA modulus accepted from a JWKS.
const MIN_MODULUS_BITS: usize = 1024;

/// The part of the OpenID configuration we need.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    #[serde(default)]
    jwks_uri: Option<String>,
}

/// JWKS document. Entries stay untyped so one odd entry cannot sink the set.
#[derive(Debug, Deserialize)]
pub struct JwksDocument {
    #[serde(default)]
    pub keys: Vec<serde_json::Value>,
}

/// One JSON Web Key as published by the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" for everything we accept)
    #[serde(default)]
    pub kty: Option<String>,
    /// Key ID
    #[serde(default)]
    pub kid: Option<String>,
    /// Public key use ("sig" when present)
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,
    /// Algorithm the key is meant for
    #[serde(default)]
    pub alg: Option<String>,
    /// RSA modulus, base64url
    #[serde(default)]
    pub n: Option<String>,
    /// RSA exponent, base64url
    #[serde(default)]
    pub e: Option<String>,
}

/// An RSA public key taken from the identity provider's JWKS.
#[derive(Clone)]
pub struct SigningKey {
    key_id: String,
    modulus: Vec<u8>,
    exponent: u32,
    algorithm: Option<Algorithm>,
    decoding_key: DecodingKey,
}

impl SigningKey {
    /// Build a key from base64url-encoded `n` and `e`.
    ///
    /// Rejects components that do not describe a usable RSA public key.
    pub fn from_components(
        key_id: impl Into<String>,
        n: &str,
        e: &str,
        algorithm: Option<Algorithm>,
    ) -> Result<Self, AuthError> {
        let key_id = key_id.into();
        let n = n.trim_end_matches('=');
        let e = e.trim_end_matches('=');

        let modulus = Base64UrlUnpadded::decode_vec(n)
            .map_err(|err| AuthError::KeyDecode(format!("kid {key_id}: modulus: {err}")))?;
        let exponent_bytes = Base64UrlUnpadded::decode_vec(e)
            .map_err(|err| AuthError::KeyDecode(format!("kid {key_id}: exponent: {err}")))?;

        let modulus = strip_leading_zeros(&modulus).to_vec();
        let bits = modulus_bits(&modulus);
        if bits < MIN_MODULUS_BITS {
            return Err(AuthError::KeyDecode(format!(
                "kid {key_id}: modulus is {bits} bits, need at least {MIN_MODULUS_BITS}"
            )));
        }

        let exponent_bytes = strip_leading_zeros(&exponent_bytes);
        if exponent_bytes.is_empty() || exponent_bytes.len() > 4 {
            return Err(AuthError::KeyDecode(format!(
                "kid {key_id}: exponent does not fit in 32 bits"
            )));
        }
        let exponent = exponent_bytes
            .iter()
            .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte));
        if exponent < 3 || exponent % 2 == 0 {
            return Err(AuthError::KeyDecode(format!(
                "kid {key_id}: exponent {exponent} is not a valid RSA public exponent"
            )));
        }

        let decoding_key = DecodingKey::from_rsa_components(n, e)
            .map_err(|err| AuthError::KeyDecode(format!("kid {key_id}: {err}")))?;

        Ok(Self {
            key_id,
            modulus,
            exponent,
            algorithm,
            decoding_key,
        })
    }

    /// Build a key from a JWK entry.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, AuthError> {
        let key_id = jwk
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| AuthError::KeyDecode("entry has no kid".to_string()))?;

        match jwk.kty.as_deref() {
            Some("RSA") => {}
            other => {
                return Err(AuthError::KeyDecode(format!(
                    "kid {key_id}: unsupported key type {other:?}"
                )))
            }
        }

        if let Some(key_use) = jwk.key_use.as_deref() {
            if key_use != "sig" {
                return Err(AuthError::KeyDecode(format!(
                    "kid {key_id}: key use {key_use:?} is not \"sig\""
                )));
            }
        }

        let algorithm = jwk
            .alg
            .as_deref()
            .map(|alg| {
                rsa_algorithm(alg).ok_or_else(|| {
                    AuthError::KeyDecode(format!("kid {key_id}: unsupported alg {alg:?}"))
                })
            })
            .transpose()?;

        let n = jwk
            .n
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AuthError::KeyDecode(format!("kid {key_id}: missing `n`")))?;
        let e = jwk
            .e
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AuthError::KeyDecode(format!("kid {key_id}: missing `e`")))?;

        Self::from_components(key_id, n, e, algorithm)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Big-endian modulus without leading zero bytes.
    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    pub fn exponent(&self) -> u32 {
        self.exponent
    }

    /// Algorithm pinned by the JWK `alg` field, if the provider set one.
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("modulus_bits", &modulus_bits(&self.modulus))
            .field("exponent", &self.exponent)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

/// Signing keys indexed by key ID.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, SigningKey>,
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key, replacing any key with the same ID.
    pub fn insert(&mut self, key: SigningKey) {
        self.keys.insert(key.key_id.clone(), key);
    }

    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Build a key set from a JWKS document, skipping unusable entries.
    pub fn from_jwks(document: JwksDocument) -> Result<Self, AuthError> {
        if document.keys.is_empty() {
            return Err(AuthError::KeySet("JWKS contains no keys".to_string()));
        }

        let published = document.keys.len();
        let mut set = KeySet::new();
        for entry in document.keys {
            let decoded = serde_json::from_value::<Jwk>(entry)
                .map_err(|e| AuthError::KeyDecode(format!("entry is not a JWK: {e}")))
                .and_then(|jwk| SigningKey::from_jwk(&jwk));

            match decoded {
                Ok(key) => set.insert(key),
                Err(err) => {
                    tracing::warn!(target: "auth.jwks", error = %err, "Skipping unusable JWK");
                }
            }
        }

        if set.is_empty() {
            return Err(AuthError::KeySet(format!(
                "none of the {published} published keys is a usable RSA signing key"
            )));
        }

        Ok(set)
    }
}

impl FromIterator<SigningKey> for KeySet {
    fn from_iter<I: IntoIterator<Item = SigningKey>>(iter: I) -> Self {
        let mut set = KeySet::new();
        for key in iter {
            set.insert(key);
        }
        set
    }
}

/// Fetches the identity provider's key set via OpenID discovery.
#[derive(Clone)]
pub struct KeySource {
    /// OpenID configuration URL
    discovery_url: String,
    /// HTTP client with request timeout
    client: reqwest::Client,
}

impl KeySource {
    /// Create a key source for the given discovery document URL.
    pub fn new(discovery_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| AuthError::Discovery(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            discovery_url: discovery_url.into(),
            client,
        })
    }

    /// Resolve discovery → `jwks_uri` → key set.
    pub async fn fetch_key_set(&self) -> Result<KeySet, AuthError> {
        let jwks_uri = self.fetch_jwks_uri().await?;
        let key_set = self.fetch_jwks(&jwks_uri).await?;

        tracing::info!(
            target: "auth.jwks",
            jwks_uri = %jwks_uri,
            key_count = key_set.len(),
            "Fetched identity provider key set"
        );

        Ok(key_set)
    }

    async fn fetch_jwks_uri(&self) -> Result<String, AuthError> {
        tracing::debug!(target: "auth.jwks", url = %self.discovery_url, "Fetching OpenID configuration");

        let response = self
            .client
            .get(&self.discovery_url)
            .send()
            .await
            .map_err(|e| AuthError::Discovery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Discovery(format!(
                "HTTP {} from discovery endpoint",
                response.status()
            )));
        }

        let document: DiscoveryDocument = response
            .json()
            .await
            .map_err(|e| AuthError::Discovery(format!("invalid discovery document: {e}")))?;

        document
            .jwks_uri
            .filter(|uri| !uri.trim().is_empty())
            .ok_or_else(|| AuthError::Discovery("discovery document has no jwks_uri".to_string()))
    }

    async fn fetch_jwks(&self, jwks_uri: &str) -> Result<KeySet, AuthError> {
        tracing::debug!(target: "auth.jwks", url = %jwks_uri, "Fetching JWKS");

        let response = self
            .client
            .get(jwks_uri)
            .send()
            .await
            .map_err(|e| AuthError::KeySet(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::KeySet(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let document: JwksDocument = response
            .json()
            .await
            .map_err(|e| AuthError::KeySet(format!("invalid JWKS document: {e}")))?;

        KeySet::from_jwks(document)
    }
}

/// Map a JWS `alg` name onto the RSA algorithms we verify.
pub(crate) fn rsa_algorithm(alg: &str) -> Option<Algorithm> {
    match alg {
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        _ => None,
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn modulus_bits(modulus: &[u8]) -> usize {
    match modulus.first() {
        Some(first) => modulus.len() * 8 - first.leading_zeros() as usize,
        None => 0,
    }
}
