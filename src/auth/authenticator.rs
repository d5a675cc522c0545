// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The two-stage authentication pipeline.
//!
//! [`Authenticator::authenticate`] walks a request through
//! [`AuthStage`]: the bearer token must verify against the identity
//! provider key set before the claim token is even looked at. Every
//! failure is logged with the stage it happened at and handed back as an
//! [`AuthError`], which renders as the same opaque 401.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header::AUTHORIZATION, HeaderMap};

use super::cache::KeyCache;
use super::claim::{Claim, ClaimDecoder, ClaimKey};
use super::context::{AuthContext, AuthStage};
use super::error::AuthError;
use super::jwks::{KeySet, KeySource};
use super::verifier::{ParsedClaims, TokenVerifier};

/// Header carrying the claim token.
pub const CLAIM_TOKEN_HEADER: &str = "x";

/// Minimum age of the key set before an unknown `kid` may trigger a refresh.
pub const DEFAULT_REFRESH_MIN_INTERVAL: Duration = Duration::from_secs(300);

const BEARER_SCHEME: &str = "bearer";

/// Verifies bearer and claim tokens against process-wide key caches.
pub struct Authenticator {
    /// Identity provider key source, `None` for a fixed key set
    key_source: Option<KeySource>,
    /// Base64-wrapped PEM of the claim key, loaded on first use
    claim_key_pem: Option<String>,
    key_set: KeyCache<KeySet>,
    claim_key: KeyCache<ClaimKey>,
    verifier: TokenVerifier,
    decoder: ClaimDecoder,
    refresh_min_interval: Duration,
}

impl Authenticator {
    /// Create an authenticator that loads its keys on first use.
    ///
    /// Call [`Authenticator::initialize`] at startup to load them eagerly.
    pub fn new(key_source: KeySource, claim_key_pem: impl Into<String>) -> Self {
        Self {
            key_source: Some(key_source),
            claim_key_pem: Some(claim_key_pem.into()),
            key_set: KeyCache::new(),
            claim_key: KeyCache::new(),
            verifier: TokenVerifier::new(),
            decoder: ClaimDecoder::new(),
            refresh_min_interval: DEFAULT_REFRESH_MIN_INTERVAL,
        }
    }

    /// Create an authenticator over fixed keys. Unknown key IDs never
    /// trigger a refresh.
    pub fn with_keys(key_set: KeySet, claim_key: ClaimKey) -> Self {
        Self {
            key_source: None,
            claim_key_pem: None,
            key_set: KeyCache::with_value(key_set),
            claim_key: KeyCache::with_value(claim_key),
            verifier: TokenVerifier::new(),
            decoder: ClaimDecoder::new(),
            refresh_min_interval: DEFAULT_REFRESH_MIN_INTERVAL,
        }
    }

    pub fn with_verifier(mut self, verifier: TokenVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_decoder(mut self, decoder: ClaimDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    /// Throttle key-rotation refreshes triggered by unknown key IDs.
    pub fn with_refresh_min_interval(mut self, interval: Duration) -> Self {
        self.refresh_min_interval = interval;
        self
    }

    /// Populate both key caches.
    ///
    /// Errors here mean the service cannot verify any request and should
    /// not start.
    pub async fn initialize(&self) -> Result<(), AuthError> {
        let key_set = self.key_set().await?;
        self.claim_key().await?;

        tracing::info!(
            target: "auth.pipeline",
            key_count = key_set.len(),
            "Authentication keys loaded"
        );
        Ok(())
    }

    /// Refetch the identity provider key set now, keeping the old one on
    /// failure.
    pub async fn refresh_keys(&self) -> Result<(), AuthError> {
        let source = self.source()?;
        let key_set = self
            .key_set
            .refresh(|| source.fetch_key_set())
            .await?;

        tracing::info!(
            target: "auth.pipeline",
            key_count = key_set.len(),
            "Identity provider key set refreshed"
        );
        Ok(())
    }

    /// Whether the identity provider key set has been loaded.
    pub async fn is_ready(&self) -> bool {
        self.key_set.get().await.is_some()
    }

    /// Authenticate a request from its headers.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        let mut stage = AuthStage::NoToken;
        match self.run_pipeline(headers, &mut stage).await {
            Ok(context) => {
                tracing::debug!(
                    target: "auth.pipeline",
                    stage = %stage,
                    username = %context.username,
                    "Request authorized"
                );
                Ok(context)
            }
            Err(err) => Err(rejected(stage, err)),
        }
    }

    /// Verify only the claim token of a request.
    pub async fn extract_claim(&self, headers: &HeaderMap) -> Result<Claim, AuthError> {
        self.decode_claim(headers)
            .await
            .map_err(|err| rejected(claim_stage(headers), err))
    }

    async fn decode_claim(&self, headers: &HeaderMap) -> Result<Claim, AuthError> {
        let raw = claim_token(headers)?;
        let key = self.claim_key().await?;
        self.decoder.decode(raw, &key)
    }

    async fn run_pipeline(
        &self,
        headers: &HeaderMap,
        stage: &mut AuthStage,
    ) -> Result<AuthContext, AuthError> {
        let bearer = bearer_token(headers)?;
        *stage = stage.next();

        let bearer_claims = self.verify_bearer(bearer).await?;
        *stage = stage.next();

        let claim = self.decode_claim(headers).await?;
        *stage = stage.next();

        let context = AuthContext::new(claim, &bearer_claims);
        *stage = stage.next();
        Ok(context)
    }

    async fn verify_bearer(&self, token: &str) -> Result<ParsedClaims, AuthError> {
        let key_set = self.key_set().await?;

        match self.verifier.verify(token, &key_set) {
            Err(AuthError::UnknownKey(kid)) => match self.rotate_keys(&kid).await {
                Some(rotated) => self.verifier.verify(token, &rotated),
                None => Err(AuthError::UnknownKey(kid)),
            },
            result => result,
        }
    }

    /// Refetch the key set after seeing an unknown `kid`, at most once per
    /// refresh interval.
    async fn rotate_keys(&self, kid: &str) -> Option<Arc<KeySet>> {
        let source = self.key_source.as_ref()?;

        let refreshed = self
            .key_set
            .refresh_if_older_than(self.refresh_min_interval, || source.fetch_key_set())
            .await;

        match refreshed {
            Ok(Some(key_set)) => {
                tracing::info!(
                    target: "auth.pipeline",
                    kid = %kid,
                    key_count = key_set.len(),
                    "Key set refreshed after unknown kid"
                );
                Some(key_set)
            }
            // Too recent to refetch; a concurrent refresh may still have
            // brought the key in.
            Ok(None) => self.key_set.get().await,
            Err(err) => {
                tracing::warn!(
                    target: "auth.pipeline",
                    kid = %kid,
                    error = %err,
                    "Key set refresh failed, keeping current keys"
                );
                None
            }
        }
    }

    async fn key_set(&self) -> Result<Arc<KeySet>, AuthError> {
        if let Some(key_set) = self.key_set.get().await {
            return Ok(key_set);
        }
        let source = self.source()?;
        self.key_set.get_or_fetch(|| source.fetch_key_set()).await
    }

    async fn claim_key(&self) -> Result<Arc<ClaimKey>, AuthError> {
        self.claim_key
            .get_or_fetch(|| async {
                match self.claim_key_pem.as_deref() {
                    Some(pem) => ClaimKey::from_base64_pem(pem),
                    None => Err(AuthError::ClaimKey("no claim key configured".to_string())),
                }
            })
            .await
    }

    fn source(&self) -> Result<&KeySource, AuthError> {
        self.key_source
            .as_ref()
            .ok_or_else(|| AuthError::KeySet("no key source configured".to_string()))
    }
}

fn rejected(stage: AuthStage, err: AuthError) -> AuthError {
    tracing::info!(
        target: "auth.pipeline",
        stage = %stage,
        next = %stage.reject(),
        error_code = err.error_code(),
        error = %err,
        "Request rejected"
    );
    err
}

/// Stage of a claim-only check: no bearer is involved, so it never gets
/// past `TokenPresent`.
fn claim_stage(headers: &HeaderMap) -> AuthStage {
    if headers.contains_key(CLAIM_TOKEN_HEADER) {
        AuthStage::TokenPresent
    } else {
        AuthStage::NoToken
    }
}

/// Token from `Authorization: Bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingCredentials)?
        .to_str()
        .map_err(|_| AuthError::MissingCredentials)?
        .trim();

    let (scheme, token) = value
        .split_once(' ')
        .ok_or(AuthError::MissingCredentials)?;
    if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
        return Err(AuthError::MissingCredentials);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    Ok(token)
}

/// Token from the claim header.
fn claim_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let token = headers
        .get(CLAIM_TOKEN_HEADER)
        .ok_or(AuthError::MissingCredentials)?
        .to_str()
        .map_err(|_| AuthError::MissingCredentials)?
        .trim();

    if token.is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{
        alice_payload, bearer_claims, bearer_token as mint_bearer, claim_key, claim_pem_base64,
        claim_token as mint_claim, idp_jwk, idp_key_set, now, sign, IDP_KID, IDP_PRIVATE_PEM,
        ROGUE_PRIVATE_PEM, TEST_ISSUER,
    };
    use axum::http::HeaderValue;
    use jsonwebtoken::Algorithm;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn authenticator() -> Authenticator {
        Authenticator::with_keys(idp_key_set(), claim_key())
            .with_verifier(TokenVerifier::new().with_issuer(TEST_ISSUER))
    }

    fn headers(bearer: Option<&str>, claim: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(bearer) = bearer {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(bearer).unwrap());
        }
        if let Some(claim) = claim {
            headers.insert(CLAIM_TOKEN_HEADER, HeaderValue::from_str(claim).unwrap());
        }
        headers
    }

    fn valid_headers() -> HeaderMap {
        let bearer = format!("Bearer {}", mint_bearer(&bearer_claims()));
        let claim = mint_claim(alice_payload());
        headers(Some(&bearer), Some(&claim))
    }

    #[tokio::test]
    async fn valid_request_is_authorized() {
        let context = authenticator().authenticate(&valid_headers()).await.unwrap();

        assert_eq!(context.username, "alice");
        assert_eq!(context.claim.username, "alice");
        assert_eq!(context.claim.code, "P1");
        assert_eq!(
            context.subject.as_deref(),
            bearer_claims()["sub"].as_str()
        );
    }

    #[tokio::test]
    async fn repeated_authentication_is_identical() {
        let auth = authenticator();
        let headers = valid_headers();

        let first = auth.authenticate(&headers).await.unwrap();
        for _ in 0..5 {
            assert_eq!(auth.authenticate(&headers).await.unwrap(), first);
        }
    }

    #[tokio::test]
    async fn malformed_authorization_headers_are_rejected() {
        let auth = authenticator();
        let claim = mint_claim(alice_payload());
        let token = mint_bearer(&bearer_claims());

        let cases = [
            None,
            Some(String::new()),
            Some("Bearer".to_string()),
            Some("Bearer ".to_string()),
            Some(format!("Basic {token}")),
            Some(token.clone()),
            Some("Bearer not-a-jwt".to_string()),
            Some("Bearer a.b.c".to_string()),
        ];

        for case in cases {
            let result = auth
                .authenticate(&headers(case.as_deref(), Some(&claim)))
                .await;
            assert!(result.is_err(), "{case:?}");
        }
    }

    #[tokio::test]
    async fn scheme_is_case_insensitive() {
        let bearer = format!("bearer   {}  ", mint_bearer(&bearer_claims()));
        let claim = mint_claim(alice_payload());
        assert!(authenticator()
            .authenticate(&headers(Some(&bearer), Some(&claim)))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn unknown_kid_is_rejected_without_a_key_source() {
        let token = sign(
            Algorithm::RS256,
            Some("someone-elses-key"),
            &bearer_claims(),
            ROGUE_PRIVATE_PEM,
        );
        let bearer = format!("Bearer {token}");
        let claim = mint_claim(alice_payload());

        let err = authenticator()
            .authenticate(&headers(Some(&bearer), Some(&claim)))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownKey(_)));
    }

    #[tokio::test]
    async fn expired_bearer_is_rejected() {
        let mut claims = bearer_claims();
        claims["exp"] = json!(now() - 3600);
        let bearer = format!("Bearer {}", mint_bearer(&claims));
        let claim = mint_claim(alice_payload());

        let err = authenticator()
            .authenticate(&headers(Some(&bearer), Some(&claim)))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ExpiredToken));
    }

    #[tokio::test]
    async fn claim_is_not_decoded_before_bearer_verifies() {
        // An invalid claim header must not mask a bearer failure.
        let err = authenticator()
            .authenticate(&headers(Some("Bearer a.b.c"), Some("garbage")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }

    #[tokio::test]
    async fn missing_claim_header_is_rejected() {
        let bearer = format!("Bearer {}", mint_bearer(&bearer_claims()));
        let err = authenticator()
            .authenticate(&headers(Some(&bearer), None))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingCredentials));
    }

    #[tokio::test]
    async fn invalid_claim_payload_is_rejected() {
        let bearer = format!("Bearer {}", mint_bearer(&bearer_claims()));
        let claim = mint_claim(json!({
            "user": { "uname": "alice@example.com" },
            "policy": [],
        }));

        let err = authenticator()
            .authenticate(&headers(Some(&bearer), Some(&claim)))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidClaim(_)));
    }

    #[tokio::test]
    async fn extract_claim_reads_only_the_claim_header() {
        let claim = mint_claim(alice_payload());
        let claim = authenticator()
            .extract_claim(&headers(None, Some(&claim)))
            .await
            .unwrap();
        assert_eq!(claim.username, "alice");
        assert_eq!(claim.code, "P1");

        let err = authenticator()
            .extract_claim(&headers(None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingCredentials));
    }

    #[tokio::test]
    async fn lazy_claim_key_errors_are_reported() {
        let server = MockServer::start().await;
        let source = KeySource::new(format!("{}/discovery", server.uri()), Duration::from_secs(2))
            .unwrap();
        let auth = Authenticator::new(source, "definitely not base64 pem");

        let err = auth
            .extract_claim(&headers(None, Some(&mint_claim(alice_payload()))))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ClaimKey(_)));
    }

    async fn mock_idp(server: &MockServer) -> KeySource {
        Mock::given(method("GET"))
            .and(path("/tenant/v2.0/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jwks_uri": format!("{}/tenant/discovery/v2.0/keys", server.uri()),
            })))
            .mount(server)
            .await;

        KeySource::new(
            format!("{}/tenant/v2.0/.well-known/openid-configuration", server.uri()),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn initialize_loads_keys_from_the_identity_provider() {
        let server = MockServer::start().await;
        let source = mock_idp(&server).await;
        Mock::given(method("GET"))
            .and(path("/tenant/discovery/v2.0/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [idp_jwk(Some("RS256"))]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let auth = Authenticator::new(source, claim_pem_base64());
        assert!(!auth.is_ready().await);
        auth.initialize().await.unwrap();
        assert!(auth.is_ready().await);

        // Requests after startup reuse the cached keys.
        for _ in 0..3 {
            assert!(auth.authenticate(&valid_headers()).await.is_ok());
        }
    }

    #[tokio::test]
    async fn initialize_fails_when_the_identity_provider_is_down() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let source = KeySource::new(
            format!("{}/tenant/v2.0/.well-known/openid-configuration", server.uri()),
            Duration::from_secs(2),
        )
        .unwrap();

        let err = Authenticator::new(source, claim_pem_base64())
            .initialize()
            .await
            .unwrap_err();
        assert!(err.is_startup_failure());
    }

    #[tokio::test]
    async fn unknown_kid_triggers_one_key_rotation() {
        let server = MockServer::start().await;
        let source = mock_idp(&server).await;

        let mut stale = idp_jwk(None);
        stale["kid"] = json!("previous-key");
        Mock::given(method("GET"))
            .and(path("/tenant/discovery/v2.0/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [stale] })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tenant/discovery/v2.0/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [idp_jwk(None)]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let auth = Authenticator::new(source, claim_pem_base64())
            .with_refresh_min_interval(Duration::ZERO);
        auth.initialize().await.unwrap();

        let token = sign(Algorithm::RS256, Some(IDP_KID), &bearer_claims(), IDP_PRIVATE_PEM);
        let bearer = format!("Bearer {token}");
        let claim = mint_claim(alice_payload());
        let context = auth
            .authenticate(&headers(Some(&bearer), Some(&claim)))
            .await
            .unwrap();
        assert_eq!(context.username, "alice");
    }

    #[tokio::test]
    async fn rotation_is_throttled() {
        let server = MockServer::start().await;
        let source = mock_idp(&server).await;
        Mock::given(method("GET"))
            .and(path("/tenant/discovery/v2.0/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [idp_jwk(None)]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let auth = Authenticator::new(source, claim_pem_base64());
        auth.initialize().await.unwrap();

        let token = sign(
            Algorithm::RS256,
            Some("not-published"),
            &bearer_claims(),
            ROGUE_PRIVATE_PEM,
        );
        let bearer = format!("Bearer {token}");
        let claim = mint_claim(alice_payload());
        for _ in 0..3 {
            let err = auth
                .authenticate(&headers(Some(&bearer), Some(&claim)))
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::UnknownKey(_)));
        }
    }

    #[tokio::test]
    async fn failed_rotation_is_not_retried_per_request() {
        let server = MockServer::start().await;
        let source = mock_idp(&server).await;
        Mock::given(method("GET"))
            .and(path("/tenant/discovery/v2.0/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [idp_jwk(None)]
            })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tenant/discovery/v2.0/keys"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let auth = Authenticator::new(source, claim_pem_base64())
            .with_refresh_min_interval(Duration::from_millis(200));
        auth.initialize().await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let token = sign(
            Algorithm::RS256,
            Some("forged-kid"),
            &bearer_claims(),
            ROGUE_PRIVATE_PEM,
        );
        let bearer = format!("Bearer {token}");
        let claim = mint_claim(alice_payload());
        for _ in 0..5 {
            let err = auth
                .authenticate(&headers(Some(&bearer), Some(&claim)))
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::UnknownKey(_)));
        }

        let key_fetches = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|request| request.url.path() == "/tenant/discovery/v2.0/keys")
            .count();
        assert_eq!(key_fetches, 2);

        // The keys loaded at startup keep working through the outage.
        assert!(auth.authenticate(&valid_headers()).await.is_ok());
    }

    #[test]
    fn claim_only_checks_never_reach_bearer_stages() {
        let claim = mint_claim(alice_payload());
        assert_eq!(claim_stage(&headers(None, None)), AuthStage::NoToken);
        assert_eq!(
            claim_stage(&headers(None, Some(&claim))),
            AuthStage::TokenPresent
        );
    }

    #[tokio::test]
    async fn explicit_refresh_replaces_the_key_set() {
        let server = MockServer::start().await;
        let source = mock_idp(&server).await;

        let mut stale = idp_jwk(None);
        stale["kid"] = json!("previous-key");
        Mock::given(method("GET"))
            .and(path("/tenant/discovery/v2.0/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [stale] })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tenant/discovery/v2.0/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [idp_jwk(None)]
            })))
            .mount(&server)
            .await;

        // Default throttle: the unknown kid alone cannot force a refetch.
        let auth = Authenticator::new(source, claim_pem_base64());
        auth.initialize().await.unwrap();
        assert!(auth.authenticate(&valid_headers()).await.is_err());

        auth.refresh_keys().await.unwrap();
        assert!(auth.authenticate(&valid_headers()).await.is_ok());
    }

    #[tokio::test]
    async fn refresh_without_a_key_source_fails() {
        let err = authenticator().refresh_keys().await.unwrap_err();
        assert!(matches!(err, AuthError::KeySet(_)));
    }
}
