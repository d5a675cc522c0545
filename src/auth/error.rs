// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! Every variant is an internal diagnosis. Callers only ever see the single
//! opaque `401 {"message":"Unauthorized"}` produced by [`IntoResponse`];
//! the variant and its detail go to the logs.

use axum::{
    http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::error::ErrorBody;

/// Message returned to callers for every authentication failure.
pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized";

/// Authentication error type.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// OpenID discovery document could not be fetched or lacks `jwks_uri`
    #[error("OpenID discovery failed: {0}")]
    Discovery(String),
    /// JWKS could not be fetched, parsed, or contained no usable key
    #[error("JWKS unusable: {0}")]
    KeySet(String),
    /// A single JWK entry could not be turned into an RSA key
    #[error("JWK could not be decoded: {0}")]
    KeyDecode(String),
    /// Bearer or claim header absent or not in the expected form
    #[error("Credentials are missing or not in the expected form")]
    MissingCredentials,
    /// Token is structurally invalid or declares an unsupported algorithm
    #[error("Token is malformed: {0}")]
    MalformedToken(String),
    /// Token `kid` does not name any key in the key set
    #[error("No key in the key set matches kid {0:?}")]
    UnknownKey(String),
    /// Signature does not verify against the selected key
    #[error("Token signature is invalid")]
    InvalidSignature,
    /// Token `exp` is in the past
    #[error("Token has expired")]
    ExpiredToken,
    /// Token `nbf` is in the future
    #[error("Token is not yet valid")]
    TokenNotYetValid,
    /// Token `iss` differs from the configured issuer
    #[error("Token issuer does not match the expected issuer")]
    IssuerMismatch,
    /// Token `aud` differs from the configured audience
    #[error("Token audience does not match the expected audience")]
    AudienceMismatch,
    /// Claim token payload lacks the fields needed to build a claim
    #[error("Claim token is invalid: {0}")]
    InvalidClaim(String),
    /// Claim verification key could not be loaded from configuration
    #[error("Claim verification key is unusable: {0}")]
    ClaimKey(String),
}

impl AuthError {
    /// Stable identifier for logs and metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::Discovery(_) => "discovery_error",
            AuthError::KeySet(_) => "key_set_error",
            AuthError::KeyDecode(_) => "key_decode_error",
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::MalformedToken(_) => "malformed_token",
            AuthError::UnknownKey(_) => "unknown_key",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::ExpiredToken => "expired_token",
            AuthError::TokenNotYetValid => "token_not_yet_valid",
            AuthError::IssuerMismatch => "issuer_mismatch",
            AuthError::AudienceMismatch => "audience_mismatch",
            AuthError::InvalidClaim(_) => "invalid_claim",
            AuthError::ClaimKey(_) => "claim_key_error",
        }
    }

    /// Whether this error means the service cannot verify anything at all.
    ///
    /// These are raised while populating the key caches and must stop the
    /// process at startup rather than fail a single request.
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            AuthError::Discovery(_) | AuthError::KeySet(_) | AuthError::ClaimKey(_)
        )
    }

    /// Map a `jsonwebtoken` failure onto the taxonomy.
    pub(crate) fn from_jwt(err: &jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
            ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::InvalidIssuer => AuthError::IssuerMismatch,
            ErrorKind::InvalidAudience => AuthError::AudienceMismatch,
            ErrorKind::MissingRequiredClaim(claim) if claim == "iss" => AuthError::IssuerMismatch,
            ErrorKind::MissingRequiredClaim(claim) if claim == "aud" => {
                AuthError::AudienceMismatch
            }
            ErrorKind::MissingRequiredClaim(claim) => {
                AuthError::MalformedToken(format!("missing required claim `{claim}`"))
            }
            _ => AuthError::MalformedToken(err.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            message: UNAUTHORIZED_MESSAGE.to_string(),
        });
        let mut response = (StatusCode::UNAUTHORIZED, body).into_response();
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        response
    }
}
