// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request-scoped authorization context.
//!
//! The context lives in the request's `http::Extensions`, so it is owned by
//! exactly one request and dropped with it. Handlers read it through the
//! typed [`AuthContextExt`] accessor or the [`Auth`](super::Auth) extractor.

use std::fmt;

use axum::http::{request::Parts, Extensions, Request};
use serde::Serialize;

use super::claim::Claim;
use super::verifier::ParsedClaims;

/// Authorization context of an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    /// Decoded claim token
    pub claim: Claim,
    /// Username derived from the claim token
    pub username: String,
    /// Bearer token subject, when the identity provider set one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl AuthContext {
    /// Combine a decoded claim with the verified bearer claims.
    pub fn new(claim: Claim, bearer: &ParsedClaims) -> Self {
        Self {
            username: claim.username.clone(),
            claim,
            subject: bearer.sub.clone(),
        }
    }
}

/// Where a request is in the authentication pipeline.
///
/// ```text
/// NoToken → TokenPresent → BearerVerified → ClaimDecoded → Authorized
///    └──────────┴──────────────┴───────────────┴──→ Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    NoToken,
    TokenPresent,
    BearerVerified,
    ClaimDecoded,
    Authorized,
    Rejected,
}

impl AuthStage {
    /// The stage reached when the current one succeeds.
    pub fn next(self) -> AuthStage {
        match self {
            AuthStage::NoToken => AuthStage::TokenPresent,
            AuthStage::TokenPresent => AuthStage::BearerVerified,
            AuthStage::BearerVerified => AuthStage::ClaimDecoded,
            AuthStage::ClaimDecoded => AuthStage::Authorized,
            terminal => terminal,
        }
    }

    /// The stage reached when the current one fails.
    pub fn reject(self) -> AuthStage {
        if self.is_terminal() {
            self
        } else {
            AuthStage::Rejected
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AuthStage::Authorized | AuthStage::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthStage::NoToken => "no_token",
            AuthStage::TokenPresent => "token_present",
            AuthStage::BearerVerified => "bearer_verified",
            AuthStage::ClaimDecoded => "claim_decoded",
            AuthStage::Authorized => "authorized",
            AuthStage::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bind `context` to `request` for the rest of its lifetime.
pub fn attach<B>(request: &mut Request<B>, context: AuthContext) {
    request.extensions_mut().insert(context);
}

/// Typed access to the [`AuthContext`] of a request.
pub trait AuthContextExt {
    /// Returns `None` if the request was not authenticated.
    fn auth_context(&self) -> Option<&AuthContext>;
}

impl AuthContextExt for Extensions {
    fn auth_context(&self) -> Option<&AuthContext> {
        self.get::<AuthContext>()
    }
}

impl AuthContextExt for Parts {
    fn auth_context(&self) -> Option<&AuthContext> {
        self.extensions.auth_context()
    }
}

impl<B> AuthContextExt for Request<B> {
    fn auth_context(&self) -> Option<&AuthContext> {
        self.extensions().auth_context()
    }
}
