// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated requests.
//!
//! Use the `Auth` extractor in handlers to require authentication:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(context): Auth) -> impl IntoResponse {
//!     // context is AuthContext
//! }
//! ```

use axum::{extract::FromRequestParts, http::request::Parts};

use super::context::AuthContextExt;
use super::{AuthContext, AuthError};
use crate::state::AppState;

/// Extractor for authenticated requests.
///
/// Uses the context attached by [`require_auth`](super::middleware::require_auth)
/// when the route is behind it, otherwise runs the pipeline on the request
/// headers itself.
pub struct Auth(pub AuthContext);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(context) = parts.auth_context().cloned() {
            return Ok(Auth(context));
        }

        let context = state.authenticator.authenticate(&parts.headers).await?;
        parts.extensions.insert(context.clone());
        Ok(Auth(context))
    }
}

/// Optional authentication extractor.
///
/// Returns `None` if the request does not authenticate, instead of rejecting.
pub struct OptionalAuth(pub Option<AuthContext>);

impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match Auth::from_request_parts(parts, state).await {
            Ok(Auth(context)) => Ok(OptionalAuth(Some(context))),
            Err(_) => Ok(OptionalAuth(None)),
        }
    }
}
