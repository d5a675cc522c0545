// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication middleware for Axum.
//!
//! Applies the pipeline to an entire router subtree:
//!
//! ```rust,ignore
//! let protected = Router::new()
//!     .route("/login", get(login))
//!     .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_auth));
//! ```
//!
//! Handlers behind it read the context with the [`Auth`](super::Auth)
//! extractor or [`AuthContextExt`](super::AuthContextExt).

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::context::attach;
use crate::state::AppState;

/// Authenticate the request or answer with 401.
pub async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    match state.authenticator.authenticate(request.headers()).await {
        Ok(context) => {
            attach(&mut request, context);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}
