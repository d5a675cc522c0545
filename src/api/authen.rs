// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Handlers of the protected `/authen` group.

use axum::Json;

use crate::auth::{Auth, AuthContext};

/// Return the authenticated username as plain text.
pub async fn login(Auth(context): Auth) -> String {
    tracing::info!(target: "auth.pipeline", username = %context.username, "Login");
    context.username
}

/// Return the full authorization context.
pub async fn me(Auth(context): Auth) -> Json<AuthContext> {
    Json(context)
}
