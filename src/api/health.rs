// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Liveness response, `{"message":"pong"}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    pub message: String,
}

/// Readiness response with individual component status.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    /// Overall status ("ok" or "degraded").
    pub status: String,
    pub checks: ReadyChecks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyChecks {
    /// Identity provider key set status.
    pub jwks: String,
}

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        message: "pong".to_string(),
    })
}

/// Readiness probe handler.
///
/// Returns 503 until the identity provider key set is loaded. Does not
/// trigger a fetch.
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let ready = state.authenticator.is_ready().await;

    let response = ReadyResponse {
        status: if ready { "ok" } else { "degraded" }.to_string(),
        checks: ReadyChecks {
            jwks: if ready { "ok" } else { "unavailable" }.to_string(),
        },
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}
