// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;

use axum::{
    extract::ConnectInfo,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    routing::get,
    Router,
};
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::{DefaultOnFailure, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use uuid::Uuid;

use crate::{auth::require_auth, error::ApiError, state::AppState};

pub mod authen;
pub mod health;

/// Header carrying the per-request trace id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Generates a UUID v4 trace id for requests that arrive without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeTraceId;

impl MakeRequestId for MakeTraceId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

pub fn router(state: AppState) -> Router {
    let authen_routes = Router::new()
        .route("/login", get(authen::login))
        .route("/me", get(authen::me))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let trace_header = HeaderName::from_static(TRACE_ID_HEADER);
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            let trace_id = request
                .headers()
                .get(TRACE_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default();
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                trace_id = %trace_id,
                client_addr = client_addr(request).as_deref().unwrap_or("-"),
            )
        })
        .on_response(DefaultOnResponse::new().level(Level::INFO))
        .on_failure(DefaultOnFailure::new().level(Level::ERROR));

    // Layers run bottom-up: the id is set before the span reads it.
    Router::new()
        .route("/ping", get(health::ping))
        .route("/ready", get(health::readiness))
        .nest("/authen", authen_routes)
        .fallback(not_found)
        .with_state(state)
        .layer(PropagateRequestIdLayer::new(trace_header.clone()))
        .layer(trace_layer)
        .layer(SetRequestIdLayer::new(trace_header, MakeTraceId))
}

/// Peer address, present when served with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
fn client_addr<B>(request: &Request<B>) -> Option<String> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
}

async fn not_found() -> ApiError {
    ApiError::not_found("Not found")
}
