// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;

use azure_claim_auth::{
    api::router,
    auth::{Authenticator, ClaimDecoder, KeySource, TokenVerifier},
    config::{LogFormat, Settings},
    logging::init_tracing,
    state::AppState,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(LogFormat::from_env());

    let settings = Settings::from_env().map_err(|e| {
        error!("Failed to load configuration: {e}");
        e
    })?;

    info!(
        discovery_url = %settings.discovery_url,
        issuer_checked = settings.issuer.is_some(),
        audience_checked = settings.audience.is_some(),
        clock_skew_secs = settings.clock_skew.as_secs(),
        "Configuration loaded"
    );

    let authenticator = build_authenticator(&settings)?;
    authenticator.initialize().await.map_err(|e| {
        error!(error_code = e.error_code(), "Failed to load authentication keys: {e}");
        e
    })?;

    let app = router(AppState::new(authenticator));

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(settings.bind_addr).await?;
    info!("Listening on http://{}", settings.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await?;

    info!("Shutdown complete");
    Ok(())
}

fn build_authenticator(settings: &Settings) -> Result<Authenticator, Box<dyn std::error::Error>> {
    let source = KeySource::new(settings.discovery_url.clone(), settings.http_timeout)?;

    let mut verifier = TokenVerifier::new().with_leeway(settings.clock_skew);
    if let Some(issuer) = &settings.issuer {
        verifier = verifier.with_issuer(issuer.clone());
    }
    if let Some(audience) = &settings.audience {
        verifier = verifier.with_audience(audience.clone());
    }

    Ok(Authenticator::new(source, settings.claim_key_pem.clone())
        .with_verifier(verifier)
        .with_decoder(ClaimDecoder::new().with_leeway(settings.clock_skew))
        .with_refresh_min_interval(settings.refresh_min_interval))
}

/// Cancels `token` on SIGINT or SIGTERM.
async fn wait_for_signal(token: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown"),
            Err(e) => error!("Failed to listen for SIGINT: {e}"),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    token.cancel();
}
