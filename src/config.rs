// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the application. Configuration is loaded from the environment
//! at startup; a missing or invalid value stops the service.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `AZURE_INSTANCE` | Identity provider base URL (e.g. `https://login.microsoftonline.com`) | Required* |
//! | `AZURE_DOMAIN` | Domain path segment | Required* |
//! | `AZURE_TENANT` | Tenant path segment | Required* |
//! | `AZURE_DISCOVERY_URL` | Full OpenID configuration URL, replaces the three above | - |
//! | `AZURE_ISSUER` | Expected bearer `iss` claim | Not checked |
//! | `AZURE_AUDIENCE` | Expected bearer `aud` claim | Not checked |
//! | `PEM` | Base64-encoded PEM RSA public key for claim tokens | Required |
//! | `AUTH_HTTP_TIMEOUT_SECS` | Timeout for discovery and JWKS requests | `10` |
//! | `AUTH_CLOCK_SKEW_SECS` | Leeway applied to `exp`/`nbf` | `0` |
//! | `JWKS_REFRESH_MIN_INTERVAL_SECS` | Minimum time between key set refetches triggered by an unknown `kid`, failed attempts included | `300` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//!
//! \* unless `AZURE_DISCOVERY_URL` is set.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use url::Url;

use crate::auth::authenticator::DEFAULT_REFRESH_MIN_INTERVAL;
use crate::auth::jwks::DEFAULT_FETCH_TIMEOUT;

pub const AZURE_INSTANCE_ENV: &str = "AZURE_INSTANCE";
pub const AZURE_DOMAIN_ENV: &str = "AZURE_DOMAIN";
pub const AZURE_TENANT_ENV: &str = "AZURE_TENANT";
pub const AZURE_DISCOVERY_URL_ENV: &str = "AZURE_DISCOVERY_URL";
pub const AZURE_ISSUER_ENV: &str = "AZURE_ISSUER";
pub const AZURE_AUDIENCE_ENV: &str = "AZURE_AUDIENCE";

/// Environment variable holding the claim-token public key.
///
/// The value is the PEM document (`-----BEGIN PUBLIC KEY-----`) encoded once
/// more in standard base64, so it fits on one line.
pub const CLAIM_PEM_ENV: &str = "PEM";

pub const HTTP_TIMEOUT_ENV: &str = "AUTH_HTTP_TIMEOUT_SECS";
pub const CLOCK_SKEW_ENV: &str = "AUTH_CLOCK_SKEW_SECS";
pub const REFRESH_MIN_INTERVAL_ENV: &str = "JWKS_REFRESH_MIN_INTERVAL_SECS";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CLOCK_SKEW_SECS: u64 = 0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {0} is required")]
    Missing(&'static str),

    #[error("environment variable {name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl LogFormat {
    pub fn from_env() -> Self {
        Self::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref())
    }

    /// Anything other than `json` falls back to pretty output.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Settings consumed at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// OpenID configuration document of the tenant
    pub discovery_url: String,
    /// Expected bearer issuer
    pub issuer: Option<String>,
    /// Expected bearer audience
    pub audience: Option<String>,
    /// Base64-wrapped PEM of the claim verification key
    pub claim_key_pem: String,
    pub http_timeout: Duration,
    pub clock_skew: Duration,
    pub refresh_min_interval: Duration,
    pub bind_addr: SocketAddr,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through `lookup`, treating blank values as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let discovery_url = match get(AZURE_DISCOVERY_URL_ENV) {
            Some(url) => {
                Url::parse(&url).map_err(|e| ConfigError::Invalid {
                    name: AZURE_DISCOVERY_URL_ENV,
                    reason: e.to_string(),
                })?;
                url
            }
            None => discovery_url(
                &require(AZURE_INSTANCE_ENV)?,
                &require(AZURE_DOMAIN_ENV)?,
                &require(AZURE_TENANT_ENV)?,
            )?,
        };

        let host = get(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let host: IpAddr = host.parse().map_err(|_| ConfigError::Invalid {
            name: HOST_ENV,
            reason: format!("{host:?} is not an IP address"),
        })?;
        let port = parse_or(get(PORT_ENV), PORT_ENV, DEFAULT_PORT)?;

        Ok(Self {
            discovery_url,
            issuer: get(AZURE_ISSUER_ENV),
            audience: get(AZURE_AUDIENCE_ENV),
            claim_key_pem: require(CLAIM_PEM_ENV)?,
            http_timeout: Duration::from_secs(parse_or(
                get(HTTP_TIMEOUT_ENV),
                HTTP_TIMEOUT_ENV,
                DEFAULT_FETCH_TIMEOUT.as_secs(),
            )?),
            clock_skew: Duration::from_secs(parse_or(
                get(CLOCK_SKEW_ENV),
                CLOCK_SKEW_ENV,
                DEFAULT_CLOCK_SKEW_SECS,
            )?),
            refresh_min_interval: Duration::from_secs(parse_or(
                get(REFRESH_MIN_INTERVAL_ENV),
                REFRESH_MIN_INTERVAL_ENV,
                DEFAULT_REFRESH_MIN_INTERVAL.as_secs(),
            )?),
            bind_addr: SocketAddr::new(host, port),
        })
    }
}

/// `{instance}/{domain}/{tenant}/v2.0/.well-known/openid-configuration`
pub fn discovery_url(instance: &str, domain: &str, tenant: &str) -> Result<String, ConfigError> {
    let url = format!(
        "{}/{}/{}/v2.0/.well-known/openid-configuration",
        instance.trim_end_matches('/'),
        domain.trim_matches('/'),
        tenant.trim_matches('/'),
    );

    Url::parse(&url).map_err(|e| ConfigError::Invalid {
        name: AZURE_INSTANCE_ENV,
        reason: format!("{url:?} is not a URL: {e}"),
    })?;

    Ok(url)
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            name,
            reason: format!("{value:?} is not a valid number"),
        }),
        None => Ok(default),
    }
}
