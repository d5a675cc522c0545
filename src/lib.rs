// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Azure Claim Auth - bearer and claim token authentication
//!
//! Verifies an Azure AD access token against the tenant's published signing
//! keys, then decodes an internally issued RSA-signed claim token into a
//! request-scoped [`auth::AuthContext`].
//!
//! ## Modules
//!
//! - `api` - HTTP routes (Axum)
//! - `auth` - Key discovery, caching, token verification and middleware
//! - `config` - Environment configuration
//! - `logging` - Tracing subscriber setup

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod state;
