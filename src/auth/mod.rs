// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Two-stage token verification for requests fronted by Azure AD.
//!
//! ## Auth Flow
//!
//! 1. Client authenticates with Azure AD and obtains an access token
//! 2. Client sends `Authorization: Bearer <Azure JWT>` plus the internally
//!    issued claim token in header `X`
//! 3. Server:
//!    - Resolves the tenant's OpenID configuration to its JWKS (once, at startup)
//!    - Verifies the bearer signature by `kid`, then `exp` and `iss`
//!    - Verifies the claim token against the configured RSA public key
//!    - Extracts:
//!      - `payload.user.uname` → username (part before `@`)
//!      - `payload.policy[0].code` → policy code
//!
//! ## Security
//!
//! - Every failure is answered with the same opaque 401
//! - Only RSA algorithms are accepted; `alg: none` never verifies
//! - Key material is fetched once and shared; unknown `kid`s trigger at most
//!   one throttled refresh

pub mod authenticator;
pub mod cache;
pub mod claim;
pub mod context;
pub mod error;
pub mod extractor;
pub mod jwks;
pub mod middleware;
pub mod verifier;

#[cfg(test)]
pub(crate) mod test_support;

pub use authenticator::{Authenticator, CLAIM_TOKEN_HEADER};
pub use cache::KeyCache;
pub use claim::{Claim, ClaimDecoder, ClaimKey};
pub use context::{attach, AuthContext, AuthContextExt, AuthStage};
pub use error::AuthError;
pub use extractor::{Auth, OptionalAuth};
pub use jwks::{KeySet, KeySource, SigningKey};
pub use middleware::require_auth;
pub use verifier::{ParsedClaims, TokenVerifier};
