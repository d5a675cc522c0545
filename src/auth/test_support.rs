// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fixture keys and token minting shared by the auth tests.

use base64ct::{Base64, Encoding};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

use super::claim::ClaimKey;
use super::jwks::{KeySet, SigningKey};

pub const IDP_KID: &str = "idp-test-key";
pub const TEST_ISSUER: &str = "https://login.example.com/tenant/v2.0";

/// Base64url modulus of `testdata/idp_rsa.pem`.
pub const IDP_N: &str = "5NU6fbvBaew4hbOWcRoBDmO8jb2i5l9iMys80NrChMutngd2iYRRlYk-1KNV4eTDbFQhecBduKv7Xnm16R_9yrs8lGeHAi1ARMF3oODAfVI-kFhDFo32AmQqr6OE3bE2ucKmXGjAXmzG9f7lDn3oTeje-0CRvqYl6vWGdxePG_F3acm2x8ljqOuABest9VlY7wWvQc9KOWe9TlRRGDK2yUoTjjUWwCDv6VVx82qjCU0Ad2EAoYmbwjC19Jilgd1oCljyQVXhcgJ3nlyDaS2uIc90XWOxxSaUL6UQBMQET_Md7-BoJoI5wfyG6DZKLJnD1SeHnIussbK2LteohjNegQ";
pub const IDP_E: &str = "AQAB";

pub const IDP_PRIVATE_PEM: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/idp_rsa.pem"));
pub const ROGUE_PRIVATE_PEM: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/rogue_rsa.pem"));
pub const CLAIM_PRIVATE_PEM: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/claim_rsa.pem"));
pub const CLAIM_PUBLIC_PEM: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/claim_rsa.pub.pem"));
pub const EC_PUBLIC_PEM: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/ec_p256.pub.pem"));

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// JWK entry for the fixture identity provider key.
pub fn idp_jwk(alg: Option<&str>) -> Value {
    let mut jwk = json!({
        "kty": "RSA",
        "use": "sig",
        "kid": IDP_KID,
        "n": IDP_N,
        "e": IDP_E,
    });
    if let Some(alg) = alg {
        jwk["alg"] = json!(alg);
    }
    jwk
}

pub fn idp_key_set() -> KeySet {
    let key = SigningKey::from_components(IDP_KID, IDP_N, IDP_E, None).unwrap();
    std::iter::once(key).collect()
}

/// Standard claims of a valid identity provider token.
pub fn bearer_claims() -> Value {
    json!({
        "iss": TEST_ISSUER,
        "sub": "00000000-0000-0000-0000-0000000000aa",
        "aud": "api://claim-auth",
        "iat": now(),
        "exp": now() + 3600,
        "name": "Alice Example",
    })
}

pub fn sign(alg: Algorithm, kid: Option<&str>, claims: &Value, private_pem: &str) -> String {
    let mut header = Header::new(alg);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).unwrap();
    encode(&header, claims, &key).unwrap()
}

/// Bearer token signed by the fixture identity provider key.
pub fn bearer_token(claims: &Value) -> String {
    sign(Algorithm::RS256, Some(IDP_KID), claims, IDP_PRIVATE_PEM)
}

/// Claim token wrapping `payload`, signed by the fixture claim issuer.
pub fn claim_token(payload: Value) -> String {
    let claims = json!({ "payload": payload, "exp": now() + 3600 });
    sign(Algorithm::RS256, None, &claims, CLAIM_PRIVATE_PEM)
}

pub fn alice_payload() -> Value {
    json!({
        "user": { "uname": "alice@example.com" },
        "policy": [ { "code": "P1" }, { "code": "P2" } ],
    })
}

/// The claim public key as it arrives through the environment.
pub fn claim_pem_base64() -> String {
    Base64::encode_string(CLAIM_PUBLIC_PEM.as_bytes())
}

pub fn claim_key() -> ClaimKey {
    ClaimKey::from_base64_pem(&claim_pem_base64()).unwrap()
}
