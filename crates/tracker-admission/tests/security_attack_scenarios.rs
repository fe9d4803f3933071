//! Security attack scenario tests
//!
//! Verifies that admission rejects forged, tampered, and downgraded tokens,
//! and that anonymous throttling cannot be sidestepped with spoofed headers.

mod common;

use std::time::Duration;

use common::{Harness, request};
use http::{Method, StatusCode};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::json;

const JOB: &str = "/api/v1/jobs/17/interview";

/// Test: `alg: none` tokens are rejected
#[tokio::test]
async fn test_alg_none_rejected() {
    let h = Harness::new();
    // {"alg":"none","typ":"JWT"}
    // {"sub":"alice","iat":1700000000,"exp":4102444800,"tokenVersion":1}
    let forged = "eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0.\
                  eyJzdWIiOiJhbGljZSIsImlhdCI6MTcwMDAwMDAwMCwi\
                  ZXhwIjo0MTAyNDQ0ODAwLCJ0b2tlblZlcnNpb24iOjF9.";

    let res = h.send(request(Method::GET, JOB, Some(forged), "10.0.0.1")).await;

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.reached(), 0);
}

/// Test: Tokens signed with another key fail signature verification
#[tokio::test]
async fn test_foreign_key_rejected() {
    let h = Harness::new();
    let claims = json!({ "sub": "alice", "iat": 0, "exp": 4_102_444_800u64, "tokenVersion": 1 });
    let forged = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(b"attacker-guess"),
    )
    .unwrap();

    let res = h.send(request(Method::GET, JOB, Some(&forged), "10.0.0.1")).await;

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(common::message(&res), "invalid signature");
}

/// Test: Swapping the payload of a genuine token breaks its signature
#[tokio::test]
async fn test_payload_swap_rejected() {
    let h = Harness::new();
    let alice = h.token("alice", 1);
    let bob = h.token("bob", 1);

    // bob's header and signature around alice's payload
    let alice_parts: Vec<&str> = alice.split('.').collect();
    let bob_parts: Vec<&str> = bob.split('.').collect();
    let spliced = format!("{}.{}.{}", bob_parts[0], alice_parts[1], bob_parts[2]);

    let res = h.send(request(Method::GET, JOB, Some(&spliced), "10.0.0.1")).await;

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(common::message(&res), "invalid signature");
}

/// Test: A different HMAC algorithm with the right key is still rejected
#[tokio::test]
async fn test_algorithm_substitution_rejected() {
    let h = Harness::new();
    let claims = json!({ "sub": "alice", "iat": 0, "exp": 4_102_444_800u64, "tokenVersion": 1 });
    let token = encode(
        &Header::new(Algorithm::HS512),
        &claims,
        &EncodingKey::from_secret(common::SIGNING_KEY.as_bytes()),
    )
    .unwrap();

    let res = h.send(request(Method::GET, JOB, Some(&token), "10.0.0.1")).await;

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.reached(), 0);
}

/// Test: A validly signed token without a generation claim is stale
#[tokio::test]
async fn test_token_without_generation_rejected() {
    let h = Harness::new();
    let token = h
        .codec
        .encode("alice", serde_json::Map::new(), Duration::from_secs(60))
        .unwrap();

    let res = h.send(request(Method::GET, JOB, Some(&token), "10.0.0.1")).await;

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(common::message(&res), "stale token");
}

/// Test: A future generation is as stale as a past one
#[tokio::test]
async fn test_guessed_future_generation_rejected() {
    let h = Harness::new();
    let token = h.token("alice", 2);

    let res = h.send(request(Method::GET, JOB, Some(&token), "10.0.0.1")).await;
    assert_eq!(common::message(&res), "stale token");
}

/// Test: Rotating X-Forwarded-For does not buy fresh anonymous buckets
#[tokio::test]
async fn test_spoofed_forwarded_for_ignored_by_default() {
    let h = Harness::new();

    let mut statuses = Vec::new();
    for i in 0..6 {
        let mut req = request(Method::GET, common::HEALTH, None, "192.0.2.77");
        req.headers_mut()
            .insert("x-forwarded-for", format!("10.1.1.{i}").parse().unwrap());
        statuses.push(h.send(req).await.status());
    }

    assert_eq!(statuses.last(), Some(&StatusCode::TOO_MANY_REQUESTS));
    assert_eq!(h.reached(), 5);
}

/// Test: Non-bearer schemes are not accepted as credentials
#[tokio::test]
async fn test_basic_auth_is_malformed() {
    let h = Harness::new();
    let mut req = request(Method::GET, JOB, None, "10.0.0.1");
    req.headers_mut().insert(
        http::header::AUTHORIZATION,
        "Basic YWxpY2U6aHVudGVyMg==".parse().unwrap(),
    );

    let res = h.send(req).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(common::message(&res), "malformed token");
}
