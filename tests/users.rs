//! User Tests
//!
//! Covers the caller's profile, API key issuance and authentication, and the
//! default space.

mod common;

use axum::http::{Method, StatusCode};
use common::app;
use konserver::http::API_KEY_HEADER;
use serde_json::json;

// ===========================================================================
// Profile
// ===========================================================================

#[tokio::test]
async fn me_returns_safe_profile() {
    let Some(app) = app().await else { return };
    let user = app.create_user("me_get").await;

    let resp = app.get("/me", Some(&user.access_token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["id"], json!(user.id.to_string()));
    assert_eq!(body["full_name"], json!("User me_get Tester"));
    assert_eq!(body["role"], json!("user"));
    assert!(body.get("api_key_hash").is_none());
    assert!(body.get("api_key_ciphertext").is_none());
}

#[tokio::test]
async fn me_requires_authentication() {
    let Some(app) = app().await else { return };

    let resp = app.get("/me", None).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.error_message(), "missing Authorization header");
}

#[tokio::test]
async fn profile_update_keeps_omitted_fields() {
    let Some(app) = app().await else { return };
    let user = app.create_user("me_update").await;

    let resp = app
        .send_json(
            Method::PATCH,
            "/me",
            json!({ "first_name": "  Ada ", "bio": "Filmmaker" }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["first_name"], json!("Ada"));
    assert_eq!(body["last_name"], json!("Tester"));
    assert_eq!(body["bio"], json!("Filmmaker"));

    let resp = app
        .send_json(
            Method::PATCH,
            "/me",
            json!({ "first_name": "" }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

// ===========================================================================
// API keys
// ===========================================================================

#[tokio::test]
async fn api_key_is_generated_revealed_and_accepted() {
    let Some(app) = app().await else { return };
    let user = app.create_user("api_key").await;

    let resp = app.get("/me/api-key", Some(&user.access_token)).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);

    let resp = app
        .post_json("/me/api-key", json!({}), Some(&user.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let api_key = resp.json()["api_key"].as_str().unwrap().to_string();
    assert_eq!(api_key.len(), 32);

    let resp = app.get("/me/api-key", Some(&user.access_token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["api_key"], json!(api_key));

    let resp = app
        .request(Method::GET, "/me", None, &[(API_KEY_HEADER, api_key.as_str())])
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["id"], json!(user.id.to_string()));

    let resp = app
        .post_json("/me/api-key", json!({}), Some(&user.access_token))
        .await;
    let rotated = resp.json()["api_key"].as_str().unwrap().to_string();
    assert_ne!(rotated, api_key);

    let resp = app
        .request(Method::GET, "/me", None, &[(API_KEY_HEADER, api_key.as_str())])
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_api_key_is_rejected() {
    let Some(app) = app().await else { return };

    let resp = app
        .request(
            Method::GET,
            "/spaces",
            None,
            &[(API_KEY_HEADER, "0123456789abcdefghijklmnopqrstuv")],
        )
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.error_message(), "invalid api key");
}

// ===========================================================================
// Spaces
// ===========================================================================

#[tokio::test]
async fn default_space_is_created_once() {
    let Some(app) = app().await else { return };
    let user = app.create_user("default_space").await;

    let first = app.get("/spaces/default", Some(&user.access_token)).await;
    assert_eq!(first.status, StatusCode::OK);
    let second = app.get("/spaces/default", Some(&user.access_token)).await;
    assert_eq!(second.json()["id"], first.json()["id"]);

    let resp = app.get("/spaces", Some(&user.access_token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json().as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn default_space_prefers_existing_earliest_space() {
    let Some(app) = app().await else { return };
    let user = app.create_user("default_existing").await;
    let earliest = app.create_space(user.id, "Studio").await;
    app.create_space(user.id, "Archive").await;

    let resp = app.get("/spaces/default", Some(&user.access_token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["id"], json!(earliest.to_string()));
}

#[tokio::test]
async fn health_reports_ok() {
    let Some(app) = app().await else { return };

    let resp = app.get("/health", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["status"], json!("ok"));
}
