//! Media Tests
//!
//! Covers space-scoped image and video listings, pagination, upload
//! credentials, batch ingest, host refresh and the video event stream.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::app;
use konserver::infra::hosts::RemoteVideoState;
use serde_json::json;
use uuid::Uuid;

// ===========================================================================
// Access
// ===========================================================================

#[tokio::test]
async fn listing_requires_authentication() {
    let Some(app) = app().await else { return };
    let user = app.create_user("media_anon").await;
    let space = app.create_space(user.id, "Anon").await;

    let resp = app.get(&format!("/spaces/{}/images", space), None).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.json()["success"], json!(false));

    let resp = app
        .get(&format!("/spaces/{}/images", space), Some("not-a-token"))
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn foreign_space_is_not_found() {
    let Some(app) = app().await else { return };
    let owner = app.create_user("media_owner").await;
    let stranger = app.create_user("media_stranger").await;
    let space = app.create_space(owner.id, "Private").await;

    let resp = app
        .get(
            &format!("/spaces/{}/videos", space),
            Some(&stranger.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.error_message(), "space not found");
}

// ===========================================================================
// Pagination
// ===========================================================================

#[tokio::test]
async fn image_listing_pages_newest_first() {
    let Some(app) = app().await else { return };
    let user = app.create_user("media_pages").await;
    let space = app.create_space(user.id, "Pages").await;

    let first = app.create_image(space, "first.png").await;
    let second = app.create_image(space, "second.png").await;
    let third = app.create_image(space, "third.png").await;

    let resp = app
        .get(
            &format!("/spaces/{}/images?limit=2", space),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    let ids: Vec<String> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec![third.to_string(), second.to_string()]);
    assert_eq!(body["next_cursor"], json!(second.to_string()));

    let resp = app
        .get(
            &format!("/spaces/{}/images?limit=2&cursor={}", space, second),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], json!(first.to_string()));
    assert!(body["next_cursor"].is_null());
}

#[tokio::test]
async fn limit_outside_range_is_rejected() {
    let Some(app) = app().await else { return };
    let user = app.create_user("media_limits").await;
    let space = app.create_space(user.id, "Limits").await;

    for limit in ["0", "51", "-3"] {
        let resp = app
            .get(
                &format!("/spaces/{}/images?limit={}", space, limit),
                Some(&user.access_token),
            )
            .await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST, "limit={}", limit);
    }

    let resp = app
        .get(
            &format!("/spaces/{}/images?limit=50", space),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn malformed_query_and_path_use_json_errors() {
    let Some(app) = app().await else { return };
    let user = app.create_user("media_bad_query").await;
    let space = app.create_space(user.id, "BadQuery").await;

    let resp = app
        .get(
            &format!("/spaces/{}/images?limit=abc", space),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.json()["success"], json!(false));
    assert!(!resp.error_message().is_empty());

    let resp = app
        .get("/spaces/not-a-uuid/videos", Some(&user.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.json()["success"], json!(false));

    let resp = app
        .post_json(
            &format!("/spaces/{}/media/ingest", space),
            json!({}),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.json()["success"], json!(false));
}

#[tokio::test]
async fn malformed_cursor_is_rejected_and_unknown_cursor_restarts() {
    let Some(app) = app().await else { return };
    let user = app.create_user("media_cursor").await;
    let space = app.create_space(user.id, "Cursor").await;
    let image = app.create_image(space, "only.png").await;

    let resp = app
        .get(
            &format!("/spaces/{}/images?cursor=nope", space),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = app
        .get(
            &format!("/spaces/{}/images?cursor={}", space, Uuid::new_v4()),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["items"][0]["id"], json!(image.to_string()));
}

// ===========================================================================
// Records and cache propagation
// ===========================================================================

#[tokio::test]
async fn created_image_shows_up_in_cached_listing() {
    let Some(app) = app().await else { return };
    let user = app.create_user("media_cache").await;
    let space = app.create_space(user.id, "Cache").await;
    let path = format!("/spaces/{}/images", space);

    let resp = app.get(&path, Some(&user.access_token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["items"].as_array().unwrap().len(), 0);

    let resp = app
        .post_json(
            &path,
            json!({
                "filename": "hero.png",
                "alt": "Hero",
                "public_id": "konserver/hero",
                "url": "https://images.test/hero.png",
                "width": 1200,
                "height": 800,
                "format": "png",
                "bytes": 2048
            }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let created = resp.json();
    assert_eq!(created["resolution"], json!({ "width": 1200, "height": 800 }));

    let resp = app.get(&path, Some(&user.access_token)).await;
    let items = resp.json()["items"].as_array().unwrap().clone();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], created["id"]);

    let resp = app
        .get(&format!("/spaces/{}/media", space), Some(&user.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["images"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn image_with_partial_resolution_is_rejected() {
    let Some(app) = app().await else { return };
    let user = app.create_user("media_partial").await;
    let space = app.create_space(user.id, "Partial").await;

    let resp = app
        .post_json(
            &format!("/spaces/{}/images", space),
            json!({
                "filename": "half.png",
                "public_id": "konserver/half",
                "url": "https://images.test/half.png",
                "width": 10
            }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn recorded_video_starts_processing() {
    let Some(app) = app().await else { return };
    let user = app.create_user("media_video").await;
    let space = app.create_space(user.id, "Video").await;

    let resp = app
        .post_json(
            &format!("/spaces/{}/videos", space),
            json!({ "filename": "clip.mp4", "identifier": "upload-recorded-1" }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let body = resp.json();
    assert_eq!(body["status"], json!("processing"));
    assert!(body["playback_id"].is_null());

    let resp = app
        .post_json(
            &format!("/spaces/{}/videos", space),
            json!({ "filename": "clip.mp4", "identifier": "upload-recorded-1" }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

// ===========================================================================
// Upload credentials
// ===========================================================================

#[tokio::test]
async fn upload_credentials_are_issued() {
    let Some(app) = app().await else { return };
    let user = app.create_user("media_creds").await;
    let space = app.create_space(user.id, "Creds").await;

    let resp = app
        .post_json(
            &format!("/spaces/{}/images/signature", space),
            json!({}),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["signature"], json!("fake-signature"));

    let resp = app
        .post_json(
            &format!("/spaces/{}/videos/uploads", space),
            json!({}),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert!(body["upload_url"].as_str().unwrap().starts_with("https://"));
    assert!(body["upload_id"].as_str().unwrap().starts_with("upload-"));
}

// ===========================================================================
// Batch ingest
// ===========================================================================

#[tokio::test]
async fn ingest_reports_partial_failure() {
    let Some(app) = app().await else { return };
    let user = app.create_user("media_ingest").await;
    let space = app.create_space(user.id, "Ingest").await;

    let resp = app
        .post_files(
            &format!("/spaces/{}/media/ingest", space),
            &[
                ("photo.png", "image/png", "png-bytes"),
                ("reject-photo.png", "image/png", "bad-bytes"),
                ("clip.mp4", "video/mp4", "mp4-bytes"),
                ("notes.txt", "text/plain", "hello"),
            ],
            &user.access_token,
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    let body = resp.json();
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], json!("Some uploads failed"));
    assert_eq!(body["images"].as_array().unwrap().len(), 1);
    assert_eq!(body["videos"].as_array().unwrap().len(), 1);
    assert_eq!(body["videos"][0]["status"], json!("processing"));

    let mut failed: Vec<(String, String)> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|detail| {
            (
                detail["filename"].as_str().unwrap().to_string(),
                detail["type"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    failed.sort();
    assert_eq!(
        failed,
        vec![
            ("notes.txt".to_string(), "unsupported".to_string()),
            ("reject-photo.png".to_string(), "image".to_string()),
        ]
    );
}

#[tokio::test]
async fn failed_video_transfer_leaves_failed_row() {
    let Some(app) = app().await else { return };
    let user = app.create_user("media_ingest_fail").await;
    let space = app.create_space(user.id, "IngestFail").await;
    let listing = format!("/spaces/{}/videos", space);

    let resp = app.get(&listing, Some(&user.access_token)).await;
    assert_eq!(resp.json()["items"].as_array().unwrap().len(), 0);

    let resp = app
        .post_files(
            &format!("/spaces/{}/media/ingest", space),
            &[("reject-clip.mp4", "video/mp4", "mp4-bytes")],
            &user.access_token,
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["success"], json!(false));

    let status: String = sqlx::query_scalar(
        "SELECT status::text FROM videos WHERE space_id = $1 AND filename = 'reject-clip.mp4'",
    )
    .bind(space)
    .fetch_one(app.pool())
    .await
    .unwrap();
    assert_eq!(status, "failed");

    let resp = app.get(&listing, Some(&user.access_token)).await;
    let body = resp.json();
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["items"][0]["filename"], json!("reject-clip.mp4"));
    assert_eq!(body["items"][0]["status"], json!("failed"));
}

#[tokio::test]
async fn empty_ingest_is_rejected() {
    let Some(app) = app().await else { return };
    let user = app.create_user("media_ingest_empty").await;
    let space = app.create_space(user.id, "IngestEmpty").await;

    let resp = app
        .post_files(
            &format!("/spaces/{}/media/ingest", space),
            &[],
            &user.access_token,
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

// ===========================================================================
// Refresh from host
// ===========================================================================

#[tokio::test]
async fn refresh_applies_ready_state_from_host() {
    let Some(app) = app().await else { return };
    let user = app.create_user("media_refresh").await;
    let space = app.create_space(user.id, "Refresh").await;
    let (video_id, identifier) = app.create_pending_video(space, "refresh.mp4").await;

    app.video_host.set_state(
        &identifier,
        RemoteVideoState {
            upload_status: "asset_created".into(),
            asset_id: Some("asset-refresh".into()),
            asset_status: Some("ready".into()),
            playback_id: Some("playback-refresh".into()),
            duration: Some(12.5),
            aspect_ratio: Some("16:9".into()),
        },
    );

    let resp = app
        .post_json(
            &format!("/spaces/{}/videos/{}/refresh", space, video_id),
            json!({}),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["status"], json!("ready"));
    assert_eq!(body["playback_id"], json!("playback-refresh"));

    let resp = app
        .post_json(
            &format!("/spaces/{}/videos/{}/refresh", space, Uuid::new_v4()),
            json!({}),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn refresh_surfaces_host_errors_as_bad_gateway() {
    let Some(app) = app().await else { return };
    let user = app.create_user("media_refresh_err").await;
    let space = app.create_space(user.id, "RefreshErr").await;
    let (video_id, _) = app.create_pending_video(space, "unknown.mp4").await;

    let resp = app
        .post_json(
            &format!("/spaces/{}/videos/{}/refresh", space, video_id),
            json!({}),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_GATEWAY);
}

// ===========================================================================
// Event stream
// ===========================================================================

#[tokio::test]
async fn event_stream_opens_for_owner_only() {
    let Some(app) = app().await else { return };
    let owner = app.create_user("media_sse").await;
    let stranger = app.create_user("media_sse_other").await;
    let space = app.create_space(owner.id, "Stream").await;

    let request = Request::builder()
        .method(Method::GET)
        .uri(format!("/spaces/{}/videos/events", space))
        .header("Authorization", format!("Bearer {}", owner.access_token))
        .body(Body::empty())
        .unwrap();
    let (status, headers) = app.send_head_only(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("content-type").unwrap().to_str().unwrap(),
        "text/event-stream"
    );

    let resp = app
        .get(
            &format!("/spaces/{}/videos/events", space),
            Some(&stranger.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}
