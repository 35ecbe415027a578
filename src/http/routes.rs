use axum::extract::DefaultBodyLimit;
use axum::{routing::get, routing::post, Router};
use tower_http::limit::RequestBodyLimitLayer;

use crate::AppState;
use crate::http::handlers;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn users() -> Router<AppState> {
    Router::new()
        .route("/me", get(handlers::get_me).patch(handlers::update_me))
        .route(
            "/me/api-key",
            get(handlers::reveal_api_key).post(handlers::generate_api_key),
        )
}

pub fn spaces() -> Router<AppState> {
    Router::new()
        .route("/spaces", get(handlers::list_spaces))
        .route("/spaces/default", get(handlers::default_space))
        .route("/spaces/:id/media", get(handlers::space_media))
}

pub fn media() -> Router<AppState> {
    Router::new()
        .route(
            "/spaces/:id/images",
            get(handlers::list_images).post(handlers::create_image),
        )
        .route(
            "/spaces/:id/images/signature",
            post(handlers::sign_image_upload),
        )
        .route(
            "/spaces/:id/videos",
            get(handlers::list_videos).post(handlers::create_video),
        )
        .route(
            "/spaces/:id/videos/uploads",
            post(handlers::create_video_upload),
        )
        .route(
            "/spaces/:id/videos/:video_id/refresh",
            post(handlers::refresh_video),
        )
        .route("/spaces/:id/videos/events", get(handlers::video_events))
}

/// Multipart ingest gets its own body limit instead of axum's 2 MB default.
pub fn ingest(max_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/spaces/:id/media/ingest", post(handlers::ingest_media))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_bytes))
}

pub fn projects() -> Router<AppState> {
    Router::new()
        .route(
            "/spaces/:id/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route(
            "/spaces/:id/projects/:project_id",
            get(handlers::get_project)
                .put(handlers::update_project)
                .delete(handlers::delete_project),
        )
}

pub fn webhooks() -> Router<AppState> {
    Router::new().route("/webhooks/mux", post(handlers::mux_webhook))
}
