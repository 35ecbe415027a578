use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Multipart, Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::app::api_keys::{ApiKeyService, RevealedKey};
use crate::app::ingest::{IngestReport, IngestService};
use crate::app::media::{MediaService, NewImage, Page, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::app::projects::{ProjectError, ProjectService};
use crate::app::spaces::SpaceService;
use crate::app::tag_cache::CacheTag;
use crate::app::uploads::UploadService;
use crate::app::users::{ProfileUpdate, UserService};
use crate::app::webhooks::{WebhookError, WebhookOutcome, WebhookService};
use crate::domain::media::{Image, Resolution, SpaceMedia, TransitionOutcome, Video};
use crate::domain::project::{Project, ProjectForm};
use crate::domain::space::Space;
use crate::domain::user::SafeUser;
use crate::infra::events::event_name;
use crate::infra::hosts::{DirectUpload, HostError, MediaFile, UploadSignature};
use crate::http::{AppError, AuthUser};
use crate::AppState;

pub const MUX_SIGNATURE_HEADER: &str = "mux-signature";

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Uuid>,
}

impl<T> From<Page<T>> for ListResponse<T> {
    fn from(page: Page<T>) -> Self {
        Self {
            items: page.items,
            next_cursor: page.next_cursor,
        }
    }
}

fn parse_pagination(query: PaginationQuery) -> Result<(Option<Uuid>, i64), AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(AppError::bad_request(format!(
            "limit must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }

    let cursor = match query.cursor.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(cursor) => {
            Some(Uuid::parse_str(cursor).map_err(|_| AppError::bad_request("invalid cursor"))?)
        }
    };

    Ok((cursor, limit))
}

fn page_variant(cursor: Option<Uuid>, limit: i64) -> String {
    match cursor {
        Some(cursor) => format!("after:{}:{}", cursor, limit),
        None => format!("first:{}", limit),
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    let Json(value) = payload?;
    Ok(value)
}

fn internal_error(err: anyhow::Error, message: &'static str) -> AppError {
    tracing::error!(error = ?err, "{}", message);
    AppError::internal(message)
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::payload_too_large("upload exceeds the maximum size")
    } else {
        AppError::bad_request(err.body_text())
    }
}

async fn owned_space(state: &AppState, user: &AuthUser, space_id: Uuid) -> Result<Space, AppError> {
    SpaceService::new(state.db.clone())
        .get_owned(space_id, user.user_id)
        .await
        .map_err(|err| internal_error(err, "failed to load space"))?
        .ok_or_else(|| AppError::not_found("space not found"))
}

fn required(value: String, field: &str) -> Result<String, AppError> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(AppError::bad_request(format!("{} is required", field)));
    }
    Ok(value)
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = state.db.ping().await.is_ok();
    let redis = state.cache.ping().await.is_ok();
    let status = if db && redis { "ok" } else { "degraded" };

    Json(HealthResponse { status })
}

pub async fn list_spaces(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Space>>, AppError> {
    let spaces = SpaceService::new(state.db.clone())
        .list(user.user_id)
        .await
        .map_err(|err| internal_error(err, "failed to list spaces"))?;
    Ok(Json(spaces))
}

pub async fn default_space(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Space>, AppError> {
    let space = SpaceService::new(state.db.clone())
        .get_or_create_default(user.user_id)
        .await
        .map_err(|err| internal_error(err, "failed to load default space"))?;
    Ok(Json(space))
}

pub async fn list_images(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<PaginationQuery>, QueryRejection>,
) -> Result<Json<ListResponse<Image>>, AppError> {
    let Path(space_id) = path?;
    let Query(query) = query?;
    let space = owned_space(&state, &user, space_id).await?;
    let (cursor, limit) = parse_pagination(query)?;

    let service = MediaService::new(state.db.clone());
    let page = state
        .tags
        .get_or_load(CacheTag::SpaceImages(space.id), &page_variant(cursor, limit), || {
            service.list_images(space.id, cursor, limit)
        })
        .await
        .map_err(|err| internal_error(err, "failed to list images"))?;

    Ok(Json(page.into()))
}

#[derive(Deserialize)]
pub struct CreateImageRequest {
    pub filename: String,
    pub alt: Option<String>,
    pub public_id: String,
    pub url: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub format: Option<String>,
    pub bytes: Option<i64>,
}

pub async fn create_image(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<CreateImageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Image>), AppError> {
    let Path(space_id) = path?;
    let space = owned_space(&state, &user, space_id).await?;
    let payload = json_body(payload)?;

    let resolution = match (payload.width, payload.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => Some(Resolution { width, height }),
        (None, None) => None,
        _ => return Err(AppError::bad_request("width and height must be positive and given together")),
    };

    let image = NewImage {
        filename: required(payload.filename, "filename")?,
        alt: payload.alt,
        public_id: required(payload.public_id, "public_id")?,
        url: required(payload.url, "url")?,
        resolution,
        format: payload.format,
        bytes: payload.bytes,
    };

    let image = MediaService::new(state.db.clone())
        .create_image(space.id, image)
        .await
        .map_err(|err| internal_error(err, "failed to create image"))?;
    state.tags.invalidate(&CacheTag::image_write(space.id)).await;

    Ok((StatusCode::CREATED, Json(image)))
}

pub async fn list_videos(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<PaginationQuery>, QueryRejection>,
) -> Result<Json<ListResponse<Video>>, AppError> {
    let Path(space_id) = path?;
    let Query(query) = query?;
    let space = owned_space(&state, &user, space_id).await?;
    let (cursor, limit) = parse_pagination(query)?;

    let service = MediaService::new(state.db.clone());
    let page = state
        .tags
        .get_or_load(CacheTag::SpaceVideos(space.id), &page_variant(cursor, limit), || {
            service.list_videos(space.id, cursor, limit)
        })
        .await
        .map_err(|err| internal_error(err, "failed to list videos"))?;

    Ok(Json(page.into()))
}

#[derive(Deserialize)]
pub struct CreateVideoRequest {
    pub filename: String,
    pub alt: Option<String>,
    /// Upload id returned by `POST /spaces/:id/videos/uploads`.
    pub identifier: String,
}

pub async fn create_video(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<CreateVideoRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Video>), AppError> {
    let Path(space_id) = path?;
    let space = owned_space(&state, &user, space_id).await?;
    let payload = json_body(payload)?;
    let filename = required(payload.filename, "filename")?;
    let identifier = required(payload.identifier, "identifier")?;

    let video = MediaService::new(state.db.clone())
        .create_pending_video(space.id, filename, payload.alt, identifier)
        .await
        .map_err(|err| {
            if let Some(db_err) = err.downcast_ref::<sqlx::Error>() {
                if let Some(db_err) = db_err.as_database_error() {
                    if db_err.is_unique_violation() {
                        return AppError::bad_request("identifier is already recorded");
                    }
                }
            }
            internal_error(err, "failed to create video")
        })?;
    state.tags.invalidate(&CacheTag::video_write(space.id)).await;

    Ok((StatusCode::CREATED, Json(video)))
}

pub async fn space_media(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SpaceMedia>, AppError> {
    let Path(space_id) = path?;
    let space = owned_space(&state, &user, space_id).await?;

    let service = MediaService::new(state.db.clone());
    let media = state
        .tags
        .get_or_load(CacheTag::SpaceMedia(space.id), "all", || {
            service.space_media(space.id)
        })
        .await
        .map_err(|err| internal_error(err, "failed to load media"))?;

    Ok(Json(media))
}

fn upload_service(state: &AppState) -> UploadService {
    UploadService::new(
        MediaService::new(state.db.clone()),
        state.tags.clone(),
        state.image_host.clone(),
        state.video_host.clone(),
    )
}

pub async fn sign_image_upload(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<UploadSignature>, AppError> {
    let Path(space_id) = path?;
    owned_space(&state, &user, space_id).await?;
    let signature = upload_service(&state).sign_image_upload()?;
    Ok(Json(signature))
}

pub async fn create_video_upload(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<DirectUpload>, AppError> {
    let Path(space_id) = path?;
    owned_space(&state, &user, space_id).await?;
    let upload = upload_service(&state).issue_video_upload().await?;
    tracing::info!(space_id = %space_id, upload_id = %upload.upload_id, "video upload issued");
    Ok(Json(upload))
}

pub async fn refresh_video(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<(Uuid, Uuid)>, PathRejection>,
) -> Result<Json<Video>, AppError> {
    let Path((space_id, video_id)) = path?;
    let space = owned_space(&state, &user, space_id).await?;

    let video = upload_service(&state)
        .refresh_video(space.id, video_id)
        .await
        .map_err(|err| match err.downcast::<HostError>() {
            Ok(host_err) => AppError::from(host_err),
            Err(err) => internal_error(err, "failed to refresh video"),
        })?
        .ok_or_else(|| AppError::not_found("video not found"))?;

    Ok(Json(video))
}

pub async fn ingest_media(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<IngestReport>, AppError> {
    let Path(space_id) = path?;
    let mut multipart = multipart?;
    let space = owned_space(&state, &user, space_id).await?;

    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let filename = match field.file_name() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => continue,
        };
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field.bytes().await.map_err(multipart_error)?;
        files.push(MediaFile {
            filename,
            content_type,
            data,
        });
    }

    if files.is_empty() {
        return Err(AppError::bad_request("no files were uploaded"));
    }

    let service = IngestService::new(
        Arc::new(MediaService::new(state.db.clone())),
        state.image_host.clone(),
        state.video_host.clone(),
        state.ingest_concurrency,
    );
    let report = service.ingest(space.id, files).await;

    if !report.images.is_empty() {
        state.tags.invalidate(&CacheTag::image_write(space.id)).await;
    }
    if report.video_rows_written {
        state.tags.invalidate(&CacheTag::video_write(space.id)).await;
    }

    Ok(Json(report))
}

pub async fn video_events(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Path(space_id) = path?;
    let space = owned_space(&state, &user, space_id).await?;
    let space_id = space.id;
    tracing::debug!(space_id = %space_id, "video event stream opened");

    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(move |result| async move {
        match result {
            Ok(change) if change.space_id == space_id => {
                match Event::default().event(event_name(&change)).json_data(&change) {
                    Ok(event) => Some(Ok(event)),
                    Err(err) => {
                        tracing::warn!(error = ?err, "failed to encode video event");
                        None
                    }
                }
            }
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, space_id = %space_id, "video event stream lagged");
                Some(Ok(Event::default().event("resync").data(skipped.to_string())))
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

fn project_error(err: anyhow::Error, message: &'static str) -> AppError {
    if let Some(project_err) = err.downcast_ref::<ProjectError>() {
        return AppError::bad_request(project_err.to_string());
    }
    internal_error(err, message)
}

pub async fn list_projects(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Vec<Project>>, AppError> {
    let Path(space_id) = path?;
    let space = owned_space(&state, &user, space_id).await?;

    let service = ProjectService::new(state.db.clone());
    let projects = state
        .tags
        .get_or_load(CacheTag::SpaceProjects(space.id), "all", || {
            service.list(space.id)
        })
        .await
        .map_err(|err| internal_error(err, "failed to list projects"))?;

    Ok(Json(projects))
}

pub async fn create_project(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ProjectForm>, JsonRejection>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    let Path(space_id) = path?;
    let space = owned_space(&state, &user, space_id).await?;
    let draft = json_body(payload)?
        .validate()
        .map_err(AppError::bad_request)?;

    let project = ProjectService::new(state.db.clone())
        .create(space.id, draft)
        .await
        .map_err(|err| project_error(err, "failed to create project"))?;
    state.tags.invalidate(&[CacheTag::SpaceProjects(space.id)]).await;

    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<(Uuid, Uuid)>, PathRejection>,
) -> Result<Json<Project>, AppError> {
    let Path((space_id, project_id)) = path?;
    let space = owned_space(&state, &user, space_id).await?;

    let project = ProjectService::new(state.db.clone())
        .get(space.id, project_id)
        .await
        .map_err(|err| internal_error(err, "failed to load project"))?
        .ok_or_else(|| AppError::not_found("project not found"))?;

    Ok(Json(project))
}

pub async fn update_project(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<(Uuid, Uuid)>, PathRejection>,
    payload: Result<Json<ProjectForm>, JsonRejection>,
) -> Result<Json<Project>, AppError> {
    let Path((space_id, project_id)) = path?;
    let space = owned_space(&state, &user, space_id).await?;
    let draft = json_body(payload)?
        .validate()
        .map_err(AppError::bad_request)?;

    let project = ProjectService::new(state.db.clone())
        .update(space.id, project_id, draft)
        .await
        .map_err(|err| project_error(err, "failed to update project"))?
        .ok_or_else(|| AppError::not_found("project not found"))?;
    state.tags.invalidate(&[CacheTag::SpaceProjects(space.id)]).await;

    Ok(Json(project))
}

pub async fn delete_project(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<(Uuid, Uuid)>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let Path((space_id, project_id)) = path?;
    let space = owned_space(&state, &user, space_id).await?;

    let deleted = ProjectService::new(state.db.clone())
        .delete(space.id, project_id)
        .await
        .map_err(|err| internal_error(err, "failed to delete project"))?;
    if !deleted {
        return Err(AppError::not_found("project not found"));
    }
    state.tags.invalidate(&[CacheTag::SpaceProjects(space.id)]).await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<SafeUser>, AppError> {
    let profile = UserService::new(state.db.clone())
        .get_safe_user(user.user_id)
        .await
        .map_err(|err| internal_error(err, "failed to load user"))?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    Ok(Json(profile))
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
}

pub async fn update_me(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<SafeUser>, AppError> {
    let payload = json_body(payload)?;
    let first_name = required(payload.first_name.unwrap_or_default(), "first_name")?;

    let update = ProfileUpdate {
        first_name,
        last_name: payload.last_name,
        location: payload.location,
        bio: payload.bio,
    };

    let profile = UserService::new(state.db.clone())
        .update_profile(user.user_id, update)
        .await
        .map_err(|err| internal_error(err, "failed to update profile"))?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    Ok(Json(profile))
}

#[derive(Serialize)]
pub struct ApiKeyResponse {
    pub api_key: String,
}

pub async fn generate_api_key(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiKeyResponse>, AppError> {
    let api_key = ApiKeyService::new(state.db.clone(), state.api_key_cipher.clone())
        .generate(user.user_id)
        .await
        .map_err(|err| internal_error(err, "failed to generate api key"))?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    tracing::info!(user_id = %user.user_id, "api key regenerated");
    Ok(Json(ApiKeyResponse { api_key }))
}

pub async fn reveal_api_key(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiKeyResponse>, AppError> {
    let revealed = ApiKeyService::new(state.db.clone(), state.api_key_cipher.clone())
        .reveal(user.user_id)
        .await
        .map_err(|err| internal_error(err, "failed to load api key"))?;

    match revealed {
        RevealedKey::Key(api_key) => Ok(Json(ApiKeyResponse { api_key })),
        RevealedKey::NoKey => Err(AppError::not_found("no api key has been generated")),
        RevealedKey::UserNotFound => Err(AppError::not_found("user not found")),
    }
}

#[derive(Serialize)]
pub struct WebhookAck {
    pub success: bool,
    pub result: &'static str,
}

pub async fn mux_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(MUX_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let service = WebhookService::new(
        MediaService::new(state.db.clone()),
        state.tags.clone(),
        state.mux_webhook_secret.clone(),
        state.mux_webhook_tolerance_seconds,
    );
    let now = OffsetDateTime::now_utc().unix_timestamp();

    let outcome = service.reconcile(signature, &body, now).await.map_err(|err| match err {
        WebhookError::NotConfigured => {
            tracing::error!("video webhook received but no secret is configured");
            AppError::internal("webhook secret is not configured")
        }
        WebhookError::MissingSignature | WebhookError::InvalidSignature => {
            tracing::warn!(error = %err, "rejected video webhook");
            AppError::unauthorized(err.to_string())
        }
        WebhookError::MalformedPayload(_) | WebhookError::MissingPlaybackId => {
            tracing::warn!(error = %err, "unusable video webhook");
            AppError::bad_request(err.to_string())
        }
        WebhookError::Storage(err) => internal_error(err, "failed to process webhook"),
    })?;

    let result = match outcome {
        WebhookOutcome::Ignored => "ignored",
        WebhookOutcome::Reconciled(TransitionOutcome::Applied { .. }) => "applied",
        WebhookOutcome::Reconciled(TransitionOutcome::AlreadySettled { .. }) => "duplicate",
        WebhookOutcome::Reconciled(TransitionOutcome::Unmatched) => "unmatched",
    };

    Ok(Json(WebhookAck {
        success: true,
        result,
    }))
}
