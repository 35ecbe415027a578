use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use crate::app::api_keys::ApiKeyService;
use crate::app::auth::AuthService;
use crate::http::AppError;
use crate::AppState;

/// The authenticated caller. Accepts a bearer access token or an API key.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: uuid::Uuid,
}

pub const API_KEY_HEADER: &str = "x-api-key";

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(api_key) = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            let service = ApiKeyService::new(state.db.clone(), state.api_key_cipher.clone());
            let user_id = service.authenticate(api_key).await.map_err(|err| {
                tracing::error!(error = ?err, "failed to check api key");
                AppError::internal("failed to authenticate")
            })?;
            let user_id = user_id.ok_or_else(|| AppError::unauthorized("invalid api key"))?;
            return Ok(AuthUser { user_id });
        }

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::unauthorized("invalid Authorization header"))?;

        let service = AuthService::new(state.session_key, state.access_ttl_minutes);
        let session = service
            .authenticate_access_token(token)
            .map_err(|_| AppError::internal("failed to authenticate"))?;

        let session = session.ok_or_else(|| AppError::unauthorized("invalid token"))?;
        Ok(AuthUser {
            user_id: session.user_id,
        })
    }
}
