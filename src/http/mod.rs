use axum::Router;

use crate::AppState;

mod auth;
mod error;
mod handlers;
mod routes;

pub use auth::{AuthUser, API_KEY_HEADER};
pub use error::AppError;
pub use handlers::MUX_SIGNATURE_HEADER;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health())
        .merge(routes::users())
        .merge(routes::spaces())
        .merge(routes::media())
        .merge(routes::ingest(state.upload_max_bytes))
        .merge(routes::projects())
        .merge(routes::webhooks())
        .with_state(state)
}
