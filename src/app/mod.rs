pub mod api_keys;
pub mod auth;
pub mod ingest;
pub mod media;
pub mod projects;
pub mod spaces;
pub mod tag_cache;
pub mod uploads;
pub mod users;
pub mod webhooks;
