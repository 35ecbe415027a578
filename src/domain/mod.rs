pub mod media;
pub mod project;
pub mod space;
pub mod user;
