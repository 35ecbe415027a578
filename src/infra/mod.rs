pub mod cache;
pub mod cloudinary;
pub mod db;
pub mod events;
pub mod hosts;
pub mod mux;
