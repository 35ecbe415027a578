pub mod video_listener;
