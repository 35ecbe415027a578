use tokio::sync::broadcast;

use crate::domain::media::VideoChange;

/// Fan-out of video row changes to every connected dashboard stream.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<VideoChange>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns the number of subscribers that received the change.
    pub fn publish(&self, change: VideoChange) -> usize {
        self.sender.send(change).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VideoChange> {
        self.sender.subscribe()
    }
}

/// SSE event name for a change. Reaching `ready` is announced once as its own
/// event so the dashboard can toast it; everything else is a plain update.
pub fn event_name(change: &VideoChange) -> &'static str {
    if change.became_ready() {
        "video.ready"
    } else {
        "video.updated"
    }
}
