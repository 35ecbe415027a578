use anyhow::Result;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::media::VideoChange;
use crate::infra::{db::Db, events::EventHub};

pub const VIDEO_CHANGES_CHANNEL: &str = "video_changes";

const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Forwards `video_changes` notifications from Postgres into the event hub.
/// Runs for the life of the process and reconnects with backoff.
pub async fn run(db: Db, events: EventHub) -> Result<()> {
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    loop {
        let mut listener = match db.listen(VIDEO_CHANGES_CHANNEL).await {
            Ok(listener) => {
                info!(channel = VIDEO_CHANGES_CHANNEL, "video change listener connected");
                backoff_ms = INITIAL_BACKOFF_MS;
                listener
            }
            Err(err) => {
                warn!(error = ?err, backoff_ms, "failed to listen for video changes, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = next_backoff(backoff_ms);
                continue;
            }
        };

        loop {
            match listener.recv().await {
                Ok(notification) => match parse_change(notification.payload()) {
                    Some(change) => {
                        let receivers = events.publish(change);
                        debug!(receivers, "video change published");
                    }
                    None => {
                        warn!(payload = notification.payload(), "unreadable video change payload");
                    }
                },
                Err(err) => {
                    warn!(error = ?err, "video change listener lost its connection");
                    break;
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = next_backoff(backoff_ms);
    }
}

pub fn parse_change(payload: &str) -> Option<VideoChange> {
    serde_json::from_str(payload).ok()
}

fn next_backoff(current_ms: u64) -> u64 {
    (current_ms * 2).min(MAX_BACKOFF_MS)
}
