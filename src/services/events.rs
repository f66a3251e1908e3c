//! Media lifecycle notifications.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::file::FileRecord;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MediaEventKind {
    #[serde(rename = "media.create")]
    Create,
    #[serde(rename = "media.delete")]
    Delete,
}

impl MediaEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaEventKind::Create => "media.create",
            MediaEventKind::Delete => "media.delete",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaEvent {
    pub event: MediaEventKind,
    pub media: FileRecord,
}

/// Fan-out of media events to any number of subscribers.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<MediaEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: MediaEventKind, media: &FileRecord) {
        let delivered = self
            .tx
            .send(MediaEvent {
                event,
                media: media.clone(),
            })
            .unwrap_or(0);
        tracing::debug!(event = event.as_str(), id = %media.id, delivered, "emitted media event");
    }
}
