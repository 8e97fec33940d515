use super::event::{EventMetadata, MotionEvent};
use crate::error::{MotionCamError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Consumer of completed events
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, event: &MotionEvent) -> Result<()>;
}

/// In-memory event list, newest first, bounded
pub struct EventLog {
    events: Mutex<VecDeque<MotionEvent>>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Metadata of every retained event, newest first
    pub fn list(&self) -> Vec<EventMetadata> {
        self.events.lock().iter().map(MotionEvent::metadata).collect()
    }

    /// Full event including payload, for download or playback
    pub fn get(&self, id: Uuid) -> Option<MotionEvent> {
        self.events.lock().iter().find(|e| e.id == id).cloned()
    }

    pub fn delete(&self, id: Uuid) -> bool {
        let mut events = self.events.lock();
        match events.iter().position(|e| e.id == id) {
            Some(index) => {
                events.remove(index);
                debug!("Deleted event {}", id);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl EventSink for EventLog {
    fn name(&self) -> &str {
        "event_log"
    }

    async fn deliver(&self, event: &MotionEvent) -> Result<()> {
        let mut events = self.events.lock();
        events.push_front(event.clone());
        if events.len() > self.capacity {
            if let Some(dropped) = events.pop_back() {
                debug!("Event log full, dropped oldest event {}", dropped.id);
            }
        }
        Ok(())
    }
}

/// Writes each event's clip and, optionally, a JSON metadata file
pub struct DirectorySink {
    path: PathBuf,
    save_payloads: bool,
    save_metadata: bool,
}

impl DirectorySink {
    pub fn new(path: impl Into<PathBuf>, save_payloads: bool, save_metadata: bool) -> Self {
        Self {
            path: path.into(),
            save_payloads,
            save_metadata,
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn write_metadata(&self, event: &MotionEvent) -> Result<()> {
        let metadata_json = serde_json::to_string_pretty(&event.metadata()).map_err(|e| {
            MotionCamError::component(
                "directory_sink",
                format!("Failed to serialize metadata: {}", e),
            )
        })?;

        let metadata_dir = self.path.join("metadata");
        fs::create_dir_all(&metadata_dir).await.map_err(|e| {
            MotionCamError::component(
                "directory_sink",
                format!("Failed to create metadata directory: {}", e),
            )
        })?;

        let metadata_path = metadata_dir.join(format!("{}.json", event.id));
        fs::write(&metadata_path, metadata_json).await.map_err(|e| {
            MotionCamError::component(
                "directory_sink",
                format!("Failed to write metadata file: {}", e),
            )
        })?;

        debug!("Saved metadata to {}", metadata_path.display());
        Ok(())
    }
}

#[async_trait]
impl EventSink for DirectorySink {
    fn name(&self) -> &str {
        "directory"
    }

    async fn deliver(&self, event: &MotionEvent) -> Result<()> {
        if self.save_payloads {
            fs::create_dir_all(&self.path).await.map_err(|e| {
                MotionCamError::component(
                    "directory_sink",
                    format!("Failed to create {}: {}", self.path.display(), e),
                )
            })?;

            let clip_path = self.path.join(&event.filename);
            fs::write(&clip_path, &event.payload).await.map_err(|e| {
                MotionCamError::component(
                    "directory_sink",
                    format!("Failed to write {}: {}", clip_path.display(), e),
                )
            })?;
            info!(
                "Saved event clip {} ({} bytes)",
                clip_path.display(),
                event.size_bytes()
            );
        }

        if self.save_metadata {
            self.write_metadata(event).await?;
        }
        Ok(())
    }
}

/// Forwards events to an mpsc receiver
pub struct ChannelSink {
    sender: mpsc::Sender<MotionEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MotionEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn deliver(&self, event: &MotionEvent) -> Result<()> {
        self.sender
            .send(event.clone())
            .await
            .map_err(|_| MotionCamError::component("channel_sink", "Event receiver dropped"))
    }
}
