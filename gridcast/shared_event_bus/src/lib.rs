#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Event bus used to announce dataset, training and registry transitions.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::broadcast};

/// Event envelope encoded as one JSON object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique identifier.
    pub id: String,
    /// Component producing the event.
    pub source: String,
    /// Dotted topic, e.g. `gridcast.registry.swapped`.
    pub event_type: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Topic-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventRecord {
    /// Returns true when the topic equals `prefix` or lives underneath it.
    #[must_use]
    pub fn matches(&self, prefix: &str) -> bool {
        self.event_type == prefix
            || self
                .event_type
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
    }
}

/// Publishing side of the bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event.
    async fn publish(&self, event: EventRecord) -> Result<()>;
}

/// Subscribing side of the bus.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Returns a receiver for events published after the call.
    async fn subscribe(&self) -> Result<broadcast::Receiver<EventRecord>>;
}

/// In-process broadcast bus with a bounded replay backlog.
#[derive(Debug, Clone)]
pub struct MemoryEventBus {
    sender: broadcast::Sender<EventRecord>,
    backlog: Arc<Mutex<VecDeque<EventRecord>>>,
    capacity: usize,
}

impl MemoryEventBus {
    /// Creates a bus retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Retained events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Retained events whose topic lives under `prefix`.
    #[must_use]
    pub fn topic(&self, prefix: &str) -> Vec<EventRecord> {
        self.backlog
            .lock()
            .iter()
            .filter(|event| event.matches(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, event: EventRecord) -> Result<()> {
        {
            let mut backlog = self.backlog.lock();
            if backlog.len() == self.capacity {
                backlog.pop_front();
            }
            backlog.push_back(event.clone());
        }
        // no live subscribers is not an error
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for MemoryEventBus {
    async fn subscribe(&self) -> Result<broadcast::Receiver<EventRecord>> {
        Ok(self.sender.subscribe())
    }
}

/// Publisher appending events to a JSON-lines file.
#[derive(Debug, Clone)]
pub struct FileEventPublisher {
    path: PathBuf,
}

impl FileEventPublisher {
    /// Creates a publisher writing to `path`, creating parent directories.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating event log dir {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    /// Event log location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventPublisher for FileEventPublisher {
    async fn publish(&self, event: EventRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening event log {}", self.path.display()))?;
        let mut data = serde_json::to_vec(&event)?;
        data.push(b'\n');
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::runtime::Runtime;

    fn event(topic: &str) -> EventRecord {
        EventRecord {
            id: format!("evt-{topic}"),
            source: "gridcast.test".into(),
            event_type: topic.into(),
            timestamp: "2026-01-05T00:00:00Z".into(),
            payload: serde_json::json!({ "version": 2 }),
        }
    }

    #[test]
    fn publishes_and_receives() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let bus = MemoryEventBus::new(8);
            let mut rx = bus.subscribe().await.unwrap();
            bus.publish(event("gridcast.registry.swapped")).await.unwrap();
            let received = rx.recv().await.unwrap();
            assert_eq!(received.event_type, "gridcast.registry.swapped");
        });
    }

    #[test]
    fn backlog_is_bounded() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let bus = MemoryEventBus::new(2);
            for topic in ["a.one", "a.two", "a.three"] {
                bus.publish(event(topic)).await.unwrap();
            }
            let retained = bus.snapshot();
            assert_eq!(retained.len(), 2);
            assert_eq!(retained[0].event_type, "a.two");
        });
    }

    #[test]
    fn topic_filter_respects_segments() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let bus = MemoryEventBus::new(8);
            bus.publish(event("gridcast.training.completed")).await.unwrap();
            bus.publish(event("gridcast.trainingx")).await.unwrap();
            bus.publish(event("gridcast.dataset.appended")).await.unwrap();
            assert_eq!(bus.topic("gridcast.training").len(), 1);
            assert_eq!(bus.topic("gridcast").len(), 3);
        });
    }

    #[test]
    fn file_publisher_appends_lines() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempdir().unwrap();
            let publisher = FileEventPublisher::new(dir.path().join("logs/events.jsonl")).unwrap();
            publisher.publish(event("gridcast.dataset.appended")).await.unwrap();
            publisher.publish(event("gridcast.dataset.restored")).await.unwrap();
            let content = std::fs::read_to_string(publisher.path()).unwrap();
            assert_eq!(content.lines().count(), 2);
            assert!(content.contains("gridcast.dataset.restored"));
        });
    }
}
