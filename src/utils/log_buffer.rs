//! In-memory log ring buffer for the host UI's log pane.
//!
//! The engine logs through `tracing`; the host installs [`BufferLayer`]
//! alongside its own layers and renders [`LogBuffer::entries`] wherever
//! it surfaces diagnostics. Entries are capped at
//! [`MAX_LOG_ENTRIES`](crate::core::config::MAX_LOG_ENTRIES), oldest
//! dropped first.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::core::config::MAX_LOG_ENTRIES;

#[derive(Clone)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: Level,
    pub message: String,
}

/// Bounded ring of recent log entries.
#[derive(Clone)]
pub struct LogBuffer {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= MAX_LOG_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// A `tracing` layer feeding a [`LogBuffer`].
pub struct BufferLayer {
    buffer: LogBuffer,
}

impl BufferLayer {
    pub fn new(buffer: LogBuffer) -> Self {
        Self { buffer }
    }
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else if self.message.is_empty() {
            self.message = format!("{} = {}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for BufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();

        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let message = if visitor.message.is_empty() {
            meta.target().to_string()
        } else {
            format!("{}: {}", meta.target(), visitor.message)
        };

        let timestamp = {
            let dur = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default();
            let total_secs = dur.as_secs();
            format!(
                "{:02}:{:02}:{:02}",
                (total_secs / 3600) % 24,
                (total_secs / 60) % 60,
                total_secs % 60
            )
        };

        self.buffer.push(LogEntry {
            timestamp,
            level: *meta.level(),
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            timestamp: "00:00:00".into(),
            level: Level::INFO,
            message: message.into(),
        }
    }

    #[test]
    fn keeps_entries_in_order() {
        let buffer = LogBuffer::new();
        buffer.push(entry("first"));
        buffer.push(entry("second"));

        let entries = buffer.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].message, "second");
    }

    #[test]
    fn caps_at_max_entries_dropping_oldest() {
        let buffer = LogBuffer::new();
        for i in 0..(MAX_LOG_ENTRIES + 10) {
            buffer.push(entry(&format!("line {i}")));
        }

        let entries = buffer.entries();
        assert_eq!(entries.len(), MAX_LOG_ENTRIES);
        assert_eq!(entries[0].message, "line 10");
    }

    #[test]
    fn layer_captures_tracing_events() {
        use tracing_subscriber::layer::SubscriberExt;

        let buffer = LogBuffer::new();
        let subscriber =
            tracing_subscriber::registry().with(BufferLayer::new(buffer.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(event = "test_event", "something happened");
        });

        let entries = buffer.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].message.contains("something happened"));
    }
}
