use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{error, trace};

use crate::driver::MessageListener;
use crate::truncate_chars;

/// One inbound `message` event as the host window sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub origin: String,
    pub data: Value,
}

impl MessageEvent {
    pub fn new(origin: impl Into<String>, data: Value) -> Self {
        Self {
            origin: origin.into(),
            data,
        }
    }
}

/// A recorded message: sender origin plus the payload exactly as delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub origin: String,
    pub data: Value,
}

impl LogEntry {
    /// The payload's `type` tag, if it has a string one.
    pub fn event_type(&self) -> Option<&str> {
        self.data.get("type").and_then(Value::as_str)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.origin, truncate_chars(&self.data.to_string(), 160))
    }
}

#[derive(Debug)]
struct ObservationLog {
    entries: RwLock<Vec<Arc<LogEntry>>>,
    capacity: Option<usize>,
    dropped: AtomicUsize,
}

impl ObservationLog {
    fn append(&self, event: &MessageEvent) {
        let mut entries = self.entries.write();
        if let Some(capacity) = self.capacity {
            if entries.len() >= capacity {
                let dropped = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                error!(
                    capacity,
                    dropped,
                    origin = %event.origin,
                    "observation log full, message dropped"
                );
                return;
            }
        }
        entries.push(Arc::new(LogEntry {
            origin: event.origin.clone(),
            data: event.data.clone(),
        }));
        trace!(index = entries.len() - 1, origin = %event.origin, "message recorded");
    }
}

/// Owns the observation log of one host context.
///
/// The recorder hands out a passive listener for the host's inbound message
/// channel and any number of [`LogReader`]s over what that listener captured.
#[derive(Debug, Clone)]
pub struct MessageRecorder {
    log: Arc<ObservationLog>,
}

impl MessageRecorder {
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// `capacity` bounds the log depth; `None` keeps every message.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            log: Arc::new(ObservationLog {
                entries: RwLock::new(Vec::new()),
                capacity,
                dropped: AtomicUsize::new(0),
            }),
        }
    }

    /// Listener to register on the host's inbound channel.
    pub fn listener(&self) -> MessageListener {
        let log = Arc::clone(&self.log);
        Arc::new(move |event: &MessageEvent| log.append(event))
    }

    /// Records one delivery directly, as the listener would.
    pub fn record(&self, event: &MessageEvent) {
        self.log.append(event);
    }

    pub fn reader(&self) -> LogReader {
        LogReader {
            log: Arc::clone(&self.log),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.log.capacity
    }
}

impl Default for MessageRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view over a recorder's log.
#[derive(Debug, Clone)]
pub struct LogReader {
    log: Arc<ObservationLog>,
}

impl LogReader {
    /// Entries present at the instant of the call, in arrival order.
    pub fn snapshot(&self) -> LogSnapshot {
        let entries = self.log.entries.read().clone();
        LogSnapshot {
            entries,
            dropped: self.log.dropped.load(Ordering::SeqCst),
            capacity: self.log.capacity,
        }
    }

    /// Entries from `start` on; the tail a poller has not examined yet.
    pub(crate) fn snapshot_from(&self, start: usize) -> LogSnapshot {
        let entries = self.log.entries.read();
        let tail = entries.get(start..).map(<[_]>::to_vec).unwrap_or_default();
        LogSnapshot {
            entries: tail,
            dropped: self.log.dropped.load(Ordering::SeqCst),
            capacity: self.log.capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.log.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable copy of the log taken by [`LogReader::snapshot`].
#[derive(Debug, Clone, Default)]
pub struct LogSnapshot {
    entries: Vec<Arc<LogEntry>>,
    dropped: usize,
    capacity: Option<usize>,
}

impl LogSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LogEntry> {
        self.entries.get(index).map(Arc::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().map(Arc::as_ref)
    }

    /// First entry in arrival order accepted by `predicate`, with its index.
    pub fn find(&self, mut predicate: impl FnMut(&LogEntry) -> bool) -> Option<(usize, &LogEntry)> {
        self.iter().enumerate().find(|(_, entry)| predicate(entry))
    }

    pub fn filter(&self, mut predicate: impl FnMut(&LogEntry) -> bool) -> Vec<&LogEntry> {
        self.iter().filter(|entry| predicate(entry)).collect()
    }

    /// The last `count` entries, oldest first.
    pub fn tail(&self, count: usize) -> &[Arc<LogEntry>] {
        let start = self.entries.len().saturating_sub(count);
        &self.entries[start..]
    }

    /// Messages discarded because the log was at capacity.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub(crate) fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub(crate) fn find_shared(
        &self,
        mut predicate: impl FnMut(&LogEntry) -> bool,
    ) -> Option<(usize, Arc<LogEntry>)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, entry)| predicate(entry))
            .map(|(index, entry)| (index, Arc::clone(entry)))
    }
}
