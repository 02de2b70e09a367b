use std::error::Error as StdError;
use std::fmt;

mod clock;
mod config;
mod driver;
mod events;
mod host;
mod locator;
mod location;
pub mod mock;
mod predicate;
mod recorder;
mod scenario;
mod wait;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{HarnessConfig, WidgetTarget};
pub use driver::{
    FrameActions, FrameHandle, InboundChannel, ListenerId, MessageListener, PageDriver,
};
pub use events::{ResultSelected, SearchMetrics, WidgetEvent};
pub use host::HostContext;
pub use locator::{AmbiguityPolicy, ContextLocator, UrlPattern};
pub use location::Location;
pub use predicate::{Described, EntryFilter, Predicate, describe};
pub use recorder::{LogEntry, LogReader, LogSnapshot, MessageEvent, MessageRecorder};
pub use scenario::{Activation, WidgetSession};
pub use wait::{Match, WaitEngine, WaitOptions};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Navigation(String),
    ScriptRuntime(String),
    InvalidUrl(String),
    InvalidPattern(String),
    InvalidConfig(String),
    ContextNotFound {
        pattern: String,
    },
    AmbiguousContext {
        pattern: String,
        matches: Vec<String>,
    },
    WaitTimeout {
        description: String,
        timeout_ms: u128,
        polls: u32,
        recent_entries: Vec<String>,
    },
    LogOverflow {
        capacity: usize,
        dropped: usize,
    },
    PayloadMismatch {
        event_type: String,
        expected: String,
        actual: String,
    },
    RecorderInstalledLate {
        url: String,
    },
    SelectorNotFound(String),
    UnsupportedSelector(String),
    TypeMismatch {
        selector: String,
        expected: String,
        actual: String,
    },
    AssertionFailed {
        selector: String,
        expected: String,
        actual: String,
        dom_snippet: String,
    },
}

impl Error {
    /// Timeouts may succeed on a rerun; everything else is structural.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WaitTimeout { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Navigation(msg) => write!(f, "navigation failed: {msg}"),
            Self::ScriptRuntime(msg) => write!(f, "page script error: {msg}"),
            Self::InvalidUrl(url) => write!(f, "invalid url: {url}"),
            Self::InvalidPattern(msg) => write!(f, "invalid url pattern: {msg}"),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::ContextNotFound { pattern } => {
                write!(f, "no embedded context matches {pattern}")
            }
            Self::AmbiguousContext { pattern, matches } => write!(
                f,
                "{} embedded contexts match {pattern}: {}",
                matches.len(),
                matches.join(", ")
            ),
            Self::WaitTimeout {
                description,
                timeout_ms,
                polls,
                recent_entries,
            } => {
                write!(
                    f,
                    "timed out after {timeout_ms}ms ({polls} polls) waiting for {description}"
                )?;
                if recent_entries.is_empty() {
                    write!(f, "; no messages recorded")
                } else {
                    write!(f, "; last {} messages:", recent_entries.len())?;
                    for entry in recent_entries {
                        write!(f, "\n  {entry}")?;
                    }
                    Ok(())
                }
            }
            Self::LogOverflow { capacity, dropped } => write!(
                f,
                "observation log overflowed: capacity {capacity}, {dropped} messages dropped"
            ),
            Self::PayloadMismatch {
                event_type,
                expected,
                actual,
            } => write!(
                f,
                "payload mismatch for {event_type}: expected {expected}, actual {actual}"
            ),
            Self::RecorderInstalledLate { url } => write!(
                f,
                "message recorder must be installed before navigation, page already at {url}"
            ),
            Self::SelectorNotFound(selector) => write!(f, "selector not found: {selector}"),
            Self::UnsupportedSelector(selector) => write!(f, "unsupported selector: {selector}"),
            Self::TypeMismatch {
                selector,
                expected,
                actual,
            } => write!(
                f,
                "type mismatch for {selector}: expected {expected}, actual {actual}"
            ),
            Self::AssertionFailed {
                selector,
                expected,
                actual,
                dom_snippet,
            } => write!(
                f,
                "assertion failed for {selector}: expected {expected}, actual {actual}, \
                 snippet {dom_snippet}"
            ),
        }
    }
}

impl StdError for Error {}

pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> String {
    let mut it = value.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        let Some(ch) = it.next() else {
            return out;
        };
        out.push(ch);
    }
    if it.next().is_some() {
        out.push_str("...");
    }
    out
}
