use std::fmt;

use serde_json::Value;

use crate::recorder::LogEntry;

/// A pure test over log entries.
///
/// Waits may evaluate the same predicate many times against a growing log,
/// so implementations must not depend on how often they are called.
pub trait Predicate {
    fn matches(&self, entry: &LogEntry) -> bool;

    /// What the predicate is waiting for, for timeout reports.
    fn describe(&self) -> String;
}

impl<P: Predicate + ?Sized> Predicate for &P {
    fn matches(&self, entry: &LogEntry) -> bool {
        (**self).matches(entry)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// A closure with a label.
pub struct Described<F> {
    label: String,
    test: F,
}

/// Wraps a closure so timeouts can name what it was looking for.
pub fn describe<F>(label: impl Into<String>, test: F) -> Described<F>
where
    F: Fn(&LogEntry) -> bool,
{
    Described {
        label: label.into(),
        test,
    }
}

impl<F> Predicate for Described<F>
where
    F: Fn(&LogEntry) -> bool,
{
    fn matches(&self, entry: &LogEntry) -> bool {
        (self.test)(entry)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

impl<F> fmt::Debug for Described<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Described").field("label", &self.label).finish()
    }
}

/// Conjunction of simple conditions on origin and payload fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryFilter {
    origin: Option<String>,
    event_type: Option<String>,
    fields: Vec<(String, Value)>,
}

impl EntryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn of_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn field_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }
}

impl Predicate for EntryFilter {
    fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(origin) = &self.origin {
            if entry.origin != *origin {
                return false;
            }
        }
        if let Some(event_type) = &self.event_type {
            if entry.event_type() != Some(event_type.as_str()) {
                return false;
            }
        }
        self.fields
            .iter()
            .all(|(field, expected)| entry.data.get(field) == Some(expected))
    }

    fn describe(&self) -> String {
        let mut out = match &self.event_type {
            Some(event_type) => format!("{event_type} message"),
            None => "any message".to_string(),
        };
        if let Some(origin) = &self.origin {
            out.push_str(" from ");
            out.push_str(origin);
        }
        for (idx, (field, value)) in self.fields.iter().enumerate() {
            out.push_str(if idx == 0 { " with " } else { ", " });
            out.push_str(&format!("{field}={value}"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(origin: &str, data: Value) -> LogEntry {
        LogEntry {
            origin: origin.into(),
            data,
        }
    }

    #[test]
    fn filter_checks_origin_type_and_fields() {
        let filter = EntryFilter::new()
            .from_origin("http://localhost:8001")
            .of_type("search-metrics")
            .field_eq("query", "xyz");

        assert!(filter.matches(&entry(
            "http://localhost:8001",
            json!({ "type": "search-metrics", "query": "xyz", "totalResults": 0 })
        )));
        assert!(!filter.matches(&entry(
            "http://localhost:8000",
            json!({ "type": "search-metrics", "query": "xyz" })
        )));
        assert!(!filter.matches(&entry(
            "http://localhost:8001",
            json!({ "type": "search-metrics", "query": "other" })
        )));
        assert!(!filter.matches(&entry("http://localhost:8001", json!([1, 2]))));
    }

    #[test]
    fn filter_description_names_every_condition() {
        let filter = EntryFilter::new()
            .from_origin("http://localhost:8001")
            .of_type("result-selected")
            .field_eq("id", 1);
        assert_eq!(
            filter.describe(),
            "result-selected message from http://localhost:8001 with id=1"
        );
        assert_eq!(EntryFilter::new().describe(), "any message");
    }

    #[test]
    fn described_closure_keeps_label() {
        let predicate = describe("a big result count", |entry: &LogEntry| {
            entry.data["totalResults"].as_u64().is_some_and(|n| n > 100)
        });
        assert_eq!(predicate.describe(), "a big result count");
        assert!(predicate.matches(&entry("http://a", json!({ "totalResults": 101 }))));
        assert!(!(&predicate).matches(&entry("http://a", json!({}))));
    }
}
