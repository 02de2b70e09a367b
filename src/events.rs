use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::recorder::LogEntry;
use crate::{Error, Result};

pub const SEARCH_METRICS: &str = "search-metrics";
pub const RESULT_SELECTED: &str = "result-selected";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMetrics {
    pub query: String,
    #[serde(rename = "totalResults")]
    pub total_results: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSelected {
    pub id: u64,
}

/// A widget payload refined by its `type` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetEvent {
    SearchMetrics(SearchMetrics),
    ResultSelected(ResultSelected),
    /// Any other payload, kept as delivered.
    Other(Value),
}

impl WidgetEvent {
    /// Refines a raw payload.
    ///
    /// Unknown tags (or no tag at all) become [`WidgetEvent::Other`]; a known
    /// tag whose fields have the wrong shape is a [`Error::PayloadMismatch`].
    pub fn from_payload(data: &Value) -> Result<Self> {
        match data.get("type").and_then(Value::as_str) {
            Some(SEARCH_METRICS) => refine(SEARCH_METRICS, data).map(Self::SearchMetrics),
            Some(RESULT_SELECTED) => refine(RESULT_SELECTED, data).map(Self::ResultSelected),
            _ => Ok(Self::Other(data.clone())),
        }
    }

    pub fn from_entry(entry: &LogEntry) -> Result<Self> {
        Self::from_payload(&entry.data)
    }

    pub fn to_payload(&self) -> Value {
        match self {
            Self::SearchMetrics(metrics) => tagged(SEARCH_METRICS, metrics),
            Self::ResultSelected(selected) => tagged(RESULT_SELECTED, selected),
            Self::Other(value) => value.clone(),
        }
    }

    pub fn event_type(&self) -> Option<&str> {
        match self {
            Self::SearchMetrics(_) => Some(SEARCH_METRICS),
            Self::ResultSelected(_) => Some(RESULT_SELECTED),
            Self::Other(value) => value.get("type").and_then(Value::as_str),
        }
    }

    pub fn into_search_metrics(self) -> Result<SearchMetrics> {
        match self {
            Self::SearchMetrics(metrics) => Ok(metrics),
            other => Err(other.mismatch(SEARCH_METRICS)),
        }
    }

    pub fn into_result_selected(self) -> Result<ResultSelected> {
        match self {
            Self::ResultSelected(selected) => Ok(selected),
            other => Err(other.mismatch(RESULT_SELECTED)),
        }
    }

    fn mismatch(&self, expected: &str) -> Error {
        Error::PayloadMismatch {
            event_type: expected.to_string(),
            expected: format!("{{type: {expected:?}}}"),
            actual: self.to_payload().to_string(),
        }
    }
}

fn refine<T: for<'de> Deserialize<'de>>(event_type: &str, data: &Value) -> Result<T> {
    T::deserialize(data).map_err(|err| Error::PayloadMismatch {
        event_type: event_type.to_string(),
        expected: err.to_string(),
        actual: data.to_string(),
    })
}

fn tagged<T: Serialize>(event_type: &str, body: &T) -> Value {
    let mut value = serde_json::to_value(body).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("type".to_string(), Value::String(event_type.to_string()));
    }
    value
}
