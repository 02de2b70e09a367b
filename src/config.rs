use std::time::Duration;

use crate::wait::{DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT, WaitOptions};
use crate::{Error, Result};

pub const DEFAULT_HOST_URL: &str = "http://localhost:8000/host.html";
pub const DEFAULT_WIDGET_ORIGIN: &str = "http://localhost:8001";
pub const DEFAULT_WIDGET_PATH: &str = "/widget.html";

const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_DIAGNOSTIC_TAIL: usize = 10;

/// Timing and capacity settings shared by a host context and its waits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    expect_timeout: Duration,
    poll_interval: Duration,
    action_timeout: Duration,
    log_capacity: Option<usize>,
    diagnostic_tail: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            expect_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            log_capacity: None,
            diagnostic_tail: DEFAULT_DIAGNOSTIC_TAIL,
        }
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `CROSSFRAME_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(ms) = parse_var(&lookup, "CROSSFRAME_EXPECT_TIMEOUT_MS")? {
            config.set_expect_timeout(Duration::from_millis(ms as u64))?;
        }
        if let Some(ms) = parse_var(&lookup, "CROSSFRAME_POLL_INTERVAL_MS")? {
            config.set_poll_interval(Duration::from_millis(ms as u64))?;
        }
        if let Some(ms) = parse_var(&lookup, "CROSSFRAME_ACTION_TIMEOUT_MS")? {
            config.set_action_timeout(Duration::from_millis(ms as u64))?;
        }
        if let Some(capacity) = parse_var(&lookup, "CROSSFRAME_LOG_CAPACITY")? {
            config.set_log_capacity(Some(capacity))?;
        }
        if let Some(count) = parse_var(&lookup, "CROSSFRAME_DIAGNOSTIC_TAIL")? {
            config.set_diagnostic_tail(count);
        }
        Ok(config)
    }

    pub fn set_expect_timeout(&mut self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "expect timeout must be greater than zero".into(),
            ));
        }
        self.expect_timeout = timeout;
        Ok(())
    }

    pub fn set_poll_interval(&mut self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::InvalidConfig(
                "poll interval must be greater than zero".into(),
            ));
        }
        self.poll_interval = interval;
        Ok(())
    }

    pub fn set_action_timeout(&mut self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "action timeout must be greater than zero".into(),
            ));
        }
        self.action_timeout = timeout;
        Ok(())
    }

    pub fn set_log_capacity(&mut self, capacity: Option<usize>) -> Result<()> {
        if capacity == Some(0) {
            return Err(Error::InvalidConfig(
                "log capacity requires at least 1 entry".into(),
            ));
        }
        self.log_capacity = capacity;
        Ok(())
    }

    pub fn set_diagnostic_tail(&mut self, count: usize) {
        self.diagnostic_tail = count;
    }

    pub fn expect_timeout(&self) -> Duration {
        self.expect_timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn action_timeout(&self) -> Duration {
        self.action_timeout
    }

    pub fn log_capacity(&self) -> Option<usize> {
        self.log_capacity
    }

    pub fn diagnostic_tail(&self) -> usize {
        self.diagnostic_tail
    }

    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions::new()
            .with_timeout(self.expect_timeout)
            .with_poll_interval(self.poll_interval)
    }
}

fn parse_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<usize>> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim().parse::<usize>().map(Some).map_err(|_| {
        Error::InvalidConfig(format!(
            "{name} must be a non-negative integer, got {raw:?}"
        ))
    })
}

/// Where the host page lives and which embedded document it is expected to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetTarget {
    pub host_url: String,
    pub widget_origin: String,
    pub widget_path: String,
}

impl Default for WidgetTarget {
    fn default() -> Self {
        Self {
            host_url: DEFAULT_HOST_URL.to_string(),
            widget_origin: DEFAULT_WIDGET_ORIGIN.to_string(),
            widget_path: DEFAULT_WIDGET_PATH.to_string(),
        }
    }
}

impl WidgetTarget {
    pub fn widget_url(&self) -> String {
        format!("{}{}", self.widget_origin, self.widget_path)
    }
}
