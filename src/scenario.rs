use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::{HarnessConfig, WidgetTarget};
use crate::driver::{FrameActions, InboundChannel, PageDriver};
use crate::events::{self, ResultSelected, SearchMetrics, WidgetEvent};
use crate::host::HostContext;
use crate::predicate::EntryFilter;
use crate::recorder::LogEntry;
use crate::{Error, Result};

const QUERY_INPUT: &str = "#query";
const SEARCH_BUTTON: &str = "#searchBtn";
const RESULT_ITEM: &str = ".result-item";

/// How a search result gets activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Click,
    /// Focus the item, then press Enter.
    Keyboard,
}

/// A host page with the search widget located and the recorder attached.
pub struct WidgetSession<D>
where
    D: PageDriver + InboundChannel,
    D::Frame: FrameActions,
{
    host: HostContext<D>,
    frame: D::Frame,
    target: WidgetTarget,
}

impl<D> WidgetSession<D>
where
    D: PageDriver + InboundChannel,
    D::Frame: FrameActions,
{
    pub fn open(driver: D, target: WidgetTarget, config: HarnessConfig) -> Result<Self> {
        let mut host = HostContext::attach(driver, config)?;
        host.navigate(&target.host_url)?;
        let frame = host.locate(&target.widget_origin, &target.widget_path)?;
        info!(host = %target.host_url, widget = %target.widget_url(), "widget session open");
        Ok(Self { host, frame, target })
    }

    pub fn host(&self) -> &HostContext<D> {
        &self.host
    }

    pub fn frame(&self) -> &D::Frame {
        &self.frame
    }

    pub fn target(&self) -> &WidgetTarget {
        &self.target
    }

    pub fn search(&self, query: &str) -> Result<()> {
        debug!(query, "searching");
        self.frame.fill(QUERY_INPUT, query)?;
        self.frame.click(SEARCH_BUTTON, None)
    }

    /// Polls until a visible element matches, or `action_timeout` runs out.
    pub fn expect_visible(&self, selector: &str, has_text: Option<&str>) -> Result<()> {
        let clock = SystemClock::new();
        let config = self.host.config();
        let timeout = config.action_timeout();
        let started = clock.now();
        loop {
            if self.frame.is_visible(selector, has_text)? {
                return Ok(());
            }
            let elapsed = clock.now().saturating_sub(started);
            if elapsed >= timeout {
                let locator = match has_text {
                    Some(text) => format!("{selector} (has text {text:?})"),
                    None => selector.to_string(),
                };
                return Err(Error::SelectorNotFound(format!(
                    "{locator} not visible within {}ms",
                    timeout.as_millis()
                )));
            }
            clock.sleep(config.poll_interval().min(timeout - elapsed));
        }
    }

    pub fn activate_result(&self, text: &str, activation: Activation) -> Result<()> {
        self.expect_visible(RESULT_ITEM, Some(text))?;
        debug!(text, ?activation, "activating result");
        match activation {
            Activation::Click => self.frame.click(RESULT_ITEM, Some(text)),
            Activation::Keyboard => {
                self.frame.focus(RESULT_ITEM, Some(text))?;
                self.frame.press(RESULT_ITEM, Some(text), "Enter")
            }
        }
    }

    /// First `search-metrics` message from the widget origin.
    pub fn wait_for_search_metrics(&self) -> Result<SearchMetrics> {
        self.wait_for_event(events::SEARCH_METRICS)?.into_search_metrics()
    }

    /// First `result-selected` message from the widget origin.
    pub fn wait_for_result_selected(&self) -> Result<ResultSelected> {
        self.wait_for_event(events::RESULT_SELECTED)?.into_result_selected()
    }

    fn wait_for_event(&self, event_type: &str) -> Result<WidgetEvent> {
        let filter = EntryFilter::new()
            .from_origin(self.widget_origin())
            .of_type(event_type);
        let found = self.host.wait_for(&filter)?;
        WidgetEvent::from_entry(&found.entry)
    }

    /// Every message recorded from the widget origin so far, typed.
    pub fn widget_events(&self) -> Result<Vec<WidgetEvent>> {
        let origin = self.widget_origin();
        self.host
            .messages()
            .iter()
            .filter(|entry| entry.origin == origin)
            .map(WidgetEvent::from_entry)
            .collect()
    }

    pub fn teardown(self) -> Vec<LogEntry> {
        self.host.teardown()
    }

    fn widget_origin(&self) -> &str {
        self.target.widget_origin.trim_end_matches('/')
    }
}
