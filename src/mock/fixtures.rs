use serde_json::json;
use tracing::debug;

use super::browser::{MockBrowser, PageContext, PageScript, UiEvent};
use super::dom::NodeId;
use crate::config::WidgetTarget;
use crate::events::{ResultSelected, SearchMetrics, WidgetEvent};
use crate::location::Location;
use crate::recorder::MessageEvent;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub id: u64,
    pub title: &'static str,
    pub description: &'static str,
}

pub const CATALOG: &[CatalogItem] = &[
    CatalogItem {
        id: 1,
        title: "Playwright Testing Framework",
        description: "End-to-end testing for modern web apps",
    },
    CatalogItem {
        id: 2,
        title: "Playwright Trace Viewer",
        description: "Inspect actions, snapshots and network traffic",
    },
    CatalogItem {
        id: 3,
        title: "Cross-Origin Messaging",
        description: "window.postMessage between frames of different origins",
    },
    CatalogItem {
        id: 4,
        title: "Iframe Sandboxing",
        description: "Restricting what embedded documents may do",
    },
];

/// Items whose title or description contains `query`, ignoring case.
/// A blank query matches nothing.
pub fn search_catalog(query: &str) -> Vec<&'static CatalogItem> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    CATALOG
        .iter()
        .filter(|item| {
            item.title.to_lowercase().contains(&needle)
                || item.description.to_lowercase().contains(&needle)
        })
        .collect()
}

/// Embeddable search widget.
///
/// Posts `widget-ready` on load, `search-metrics` after every search and
/// `result-selected` when a result is activated by click or by Enter/Space
/// while focused. All messages target the host origin.
#[derive(Debug, Clone)]
pub struct SearchWidget {
    parent_origin: String,
}

impl SearchWidget {
    pub fn new(parent_origin: impl Into<String>) -> Self {
        Self {
            parent_origin: parent_origin.into(),
        }
    }

    fn run_search(&self, page: &mut PageContext<'_>) -> Result<()> {
        let input = page.element_by_id("query")?;
        let query = page.dom.value(input)?;
        let hits = search_catalog(&query);

        let results = page.element_by_id("results")?;
        page.dom.clear_children(results)?;
        for item in &hits {
            let id = item.id.to_string();
            let li = page.dom.create_element(
                results,
                "li",
                &[
                    ("class", "result-item"),
                    ("data-id", id.as_str()),
                    ("tabindex", "0"),
                    ("title", item.description),
                ],
            );
            page.dom.create_text(li, item.title);
        }

        let empty = page
            .dom
            .query_selector(".no-results")?
            .ok_or_else(|| Error::ScriptRuntime(".no-results is missing".into()))?;
        if hits.is_empty() {
            page.dom.remove_attr(empty, "hidden")?;
        } else {
            page.dom.set_attr(empty, "hidden", "")?;
        }

        debug!(query = %query, total = hits.len(), "widget search");
        let metrics = WidgetEvent::SearchMetrics(SearchMetrics {
            query,
            total_results: hits.len() as u64,
        });
        page.post_to_parent(metrics.to_payload(), &self.parent_origin);
        Ok(())
    }

    fn select(&self, page: &mut PageContext<'_>, item: NodeId) -> Result<()> {
        let raw = page.dom.attr(item, "data-id").unwrap_or_default();
        let id = raw
            .parse::<u64>()
            .map_err(|_| Error::ScriptRuntime(format!("result item has invalid data-id {raw:?}")))?;
        debug!(id, "widget result selected");
        let selected = WidgetEvent::ResultSelected(ResultSelected { id });
        page.post_to_parent(selected.to_payload(), &self.parent_origin);
        Ok(())
    }
}

impl PageScript for SearchWidget {
    fn load(&mut self, page: &mut PageContext<'_>) -> Result<()> {
        let root = page.dom.root();
        let body = page.dom.create_element(root, "body", &[]);
        let form = page.dom.create_element(body, "div", &[("class", "search-form")]);
        page.dom.create_element(
            form,
            "input",
            &[("id", "query"), ("type", "search"), ("placeholder", "Search...")],
        );
        let button = page.dom.create_element(form, "button", &[("id", "searchBtn")]);
        page.dom.create_text(button, "Search");
        page.dom.create_element(body, "ul", &[("id", "results")]);
        let empty = page
            .dom
            .create_element(body, "p", &[("class", "no-results"), ("hidden", "")]);
        page.dom.create_text(empty, "No results found");

        page.post_to_parent(json!({ "type": "widget-ready" }), &self.parent_origin);
        Ok(())
    }

    fn handle(
        &mut self,
        page: &mut PageContext<'_>,
        target: NodeId,
        event: &UiEvent,
    ) -> Result<()> {
        let result_item = page.dom.closest(target, ".result-item")?;
        match event {
            UiEvent::Click => {
                if page.dom.closest(target, "#searchBtn")?.is_some() {
                    return self.run_search(page);
                }
                if let Some(item) = result_item {
                    return self.select(page, item);
                }
            }
            UiEvent::KeyDown(key) if key == "Enter" || key == " " => {
                if let Some(item) = result_item {
                    return self.select(page, item);
                }
                if key == "Enter" && page.dom.closest(target, "#query")?.is_some() {
                    return self.run_search(page);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Host document embedding the widget in `#widget-frame`.
///
/// Keeps its own message listener: messages from the widget origin update
/// `#host-status`, everything else is ignored.
#[derive(Debug, Clone)]
pub struct HostPage {
    widget_url: String,
    widget_origin: String,
    received: usize,
}

impl HostPage {
    pub fn new(target: &WidgetTarget) -> Self {
        Self {
            widget_url: target.widget_url(),
            widget_origin: target.widget_origin.trim_end_matches('/').to_string(),
            received: 0,
        }
    }
}

impl PageScript for HostPage {
    fn load(&mut self, page: &mut PageContext<'_>) -> Result<()> {
        let root = page.dom.root();
        let body = page.dom.create_element(root, "body", &[]);
        let heading = page.dom.create_element(body, "h1", &[]);
        page.dom.create_text(heading, "Search host");
        page.dom.create_element(
            body,
            "iframe",
            &[
                ("id", "widget-frame"),
                ("src", self.widget_url.as_str()),
                ("title", "Search widget"),
            ],
        );
        let status = page.dom.create_element(body, "p", &[("id", "host-status")]);
        page.dom.create_text(status, "Waiting for widget");
        Ok(())
    }

    fn on_message(&mut self, page: &mut PageContext<'_>, event: &MessageEvent) -> Result<()> {
        if event.origin != self.widget_origin {
            debug!(origin = %event.origin, "host ignored message from foreign origin");
            return Ok(());
        }
        self.received += 1;
        let kind = event
            .data
            .get("type")
            .and_then(|value| value.as_str())
            .unwrap_or("unknown");
        let status = page.element_by_id("host-status")?;
        page.dom.set_text_content(
            status,
            &format!("Received {} message(s), last: {kind}", self.received),
        )
    }
}

/// Registers `HostPage` and `SearchWidget` at the target's URLs.
pub fn install_widget_fixture(browser: &mut MockBrowser, target: &WidgetTarget) -> Result<()> {
    let host = HostPage::new(target);
    let host_origin = Location::parse(&target.host_url)?.origin();
    browser.register_document(&target.host_url, move || Box::new(host.clone()))?;
    browser.register_document(&target.widget_url(), move || {
        Box::new(SearchWidget::new(host_origin.clone()))
    })
}

impl MockBrowser {
    /// A browser serving the default host page and search widget.
    pub fn widget_fixture() -> Result<Self> {
        let mut browser = Self::new();
        install_widget_fixture(&mut browser, &WidgetTarget::default())?;
        Ok(browser)
    }
}
