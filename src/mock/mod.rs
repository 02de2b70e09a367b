//! In-process page driver with a host page and an embedded search widget.

mod browser;
pub mod dom;
mod fixtures;

pub use browser::{
    DEFAULT_DELIVERY_SEED, DEFAULT_MAX_DELIVERY_DELAY, DocumentFactory, MockBrowser, MockFrame,
    PageContext, PageScript, UiEvent,
};
pub use dom::{Dom, NodeId};
pub use fixtures::{
    CATALOG, CatalogItem, HostPage, SearchWidget, install_widget_fixture, search_catalog,
};
