use tracing::{debug, info};

use crate::config::HarnessConfig;
use crate::driver::{InboundChannel, ListenerId, PageDriver};
use crate::locator::{AmbiguityPolicy, ContextLocator};
use crate::predicate::Predicate;
use crate::recorder::{LogEntry, LogReader, LogSnapshot, MessageRecorder};
use crate::wait::{Match, WaitEngine, WaitOptions};
use crate::{Error, Result};

/// A page under test with its message recorder attached.
///
/// The recorder listener is registered before the first navigation and
/// removed when the context is dropped; the log lives exactly as long as the
/// context does.
pub struct HostContext<D: PageDriver + InboundChannel> {
    driver: D,
    recorder: MessageRecorder,
    listener: ListenerId,
    config: HarnessConfig,
}

impl<D: PageDriver + InboundChannel> HostContext<D> {
    /// Installs a recorder on a page that has not loaded anything yet.
    pub fn attach(driver: D, config: HarnessConfig) -> Result<Self> {
        if let Some(url) = driver.current_url() {
            return Err(Error::RecorderInstalledLate { url });
        }
        let recorder = MessageRecorder::with_capacity(config.log_capacity());
        let listener = driver.add_message_listener(recorder.listener());
        debug!(listener = listener.0, "message recorder installed");
        Ok(Self {
            driver,
            recorder,
            listener,
            config,
        })
    }

    pub fn navigate(&mut self, url: &str) -> Result<()> {
        info!(url, "host navigating");
        self.driver.navigate(url)
    }

    pub fn url(&self) -> Option<String> {
        self.driver.current_url()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn reader(&self) -> LogReader {
        self.recorder.reader()
    }

    pub fn messages(&self) -> LogSnapshot {
        self.recorder.reader().snapshot()
    }

    pub fn wait_engine(&self) -> WaitEngine {
        WaitEngine::from_config(self.reader(), &self.config)
    }

    pub fn wait_for<P: Predicate>(&self, predicate: &P) -> Result<Match> {
        self.wait_engine().wait_for(predicate)
    }

    pub fn wait_for_with<P: Predicate>(
        &self,
        predicate: &P,
        options: &WaitOptions,
    ) -> Result<Match> {
        self.wait_engine().wait_for_with(predicate, options)
    }

    /// Finds the single embedded document at `origin` + `path`.
    pub fn locate(&self, origin: &str, path: &str) -> Result<D::Frame> {
        ContextLocator::for_document(origin, path)?.locate(&self.driver)
    }

    pub fn locate_with(
        &self,
        origin: &str,
        path: &str,
        policy: AmbiguityPolicy,
    ) -> Result<D::Frame> {
        ContextLocator::for_document(origin, path)?
            .with_policy(policy)
            .locate(&self.driver)
    }

    /// Detaches the recorder and returns everything it captured.
    pub fn teardown(self) -> Vec<LogEntry> {
        self.messages().iter().cloned().collect()
    }
}

impl<D: PageDriver + InboundChannel> Drop for HostContext<D> {
    fn drop(&mut self) {
        if self.driver.remove_message_listener(self.listener) {
            debug!(listener = self.listener.0, "message recorder detached");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::driver::{FrameHandle, MessageListener};
    use crate::predicate::EntryFilter;
    use crate::recorder::MessageEvent;

    #[derive(Debug, Clone)]
    struct StubFrame;

    impl FrameHandle for StubFrame {
        fn current_url(&self) -> String {
            "http://localhost:8001/widget.html".into()
        }
    }

    #[derive(Clone, Default)]
    struct StubPage {
        url: Arc<Mutex<Option<String>>>,
        listeners: Arc<Mutex<Vec<(ListenerId, MessageListener)>>>,
    }

    impl StubPage {
        fn emit(&self, data: serde_json::Value) {
            let event = MessageEvent::new("http://localhost:8001", data);
            for (_, listener) in self.listeners.lock().iter() {
                listener(&event);
            }
        }
    }

    impl PageDriver for StubPage {
        type Frame = StubFrame;

        fn navigate(&mut self, url: &str) -> Result<()> {
            *self.url.lock() = Some(url.to_string());
            Ok(())
        }

        fn current_url(&self) -> Option<String> {
            self.url.lock().clone()
        }

        fn sub_contexts(&self) -> Vec<StubFrame> {
            vec![StubFrame]
        }
    }

    impl InboundChannel for StubPage {
        fn add_message_listener(&self, listener: MessageListener) -> ListenerId {
            let mut listeners = self.listeners.lock();
            let id = ListenerId(listeners.len() as u64 + 1);
            listeners.push((id, listener));
            id
        }

        fn remove_message_listener(&self, id: ListenerId) -> bool {
            let mut listeners = self.listeners.lock();
            let before = listeners.len();
            listeners.retain(|(existing, _)| *existing != id);
            before != listeners.len()
        }
    }

    #[test]
    fn records_messages_after_attach_and_detaches_on_drop() -> Result<()> {
        let page = StubPage::default();
        let mut host = HostContext::attach(page.clone(), HarnessConfig::default())?;
        host.navigate("http://localhost:8000/host.html")?;
        page.emit(json!({ "type": "search-metrics", "query": "a", "totalResults": 1 }));

        let found = host.wait_for(&EntryFilter::new().of_type("search-metrics"))?;
        assert_eq!(found.index, 0);
        let widget = host.locate("http://localhost:8001", "/widget.html")?;
        assert_eq!(widget.origin(), "http://localhost:8001");

        drop(host);
        assert!(page.listeners.lock().is_empty());
        Ok(())
    }

    #[test]
    fn teardown_hands_back_entries() -> Result<()> {
        let page = StubPage::default();
        let host = HostContext::attach(page.clone(), HarnessConfig::default())?;
        page.emit(json!({ "type": "widget-ready" }));
        let entries = host.teardown();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type(), Some("widget-ready"));
        assert!(page.listeners.lock().is_empty());
        Ok(())
    }

    #[test]
    fn attaching_to_a_loaded_page_fails() {
        let page = StubPage::default();
        *page.url.lock() = Some("http://localhost:8000/host.html".into());
        assert!(matches!(
            HostContext::attach(page, HarnessConfig::default()),
            Err(Error::RecorderInstalledLate { .. })
        ));
    }
}
