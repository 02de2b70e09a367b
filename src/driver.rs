use std::sync::Arc;

use crate::locator::UrlPattern;
use crate::location::origin_of;
use crate::recorder::MessageEvent;
use crate::Result;

/// Callback invoked once per message delivered to a host window.
pub type MessageListener = Arc<dyn Fn(&MessageEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Handle to a sub-context (frame) of a page.
pub trait FrameHandle {
    fn current_url(&self) -> String;

    fn origin(&self) -> String {
        origin_of(&self.current_url())
    }
}

/// The page automation capability the harness core is built on.
pub trait PageDriver {
    type Frame: FrameHandle;

    fn navigate(&mut self, url: &str) -> Result<()>;

    /// URL of the top-level document, `None` before the first navigation.
    fn current_url(&self) -> Option<String>;

    /// Every sub-context of the current document, in document order.
    fn sub_contexts(&self) -> Vec<Self::Frame>;

    fn find_sub_context(&self, pattern: &UrlPattern) -> Option<Self::Frame> {
        self.sub_contexts()
            .into_iter()
            .find(|frame| pattern.is_match(&frame.current_url()))
    }
}

/// The host window's inbound `message` channel.
///
/// Listeners registered here survive navigations, so a listener added before
/// the first `navigate` sees everything the page ever receives.
pub trait InboundChannel {
    fn add_message_listener(&self, listener: MessageListener) -> ListenerId;

    fn remove_message_listener(&self, id: ListenerId) -> bool;
}

/// UI primitives a scenario uses inside a frame.
pub trait FrameActions {
    fn fill(&self, selector: &str, text: &str) -> Result<()>;

    fn click(&self, selector: &str, has_text: Option<&str>) -> Result<()>;

    fn focus(&self, selector: &str, has_text: Option<&str>) -> Result<()>;

    /// Sends a key press to the element, focusing it first.
    fn press(&self, selector: &str, has_text: Option<&str>, key: &str) -> Result<()>;

    fn text(&self, selector: &str) -> Result<String>;

    fn is_visible(&self, selector: &str, has_text: Option<&str>) -> Result<bool>;
}
