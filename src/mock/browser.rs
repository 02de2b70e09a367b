use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::dom::{Dom, NodeId};
use crate::driver::{
    FrameActions, FrameHandle, InboundChannel, ListenerId, MessageListener, PageDriver,
};
use crate::location::Location;
use crate::recorder::MessageEvent;
use crate::{Error, Result, truncate_chars};

pub const DEFAULT_DELIVERY_SEED: u64 = 0x9E37_79B9_7F4A_7C15;
pub const DEFAULT_MAX_DELIVERY_DELAY: Duration = Duration::from_millis(5);

/// A user interaction delivered to a page script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Click,
    Input,
    Focus,
    KeyDown(String),
}

/// Behavior of a mock document.
pub trait PageScript: Send {
    /// Builds the initial DOM; runs once per navigation.
    fn load(&mut self, page: &mut PageContext<'_>) -> Result<()>;

    fn handle(
        &mut self,
        _page: &mut PageContext<'_>,
        _target: NodeId,
        _event: &UiEvent,
    ) -> Result<()> {
        Ok(())
    }

    /// The document's own `message` listener, for top-level documents.
    fn on_message(&mut self, _page: &mut PageContext<'_>, _event: &MessageEvent) -> Result<()> {
        Ok(())
    }
}

pub type DocumentFactory = Arc<dyn Fn() -> Box<dyn PageScript> + Send + Sync>;

/// What a page script can touch while it runs.
pub struct PageContext<'a> {
    pub dom: &'a mut Dom,
    location: &'a Location,
    outbox: &'a Outbox,
}

impl PageContext<'_> {
    pub fn url(&self) -> String {
        self.location.href()
    }

    pub fn origin(&self) -> String {
        self.location.origin()
    }

    /// `window.parent.postMessage(data, target_origin)`.
    ///
    /// Delivery is asynchronous; the message is dropped when the parent's
    /// origin does not match `target_origin` (unless it is `"*"`) or when
    /// the page has no parent.
    pub fn post_to_parent(&self, data: Value, target_origin: &str) {
        self.outbox.post(data, target_origin);
    }

    pub(crate) fn element_by_id(&self, id: &str) -> Result<NodeId> {
        self.dom
            .by_id(id)
            .ok_or_else(|| Error::ScriptRuntime(format!("#{id} is missing from {}", self.url())))
    }
}

enum BusMessage {
    Deliver { event: MessageEvent, generation: u64 },
    Shutdown,
}

struct BrowserShared {
    listeners: RwLock<Vec<(ListenerId, MessageListener)>>,
    next_listener: AtomicU64,
    /// Generation of the committed document set.
    generation: AtomicU64,
    next_generation: AtomicU64,
    /// Held while a navigation loads; delivery waits on it before checking
    /// the generation.
    navigation: Mutex<()>,
    top: Mutex<Option<SharedDocument>>,
    bus: Sender<BusMessage>,
    in_flight: AtomicUsize,
}

impl BrowserShared {
    /// Registered listeners run before the host document's own handler.
    fn deliver(&self, event: &MessageEvent, generation: u64) {
        let current = {
            let _navigation = self.navigation.lock();
            self.generation.load(Ordering::SeqCst)
        };
        if current != generation {
            debug!(origin = %event.origin, "receiving document is gone, message dropped");
            return;
        }
        trace!(
            origin = %event.origin,
            data = %truncate_chars(&event.data.to_string(), 80),
            "delivering message"
        );

        let listeners: Vec<MessageListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }

        let top = self.top.lock().clone();
        if let Some(document) = top {
            if let Err(err) = document.lock().receive(event) {
                warn!(%err, "host message listener failed");
            }
        }
    }
}

#[derive(Clone)]
struct Outbox {
    sender_origin: String,
    parent_origin: Option<String>,
    generation: u64,
    shared: Arc<BrowserShared>,
}

impl Outbox {
    fn post(&self, data: Value, target_origin: &str) {
        let Some(parent_origin) = &self.parent_origin else {
            debug!(
                sender = %self.sender_origin,
                "top-level document has no parent, message dropped"
            );
            return;
        };
        if target_origin != "*" && target_origin != parent_origin {
            debug!(
                sender = %self.sender_origin,
                target_origin,
                parent_origin = %parent_origin,
                "target origin mismatch, message dropped"
            );
            return;
        }
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let message = BusMessage::Deliver {
            event: MessageEvent::new(self.sender_origin.clone(), data),
            generation: self.generation,
        };
        if self.shared.bus.send(message).is_err() {
            self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
            warn!(sender = %self.sender_origin, "message bus closed, message dropped");
        }
    }
}

/// xorshift64*: deterministic delivery jitter.
struct Jitter {
    state: u64,
    max_delay: Duration,
}

impl Jitter {
    fn new(seed: u64, max_delay: Duration) -> Self {
        Self {
            state: if seed == 0 { 0xA5A5_A5A5_A5A5_A5A5 } else { seed },
            max_delay,
        }
    }

    fn next_f64(&mut self) -> f64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = if x == 0 { 0xA5A5_A5A5_A5A5_A5A5 } else { x };
        let out = x.wrapping_mul(0x2545_F491_4F6C_DD1D);
        ((out >> 11) as f64) * (1.0 / ((1u64 << 53) as f64))
    }

    fn next_delay(&mut self) -> Duration {
        if self.max_delay.is_zero() {
            return Duration::ZERO;
        }
        self.max_delay.mul_f64(self.next_f64())
    }
}

fn run_delivery(rx: Receiver<BusMessage>, shared: Arc<BrowserShared>, mut jitter: Jitter) {
    for message in rx.iter() {
        let (event, generation) = match message {
            BusMessage::Deliver { event, generation } => (event, generation),
            BusMessage::Shutdown => break,
        };
        let delay = jitter.next_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        shared.deliver(&event, generation);
        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

type SharedDocument = Arc<Mutex<LoadedDocument>>;

struct LoadedDocument {
    location: Location,
    dom: Dom,
    active: Option<NodeId>,
    script: Box<dyn PageScript>,
    outbox: Outbox,
}

impl LoadedDocument {
    fn load(location: Location, script: Box<dyn PageScript>, outbox: Outbox) -> Result<Self> {
        let mut document = Self {
            location,
            dom: Dom::new(),
            active: None,
            script,
            outbox,
        };
        let mut page = PageContext {
            dom: &mut document.dom,
            location: &document.location,
            outbox: &document.outbox,
        };
        document.script.load(&mut page)?;
        Ok(document)
    }

    fn dispatch(&mut self, target: NodeId, event: &UiEvent) -> Result<()> {
        trace!(url = %self.location.href(), ?event, "ui event");
        let mut page = PageContext {
            dom: &mut self.dom,
            location: &self.location,
            outbox: &self.outbox,
        };
        self.script.handle(&mut page, target, event)
    }

    fn receive(&mut self, event: &MessageEvent) -> Result<()> {
        let mut page = PageContext {
            dom: &mut self.dom,
            location: &self.location,
            outbox: &self.outbox,
        };
        self.script.on_message(&mut page, event)
    }

    /// First visible element matching `selector` whose text contains `has_text`.
    fn resolve(&self, selector: &str, has_text: Option<&str>) -> Result<NodeId> {
        let needle = has_text.map(str::to_lowercase);
        self.dom
            .query_selector_all(selector)?
            .into_iter()
            .filter(|node| self.dom.is_visible(*node))
            .find(|node| match &needle {
                Some(needle) => self.dom.text_content(*node).to_lowercase().contains(needle),
                None => true,
            })
            .ok_or_else(|| Error::SelectorNotFound(describe_locator(selector, has_text)))
    }

    fn is_disabled(&self, node: NodeId) -> bool {
        self.dom.attr(node, "disabled").is_some()
    }
}

fn describe_locator(selector: &str, has_text: Option<&str>) -> String {
    match has_text {
        Some(text) => format!("{selector} (has text {text:?})"),
        None => selector.to_string(),
    }
}

struct BlankPage;

impl PageScript for BlankPage {
    fn load(&mut self, _page: &mut PageContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// In-process page driver: one top-level document plus its iframes.
///
/// Messages posted by frames travel through a background delivery thread
/// with seeded random delay, so they arrive some time after the UI action
/// that produced them returns.
pub struct MockBrowser {
    documents: HashMap<String, DocumentFactory>,
    shared: Arc<BrowserShared>,
    frames: Vec<MockFrame>,
    worker: Option<JoinHandle<()>>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self::with_delivery(DEFAULT_DELIVERY_SEED, DEFAULT_MAX_DELIVERY_DELAY)
    }

    /// `max_delay` bounds the per-message delivery delay drawn from `seed`.
    pub fn with_delivery(seed: u64, max_delay: Duration) -> Self {
        let (tx, rx) = unbounded();
        let shared = Arc::new(BrowserShared {
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            generation: AtomicU64::new(0),
            next_generation: AtomicU64::new(0),
            navigation: Mutex::new(()),
            top: Mutex::new(None),
            bus: tx,
            in_flight: AtomicUsize::new(0),
        });
        let worker_shared = Arc::clone(&shared);
        let jitter = Jitter::new(seed, max_delay);
        let worker = std::thread::spawn(move || run_delivery(rx, worker_shared, jitter));
        Self {
            documents: HashMap::new(),
            shared,
            frames: Vec::new(),
            worker: Some(worker),
        }
    }

    pub fn register_document<F>(&mut self, url: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn PageScript> + Send + Sync + 'static,
    {
        let key = Location::parse(url)?.href();
        self.documents.insert(key, Arc::new(factory));
        Ok(())
    }

    /// Messages posted but not yet handed to listeners.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> &[MockFrame] {
        &self.frames
    }

    /// Handle on the top-level document, for host-side assertions.
    pub fn top_document(&self) -> Option<MockFrame> {
        self.shared
            .top
            .lock()
            .clone()
            .map(|doc| MockFrame { doc })
    }

    fn load_document(
        &self,
        location: Location,
        parent_origin: Option<String>,
        generation: u64,
    ) -> Result<SharedDocument> {
        let script: Box<dyn PageScript> = match self.documents.get(&location.href()) {
            Some(factory) => factory(),
            None if parent_origin.is_some() => {
                warn!(
                    url = %location.href(),
                    "no document registered for frame, loading blank page"
                );
                Box::new(BlankPage)
            }
            None => {
                return Err(Error::Navigation(format!(
                    "no document registered for {}",
                    location.href()
                )));
            }
        };
        let outbox = Outbox {
            sender_origin: location.origin(),
            parent_origin,
            generation,
            shared: Arc::clone(&self.shared),
        };
        Ok(Arc::new(Mutex::new(LoadedDocument::load(location, script, outbox)?)))
    }
}

impl Default for MockBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockBrowser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBrowser")
            .field("url", &self.current_url())
            .field("frames", &self.frames)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl Drop for MockBrowser {
    fn drop(&mut self) {
        let _ = self.shared.bus.send(BusMessage::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("message delivery thread panicked, later messages were lost");
            }
        }
        // documents hold the shared state through their outboxes
        self.shared.top.lock().take();
    }
}

fn resolve_frame_src(host: &Location, src: &str) -> Result<Location> {
    if src.starts_with('/') && !src.starts_with("//") {
        return Location::parse(&format!("{}{}", host.origin(), src));
    }
    Location::parse(src)
}

impl PageDriver for MockBrowser {
    type Frame = MockFrame;

    /// Loads the document and all of its frames, then switches to them.
    /// On failure the previous document set stays active.
    fn navigate(&mut self, url: &str) -> Result<()> {
        let location = Location::parse(url)?;
        let shared = Arc::clone(&self.shared);
        let _navigation = shared.navigation.lock();
        let generation = shared.next_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let top = self.load_document(location.clone(), None, generation)?;
        debug!(url = %location.href(), generation, "document loaded");

        let sources: Vec<String> = {
            let document = top.lock();
            document
                .dom
                .query_selector_all("iframe")?
                .into_iter()
                .filter_map(|node| document.dom.attr(node, "src"))
                .collect()
        };
        let mut frames = Vec::with_capacity(sources.len());
        for src in sources {
            let frame_location = resolve_frame_src(&location, &src)?;
            let doc = self.load_document(frame_location, Some(location.origin()), generation)?;
            let frame = MockFrame { doc };
            debug!(url = %frame.current_url(), "frame loaded");
            frames.push(frame);
        }

        shared.generation.store(generation, Ordering::SeqCst);
        *shared.top.lock() = Some(top);
        self.frames = frames;
        Ok(())
    }

    fn current_url(&self) -> Option<String> {
        self.shared
            .top
            .lock()
            .as_ref()
            .map(|doc| doc.lock().location.href())
    }

    fn sub_contexts(&self) -> Vec<MockFrame> {
        self.frames.clone()
    }
}

impl InboundChannel for MockBrowser {
    fn add_message_listener(&self, listener: MessageListener) -> ListenerId {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::SeqCst));
        self.shared.listeners.write().push((id, listener));
        id
    }

    fn remove_message_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}

/// A loaded document, top-level or framed.
#[derive(Clone)]
pub struct MockFrame {
    doc: SharedDocument,
}

impl fmt::Debug for MockFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MockFrame").field(&self.current_url()).finish()
    }
}

impl MockFrame {
    pub fn assert_text(&self, selector: &str, expected: &str) -> Result<()> {
        let doc = self.doc.lock();
        let target = doc
            .dom
            .query_selector(selector)?
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))?;
        let actual = doc.dom.text_content(target);
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: truncate_chars(&doc.dom.dump_node(target), 200),
            });
        }
        Ok(())
    }

    pub fn value(&self, selector: &str) -> Result<String> {
        let doc = self.doc.lock();
        let target = doc.resolve(selector, None)?;
        doc.dom.value(target)
    }

    /// Number of visible elements matching `selector`.
    pub fn count(&self, selector: &str) -> Result<usize> {
        let doc = self.doc.lock();
        Ok(doc
            .dom
            .query_selector_all(selector)?
            .into_iter()
            .filter(|node| doc.dom.is_visible(*node))
            .count())
    }

    /// Text of the focused element, if any.
    pub fn active_element_text(&self) -> Option<String> {
        let doc = self.doc.lock();
        doc.active.map(|node| doc.dom.text_content(node))
    }

    pub fn dump_dom(&self) -> String {
        let doc = self.doc.lock();
        doc.dom.dump_node(doc.dom.root())
    }
}

impl FrameHandle for MockFrame {
    fn current_url(&self) -> String {
        self.doc.lock().location.href()
    }
}

impl FrameActions for MockFrame {
    fn fill(&self, selector: &str, text: &str) -> Result<()> {
        let mut doc = self.doc.lock();
        let target = doc.resolve(selector, None)?;
        if doc.is_disabled(target) {
            return Ok(());
        }
        let tag = doc.dom.tag_name(target).unwrap_or_default().to_string();
        if tag != "input" && tag != "textarea" {
            return Err(Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "input or textarea".into(),
                actual: tag,
            });
        }
        doc.dom.set_value(target, text)?;
        doc.dispatch(target, &UiEvent::Input)
    }

    fn click(&self, selector: &str, has_text: Option<&str>) -> Result<()> {
        let mut doc = self.doc.lock();
        let target = doc.resolve(selector, has_text)?;
        if doc.is_disabled(target) {
            return Ok(());
        }
        doc.active = Some(target);
        doc.dispatch(target, &UiEvent::Click)
    }

    fn focus(&self, selector: &str, has_text: Option<&str>) -> Result<()> {
        let mut doc = self.doc.lock();
        let target = doc.resolve(selector, has_text)?;
        doc.active = Some(target);
        doc.dispatch(target, &UiEvent::Focus)
    }

    fn press(&self, selector: &str, has_text: Option<&str>, key: &str) -> Result<()> {
        let mut doc = self.doc.lock();
        let target = doc.resolve(selector, has_text)?;
        if doc.active != Some(target) {
            doc.active = Some(target);
            doc.dispatch(target, &UiEvent::Focus)?;
        }
        doc.dispatch(target, &UiEvent::KeyDown(key.to_string()))
    }

    fn text(&self, selector: &str) -> Result<String> {
        let doc = self.doc.lock();
        let target = doc
            .dom
            .query_selector(selector)?
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))?;
        Ok(doc.dom.text_content(target))
    }

    fn is_visible(&self, selector: &str, has_text: Option<&str>) -> Result<bool> {
        match self.doc.lock().resolve(selector, has_text) {
            Ok(_) => Ok(true),
            Err(Error::SelectorNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
