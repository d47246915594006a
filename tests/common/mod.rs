//! Scriptable in-memory browser for driving the synchronization layer
//!
//! The fake document is a list of nodes per locator. Nodes carry rendering
//! state, text, attributes and live properties separately. Changes can be
//! scheduled on the tokio clock (applied lazily whenever the driver is
//! touched), so paused-clock tests are deterministic.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use settle::{Driver, ElementHandle, ElementState, Error, Locator, Rect, Result, ScriptArg};

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Node id inside the fake document
pub type NodeId = u64;

/// How a click reached an element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickKind {
    Native,
    Scripted,
}

/// Blueprint for a node
#[derive(Debug, Clone)]
pub struct FakeElement {
    pub displayed: bool,
    pub enabled: bool,
    pub obscured_by: Option<String>,
    pub rect: Rect,
    pub text: String,
    pub attributes: HashMap<String, String>,
    pub properties: HashMap<String, String>,
    pub options: Vec<String>,
}

impl FakeElement {
    pub fn visible() -> Self {
        Self {
            displayed: true,
            enabled: true,
            obscured_by: None,
            rect: Rect::new(10.0, 10.0, 120.0, 32.0),
            text: String::new(),
            attributes: HashMap::new(),
            properties: HashMap::new(),
            options: Vec::new(),
        }
    }

    pub fn hidden() -> Self {
        Self {
            displayed: false,
            ..Self::visible()
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn prop(mut self, name: &str, value: &str) -> Self {
        self.properties.insert(name.to_string(), value.to_string());
        self
    }

    /// Input whose markup and live value both start at `value`
    pub fn input(value: &str) -> Self {
        Self::visible().attr("value", value).prop("value", value)
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn obscured_by(mut self, by: &str) -> Self {
        self.obscured_by = Some(by.to_string());
        self
    }

    pub fn rect(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.rect = Rect::new(x, y, width, height);
        self
    }

    pub fn options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| o.to_string()).collect();
        self
    }
}

struct Node {
    element: FakeElement,
    /// Horizontal drift in px per ms between `moving.0` and `moving.1`
    motion: Option<(Instant, Instant, f64)>,
}

type Mutation = Box<dyn FnOnce(&mut Dom) + Send>;
type ValueHandler = Box<dyn FnMut(&mut Dom, NodeId, &str) + Send>;
type ClickHandler = Box<dyn FnMut(&mut Dom, NodeId) + Send>;

/// Ways the page can fail to report its `readyState`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyStateFailure {
    /// The document was torn down mid-call by a navigation
    ContextLost,
    /// The browser connection is gone
    ConnectionLost,
}

/// Mutable state of the fake page
pub struct Dom {
    nodes: HashMap<NodeId, Node>,
    matches: HashMap<Locator, Vec<NodeId>>,
    next_id: NodeId,
    scheduled: Vec<(Instant, Mutation)>,
    value_handlers: HashMap<NodeId, ValueHandler>,
    click_handlers: HashMap<NodeId, ClickHandler>,
    pub url: String,
    pub title: String,
    pub ready_state: String,
    /// `ready_state` fails this way instead of answering
    pub ready_state_failure: Option<ReadyStateFailure>,
    /// `Ok(None)` models a page without request tracking
    pub pending_requests: std::result::Result<Option<u64>, String>,
    /// Native clicks to reject as intercepted, regardless of state
    pub intercept_next_clicks: u32,
    /// Native clicks fail with this non-interception reason
    pub click_failure: Option<String>,
    pub scripted_click_fails: bool,
    pub clicks: Vec<(NodeId, ClickKind)>,
    pub scrolls: Vec<NodeId>,
    pub load_time: Duration,
    pub finds: u32,
}

impl Dom {
    fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            matches: HashMap::new(),
            next_id: 1,
            scheduled: Vec::new(),
            value_handlers: HashMap::new(),
            click_handlers: HashMap::new(),
            url: "about:blank".into(),
            title: String::new(),
            ready_state: "complete".into(),
            ready_state_failure: None,
            pending_requests: Ok(None),
            intercept_next_clicks: 0,
            click_failure: None,
            scripted_click_fails: false,
            clicks: Vec::new(),
            scrolls: Vec::new(),
            load_time: Duration::ZERO,
            finds: 0,
        }
    }

    /// Append a node matched by `locator`
    pub fn add(&mut self, locator: &Locator, element: FakeElement) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                element,
                motion: None,
            },
        );
        self.matches.entry(locator.clone()).or_default().push(id);
        id
    }

    /// Make an existing node also match `locator`
    pub fn alias(&mut self, locator: &Locator, id: NodeId) {
        self.matches.entry(locator.clone()).or_default().push(id);
    }

    /// Detach a node; its handles go stale
    pub fn remove(&mut self, id: NodeId) {
        self.nodes.remove(&id);
        for ids in self.matches.values_mut() {
            ids.retain(|n| *n != id);
        }
    }

    /// Replace a node with a fresh copy (a re-render); old handles go stale
    pub fn rerender(&mut self, id: NodeId) -> Option<NodeId> {
        let node = self.nodes.remove(&id)?;
        let new_id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(new_id, node);
        for ids in self.matches.values_mut() {
            for n in ids.iter_mut() {
                if *n == id {
                    *n = new_id;
                }
            }
        }
        Some(new_id)
    }

    pub fn update(&mut self, id: NodeId, change: impl FnOnce(&mut FakeElement)) {
        if let Some(node) = self.nodes.get_mut(&id) {
            change(&mut node.element);
        }
    }

    pub fn set_property(&mut self, id: NodeId, name: &str, value: &str) {
        self.update(id, |e| {
            e.properties.insert(name.to_string(), value.to_string());
        });
    }

    pub fn property(&self, id: NodeId, name: &str) -> Option<String> {
        let element = &self.nodes.get(&id)?.element;
        element
            .properties
            .get(name)
            .or_else(|| element.attributes.get(name))
            .cloned()
    }

    pub fn count(&self, locator: &Locator) -> usize {
        self.matches.get(locator).map_or(0, Vec::len)
    }

    pub fn exists(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn schedule_at(&mut self, at: Instant, mutation: impl FnOnce(&mut Dom) + Send + 'static) {
        self.scheduled.push((at, Box::new(mutation)));
        self.scheduled.sort_by_key(|(at, _)| *at);
    }

    /// Drift the node horizontally at `px_per_ms` for `duration`
    pub fn animate(&mut self, id: NodeId, px_per_ms: f64, duration: Duration) {
        let now = Instant::now();
        if let Some(node) = self.nodes.get_mut(&id) {
            node.motion = Some((now, now + duration, px_per_ms));
        }
    }

    fn tick(&mut self) {
        let now = Instant::now();
        while self
            .scheduled
            .first()
            .is_some_and(|(at, _)| *at <= now)
        {
            let (_, mutation) = self.scheduled.remove(0);
            mutation(self);
        }
    }

    fn node(&self, element: &ElementHandle) -> Result<(NodeId, &Node)> {
        let id = parse_handle(element)?;
        self.nodes
            .get(&id)
            .map(|node| (id, node))
            .ok_or_else(|| Error::StaleElement(element.id().to_string()))
    }

    fn current_rect(node: &Node) -> Rect {
        let mut rect = node.element.rect;
        if let Some((start, end, speed)) = node.motion {
            let now = Instant::now().min(end);
            rect.x += speed * now.duration_since(start).as_millis() as f64;
        }
        rect
    }

    fn set_value(&mut self, id: NodeId, value: &str) {
        self.set_property(id, "value", value);
        if let Some(mut handler) = self.value_handlers.remove(&id) {
            handler(self, id, value);
            if self.nodes.contains_key(&id) {
                self.value_handlers.entry(id).or_insert(handler);
            }
        }
    }

    fn clicked(&mut self, id: NodeId, kind: ClickKind) {
        self.clicks.push((id, kind));
        if let Some(mut handler) = self.click_handlers.remove(&id) {
            handler(self, id);
            self.click_handlers.entry(id).or_insert(handler);
        }
    }
}

fn handle(id: NodeId) -> ElementHandle {
    ElementHandle::new(format!("node-{}", id))
}

fn parse_handle(element: &ElementHandle) -> Result<NodeId> {
    element
        .id()
        .strip_prefix("node-")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| Error::StaleElement(element.id().to_string()))
}

/// In-memory [`Driver`]
#[derive(Clone)]
pub struct FakeDriver {
    dom: Arc<Mutex<Dom>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        init_tracing();
        Self {
            dom: Arc::new(Mutex::new(Dom::new())),
        }
    }

    pub fn shared(&self) -> Arc<dyn Driver> {
        Arc::new(self.clone())
    }

    /// Direct access to the document, with due mutations applied
    pub fn dom(&self) -> MutexGuard<'_, Dom> {
        let mut dom = self.dom.lock().unwrap();
        dom.tick();
        dom
    }

    pub fn add(&self, locator: &Locator, element: FakeElement) -> NodeId {
        self.dom().add(locator, element)
    }

    /// Apply `mutation` once `after` has elapsed on the tokio clock
    pub fn after(&self, after: Duration, mutation: impl FnOnce(&mut Dom) + Send + 'static) {
        let at = Instant::now() + after;
        self.dom().schedule_at(at, mutation);
    }

    /// React to value writes made through `set_value_and_notify`
    pub fn on_set_value(
        &self,
        id: NodeId,
        handler: impl FnMut(&mut Dom, NodeId, &str) + Send + 'static,
    ) {
        self.dom().value_handlers.insert(id, Box::new(handler));
    }

    pub fn on_click(&self, id: NodeId, handler: impl FnMut(&mut Dom, NodeId) + Send + 'static) {
        self.dom().click_handlers.insert(id, Box::new(handler));
    }

    pub fn clicks(&self) -> Vec<(NodeId, ClickKind)> {
        self.dom().clicks.clone()
    }

    pub fn handle(&self, id: NodeId) -> ElementHandle {
        handle(id)
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementHandle>> {
        locator.resolver_js()?;
        let mut dom = self.dom();
        dom.finds += 1;
        Ok(dom
            .matches
            .get(locator)
            .map(|ids| ids.iter().copied().map(handle).collect())
            .unwrap_or_default())
    }

    async fn element_state(&self, element: &ElementHandle) -> Result<ElementState> {
        let dom = self.dom();
        let (_, node) = dom.node(element)?;
        Ok(ElementState {
            displayed: node.element.displayed,
            enabled: node.element.enabled,
            obscured_by: node.element.obscured_by.clone(),
            rect: Dom::current_rect(node),
        })
    }

    async fn text(&self, element: &ElementHandle) -> Result<String> {
        let dom = self.dom();
        let (_, node) = dom.node(element)?;
        Ok(node.element.text.clone())
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        let dom = self.dom();
        let (_, node) = dom.node(element)?;
        Ok(node.element.attributes.get(name).cloned())
    }

    async fn property(&self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        let dom = self.dom();
        let (id, _) = dom.node(element)?;
        Ok(dom.property(id, name))
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        let mut dom = self.dom();
        let (id, node) = dom.node(element)?;
        let covered = node.element.obscured_by.clone();
        if dom.intercept_next_clicks > 0 {
            dom.intercept_next_clicks -= 1;
            return Err(Error::intercepted(element.id(), "div.toast"));
        }
        if let Some(by) = covered {
            return Err(Error::intercepted(element.id(), by));
        }
        if let Some(reason) = dom.click_failure.clone() {
            return Err(Error::not_interactable(element.id(), reason));
        }
        dom.clicked(id, ClickKind::Native);
        Ok(())
    }

    async fn clear(&self, element: &ElementHandle) -> Result<()> {
        let mut dom = self.dom();
        let (id, _) = dom.node(element)?;
        dom.set_property(id, "value", "");
        Ok(())
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> Result<()> {
        let mut dom = self.dom();
        let (id, _) = dom.node(element)?;
        let current = dom.property(id, "value").unwrap_or_default();
        dom.set_property(id, "value", &format!("{}{}", current, text));
        Ok(())
    }

    async fn execute_script(&self, _script: &str, args: Vec<ScriptArg>) -> Result<Value> {
        let dom = self.dom();
        for arg in &args {
            if let ScriptArg::Element(element) = arg {
                dom.node(element)?;
            }
        }
        Ok(Value::Null)
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.dom().url.clone())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let mut dom = self.dom();
        dom.url = url.to_string();
        if dom.load_time > Duration::ZERO {
            dom.ready_state = "loading".into();
            let at = Instant::now() + dom.load_time;
            dom.schedule_at(at, |dom| dom.ready_state = "complete".into());
        }
        Ok(())
    }

    async fn title(&self) -> Result<String> {
        Ok(self.dom().title.clone())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(b"\x89PNG\r\n\x1a\n".to_vec())
    }

    async fn ready_state(&self) -> Result<String> {
        let dom = self.dom();
        match dom.ready_state_failure {
            None => Ok(dom.ready_state.clone()),
            Some(ReadyStateFailure::ContextLost) => Err(Error::Cdp {
                method: "Runtime.evaluate".into(),
                code: -32000,
                message: "Execution context was destroyed.".into(),
            }),
            Some(ReadyStateFailure::ConnectionLost) => Err(Error::transport(
                "Connection lost while waiting for Runtime.evaluate",
            )),
        }
    }

    async fn pending_requests(&self) -> Result<Option<u64>> {
        self.dom().pending_requests.clone().map_err(Error::Script)
    }

    async fn scripted_click(&self, element: &ElementHandle) -> Result<()> {
        let mut dom = self.dom();
        let (id, _) = dom.node(element)?;
        if dom.scripted_click_fails {
            return Err(Error::Script("click is not a function".into()));
        }
        dom.clicked(id, ClickKind::Scripted);
        Ok(())
    }

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<()> {
        let mut dom = self.dom();
        let (id, _) = dom.node(element)?;
        dom.scrolls.push(id);
        Ok(())
    }

    async fn set_value_and_notify(&self, element: &ElementHandle, value: &str) -> Result<()> {
        let mut dom = self.dom();
        let (id, _) = dom.node(element)?;
        dom.set_value(id, value);
        Ok(())
    }

    async fn select_by_text(&self, element: &ElementHandle, text: &str) -> Result<()> {
        let mut dom = self.dom();
        let (id, node) = dom.node(element)?;
        let wanted = text.trim();
        if !node.element.options.iter().any(|o| o.trim() == wanted) {
            return Err(Error::ElementNotFound(format!("option with text '{}'", text)));
        }
        dom.set_value(id, wanted);
        Ok(())
    }
}
