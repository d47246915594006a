//! Browser session provider
//!
//! The synchronization layer only ever talks to a [`Driver`]: something that
//! can resolve locators, inspect and poke resolved elements, run scripts and
//! read or change the current URL. [`crate::cdp::CdpDriver`] implements it
//! over the Chrome DevTools Protocol; tests implement it in memory.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::locator::Locator;

/// Opaque reference to a resolved element
///
/// Handles are only valid until the node they point at leaves the document;
/// using one afterwards yields [`Error::StaleElement`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    id: String,
}

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Bounding box of an element in viewport coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Get the center point
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// Snapshot of the rendering state of one element
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElementState {
    /// Not hidden through `display`, `visibility` or the `hidden` attribute
    pub displayed: bool,
    /// Not `disabled`
    pub enabled: bool,
    /// Short description of whatever covers the element's center, if anything
    pub obscured_by: Option<String>,
    pub rect: Rect,
}

impl ElementState {
    /// Rendered with a non-zero box
    pub fn is_visible(&self) -> bool {
        self.displayed && self.rect.has_area()
    }

    pub fn is_clickable(&self) -> bool {
        self.is_visible() && self.enabled && self.obscured_by.is_none()
    }
}

/// Argument passed to [`Driver::execute_script`]
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptArg {
    Element(ElementHandle),
    Value(Value),
}

impl From<&ElementHandle> for ScriptArg {
    fn from(element: &ElementHandle) -> Self {
        ScriptArg::Element(element.clone())
    }
}

impl From<Value> for ScriptArg {
    fn from(value: Value) -> Self {
        ScriptArg::Value(value)
    }
}

pub(crate) const SCRIPTED_CLICK_JS: &str = "arguments[0].click();";

pub(crate) const SCROLL_INTO_VIEW_JS: &str =
    "arguments[0].scrollIntoView({ behavior: 'smooth', block: 'center' });";

pub(crate) const SET_VALUE_JS: &str = r#"
    const el = arguments[0];
    el.value = arguments[1];
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
"#;

pub(crate) const SELECT_BY_TEXT_JS: &str = r#"
    const select = arguments[0];
    const wanted = String(arguments[1]).trim();
    const index = Array.from(select.options).findIndex(o => o.text.trim() === wanted);
    if (index < 0) return false;
    select.selectedIndex = index;
    select.dispatchEvent(new Event('input', { bubbles: true }));
    select.dispatchEvent(new Event('change', { bubbles: true }));
    return true;
"#;

/// Pending request count from the page's client framework.
///
/// jQuery's `active` counter when present, otherwise a fetch/XHR counter
/// installed on first use. `null` when neither can be established.
pub(crate) const PENDING_REQUESTS_JS: &str = r#"
    if (window.jQuery && typeof window.jQuery.active === 'number') return window.jQuery.active;
    if (window.__settle_pending === undefined) {
        if (!window.fetch || !window.XMLHttpRequest) return null;
        window.__settle_pending = 0;
        const originalFetch = window.fetch;
        window.fetch = function(...args) {
            window.__settle_pending++;
            return originalFetch.apply(this, args).finally(() => { window.__settle_pending--; });
        };
        const originalSend = XMLHttpRequest.prototype.send;
        XMLHttpRequest.prototype.send = function(...args) {
            window.__settle_pending++;
            this.addEventListener('loadend', () => { window.__settle_pending--; });
            return originalSend.apply(this, args);
        };
    }
    return window.__settle_pending;
"#;

/// Capability set the synchronization layer needs from a browser session
///
/// Required methods are the primitives every backend must offer. The provided
/// methods are expressed through [`Driver::execute_script`] and can be
/// overridden by backends with a native way of doing the same thing.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Resolve every element currently matching `locator`, in document order
    async fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementHandle>>;

    async fn element_state(&self, element: &ElementHandle) -> Result<ElementState>;

    /// Rendered text of the element
    async fn text(&self, element: &ElementHandle) -> Result<String>;

    /// Static DOM attribute as written in markup (`getAttribute`)
    async fn attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>>;

    /// Live DOM property (`element[name]`), stringified
    async fn property(&self, element: &ElementHandle, name: &str) -> Result<Option<String>>;

    /// Native pointer click at the element's center
    ///
    /// Fails with [`Error::InterceptedInteraction`] when another element
    /// occupies that point.
    async fn click(&self, element: &ElementHandle) -> Result<()>;

    async fn clear(&self, element: &ElementHandle) -> Result<()>;

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> Result<()>;

    /// Run `script` as a function body; `arguments[i]` maps to `args[i]`
    async fn execute_script(&self, script: &str, args: Vec<ScriptArg>) -> Result<Value>;

    async fn current_url(&self) -> Result<String>;

    async fn navigate(&self, url: &str) -> Result<()>;

    async fn title(&self) -> Result<String>;

    /// Capture the viewport as PNG bytes
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// `document.readyState`
    async fn ready_state(&self) -> Result<String> {
        let value = self
            .execute_script("return document.readyState;", Vec::new())
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Number of in-flight asynchronous requests, `None` if untracked
    async fn pending_requests(&self) -> Result<Option<u64>> {
        let value = self
            .execute_script(PENDING_REQUESTS_JS, Vec::new())
            .await?;
        Ok(value.as_u64())
    }

    /// Dispatch a click through the element's own `click()` method
    async fn scripted_click(&self, element: &ElementHandle) -> Result<()> {
        self.execute_script(SCRIPTED_CLICK_JS, vec![element.into()])
            .await?;
        Ok(())
    }

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<()> {
        self.execute_script(SCROLL_INTO_VIEW_JS, vec![element.into()])
            .await?;
        Ok(())
    }

    /// Write `value` to the element and fire `input` and `change`
    async fn set_value_and_notify(&self, element: &ElementHandle, value: &str) -> Result<()> {
        self.execute_script(SET_VALUE_JS, vec![element.into(), json!(value).into()])
            .await?;
        Ok(())
    }

    /// Select the `<option>` whose text equals `text`
    async fn select_by_text(&self, element: &ElementHandle, text: &str) -> Result<()> {
        let found = self
            .execute_script(SELECT_BY_TEXT_JS, vec![element.into(), json!(text).into()])
            .await?;
        if found.as_bool() != Some(true) {
            return Err(Error::ElementNotFound(format!("option with text '{}'", text)));
        }
        Ok(())
    }
}
