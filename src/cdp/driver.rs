//! [`Driver`] over a DevTools session
//!
//! Element handles are Runtime remote object ids. Every inspection runs as a
//! function called on the element itself, so a handle whose node left the
//! document or whose execution context was torn down by a navigation is
//! reported as [`Error::StaleElement`].

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::connection::Session;
use super::types::{CallArgument, MouseButton, MouseEventType};
use crate::driver::{Driver, ElementHandle, ElementState, Rect, ScriptArg};
use crate::error::{is_context_lost_message, Error, Result};
use crate::locator::Locator;

const STATE_JS: &str = r#"function() {
    if (!this.isConnected) return { connected: false };
    const style = getComputedStyle(this);
    const r = this.getBoundingClientRect();
    const displayed = style.display !== 'none'
        && style.visibility !== 'hidden'
        && style.visibility !== 'collapse'
        && parseFloat(style.opacity || '1') > 0
        && !this.closest('[hidden]');
    let obscured = null;
    if (displayed && r.width > 0 && r.height > 0) {
        const cx = r.left + r.width / 2;
        const cy = r.top + r.height / 2;
        if (cx >= 0 && cy >= 0 && cx < innerWidth && cy < innerHeight) {
            const top = document.elementFromPoint(cx, cy);
            if (top && top !== this && !this.contains(top)) {
                const cls = typeof top.className === 'string' ? top.className.trim() : '';
                obscured = top.tagName.toLowerCase()
                    + (top.id ? '#' + top.id : '')
                    + (cls ? '.' + cls.split(/\s+/).join('.') : '');
            }
        }
    }
    return {
        connected: true,
        displayed,
        enabled: !this.disabled,
        obscured,
        x: r.left, y: r.top, width: r.width, height: r.height
    };
}"#;

const REVEAL_JS: &str = r#"function() {
    if (this.scrollIntoViewIfNeeded) this.scrollIntoViewIfNeeded(true);
    else this.scrollIntoView({ block: 'center', inline: 'center' });
}"#;

const TEXT_JS: &str =
    "function() { return this.innerText ?? this.textContent ?? ''; }";

const ATTRIBUTE_JS: &str = "function(name) { return this.getAttribute(name); }";

const PROPERTY_JS: &str = r#"function(name) {
    const v = this[name];
    return v === undefined || v === null ? null : String(v);
}"#;

const CLEAR_JS: &str = r#"function() {
    this.focus();
    if ('value' in this) {
        this.value = '';
        this.dispatchEvent(new Event('input', { bubbles: true }));
    } else if (this.isContentEditable) {
        this.textContent = '';
    }
}"#;

const FOCUS_JS: &str = "function() { this.focus(); }";

/// Reply of [`STATE_JS`]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StateReply {
    connected: bool,
    displayed: bool,
    enabled: bool,
    obscured: Option<String>,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Messages DevTools uses for references that no longer resolve
fn is_lost_reference(message: &str) -> bool {
    message.contains("Could not find object") || is_context_lost_message(message)
}

/// Rewrite lost-reference protocol errors as staleness of `what`
fn stale(err: Error, what: &str) -> Error {
    match err {
        Error::Cdp { ref message, .. } if is_lost_reference(message) => {
            Error::StaleElement(what.to_string())
        }
        other => other,
    }
}

/// Browser session provider backed by one DevTools tab
pub struct CdpDriver {
    session: Session,
}

impl CdpDriver {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Release every element handle handed out so far
    ///
    /// Handles stay pinned in the page until this or a navigation. Long
    /// single-page sessions call it between steps; outstanding handles go
    /// stale.
    pub async fn release_handles(&self) -> Result<()> {
        self.session.release_objects().await
    }

    async fn call(
        &self,
        element: &ElementHandle,
        function: &str,
        arguments: Vec<CallArgument>,
    ) -> Result<Value> {
        let object = self
            .session
            .call_function_on(element.id(), function, arguments, true)
            .await
            .map_err(|e| stale(e, element.id()))?;
        Ok(object.value.unwrap_or(Value::Null))
    }

    async fn call_string(
        &self,
        element: &ElementHandle,
        function: &str,
        arg: &str,
    ) -> Result<Option<String>> {
        let value = self
            .call(element, function, vec![value_arg(Value::from(arg))])
            .await?;
        Ok(value.as_str().map(String::from))
    }

    async fn state(&self, element: &ElementHandle) -> Result<StateReply> {
        let reply: StateReply =
            serde_json::from_value(self.call(element, STATE_JS, Vec::new()).await?)?;
        if !reply.connected {
            return Err(Error::StaleElement(element.id().to_string()));
        }
        Ok(reply)
    }
}

/// `Runtime.evaluate` expression applying `declaration` to JSON arguments
fn script_expression(declaration: &str, values: &[Value]) -> Result<String> {
    Ok(format!(
        "({}).apply(null, {})",
        declaration,
        serde_json::to_string(values)?
    ))
}

fn value_arg(value: Value) -> CallArgument {
    CallArgument {
        value: Some(value),
        object_id: None,
    }
}

#[async_trait]
impl Driver for CdpDriver {
    async fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementHandle>> {
        let expression = locator.resolver_js()?;
        let array = match self.session.evaluate(&expression, false).await {
            Ok(array) => array,
            Err(Error::Script(message)) => {
                return Err(Error::InvalidLocator(format!("{}: {}", locator, message)))
            }
            // Mid-navigation; the next document will answer.
            Err(Error::Cdp { ref message, .. }) if is_lost_reference(message) => {
                return Err(Error::ElementNotFound(locator.to_string()))
            }
            Err(e) => return Err(e),
        };
        let Some(array_id) = array.object_id else {
            return Ok(Vec::new());
        };

        let properties = self.session.get_properties(&array_id).await;
        // The array itself is never handed out; only its members are.
        if let Err(e) = self.session.release_object(&array_id).await {
            tracing::debug!(error = %e, "releasing lookup array failed");
        }
        let properties = properties.map_err(|e| match e {
            Error::Cdp { ref message, .. } if is_lost_reference(message) => {
                Error::ElementNotFound(locator.to_string())
            }
            other => other,
        })?;
        let mut indexed: Vec<(usize, ElementHandle)> = properties
            .into_iter()
            .filter_map(|p| {
                let index = p.name.parse::<usize>().ok()?;
                let object_id = p.value?.object_id?;
                Some((index, ElementHandle::new(object_id)))
            })
            .collect();
        indexed.sort_by_key(|(index, _)| *index);
        Ok(indexed.into_iter().map(|(_, element)| element).collect())
    }

    async fn element_state(&self, element: &ElementHandle) -> Result<ElementState> {
        let reply = self.state(element).await?;
        Ok(ElementState {
            displayed: reply.displayed,
            enabled: reply.enabled,
            obscured_by: reply.obscured,
            rect: Rect::new(reply.x, reply.y, reply.width, reply.height),
        })
    }

    async fn text(&self, element: &ElementHandle) -> Result<String> {
        let value = self.call(element, TEXT_JS, Vec::new()).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        self.call_string(element, ATTRIBUTE_JS, name).await
    }

    async fn property(&self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        self.call_string(element, PROPERTY_JS, name).await
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        self.call(element, REVEAL_JS, Vec::new()).await?;
        let state = self.state(element).await?;
        let rect = Rect::new(state.x, state.y, state.width, state.height);

        if !state.displayed || !rect.has_area() {
            return Err(Error::not_interactable(element.id(), "not rendered"));
        }
        if let Some(by) = state.obscured {
            return Err(Error::intercepted(
                element.id(),
                format!("other element would receive the click: {}", by),
            ));
        }

        let (x, y) = rect.center();
        self.session
            .dispatch_mouse_event(MouseEventType::MouseMoved, x, y, None, None)
            .await?;
        self.session
            .dispatch_mouse_event(
                MouseEventType::MousePressed,
                x,
                y,
                Some(MouseButton::Left),
                Some(1),
            )
            .await?;
        self.session
            .dispatch_mouse_event(
                MouseEventType::MouseReleased,
                x,
                y,
                Some(MouseButton::Left),
                Some(1),
            )
            .await?;
        Ok(())
    }

    async fn clear(&self, element: &ElementHandle) -> Result<()> {
        self.call(element, CLEAR_JS, Vec::new()).await?;
        Ok(())
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> Result<()> {
        self.call(element, FOCUS_JS, Vec::new()).await?;
        self.session.insert_text(text).await
    }

    async fn execute_script(&self, script: &str, args: Vec<ScriptArg>) -> Result<Value> {
        let declaration = format!("function() {{\n{}\n}}", script);

        // Without element arguments the call needs no remote object at all.
        let target = args.iter().find_map(|arg| match arg {
            ScriptArg::Element(element) => Some(element.id().to_string()),
            ScriptArg::Value(_) => None,
        });
        let Some(target) = target else {
            let values: Vec<Value> = args
                .into_iter()
                .filter_map(|arg| match arg {
                    ScriptArg::Value(value) => Some(value),
                    ScriptArg::Element(_) => None,
                })
                .collect();
            let expression = script_expression(&declaration, &values)?;
            let result = self.session.evaluate(&expression, true).await?;
            return Ok(result.value.unwrap_or(Value::Null));
        };

        let arguments = args
            .into_iter()
            .map(|arg| match arg {
                ScriptArg::Element(element) => CallArgument {
                    value: None,
                    object_id: Some(element.id().to_string()),
                },
                ScriptArg::Value(value) => value_arg(value),
            })
            .collect();
        let result = self
            .session
            .call_function_on(&target, &declaration, arguments, true)
            .await
            .map_err(|e| stale(e, "script argument"))?;
        Ok(result.value.unwrap_or(Value::Null))
    }

    async fn current_url(&self) -> Result<String> {
        let result = self.session.evaluate("location.href", true).await?;
        Ok(result
            .value
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        if let Err(e) = self.session.release_objects().await {
            tracing::debug!(error = %e, "releasing remote objects failed");
        }
        self.session.navigate(url).await
    }

    async fn title(&self) -> Result<String> {
        let result = self.session.evaluate("document.title", true).await?;
        Ok(result
            .value
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.session.capture_screenshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lost_reference_becomes_stale() {
        let err = stale(
            Error::cdp("Runtime.callFunctionOn", -32000, "Could not find object with given id"),
            "obj-7",
        );
        assert!(matches!(err, Error::StaleElement(ref id) if id == "obj-7"));

        let other = stale(
            Error::cdp("Runtime.callFunctionOn", -32602, "Invalid parameters"),
            "obj-7",
        );
        assert!(matches!(other, Error::Cdp { .. }));
    }

    #[test]
    fn test_value_only_scripts_are_evaluated_inline() {
        let expression = script_expression(
            "function() {\nreturn arguments[0] + arguments[1];\n}",
            &[json!("a"), json!(2)],
        )
        .unwrap();
        assert_eq!(
            expression,
            "(function() {\nreturn arguments[0] + arguments[1];\n}).apply(null, [\"a\",2])"
        );
        assert!(script_expression("function() {}", &[])
            .unwrap()
            .ends_with(".apply(null, [])"));
    }

    #[test]
    fn test_state_reply_defaults_when_detached() {
        let reply: StateReply = serde_json::from_value(json!({"connected": false})).unwrap();
        assert!(!reply.connected);
        assert!(reply.obscured.is_none());
    }
}
