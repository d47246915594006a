//! Browser connection and target sessions

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::transport::Transport;
use super::types::*;
use crate::error::{Error, Result};

/// Object group every remote reference created by a session belongs to
pub const OBJECT_GROUP: &str = "settle";

/// Browser-level DevTools connection
pub struct Connection {
    transport: Arc<Transport>,
}

impl Connection {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Open a tab at `url`
    pub async fn create_target(&self, url: &str, width: u32, height: u32) -> Result<String> {
        let result: TargetCreateTargetResult = self
            .transport
            .send(
                None,
                "Target.createTarget",
                &TargetCreateTarget {
                    url: url.to_string(),
                    width: Some(width),
                    height: Some(height),
                },
            )
            .await?;
        Ok(result.target_id)
    }

    /// Attach to a tab with a flattened session
    pub async fn attach_to_target(&self, target_id: &str) -> Result<Session> {
        let result: TargetAttachToTargetResult = self
            .transport
            .send(
                None,
                "Target.attachToTarget",
                &TargetAttachToTarget {
                    target_id: target_id.to_string(),
                    flatten: true,
                },
            )
            .await?;

        Ok(Session {
            transport: Arc::clone(&self.transport),
            session_id: result.session_id,
            target_id: target_id.to_string(),
        })
    }

    pub async fn close_target(&self, target_id: &str) -> Result<()> {
        self.transport
            .send::<_, Value>(
                None,
                "Target.closeTarget",
                &TargetCloseTarget {
                    target_id: target_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Ask the browser to exit, then tear the transport down
    pub async fn close(&self) -> Result<()> {
        let _ = self
            .transport
            .send::<_, Value>(None, "Browser.close", &BrowserClose {})
            .await;
        self.transport.close().await
    }
}

/// DevTools session attached to one tab
pub struct Session {
    transport: Arc<Transport>,
    session_id: String,
    target_id: String,
}

impl Session {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn send<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        self.transport
            .send(Some(&self.session_id), method, params)
            .await
    }

    pub async fn page_enable(&self) -> Result<()> {
        self.send::<_, Value>("Page.enable", &PageEnable {}).await?;
        Ok(())
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        let result: PageNavigateResult = self
            .send(
                "Page.navigate",
                &PageNavigate {
                    url: url.to_string(),
                },
            )
            .await?;
        match result.error_text {
            Some(error) if !error.is_empty() => {
                Err(Error::Navigation(format!("{}: {}", url, error)))
            }
            _ => Ok(()),
        }
    }

    /// Capture the viewport as PNG
    pub async fn capture_screenshot(&self) -> Result<Vec<u8>> {
        let result: PageCaptureScreenshotResult = self
            .send("Page.captureScreenshot", &PageCaptureScreenshot { format: "png" })
            .await?;

        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(&result.data)
            .map_err(|e| Error::Decode(e.to_string()))
    }

    pub async fn dispatch_mouse_event(
        &self,
        event_type: MouseEventType,
        x: f64,
        y: f64,
        button: Option<MouseButton>,
        click_count: Option<i32>,
    ) -> Result<()> {
        self.send::<_, Value>(
            "Input.dispatchMouseEvent",
            &InputDispatchMouseEvent {
                r#type: event_type,
                x,
                y,
                button,
                click_count,
            },
        )
        .await?;
        Ok(())
    }

    /// Insert text at the focused element's caret
    pub async fn insert_text(&self, text: &str) -> Result<()> {
        self.send::<_, Value>(
            "Input.insertText",
            &InputInsertText {
                text: text.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    /// Evaluate an expression in the page's main world
    ///
    /// With `by_value == false` the result stays in the page and is returned
    /// as a remote object in [`OBJECT_GROUP`].
    pub async fn evaluate(&self, expression: &str, by_value: bool) -> Result<RemoteObject> {
        let result: RuntimeResult = self
            .send(
                "Runtime.evaluate",
                &RuntimeEvaluate {
                    expression: expression.to_string(),
                    object_group: (!by_value).then(|| OBJECT_GROUP.to_string()),
                    return_by_value: by_value,
                    await_promise: true,
                },
            )
            .await?;
        into_remote_object(result)
    }

    /// Call `function_declaration` with `this` bound to `object_id`
    pub async fn call_function_on(
        &self,
        object_id: &str,
        function_declaration: &str,
        arguments: Vec<CallArgument>,
        by_value: bool,
    ) -> Result<RemoteObject> {
        let result: RuntimeResult = self
            .send(
                "Runtime.callFunctionOn",
                &RuntimeCallFunctionOn {
                    function_declaration: function_declaration.to_string(),
                    object_id: object_id.to_string(),
                    arguments,
                    object_group: (!by_value).then(|| OBJECT_GROUP.to_string()),
                    return_by_value: by_value,
                    await_promise: true,
                },
            )
            .await?;
        into_remote_object(result)
    }

    /// Own properties of a remote object (used to enumerate arrays)
    pub async fn get_properties(&self, object_id: &str) -> Result<Vec<PropertyDescriptor>> {
        let result: RuntimeGetPropertiesResult = self
            .send(
                "Runtime.getProperties",
                &RuntimeGetProperties {
                    object_id: object_id.to_string(),
                    own_properties: true,
                },
            )
            .await?;
        Ok(result.result)
    }

    /// Drop one remote reference
    pub async fn release_object(&self, object_id: &str) -> Result<()> {
        self.send::<_, Value>(
            "Runtime.releaseObject",
            &RuntimeReleaseObject {
                object_id: object_id.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    /// Drop every remote reference handed out so far
    pub async fn release_objects(&self) -> Result<()> {
        self.send::<_, Value>(
            "Runtime.releaseObjectGroup",
            &RuntimeReleaseObjectGroup {
                object_group: OBJECT_GROUP.to_string(),
            },
        )
        .await?;
        Ok(())
    }
}

fn into_remote_object(result: RuntimeResult) -> Result<RemoteObject> {
    match result.exception_details {
        Some(details) => Err(Error::Script(details.message())),
        None => Ok(result.result),
    }
}
