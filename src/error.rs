//! Error types for settle

use std::time::Duration;

use thiserror::Error;

/// Result type for settle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for settle
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to launch Chrome
    #[error("Failed to launch Chrome: {0}")]
    Launch(String),

    /// Transport error
    #[error("Transport error: {context}")]
    Transport {
        context: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// CDP protocol error
    #[error("CDP error in {method}: {message} (code {code})")]
    Cdp {
        method: String,
        code: i64,
        message: String,
    },

    /// A script evaluated in the page threw or returned nothing usable
    #[error("Script error: {0}")]
    Script(String),

    /// Navigation error
    #[error("Navigation error: {0}")]
    Navigation(String),

    /// No element matched the locator at the moment of resolution
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// A previously resolved element is no longer attached to the document
    #[error("Stale element reference: {0}")]
    StaleElement(String),

    /// Another element occupies the click target's position
    #[error("Click on {target} was intercepted: {detail}")]
    InterceptedInteraction { target: String, detail: String },

    /// Element exists but cannot be interacted with
    #[error("Element not interactable: '{target}' is {reason}")]
    NotInteractable { target: String, reason: String },

    /// Caller asked for an element past the end of an observed collection
    #[error("Index {index} out of range for collection of {len} element(s)")]
    IndexOutOfRange { index: usize, len: usize },

    /// Locator value cannot be used with its strategy
    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    /// Condition never held within its deadline
    #[error(
        "Timed out after {}ms waiting for {condition}{}",
        .elapsed.as_millis(),
        observed_suffix(.last_observed)
    )]
    Timeout {
        condition: String,
        elapsed: Duration,
        last_observed: Option<String>,
    },

    /// Wait aborted through its cancellation token
    #[error("Wait for {condition} was cancelled")]
    Cancelled { condition: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Decode error (e.g., base64)
    #[error("Decode error: {0}")]
    Decode(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Chrome not found
    #[error("Chrome not found")]
    ChromeNotFound,
}

pub(crate) fn is_context_lost_message(message: &str) -> bool {
    message.contains("Cannot find context")
        || message.contains("Execution context was destroyed")
        || message.contains("Inspected target navigated or closed")
}

fn observed_suffix(last_observed: &Option<String>) -> String {
    match last_observed {
        Some(state) => format!(" (last observed: {})", state),
        None => String::new(),
    }
}

impl Error {
    /// Create a transport error with context
    pub fn transport(context: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
            source: None,
        }
    }

    /// Create a transport error with IO source
    pub fn transport_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source: Some(source),
        }
    }

    /// Create a CDP error with full context
    pub fn cdp(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::Cdp {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(
        condition: impl Into<String>,
        elapsed: Duration,
        last_observed: Option<String>,
    ) -> Self {
        Self::Timeout {
            condition: condition.into(),
            elapsed,
            last_observed,
        }
    }

    /// Create an interception error
    pub fn intercepted(target: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InterceptedInteraction {
            target: target.into(),
            detail: detail.into(),
        }
    }

    /// Create an element not interactable error
    pub fn not_interactable(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotInteractable {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Whether a poll loop may treat this as "not yet satisfied"
    ///
    /// Missing elements, detached references and momentary interception are
    /// all expected while the page is still rendering.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ElementNotFound(_)
                | Error::StaleElement(_)
                | Error::InterceptedInteraction { .. }
        )
    }

    /// Check if this is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Check if this is a covered-click-target error
    pub fn is_intercepted(&self) -> bool {
        matches!(self, Error::InterceptedInteraction { .. })
    }

    /// Check if the page's script context went away under a protocol call
    ///
    /// Happens while a navigation replaces the document.
    pub fn is_context_lost(&self) -> bool {
        matches!(self, Error::Cdp { message, .. } if is_context_lost_message(message))
    }

    /// Elapsed time carried by a timeout, if this is one
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            Error::Timeout { elapsed, .. } => Some(*elapsed),
            _ => None,
        }
    }
}
