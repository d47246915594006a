//! # Settle
//!
//! Synchronization and resilient interaction for browser end-to-end tests.
//!
//! Settle sits between page objects and a browser session. It never acts on
//! a page before the page is ready: every lookup is a polling wait on a named
//! condition, every click falls back to a scripted click when a transient
//! overlay intercepts it, and every timeout names the condition it gave up
//! on together with the last state it saw.
//!
//! ## Layers
//!
//! - [`wait`]: the polling engine ([`Poller`], [`WaitSpec`], [`Probe`])
//! - [`conditions`]: the named condition catalogue ([`Synchronizer`])
//! - [`interact`]: page mutations with readiness waits ([`Interactor`])
//! - [`page`]: the page object base ([`BasePage`], [`PageObject`])
//! - [`driver`]: the browser capability set everything runs on ([`Driver`]),
//!   implemented over the DevTools protocol by [`cdp::CdpDriver`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use settle::{BasePage, Browser, LaunchConfig, Locator};
//!
//! #[tokio::main]
//! async fn main() -> settle::Result<()> {
//!     let browser = Browser::launch(LaunchConfig::default()).await?;
//!     let page = BasePage::new(Arc::new(browser.new_driver("about:blank").await?));
//!
//!     page.navigate("http://localhost:8080/").await?;
//!     page.type_text(&Locator::css("input[name=s]"), "mug").await?;
//!     page.click(&Locator::css("button[type=submit]")).await?;
//!
//!     let found = page
//!         .is_displayed(&Locator::css(".product-miniature"), Duration::from_secs(5))
//!         .await;
//!     println!("results shown: {found}");
//!
//!     browser.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust,no_run
//! use settle::{BasePage, Settings};
//!
//! # fn demo(driver: std::sync::Arc<dyn settle::Driver>) -> settle::Result<()> {
//! let settings = Settings::load("settle.json")?;
//! let page = BasePage::with_presets(driver, settings.presets());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

pub mod browser;
pub mod cdp;
pub mod conditions;
pub mod config;
pub mod driver;
pub mod error;
pub mod interact;
pub mod locator;
pub mod page;
pub mod wait;

// Re-exports
pub use browser::Browser;
pub use conditions::{Condition, StabilitySample, StabilityTracker, Synchronizer};
pub use config::{Settings, TimeoutSettings};
pub use driver::{Driver, ElementHandle, ElementState, Rect, ScriptArg};
pub use error::{Error, Result};
pub use interact::{InteractionOutcome, Interactor, QuantityOutcome};
pub use locator::{Locator, Strategy};
pub use page::{BasePage, PageObject, WaitPresets};
pub use wait::{Poller, Probe, WaitSpec};

/// Configuration for launching Chrome
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Headless mode
    pub headless: bool,
    /// Path to Chrome/Chromium binary (None = search the usual locations)
    pub chrome_path: Option<PathBuf>,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Additional command-line switches
    pub extra_args: Vec<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            viewport_width: 1920,
            viewport_height: 1080,
            extra_args: Vec::new(),
        }
    }
}

impl LaunchConfig {
    /// Create a visible (non-headless) config
    pub fn visible() -> Self {
        Self {
            headless: false,
            ..Default::default()
        }
    }
}
