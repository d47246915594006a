//! Page object base
//!
//! [`BasePage`] bundles a driver with wait presets, a [`Synchronizer`] and an
//! [`Interactor`], and exposes the wrappers concrete page objects are built
//! from. Page objects implement [`PageObject`] and never query the DOM past
//! this layer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::conditions::Synchronizer;
use crate::driver::{Driver, ElementHandle};
use crate::error::{Error, Result};
use crate::interact::{InteractionOutcome, Interactor};
use crate::locator::Locator;
use crate::wait::{Poller, Probe, WaitSpec};

/// Short / standard / long wait presets shared by a page object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPresets {
    /// Quick displayed-checks
    pub short: WaitSpec,
    /// Element-level operations
    pub standard: WaitSpec,
    /// Navigation and full page loads
    pub long: WaitSpec,
}

impl Default for WaitPresets {
    fn default() -> Self {
        Self {
            short: WaitSpec::short(),
            standard: WaitSpec::standard(),
            long: WaitSpec::long(),
        }
    }
}

/// Shared building blocks for page objects
#[derive(Clone)]
pub struct BasePage {
    driver: Arc<dyn Driver>,
    waits: WaitPresets,
    sync: Synchronizer,
    interactor: Interactor,
}

impl BasePage {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self::with_presets(driver, WaitPresets::default())
    }

    pub fn with_presets(driver: Arc<dyn Driver>, waits: WaitPresets) -> Self {
        Self::build(driver, waits, Poller::new())
    }

    /// Page whose waits all abort once `cancel` fires
    pub fn with_cancellation(
        driver: Arc<dyn Driver>,
        waits: WaitPresets,
        cancel: CancellationToken,
    ) -> Self {
        Self::build(driver, waits, Poller::with_cancellation(cancel))
    }

    fn build(driver: Arc<dyn Driver>, waits: WaitPresets, poller: Poller) -> Self {
        let sync = Synchronizer::with_poller(driver.clone(), poller);
        let interactor = Interactor::new(sync.clone());
        Self {
            driver,
            waits,
            sync,
            interactor,
        }
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn waits(&self) -> &WaitPresets {
        &self.waits
    }

    pub fn sync(&self) -> &Synchronizer {
        &self.sync
    }

    pub fn interactor(&self) -> &Interactor {
        &self.interactor
    }

    // =========================================================================
    // Finding Elements
    // =========================================================================

    /// First visible match
    pub async fn find(&self, locator: &Locator) -> Result<ElementHandle> {
        self.sync.wait_visible(locator, self.waits.standard).await
    }

    /// Every current match once at least one exists
    pub async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementHandle>> {
        self.sync
            .wait_count_at_least(locator, 1, self.waits.standard)
            .await
    }

    /// First locator of a fallback chain to produce a visible element
    ///
    /// All candidates are checked on every poll, in order, so an earlier
    /// locator wins when several match at once.
    pub async fn find_any(
        &self,
        candidates: &[Locator],
        spec: WaitSpec,
    ) -> Result<(Locator, ElementHandle)> {
        if candidates.is_empty() {
            return Err(Error::InvalidLocator("empty locator chain".into()));
        }
        let description = format!(
            "any of [{}] visible",
            candidates
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let driver = self.driver.as_ref();
        self.sync
            .poller()
            .until(spec, &description, move || async move {
                for candidate in candidates {
                    let elements = match driver.find_elements(candidate).await {
                        Ok(elements) => elements,
                        Err(e) if e.is_transient() => continue,
                        Err(e) => return Probe::Fatal(e),
                    };
                    let Some(element) = elements.into_iter().next() else {
                        continue;
                    };
                    match driver.element_state(&element).await {
                        Ok(state) if state.is_visible() => {
                            return Probe::Ready((candidate.clone(), element))
                        }
                        Ok(_) => {}
                        Err(e) if e.is_transient() => {}
                        Err(e) => return Probe::Fatal(e),
                    }
                }
                Probe::pending("no candidate visible")
            })
            .await
    }

    /// Element at `index` of the collection, once the collection has rendered
    ///
    /// A collection shorter than `index + 1` is an immediate
    /// [`Error::IndexOutOfRange`], not a wait.
    pub async fn nth(
        &self,
        locator: &Locator,
        index: usize,
        spec: WaitSpec,
    ) -> Result<ElementHandle> {
        let mut elements = self.sync.wait_count_at_least(locator, 1, spec).await?;
        let len = elements.len();
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }
        Ok(elements.swap_remove(index))
    }

    // =========================================================================
    // Interaction
    // =========================================================================

    pub async fn click(&self, locator: &Locator) -> Result<InteractionOutcome> {
        self.interactor.click(locator, self.waits.standard).await
    }

    /// Click the displayed member of `collection` whose text matches `text`
    ///
    /// Matching is case-insensitive on trimmed text. The element is scrolled
    /// into view before the resilient click.
    pub async fn click_by_text(
        &self,
        collection: &Locator,
        text: &str,
    ) -> Result<InteractionOutcome> {
        let wanted = text.trim().to_lowercase();
        let description = format!("member of {} with text '{}'", collection, text);
        let driver = self.driver.as_ref();
        let wanted = wanted.as_str();
        let element = self
            .sync
            .poller()
            .until(self.waits.standard, &description, move || async move {
                let elements = match driver.find_elements(collection).await {
                    Ok(elements) => elements,
                    Err(e) => return Probe::from_error(e),
                };
                let mut seen = Vec::new();
                for element in elements {
                    let Ok(state) = driver.element_state(&element).await else {
                        continue;
                    };
                    if !state.is_visible() {
                        continue;
                    }
                    let Ok(content) = driver.text(&element).await else {
                        continue;
                    };
                    if content.trim().to_lowercase() == wanted {
                        return Probe::Ready(element);
                    }
                    seen.push(content.trim().to_string());
                }
                Probe::pending(format!("visible texts {:?}", seen))
            })
            .await?;

        self.interactor.scroll_element_into_view(&element).await?;
        self.interactor
            .click_element(&element, &format!("{} '{}'", collection, text))
            .await
    }

    pub async fn type_text(&self, locator: &Locator, text: &str) -> Result<()> {
        self.interactor
            .type_text(locator, text, self.waits.standard)
            .await
    }

    /// Navigate and wait for the new document to finish loading
    pub async fn navigate(&self, url: &str) -> Result<()> {
        tracing::info!(url, "navigating");
        self.driver.navigate(url).await?;
        self.sync.wait_page_load(self.waits.long).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Whether the element becomes visible within `timeout`; never fails
    pub async fn is_displayed(&self, locator: &Locator, timeout: Duration) -> bool {
        let spec = self.waits.short.with_timeout(timeout);
        match self.sync.wait_visible(locator, spec).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(locator = %locator, error = %e, "not displayed");
                false
            }
        }
    }

    /// Text of the first visible match
    pub async fn text_of(&self, locator: &Locator) -> Result<String> {
        let element = self.find(locator).await?;
        self.driver.text(&element).await
    }

    /// Trimmed, non-empty, distinct texts of the displayed matches, in order
    pub async fn visible_texts(&self, locator: &Locator) -> Result<Vec<String>> {
        let elements = self.find_all(locator).await?;
        let mut texts: Vec<String> = Vec::with_capacity(elements.len());
        for element in &elements {
            let state = match self.driver.element_state(element).await {
                Ok(state) => state,
                Err(e) if e.is_transient() => continue,
                Err(e) => return Err(e),
            };
            if !state.is_visible() {
                continue;
            }
            let text = match self.driver.text(element).await {
                Ok(text) => text.trim().to_string(),
                Err(e) if e.is_transient() => continue,
                Err(e) => return Err(e),
            };
            if !text.is_empty() && !texts.contains(&text) {
                texts.push(text);
            }
        }
        Ok(texts)
    }

    pub async fn title(&self) -> Result<String> {
        self.driver.title().await
    }

    pub async fn current_url(&self) -> Result<String> {
        self.driver.current_url().await
    }

    /// Save a PNG of the viewport as `<dir>/<name>_<unix millis>.png`
    pub async fn capture_screenshot(&self, dir: impl AsRef<Path>, name: &str) -> Result<PathBuf> {
        let png = self.driver.screenshot().await?;
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let path = dir.join(format!("{}_{}.png", sanitize_file_stem(name), stamp));
        tokio::fs::write(&path, png).await?;
        tracing::info!(path = %path.display(), "screenshot saved");
        Ok(path)
    }
}

fn sanitize_file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "screenshot".to_string()
    } else {
        stem
    }
}

/// A page of the application under test
#[async_trait]
pub trait PageObject: Send + Sync {
    fn base(&self) -> &BasePage;

    /// Element whose visibility marks the page as rendered
    fn ready_marker(&self) -> Option<&Locator> {
        None
    }

    /// Wait for the document load, the ready marker and AJAX quiescence
    async fn wait_until_ready(&self) -> Result<()> {
        let base = self.base();
        base.sync().wait_page_load(base.waits().long).await?;
        if let Some(marker) = self.ready_marker() {
            base.sync().wait_visible(marker, base.waits().standard).await?;
        }
        base.sync().wait_ajax_idle(base.waits().standard).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_presets() {
        let presets = WaitPresets::default();
        assert_eq!(presets.short.timeout, Duration::from_secs(5));
        assert_eq!(presets.standard.timeout, Duration::from_secs(10));
        assert_eq!(presets.long.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_sanitize_file_stem() {
        assert_eq!(sanitize_file_stem("cart test: empty"), "cart_test__empty");
        assert_eq!(sanitize_file_stem("add-to-cart_1"), "add-to-cart_1");
        assert_eq!(sanitize_file_stem(""), "screenshot");
    }
}
