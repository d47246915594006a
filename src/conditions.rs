//! Named UI conditions
//!
//! [`Synchronizer`] turns the condition catalogue into polling episodes over
//! a [`Driver`]. Every condition can be waited on (timeout is an error) or
//! checked (timeout is `false`); the ones with a useful result also have a
//! typed `wait_*` method returning it.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::driver::{Driver, ElementHandle, ElementState};
use crate::error::Result;
use crate::locator::Locator;
use crate::wait::{probe_try, Poller, Probe, WaitSpec};

/// Delay between the two position samples of one stability probe
pub const STABILITY_SAMPLE_DELAY: Duration = Duration::from_millis(100);

/// A condition over live document state
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Present and rendered with a non-zero box
    Visible(Locator),
    /// Visible, enabled and not covered by another element
    Clickable(Locator),
    /// Present in the DOM, rendered or not
    Exists(Locator),
    /// Absent, or rendered with zero size
    Disappeared(Locator),
    UrlContains(String),
    /// Element text differs from `previous`
    TextChanged { locator: Locator, previous: String },
    /// Markup attribute (`getAttribute`) equals `expected`
    AttributeEquals {
        locator: Locator,
        name: String,
        expected: String,
    },
    /// Live DOM property equals `expected`
    PropertyEquals {
        locator: Locator,
        name: String,
        expected: String,
    },
    CountEquals(Locator, usize),
    CountAtLeast(Locator, usize),
    /// `document.readyState` is `complete`
    PageLoadComplete,
    /// No pending asynchronous requests; idle when untracked
    AjaxIdle,
    /// Two consecutive position samples are identical
    GeometricallyStable(Locator),
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Visible(l) => write!(f, "visible({l})"),
            Condition::Clickable(l) => write!(f, "clickable({l})"),
            Condition::Exists(l) => write!(f, "exists({l})"),
            Condition::Disappeared(l) => write!(f, "disappeared({l})"),
            Condition::UrlContains(s) => write!(f, "url contains '{s}'"),
            Condition::TextChanged { locator, previous } => {
                write!(f, "text of {locator} changed from '{previous}'")
            }
            Condition::AttributeEquals {
                locator,
                name,
                expected,
            } => write!(f, "attribute {name} of {locator} == '{expected}'"),
            Condition::PropertyEquals {
                locator,
                name,
                expected,
            } => write!(f, "property {name} of {locator} == '{expected}'"),
            Condition::CountEquals(l, n) => write!(f, "count({l}) == {n}"),
            Condition::CountAtLeast(l, n) => write!(f, "count({l}) >= {n}"),
            Condition::PageLoadComplete => write!(f, "page load complete"),
            Condition::AjaxIdle => write!(f, "ajax idle"),
            Condition::GeometricallyStable(l) => write!(f, "stable position of {l}"),
        }
    }
}

/// Position snapshot used for stability detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilitySample {
    pub position: (f64, f64),
    pub captured_at: Instant,
}

impl StabilitySample {
    pub fn now(position: (f64, f64)) -> Self {
        Self {
            position,
            captured_at: Instant::now(),
        }
    }
}

/// Tracks consecutive samples; one sample alone is never stable
#[derive(Debug, Clone, Default)]
pub struct StabilityTracker {
    previous: Option<StabilitySample>,
}

impl StabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample; true if it matches the one recorded just before it
    pub fn observe(&mut self, sample: StabilitySample) -> bool {
        let stable = matches!(self.previous, Some(prev) if prev.position == sample.position);
        self.previous = Some(sample);
        stable
    }

    pub fn has_sample(&self) -> bool {
        self.previous.is_some()
    }

    /// Time left before a sample may be compared with the previous one
    pub fn time_until_next(&self, spacing: Duration) -> Duration {
        self.previous.map_or(Duration::ZERO, |prev| {
            spacing.saturating_sub(prev.captured_at.elapsed())
        })
    }

    /// Forget history, e.g. after the element could not be sampled
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

/// Named conditions over a browser session
#[derive(Clone)]
pub struct Synchronizer {
    driver: Arc<dyn Driver>,
    poller: Poller,
}

impl Synchronizer {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self::with_poller(driver, Poller::new())
    }

    pub fn with_poller(driver: Arc<dyn Driver>, poller: Poller) -> Self {
        Self { driver, poller }
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    // =========================================================================
    // Catalogue entry points
    // =========================================================================

    /// Wait for `condition`, failing with a timeout error
    pub async fn wait(&self, condition: &Condition, spec: WaitSpec) -> Result<()> {
        let description = condition.to_string();
        let tracker = Mutex::new(StabilityTracker::new());
        let tracker = &tracker;
        self.poller
            .until(spec, &description, move || async move {
                self.probe(condition, tracker).await
            })
            .await
    }

    /// Wait for `condition`, returning `false` on timeout
    pub async fn check(&self, condition: &Condition, spec: WaitSpec) -> Result<bool> {
        let description = condition.to_string();
        let tracker = Mutex::new(StabilityTracker::new());
        let tracker = &tracker;
        let outcome = self
            .poller
            .try_until(spec, &description, move || async move {
                self.probe(condition, tracker).await
            })
            .await?;
        Ok(outcome.is_some())
    }

    async fn probe(&self, condition: &Condition, tracker: &Mutex<StabilityTracker>) -> Probe<()> {
        match condition {
            Condition::Visible(l) => self.probe_visible(l).await.map(drop),
            Condition::Clickable(l) => self.probe_clickable(l).await.map(drop),
            Condition::Exists(l) => self.probe_exists(l).await.map(drop),
            Condition::Disappeared(l) => self.probe_disappeared(l).await,
            Condition::UrlContains(s) => self.probe_url_contains(s).await.map(drop),
            Condition::TextChanged { locator, previous } => {
                self.probe_text_changed(locator, previous).await.map(drop)
            }
            Condition::AttributeEquals {
                locator,
                name,
                expected,
            } => self.probe_attribute(locator, name, expected).await,
            Condition::PropertyEquals {
                locator,
                name,
                expected,
            } => self.probe_property(locator, name, expected).await,
            Condition::CountEquals(l, n) => self.probe_count(l, |c| c == *n).await.map(drop),
            Condition::CountAtLeast(l, n) => self.probe_count(l, |c| c >= *n).await.map(drop),
            Condition::PageLoadComplete => self.probe_page_load().await,
            Condition::AjaxIdle => self.probe_ajax_idle().await,
            Condition::GeometricallyStable(l) => self.probe_stable(l, tracker).await.map(drop),
        }
    }

    // =========================================================================
    // Typed waits
    // =========================================================================

    /// Wait until the first match is rendered; returns it
    pub async fn wait_visible(&self, locator: &Locator, spec: WaitSpec) -> Result<ElementHandle> {
        let description = Condition::Visible(locator.clone()).to_string();
        self.poller
            .until(spec, &description, move || self.probe_visible(locator))
            .await
    }

    /// Wait until the first match can take a click; returns it
    pub async fn wait_clickable(&self, locator: &Locator, spec: WaitSpec) -> Result<ElementHandle> {
        let description = Condition::Clickable(locator.clone()).to_string();
        self.poller
            .until(spec, &description, move || self.probe_clickable(locator))
            .await
    }

    /// Wait until anything matches; returns the first match
    pub async fn wait_exists(&self, locator: &Locator, spec: WaitSpec) -> Result<ElementHandle> {
        let description = Condition::Exists(locator.clone()).to_string();
        self.poller
            .until(spec, &description, move || self.probe_exists(locator))
            .await
    }

    pub async fn wait_disappeared(&self, locator: &Locator, spec: WaitSpec) -> Result<()> {
        self.wait(&Condition::Disappeared(locator.clone()), spec)
            .await
    }

    /// Wait for the URL to contain `fragment`; returns the URL
    pub async fn wait_url_contains(&self, fragment: &str, spec: WaitSpec) -> Result<String> {
        let description = Condition::UrlContains(fragment.to_string()).to_string();
        self.poller
            .until(spec, &description, move || self.probe_url_contains(fragment))
            .await
    }

    /// Wait for the element's text to differ from `previous`; returns the new text
    pub async fn wait_text_changed(
        &self,
        locator: &Locator,
        previous: &str,
        spec: WaitSpec,
    ) -> Result<String> {
        let description = Condition::TextChanged {
            locator: locator.clone(),
            previous: previous.to_string(),
        }
        .to_string();
        self.poller
            .until(spec, &description, move || {
                self.probe_text_changed(locator, previous)
            })
            .await
    }

    pub async fn wait_attribute_equals(
        &self,
        locator: &Locator,
        name: &str,
        expected: &str,
        spec: WaitSpec,
    ) -> Result<()> {
        let condition = Condition::AttributeEquals {
            locator: locator.clone(),
            name: name.to_string(),
            expected: expected.to_string(),
        };
        self.wait(&condition, spec).await
    }

    pub async fn wait_property_equals(
        &self,
        locator: &Locator,
        name: &str,
        expected: &str,
        spec: WaitSpec,
    ) -> Result<()> {
        let condition = Condition::PropertyEquals {
            locator: locator.clone(),
            name: name.to_string(),
            expected: expected.to_string(),
        };
        self.wait(&condition, spec).await
    }

    /// Wait for exactly `count` matches; returns them
    pub async fn wait_count_equals(
        &self,
        locator: &Locator,
        count: usize,
        spec: WaitSpec,
    ) -> Result<Vec<ElementHandle>> {
        let description = Condition::CountEquals(locator.clone(), count).to_string();
        self.poller
            .until(spec, &description, move || {
                self.probe_count(locator, move |c| c == count)
            })
            .await
    }

    /// Wait for at least `count` matches; returns them
    pub async fn wait_count_at_least(
        &self,
        locator: &Locator,
        count: usize,
        spec: WaitSpec,
    ) -> Result<Vec<ElementHandle>> {
        let description = Condition::CountAtLeast(locator.clone(), count).to_string();
        self.poller
            .until(spec, &description, move || {
                self.probe_count(locator, move |c| c >= count)
            })
            .await
    }

    pub async fn wait_page_load(&self, spec: WaitSpec) -> Result<()> {
        self.wait(&Condition::PageLoadComplete, spec).await
    }

    pub async fn wait_ajax_idle(&self, spec: WaitSpec) -> Result<()> {
        self.wait(&Condition::AjaxIdle, spec).await
    }

    /// Wait for the element to stop moving; returns its settled center
    pub async fn wait_stable(&self, locator: &Locator, spec: WaitSpec) -> Result<(f64, f64)> {
        let description = Condition::GeometricallyStable(locator.clone()).to_string();
        let tracker = Mutex::new(StabilityTracker::new());
        let tracker = &tracker;
        self.poller
            .until(spec, &description, move || self.probe_stable(locator, tracker))
            .await
    }

    /// One-shot look at whether the first match is ready but covered
    ///
    /// Returns the element and a description of what covers it when it is
    /// visible and enabled yet obscured. Any other state yields `None`.
    pub async fn obscured_target(
        &self,
        locator: &Locator,
    ) -> Result<Option<(ElementHandle, String)>> {
        let Some(element) = self.driver.find_elements(locator).await?.into_iter().next() else {
            return Ok(None);
        };
        let state = self.driver.element_state(&element).await?;
        match state.obscured_by {
            Some(by) if state.is_visible() && state.enabled => Ok(Some((element, by))),
            _ => Ok(None),
        }
    }

    // =========================================================================
    // Probes
    // =========================================================================

    async fn first_with_state(
        &self,
        locator: &Locator,
    ) -> Probe<(ElementHandle, ElementState)> {
        let elements = probe_try!(self.driver.find_elements(locator).await);
        let Some(element) = elements.into_iter().next() else {
            return Probe::pending(format!("no element matches {}", locator));
        };
        let state = probe_try!(self.driver.element_state(&element).await);
        Probe::Ready((element, state))
    }

    async fn probe_visible(&self, locator: &Locator) -> Probe<ElementHandle> {
        match self.first_with_state(locator).await {
            Probe::Ready((element, state)) if state.is_visible() => Probe::Ready(element),
            Probe::Ready((_, state)) => Probe::pending(describe_hidden(&state)),
            Probe::Pending(observed) => Probe::Pending(observed),
            Probe::Fatal(e) => Probe::Fatal(e),
        }
    }

    async fn probe_clickable(&self, locator: &Locator) -> Probe<ElementHandle> {
        match self.first_with_state(locator).await {
            Probe::Ready((element, state)) if state.is_clickable() => Probe::Ready(element),
            Probe::Ready((_, state)) if !state.is_visible() => {
                Probe::pending(describe_hidden(&state))
            }
            Probe::Ready((_, state)) if !state.enabled => Probe::pending("disabled"),
            Probe::Ready((_, state)) => Probe::pending(format!(
                "obscured by {}",
                state.obscured_by.unwrap_or_default()
            )),
            Probe::Pending(observed) => Probe::Pending(observed),
            Probe::Fatal(e) => Probe::Fatal(e),
        }
    }

    async fn probe_exists(&self, locator: &Locator) -> Probe<ElementHandle> {
        let elements = probe_try!(self.driver.find_elements(locator).await);
        match elements.into_iter().next() {
            Some(element) => Probe::Ready(element),
            None => Probe::pending(format!("no element matches {}", locator)),
        }
    }

    async fn probe_disappeared(&self, locator: &Locator) -> Probe<()> {
        let elements = probe_try!(self.driver.find_elements(locator).await);
        let Some(element) = elements.into_iter().next() else {
            return Probe::Ready(());
        };
        match self.driver.element_state(&element).await {
            Ok(state) if !state.is_visible() => Probe::Ready(()),
            Ok(_) => Probe::pending("still rendered"),
            // Detached between lookup and inspection: it is on its way out
            // but the next lookup has the final word.
            Err(e) => Probe::from_error(e),
        }
    }

    async fn probe_url_contains(&self, fragment: &str) -> Probe<String> {
        let url = probe_try!(self.driver.current_url().await);
        if url.contains(fragment) {
            Probe::Ready(url)
        } else {
            Probe::pending(format!("url is {}", url))
        }
    }

    async fn probe_text_changed(&self, locator: &Locator, previous: &str) -> Probe<String> {
        let element = match self.probe_exists(locator).await {
            Probe::Ready(element) => element,
            Probe::Pending(observed) => return Probe::Pending(observed),
            Probe::Fatal(e) => return Probe::Fatal(e),
        };
        let text = probe_try!(self.driver.text(&element).await);
        if text != previous {
            Probe::Ready(text)
        } else {
            Probe::pending(format!("text still '{}'", text))
        }
    }

    async fn probe_attribute(&self, locator: &Locator, name: &str, expected: &str) -> Probe<()> {
        let element = match self.probe_exists(locator).await {
            Probe::Ready(element) => element,
            Probe::Pending(observed) => return Probe::Pending(observed),
            Probe::Fatal(e) => return Probe::Fatal(e),
        };
        let actual = probe_try!(self.driver.attribute(&element, name).await);
        compare(&format!("attribute {}", name), actual, expected)
    }

    async fn probe_property(&self, locator: &Locator, name: &str, expected: &str) -> Probe<()> {
        let element = match self.probe_exists(locator).await {
            Probe::Ready(element) => element,
            Probe::Pending(observed) => return Probe::Pending(observed),
            Probe::Fatal(e) => return Probe::Fatal(e),
        };
        let actual = probe_try!(self.driver.property(&element, name).await);
        compare(&format!("property {}", name), actual, expected)
    }

    async fn probe_count(
        &self,
        locator: &Locator,
        accept: impl Fn(usize) -> bool,
    ) -> Probe<Vec<ElementHandle>> {
        let elements = probe_try!(self.driver.find_elements(locator).await);
        if accept(elements.len()) {
            Probe::Ready(elements)
        } else {
            Probe::pending(format!("{} element(s) match {}", elements.len(), locator))
        }
    }

    async fn probe_page_load(&self) -> Probe<()> {
        match self.driver.ready_state().await {
            Ok(state) if state == "complete" => Probe::Ready(()),
            Ok(state) => Probe::pending(format!("readyState is '{}'", state)),
            // The document may be mid-navigation; its replacement will answer.
            Err(e) if e.is_context_lost() => Probe::pending(e.to_string()),
            Err(e) => Probe::from_error(e),
        }
    }

    async fn probe_ajax_idle(&self) -> Probe<()> {
        match self.driver.pending_requests().await {
            Ok(None) | Ok(Some(0)) => Probe::Ready(()),
            Ok(Some(n)) => Probe::pending(format!("{} request(s) pending", n)),
            Err(e) if e.is_transient() => Probe::from_error(e),
            Err(e) => {
                tracing::debug!(error = %e, "request tracking unavailable, assuming idle");
                Probe::Ready(())
            }
        }
    }

    /// One sample per probe, spaced at least [`STABILITY_SAMPLE_DELAY`] from
    /// the previous one
    async fn probe_stable(
        &self,
        locator: &Locator,
        tracker: &Mutex<StabilityTracker>,
    ) -> Probe<(f64, f64)> {
        let spacing = lock(tracker).time_until_next(STABILITY_SAMPLE_DELAY);
        if !spacing.is_zero() {
            tokio::time::sleep(spacing).await;
        }
        let position = match self.first_with_state(locator).await {
            Probe::Ready((_, state)) if state.is_visible() => state.rect.center(),
            Probe::Ready((_, state)) => {
                lock(tracker).reset();
                return Probe::pending(describe_hidden(&state));
            }
            other => {
                lock(tracker).reset();
                return other.map(|_| (0.0, 0.0));
            }
        };

        let mut tracker = lock(tracker);
        let first = !tracker.has_sample();
        if tracker.observe(StabilitySample::now(position)) {
            Probe::Ready(position)
        } else if first {
            Probe::pending(format!("first sample at ({}, {})", position.0, position.1))
        } else {
            Probe::pending("element still moving")
        }
    }
}

fn lock(tracker: &Mutex<StabilityTracker>) -> std::sync::MutexGuard<'_, StabilityTracker> {
    tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn compare(what: &str, actual: Option<String>, expected: &str) -> Probe<()> {
    match actual {
        Some(value) if value == expected => Probe::Ready(()),
        Some(value) => Probe::pending(format!("{} is '{}'", what, value)),
        None => Probe::pending(format!("{} is absent", what)),
    }
}

fn describe_hidden(state: &ElementState) -> String {
    if !state.displayed {
        "present but not displayed".to_string()
    } else {
        format!(
            "present but rendered {}x{}",
            state.rect.width, state.rect.height
        )
    }
}
