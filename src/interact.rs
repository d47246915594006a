//! Resilient interactions
//!
//! [`Interactor`] is the only component that mutates the page. Every action
//! waits for the element to be ready first, and clicks recover from
//! transient overlays by re-dispatching through the element's own `click()`.

use std::time::Duration;

use crate::conditions::{Condition, Synchronizer};
use crate::driver::{Driver, ElementHandle};
use crate::error::{Error, Result};
use crate::locator::Locator;
use crate::wait::{probe_try, Probe, WaitSpec};

/// Time given to a smooth scroll before the next action
pub const SCROLL_SETTLE: Duration = Duration::from_millis(500);

/// How a click was delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionOutcome {
    /// Native pointer click went through
    Success,
    /// Native click was intercepted; the scripted click went through
    ScriptedFallback,
    /// Neither path worked (only produced by [`Interactor::try_click`])
    Failed(String),
}

impl InteractionOutcome {
    pub fn is_delivered(&self) -> bool {
        !matches!(self, InteractionOutcome::Failed(_))
    }
}

/// What the page did after a quantity was set
///
/// Sites answer "set quantity to zero" differently; callers branch on this
/// instead of assuming one behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityOutcome {
    /// The field settled on the requested non-zero value
    Applied(u32),
    /// The line item (or the field itself) left the page
    ItemRemoved,
    /// Zero was accepted and the item stayed
    QuantityZeroed,
    /// The site replaced zero with its minimum
    ClampedToMinimum(u32),
}

/// Performs page mutations with readiness waits and click fallback
#[derive(Clone)]
pub struct Interactor {
    sync: Synchronizer,
}

impl Interactor {
    pub fn new(sync: Synchronizer) -> Self {
        Self { sync }
    }

    fn driver(&self) -> &dyn Driver {
        self.sync.driver().as_ref()
    }

    /// Wait for clickable, then click natively or through the scripted fallback
    ///
    /// An overlay that outlives the clickable wait is handled the same way as
    /// one caught at click time. Errors other than interception propagate.
    pub async fn click(&self, locator: &Locator, spec: WaitSpec) -> Result<InteractionOutcome> {
        let label = locator.to_string();
        let element = match self.sync.wait_clickable(locator, spec).await {
            Ok(element) => element,
            Err(e) if e.is_timeout() => {
                return match self.sync.obscured_target(locator).await {
                    Ok(Some((element, by))) => {
                        let detail = format!("still covered by {} after {}", by, describe_wait(&e));
                        self.scripted_fallback(&label, &element, detail).await
                    }
                    _ => Err(e),
                };
            }
            Err(e) => return Err(e),
        };
        self.click_resolved(&label, &element).await
    }

    /// [`Interactor::click`] that reports failure as an outcome
    pub async fn try_click(&self, locator: &Locator, spec: WaitSpec) -> InteractionOutcome {
        match self.click(locator, spec).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(locator = %locator, error = %e, "click failed");
                InteractionOutcome::Failed(e.to_string())
            }
        }
    }

    /// Click an already-resolved element, e.g. one member of a collection
    pub async fn click_element(
        &self,
        element: &ElementHandle,
        label: &str,
    ) -> Result<InteractionOutcome> {
        self.click_resolved(label, element).await
    }

    async fn click_resolved(
        &self,
        label: &str,
        element: &ElementHandle,
    ) -> Result<InteractionOutcome> {
        match self.driver().click(element).await {
            Ok(()) => {
                tracing::trace!(element = label, "native click");
                Ok(InteractionOutcome::Success)
            }
            Err(e) if e.is_intercepted() => {
                self.scripted_fallback(label, element, e.to_string()).await
            }
            Err(e) => Err(e),
        }
    }

    async fn scripted_fallback(
        &self,
        label: &str,
        element: &ElementHandle,
        detail: String,
    ) -> Result<InteractionOutcome> {
        tracing::warn!(element = label, %detail, "native click intercepted, using scripted click");
        match self.driver().scripted_click(element).await {
            Ok(()) => Ok(InteractionOutcome::ScriptedFallback),
            Err(e) => Err(Error::intercepted(
                label,
                format!("{}; scripted fallback failed: {}", detail, e),
            )),
        }
    }

    /// Wait for visible, clear, then type
    ///
    /// The result is not verified; follow up with a property wait if needed.
    pub async fn type_text(&self, locator: &Locator, text: &str, spec: WaitSpec) -> Result<()> {
        let element = self.sync.wait_visible(locator, spec).await?;
        self.driver().clear(&element).await?;
        self.driver().send_keys(&element, text).await
    }

    /// Dispatch a click through the element's own `click()` without trying a native one
    pub async fn scripted_click(&self, locator: &Locator, spec: WaitSpec) -> Result<()> {
        let element = self.sync.wait_exists(locator, spec).await?;
        self.driver().scripted_click(&element).await
    }

    /// Smooth-scroll the element to the viewport center and let it settle
    pub async fn scroll_into_view(&self, locator: &Locator, spec: WaitSpec) -> Result<()> {
        let element = self.sync.wait_exists(locator, spec).await?;
        self.scroll_element_into_view(&element).await
    }

    pub(crate) async fn scroll_element_into_view(&self, element: &ElementHandle) -> Result<()> {
        self.driver().scroll_into_view(element).await?;
        tokio::time::sleep(SCROLL_SETTLE).await;
        Ok(())
    }

    /// Write the value directly and fire `input` and `change`
    pub async fn set_value(&self, locator: &Locator, value: &str, spec: WaitSpec) -> Result<()> {
        let element = self.sync.wait_exists(locator, spec).await?;
        self.driver().set_value_and_notify(&element, value).await
    }

    /// Pick a dropdown option by its visible text
    pub async fn select_by_text(
        &self,
        locator: &Locator,
        text: &str,
        spec: WaitSpec,
    ) -> Result<()> {
        let element = self.sync.wait_visible(locator, spec).await?;
        self.driver().select_by_text(&element, text).await
    }

    /// Set a numeric field and report how the page reacted
    ///
    /// `rows` is the collection the field's line item belongs to; a drop in
    /// its count means the item was removed. Non-zero values must be applied
    /// verbatim within `spec` or a timeout is returned.
    pub async fn set_quantity(
        &self,
        field: &Locator,
        rows: Option<&Locator>,
        value: u32,
        spec: WaitSpec,
    ) -> Result<QuantityOutcome> {
        let rows_before = match rows {
            Some(rows) => Some(self.driver().find_elements(rows).await?.len()),
            None => None,
        };

        let wanted = value.to_string();
        self.set_value(field, &wanted, spec).await?;

        if value > 0 {
            self.sync
                .wait_property_equals(field, "value", &wanted, spec)
                .await?;
            tracing::debug!(field = %field, value, "quantity applied");
            return Ok(QuantityOutcome::Applied(value));
        }

        let description = format!("reaction of {} to quantity 0", field);
        let previous = std::sync::Mutex::new(None::<String>);
        let previous = &previous;
        let observed = self
            .sync
            .poller()
            .try_until(spec, &description, move || async move {
                self.probe_zero_reaction(field, rows, rows_before, previous)
                    .await
            })
            .await?;

        let outcome = match observed {
            Some(outcome) => outcome,
            None => match self.read_field(field).await? {
                Some(current) if current != "0" => {
                    QuantityOutcome::ClampedToMinimum(parse_quantity(&current))
                }
                Some(_) => QuantityOutcome::QuantityZeroed,
                None => QuantityOutcome::ItemRemoved,
            },
        };
        tracing::debug!(field = %field, ?outcome, "quantity set to zero");
        Ok(outcome)
    }

    async fn probe_zero_reaction(
        &self,
        field: &Locator,
        rows: Option<&Locator>,
        rows_before: Option<usize>,
        previous: &std::sync::Mutex<Option<String>>,
    ) -> Probe<QuantityOutcome> {
        if let (Some(rows), Some(before)) = (rows, rows_before) {
            let now = probe_try!(self.driver().find_elements(rows).await).len();
            if now < before {
                return Probe::Ready(QuantityOutcome::ItemRemoved);
            }
        }

        let current = match self.read_field(field).await {
            Ok(Some(current)) => current,
            Ok(None) => return Probe::Ready(QuantityOutcome::ItemRemoved),
            Err(e) => return Probe::from_error(e),
        };

        let mut previous = previous
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let settled = previous.as_deref() == Some(current.as_str());
        let observation = format!("value is '{}'", current);
        *previous = Some(current.clone());

        if current != "0" && settled {
            Probe::Ready(QuantityOutcome::ClampedToMinimum(parse_quantity(&current)))
        } else {
            Probe::pending(observation)
        }
    }

    /// Live `value` of the first match, `None` once no element matches
    async fn read_field(&self, field: &Locator) -> Result<Option<String>> {
        let Some(element) = self.driver().find_elements(field).await?.into_iter().next() else {
            return Ok(None);
        };
        match self.driver().property(&element, "value").await {
            Ok(value) => Ok(Some(value.unwrap_or_default())),
            Err(Error::StaleElement(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Press a stepper button once and wait for the field to move by `delta`
    ///
    /// Returns the new value.
    pub async fn step_quantity(
        &self,
        button: &Locator,
        field: &Locator,
        delta: i64,
        spec: WaitSpec,
    ) -> Result<i64> {
        self.sync.wait_visible(field, spec).await?;
        let current = self
            .read_field(field)
            .await?
            .ok_or_else(|| Error::ElementNotFound(field.to_string()))?;
        let current: i64 = current.trim().parse().map_err(|_| {
            Error::not_interactable(
                field.to_string(),
                format!("holding non-numeric value '{}'", current),
            )
        })?;
        let expected = current + delta;

        self.click(button, spec).await?;
        let condition = Condition::PropertyEquals {
            locator: field.clone(),
            name: "value".to_string(),
            expected: expected.to_string(),
        };
        self.sync.wait(&condition, spec).await?;
        Ok(expected)
    }
}

fn parse_quantity(value: &str) -> u32 {
    value.trim().parse().unwrap_or(0)
}

fn describe_wait(err: &Error) -> String {
    match err.elapsed() {
        Some(elapsed) => format!("{}ms", elapsed.as_millis()),
        None => "waiting".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_delivery() {
        assert!(InteractionOutcome::Success.is_delivered());
        assert!(InteractionOutcome::ScriptedFallback.is_delivered());
        assert!(!InteractionOutcome::Failed("timed out".into()).is_delivered());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(" 1 "), 1);
        assert_eq!(parse_quantity(""), 0);
        assert_eq!(parse_quantity("abc"), 0);
    }

    #[test]
    fn test_describe_wait() {
        let err = Error::timeout("clickable(id=add)", Duration::from_millis(1500), None);
        assert_eq!(describe_wait(&err), "1500ms");
        assert_eq!(describe_wait(&Error::ChromeNotFound), "waiting");
    }
}
