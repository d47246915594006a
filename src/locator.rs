//! Element locators
//!
//! A [`Locator`] describes how to find an element or a collection of
//! elements. It is never resolved eagerly: every use re-queries the live
//! document, so a node replaced by a re-render is picked up again instead of
//! going stale.

use std::fmt;

use crate::error::{Error, Result};

/// Strategy used to interpret a locator value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Element `id` attribute
    Id,
    /// CSS selector
    Css,
    /// XPath expression
    XPath,
    /// Exact (trimmed) text of an anchor
    LinkText,
}

impl Strategy {
    fn label(self) -> &'static str {
        match self {
            Strategy::Id => "id",
            Strategy::Css => "css",
            Strategy::XPath => "xpath",
            Strategy::LinkText => "link",
        }
    }
}

/// Immutable description of how to find an element or collection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    strategy: Strategy,
    value: String,
}

impl Locator {
    /// Create a locator from a strategy and value
    pub fn new(strategy: Strategy, value: impl Into<String>) -> Self {
        Self {
            strategy,
            value: value.into(),
        }
    }

    /// Locate by element id
    pub fn id(value: impl Into<String>) -> Self {
        Self::new(Strategy::Id, value)
    }

    /// Locate by CSS selector
    pub fn css(value: impl Into<String>) -> Self {
        Self::new(Strategy::Css, value)
    }

    /// Locate by XPath expression
    pub fn xpath(value: impl Into<String>) -> Self {
        Self::new(Strategy::XPath, value)
    }

    /// Locate anchors by their visible text
    pub fn link_text(value: impl Into<String>) -> Self {
        Self::new(Strategy::LinkText, value)
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// JavaScript expression evaluating to an `Array` of the matching elements
    ///
    /// Used by script-driven backends. Values are embedded as JSON string
    /// literals so quotes and backslashes in selectors survive intact.
    pub fn resolver_js(&self) -> Result<String> {
        if self.value.trim().is_empty() {
            return Err(Error::InvalidLocator(format!(
                "{} locator with empty value",
                self.strategy.label()
            )));
        }
        let literal = serde_json::to_string(&self.value)?;

        let js = match self.strategy {
            Strategy::Id => format!(
                "(() => {{ const el = document.getElementById({literal}); return el ? [el] : []; }})()"
            ),
            Strategy::Css => format!("Array.from(document.querySelectorAll({literal}))"),
            Strategy::XPath => format!(
                r#"(() => {{
                    const snap = document.evaluate({literal}, document, null,
                        XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
                    const out = [];
                    for (let i = 0; i < snap.snapshotLength; i++) out.push(snap.snapshotItem(i));
                    return out;
                }})()"#
            ),
            Strategy::LinkText => format!(
                "Array.from(document.querySelectorAll('a')).filter(a => (a.innerText || a.textContent || '').trim() === {literal}.trim())"
            ),
        };
        Ok(js)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.strategy.label(), self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_by_value() {
        assert_eq!(Locator::css(".cart-item"), Locator::css(".cart-item"));
        assert_ne!(Locator::css("cart"), Locator::id("cart"));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Locator::id("quantity_wanted").to_string(),
            "id=quantity_wanted"
        );
        assert_eq!(Locator::link_text("Clothes").to_string(), "link=Clothes");
    }

    #[test]
    fn test_resolver_escapes_quotes() {
        let js = Locator::css(r#"li[aria-current="page"]"#)
            .resolver_js()
            .unwrap();
        assert!(js.contains(r#"querySelectorAll("li[aria-current=\"page\"]")"#));
    }

    #[test]
    fn test_resolver_per_strategy() {
        assert!(Locator::id("x")
            .resolver_js()
            .unwrap()
            .contains("getElementById(\"x\")"));
        assert!(Locator::xpath("//a")
            .resolver_js()
            .unwrap()
            .contains("ORDERED_NODE_SNAPSHOT_TYPE"));
        assert!(Locator::link_text("Home")
            .resolver_js()
            .unwrap()
            .contains("querySelectorAll('a')"));
    }

    #[test]
    fn test_empty_value_rejected() {
        let err = Locator::css("  ").resolver_js().unwrap_err();
        assert!(matches!(err, Error::InvalidLocator(_)));
    }
}
