//! Element locators resolved inside the page via injected JavaScript.
//!
//! CSS covers almost everything; XPath remains for structures CSS cannot
//! express (title-keyed sibling blocks). Both dialects resolve through the
//! same JS snippets so callers never branch on the dialect.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator {
    Css(&'static str),
    XPath(&'static str),
}

impl Locator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Locator::Css(s) | Locator::XPath(s) => s,
        }
    }

    /// JS expression yielding the first matching element (or null) under
    /// `scope`, an expression evaluating to a context node.
    pub(crate) fn js_first(&self, scope: &str) -> String {
        let sel = js_str(self.as_str());
        match self {
            Locator::Css(_) => format!("{scope}.querySelector({sel})"),
            Locator::XPath(_) => format!(
                "document.evaluate({sel}, {scope}, null, \
                 XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue"
            ),
        }
    }

    /// JS expression yielding an array of all matching elements under `scope`.
    pub(crate) fn js_all(&self, scope: &str) -> String {
        let sel = js_str(self.as_str());
        match self {
            Locator::Css(_) => format!("Array.from({scope}.querySelectorAll({sel}))"),
            Locator::XPath(_) => format!(
                "(() => {{ const r = document.evaluate({sel}, {scope}, null, \
                 XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); \
                 const out = []; \
                 for (let i = 0; i < r.snapshotLength; i++) out.push(r.snapshotItem(i)); \
                 return out; }})()"
            ),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escape a selector into a JS string literal.
fn js_str(s: &str) -> String {
    serde_json::to_string(s).expect("selector serializes to a JSON string")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_first_uses_query_selector() {
        let js = Locator::Css(".rdetailbox").js_first("document");
        assert_eq!(js, "document.querySelector(\".rdetailbox\")");
    }

    #[test]
    fn xpath_quotes_are_escaped() {
        let js = Locator::XPath("//div[@class=\"moduleTitle\"]").js_first("document");
        assert!(js.contains("\\\"moduleTitle\\\""));
        assert!(js.starts_with("document.evaluate("));
    }
}
