//! DOM operations on the live session.
//!
//! All reads and clicks run as injected JavaScript and come back as JSON.
//! Element handles never cross the CDP boundary, so a recycled browser
//! invalidates nothing but the page the caller was on.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chromiumoxide::Page;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::locator::Locator;
use crate::LiveSession;

/// Handle to the primary browsing context.
pub struct SessionHandle {
    live: Arc<Mutex<Option<LiveSession>>>,
    tabs: Arc<AtomicUsize>,
    nav_timeout: Duration,
    poll_interval: Duration,
}

impl SessionHandle {
    pub(crate) fn new(
        live: Arc<Mutex<Option<LiveSession>>>,
        tabs: Arc<AtomicUsize>,
        nav_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            live,
            tabs,
            nav_timeout,
            poll_interval,
        }
    }

    async fn page(&self) -> Result<Page> {
        let guard = self.live.lock().await;
        guard
            .as_ref()
            .map(|l| l.page.clone())
            .ok_or(SessionError::NotLive)
    }

    async fn eval(&self, script: String, what: &str) -> Result<Value> {
        let page = self.page().await?;
        eval_on(&page, script, what, self.nav_timeout).await
    }

    /// Navigate the primary context.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        let page = self.page().await?;
        match tokio::time::timeout(self.nav_timeout, page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(SessionError::Timeout {
                what: format!("navigation to {url}"),
                waited: self.nav_timeout,
            }),
        }
    }

    pub async fn current_url(&self) -> Result<Option<String>> {
        let page = self.page().await?;
        Ok(page.url().await?)
    }

    /// Number of elements currently matching `loc`.
    pub async fn count(&self, loc: &Locator) -> Result<usize> {
        let script = format!("{}.length", loc.js_all("document"));
        let v = self.eval(script, loc.as_str()).await?;
        Ok(v.as_u64().unwrap_or(0) as usize)
    }

    /// Bounded poll until at least one element matches `loc`.
    /// `Ok(n)` with n = 0 means the wait timed out with nothing present —
    /// the caller decides whether that is empty content or a failure.
    pub async fn wait_for(&self, loc: &Locator, timeout: Duration) -> Result<usize> {
        let start = Instant::now();
        loop {
            let n = self.count(loc).await?;
            if n > 0 {
                return Ok(n);
            }
            if start.elapsed() >= timeout {
                debug!(locator = %loc, ?timeout, "wait_for elapsed with no match");
                return Ok(0);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Inner text of the `index`-th element matching `item`.
    pub async fn item_text(&self, item: &Locator, index: usize) -> Result<Option<String>> {
        let script = format!(
            "(() => {{ const items = {items}; const it = items[{index}]; \
             return it ? it.innerText : null; }})()",
            items = item.js_all("document"),
        );
        let v = self.eval(script, item.as_str()).await?;
        Ok(v.as_str().map(String::from))
    }

    /// Scroll the `index`-th element matching `item` into view and click it.
    pub async fn click_item(&self, item: &Locator, index: usize) -> Result<bool> {
        let scroll = format!(
            "(() => {{ const items = {items}; const it = items[{index}]; \
             if (!it) return false; it.scrollIntoView({{block: 'center'}}); return true; }})()",
            items = item.js_all("document"),
        );
        if !self
            .eval(scroll, item.as_str())
            .await?
            .as_bool()
            .unwrap_or(false)
        {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        let click = format!(
            "(() => {{ const items = {items}; const it = items[{index}]; \
             if (!it) return false; it.click(); return true; }})()",
            items = item.js_all("document"),
        );
        Ok(self
            .eval(click, item.as_str())
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    /// Inner text of the first element matching `field` inside the
    /// `index`-th element matching `item`.
    pub async fn text_at(
        &self,
        item: &Locator,
        index: usize,
        field: &Locator,
    ) -> Result<Option<String>> {
        let script = format!(
            "(() => {{ const items = {items}; const it = items[{index}]; \
             if (!it) return null; const el = {field}; \
             return el ? el.innerText : null; }})()",
            items = item.js_all("document"),
            field = field.js_first("it"),
        );
        let v = self.eval(script, field.as_str()).await?;
        Ok(v.as_str().map(String::from))
    }

    /// Attribute of the first element matching `field` inside the
    /// `index`-th element matching `item`.
    pub async fn attr_at(
        &self,
        item: &Locator,
        index: usize,
        field: &Locator,
        attr: &str,
    ) -> Result<Option<String>> {
        let script = format!(
            "(() => {{ const items = {items}; const it = items[{index}]; \
             if (!it) return null; const el = {field}; \
             return el ? el.getAttribute({attr}) : null; }})()",
            items = item.js_all("document"),
            field = field.js_first("it"),
            attr = serde_json::to_string(attr).expect("attr name serializes"),
        );
        let v = self.eval(script, field.as_str()).await?;
        Ok(v.as_str().map(String::from))
    }

    /// Inner text of the first element matching `loc` in the primary context.
    pub async fn text_of(&self, loc: &Locator) -> Result<Option<String>> {
        let script = format!(
            "(() => {{ const el = {}; return el ? el.innerText : null; }})()",
            loc.js_first("document")
        );
        let v = self.eval(script, loc.as_str()).await?;
        Ok(v.as_str().map(String::from))
    }

    /// Attribute of the first element matching `loc` in the primary context.
    pub async fn attr_of(&self, loc: &Locator, attr: &str) -> Result<Option<String>> {
        let script = format!(
            "(() => {{ const el = {}; return el ? el.getAttribute({}) : null; }})()",
            loc.js_first("document"),
            serde_json::to_string(attr).expect("attr name serializes"),
        );
        let v = self.eval(script, loc.as_str()).await?;
        Ok(v.as_str().map(String::from))
    }

    /// Scroll the first match into view, settle, then click it via JS.
    /// `Ok(false)` when no element matches.
    pub async fn click(&self, loc: &Locator) -> Result<bool> {
        let scroll = format!(
            "(() => {{ const el = {}; if (!el) return false; \
             el.scrollIntoView({{block: 'center'}}); return true; }})()",
            loc.js_first("document")
        );
        if !self
            .eval(scroll, loc.as_str())
            .await?
            .as_bool()
            .unwrap_or(false)
        {
            return Ok(false);
        }
        // Let the scroll animation land before the click.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let click = format!(
            "(() => {{ const el = {}; if (!el) return false; el.click(); return true; }})()",
            loc.js_first("document")
        );
        Ok(self
            .eval(click, loc.as_str())
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    /// Type into the first match by setting its value and firing input events.
    pub async fn type_into(&self, loc: &Locator, text: &str) -> Result<bool> {
        let script = format!(
            "(() => {{ const el = {el}; if (!el) return false; el.focus(); \
             el.value = {text}; \
             el.dispatchEvent(new Event('input', {{bubbles: true}})); \
             el.dispatchEvent(new Event('change', {{bubbles: true}})); \
             return true; }})()",
            el = loc.js_first("document"),
            text = serde_json::to_string(text).expect("text serializes"),
        );
        Ok(self
            .eval(script, loc.as_str())
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    /// Open a detail tab on `url`. The caller must `close()` the returned tab.
    pub async fn open_detail(&self, url: &str) -> Result<DetailTab> {
        let page = {
            let mut guard = self.live.lock().await;
            let live = guard.as_mut().ok_or(SessionError::NotLive)?;
            live.browser.new_page("about:blank").await?
        };

        match tokio::time::timeout(self.nav_timeout, page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                let _ = page.close().await;
                return Err(e.into());
            }
            Err(_) => {
                let _ = page.close().await;
                return Err(SessionError::Timeout {
                    what: format!("detail navigation to {url}"),
                    waited: self.nav_timeout,
                });
            }
        }

        self.tabs.fetch_add(1, Ordering::SeqCst);
        Ok(DetailTab {
            page,
            tabs: Arc::clone(&self.tabs),
            nav_timeout: self.nav_timeout,
            poll_interval: self.poll_interval,
        })
    }

    /// Wait for a tab the site itself opened (e.g. a search result popup),
    /// capture its URL, and close it. `Ok(None)` when none shows up in time.
    pub async fn capture_popup(&self, pattern: &str, timeout: Duration) -> Result<Option<String>> {
        let start = Instant::now();
        loop {
            let pages = {
                let guard = self.live.lock().await;
                let live = guard.as_ref().ok_or(SessionError::NotLive)?;
                live.browser.pages().await?
            };
            for p in pages {
                if let Ok(Some(url)) = p.url().await {
                    if url.contains(pattern) {
                        if let Err(e) = p.close().await {
                            warn!("Popup close failed (ignored): {e}");
                        }
                        return Ok(Some(url));
                    }
                }
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Open sub-contexts owned by this session right now.
    pub fn open_tabs(&self) -> usize {
        self.tabs.load(Ordering::SeqCst)
    }
}

/// A short-lived secondary context scoped to one detail page.
pub struct DetailTab {
    page: Page,
    tabs: Arc<AtomicUsize>,
    nav_timeout: Duration,
    poll_interval: Duration,
}

impl DetailTab {
    /// Bounded poll until `loc` matches. `Ok(false)` on timeout.
    pub async fn wait_for(&self, loc: &Locator, timeout: Duration) -> Result<bool> {
        let start = Instant::now();
        loop {
            let script = format!(
                "(() => {{ const el = {}; return el !== null; }})()",
                loc.js_first("document")
            );
            let present = eval_on(&self.page, script, loc.as_str(), self.nav_timeout)
                .await?
                .as_bool()
                .unwrap_or(false);
            if present {
                return Ok(true);
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Bounded lookup of one field's text. `Ok(None)` when the element never
    /// appears — the caller substitutes its fallback.
    pub async fn read_text(&self, loc: &Locator, timeout: Duration) -> Result<Option<String>> {
        let start = Instant::now();
        loop {
            let script = format!(
                "(() => {{ const el = {}; return el ? el.innerText : null; }})()",
                loc.js_first("document")
            );
            let v = eval_on(&self.page, script, loc.as_str(), self.nav_timeout).await?;
            if let Some(text) = v.as_str() {
                return Ok(Some(text.to_string()));
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn current_url(&self) -> Result<Option<String>> {
        Ok(self.page.url().await?)
    }

    /// Close the tab. Best-effort — a tab that refuses to close dies with
    /// the next recycle anyway.
    pub async fn close(self) {
        if let Err(e) = self.page.close().await {
            warn!("Detail tab close failed (ignored): {e}");
        }
        self.tabs.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn eval_on(page: &Page, script: String, what: &str, timeout: Duration) -> Result<Value> {
    match tokio::time::timeout(timeout, page.evaluate(script)).await {
        Ok(Ok(res)) => Ok(res.into_value::<Value>().unwrap_or(Value::Null)),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(SessionError::Timeout {
            what: format!("script evaluation ({what})"),
            waited: timeout,
        }),
    }
}
