// Trait abstractions for pipeline dependencies.
//
// BrowserSession / DetailContext — everything the traversal engine asks of
//   the remote-controlled browser, with forwarding impls for chromium-client.
// SessionProvider — acquire/recycle/release of the single live session.
// RecordStore — graph-side dedup lookups and batch commits.
//
// These enable deterministic testing with ScriptedSession and MemoryStore:
// no browser, no database. `cargo test` in seconds.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use chromium_client::{DetailTab, Locator, SessionError, SessionHandle, SessionManager};
use tripatlas_common::{CityRecord, ItemLabel, ItemRecord, ProvinceRecord, TransitRow};
use tripatlas_graph::GraphWriter;

// ---------------------------------------------------------------------------
// BrowserSession — the primary browsing context
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), SessionError>;

    /// Bounded poll for `loc`. `Ok(0)` means the wait elapsed with nothing
    /// present; the caller decides whether that is empty content or failure.
    async fn wait_for(&self, loc: &Locator, timeout: Duration) -> Result<usize, SessionError>;

    async fn count(&self, loc: &Locator) -> Result<usize, SessionError>;

    /// Inner text of the `index`-th element matching `item`.
    async fn item_text(&self, item: &Locator, index: usize) -> Result<Option<String>, SessionError>;

    /// Inner text of `field` scoped to the `index`-th element matching `item`.
    async fn text_at(
        &self,
        item: &Locator,
        index: usize,
        field: &Locator,
    ) -> Result<Option<String>, SessionError>;

    /// Attribute of `field` scoped to the `index`-th element matching `item`.
    async fn attr_at(
        &self,
        item: &Locator,
        index: usize,
        field: &Locator,
        attr: &str,
    ) -> Result<Option<String>, SessionError>;

    /// Attribute of the first element matching `loc`.
    async fn attr_of(&self, loc: &Locator, attr: &str) -> Result<Option<String>, SessionError>;

    /// Scroll the first match into view and click it. `Ok(false)` = no match.
    async fn click(&self, loc: &Locator) -> Result<bool, SessionError>;

    /// Click the `index`-th element matching `item`.
    async fn click_item(&self, item: &Locator, index: usize) -> Result<bool, SessionError>;

    /// Fill a text input and fire its input/change events.
    async fn type_into(&self, loc: &Locator, text: &str) -> Result<bool, SessionError>;

    /// Open a sub-context on `url`. The caller must close it.
    async fn open_context(&self, url: &str) -> Result<Box<dyn DetailContext>, SessionError>;

    /// Capture and close a site-opened popup whose URL contains `pattern`.
    async fn capture_popup(
        &self,
        pattern: &str,
        timeout: Duration,
    ) -> Result<Option<String>, SessionError>;

    async fn current_url(&self) -> Result<Option<String>, SessionError>;

    /// Sub-contexts currently open on this session.
    fn open_contexts(&self) -> usize;
}

#[async_trait]
pub trait DetailContext: Send + Sync {
    async fn wait_for(&self, loc: &Locator, timeout: Duration) -> Result<bool, SessionError>;

    /// Bounded lookup of one field's text; `Ok(None)` when it never appears.
    async fn read_text(
        &self,
        loc: &Locator,
        timeout: Duration,
    ) -> Result<Option<String>, SessionError>;

    /// Close the sub-context. Best-effort by design.
    async fn close(self: Box<Self>);
}

// ---------------------------------------------------------------------------
// SessionProvider — session lifecycle
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn acquire(&self) -> Result<Arc<dyn BrowserSession>, SessionError>;

    /// Tear down and recreate the live session. Failures are logged and
    /// swallowed; the retry loop finds out soon enough either way.
    async fn recycle(&self);

    async fn release(&self);
}

// ---------------------------------------------------------------------------
// RecordStore — graph-side operations the pipeline needs
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Point existence lookup by composite key.
    async fn item_exists(&self, label: ItemLabel, uid: &str) -> Result<bool>;

    /// Commit a batch atomically. All-or-nothing.
    async fn commit_items(&self, items: &[ItemRecord]) -> Result<()>;

    /// Commit a transit batch atomically (merge semantics).
    async fn commit_transit(&self, rows: &[TransitRow]) -> Result<()>;

    async fn upsert_province(&self, p: &ProvinceRecord) -> Result<()>;

    async fn upsert_city(&self, c: &CityRecord, province: Option<&str>) -> Result<()>;

    async fn get_city(&self, name: &str) -> Result<Option<CityRecord>>;

    async fn list_cities(&self) -> Result<Vec<CityRecord>>;
}

// ---------------------------------------------------------------------------
// Forwarding impls for the concrete session types
// ---------------------------------------------------------------------------

#[async_trait]
impl BrowserSession for SessionHandle {
    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        SessionHandle::navigate(self, url).await
    }

    async fn wait_for(&self, loc: &Locator, timeout: Duration) -> Result<usize, SessionError> {
        SessionHandle::wait_for(self, loc, timeout).await
    }

    async fn count(&self, loc: &Locator) -> Result<usize, SessionError> {
        SessionHandle::count(self, loc).await
    }

    async fn item_text(
        &self,
        item: &Locator,
        index: usize,
    ) -> Result<Option<String>, SessionError> {
        SessionHandle::item_text(self, item, index).await
    }

    async fn text_at(
        &self,
        item: &Locator,
        index: usize,
        field: &Locator,
    ) -> Result<Option<String>, SessionError> {
        SessionHandle::text_at(self, item, index, field).await
    }

    async fn attr_at(
        &self,
        item: &Locator,
        index: usize,
        field: &Locator,
        attr: &str,
    ) -> Result<Option<String>, SessionError> {
        SessionHandle::attr_at(self, item, index, field, attr).await
    }

    async fn attr_of(&self, loc: &Locator, attr: &str) -> Result<Option<String>, SessionError> {
        SessionHandle::attr_of(self, loc, attr).await
    }

    async fn click(&self, loc: &Locator) -> Result<bool, SessionError> {
        SessionHandle::click(self, loc).await
    }

    async fn click_item(&self, item: &Locator, index: usize) -> Result<bool, SessionError> {
        SessionHandle::click_item(self, item, index).await
    }

    async fn type_into(&self, loc: &Locator, text: &str) -> Result<bool, SessionError> {
        SessionHandle::type_into(self, loc, text).await
    }

    async fn open_context(&self, url: &str) -> Result<Box<dyn DetailContext>, SessionError> {
        let tab = SessionHandle::open_detail(self, url).await?;
        Ok(Box::new(tab))
    }

    async fn capture_popup(
        &self,
        pattern: &str,
        timeout: Duration,
    ) -> Result<Option<String>, SessionError> {
        SessionHandle::capture_popup(self, pattern, timeout).await
    }

    async fn current_url(&self) -> Result<Option<String>, SessionError> {
        SessionHandle::current_url(self).await
    }

    fn open_contexts(&self) -> usize {
        SessionHandle::open_tabs(self)
    }
}

#[async_trait]
impl DetailContext for DetailTab {
    async fn wait_for(&self, loc: &Locator, timeout: Duration) -> Result<bool, SessionError> {
        DetailTab::wait_for(self, loc, timeout).await
    }

    async fn read_text(
        &self,
        loc: &Locator,
        timeout: Duration,
    ) -> Result<Option<String>, SessionError> {
        DetailTab::read_text(self, loc, timeout).await
    }

    async fn close(self: Box<Self>) {
        DetailTab::close(*self).await
    }
}

#[async_trait]
impl SessionProvider for SessionManager {
    async fn acquire(&self) -> Result<Arc<dyn BrowserSession>, SessionError> {
        let handle = SessionManager::acquire(self).await?;
        Ok(Arc::new(handle))
    }

    async fn recycle(&self) {
        if let Err(e) = SessionManager::recycle(self).await {
            tracing::warn!("Session recycle failed (continuing): {e}");
        }
    }

    async fn release(&self) {
        SessionManager::release(self).await;
    }
}

// ---------------------------------------------------------------------------
// RecordStore impl for the Neo4j writer
// ---------------------------------------------------------------------------

#[async_trait]
impl RecordStore for GraphWriter {
    async fn item_exists(&self, label: ItemLabel, uid: &str) -> Result<bool> {
        Ok(GraphWriter::item_exists(self, label, uid).await?)
    }

    async fn commit_items(&self, items: &[ItemRecord]) -> Result<()> {
        Ok(GraphWriter::commit_items(self, items).await?)
    }

    async fn commit_transit(&self, rows: &[TransitRow]) -> Result<()> {
        Ok(GraphWriter::commit_transit(self, rows).await?)
    }

    async fn upsert_province(&self, p: &ProvinceRecord) -> Result<()> {
        Ok(GraphWriter::upsert_province(self, p).await?)
    }

    async fn upsert_city(&self, c: &CityRecord, province: Option<&str>) -> Result<()> {
        Ok(GraphWriter::upsert_city(self, c, province).await?)
    }

    async fn get_city(&self, name: &str) -> Result<Option<CityRecord>> {
        Ok(GraphWriter::get_city(self, name).await?)
    }

    async fn list_cities(&self) -> Result<Vec<CityRecord>> {
        Ok(GraphWriter::list_cities(self).await?)
    }
}
