//! Deterministic fakes for pipeline tests: a scripted browser session and an
//! in-memory record store. No browser, no database.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use chromium_client::{Locator, SessionError};
use tripatlas_common::{CityRecord, ItemLabel, ItemRecord, ProvinceRecord, TransitRow};

use crate::traits::{BrowserSession, DetailContext, RecordStore, SessionProvider};

// ---------------------------------------------------------------------------
// ScriptedSession
// ---------------------------------------------------------------------------

/// One item card on a scripted listing page. `fields` is keyed by locator
/// string — reads resolve against whatever selector the module asked with.
#[derive(Debug, Clone, Default)]
pub struct ScriptedItem {
    pub name: String,
    pub url: Option<String>,
    pub fields: HashMap<String, String>,
}

impl ScriptedItem {
    /// Build an item whose name/href resolve through `name_loc`, the way the
    /// traversal reads them.
    pub fn new(name_loc: &Locator, name: &str, url: &str) -> Self {
        let mut fields = HashMap::new();
        fields.insert(name_loc.as_str().to_string(), name.to_string());
        Self {
            name: name.to_string(),
            url: if url.is_empty() {
                None
            } else {
                Some(url.to_string())
            },
            fields,
        }
    }

    pub fn with_field(mut self, loc: &Locator, value: &str) -> Self {
        self.fields.insert(loc.as_str().to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedPage {
    pub items: Vec<ScriptedItem>,
    /// Class attribute of the next-page control; `None` = control absent.
    pub next_class: Option<String>,
}

/// A scripted browser session: a fixed sequence of listing pages plus detail
/// pages keyed by URL. Tracks context opens/closes for the cleanup property.
pub struct ScriptedSession {
    pages: Mutex<Vec<ScriptedPage>>,
    current: AtomicUsize,
    /// Detail page content: url → (locator string → text).
    pub details: Mutex<HashMap<String, HashMap<String, String>>>,
    contexts_open: Arc<AtomicUsize>,
    pub contexts_opened_total: AtomicUsize,
    pub fail_detail_reads: AtomicBool,
    pub fail_open_context: AtomicBool,
    /// Fail the next N navigations with a timeout.
    pub fail_navigations: AtomicU32,
    pub navigations: Mutex<Vec<String>>,
    pub typed: Mutex<Vec<(String, String)>>,
    pub popup_url: Mutex<Option<String>>,
}

impl ScriptedSession {
    pub fn new(pages: Vec<ScriptedPage>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages),
            current: AtomicUsize::new(0),
            details: Mutex::new(HashMap::new()),
            contexts_open: Arc::new(AtomicUsize::new(0)),
            contexts_opened_total: AtomicUsize::new(0),
            fail_detail_reads: AtomicBool::new(false),
            fail_open_context: AtomicBool::new(false),
            fail_navigations: AtomicU32::new(0),
            navigations: Mutex::new(Vec::new()),
            typed: Mutex::new(Vec::new()),
            popup_url: Mutex::new(None),
        })
    }

    pub fn set_detail(&self, url: &str, fields: &[(&Locator, &str)]) {
        let map = fields
            .iter()
            .map(|(loc, text)| (loc.as_str().to_string(), (*text).to_string()))
            .collect();
        self.details.lock().unwrap().insert(url.to_string(), map);
    }

    fn page(&self) -> ScriptedPage {
        let pages = self.pages.lock().unwrap();
        pages
            .get(self.current.load(Ordering::SeqCst))
            .cloned()
            .unwrap_or_default()
    }

    fn timeout(what: &str) -> SessionError {
        SessionError::Timeout {
            what: what.to_string(),
            waited: Duration::from_secs(0),
        }
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        let pending = self.fail_navigations.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_navigations.store(pending - 1, Ordering::SeqCst);
            return Err(Self::timeout(url));
        }
        self.navigations.lock().unwrap().push(url.to_string());
        self.current.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for(&self, _loc: &Locator, _timeout: Duration) -> Result<usize, SessionError> {
        Ok(self.page().items.len())
    }

    async fn count(&self, _loc: &Locator) -> Result<usize, SessionError> {
        Ok(self.page().items.len())
    }

    async fn item_text(
        &self,
        _item: &Locator,
        index: usize,
    ) -> Result<Option<String>, SessionError> {
        Ok(self.page().items.get(index).map(|i| i.name.clone()))
    }

    async fn text_at(
        &self,
        _item: &Locator,
        index: usize,
        field: &Locator,
    ) -> Result<Option<String>, SessionError> {
        Ok(self
            .page()
            .items
            .get(index)
            .and_then(|i| i.fields.get(field.as_str()).cloned()))
    }

    async fn attr_at(
        &self,
        _item: &Locator,
        index: usize,
        _field: &Locator,
        attr: &str,
    ) -> Result<Option<String>, SessionError> {
        if attr == "href" {
            Ok(self.page().items.get(index).and_then(|i| i.url.clone()))
        } else {
            Ok(None)
        }
    }

    async fn attr_of(&self, _loc: &Locator, attr: &str) -> Result<Option<String>, SessionError> {
        if attr == "class" {
            Ok(self.page().next_class)
        } else {
            Ok(None)
        }
    }

    async fn click(&self, _loc: &Locator) -> Result<bool, SessionError> {
        let pages = self.pages.lock().unwrap();
        let current = self.current.load(Ordering::SeqCst);
        if current + 1 < pages.len() {
            self.current.store(current + 1, Ordering::SeqCst);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn click_item(&self, _item: &Locator, index: usize) -> Result<bool, SessionError> {
        Ok(index < self.page().items.len())
    }

    async fn type_into(&self, loc: &Locator, text: &str) -> Result<bool, SessionError> {
        self.typed
            .lock()
            .unwrap()
            .push((loc.as_str().to_string(), text.to_string()));
        Ok(true)
    }

    async fn open_context(&self, url: &str) -> Result<Box<dyn DetailContext>, SessionError> {
        if self.fail_open_context.load(Ordering::SeqCst) {
            return Err(Self::timeout(url));
        }
        self.contexts_open.fetch_add(1, Ordering::SeqCst);
        self.contexts_opened_total.fetch_add(1, Ordering::SeqCst);
        let fields = self
            .details
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(ScriptedDetail {
            fields,
            open: Arc::clone(&self.contexts_open),
            fail_reads: self.fail_detail_reads.load(Ordering::SeqCst),
        }))
    }

    async fn capture_popup(
        &self,
        _pattern: &str,
        _timeout: Duration,
    ) -> Result<Option<String>, SessionError> {
        Ok(self.popup_url.lock().unwrap().take())
    }

    async fn current_url(&self) -> Result<Option<String>, SessionError> {
        Ok(self.navigations.lock().unwrap().last().cloned())
    }

    fn open_contexts(&self) -> usize {
        self.contexts_open.load(Ordering::SeqCst)
    }
}

pub struct ScriptedDetail {
    fields: HashMap<String, String>,
    open: Arc<AtomicUsize>,
    fail_reads: bool,
}

#[async_trait]
impl DetailContext for ScriptedDetail {
    async fn wait_for(&self, _loc: &Locator, _timeout: Duration) -> Result<bool, SessionError> {
        Ok(!self.fields.is_empty())
    }

    async fn read_text(
        &self,
        loc: &Locator,
        _timeout: Duration,
    ) -> Result<Option<String>, SessionError> {
        if self.fail_reads {
            return Err(SessionError::Cdp("scripted read failure".to_string()));
        }
        Ok(self.fields.get(loc.as_str()).cloned())
    }

    async fn close(self: Box<Self>) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Provider handing out one scripted session; counts recycles and releases.
pub struct ScriptedProvider {
    pub session: Arc<ScriptedSession>,
    pub recycles: AtomicUsize,
    pub releases: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(session: Arc<ScriptedSession>) -> Arc<Self> {
        Arc::new(Self {
            session,
            recycles: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SessionProvider for ScriptedProvider {
    async fn acquire(&self) -> Result<Arc<dyn BrowserSession>, SessionError> {
        let session: Arc<dyn BrowserSession> = self.session.clone();
        Ok(session)
    }

    async fn recycle(&self) {
        self.recycles.fetch_add(1, Ordering::SeqCst);
    }

    async fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory record store with a commit-failure switch. Commits are
/// all-or-nothing, like the real transaction.
#[derive(Default)]
pub struct MemoryStore {
    pub items: Mutex<BTreeMap<String, ItemRecord>>,
    /// (tag label, tag name) — merge-created vocabulary nodes.
    pub tags: Mutex<BTreeSet<(String, String)>>,
    /// (item uid, city name) LOCATED_IN edges.
    pub located_in: Mutex<Vec<(String, String)>>,
    pub cities: Mutex<BTreeMap<String, CityRecord>>,
    pub provinces: Mutex<BTreeMap<String, ProvinceRecord>>,
    /// (city, province) BELONGS_TO edges.
    pub city_belongs: Mutex<Vec<(String, String)>>,
    pub transit: Mutex<Vec<TransitRow>>,
    /// Fail the next N batch commits.
    pub fail_next_commits: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn item_count(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn relationship_count(&self) -> usize {
        self.located_in.lock().unwrap().len() + self.city_belongs.lock().unwrap().len()
    }

    pub fn add_city(&self, name: &str, url: &str) {
        self.cities.lock().unwrap().insert(
            name.to_string(),
            CityRecord {
                name: name.to_string(),
                url: url.to_string(),
            },
        );
    }

    fn take_failure(&self) -> bool {
        let pending = self.fail_next_commits.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next_commits.store(pending - 1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn item_exists(&self, _label: ItemLabel, uid: &str) -> Result<bool> {
        Ok(self.items.lock().unwrap().contains_key(uid))
    }

    async fn commit_items(&self, records: &[ItemRecord]) -> Result<()> {
        if self.take_failure() {
            bail!("simulated transaction failure");
        }
        let mut items = self.items.lock().unwrap();
        let mut located = self.located_in.lock().unwrap();
        let mut tags = self.tags.lock().unwrap();
        for record in records {
            items.insert(record.city_uid.clone(), record.clone());
            located.push((record.city_uid.clone(), record.city.clone()));
            if let Some(kind) = record.tag_kind {
                for tag in &record.tags {
                    tags.insert((kind.label().to_string(), tag.clone()));
                }
            }
        }
        Ok(())
    }

    async fn commit_transit(&self, rows: &[TransitRow]) -> Result<()> {
        if self.take_failure() {
            bail!("simulated transaction failure");
        }
        self.transit.lock().unwrap().extend(rows.iter().cloned());
        Ok(())
    }

    async fn upsert_province(&self, p: &ProvinceRecord) -> Result<()> {
        self.provinces
            .lock()
            .unwrap()
            .insert(p.name.clone(), p.clone());
        Ok(())
    }

    async fn upsert_city(&self, c: &CityRecord, province: Option<&str>) -> Result<()> {
        self.cities.lock().unwrap().insert(c.name.clone(), c.clone());
        if let Some(p) = province {
            let mut belongs = self.city_belongs.lock().unwrap();
            let edge = (c.name.clone(), p.to_string());
            if !belongs.contains(&edge) {
                belongs.push(edge);
            }
        }
        Ok(())
    }

    async fn get_city(&self, name: &str) -> Result<Option<CityRecord>> {
        Ok(self.cities.lock().unwrap().get(name).cloned())
    }

    async fn list_cities(&self) -> Result<Vec<CityRecord>> {
        Ok(self.cities.lock().unwrap().values().cloned().collect())
    }
}
