//! Paginated-listing traversal.
//!
//! One explicit state machine walks a listing: wait for the container, read
//! the visible item cards, advance through the next-page control until it
//! disappears, disables, or the module's page ceiling is hit. A container
//! that never renders is an empty seed, not a failure.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, warn};

use chromium_client::SessionError;
use tripatlas_common::text::{clean_field, clean_text};
use tripatlas_common::PipelinePolicy;

use crate::retry::jitter;
use crate::sources::ModuleSpec;
use crate::traits::BrowserSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalState {
    LoadingList,
    HasItems,
    Paginating,
    EndOfList,
}

/// Listing-level view of one item: name, detail link, summary fields.
#[derive(Debug, Clone)]
pub struct SummaryRecord {
    pub name: String,
    pub url: Option<String>,
    pub fields: BTreeMap<String, String>,
}

/// What one `advance()` call produced.
pub enum PageOutcome {
    /// One page of summary records, in DOM order.
    Items(Vec<SummaryRecord>),
    /// The listing container never rendered; the seed has nothing to list.
    EmptySeed,
    /// Pagination is exhausted.
    End,
}

pub struct ListTraversal<'a> {
    session: &'a dyn BrowserSession,
    module: &'a ModuleSpec,
    policy: &'a PipelinePolicy,
    state: TraversalState,
    pages_extracted: u32,
}

impl<'a> ListTraversal<'a> {
    /// The session must already be on the listing's first page.
    pub fn new(
        session: &'a dyn BrowserSession,
        module: &'a ModuleSpec,
        policy: &'a PipelinePolicy,
    ) -> Self {
        Self {
            session,
            module,
            policy,
            state: TraversalState::LoadingList,
            pages_extracted: 0,
        }
    }

    pub fn pages_extracted(&self) -> u32 {
        self.pages_extracted
    }

    /// Drive the machine until it yields a page of items or terminates.
    pub async fn advance(&mut self) -> Result<PageOutcome, SessionError> {
        loop {
            match self.state {
                TraversalState::LoadingList => {
                    let timeout = Duration::from_secs(self.policy.listing_timeout_secs);
                    let n = self.session.wait_for(&self.module.listing.item, timeout).await?;
                    if n == 0 {
                        debug!(module = self.module.name, "No listing container, empty seed");
                        self.state = TraversalState::EndOfList;
                        return Ok(PageOutcome::EmptySeed);
                    }
                    self.state = TraversalState::HasItems;
                }
                TraversalState::HasItems => {
                    let records = self.extract_page().await?;
                    self.pages_extracted += 1;
                    self.state = TraversalState::Paginating;
                    return Ok(PageOutcome::Items(records));
                }
                TraversalState::Paginating => {
                    if let Some(ceiling) = self.module.pagination.page_ceiling {
                        if self.pages_extracted >= ceiling {
                            debug!(
                                module = self.module.name,
                                pages = self.pages_extracted,
                                "Page ceiling reached"
                            );
                            self.state = TraversalState::EndOfList;
                            continue;
                        }
                    }
                    match self.next_page().await {
                        Ok(true) => {
                            tokio::time::sleep(jitter(self.policy.page_delay_secs)).await;
                            self.state = TraversalState::HasItems;
                        }
                        Ok(false) => {
                            self.state = TraversalState::EndOfList;
                        }
                        Err(e) => {
                            // A flaky next-page control ends the listing; it
                            // never fails the seed.
                            warn!(module = self.module.name, "Pagination failed, stopping: {e}");
                            self.state = TraversalState::EndOfList;
                        }
                    }
                }
                TraversalState::EndOfList => return Ok(PageOutcome::End),
            }
        }
    }

    /// Read every visible item card. A card that errors is skipped; a field
    /// that is missing gets the module's default.
    async fn extract_page(&self) -> Result<Vec<SummaryRecord>, SessionError> {
        let item = &self.module.listing.item;
        let n = self.session.count(item).await?;
        let mut out = Vec::with_capacity(n);

        for i in 0..n {
            let name = match self.session.text_at(item, i, &self.module.listing.name).await {
                Ok(Some(t)) => clean_text(&t),
                Ok(None) => String::new(),
                Err(e) => {
                    warn!(module = self.module.name, index = i, "Item read failed, skipping: {e}");
                    continue;
                }
            };
            if name.is_empty() {
                // Unnamed cards are ad slots or render skeletons.
                continue;
            }

            let url = self
                .session
                .attr_at(item, i, &self.module.listing.name, "href")
                .await
                .unwrap_or(None)
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty());

            let mut fields = BTreeMap::new();
            for (key, loc, default) in self.module.listing.summary_fields {
                let value = self
                    .session
                    .text_at(item, i, loc)
                    .await
                    .unwrap_or(None)
                    .map(|t| clean_field(key, &t))
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| (*default).to_string());
                fields.insert((*key).to_string(), value);
            }

            out.push(SummaryRecord { name, url, fields });
        }

        Ok(out)
    }

    /// Advance pagination. `Ok(false)` = the control is absent or disabled,
    /// meaning the listing is exhausted.
    async fn next_page(&self) -> Result<bool, SessionError> {
        let next = &self.module.pagination.next;

        let class = match self.session.attr_of(next, "class").await? {
            Some(c) => c,
            None => return Ok(false),
        };
        if class.contains(self.module.pagination.disabled_class) {
            return Ok(false);
        }

        if !self.session.click(next).await? {
            return Ok(false);
        }

        let timeout = Duration::from_secs(self.policy.listing_timeout_secs);
        let n = self.session.wait_for(&self.module.listing.item, timeout).await?;
        Ok(n > 0)
    }
}
