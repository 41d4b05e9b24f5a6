//! The per-seed driver loop.
//!
//! Seeds run strictly in resumable-index order on a single browsing session.
//! Each seed gets bounded retries with a session recycle between attempts;
//! the session is also force-recycled every N seeds to bound accumulated
//! browser state. After every seed (success, empty, or exhausted) the batch
//! window flushes and the checkpoint is rewritten, so a crash costs at most
//! the seed in flight.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{error, info, warn};

use chromium_client::SessionError;
use tripatlas_common::text::clean_text;
use tripatlas_common::{
    composite_key, CityRecord, ItemRecord, Outcome, PipelinePolicy, ProvinceRecord, Seed,
};

use crate::checkpoint::CheckpointStore;
use crate::detail::extract_detail;
use crate::ingest::{BatchWriter, DeadLetterLog};
use crate::listing::{ListTraversal, PageOutcome, SummaryRecord};
use crate::retry::{jitter, with_retry, RetryPolicy};
use crate::sources::ModuleSpec;
use crate::stats::RunStats;
use crate::traits::{BrowserSession, RecordStore, SessionProvider};

/// Settle time after clicking a province's city-filter entry; the listing
/// swaps content behind an animation before it re-renders.
const PROVINCE_FILTER_SETTLE: Duration = Duration::from_secs(5);

pub struct Pipeline {
    provider: Arc<dyn SessionProvider>,
    store: Arc<dyn RecordStore>,
    data_dir: PathBuf,
    policy: PipelinePolicy,
    shutdown: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        store: Arc<dyn RecordStore>,
        data_dir: PathBuf,
        policy: PipelinePolicy,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            provider,
            store,
            data_dir,
            policy,
            shutdown,
        }
    }

    /// Run one extraction module over its seed list.
    pub async fn run(&self, module: &ModuleSpec, seeds: &[Seed]) -> Result<RunStats> {
        let checkpoints =
            CheckpointStore::new(self.data_dir.join(format!("{}_progress.json", module.name)));
        let mut checkpoint = checkpoints.load();
        if checkpoint.resume_index > 0 {
            info!(
                module = module.name,
                resume_index = checkpoint.resume_index,
                completed = checkpoint.completed.len(),
                "Resuming from checkpoint"
            );
        }

        let batch = BatchWriter::new(
            Arc::clone(&self.store),
            module.batch_size,
            Some(DeadLetterLog::new(self.data_dir.join("dead_letter.jsonl"))),
        );
        let mut stats = RunStats::default();

        let session = self
            .provider
            .acquire()
            .await
            .map_err(|e| anyhow!("acquiring browser session: {e}"))?;

        let retry = RetryPolicy::from_pipeline(&self.policy);
        let mut seeds_since_rotate = 0u32;

        for (idx, seed) in seeds.iter().enumerate() {
            if self.shutdown.load(Ordering::SeqCst) {
                info!(module = module.name, "Shutdown requested, stopping after flush");
                break;
            }
            if idx < checkpoint.resume_index || checkpoint.is_done(&seed.name) {
                stats.seeds_skipped += 1;
                continue;
            }

            if seeds_since_rotate >= self.policy.rotate_every_seeds {
                info!(module = module.name, "Rotating browser session");
                self.provider.recycle().await;
                seeds_since_rotate = 0;
            }
            seeds_since_rotate += 1;

            info!(module = module.name, seed = %seed.name, index = idx, "Processing seed");

            let provider = Arc::clone(&self.provider);
            let outcome = with_retry(
                &retry,
                &seed.name,
                || self.process_seed(session.as_ref(), module, seed, &batch),
                || {
                    let provider = Arc::clone(&provider);
                    async move { provider.recycle().await }
                },
            )
            .await;

            match outcome {
                Outcome::Ok(staged) => {
                    stats.seeds_processed += 1;
                    info!(seed = %seed.name, staged, "Seed complete");
                }
                Outcome::Empty => {
                    stats.seeds_processed += 1;
                    stats.seeds_empty += 1;
                    info!(seed = %seed.name, "Seed has no listed items");
                }
                Outcome::Retryable(e) => {
                    stats.seeds_failed += 1;
                    error!(seed = %seed.name, "Seed failed, skipping: {e:#}");
                }
                Outcome::Fatal(e) => {
                    batch.flush().await;
                    checkpoints.save(&checkpoint)?;
                    self.provider.release().await;
                    return Err(e.context(format!("fatal error on seed {}", seed.name)));
                }
            }

            // Progress is never lost to a crash mid-run: flush the window and
            // rewrite the checkpoint whatever the outcome was.
            batch.flush().await;
            checkpoint.complete(idx, &seed.name);
            checkpoints.save(&checkpoint)?;

            tokio::time::sleep(jitter(self.policy.seed_delay_secs)).await;
        }

        batch.flush().await;
        checkpoints.save(&checkpoint)?;
        self.provider.release().await;

        stats.items_staged = batch.committed() + batch.dead_lettered();
        stats.items_duplicate = batch.duplicates();
        stats.items_committed = batch.committed();
        stats.items_dead_lettered = batch.dead_lettered();
        info!(module = module.name, %stats, "Run complete");
        Ok(stats)
    }

    async fn process_seed(
        &self,
        session: &dyn BrowserSession,
        module: &ModuleSpec,
        seed: &Seed,
        batch: &BatchWriter,
    ) -> Outcome<u64> {
        if module.requires_existing_city {
            // Items only hang off a City already present in the graph.
            let city = match self.store.get_city(&seed.name).await {
                Ok(Some(city)) => city,
                Ok(None) => {
                    warn!(city = %seed.name, "City not in graph, skipping seed");
                    return Outcome::Empty;
                }
                Err(e) => return Outcome::Retryable(e),
            };
            let Some(url) = seed.url.as_deref() else {
                warn!(city = %seed.name, "Seed has no listing URL, skipping");
                return Outcome::Empty;
            };
            return self.crawl_listing_at(session, module, &city, url, batch).await;
        }

        if module.province_expansion.is_some()
            && !module.special_cities.contains(&seed.name.as_str())
        {
            return self.crawl_province(session, module, seed, batch).await;
        }

        // Municipality: the seed page is already a city listing.
        let Some(url) = seed.url.as_deref() else {
            warn!(city = %seed.name, "Seed has no listing URL, skipping");
            return Outcome::Empty;
        };
        let city = CityRecord {
            name: seed.name.clone(),
            url: url.to_string(),
        };
        if let Err(e) = self.store.upsert_city(&city, None).await {
            return Outcome::Retryable(e);
        }
        self.crawl_listing_at(session, module, &city, url, batch).await
    }

    /// Navigate to a city listing and traverse it.
    async fn crawl_listing_at(
        &self,
        session: &dyn BrowserSession,
        module: &ModuleSpec,
        city: &CityRecord,
        url: &str,
        batch: &BatchWriter,
    ) -> Outcome<u64> {
        if let Err(e) = session.navigate(url).await {
            return session_outcome(e);
        }
        self.crawl_current_listing(session, module, city, batch).await
    }

    /// Traverse the listing the session is already on.
    async fn crawl_current_listing(
        &self,
        session: &dyn BrowserSession,
        module: &ModuleSpec,
        city: &CityRecord,
        batch: &BatchWriter,
    ) -> Outcome<u64> {
        let mut traversal = ListTraversal::new(session, module, &self.policy);
        let mut staged = 0u64;

        loop {
            match traversal.advance().await {
                Ok(PageOutcome::Items(records)) => {
                    info!(
                        city = %city.name,
                        page = traversal.pages_extracted(),
                        items = records.len(),
                        "Extracted listing page"
                    );
                    for record in records {
                        let Some(item) = self.build_item(session, module, city, record).await
                        else {
                            continue;
                        };
                        match batch.stage(item).await {
                            Ok(true) => staged += 1,
                            Ok(false) => {}
                            Err(e) => return Outcome::Retryable(e),
                        }
                    }
                }
                Ok(PageOutcome::EmptySeed) => return Outcome::Empty,
                Ok(PageOutcome::End) => break,
                Err(e) => return session_outcome(e),
            }
        }

        Outcome::Ok(staged)
    }

    /// Assemble one ItemRecord: summary fields plus detail-page fields read
    /// in a sub-context. An item whose detail context cannot even open is
    /// skipped and logged, never retried.
    async fn build_item(
        &self,
        session: &dyn BrowserSession,
        module: &ModuleSpec,
        city: &CityRecord,
        record: SummaryRecord,
    ) -> Option<ItemRecord> {
        let mut fields = record.fields;

        if let Some(url) = record.url.as_deref() {
            match extract_detail(session, url, &module.detail, &self.policy).await {
                Ok(detail) => fields.extend(detail),
                Err(e) => {
                    warn!(item = %record.name, "Detail extraction failed, skipping item: {e}");
                    return None;
                }
            }
        }

        let tags = module
            .tag
            .as_ref()
            .and_then(|t| fields.get(t.field))
            .map(|value| {
                value
                    .split_whitespace()
                    .filter(|v| *v != crate::detail::NO_INFO)
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Some(ItemRecord {
            label: module.label,
            city_uid: composite_key(&city.name, &record.name),
            name: record.name,
            url: record.url.unwrap_or_default(),
            city: city.name.clone(),
            city_url: city.url.clone(),
            fields,
            tags,
            tag_kind: module.tag.as_ref().map(|t| t.kind),
        })
    }

    /// Walk a province page: create the Province node, then click through the
    /// city filter, creating each City eagerly and traversing its listing.
    async fn crawl_province(
        &self,
        session: &dyn BrowserSession,
        module: &ModuleSpec,
        seed: &Seed,
        batch: &BatchWriter,
    ) -> Outcome<u64> {
        let Some(expansion) = &module.province_expansion else {
            return Outcome::Empty;
        };
        let Some(url) = seed.url.as_deref() else {
            warn!(province = %seed.name, "Seed has no listing URL, skipping");
            return Outcome::Empty;
        };

        let province = ProvinceRecord {
            name: seed.name.clone(),
            url: url.to_string(),
        };
        if let Err(e) = self.store.upsert_province(&province).await {
            return Outcome::Retryable(e);
        }

        if let Err(e) = session.navigate(url).await {
            return session_outcome(e);
        }

        let timeout = Duration::from_secs(self.policy.listing_timeout_secs);
        match session.wait_for(&expansion.city_box, timeout).await {
            Ok(0) => return Outcome::Empty,
            Ok(_) => {}
            Err(e) => return session_outcome(e),
        }

        let city_count = match session.count(&expansion.city_item).await {
            Ok(n) => n,
            Err(e) => return session_outcome(e),
        };
        let start = usize::from(expansion.skip_first);
        let mut staged = 0u64;

        for i in start..city_count {
            let name = session
                .item_text(&expansion.city_item, i)
                .await
                .unwrap_or(None)
                .map(|t| clean_text(&t))
                .unwrap_or_default();
            if name.is_empty() {
                continue;
            }

            let listing_url = session
                .current_url()
                .await
                .unwrap_or(None)
                .unwrap_or_else(|| url.to_string());
            let city = CityRecord {
                name: name.clone(),
                url: listing_url,
            };
            if let Err(e) = self.store.upsert_city(&city, Some(&seed.name)).await {
                return Outcome::Retryable(e);
            }

            match session.click_item(&expansion.city_item, i).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(city = %name, "City filter entry not clickable, skipping");
                    continue;
                }
                Err(e) => return session_outcome(e),
            }
            tokio::time::sleep(PROVINCE_FILTER_SETTLE).await;

            match session.wait_for(&module.listing.item, timeout).await {
                Ok(0) => {
                    warn!(city = %name, "City content never rendered, skipping");
                    continue;
                }
                Ok(_) => {}
                Err(e) => return session_outcome(e),
            }

            match self.crawl_current_listing(session, module, &city, batch).await {
                Outcome::Ok(n) => staged += n,
                Outcome::Empty => {}
                other => return other,
            }
            // One city's worth of records never waits on the next city.
            batch.flush().await;
        }

        Outcome::Ok(staged)
    }
}

/// Transient session errors are retried (with a recycle in between);
/// anything else, like a missing executable or a failed launch, cannot
/// improve on retry and aborts the run with context.
fn session_outcome<T>(e: SessionError) -> Outcome<T> {
    if e.is_transient() {
        Outcome::Retryable(anyhow!(e))
    } else {
        Outcome::Fatal(anyhow!(e))
    }
}
