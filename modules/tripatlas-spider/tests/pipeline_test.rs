//! End-to-end pipeline behavior against the scripted session and the
//! in-memory store: dedup idempotency, resume, pagination termination,
//! sub-context cleanup, batch atomicity.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chromium_client::Locator;
use tripatlas_common::{ItemLabel, ItemRecord, PipelinePolicy, Seed, TagKind};
use tripatlas_spider::checkpoint::{Checkpoint, CheckpointStore};
use tripatlas_spider::detail::{extract_detail, NO_INFO};
use tripatlas_spider::ingest::{BatchWriter, DeadLetterLog};
use tripatlas_spider::listing::{ListTraversal, PageOutcome};
use tripatlas_spider::pipeline::Pipeline;
use tripatlas_spider::sources::{
    DetailSpec, ListingSpec, ModuleSpec, PaginationSpec, TagSpec,
};
use tripatlas_spider::testing::{MemoryStore, ScriptedItem, ScriptedPage, ScriptedProvider, ScriptedSession};
use tripatlas_spider::traits::BrowserSession;

const ITEM: Locator = Locator::Css(".sight-card");
const NAME: Locator = Locator::Css(".sight-card .name a");
const PRICE: Locator = Locator::Css(".price");
const NEXT: Locator = Locator::Css(".next-page");
const MARKER: Locator = Locator::Css(".detail");
const INTRO: Locator = Locator::Css(".detail .intro");
const FEATURES: Locator = Locator::Css(".features");

static SUMMARY_FIELDS: [(&str, Locator, &str); 2] =
    [("price", PRICE, ""), ("features", FEATURES, "")];
static DETAIL_FIELDS: [(&str, Locator); 1] = [("introduce", INTRO)];

fn test_module(page_ceiling: Option<u32>, batch_size: usize) -> ModuleSpec {
    ModuleSpec {
        name: "sights-test",
        label: ItemLabel::Sight,
        listing: ListingSpec {
            item: ITEM,
            name: NAME,
            summary_fields: &SUMMARY_FIELDS,
        },
        detail: DetailSpec {
            marker: MARKER,
            fields: &DETAIL_FIELDS,
        },
        pagination: PaginationSpec {
            next: NEXT,
            disabled_class: "disabled",
            page_ceiling,
        },
        batch_size,
        tag: Some(TagSpec {
            field: "features",
            kind: TagKind::Feature,
        }),
        requires_existing_city: false,
        special_cities: &[],
        province_expansion: None,
        seed_url_field: "city_url",
    }
}

fn fast_policy() -> PipelinePolicy {
    PipelinePolicy {
        rotate_every_seeds: 3,
        retry_max_attempts: 3,
        seed_delay_secs: (0.0, 0.0),
        page_delay_secs: (0.0, 0.0),
        listing_timeout_secs: 1,
        detail_marker_timeout_secs: 1,
        detail_field_timeout_secs: 1,
        nav_timeout_secs: 1,
    }
}

/// A two-sight listing for 南宁 with no next-page control.
fn nanning_session() -> Arc<ScriptedSession> {
    let page = ScriptedPage {
        items: vec![
            ScriptedItem::new(&NAME, "青秀山", "https://example/sight/qingxiushan")
                .with_field(&PRICE, "￥128")
                .with_field(&FEATURES, "赏花 登高"),
            ScriptedItem::new(&NAME, "动物园", "https://example/sight/zoo"),
        ],
        next_class: None,
    };
    let session = ScriptedSession::new(vec![page]);
    session.set_detail(
        "https://example/sight/qingxiushan",
        &[(&INTRO, "南宁市区最大的风景区")],
    );
    session.set_detail("https://example/sight/zoo", &[(&INTRO, "动物园介绍")]);
    session
}

fn pipeline_for(
    session: &Arc<ScriptedSession>,
    store: &Arc<MemoryStore>,
    data_dir: PathBuf,
) -> (Pipeline, Arc<ScriptedProvider>) {
    let provider = ScriptedProvider::new(Arc::clone(session));
    let store: Arc<dyn tripatlas_spider::traits::RecordStore> = store.clone();
    let pipeline = Pipeline::new(
        provider.clone(),
        store,
        data_dir,
        fast_policy(),
        Arc::new(AtomicBool::new(false)),
    );
    (pipeline, provider)
}

fn nanning_seed() -> Vec<Seed> {
    vec![Seed::with_url("南宁", "https://example/sight/nanning")]
}

#[tokio::test]
async fn nanning_scenario_creates_two_linked_sights() {
    let session = nanning_session();
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline_for(&session, &store, dir.path().to_path_buf());

    let stats = pipeline
        .run(&test_module(None, 20), &nanning_seed())
        .await
        .unwrap();

    assert_eq!(stats.seeds_processed, 1);
    assert_eq!(stats.items_committed, 2);
    assert_eq!(store.item_count(), 2);

    let items = store.items.lock().unwrap();
    let qxs = items.get("南宁_青秀山").expect("composite key present");
    assert_eq!(qxs.city, "南宁");
    // Currency mark stripped by field cleanup.
    assert_eq!(qxs.fields.get("price").unwrap(), "128");
    assert_eq!(qxs.fields.get("introduce").unwrap(), "南宁市区最大的风景区");
    assert_eq!(qxs.tags, vec!["赏花", "登高"]);
    assert!(items.contains_key("南宁_动物园"));

    // Every item is linked to its city, and the city node exists.
    let located = store.located_in.lock().unwrap();
    assert_eq!(located.len(), 2);
    assert!(located.iter().all(|(_, city)| city == "南宁"));
    assert!(store.cities.lock().unwrap().contains_key("南宁"));

    // Missing summary fields fall back to the module default, detail fields
    // to the sentinel only when absent.
    let zoo = items.get("南宁_动物园").unwrap();
    assert_eq!(zoo.fields.get("price").unwrap(), "");
    assert_eq!(zoo.fields.get("introduce").unwrap(), "动物园介绍");
}

#[tokio::test]
async fn reingestion_is_idempotent() {
    let session = nanning_session();
    let store = MemoryStore::new();
    let module = test_module(None, 20);

    let dir1 = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline_for(&session, &store, dir1.path().to_path_buf());
    pipeline.run(&module, &nanning_seed()).await.unwrap();

    let nodes_after_first = store.item_count();
    let rels_after_first = store.relationship_count();

    // Fresh checkpoint dir: the second run re-extracts everything and the
    // composite-key dedup drops it all.
    let dir2 = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline_for(&session, &store, dir2.path().to_path_buf());
    let stats = pipeline.run(&module, &nanning_seed()).await.unwrap();

    assert_eq!(stats.items_duplicate, 2);
    assert_eq!(stats.items_committed, 0);
    assert_eq!(store.item_count(), nodes_after_first);
    assert_eq!(store.relationship_count(), rels_after_first);
}

#[tokio::test]
async fn restart_resumes_past_completed_seeds() {
    let session = nanning_session();
    let store = MemoryStore::new();
    let module = test_module(None, 20);
    let dir = tempfile::tempdir().unwrap();

    let all_seeds = vec![
        Seed::with_url("南宁", "https://example/sight/nanning"),
        Seed::with_url("桂林", "https://example/sight/guilin"),
        Seed::with_url("柳州", "https://example/sight/liuzhou"),
    ];

    // First pass dies after the first two seeds.
    let (pipeline, _) = pipeline_for(&session, &store, dir.path().to_path_buf());
    pipeline.run(&module, &all_seeds[..2]).await.unwrap();
    assert_eq!(store.item_count(), 4);

    // Restart over the full list: seeds 0..k are skipped, k+1 runs.
    let (pipeline, _) = pipeline_for(&session, &store, dir.path().to_path_buf());
    let stats = pipeline.run(&module, &all_seeds).await.unwrap();

    assert_eq!(stats.seeds_skipped, 2);
    assert_eq!(stats.seeds_processed, 1);
    // No node for the completed seeds was re-created.
    assert_eq!(stats.items_duplicate, 0);
    assert_eq!(store.item_count(), 6);
}

#[tokio::test]
async fn completed_keys_skip_out_of_index_order() {
    let session = nanning_session();
    let store = MemoryStore::new();
    let module = test_module(None, 20);
    let dir = tempfile::tempdir().unwrap();

    // 桂林 finished in an earlier partial pass, out of index order.
    let mut checkpoint = Checkpoint::default();
    checkpoint.completed.insert("桂林".to_string());
    CheckpointStore::new(dir.path().join("sights-test_progress.json"))
        .save(&checkpoint)
        .unwrap();

    let seeds = vec![
        Seed::with_url("南宁", "https://example/sight/nanning"),
        Seed::with_url("桂林", "https://example/sight/guilin"),
    ];
    let (pipeline, _) = pipeline_for(&session, &store, dir.path().to_path_buf());
    let stats = pipeline.run(&module, &seeds).await.unwrap();

    assert_eq!(stats.seeds_skipped, 1);
    assert_eq!(stats.seeds_processed, 1);
    assert!(store.items.lock().unwrap().keys().all(|k| k.starts_with("南宁")));
}

#[tokio::test]
async fn pagination_terminates_in_exactly_three_cycles() {
    let item = |n: &str| ScriptedItem::new(&NAME, n, "");
    let pages = vec![
        ScriptedPage {
            items: vec![item("一")],
            next_class: Some("next-page".to_string()),
        },
        ScriptedPage {
            items: vec![item("二")],
            next_class: Some("next-page".to_string()),
        },
        // Page 3 reports no next-page control.
        ScriptedPage {
            items: vec![item("三")],
            next_class: None,
        },
    ];
    let session = ScriptedSession::new(pages);
    let module = test_module(None, 20);
    let policy = fast_policy();

    let mut traversal = ListTraversal::new(session.as_ref(), &module, &policy);
    let mut extraction_cycles = 0;
    loop {
        match traversal.advance().await.unwrap() {
            PageOutcome::Items(items) => {
                assert_eq!(items.len(), 1);
                extraction_cycles += 1;
                assert!(extraction_cycles <= 3, "traversal looped past the last page");
            }
            PageOutcome::End => break,
            PageOutcome::EmptySeed => panic!("listing was present"),
        }
    }

    assert_eq!(extraction_cycles, 3);
    assert_eq!(traversal.pages_extracted(), 3);
}

#[tokio::test]
async fn page_ceiling_caps_traversal() {
    let many_pages: Vec<ScriptedPage> = (0..5)
        .map(|i| ScriptedPage {
            items: vec![ScriptedItem::new(&NAME, &format!("第{i}项"), "")],
            next_class: Some("next-page".to_string()),
        })
        .collect();
    let session = ScriptedSession::new(many_pages);
    let module = test_module(Some(2), 20);
    let policy = fast_policy();

    let mut traversal = ListTraversal::new(session.as_ref(), &module, &policy);
    let mut cycles = 0;
    loop {
        match traversal.advance().await.unwrap() {
            PageOutcome::Items(_) => cycles += 1,
            PageOutcome::End => break,
            PageOutcome::EmptySeed => panic!("listing was present"),
        }
    }
    assert_eq!(cycles, 2);
}

#[tokio::test]
async fn missing_listing_is_an_empty_seed_not_an_error() {
    let session = ScriptedSession::new(vec![]);
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, provider) = pipeline_for(&session, &store, dir.path().to_path_buf());

    let stats = pipeline
        .run(&test_module(None, 20), &nanning_seed())
        .await
        .unwrap();

    assert_eq!(stats.seeds_empty, 1);
    assert_eq!(stats.seeds_failed, 0);
    // No retry happened: empty is a result, not a failure.
    assert_eq!(provider.recycles.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transient_failures_recycle_and_retry_before_succeeding() {
    let session = nanning_session();
    session.fail_navigations.store(2, Ordering::SeqCst);
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, provider) = pipeline_for(&session, &store, dir.path().to_path_buf());

    let stats = pipeline
        .run(&test_module(None, 20), &nanning_seed())
        .await
        .unwrap();

    assert_eq!(stats.seeds_processed, 1);
    assert_eq!(stats.seeds_failed, 0);
    assert_eq!(store.item_count(), 2);
    // One recycle per failed attempt.
    assert_eq!(provider.recycles.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn retry_exhaustion_skips_seed_and_run_continues() {
    let session = nanning_session();
    // More navigation failures than attempts: the first seed is abandoned,
    // the second still runs.
    session.fail_navigations.store(3, Ordering::SeqCst);
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline_for(&session, &store, dir.path().to_path_buf());

    let seeds = vec![
        Seed::with_url("南宁", "https://example/sight/nanning"),
        Seed::with_url("桂林", "https://example/sight/guilin"),
    ];
    let stats = pipeline.run(&test_module(None, 20), &seeds).await.unwrap();

    assert_eq!(stats.seeds_failed, 1);
    assert_eq!(stats.seeds_processed, 1);
    assert!(store.items.lock().unwrap().keys().all(|k| k.starts_with("桂林")));
}

#[tokio::test]
async fn detail_contexts_are_closed_on_success_and_failure() {
    let session = nanning_session();
    let policy = fast_policy();
    let module = test_module(None, 20);

    // Success path.
    let before = session.open_contexts();
    let fields = extract_detail(
        session.as_ref(),
        "https://example/sight/qingxiushan",
        &module.detail,
        &policy,
    )
    .await
    .unwrap();
    assert_eq!(session.open_contexts(), before);
    assert_eq!(fields.get("introduce").unwrap(), "南宁市区最大的风景区");

    // Field reads blow up mid-extraction: the context still closes and the
    // record degrades to sentinels.
    session.fail_detail_reads.store(true, Ordering::SeqCst);
    let before = session.open_contexts();
    let fields = extract_detail(
        session.as_ref(),
        "https://example/sight/qingxiushan",
        &module.detail,
        &policy,
    )
    .await
    .unwrap();
    assert_eq!(session.open_contexts(), before);
    assert_eq!(fields.get("introduce").unwrap(), NO_INFO);

    // The context cannot even open: nothing leaks either.
    session.fail_open_context.store(true, Ordering::SeqCst);
    let before = session.open_contexts();
    let result = extract_detail(
        session.as_ref(),
        "https://example/sight/qingxiushan",
        &module.detail,
        &policy,
    )
    .await;
    assert!(result.is_err());
    assert_eq!(session.open_contexts(), before);
}

fn record(uid: &str, name: &str) -> ItemRecord {
    ItemRecord {
        label: ItemLabel::Sight,
        city_uid: uid.to_string(),
        name: name.to_string(),
        url: String::new(),
        city: "南宁".to_string(),
        city_url: "https://example/sight/nanning".to_string(),
        fields: BTreeMap::new(),
        tags: Vec::new(),
        tag_kind: Some(TagKind::Feature),
    }
}

#[tokio::test]
async fn failed_batch_commits_nothing_and_dead_letters_every_record() {
    let store = MemoryStore::new();
    store.fail_next_commits.store(1, Ordering::SeqCst);
    let dir = tempfile::tempdir().unwrap();
    let dead_letter_path = dir.path().join("dead_letter.jsonl");

    let store_dyn: Arc<dyn tripatlas_spider::traits::RecordStore> = store.clone();
    let batch = BatchWriter::new(store_dyn, 3, Some(DeadLetterLog::new(&dead_letter_path)));

    batch.stage(record("南宁_A", "A")).await.unwrap();
    batch.stage(record("南宁_B", "B")).await.unwrap();
    // The third record fills the window and triggers the failing flush.
    batch.stage(record("南宁_C", "C")).await.unwrap();

    // Atomicity: none of A, B, C exists after the failed flush.
    assert_eq!(store.item_count(), 0);
    assert_eq!(batch.dead_lettered(), 3);
    assert_eq!(batch.staged_len().await, 0);

    let dead = std::fs::read_to_string(&dead_letter_path).unwrap();
    assert_eq!(dead.lines().count(), 3);
    assert!(dead.contains("simulated transaction failure"));
    assert!(dead.contains("南宁_A"));

    // The failure is not retried automatically; later batches commit fine.
    batch.stage(record("南宁_D", "D")).await.unwrap();
    assert_eq!(batch.flush().await, 1);
    assert_eq!(store.item_count(), 1);
}

#[tokio::test]
async fn staging_dedups_against_store_and_window() {
    let store = MemoryStore::new();
    let store_dyn: Arc<dyn tripatlas_spider::traits::RecordStore> = store.clone();
    let batch = BatchWriter::new(store_dyn, 10, None);

    assert!(batch.stage(record("南宁_A", "A")).await.unwrap());
    // Same key again while still in the window.
    assert!(!batch.stage(record("南宁_A", "A")).await.unwrap());
    batch.flush().await;
    // Same key again once committed.
    assert!(!batch.stage(record("南宁_A", "A")).await.unwrap());

    assert_eq!(batch.duplicates(), 2);
    assert_eq!(store.item_count(), 1);
}

#[tokio::test]
async fn shutdown_flag_stops_between_seeds_after_flush_and_save() {
    let session = nanning_session();
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let shutdown = Arc::new(AtomicBool::new(true));
    let provider = ScriptedProvider::new(Arc::clone(&session));
    let store_dyn: Arc<dyn tripatlas_spider::traits::RecordStore> = store.clone();
    let pipeline = Pipeline::new(
        provider,
        store_dyn,
        dir.path().to_path_buf(),
        fast_policy(),
        Arc::clone(&shutdown),
    );

    let stats = pipeline
        .run(&test_module(None, 20), &nanning_seed())
        .await
        .unwrap();

    // Nothing processed, nothing lost, and the run ended cleanly.
    assert_eq!(stats.seeds_processed, 0);
    assert_eq!(store.item_count(), 0);
}
