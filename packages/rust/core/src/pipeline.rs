//! End-to-end run: listing crawl + open-data search → classify → detail
//! enrichment → relevance scoring → consolidation → store → report.
//!
//! Every stage runs sequentially on the caller's task. Per-page and
//! per-record problems are counted in the [`RunSummary`]; only store and
//! configuration errors abort the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use tenderscope_crawler::{DetailEnricher, ListingCrawler, RenderCapability};
use tenderscope_opendata::OpenDataClient;
use tenderscope_shared::{
    CancelFlag, CategoryConfig, FailureKind, ListingConfig, Opportunity, Result, SkipReason,
    TenderScopeError,
};
use tenderscope_storage::{RunRecord, Storage};

use crate::classifier::Classifier;
use crate::consolidate::{HistoricalStore, MergeStats};
use crate::report::{self, ReportPaths};
use crate::scoring::{RelevanceScorer, RelevanceService, ScoringOptions, ScoringProgress, ScoringReport};

/// Inputs of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub listing: ListingConfig,
    /// Listing pages to visit; 0 visits every discovered page.
    pub max_pages: u32,
    /// Ordered category table for classification and open-data searches.
    pub categories: Vec<CategoryConfig>,
    pub scoring: ScoringOptions,
    /// Also score stored entries that are still unassessed.
    pub backfill: bool,
    /// Base path for `<base>.json` / `<base>.md`; `None` skips the report.
    pub report_path: Option<PathBuf>,
}

/// Counters for one run. Persisted as the run's `stats_json`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub pages_discovered: u32,
    pub pages_processed: u32,
    pub pages_skipped: u32,
    pub rows_extracted: usize,
    pub shape_mismatches: usize,
    pub missing_ids: usize,
    pub open_data_records: usize,
    pub records_classified: usize,
    pub records_filtered_out: usize,
    pub details_enriched: usize,
    pub contract_codes: usize,
    pub scoring: ScoringReport,
    pub merge: MergeStats,
    pub store_before: usize,
    pub store_after: usize,
    pub failures: BTreeMap<FailureKind, usize>,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl RunSummary {
    fn count_failures(&mut self, reasons: &[SkipReason]) {
        for reason in reasons {
            *self.failures.entry(reason.kind).or_default() += 1;
        }
    }

    /// Total failures across all kinds.
    pub fn failure_total(&self) -> usize {
        self.failures.values().sum()
    }
}

/// Result of [`run`].
#[derive(Debug)]
pub struct RunResult {
    pub summary: RunSummary,
    pub report: Option<ReportPaths>,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each item of a counted stage.
    fn item(&self, stage: &str, current: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item(&self, _stage: &str, _current: usize, _total: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// Adapts a `ProgressReporter` to the `ScoringProgress` interface.
struct PipelineScoringProgress<'a> {
    inner: &'a dyn ProgressReporter,
}

impl ScoringProgress for PipelineScoringProgress<'_> {
    fn record_done(&self, current: usize, total: usize, _id: &str) {
        self.inner.item("Scoring", current, total);
    }
}

/// Run the full pipeline against an open store.
///
/// `open_data` and `service` are optional sources: without a client the
/// search API is skipped; without a service records stay unassessed.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(max_pages = options.max_pages, adapter = render.name()))]
pub async fn run(
    options: &RunOptions,
    render: &mut dyn RenderCapability,
    open_data: Option<&OpenDataClient>,
    service: Option<&dyn RelevanceService>,
    storage: &Storage,
    progress: &dyn ProgressReporter,
    cancel: &CancelFlag,
) -> Result<RunResult> {
    let start = Instant::now();
    let started_at = Utc::now();
    let mut summary = RunSummary {
        started_at: Some(started_at),
        ..RunSummary::default()
    };

    // --- Phase 1: Historical store ---
    progress.phase("Loading historical store");
    let mut store = HistoricalStore::from_entries(storage.load_opportunities().await?);
    summary.store_before = store.len();
    info!(entries = store.len(), "historical store loaded");

    // --- Phase 2: Listing crawl ---
    progress.phase("Crawling listing");
    let crawler = ListingCrawler::new(options.listing.clone(), options.max_pages);
    let crawl = crawler.crawl(render, cancel).await?;
    summary.pages_discovered = crawl.pages_discovered;
    summary.pages_processed = crawl.pages_processed;
    summary.pages_skipped = crawl.pages_skipped;
    summary.rows_extracted = crawl.rows.len();
    summary.shape_mismatches = crawl.shape_mismatches;
    summary.missing_ids = crawl.missing_ids;
    summary.count_failures(&crawl.failures);
    let mut collected = crawl.rows;

    // --- Phase 3: Open-data search ---
    if let Some(client) = open_data.filter(|_| !cancel.is_cancelled()) {
        progress.phase("Searching open data");
        let found = client.collect(&options.categories, cancel).await;
        summary.open_data_records = found.records.len();
        summary.count_failures(&found.failures);
        collected.extend(found.records);
    }

    // --- Phase 4: Classification ---
    progress.phase("Classifying");
    let batch = Classifier::new(&options.categories).apply(collected);
    summary.records_classified = batch.kept.len();
    summary.records_filtered_out = batch.filtered_out;
    let mut records = batch.kept;

    // --- Phase 5: Detail enrichment ---
    progress.phase("Enriching details");
    let enrichment = DetailEnricher::new(&options.listing)
        .enrich_all(render, &mut records, cancel)
        .await?;
    summary.details_enriched = enrichment.enriched;
    summary.contract_codes = enrichment.with_contract_code;
    summary.count_failures(&enrichment.failures);

    // --- Phase 6: Relevance scoring ---
    let scoring_progress = PipelineScoringProgress { inner: progress };
    let mut scorer = service
        .map(|s| RelevanceScorer::new(s, options.scoring.clone()).with_history(&store));
    if let Some(scorer) = scorer.as_mut() {
        progress.phase("Scoring relevance");
        let report = scorer
            .score_all(records.iter_mut(), &scoring_progress, cancel)
            .await;
        summary.scoring.absorb(report);
    }

    // --- Phase 7: Consolidation ---
    progress.phase("Consolidating");
    summary.merge = store.merge(records);

    if options.backfill {
        if let Some(scorer) = scorer.as_mut() {
            progress.phase("Scoring stored entries");
            let report = scorer
                .score_all(store.unassessed_mut(), &scoring_progress, cancel)
                .await;
            summary.scoring.absorb(report);
        }
    }
    summary.store_after = store.len();
    summary.cancelled = crawl.cancelled || enrichment.cancelled || summary.scoring.cancelled;
    for (kind, count) in &summary.scoring.failures {
        *summary.failures.entry(*kind).or_default() += count;
    }

    // --- Phase 8: Persist ---
    progress.phase("Saving store");
    summary.elapsed_ms = start.elapsed().as_millis() as u64;
    let mut record = RunRecord::new(started_at, String::new());
    summary.run_id = record.id.clone();
    record.stats_json = serde_json::to_string(&summary)
        .map_err(|e| TenderScopeError::Persistence(format!("failed to serialize run summary: {e}")))?;
    let entries: Vec<Opportunity> = store.entries().cloned().collect();
    storage.save_run(&entries, &record).await?;

    // --- Phase 9: Report ---
    let report = match &options.report_path {
        Some(base) => {
            progress.phase("Writing report");
            let today = Utc::now().date_naive();
            let rows = report::build_report(&entries, today);
            Some(report::write_report(&rows, base, today)?)
        }
        None => None,
    };

    if summary.cancelled {
        warn!("run cancelled, partial results saved");
    }
    info!(
        run_id = %summary.run_id,
        rows = summary.rows_extracted,
        classified = summary.records_classified,
        scoring_calls = summary.scoring.calls,
        store_after = summary.store_after,
        failures = summary.failure_total(),
        elapsed_ms = summary.elapsed_ms,
        "run complete"
    );
    progress.done(&summary);

    Ok(RunResult { summary, report })
}

/// Rebuild the report from the store without collecting anything.
pub async fn report_from_store(storage: &Storage, base: &Path) -> Result<(ReportPaths, usize)> {
    let store = HistoricalStore::from_entries(storage.load_opportunities().await?);
    let today = Utc::now().date_naive();
    let rows = report::build_report(store.entries(), today);
    let paths = report::write_report(&rows, base, today)?;
    Ok((paths, rows.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tenderscope_shared::{Priority, default_categories};
    use url::Url;

    const LISTING_URL: &str = "https://portal.example/ProcesoContratacion/compras/NCO/FrmNCOListado.cpe";

    fn fixture(name: &str) -> String {
        let path = format!("../../../fixtures/html/{name}");
        std::fs::read_to_string(&path).unwrap_or_else(|_| panic!("missing fixture: {path}"))
    }

    /// Listing pages by index; any other URL serves the detail fixture.
    struct FixtureSession {
        pages: Vec<String>,
        detail: String,
        current: Option<String>,
    }

    impl FixtureSession {
        fn new() -> Self {
            Self {
                pages: (1..=3).map(|n| fixture(&format!("listing_page_{n}.html"))).collect(),
                detail: fixture("detail.html"),
                current: None,
            }
        }
    }

    #[async_trait]
    impl RenderCapability for FixtureSession {
        async fn open(&mut self, url: &Url) -> Result<()> {
            self.current = Some(if url.as_str() == LISTING_URL {
                self.pages[0].clone()
            } else {
                self.detail.clone()
            });
            Ok(())
        }

        async fn wait_for_ready(&mut self, _selector: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        async fn current_content(&mut self) -> Result<String> {
            self.current
                .clone()
                .ok_or_else(|| TenderScopeError::Render("nothing open".into()))
        }

        async fn navigate(&mut self, index: u32) -> Result<()> {
            let page = self
                .pages
                .get(index as usize - 1)
                .ok_or_else(|| TenderScopeError::Pagination(format!("no page {index}")))?;
            self.current = Some(page.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "fixture"
        }
    }

    struct CountingService {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RelevanceService for CountingService {
        fn model(&self) -> &str {
            "fake/model"
        }

        async fn assess(&self, _text: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(r#"{"score": 7, "priority": "High", "rationale": "fit", "recommended_action": "Apply"}"#.into())
        }
    }

    fn options(report_path: Option<PathBuf>) -> RunOptions {
        RunOptions {
            listing: ListingConfig {
                url: LISTING_URL.into(),
                base_path: "https://portal.example/ProcesoContratacion/compras/".into(),
                origin: "https://portal.example".into(),
                page_delay_ms: 0,
                ..ListingConfig::default()
            },
            max_pages: 0,
            categories: default_categories(),
            scoring: ScoringOptions {
                pacing: Duration::ZERO,
                max_calls: 0,
            },
            backfill: false,
            report_path,
        }
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("tenderscope-pipeline-{}", uuid::Uuid::now_v7()))
    }

    #[tokio::test]
    async fn full_run_then_idempotent_rerun() {
        let dir = temp_dir();
        let storage = Storage::open(&dir.join("store.db")).await.unwrap();
        let service = CountingService {
            calls: AtomicUsize::new(0),
        };
        let opts = options(Some(dir.join("report")));

        let mut session = FixtureSession::new();
        let first = run(
            &opts,
            &mut session,
            None,
            Some(&service),
            &storage,
            &SilentProgress,
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        let s = &first.summary;
        assert_eq!(s.pages_discovered, 3);
        assert_eq!(s.pages_processed, 3);
        assert_eq!(s.rows_extracted, 6);
        assert_eq!(s.records_classified, 4);
        assert_eq!(s.records_filtered_out, 2);
        assert_eq!(s.details_enriched, 3);
        assert_eq!(s.scoring.calls, 4);
        assert_eq!(s.merge.added, 4);
        assert_eq!(s.store_after, 4);
        assert!(!s.cancelled);

        let paths = first.report.expect("report written");
        assert!(paths.json.exists());
        assert!(paths.markdown.exists());

        let stored = storage.load_opportunities().await.unwrap();
        let nc1 = stored.iter().find(|o| o.id == "NC-0001").unwrap();
        assert_eq!(nc1.category.as_deref(), Some("Software Development"));
        assert!(nc1.contract_code.is_some());
        assert_eq!(nc1.assessment.as_ref().map(|a| a.priority), Some(Priority::High));

        let mut session = FixtureSession::new();
        let second = run(
            &opts,
            &mut session,
            None,
            Some(&service),
            &storage,
            &SilentProgress,
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(second.summary.scoring.calls, 0);
        assert_eq!(second.summary.scoring.adopted, 4);
        assert_eq!(second.summary.merge.added, 0);
        assert_eq!(second.summary.store_before, 4);
        assert_eq!(second.summary.store_after, 4);
        assert_eq!(service.calls.load(Ordering::SeqCst), 4);
        assert_eq!(storage.list_runs(10).await.unwrap().len(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn without_service_records_stay_unassessed() {
        let dir = temp_dir();
        let storage = Storage::open(&dir.join("store.db")).await.unwrap();
        let mut session = FixtureSession::new();

        let result = run(
            &options(None),
            &mut session,
            None,
            None,
            &storage,
            &SilentProgress,
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        assert!(result.report.is_none());
        assert_eq!(result.summary.scoring.calls, 0);
        let stored = storage.load_opportunities().await.unwrap();
        assert_eq!(stored.len(), 4);
        assert!(stored.iter().all(|o| !o.is_assessed()));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn backfill_scores_stored_entries() {
        let dir = temp_dir();
        let storage = Storage::open(&dir.join("store.db")).await.unwrap();
        let service = CountingService {
            calls: AtomicUsize::new(0),
        };

        let mut session = FixtureSession::new();
        run(&options(None), &mut session, None, None, &storage, &SilentProgress, &CancelFlag::new())
            .await
            .unwrap();

        // Second run only sees page 1; the other stored entries are backfilled.
        let mut opts = options(None);
        opts.max_pages = 1;
        opts.backfill = true;
        let mut session = FixtureSession::new();
        let result = run(
            &opts,
            &mut session,
            None,
            Some(&service),
            &storage,
            &SilentProgress,
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.summary.scoring.calls, 4);
        let stored = storage.load_opportunities().await.unwrap();
        assert!(stored.iter().all(Opportunity::is_assessed));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn cancelled_run_still_persists() {
        let dir = temp_dir();
        let storage = Storage::open(&dir.join("store.db")).await.unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let mut session = FixtureSession::new();
        let result = run(
            &options(None),
            &mut session,
            None,
            None,
            &storage,
            &SilentProgress,
            &cancel,
        )
        .await
        .unwrap();

        assert!(result.summary.cancelled);
        assert_eq!(storage.list_runs(10).await.unwrap().len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn report_from_store_ranks_entries() {
        let dir = temp_dir();
        let storage = Storage::open(&dir.join("store.db")).await.unwrap();
        let mut session = FixtureSession::new();
        run(&options(None), &mut session, None, None, &storage, &SilentProgress, &CancelFlag::new())
            .await
            .unwrap();

        let (paths, rows) = report_from_store(&storage, &dir.join("again")).await.unwrap();
        assert_eq!(rows, 4);
        let md = std::fs::read_to_string(paths.markdown).unwrap();
        assert!(md.contains("NC-0003"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
