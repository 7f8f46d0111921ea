//! Relevance scoring with incremental caching.
//!
//! Each record is assessed at most once. Before calling the external service
//! the scorer tries, in order: the record's own assessment, an assessment
//! held by the same identifier in the historical store, and a cached
//! assessment for identical scoring text under the same model. Failed calls
//! and malformed replies produce a sentinel assessment and processing
//! continues with the next record.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use tenderscope_shared::{
    CancelFlag, FailureKind, Opportunity, Priority, RelevanceAssessment, Result, ScoringConfig,
    TenderScopeError,
};

use crate::consolidate::HistoricalStore;

// ---------------------------------------------------------------------------
// Service seam
// ---------------------------------------------------------------------------

/// External relevance assessment capability.
///
/// `assess` returns the raw reply text; the scorer owns parsing and
/// validation so every backend is held to the same contract.
#[async_trait]
pub trait RelevanceService: Send + Sync {
    /// Model identifier recorded on assessments and used in cache keys.
    fn model(&self) -> &str;

    async fn assess(&self, text: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Reply contract
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AssessmentReply {
    #[serde(alias = "puntuacion_relevancia")]
    score: f64,
    #[serde(alias = "prioridad")]
    priority: Priority,
    #[serde(alias = "motivo")]
    rationale: String,
    #[serde(alias = "accion_recomendada")]
    recommended_action: String,
}

/// Remove a surrounding markdown code fence (```` ``` ```` or ```` ```json ````).
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`) up to the first newline.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest.trim_start_matches("json"),
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Parse and validate one reply from the relevance service.
pub fn parse_assessment(raw: &str, model: &str) -> Result<RelevanceAssessment> {
    let body = strip_code_fences(raw);
    let reply: AssessmentReply = serde_json::from_str(body)
        .map_err(|e| TenderScopeError::Scoring(format!("unexpected reply shape: {e}")))?;

    if !reply.score.is_finite() || !(0.0..=10.0).contains(&reply.score) {
        return Err(TenderScopeError::Scoring(format!(
            "score {} outside 0-10",
            reply.score
        )));
    }

    Ok(RelevanceAssessment {
        score: reply.score,
        priority: reply.priority,
        rationale: reply.rationale.trim().to_string(),
        recommended_action: reply.recommended_action.trim().to_string(),
        assessed_at: Utc::now(),
        model: model.to_string(),
    })
}

/// Cache key for one (scoring text, model) pair.
pub fn cache_key(text: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update([0u8]);
    hasher.update(model.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Options and report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScoringOptions {
    /// Fixed pause before every external call except the first.
    pub pacing: Duration,
    /// External calls allowed in this run; 0 means unlimited.
    pub max_calls: usize,
}

impl From<&ScoringConfig> for ScoringOptions {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            pacing: Duration::from_millis(config.pacing_ms),
            max_calls: config.max_calls_per_run,
        }
    }
}

/// What happened during one scoring pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoringReport {
    /// External calls made.
    pub calls: usize,
    pub cache_hits: usize,
    /// Assessments taken from the same identifier in the store.
    pub adopted: usize,
    /// Records that already carried an assessment.
    pub skipped_assessed: usize,
    pub sentinels: usize,
    /// Records left unassessed because the call cap was reached.
    pub capped: usize,
    pub cancelled: bool,
    pub failures: BTreeMap<FailureKind, usize>,
}

impl ScoringReport {
    /// Fold another pass into this one.
    pub fn absorb(&mut self, other: ScoringReport) {
        self.calls += other.calls;
        self.cache_hits += other.cache_hits;
        self.adopted += other.adopted;
        self.skipped_assessed += other.skipped_assessed;
        self.sentinels += other.sentinels;
        self.capped += other.capped;
        self.cancelled |= other.cancelled;
        for (kind, count) in other.failures {
            *self.failures.entry(kind).or_default() += count;
        }
    }
}

/// Progress callback for scoring passes.
pub trait ScoringProgress: Send + Sync {
    fn record_done(&self, current: usize, total: usize, id: &str);
}

/// No-op scoring progress.
pub struct NoScoringProgress;

impl ScoringProgress for NoScoringProgress {
    fn record_done(&self, _current: usize, _total: usize, _id: &str) {}
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Sequential, paced relevance scorer.
pub struct RelevanceScorer<'s> {
    service: &'s dyn RelevanceService,
    options: ScoringOptions,
    /// Identifier → stored assessment.
    history: HashMap<String, RelevanceAssessment>,
    /// Cache key → non-sentinel assessment.
    cache: HashMap<String, RelevanceAssessment>,
    calls_made: usize,
}

impl<'s> RelevanceScorer<'s> {
    pub fn new(service: &'s dyn RelevanceService, options: ScoringOptions) -> Self {
        Self {
            service,
            options,
            history: HashMap::new(),
            cache: HashMap::new(),
            calls_made: 0,
        }
    }

    /// Seed adoption and cache lookups from stored entries.
    ///
    /// Sentinels are adopted by identifier (a record is assessed once, even
    /// when that assessment is a sentinel) but never serve as cache entries
    /// for other records.
    pub fn with_history(mut self, store: &HistoricalStore) -> Self {
        for op in store.entries() {
            let Some(assessment) = &op.assessment else {
                continue;
            };
            self.history.insert(op.id.clone(), assessment.clone());
            if !assessment.is_sentinel() {
                self.cache
                    .insert(cache_key(&op.scoring_text(), &assessment.model), assessment.clone());
            }
        }
        debug!(
            history = self.history.len(),
            cache = self.cache.len(),
            "scorer seeded from store"
        );
        self
    }

    pub fn calls_made(&self) -> usize {
        self.calls_made
    }

    /// Assess every record that lacks an assessment, in iteration order.
    #[instrument(skip_all, fields(model = %self.service.model()))]
    pub async fn score_all<'o, I>(
        &mut self,
        records: I,
        progress: &dyn ScoringProgress,
        cancel: &CancelFlag,
    ) -> ScoringReport
    where
        I: IntoIterator<Item = &'o mut Opportunity>,
    {
        let records: Vec<&mut Opportunity> = records.into_iter().collect();
        let total = records.len();
        let mut report = ScoringReport::default();

        for (i, op) in records.into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!(remaining = total - i, "scoring cancelled");
                report.cancelled = true;
                break;
            }
            self.score_one(op, &mut report).await;
            progress.record_done(i + 1, total, &op.id);
        }

        info!(
            calls = report.calls,
            cache_hits = report.cache_hits,
            adopted = report.adopted,
            skipped = report.skipped_assessed,
            sentinels = report.sentinels,
            capped = report.capped,
            "scoring pass complete"
        );
        report
    }

    async fn score_one(&mut self, op: &mut Opportunity, report: &mut ScoringReport) {
        if op.is_assessed() {
            report.skipped_assessed += 1;
            return;
        }

        if let Some(stored) = self.history.get(&op.id) {
            op.assessment = Some(stored.clone());
            report.adopted += 1;
            return;
        }

        let text = op.scoring_text();
        let model = self.service.model().to_string();
        let key = cache_key(&text, &model);
        if let Some(cached) = self.cache.get(&key) {
            debug!(id = %op.id, "scoring cache hit");
            op.assessment = Some(cached.clone());
            report.cache_hits += 1;
            return;
        }

        if self.options.max_calls > 0 && self.calls_made >= self.options.max_calls {
            report.capped += 1;
            return;
        }

        self.pace().await;
        self.calls_made += 1;
        report.calls += 1;

        let assessment = match self.service.assess(&text).await {
            Ok(raw) => parse_assessment(&raw, &model),
            Err(e) => Err(e),
        };

        match assessment {
            Ok(assessment) => {
                debug!(id = %op.id, score = assessment.score, priority = %assessment.priority, "assessed");
                self.cache.insert(key, assessment.clone());
                op.assessment = Some(assessment);
            }
            Err(e) => {
                warn!(id = %op.id, error = %e, "scoring failed, recording sentinel");
                *report.failures.entry(e.kind()).or_default() += 1;
                report.sentinels += 1;
                op.assessment = Some(RelevanceAssessment::sentinel(e.to_string(), model));
            }
        }
    }

    async fn pace(&self) {
        if self.calls_made > 0 && !self.options.pacing.is_zero() {
            tokio::time::sleep(self.options.pacing).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tenderscope_shared::Source;

    const GOOD: &str = r#"{"score": 8, "priority": "High", "rationale": "Core software work", "recommended_action": "Apply now"}"#;

    /// Returns queued replies in order, then `GOOD`.
    struct FakeService {
        calls: AtomicUsize,
        replies: Mutex<Vec<Result<String>>>,
    }

    impl FakeService {
        fn new() -> Self {
            Self::with_replies(Vec::new())
        }

        fn with_replies(mut replies: Vec<Result<String>>) -> Self {
            replies.reverse();
            Self {
                calls: AtomicUsize::new(0),
                replies: Mutex::new(replies),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RelevanceService for FakeService {
        fn model(&self) -> &str {
            "fake/model"
        }

        async fn assess(&self, _text: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(GOOD.to_string()))
        }
    }

    fn options() -> ScoringOptions {
        ScoringOptions {
            pacing: Duration::ZERO,
            max_calls: 0,
        }
    }

    fn op(id: &str, description: &str) -> Opportunity {
        let mut op = Opportunity::new(id, Source::Listing);
        op.description = description.into();
        op
    }

    #[test]
    fn parses_english_and_portal_keys() {
        let a = parse_assessment(GOOD, "m").unwrap();
        assert_eq!(a.score, 8.0);
        assert_eq!(a.priority, Priority::High);
        assert_eq!(a.model, "m");

        let raw = r#"{"puntuacion_relevancia": 5, "prioridad": "Media", "motivo": "Parcial", "accion_recomendada": "Analizar Pliego con Detalle"}"#;
        let b = parse_assessment(raw, "m").unwrap();
        assert_eq!(b.priority, Priority::Medium);
        assert_eq!(b.recommended_action, "Analizar Pliego con Detalle");
    }

    #[test]
    fn strips_code_fences() {
        let fenced = format!("```json\n{GOOD}\n```");
        assert!(parse_assessment(&fenced, "m").is_ok());
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {}  "), "{}");
    }

    #[test]
    fn rejects_wrong_shapes() {
        let extra = r#"{"score": 1, "priority": "Low", "rationale": "x", "recommended_action": "y", "extra": 1}"#;
        let missing = r#"{"score": 1, "priority": "Low", "rationale": "x"}"#;
        let out_of_range = r#"{"score": 11, "priority": "Low", "rationale": "x", "recommended_action": "y"}"#;
        let bad_priority = r#"{"score": 1, "priority": "Urgent", "rationale": "x", "recommended_action": "y"}"#;
        for raw in [extra, missing, out_of_range, bad_priority, "not json"] {
            let err = parse_assessment(raw, "m").unwrap_err();
            assert_eq!(err.kind(), FailureKind::Scoring, "{raw}");
        }
    }

    #[test]
    fn cache_key_depends_on_model() {
        assert_eq!(cache_key("a", "m1"), cache_key("a", "m1"));
        assert_ne!(cache_key("a", "m1"), cache_key("a", "m2"));
        assert_ne!(cache_key("a", "m1"), cache_key("b", "m1"));
    }

    #[tokio::test]
    async fn rerun_makes_zero_calls() {
        let service = FakeService::new();
        let mut records = vec![op("NC-1", "software"), op("NC-2", "datos")];

        let mut scorer = RelevanceScorer::new(&service, options());
        let first = scorer
            .score_all(records.iter_mut(), &NoScoringProgress, &CancelFlag::new())
            .await;
        assert_eq!(first.calls, 2);

        let store = HistoricalStore::from_entries(records.clone());
        let mut fresh = vec![op("NC-1", "software"), op("NC-2", "datos")];
        let mut scorer = RelevanceScorer::new(&service, options()).with_history(&store);
        let second = scorer
            .score_all(fresh.iter_mut(), &NoScoringProgress, &CancelFlag::new())
            .await;

        assert_eq!(second.calls, 0);
        assert_eq!(second.adopted, 2);
        assert_eq!(service.calls(), 2);
        assert!(fresh.iter().all(Opportunity::is_assessed));

        let third = scorer
            .score_all(records.iter_mut(), &NoScoringProgress, &CancelFlag::new())
            .await;
        assert_eq!(third.skipped_assessed, 2);
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn failures_become_sentinels_and_processing_continues() {
        let service = FakeService::with_replies(vec![
            Ok("I think this is a good fit".into()),
            Err(TenderScopeError::Transport("connection reset".into())),
        ]);
        let mut records = vec![op("NC-1", "a"), op("NC-2", "b"), op("NC-3", "c")];

        let mut scorer = RelevanceScorer::new(&service, options());
        let report = scorer
            .score_all(records.iter_mut(), &NoScoringProgress, &CancelFlag::new())
            .await;

        assert_eq!(report.calls, 3);
        assert_eq!(report.sentinels, 2);
        assert_eq!(report.failures.get(&FailureKind::Scoring), Some(&1));
        assert_eq!(report.failures.get(&FailureKind::Transport), Some(&1));

        let first = records[0].assessment.as_ref().unwrap();
        assert!(first.is_sentinel());
        assert!(first.rationale.contains("unexpected reply shape"));
        assert!(records[1].assessment.as_ref().unwrap().rationale.contains("connection reset"));
        assert_eq!(records[2].assessment.as_ref().unwrap().score, 8.0);
    }

    #[tokio::test]
    async fn identical_text_hits_cache() {
        let service = FakeService::new();
        let mut records = vec![op("NC-1", "same text"), op("OC-9", "same text")];

        let mut scorer = RelevanceScorer::new(&service, options());
        let report = scorer
            .score_all(records.iter_mut(), &NoScoringProgress, &CancelFlag::new())
            .await;

        assert_eq!(report.calls, 1);
        assert_eq!(report.cache_hits, 1);
        assert_eq!(records[0].assessment, records[1].assessment);
    }

    #[tokio::test]
    async fn stored_sentinel_is_adopted_but_not_shared() {
        let mut stored = op("NC-1", "same text");
        stored.assessment = Some(RelevanceAssessment::sentinel("timeout", "fake/model"));
        let store = HistoricalStore::from_entries(vec![stored]);

        let service = FakeService::new();
        let mut records = vec![op("NC-1", "same text"), op("NC-2", "same text")];
        let mut scorer = RelevanceScorer::new(&service, options()).with_history(&store);
        let report = scorer
            .score_all(records.iter_mut(), &NoScoringProgress, &CancelFlag::new())
            .await;

        assert_eq!(report.adopted, 1);
        assert_eq!(report.calls, 1);
        assert!(records[0].assessment.as_ref().unwrap().is_sentinel());
        assert!(!records[1].assessment.as_ref().unwrap().is_sentinel());
    }

    #[tokio::test]
    async fn call_cap_leaves_rest_unassessed() {
        let service = FakeService::new();
        let mut records = vec![op("NC-1", "a"), op("NC-2", "b"), op("NC-3", "c")];
        let mut scorer = RelevanceScorer::new(
            &service,
            ScoringOptions {
                pacing: Duration::ZERO,
                max_calls: 2,
            },
        );
        let report = scorer
            .score_all(records.iter_mut(), &NoScoringProgress, &CancelFlag::new())
            .await;

        assert_eq!(report.calls, 2);
        assert_eq!(report.capped, 1);
        assert!(!records[2].is_assessed());
    }

    /// Takes `latency` per call and records each call's start and end.
    struct SlowService {
        latency: Duration,
        spans: Mutex<Vec<(Instant, Instant)>>,
    }

    #[async_trait]
    impl RelevanceService for SlowService {
        fn model(&self) -> &str {
            "slow/model"
        }

        async fn assess(&self, _text: &str) -> Result<String> {
            let start = Instant::now();
            tokio::time::sleep(self.latency).await;
            self.spans.lock().unwrap().push((start, Instant::now()));
            Ok(GOOD.to_string())
        }
    }

    #[tokio::test]
    async fn pause_follows_every_call_even_slow_ones() {
        let service = SlowService {
            latency: Duration::from_millis(60),
            spans: Mutex::new(Vec::new()),
        };
        let mut records = vec![op("NC-1", "a"), op("NC-2", "b"), op("NC-3", "c")];
        let mut scorer = RelevanceScorer::new(
            &service,
            ScoringOptions {
                pacing: Duration::from_millis(50),
                max_calls: 0,
            },
        );
        scorer
            .score_all(records.iter_mut(), &NoScoringProgress, &CancelFlag::new())
            .await;

        let spans = service.spans.lock().unwrap();
        assert_eq!(spans.len(), 3);
        for pair in spans.windows(2) {
            let gap = pair[1].0.duration_since(pair[0].1);
            assert!(gap >= Duration::from_millis(50), "gap was {gap:?}");
        }
    }

    #[tokio::test]
    async fn cancelled_before_start_scores_nothing() {
        let service = FakeService::new();
        let mut records = vec![op("NC-1", "a")];
        let cancel = CancelFlag::new();
        cancel.cancel();

        let mut scorer = RelevanceScorer::new(&service, options());
        let report = scorer
            .score_all(records.iter_mut(), &NoScoringProgress, &cancel)
            .await;

        assert!(report.cancelled);
        assert_eq!(service.calls(), 0);
        assert!(!records[0].is_assessed());
    }
}
