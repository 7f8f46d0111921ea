//! Core pipeline orchestration and domain logic for TenderScope.
//!
//! This crate ties the listing crawl and open-data search together with
//! classification, relevance scoring, consolidation into the historical
//! store, and report generation (see [`pipeline::run`]).

pub mod classifier;
pub mod consolidate;
pub mod openrouter;
pub mod pipeline;
pub mod report;
pub mod scoring;

pub use classifier::{Classification, ClassifiedBatch, Classifier};
pub use consolidate::{HistoricalStore, MergeStats, consolidate};
pub use openrouter::OpenRouterAssessor;
pub use pipeline::{
    ProgressReporter, RunOptions, RunResult, RunSummary, SilentProgress, report_from_store, run,
};
pub use report::{ReportPaths, ReportRow, build_report, parse_deadline, render_markdown, write_report};
pub use scoring::{
    RelevanceScorer, RelevanceService, ScoringOptions, ScoringReport, parse_assessment,
};
