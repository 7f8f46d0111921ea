//! Ranked report over the historical store.
//!
//! Rows are ordered by score (highest first, unassessed last), then by
//! deadline (soonest first), then by identifier. The same rows are written
//! as pretty JSON and as a Markdown table.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::info;

use tenderscope_shared::{Opportunity, Result, TenderScopeError};

/// One report line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub id: String,
    pub source: String,
    pub category: Option<String>,
    pub description: String,
    pub buyer: String,
    pub province_canton: String,
    pub status: String,
    pub deadline: String,
    /// Whole days from the report date to the deadline; negative once passed.
    pub days_to_deadline: Option<i64>,
    pub score: Option<f64>,
    pub priority: Option<String>,
    pub rationale: Option<String>,
    pub recommended_action: Option<String>,
    pub contract_code: Option<String>,
    pub budget: Option<f64>,
    pub line_items: usize,
    pub detail_ref: Option<String>,
    pub application_status: Option<String>,
    pub owner: Option<String>,
    pub notes: Option<String>,
    #[serde(skip)]
    deadline_date: Option<NaiveDate>,
}

/// Files produced by [`write_report`].
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub json: PathBuf,
    pub markdown: PathBuf,
}

/// Parse the deadline formats seen in listing rows and record payloads.
pub fn parse_deadline(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(d);
        }
    }
    None
}

fn row(op: &Opportunity, today: NaiveDate) -> ReportRow {
    let deadline_date = parse_deadline(&op.deadline);
    let assessment = op.assessment.as_ref();
    ReportRow {
        id: op.id.clone(),
        source: op.source.as_str().to_string(),
        category: op.category.clone(),
        description: op.description.clone(),
        buyer: op.buyer.clone(),
        province_canton: op.province_canton.clone(),
        status: op.status.clone(),
        deadline: op.deadline.clone(),
        days_to_deadline: deadline_date.map(|d| (d - today).num_days()),
        score: assessment.map(|a| a.score),
        priority: assessment.map(|a| a.priority.as_str().to_string()),
        rationale: assessment.map(|a| a.rationale.clone()),
        recommended_action: assessment.map(|a| a.recommended_action.clone()),
        contract_code: op.contract_code.as_ref().map(|c| c.as_str().to_string()),
        budget: op.budget,
        line_items: op.line_items.len(),
        detail_ref: op.detail_ref.clone(),
        application_status: op.application_status.clone(),
        owner: op.owner.clone(),
        notes: op.notes.clone(),
        deadline_date,
    }
}

/// `None` sorts after every `Some`.
fn none_last<T: PartialOrd>(a: Option<T>, b: Option<T>, cmp: impl Fn(&T, &T) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => cmp(&a, &b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn rank(a: &ReportRow, b: &ReportRow) -> Ordering {
    none_last(a.score, b.score, |x, y| y.total_cmp(x))
        .then_with(|| none_last(a.deadline_date, b.deadline_date, |x, y| x.cmp(y)))
        .then_with(|| a.id.cmp(&b.id))
}

/// Build ranked rows for every entry.
pub fn build_report<'a>(entries: impl IntoIterator<Item = &'a Opportunity>, today: NaiveDate) -> Vec<ReportRow> {
    let mut rows: Vec<ReportRow> = entries.into_iter().map(|op| row(op, today)).collect();
    rows.sort_by(rank);
    rows
}

fn cell(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

/// Markdown table of the ranked rows.
pub fn render_markdown(rows: &[ReportRow], today: NaiveDate) -> String {
    let assessed = rows.iter().filter(|r| r.score.is_some()).count();
    let mut out = String::new();
    out.push_str("# TenderScope report\n\n");
    out.push_str(&format!(
        "Generated {today}. {} opportunities, {assessed} assessed.\n\n",
        rows.len()
    ));
    out.push_str("| # | Score | Priority | Days left | Deadline | ID | Category | Buyer | Description | Action | Tracking | Owner |\n");
    out.push_str("|---|---|---|---|---|---|---|---|---|---|---|---|\n");

    for (i, r) in rows.iter().enumerate() {
        let score = r.score.map(|s| format!("{s:.1}")).unwrap_or_else(|| "-".into());
        let days = r.days_to_deadline.map(|d| d.to_string()).unwrap_or_else(|| "-".into());
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {} | {} | {} |\n",
            i + 1,
            score,
            cell(r.priority.as_deref().unwrap_or("-")),
            days,
            cell(&r.deadline),
            cell(&r.id),
            cell(r.category.as_deref().unwrap_or("-")),
            cell(&r.buyer),
            cell(&r.description),
            cell(r.recommended_action.as_deref().unwrap_or("-")),
            cell(r.application_status.as_deref().unwrap_or("-")),
            cell(r.owner.as_deref().unwrap_or("-")),
        ));
    }
    out
}

/// Append `.ext` to `base`, keeping any dots already in its file name.
fn with_suffix(base: &Path, ext: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Write `<base>.json` and `<base>.md`.
pub fn write_report(rows: &[ReportRow], base: &Path, today: NaiveDate) -> Result<ReportPaths> {
    if let Some(parent) = base.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| TenderScopeError::io(parent, e))?;
    }

    let json_path = with_suffix(base, "json");
    let md_path = with_suffix(base, "md");

    let json = serde_json::to_string_pretty(rows)
        .map_err(|e| TenderScopeError::validation(format!("failed to serialize report: {e}")))?;
    std::fs::write(&json_path, json).map_err(|e| TenderScopeError::io(&json_path, e))?;
    std::fs::write(&md_path, render_markdown(rows, today))
        .map_err(|e| TenderScopeError::io(&md_path, e))?;

    info!(rows = rows.len(), json = %json_path.display(), markdown = %md_path.display(), "report written");

    Ok(ReportPaths {
        json: json_path,
        markdown: md_path,
    })
}
