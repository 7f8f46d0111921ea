//! Detail-page enrichment: contract code and line items.
//!
//! Each record is enriched independently. A failed fetch leaves that record
//! unenriched and the batch moves on.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use tenderscope_shared::{
    CancelFlag, ContractCode, FailureKind, LineItem, ListingConfig, Opportunity, Outcome, Result,
    SkipReason, TenderScopeError,
};

use crate::extractor::cell_text;
use crate::render::RenderCapability;

/// Label preceding the contract code on detail pages.
const CONTRACT_CODE_LABEL: &str = "Código Necesidad de Contratación";

/// Cells a line-item row must have.
const LINE_ITEM_CELLS: usize = 5;

static CONTRACT_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Código Necesidad de Contratación:\s*(NIC-[0-9]+-[0-9]+-[0-9]+)")
        .expect("valid regex")
});
static STRONG_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("strong").expect("valid selector"));
static TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("valid selector"));
static ROW_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
static CELL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td, th").expect("valid selector"));

// ---------------------------------------------------------------------------
// EnrichmentReport
// ---------------------------------------------------------------------------

/// Counters for one enrichment batch.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentReport {
    /// Records whose detail page was fetched and parsed.
    pub enriched: usize,
    /// Enriched records where a contract code was found.
    pub with_contract_code: usize,
    /// Records without a detail reference.
    pub without_ref: usize,
    /// Records whose detail page could not be fetched.
    pub failures: Vec<SkipReason>,
    /// Batch stopped early on cancellation.
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// DetailEnricher
// ---------------------------------------------------------------------------

/// Resolves detail references and parses detail pages through a render session.
#[derive(Debug, Clone)]
pub struct DetailEnricher {
    base_path: String,
    origin: String,
    ready_selector: String,
    timeout: Duration,
}

impl DetailEnricher {
    pub fn new(listing: &ListingConfig) -> Self {
        Self {
            base_path: listing.base_path.clone(),
            origin: listing.origin.trim_end_matches('/').to_string(),
            ready_selector: listing.detail_ready_selector.clone(),
            timeout: Duration::from_secs(listing.detail_timeout_secs),
        }
    }

    /// Normalize a detail reference into an absolute URL.
    ///
    /// `../x` resolves against the base path, `/x` against the site origin;
    /// anything else is taken as-is.
    pub fn resolve_ref(&self, raw: &str) -> Result<Url> {
        let raw = raw.trim();
        let resolved = if let Some(rest) = raw.strip_prefix("../") {
            format!("{}{rest}", self.base_path)
        } else if raw.starts_with('/') {
            format!("{}{raw}", self.origin)
        } else {
            raw.to_string()
        };
        Url::parse(&resolved)
            .map_err(|e| TenderScopeError::parse(format!("invalid detail reference '{raw}': {e}")))
    }

    /// Fetch and parse the detail page of one record.
    #[instrument(skip_all, fields(id = %op.id))]
    pub async fn enrich(
        &self,
        render: &mut dyn RenderCapability,
        op: &mut Opportunity,
    ) -> Outcome<()> {
        let Some(raw) = op.detail_ref.as_deref() else {
            return Outcome::Skipped(SkipReason::new(
                FailureKind::Validation,
                "no detail reference",
            ));
        };
        let url = match self.resolve_ref(raw) {
            Ok(url) => url,
            Err(e) => return Outcome::from_error(e),
        };

        if let Err(e) = render.open(&url).await {
            warn!(%url, error = %e, "detail fetch failed");
            return Outcome::from_error(e);
        }
        if let Err(e) = render.wait_for_ready(&self.ready_selector, self.timeout).await {
            warn!(%url, error = %e, "detail page not ready, parsing what is there");
        }
        let html = match render.current_content().await {
            Ok(html) => html,
            Err(e) => return Outcome::from_error(e),
        };

        if let Some(code) = extract_contract_code(&html) {
            op.contract_code = Some(code);
        }
        let items = extract_line_items(&html);
        if !items.is_empty() {
            op.line_items = items;
        }
        debug!(
            contract_code = ?op.contract_code.as_ref().map(ContractCode::as_str),
            line_items = op.line_items.len(),
            "detail parsed"
        );
        Outcome::Ok(())
    }

    /// Enrich `records` one at a time, in order.
    ///
    /// Only fatal errors abort the batch; everything else is counted.
    pub async fn enrich_all(
        &self,
        render: &mut dyn RenderCapability,
        records: &mut [Opportunity],
        cancel: &CancelFlag,
    ) -> Result<EnrichmentReport> {
        let mut report = EnrichmentReport::default();

        for op in records.iter_mut() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if op.detail_ref.is_none() {
                report.without_ref += 1;
                continue;
            }
            match self.enrich(render, op).await {
                Outcome::Ok(()) => {
                    report.enriched += 1;
                    if op.contract_code.is_some() {
                        report.with_contract_code += 1;
                    }
                }
                Outcome::Skipped(reason) => report.failures.push(reason),
                Outcome::Fatal(e) => return Err(e),
            }
        }

        info!(
            enriched = report.enriched,
            with_contract_code = report.with_contract_code,
            without_ref = report.without_ref,
            failed = report.failures.len(),
            "detail enrichment finished"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Find the contract code: next to its `<strong>` label first, then anywhere
/// in the document text.
pub fn extract_contract_code(html: &str) -> Option<ContractCode> {
    let doc = Html::parse_document(html);

    let near_label = doc
        .select(&STRONG_SEL)
        .filter(|strong| cell_text(*strong).contains(CONTRACT_CODE_LABEL))
        .filter_map(|strong| strong.parent().and_then(ElementRef::wrap))
        .find_map(|parent| match_code(&cell_text(parent)));

    near_label.or_else(|| match_code(&cell_text(doc.root_element())))
}

fn match_code(text: &str) -> Option<ContractCode> {
    CONTRACT_CODE_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| ContractCode::parse(m.as_str()))
}

/// Line items from the first table: header row skipped, rows with fewer than
/// five cells ignored.
pub fn extract_line_items(html: &str) -> Vec<LineItem> {
    let doc = Html::parse_document(html);
    let Some(table) = doc.select(&TABLE_SEL).next() else {
        return Vec::new();
    };

    table
        .select(&ROW_SEL)
        .skip(1)
        .filter_map(|row| {
            let cells: Vec<String> = row.select(&CELL_SEL).map(cell_text).collect();
            if cells.len() < LINE_ITEM_CELLS {
                return None;
            }
            let mut cells = cells.into_iter();
            Some(LineItem {
                index: cells.next().unwrap_or_default(),
                classification_code: cells.next().unwrap_or_default(),
                description: cells.next().unwrap_or_default(),
                unit: cells.next().unwrap_or_default(),
                quantity: cells.next().unwrap_or_default(),
            })
        })
        .collect()
}
