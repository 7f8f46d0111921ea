//! Companion open-data source: keyword search plus per-record tender lookup.
//!
//! For every keyword of every category the search API is queried once; each
//! hit is then completed from the record API (status, deadline, budget).
//! A failing search or record lookup skips that item and the run continues.

mod payload;

use std::collections::HashSet;
use std::time::Duration;

use chrono::{Datelike, Utc};
use tracing::{debug, info, instrument, warn};
use url::Url;

use tenderscope_shared::{
    CancelFlag, CategoryConfig, OpenDataConfig, Opportunity, Result, SkipReason, Source,
    TenderScopeError,
};
use tenderscope_transport::HttpTransport;

pub use payload::{RecordResponse, SearchHit, SearchResponse, TenderSummary};

// ---------------------------------------------------------------------------
// OpenDataResult
// ---------------------------------------------------------------------------

/// Records gathered from the open-data API in one run.
#[derive(Debug, Clone, Default)]
pub struct OpenDataResult {
    /// One record per OCID, in discovery order.
    pub records: Vec<Opportunity>,
    /// Search queries issued.
    pub searches: usize,
    /// Hits returned across all searches (before dedup).
    pub hits: usize,
    /// Failed searches and record lookups.
    pub failures: Vec<SkipReason>,
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// OpenDataClient
// ---------------------------------------------------------------------------

/// Client for the search and record endpoints.
pub struct OpenDataClient {
    transport: HttpTransport,
    search_url: Url,
    record_url: Url,
    year: i32,
    record_delay: Duration,
}

impl OpenDataClient {
    pub fn new(transport: HttpTransport, config: &OpenDataConfig) -> Result<Self> {
        let parse = |raw: &str| {
            Url::parse(raw)
                .map_err(|e| TenderScopeError::config(format!("invalid open-data url '{raw}': {e}")))
        };
        let year = if config.year == 0 {
            Utc::now().year()
        } else {
            config.year
        };

        Ok(Self {
            transport,
            search_url: parse(&config.search_url)?,
            record_url: parse(&config.record_url)?,
            year,
            record_delay: Duration::from_millis(config.record_delay_ms),
        })
    }

    /// Year the searches are scoped to.
    pub fn year(&self) -> i32 {
        self.year
    }

    /// One page of search results for `keyword`.
    pub async fn search(&self, keyword: &str, page: u32) -> Result<Vec<SearchHit>> {
        let year = self.year.to_string();
        let page = page.to_string();
        let response: SearchResponse = self
            .transport
            .fetch_json(
                &self.search_url,
                &[("year", year.as_str()), ("search", keyword), ("page", page.as_str())],
            )
            .await?;
        Ok(response.data)
    }

    /// Tender details for one OCID.
    pub async fn record(&self, ocid: &str) -> Result<TenderSummary> {
        let response: RecordResponse = self
            .transport
            .fetch_json(&self.record_url, &[("ocid", ocid)])
            .await?;
        Ok(response.tender_summary())
    }

    /// Search every keyword of every category and complete each new hit.
    ///
    /// An OCID surfaced by several keywords is looked up once and keeps the
    /// first keyword that found it.
    #[instrument(skip_all, fields(year = self.year))]
    pub async fn collect(
        &self,
        categories: &[CategoryConfig],
        cancel: &CancelFlag,
    ) -> OpenDataResult {
        let mut result = OpenDataResult::default();
        let mut seen = HashSet::new();

        'outer: for category in categories {
            for keyword in &category.keywords {
                if cancel.is_cancelled() {
                    result.cancelled = true;
                    break 'outer;
                }

                result.searches += 1;
                let hits = match self.search(keyword, 1).await {
                    Ok(hits) => hits,
                    Err(e) => {
                        warn!(keyword = %keyword, error = %e, "search failed");
                        result.failures.push(SkipReason::from(&e));
                        continue;
                    }
                };
                debug!(keyword = %keyword, hits = hits.len(), "search returned");
                result.hits += hits.len();

                for hit in hits {
                    let Some(ocid) = hit.ocid.clone().filter(|o| !o.trim().is_empty()) else {
                        continue;
                    };
                    if !seen.insert(ocid.clone()) {
                        continue;
                    }
                    if cancel.is_cancelled() {
                        result.cancelled = true;
                        break 'outer;
                    }
                    if !self.record_delay.is_zero() {
                        tokio::time::sleep(self.record_delay).await;
                    }

                    match self.record(&ocid).await {
                        Ok(tender) => result.records.push(to_opportunity(ocid, &hit, tender, keyword)),
                        Err(e) => {
                            warn!(%ocid, error = %e, "record lookup failed");
                            result.failures.push(SkipReason::from(&e));
                        }
                    }
                }
            }
        }

        info!(
            searches = result.searches,
            hits = result.hits,
            records = result.records.len(),
            failures = result.failures.len(),
            "open-data collection finished"
        );
        result
    }
}

fn to_opportunity(ocid: String, hit: &SearchHit, tender: TenderSummary, keyword: &str) -> Opportunity {
    let mut op = Opportunity::new(ocid, Source::OpenData);
    op.description = hit.summary();
    op.buyer = hit.buyer_name.clone().unwrap_or_default();
    op.need_type = hit.internal_type.clone().unwrap_or_default();
    op.published_at = hit.date.clone().unwrap_or_default();
    op.status = tender.status.unwrap_or_default();
    op.deadline = tender.deadline.unwrap_or_default();
    op.budget = tender.budget;
    op.search_keyword = Some(keyword.to_string());
    op
}
