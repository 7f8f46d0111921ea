//! Listing crawl loop.
//!
//! Opens the listing, discovers how many pages it has, and walks them in
//! order through the [`Paginator`], extracting rows from each. Per-page
//! failures are counted and the crawl moves on.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, instrument, warn};
use url::Url;

use tenderscope_shared::{
    CancelFlag, ListingConfig, Opportunity, Outcome, Result, SkipReason, TenderScopeError,
};

use crate::extractor::extract_rows;
use crate::paginator::Paginator;
use crate::render::RenderCapability;

// ---------------------------------------------------------------------------
// ListingCrawlResult
// ---------------------------------------------------------------------------

/// Summary of a completed listing crawl.
#[derive(Debug, Clone, Default)]
pub struct ListingCrawlResult {
    /// Extracted rows, pages in order, rows in document order.
    pub rows: Vec<Opportunity>,
    /// Page count reported by the pagination control (1 if undiscoverable).
    pub pages_discovered: u32,
    /// Pages successfully read and parsed.
    pub pages_processed: u32,
    /// Pages that timed out or failed to parse.
    pub pages_skipped: u32,
    /// Rows dropped for having the wrong number of columns.
    pub shape_mismatches: usize,
    /// Rows dropped for an empty identifier.
    pub missing_ids: usize,
    /// Non-fatal failures, in the order they happened.
    pub failures: Vec<SkipReason>,
    /// Stopped early on cancellation.
    pub cancelled: bool,
    pub duration: Duration,
}

impl ListingCrawlResult {
    fn skip(&mut self, reason: SkipReason) {
        self.pages_skipped += 1;
        self.failures.push(reason);
    }
}

// ---------------------------------------------------------------------------
// ListingCrawler
// ---------------------------------------------------------------------------

/// Sequential crawler over the paginated listing.
pub struct ListingCrawler {
    listing: ListingConfig,
    /// `0` means every discovered page.
    max_pages: u32,
}

impl ListingCrawler {
    pub fn new(listing: ListingConfig, max_pages: u32) -> Self {
        Self { listing, max_pages }
    }

    /// Pages to process given the discovered total.
    pub fn page_limit(&self, discovered: u32) -> u32 {
        if self.max_pages == 0 {
            discovered
        } else {
            discovered.min(self.max_pages)
        }
    }

    /// Crawl the listing through `render`.
    ///
    /// Returns `Err` only for fatal errors; an unreachable listing yields an
    /// empty result with the failure recorded.
    #[instrument(skip_all, fields(url = %self.listing.url, adapter = render.name()))]
    pub async fn crawl(
        &self,
        render: &mut dyn RenderCapability,
        cancel: &CancelFlag,
    ) -> Result<ListingCrawlResult> {
        let start = Instant::now();
        let mut result = ListingCrawlResult::default();

        let url = Url::parse(&self.listing.url).map_err(|e| {
            TenderScopeError::config(format!("invalid listing url '{}': {e}", self.listing.url))
        })?;

        let ready_timeout = Duration::from_secs(self.listing.ready_timeout_secs);
        let opened = match render.open(&url).await {
            Ok(()) => render
                .wait_for_ready(&self.listing.table_selector, ready_timeout)
                .await,
            Err(e) => Err(e),
        };
        if let Err(e) = opened {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(error = %e, "listing unavailable");
            result.skip(SkipReason::from(&e));
            result.duration = start.elapsed();
            return Ok(result);
        }

        let mut paginator = Paginator::new(render, &self.listing);
        let count = paginator.discover_total_pages().await;
        if let Some(warning) = &count.warning {
            result.failures.push(SkipReason::from(warning));
        }
        result.pages_discovered = count.total;
        let limit = self.page_limit(count.total);

        info!(
            discovered = count.total,
            limit,
            page_delay_ms = self.listing.page_delay_ms,
            "starting listing crawl"
        );

        for index in 1..=limit {
            if cancel.is_cancelled() {
                warn!(index, "cancelled, stopping listing crawl");
                result.cancelled = true;
                break;
            }
            if index > 1 && self.listing.page_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.listing.page_delay_ms)).await;
            }

            let html = match paginator.navigate_to(index).await {
                Outcome::Ok(html) => html,
                Outcome::Skipped(reason) => {
                    result.skip(reason);
                    continue;
                }
                Outcome::Fatal(e) => return Err(e),
            };

            match extract_rows(&html, &self.listing.table_selector, Utc::now()) {
                Ok(page) => {
                    info!(
                        index,
                        rows = page.rows.len(),
                        shape_mismatches = page.shape_mismatches,
                        "page extracted"
                    );
                    result.pages_processed += 1;
                    result.shape_mismatches += page.shape_mismatches;
                    result.missing_ids += page.missing_ids;
                    result.rows.extend(page.rows);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(index, error = %e, "page skipped");
                    result.skip(SkipReason::from(&e));
                }
            }
        }

        result.duration = start.elapsed();
        info!(
            pages_processed = result.pages_processed,
            pages_skipped = result.pages_skipped,
            rows = result.rows.len(),
            shape_mismatches = result.shape_mismatches,
            duration_ms = result.duration.as_millis() as u64,
            "listing crawl completed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixtureRenderer, LISTING_URL};
    use tenderscope_shared::FailureKind;

    fn crawler(max_pages: u32) -> ListingCrawler {
        let listing = ListingConfig {
            url: LISTING_URL.into(),
            page_delay_ms: 0,
            ..ListingConfig::default()
        };
        ListingCrawler::new(listing, max_pages)
    }

    fn ids(result: &ListingCrawlResult) -> Vec<&str> {
        result.rows.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn visits_every_page_in_order() {
        let mut render = FixtureRenderer::from_fixtures(3);
        let result = crawler(0).crawl(&mut render, &CancelFlag::new()).await.unwrap();

        assert_eq!(result.pages_discovered, 3);
        assert_eq!(result.pages_processed, 3);
        assert_eq!(result.pages_skipped, 0);
        assert_eq!(render.navigations, vec![2, 3]);
        assert_eq!(
            ids(&result),
            ["NC-0001", "NC-0002", "NC-0003", "NC-0004", "NC-0005", "NC-0006"]
        );
        assert_eq!(result.shape_mismatches, 1);
        assert_eq!(result.missing_ids, 1);
    }

    #[tokio::test]
    async fn max_pages_caps_the_walk() {
        let mut render = FixtureRenderer::from_fixtures(3);
        let result = crawler(2).crawl(&mut render, &CancelFlag::new()).await.unwrap();

        assert_eq!(result.pages_processed, 2);
        assert_eq!(render.navigations, vec![2]);
        assert_eq!(result.rows.len(), 5);
    }

    #[tokio::test]
    async fn unready_page_is_skipped_and_counted() {
        let mut render = FixtureRenderer::from_fixtures(3).with_unready_page(2);
        let result = crawler(0).crawl(&mut render, &CancelFlag::new()).await.unwrap();

        assert_eq!(result.pages_processed, 2);
        assert_eq!(result.pages_skipped, 1);
        assert_eq!(result.failures[0].kind, FailureKind::Timeout);
        assert_eq!(ids(&result), ["NC-0001", "NC-0002", "NC-0003", "NC-0006"]);
    }

    #[tokio::test]
    async fn unreachable_listing_yields_empty_result() {
        let mut render = FixtureRenderer::from_fixtures(1).with_unready_page(1);
        let result = crawler(0).crawl(&mut render, &CancelFlag::new()).await.unwrap();

        assert!(result.rows.is_empty());
        assert_eq!(result.pages_skipped, 1);
        assert_eq!(result.pages_discovered, 0);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_page() {
        let mut render = FixtureRenderer::from_fixtures(3);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = crawler(0).crawl(&mut render, &cancel).await.unwrap();

        assert!(result.cancelled);
        assert!(result.rows.is_empty());
        assert!(render.navigations.is_empty());
    }
}
