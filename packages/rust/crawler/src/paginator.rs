//! Sequential pagination control over a render session.
//!
//! Pages are visited strictly in increasing order starting at 1, which is the
//! view produced by opening the listing. Asking for a page at or before the
//! last one visited is rejected instead of being left undefined.

use std::time::Duration;

use scraper::{Html, Selector};
use tracing::{debug, instrument, warn};

use tenderscope_shared::{ListingConfig, Outcome, Result, SkipReason, TenderScopeError};

use crate::extractor::cell_text;
use crate::render::RenderCapability;

/// Discovered page count. `warning` is set when discovery degraded to 1.
#[derive(Debug)]
pub struct PageCount {
    pub total: u32,
    pub warning: Option<TenderScopeError>,
}

/// Drives a render session through the listing's pages.
pub struct Paginator<'r> {
    render: &'r mut dyn RenderCapability,
    table_selector: String,
    pagination_selector: String,
    ready_timeout: Duration,
    last_visited: u32,
}

impl<'r> Paginator<'r> {
    /// Wrap a session whose listing is already opened on page 1.
    pub fn new(render: &'r mut dyn RenderCapability, listing: &ListingConfig) -> Self {
        Self {
            render,
            table_selector: listing.table_selector.clone(),
            pagination_selector: listing.pagination_selector.clone(),
            ready_timeout: Duration::from_secs(listing.ready_timeout_secs),
            last_visited: 0,
        }
    }

    /// Total pages reported by the pagination control, never less than 1.
    ///
    /// Failure is not raised: the count degrades to 1 and the cause is
    /// returned as a warning.
    pub async fn discover_total_pages(&mut self) -> PageCount {
        let discovered = match self.render.current_content().await {
            Ok(html) => count_pages(&html, &self.pagination_selector),
            Err(e) => Err(TenderScopeError::Pagination(format!(
                "listing content unavailable: {e}"
            ))),
        };
        match discovered {
            Ok(total) => {
                debug!(total, "pagination discovered");
                PageCount {
                    total,
                    warning: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "page count undiscoverable, processing a single page");
                PageCount {
                    total: 1,
                    warning: Some(e),
                }
            }
        }
    }

    /// Move to page `index` and return its rendered content once the table
    /// is ready.
    #[instrument(skip_all, fields(index = index))]
    pub async fn navigate_to(&mut self, index: u32) -> Outcome<String> {
        if index == 0 || index <= self.last_visited {
            let err = TenderScopeError::Pagination(format!(
                "page {index} requested after page {}",
                self.last_visited
            ));
            return Outcome::Skipped(SkipReason::from(&err));
        }
        self.last_visited = index;

        if index > 1 {
            if let Err(e) = self.render.navigate(index).await {
                warn!(index, error = %e, "navigation failed");
                return Outcome::from_error(e);
            }
            if let Err(e) = self
                .render
                .wait_for_ready(&self.table_selector, self.ready_timeout)
                .await
            {
                warn!(index, error = %e, "page not ready, skipping");
                return Outcome::from_error(e);
            }
        }

        self.render.current_content().await.into()
    }

    /// Last page index handed out, `0` before the first.
    pub fn last_visited(&self) -> u32 {
        self.last_visited
    }
}

/// Largest numeric button label inside the pagination control.
pub fn count_pages(html: &str, pagination_selector: &str) -> Result<u32> {
    let control_sel = Selector::parse(pagination_selector).map_err(|e| {
        TenderScopeError::config(format!(
            "invalid pagination selector `{pagination_selector}`: {e}"
        ))
    })?;
    let button_sel = Selector::parse("a.paginate_button").expect("valid selector");

    let doc = Html::parse_document(html);
    let control = doc.select(&control_sel).next().ok_or_else(|| {
        TenderScopeError::Pagination(format!("no element matches `{pagination_selector}`"))
    })?;

    control
        .select(&button_sel)
        .filter_map(|b| cell_text(b).parse::<u32>().ok())
        .filter(|n| *n > 0)
        .max()
        .ok_or_else(|| TenderScopeError::Pagination("no numeric pagination buttons".into()))
}
