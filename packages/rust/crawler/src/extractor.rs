//! Record extraction from a rendered listing page.
//!
//! The listing table has ten business columns, in order: need type, need
//! code, publish date, province/canton, description, status, deadline, buyer,
//! delivery address, contact. The buyer cell may wrap a link to the detail
//! page.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use tenderscope_shared::{Opportunity, Result, Source, TenderScopeError};

/// Business columns per listing row.
pub const LISTING_COLUMNS: usize = 10;

/// Index of the buyer column, whose link carries the detail reference.
const BUYER_COLUMN: usize = 7;

static ROW_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tbody tr").expect("valid selector"));
static CELL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td").expect("valid selector"));
static HEADER_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("thead tr th").expect("valid selector"));
static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("valid selector"));

/// Rows parsed from one listing page plus what was dropped.
#[derive(Debug, Clone, Default)]
pub struct PageExtraction {
    pub rows: Vec<Opportunity>,
    /// Rows whose cell count was not [`LISTING_COLUMNS`].
    pub shape_mismatches: usize,
    /// Rows with the right shape but an empty need code.
    pub missing_ids: usize,
}

/// Parse the listing table matched by `table_selector` out of `html`.
///
/// Never fails on individual rows; only a missing table is an error.
pub fn extract_rows(
    html: &str,
    table_selector: &str,
    produced_at: DateTime<Utc>,
) -> Result<PageExtraction> {
    let table_sel = Selector::parse(table_selector).map_err(|e| {
        TenderScopeError::config(format!("invalid table selector `{table_selector}`: {e}"))
    })?;
    let doc = Html::parse_document(html);
    let table = doc
        .select(&table_sel)
        .next()
        .ok_or_else(|| TenderScopeError::parse(format!("no table matches `{table_selector}`")))?;

    let header_count = table.select(&HEADER_SEL).count();
    if header_count != 0 && header_count != LISTING_COLUMNS {
        warn!(
            header_count,
            expected = LISTING_COLUMNS,
            "listing header shape differs; rows are still parsed by position"
        );
    }

    let mut out = PageExtraction::default();
    for row in table.select(&ROW_SEL) {
        let cells: Vec<ElementRef<'_>> = row.select(&CELL_SEL).collect();
        if cells.len() != LISTING_COLUMNS {
            debug!(cells = cells.len(), "dropping row with unexpected shape");
            out.shape_mismatches += 1;
            continue;
        }

        let mut texts: Vec<String> = cells.iter().map(|c| cell_text(*c)).collect();
        let mut detail_ref = None;
        if let Some(link) = cells[BUYER_COLUMN].select(&LINK_SEL).next() {
            texts[BUYER_COLUMN] = cell_text(link);
            detail_ref = link
                .value()
                .attr("href")
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string);
        }

        if texts[1].is_empty() {
            out.missing_ids += 1;
            continue;
        }

        let mut texts = texts.into_iter();
        let mut next = || texts.next().unwrap_or_default();
        let need_type = next();
        let mut op = Opportunity::new(next(), Source::Listing);
        op.need_type = need_type;
        op.published_at = next();
        op.province_canton = next();
        op.description = next();
        op.status = next();
        op.deadline = next();
        op.buyer = next();
        op.delivery_address = next();
        op.contact = next();
        op.detail_ref = detail_ref;
        op.produced_at = produced_at;
        out.rows.push(op);
    }

    Ok(out)
}

/// Element text with whitespace runs collapsed.
pub(crate) fn cell_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
