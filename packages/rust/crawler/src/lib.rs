//! Listing crawl, record extraction, and detail enrichment.
//!
//! This crate provides:
//! - [`RenderCapability`], the interface to a dynamic-content rendering engine
//! - [`adapters`]: static-HTTP and Browserless implementations
//! - [`Paginator`]: strictly sequential page navigation
//! - [`extract_rows`]: listing table parsing with shape validation
//! - [`DetailEnricher`]: contract code and line items from detail pages
//! - [`ListingCrawler`]: the page loop tying the above together

pub mod adapters;
pub mod detail;
pub mod engine;
pub mod extractor;
pub mod paginator;
pub mod render;

#[cfg(test)]
mod testing;

pub use adapters::{BrowserlessRenderer, StaticRenderer, build_renderer};
pub use detail::{DetailEnricher, EnrichmentReport, extract_contract_code, extract_line_items};
pub use engine::{ListingCrawlResult, ListingCrawler};
pub use extractor::{LISTING_COLUMNS, PageExtraction, extract_rows};
pub use paginator::{PageCount, Paginator, count_pages};
pub use render::RenderCapability;
