//! The render capability: the only view the pipeline has of a rendering engine.
//!
//! A session is stateful. `open` loads a URL, `navigate` moves the loaded
//! listing to another page, `wait_for_ready` blocks until a selector is
//! present (bounded), and `current_content` returns the rendered HTML.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use tenderscope_shared::Result;

/// A dynamic-content rendering session.
///
/// Implementations report a failed bounded wait as
/// [`TenderScopeError::Timeout`](tenderscope_shared::TenderScopeError::Timeout)
/// so callers can skip the page and keep going.
#[async_trait]
pub trait RenderCapability: Send {
    /// Load `url` as the session's current document.
    async fn open(&mut self, url: &Url) -> Result<()>;

    /// Wait until `selector` matches in the current document, up to `timeout`.
    async fn wait_for_ready(&mut self, selector: &str, timeout: Duration) -> Result<()>;

    /// Rendered HTML of the current document.
    async fn current_content(&mut self) -> Result<String>;

    /// Move the opened listing to page `index` (1-based).
    async fn navigate(&mut self, index: u32) -> Result<()>;

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;
}
