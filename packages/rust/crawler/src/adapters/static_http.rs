//! Plain-HTTP render adapter.
//!
//! Works for listings that render server-side. Waiting degenerates to a
//! presence check on the fetched document.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use tenderscope_shared::{Result, TenderScopeError};
use tenderscope_transport::HttpTransport;

use crate::render::RenderCapability;

/// Fetches each page with a GET; `navigate(n)` re-fetches the opened URL with
/// `<page_param>=n`.
pub struct StaticRenderer {
    transport: HttpTransport,
    page_param: String,
    opened: Option<Url>,
    content: Option<String>,
}

impl StaticRenderer {
    pub fn new(transport: HttpTransport, page_param: &str) -> Self {
        Self {
            transport,
            page_param: page_param.to_string(),
            opened: None,
            content: None,
        }
    }
}

#[async_trait]
impl RenderCapability for StaticRenderer {
    async fn open(&mut self, url: &Url) -> Result<()> {
        debug!(%url, "static open");
        self.content = None;
        let body = self.transport.fetch(url, &[]).await?;
        self.opened = Some(url.clone());
        self.content = Some(body);
        Ok(())
    }

    async fn wait_for_ready(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let content = self
            .content
            .as_deref()
            .ok_or_else(|| TenderScopeError::Render("wait before open".into()))?;
        let sel = Selector::parse(selector)
            .map_err(|e| TenderScopeError::Render(format!("invalid selector `{selector}`: {e}")))?;

        if Html::parse_document(content).select(&sel).next().is_some() {
            Ok(())
        } else {
            Err(TenderScopeError::Timeout {
                selector: selector.to_string(),
                waited_ms: timeout.as_millis() as u64,
            })
        }
    }

    async fn current_content(&mut self) -> Result<String> {
        self.content
            .clone()
            .ok_or_else(|| TenderScopeError::Render("no document loaded".into()))
    }

    async fn navigate(&mut self, index: u32) -> Result<()> {
        let url = self
            .opened
            .clone()
            .ok_or_else(|| TenderScopeError::Render("navigate before open".into()))?;
        let index = index.to_string();
        self.content = None;
        let body = self
            .transport
            .fetch(&url, &[(self.page_param.as_str(), index.as_str())])
            .await?;
        self.content = Some(body);
        Ok(())
    }

    fn name(&self) -> &str {
        "static"
    }
}
