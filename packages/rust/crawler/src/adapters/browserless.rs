//! Browserless render adapter.
//!
//! Browserless exposes a stateless HTTP API, so the session is emulated: the
//! adapter remembers the opened URL and target page and replays them on each
//! load. Page 1 uses `/content`; later pages run a small Puppeteer function on
//! `/function` that clicks the pagination control forward.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use tenderscope_shared::{Result, TenderScopeError};
use tenderscope_transport::HttpTransport;

use crate::render::RenderCapability;

/// Puppeteer function executed by `/function` to reach page `context.index`.
const NAVIGATE_FN: &str = r#"export default async function ({ page, context }) {
  await page.goto(context.url, { waitUntil: "networkidle2" });
  if (context.selector) {
    await page.waitForSelector(context.selector, { timeout: context.timeout });
  }
  for (let current = 1; current < context.index; current++) {
    const next = await page.$(`${context.pagination} a.paginate_button.next`);
    if (!next) {
      throw new Error(`pagination stopped at page ${current}`);
    }
    await next.click();
    await page.waitForNetworkIdle({ idleTime: 500, timeout: context.timeout });
  }
  return { data: await page.content(), type: "text/html" };
}"#;

/// Render session backed by a Browserless instance.
pub struct BrowserlessRenderer {
    transport: HttpTransport,
    base_url: String,
    token: Option<String>,
    pagination_selector: String,
    opened: Option<Url>,
    page: u32,
    content: Option<String>,
}

impl BrowserlessRenderer {
    pub fn new(transport: HttpTransport, base_url: &str, token: Option<String>) -> Result<Self> {
        Url::parse(base_url).map_err(|e| {
            TenderScopeError::config(format!("invalid browserless_url '{base_url}': {e}"))
        })?;
        Ok(Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            pagination_selector: "#table_id_paginate".into(),
            opened: None,
            page: 1,
            content: None,
        })
    }

    /// Override the pagination control selector used when clicking forward.
    pub fn with_pagination_selector(mut self, selector: &str) -> Self {
        self.pagination_selector = selector.to_string();
        self
    }

    fn endpoint(&self, name: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{name}", self.base_url))
            .map_err(|e| TenderScopeError::Render(format!("bad browserless endpoint: {e}")))?;
        if let Some(token) = &self.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }

    /// Replay the session state against Browserless and return the reply.
    async fn load(
        &self,
        wait: Option<(&str, Duration)>,
    ) -> Result<tenderscope_transport::HttpReply> {
        let target = self
            .opened
            .as_ref()
            .ok_or_else(|| TenderScopeError::Render("no document opened".into()))?;

        if self.page <= 1 {
            let mut body = json!({ "url": target.as_str() });
            if let Some((selector, timeout)) = wait {
                body["waitForSelector"] = json!({
                    "selector": selector,
                    "timeout": timeout.as_millis() as u64,
                });
            }
            self.transport
                .post_json_with_status(&self.endpoint("content")?, &body)
                .await
        } else {
            let (selector, timeout) = match wait {
                Some((s, t)) => (Value::String(s.to_string()), t),
                None => (Value::Null, Duration::from_secs(30)),
            };
            let body = json!({
                "code": NAVIGATE_FN,
                "context": {
                    "url": target.as_str(),
                    "index": self.page,
                    "pagination": self.pagination_selector,
                    "selector": selector,
                    "timeout": timeout.as_millis() as u64,
                },
            });
            self.transport
                .post_json_with_status(&self.endpoint("function")?, &body)
                .await
        }
    }
}

#[async_trait]
impl RenderCapability for BrowserlessRenderer {
    async fn open(&mut self, url: &Url) -> Result<()> {
        debug!(%url, "browserless open");
        self.opened = Some(url.clone());
        self.page = 1;
        self.content = None;
        Ok(())
    }

    async fn wait_for_ready(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let reply = self.load(Some((selector, timeout))).await?;
        if reply.is_success() {
            self.content = Some(reply.body);
            return Ok(());
        }
        warn!(
            status = reply.status,
            page = self.page,
            selector,
            body = %reply.body.chars().take(200).collect::<String>(),
            "browserless wait failed"
        );
        Err(TenderScopeError::Timeout {
            selector: selector.to_string(),
            waited_ms: timeout.as_millis() as u64,
        })
    }

    async fn current_content(&mut self) -> Result<String> {
        if let Some(content) = &self.content {
            return Ok(content.clone());
        }
        let reply = self.load(None).await?;
        if !reply.is_success() {
            return Err(TenderScopeError::Render(format!(
                "browserless returned HTTP {} for page {}",
                reply.status, self.page
            )));
        }
        self.content = Some(reply.body.clone());
        Ok(reply.body)
    }

    async fn navigate(&mut self, index: u32) -> Result<()> {
        if self.opened.is_none() {
            return Err(TenderScopeError::Render("navigate before open".into()));
        }
        if index != self.page {
            self.page = index;
            self.content = None;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "browserless"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenderscope_shared::TransportConfig;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport() -> HttpTransport {
        HttpTransport::new(&TransportConfig {
            max_retries: 0,
            backoff_base_ms: 1,
            ..TransportConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn first_page_uses_content_endpoint() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/content"))
            .and(query_param("token", "secret"))
            .and(body_partial_json(json!({
                "url": "https://portal.example/listado",
                "waitForSelector": { "selector": "#table_id" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("<table id=\"table_id\"></table>"))
            .expect(1)
            .mount(&server)
            .await;

        let mut render =
            BrowserlessRenderer::new(transport(), &server.uri(), Some("secret".into())).unwrap();
        render
            .open(&Url::parse("https://portal.example/listado").unwrap())
            .await
            .unwrap();
        render
            .wait_for_ready("#table_id", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(render.current_content().await.unwrap().contains("table_id"));
    }

    #[tokio::test]
    async fn later_pages_use_function_endpoint() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/function"))
            .and(body_partial_json(json!({ "context": { "index": 3 } })))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>page 3</p>"))
            .expect(1)
            .mount(&server)
            .await;

        let mut render = BrowserlessRenderer::new(transport(), &server.uri(), None).unwrap();
        render
            .open(&Url::parse("https://portal.example/listado").unwrap())
            .await
            .unwrap();
        render.navigate(3).await.unwrap();
        assert_eq!(render.current_content().await.unwrap(), "<p>page 3</p>");
    }

    #[tokio::test]
    async fn failed_wait_maps_to_timeout() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/content"))
            .respond_with(ResponseTemplate::new(408).set_body_string("Timeout waiting for selector"))
            .mount(&server)
            .await;

        let mut render = BrowserlessRenderer::new(transport(), &server.uri(), None).unwrap();
        render
            .open(&Url::parse("https://portal.example/listado").unwrap())
            .await
            .unwrap();
        let err = render
            .wait_for_ready("#table_id", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, TenderScopeError::Timeout { waited_ms: 2000, .. }));
    }
}
