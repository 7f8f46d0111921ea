//! In-memory render session for tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use tenderscope_shared::{Result, TenderScopeError};

use crate::render::RenderCapability;

pub(crate) const LISTING_URL: &str = "https://portal.example/ProcesoContratacion/compras/NCO/FrmNCOListado.cpe";

/// Serves listing pages by index and detail pages by URL.
pub(crate) struct FixtureRenderer {
    pages: Vec<String>,
    details: HashMap<String, String>,
    unready_pages: Vec<u32>,
    current_page: u32,
    document: Option<String>,
    /// Every page index passed to `navigate`, in call order.
    pub navigations: Vec<u32>,
    /// Every URL passed to `open`, in call order.
    pub opened: Vec<String>,
}

impl FixtureRenderer {
    pub fn new(pages: Vec<String>) -> Self {
        Self {
            pages,
            details: HashMap::new(),
            unready_pages: Vec::new(),
            current_page: 0,
            document: None,
            navigations: Vec::new(),
            opened: Vec::new(),
        }
    }

    /// Load `fixtures/html/listing_page_{1..=count}.html`.
    pub fn from_fixtures(count: u32) -> Self {
        let pages = (1..=count)
            .map(|n| {
                let path = format!("../../../fixtures/html/listing_page_{n}.html");
                std::fs::read_to_string(&path)
                    .unwrap_or_else(|_| panic!("missing fixture: {path}"))
            })
            .collect();
        Self::new(pages)
    }

    pub fn with_unready_page(mut self, index: u32) -> Self {
        self.unready_pages.push(index);
        self
    }

    pub fn with_detail(mut self, url: &str, html: &str) -> Self {
        self.details.insert(url.to_string(), html.to_string());
        self
    }

    pub async fn open_first(&mut self) {
        self.open(&Url::parse(LISTING_URL).unwrap()).await.unwrap();
    }
}

#[async_trait]
impl RenderCapability for FixtureRenderer {
    async fn open(&mut self, url: &Url) -> Result<()> {
        self.opened.push(url.to_string());
        if let Some(html) = self.details.get(url.as_str()) {
            self.current_page = 0;
            self.document = Some(html.clone());
            return Ok(());
        }
        if url.as_str() != LISTING_URL {
            return Err(TenderScopeError::Transport(format!("{url}: HTTP 404 Not Found")));
        }
        self.current_page = 1;
        self.document = self.pages.first().cloned();
        Ok(())
    }

    async fn wait_for_ready(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        if self.document.is_none() || self.unready_pages.contains(&self.current_page) {
            return Err(TenderScopeError::Timeout {
                selector: selector.to_string(),
                waited_ms: timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    async fn current_content(&mut self) -> Result<String> {
        self.document
            .clone()
            .ok_or_else(|| TenderScopeError::Render("no document".into()))
    }

    async fn navigate(&mut self, index: u32) -> Result<()> {
        self.navigations.push(index);
        self.current_page = index;
        self.document = (index as usize)
            .checked_sub(1)
            .and_then(|i| self.pages.get(i))
            .cloned();
        match self.document {
            Some(_) => Ok(()),
            None => Err(TenderScopeError::Render(format!("no page {index}"))),
        }
    }

    fn name(&self) -> &str {
        "fixture"
    }
}
