//! Render capability adapters.
//!
//! - [`StaticRenderer`]: plain HTTP, the page index travels as a query parameter.
//! - [`BrowserlessRenderer`]: a Browserless headless-browser service over HTTP.

mod browserless;
mod static_http;

pub use browserless::BrowserlessRenderer;
pub use static_http::StaticRenderer;

use tenderscope_shared::{RenderBackend, RenderConfig, Result};
use tenderscope_transport::HttpTransport;

use crate::render::RenderCapability;

/// Build the adapter selected by `[render] backend`.
///
/// `pagination_selector` is the listing's pagination control, which the
/// Browserless adapter clicks through.
pub fn build_renderer(
    config: &RenderConfig,
    pagination_selector: &str,
    transport: HttpTransport,
) -> Result<Box<dyn RenderCapability>> {
    let renderer: Box<dyn RenderCapability> = match config.backend {
        RenderBackend::Static => Box::new(StaticRenderer::new(transport, &config.page_param)),
        RenderBackend::Browserless => {
            let token = std::env::var(&config.browserless_token_env)
                .ok()
                .filter(|t| !t.is_empty());
            Box::new(
                BrowserlessRenderer::new(transport, &config.browserless_url, token)?
                    .with_pagination_selector(pagination_selector),
            )
        }
    };
    tracing::debug!(adapter = renderer.name(), "render adapter selected");
    Ok(renderer)
}
