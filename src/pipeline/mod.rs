//! Per-item conversion: one HTML body or one attachment → one PDF.
//!
//! ## Data Flow
//!
//! ```text
//! body:        cid ──▶ cache ──▶ primary renderer ──▶ fallback renderer
//! attachment:        cache ──▶ registry strategies … ──▶ placeholder
//! images:      extract (data: URLs in the body) ──▶ attachment path
//! ```
//!
//! 1. [`cid`]     — rewrite `cid:` references to data URLs before rendering
//! 2. [`extract`] — pull embedded images out of the body as extra items
//! 3. [`render`]  — in-process text, image and placeholder pages; runs in
//!    `spawn_blocking` because it is CPU-bound
//! 4. [`encode`]  — decode image bytes into flattened RGB for the writer
//! 5. [`text`]    — WinAnsi normalisation and line wrapping
//!
//! ## Why typed results instead of errors?
//!
//! An attachment failure is never fatal, so [`ConversionPipeline`] returns a
//! [`ConversionResult`] for every item and leaves the decision to the caller.
//! Only the body result can carry `fatal: true`.

pub mod cid;
pub mod encode;
pub mod extract;
pub mod render;
pub mod text;

use crate::cache::ContentCache;
use crate::config::PageLayout;
use crate::engine::{Engines, HtmlDocument};
use crate::error::EngineError;
use crate::output::{ConversionRequest, ConversionResult, ProducedBy};
use crate::pdf;
use crate::registry::{ConverterRegistry, Strategy};
use render::RenderError;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs conversion requests through the cache, the registry and the engines.
#[derive(Debug)]
pub struct ConversionPipeline {
    cache: Arc<ContentCache>,
    registry: ConverterRegistry,
    engines: Engines,
}

impl ConversionPipeline {
    pub fn new(cache: Arc<ContentCache>, engines: Engines) -> Self {
        Self::with_registry(cache, ConverterRegistry::default(), engines)
    }

    pub fn with_registry(cache: Arc<ContentCache>, registry: ConverterRegistry, engines: Engines) -> Self {
        Self {
            cache,
            registry,
            engines,
        }
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    pub fn engines(&self) -> &Engines {
        &self.engines
    }

    /// Render the e-mail body. Failure of every renderer is fatal.
    ///
    /// The cache key is `html` exactly as passed in; callers resolve `cid:`
    /// references first.
    pub async fn convert_html(&self, html: &str, css: Option<&str>, layout: &PageLayout) -> ConversionResult {
        if let Some(pdf) = self.cache.get(html.as_bytes()) {
            debug!("Body served from cache");
            return ConversionResult::Success {
                pdf,
                produced_by: ProducedBy::Cache,
            };
        }

        let doc = HtmlDocument {
            html: html.to_string(),
            css: css.map(str::to_string),
        };

        let primary = &self.engines.html_primary;
        let primary_err = match primary.render(&doc, layout).await {
            Ok(pdf) => {
                self.cache.put(html.as_bytes(), &pdf);
                return ConversionResult::Success {
                    pdf,
                    produced_by: ProducedBy::PrimaryRenderer,
                };
            }
            Err(e) => e,
        };

        let Some(ref fallback) = self.engines.html_fallback else {
            warn!("{} failed and no fallback renderer is configured: {}", primary.name(), primary_err);
            return body_failure(format!("{primary_err}"));
        };
        warn!("{} failed, trying {}: {}", primary.name(), fallback.name(), primary_err);

        match fallback.render(&doc, layout).await {
            Ok(pdf) => {
                self.cache.put(html.as_bytes(), &pdf);
                ConversionResult::Success {
                    pdf,
                    produced_by: ProducedBy::FallbackRenderer,
                }
            }
            Err(e) => body_failure(format!("{primary_err}; {e}")),
        }
    }

    /// Convert one attachment through its strategy chain.
    ///
    /// Unavailable engines fall through to the next strategy. A rejection
    /// (the engine looked at the content and refused it) is reported as a
    /// failure when only the placeholder would be left.
    pub async fn convert_attachment(&self, req: &ConversionRequest, layout: &PageLayout) -> ConversionResult {
        if let Some(pdf) = self.cache.get(req.content()) {
            debug!("'{}' served from cache", req.name());
            return ConversionResult::Success {
                pdf,
                produced_by: ProducedBy::Cache,
            };
        }

        let strategies = self.registry.strategies_for(req);
        let unsupported = strategies == [Strategy::Placeholder];
        let mut last_error: Option<EngineError> = None;
        let mut rejection: Option<EngineError> = None;

        for strategy in strategies {
            if strategy == Strategy::Placeholder {
                if let Some(e) = rejection {
                    warn!("'{}' rejected: {}", req.name(), e);
                    return ConversionResult::Failure {
                        reason: e.to_string(),
                        unsupported: false,
                        fatal: false,
                        rejected: true,
                    };
                }
                let reason = match last_error {
                    Some(ref e) => e.to_string(),
                    None => format!("no converter for content type '{}'", req.content_type()),
                };
                return self.placeholder(req, reason, unsupported, layout).await;
            }

            debug!("'{}': trying {}", req.name(), strategy.as_str());
            match self.run_strategy(strategy, req, layout).await {
                Ok(pdf) => {
                    self.cache.put(req.content(), &pdf);
                    return ConversionResult::Success {
                        pdf,
                        produced_by: ProducedBy::Strategy(strategy),
                    };
                }
                Err(e) => {
                    warn!("'{}': {} failed: {}", req.name(), strategy.as_str(), e);
                    if e.is_rejection() {
                        rejection = Some(e.clone());
                    }
                    last_error = Some(e);
                }
            }
        }

        ConversionResult::Failure {
            reason: last_error.map_or_else(|| "no conversion strategy succeeded".to_string(), |e| e.to_string()),
            unsupported,
            fatal: false,
            rejected: false,
        }
    }

    async fn run_strategy(
        &self,
        strategy: Strategy,
        req: &ConversionRequest,
        layout: &PageLayout,
    ) -> Result<Vec<u8>, EngineError> {
        match strategy {
            Strategy::Passthrough => {
                if pdf::is_pdf(req.content()) {
                    Ok(req.content().to_vec())
                } else {
                    Err(EngineError::Rejected {
                        engine: "passthrough".into(),
                        detail: "declared as PDF but missing the %PDF- header".into(),
                    })
                }
            }
            Strategy::DocumentEngine => {
                self.engines
                    .documents
                    .convert(req.content(), req.name(), req.content_type())
                    .await
            }
            Strategy::ImageWrapper => {
                let content = req.content().to_vec();
                let layout = *layout;
                blocking("image", move || render::image_document(&content, &layout)).await
            }
            Strategy::PlainText => {
                let content = req.content().to_vec();
                let name = req.name().to_string();
                let layout = *layout;
                blocking("text", move || render::text_document(&name, &content, &layout)).await
            }
            Strategy::Placeholder => Err(EngineError::Unavailable {
                engine: "placeholder".into(),
                detail: "placeholder is rendered separately".into(),
            }),
        }
    }

    /// Never cached: a later request may reach a healthy engine.
    async fn placeholder(
        &self,
        req: &ConversionRequest,
        reason: String,
        unsupported: bool,
        layout: &PageLayout,
    ) -> ConversionResult {
        let name = req.name().to_string();
        let content_type = req.content_type().to_string();
        let size = req.content().len();
        let layout = *layout;
        let rendered = blocking("placeholder", move || {
            render::placeholder_document(&name, &content_type, size, &reason, &layout)
        })
        .await;

        match rendered {
            Ok(pdf) => ConversionResult::Success {
                pdf,
                produced_by: ProducedBy::Strategy(Strategy::Placeholder),
            },
            Err(e) => ConversionResult::Failure {
                reason: e.to_string(),
                unsupported,
                fatal: false,
                rejected: false,
            },
        }
    }
}

fn body_failure(reason: String) -> ConversionResult {
    ConversionResult::Failure {
        reason,
        unsupported: false,
        fatal: true,
        rejected: false,
    }
}

/// Run an in-process renderer on the blocking pool. Undecodable input is a
/// rejection; a writer failure or a panicked task means the renderer is
/// unavailable.
async fn blocking<F>(engine: &str, f: F) -> Result<Vec<u8>, EngineError>
where
    F: FnOnce() -> Result<Vec<u8>, RenderError> + Send + 'static,
{
    let rendered = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::Unavailable {
            engine: engine.to_string(),
            detail: format!("render task panicked: {e}"),
        })?;
    rendered.map_err(|e| match e {
        RenderError::Image(_) => EngineError::Rejected {
            engine: engine.to_string(),
            detail: e.to_string(),
        },
        RenderError::Pdf(_) => EngineError::Unavailable {
            engine: engine.to_string(),
            detail: e.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{healthy, labelled_pdf, MockEngine};
    use std::time::Duration;

    fn pipeline(engines: Engines) -> ConversionPipeline {
        ConversionPipeline::new(Arc::new(ContentCache::in_memory(16, Duration::from_secs(60))), engines)
    }

    fn layout() -> PageLayout {
        PageLayout::default()
    }

    #[tokio::test]
    async fn body_second_call_is_a_cache_hit() {
        let primary = MockEngine::ok("chromium", "BODY");
        let mut engines = healthy();
        engines.html_primary = primary.clone();
        let p = pipeline(engines);

        let first = p.convert_html("<h1>Hi</h1>", None, &layout()).await;
        let second = p.convert_html("<h1>Hi</h1>", None, &layout()).await;
        assert!(matches!(first, ConversionResult::Success { produced_by: ProducedBy::PrimaryRenderer, .. }));
        assert!(matches!(second, ConversionResult::Success { produced_by: ProducedBy::Cache, .. }));
        assert_eq!(first.pdf(), second.pdf());
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn body_uses_fallback_renderer() {
        let mut engines = healthy();
        engines.html_primary = MockEngine::failing("chromium");
        let result = pipeline(engines).convert_html("<p>x</p>", None, &layout()).await;
        assert!(matches!(result, ConversionResult::Success { produced_by: ProducedBy::FallbackRenderer, .. }));
    }

    #[tokio::test]
    async fn body_failure_is_fatal() {
        let mut engines = healthy();
        engines.html_primary = MockEngine::failing("chromium");
        engines.html_fallback = Some(MockEngine::failing("fallback"));
        let result = pipeline(engines).convert_html("<p>x</p>", None, &layout()).await;
        assert!(matches!(result, ConversionResult::Failure { fatal: true, .. }));
    }

    #[tokio::test]
    async fn pdf_attachment_passes_through() {
        let bytes = labelled_pdf("ATTACHED");
        let req = ConversionRequest::new(bytes.clone(), "a.pdf", "application/pdf");
        let result = pipeline(healthy()).convert_attachment(&req, &layout()).await;
        assert_eq!(result.pdf(), Some(bytes.as_slice()));
    }

    #[tokio::test]
    async fn unknown_type_yields_placeholder_success() {
        let req = ConversionRequest::new(b"\x00\x01".to_vec(), "blob.bin", "application/x-unknown");
        let p = pipeline(healthy());
        let result = p.convert_attachment(&req, &layout()).await;
        assert!(matches!(
            result,
            ConversionResult::Success { produced_by: ProducedBy::Strategy(Strategy::Placeholder), .. }
        ));
        assert!(pdf::is_pdf(result.pdf().unwrap()));
        assert!(p.cache().is_empty());
    }

    #[tokio::test]
    async fn unavailable_document_engine_falls_to_placeholder() {
        let mut engines = healthy();
        engines.documents = MockEngine::failing("libreoffice");
        let req = ConversionRequest::new(b"PK..".to_vec(), "r.docx", "application/octet-stream");
        let result = pipeline(engines).convert_attachment(&req, &layout()).await;
        assert!(matches!(
            result,
            ConversionResult::Success { produced_by: ProducedBy::Strategy(Strategy::Placeholder), .. }
        ));
    }

    #[tokio::test]
    async fn rejected_document_is_a_recorded_failure() {
        let mut engines = healthy();
        engines.documents = MockEngine::rejecting("libreoffice");
        let req = ConversionRequest::new(b"garbage".to_vec(), "corrupt.docx", "application/msword");
        let result = pipeline(engines).convert_attachment(&req, &layout()).await;
        assert!(matches!(result, ConversionResult::Failure { rejected: true, fatal: false, .. }));
    }

    #[tokio::test]
    async fn rejected_text_falls_back_to_plain_text() {
        let mut engines = healthy();
        engines.documents = MockEngine::rejecting("libreoffice");
        let req = ConversionRequest::new(b"hello\nworld".to_vec(), "notes.txt", "text/plain");
        let result = pipeline(engines).convert_attachment(&req, &layout()).await;
        assert!(matches!(
            result,
            ConversionResult::Success { produced_by: ProducedBy::Strategy(Strategy::PlainText), .. }
        ));
    }

    #[tokio::test]
    async fn undecodable_image_is_rejected() {
        let req = ConversionRequest::new(b"not an image".to_vec(), "x.png", "image/png");
        let result = pipeline(healthy()).convert_attachment(&req, &layout()).await;
        assert!(matches!(result, ConversionResult::Failure { rejected: true, .. }));
    }

    #[tokio::test]
    async fn identical_bytes_share_a_cache_entry_across_names() {
        let docs = MockEngine::ok("libreoffice", "DOC");
        let mut engines = healthy();
        engines.documents = docs.clone();
        let p = pipeline(engines);
        let a = ConversionRequest::new(b"same".to_vec(), "a.docx", "application/msword");
        let b = ConversionRequest::new(b"same".to_vec(), "b.odt", "application/vnd.oasis.opendocument.text");
        p.convert_attachment(&a, &layout()).await;
        let second = p.convert_attachment(&b, &layout()).await;
        assert!(matches!(second, ConversionResult::Success { produced_by: ProducedBy::Cache, .. }));
        assert_eq!(docs.calls(), 1);
    }
}
