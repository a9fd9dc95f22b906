//! Seams to the external converters.
//!
//! Each engine is a trait object so the pipeline never knows whether it is
//! talking to Gotenberg, the fallback renderer, an in-process merger or a
//! test double. Every call returns a typed [`EngineError`] instead of
//! panicking or logging-and-continuing; the caller decides whether to fall
//! through to the next strategy.
//!
//! ```text
//! HtmlRenderer       ── GotenbergClient (Chromium), FallbackRendererClient
//! DocumentConverter  ── GotenbergClient (LibreOffice)
//! PdfMerger          ── GotenbergClient (pdfengines), LocalMerger (lopdf)
//! HealthCheck        ── GotenbergClient (/health)
//! ```

pub mod fallback;
pub mod gotenberg;

use crate::config::{PageLayout, ServiceConfig};
use crate::error::{EngineError, Mail2PdfError};
use crate::output::NamedPdf;
use crate::pdf;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub use fallback::FallbackRendererClient;
pub use gotenberg::GotenbergClient;

/// HTML plus the caller's extra CSS, before the print stylesheet is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlDocument {
    pub html: String,
    pub css: Option<String>,
}

#[async_trait]
pub trait HtmlRenderer: Send + Sync {
    fn name(&self) -> &str;

    async fn render(&self, doc: &HtmlDocument, layout: &PageLayout) -> Result<Vec<u8>, EngineError>;
}

#[async_trait]
pub trait DocumentConverter: Send + Sync {
    fn name(&self) -> &str;

    /// `filename` carries the extension the engine dispatches on.
    async fn convert(&self, content: &[u8], filename: &str, mime: &str) -> Result<Vec<u8>, EngineError>;
}

#[async_trait]
pub trait PdfMerger: Send + Sync {
    fn name(&self) -> &str;

    /// Merge `items` in slice order.
    async fn merge(&self, items: &[NamedPdf]) -> Result<Vec<u8>, EngineError>;
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// `true` when the engine answered its health endpoint.
    async fn ping(&self) -> bool;
}

/// The in-process merge fallback: page concatenation with `lopdf`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalMerger;

#[async_trait]
impl PdfMerger for LocalMerger {
    fn name(&self) -> &str {
        "local"
    }

    async fn merge(&self, items: &[NamedPdf]) -> Result<Vec<u8>, EngineError> {
        let owned: Vec<Vec<u8>> = items.iter().map(|i| i.bytes.clone()).collect();
        let merged = tokio::task::spawn_blocking(move || {
            let refs: Vec<&[u8]> = owned.iter().map(Vec::as_slice).collect();
            pdf::merge::merge_documents(&refs)
        })
        .await
        .map_err(|e| EngineError::Unavailable {
            engine: "local".into(),
            detail: format!("merge task panicked: {e}"),
        })?
        .map_err(|e| EngineError::Rejected {
            engine: "local".into(),
            detail: e.to_string(),
        })?;
        validate_pdf("local", merged)
    }
}

/// Every engine the service talks to.
#[derive(Clone)]
pub struct Engines {
    pub html_primary: Arc<dyn HtmlRenderer>,
    pub html_fallback: Option<Arc<dyn HtmlRenderer>>,
    pub documents: Arc<dyn DocumentConverter>,
    /// Primary merge engine; `None` goes straight to the in-process merger.
    pub merger: Option<Arc<dyn PdfMerger>>,
    pub health: Option<Arc<dyn HealthCheck>>,
}

impl fmt::Debug for Engines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engines")
            .field("html_primary", &self.html_primary.name())
            .field("html_fallback", &self.html_fallback.as_ref().map(|e| e.name().to_string()))
            .field("documents", &self.documents.name())
            .field("merger", &self.merger.as_ref().map(|e| e.name().to_string()))
            .field("health", &self.health.is_some())
            .finish()
    }
}

impl Engines {
    /// Gotenberg for rendering, conversion, merging and health; the JSON
    /// renderer as the HTML fallback when configured.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, Mail2PdfError> {
        let gotenberg = Arc::new(GotenbergClient::new(
            &config.gotenberg_url,
            config.engine_timeout_secs,
            config.health_timeout_secs,
        )?);
        let fallback = match config.fallback_renderer_url {
            Some(ref url) => Some(Arc::new(FallbackRendererClient::new(url, config.engine_timeout_secs)?)
                as Arc<dyn HtmlRenderer>),
            None => None,
        };
        Ok(Self {
            html_primary: gotenberg.clone(),
            html_fallback: fallback,
            documents: gotenberg.clone(),
            merger: Some(gotenberg.clone()),
            health: Some(gotenberg),
        })
    }
}

/// Reject anything that does not start with the PDF magic header.
pub fn validate_pdf(engine: &str, bytes: Vec<u8>) -> Result<Vec<u8>, EngineError> {
    if pdf::is_pdf(&bytes) {
        Ok(bytes)
    } else {
        let head: String = String::from_utf8_lossy(&bytes[..bytes.len().min(16)]).into_owned();
        Err(EngineError::InvalidOutput {
            engine: engine.to_string(),
            detail: format!("response does not start with %PDF- ({} bytes, starts with {:?})", bytes.len(), head),
        })
    }
}

/// Test doubles shared by unit tests across the crate.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::pdf::writer::{Font, Page, PdfDocument};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A one-page PDF whose only text is `label`.
    pub fn labelled_pdf(label: &str) -> Vec<u8> {
        let mut doc = PdfDocument::new(612.0, 792.0);
        let mut page = Page::new();
        page.text(Font::Helvetica, 12.0, 72.0, 700.0, label);
        doc.add_page(page);
        doc.to_bytes().expect("writer output")
    }

    /// What a mock engine does when called.
    #[derive(Clone)]
    pub enum Behaviour {
        Succeed(&'static str),
        Fail(EngineError),
    }

    pub struct MockEngine {
        pub name: &'static str,
        pub behaviour: Behaviour,
        pub calls: AtomicUsize,
    }

    impl MockEngine {
        pub fn ok(name: &'static str, label: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                behaviour: Behaviour::Succeed(label),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                behaviour: Behaviour::Fail(EngineError::Unavailable {
                    engine: name.into(),
                    detail: "connection refused".into(),
                }),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn rejecting(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                behaviour: Behaviour::Fail(EngineError::Rejected {
                    engine: name.into(),
                    detail: "corrupt input".into(),
                }),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn run(&self) -> Result<Vec<u8>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Succeed(label) => Ok(labelled_pdf(label)),
                Behaviour::Fail(e) => Err(e.clone()),
            }
        }
    }

    #[async_trait]
    impl HtmlRenderer for MockEngine {
        fn name(&self) -> &str {
            self.name
        }
        async fn render(&self, _doc: &HtmlDocument, _layout: &PageLayout) -> Result<Vec<u8>, EngineError> {
            self.run()
        }
    }

    #[async_trait]
    impl DocumentConverter for MockEngine {
        fn name(&self) -> &str {
            self.name
        }
        async fn convert(&self, _content: &[u8], _filename: &str, _mime: &str) -> Result<Vec<u8>, EngineError> {
            self.run()
        }
    }

    #[async_trait]
    impl PdfMerger for MockEngine {
        fn name(&self) -> &str {
            self.name
        }
        async fn merge(&self, _items: &[NamedPdf]) -> Result<Vec<u8>, EngineError> {
            self.run()
        }
    }

    /// Engines where everything succeeds.
    pub fn healthy() -> Engines {
        Engines {
            html_primary: MockEngine::ok("chromium", "BODY"),
            html_fallback: Some(MockEngine::ok("fallback", "BODY-FALLBACK")),
            documents: MockEngine::ok("libreoffice", "DOC"),
            merger: None,
            health: None,
        }
    }
}
