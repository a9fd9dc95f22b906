//! Gotenberg client: Chromium rendering, LibreOffice conversion, PDF merging
//! and the health check, all against one base URL.
//!
//! ## Status mapping
//!
//! Gotenberg answers `400` when the submitted content itself is unusable
//! (a corrupt office file, an empty form). That becomes
//! [`EngineError::Rejected`]. Every other failure (connection refused,
//! timeout, `5xx`, a body without the PDF header) says nothing about the
//! content and lets the pipeline move on to the next strategy.

use super::{validate_pdf, DocumentConverter, HealthCheck, HtmlDocument, HtmlRenderer, PdfMerger};
use crate::config::PageLayout;
use crate::error::{EngineError, Mail2PdfError};
use crate::merge::sanitize_stem;
use crate::output::NamedPdf;
use crate::registry::extension_for_mime;
use crate::templates;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::debug;

const ENGINE: &str = "gotenberg";

/// Longest error body kept in an [`EngineError`].
const MAX_ERROR_BODY: usize = 300;

#[derive(Debug, Clone)]
pub struct GotenbergClient {
    base_url: String,
    client: reqwest::Client,
    health_client: reqwest::Client,
    timeout_secs: u64,
}

impl GotenbergClient {
    pub fn new(base_url: &str, timeout_secs: u64, health_timeout_secs: u64) -> Result<Self, Mail2PdfError> {
        let build = |secs: u64| {
            reqwest::Client::builder()
                .timeout(Duration::from_secs(secs))
                .build()
                .map_err(|e| Mail2PdfError::InvalidConfig(format!("HTTP client: {e}")))
        };
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: build(timeout_secs)?,
            health_client: build(health_timeout_secs)?,
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_form(&self, route: &str, form: Form) -> Result<Vec<u8>, EngineError> {
        debug!("POST {}", route);
        let response = self
            .client
            .post(self.url(route))
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = truncate_body(&body);
            return Err(if status.as_u16() == 400 {
                EngineError::Rejected {
                    engine: ENGINE.into(),
                    detail: body,
                }
            } else {
                EngineError::Status {
                    engine: ENGINE.into(),
                    status: status.as_u16(),
                    body,
                }
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, self.timeout_secs))?;
        validate_pdf(ENGINE, bytes.to_vec())
    }
}

/// Form fields Chromium needs for `layout`. Paper sizes are sent in
/// portrait; `landscape` rotates them.
pub fn layout_fields(layout: &PageLayout) -> Vec<(&'static str, String)> {
    let (w, h) = layout.size.dimensions_in();
    let margin = format!("{:.2}", layout.margin_in);
    vec![
        ("paperWidth", format!("{w:.2}")),
        ("paperHeight", format!("{h:.2}")),
        ("marginTop", margin.clone()),
        ("marginBottom", margin.clone()),
        ("marginLeft", margin.clone()),
        ("marginRight", margin),
        ("landscape", (layout.orientation == crate::config::Orientation::Landscape).to_string()),
        ("printBackground", "true".to_string()),
        ("emulatedMediaType", "print".to_string()),
    ]
}

/// The name LibreOffice sees; it dispatches on the extension, so one is
/// derived from the MIME type when the declared name has none.
pub fn engine_filename(name: &str, mime: &str) -> String {
    let name = if name.trim().is_empty() { "attachment" } else { name.trim() };
    let has_ext = name
        .rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty());
    match (has_ext, extension_for_mime(mime)) {
        (false, Some(ext)) => format!("{name}.{ext}"),
        _ => name.to_string(),
    }
}

fn transport_error(e: reqwest::Error, secs: u64) -> EngineError {
    if e.is_timeout() {
        EngineError::Timeout {
            engine: ENGINE.into(),
            secs,
        }
    } else {
        EngineError::Unavailable {
            engine: ENGINE.into(),
            detail: e.to_string(),
        }
    }
}

fn truncate_body(body: &str) -> String {
    let body = body.trim();
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

fn part(bytes: Vec<u8>, filename: String, mime: &str) -> Result<Part, EngineError> {
    Part::bytes(bytes)
        .file_name(filename)
        .mime_str(mime)
        .map_err(|e| EngineError::Rejected {
            engine: ENGINE.into(),
            detail: format!("invalid content type '{mime}': {e}"),
        })
}

#[async_trait]
impl HtmlRenderer for GotenbergClient {
    fn name(&self) -> &str {
        ENGINE
    }

    async fn render(&self, doc: &HtmlDocument, layout: &PageLayout) -> Result<Vec<u8>, EngineError> {
        let html = templates::print_document(&doc.html, doc.css.as_deref(), layout);
        let mut form = Form::new().part(
            "files",
            part(html.into_bytes(), "index.html".into(), "text/html; charset=utf-8")?,
        );
        for (key, value) in layout_fields(layout) {
            form = form.text(key, value);
        }
        self.post_form("/forms/chromium/convert/html", form).await
    }
}

#[async_trait]
impl DocumentConverter for GotenbergClient {
    fn name(&self) -> &str {
        ENGINE
    }

    async fn convert(&self, content: &[u8], filename: &str, mime: &str) -> Result<Vec<u8>, EngineError> {
        let mime = if mime.trim().is_empty() {
            "application/octet-stream"
        } else {
            mime
        };
        let form = Form::new().part(
            "files",
            part(content.to_vec(), engine_filename(filename, mime), mime)?,
        );
        self.post_form("/forms/libreoffice/convert", form).await
    }
}

#[async_trait]
impl PdfMerger for GotenbergClient {
    fn name(&self) -> &str {
        ENGINE
    }

    async fn merge(&self, items: &[NamedPdf]) -> Result<Vec<u8>, EngineError> {
        let mut form = Form::new();
        // The merge route orders files alphabetically.
        for (i, item) in items.iter().enumerate() {
            let stem = sanitize_stem(&item.name).unwrap_or_else(|| "attachment".into());
            let name = format!("{:04}_{}.pdf", i + 1, stem);
            form = form.part("files", part(item.bytes.clone(), name, "application/pdf")?);
        }
        self.post_form("/forms/pdfengines/merge", form).await
    }
}

#[async_trait]
impl HealthCheck for GotenbergClient {
    async fn ping(&self) -> bool {
        match self.health_client.get(self.url("/health")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Gotenberg health check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Orientation, PageSize};

    #[test]
    fn layout_fields_are_inches_and_portrait() {
        let layout = PageLayout {
            size: PageSize::Letter,
            orientation: Orientation::Landscape,
            margin_in: 0.5,
        };
        let fields = layout_fields(&layout);
        let get = |k: &str| fields.iter().find(|(key, _)| *key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("paperWidth"), Some("8.50"));
        assert_eq!(get("paperHeight"), Some("11.00"));
        assert_eq!(get("marginLeft"), Some("0.50"));
        assert_eq!(get("landscape"), Some("true"));
        assert_eq!(get("emulatedMediaType"), Some("print"));
        assert_eq!(get("printBackground"), Some("true"));
    }

    #[test]
    fn engine_filename_gets_an_extension() {
        assert_eq!(
            engine_filename("report", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
            "report.docx"
        );
        assert_eq!(engine_filename("report.docx", "application/octet-stream"), "report.docx");
        assert_eq!(engine_filename("", "text/csv"), "attachment.csv");
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "é".repeat(400);
        let t = truncate_body(&body);
        assert!(t.len() <= MAX_ERROR_BODY + '…'.len_utf8());
        assert!(t.ends_with('…'));
    }

    #[test]
    fn base_url_loses_trailing_slash() {
        let client = GotenbergClient::new("http://gotenberg:3000/", 30, 5).unwrap();
        assert_eq!(client.base_url(), "http://gotenberg:3000");
        assert_eq!(client.url("/health"), "http://gotenberg:3000/health");
    }

    #[tokio::test]
    async fn unreachable_engine_is_unavailable() {
        // Port 9 (discard) on localhost is closed on CI machines.
        let client = GotenbergClient::new("http://127.0.0.1:9", 2, 1).unwrap();
        let err = DocumentConverter::convert(&client, b"x", "a.txt", "text/plain")
            .await
            .unwrap_err();
        assert!(!err.is_rejection());
        assert!(!client.ping().await);
    }
}
