//! # edgequake-mail2pdf
//!
//! Convert HTML e-mail and its attachments to PDF: one merged document, a
//! zip archive, or individually stored PDFs for later download.
//!
//! ## Why this crate?
//!
//! The rendering itself is delegated to engines that already do it well
//! (Gotenberg's Chromium and LibreOffice routes, or any other renderer
//! behind the same traits). What is left is the orchestration: a
//! content-addressed cache, a per-content-type strategy chain with
//! fallbacks, a merge that tolerates failed attachments, and a short-lived
//! store for individual downloads. A failing attachment never takes the
//! e-mail down with it.
//!
//! ## Pipeline Overview
//!
//! ```text
//! EmailRequest (JSON)
//!  │
//!  ├─ 1. Validate  decode base64, parse page options (fail fast)
//!  ├─ 2. CID       inline cid: images as data URLs
//!  ├─ 3. Convert   body + attachments concurrently, cache-checked
//!  │               body:        primary renderer → fallback renderer
//!  │               attachments: registry strategies → placeholder page
//!  ├─ 4. Merge     external merge → in-process merge → body alone
//!  └─ 5. Deliver   PDF | zip | manifest of stored PDFs
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_mail2pdf::{EmailRequest, Mail2Pdf, OutputMode, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder()
//!         .gotenberg_url("http://localhost:3000")
//!         .build()?;
//!     let service = Mail2Pdf::new(config)?;
//!
//!     let request = EmailRequest::from_html("<h1>Hi</h1>")
//!         .with_attachment("notes.txt", "text/plain", b"remember the milk")
//!         .with_mode(OutputMode::Full);
//!     let output = service.convert(request).await?;
//!
//!     if let Some(pdf) = output.artifact.bytes() {
//!         std::fs::write("email.pdf", pdf)?;
//!     }
//!     eprintln!("{}/{} items converted", output.stats.converted_items, output.stats.total_items);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mail2pdf` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-mail2pdf = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod health;
pub mod merge;
pub mod output;
pub mod pdf;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod request;
pub mod store;
pub mod templates;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CacheStats, ContentCache};
pub use config::{Orientation, PageLayout, PageSize, ServiceConfig, ServiceConfigBuilder};
pub use convert::{write_output, Mail2Pdf};
pub use engine::{DocumentConverter, Engines, HealthCheck, HtmlDocument, HtmlRenderer, PdfMerger};
pub use error::{EngineError, ErrorResponse, ItemError, Mail2PdfError};
pub use health::HealthReport;
pub use merge::{MergeEngine, MergeStrategy, MergedPdf};
pub use output::{
    Artifact, ConversionOutput, ConversionRequest, ConversionResult, ConversionStats, ItemKind, ItemReport,
    ManifestEntry, NamedPdf, ProducedBy,
};
pub use pipeline::ConversionPipeline;
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use registry::{ConverterRegistry, Strategy};
pub use request::{AttachmentPayload, EmailRequest, OutputMode, RequestOptions};
pub use store::{ResultStore, StoredPdf};
