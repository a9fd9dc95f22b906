//! Configuration types for the e-mail-to-PDF service.
//!
//! All service behaviour is controlled through [`ServiceConfig`], built via
//! its [`ServiceConfigBuilder`]. One struct holds every knob so a single
//! value can be constructed at process start, shared across request
//! handlers and printed in a log line when something misbehaves.
//!
//! Per-request page layout lives in [`PageLayout`]; the config carries the
//! default that requests override field by field.

use crate::error::Mail2PdfError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Longest request deadline accepted from config or from a request's
/// `timeout_secs`.
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// Configuration for a [`crate::convert::Mail2Pdf`] service instance.
///
/// Built via [`ServiceConfig::builder()`] or using
/// [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_mail2pdf::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .gotenberg_url("http://gotenberg:3000")
///     .concurrency(8)
///     .cache_max_entries(500)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Base URL of the Gotenberg instance. Default: `http://localhost:3000`.
    ///
    /// Gotenberg provides the primary HTML renderer (Chromium), the document
    /// converter (LibreOffice), the primary merge engine and the health check.
    pub gotenberg_url: String,

    /// Base URL of the secondary HTML renderer. Default: `http://localhost:5000`.
    ///
    /// The service must speak the JSON `/convert` protocol (`{html, css,
    /// options}` in, `{success, pdf}` out). `None` disables the fallback, so
    /// a Gotenberg outage fails the e-mail body immediately.
    pub fallback_renderer_url: Option<String>,

    /// Per-call timeout for conversion and merge requests. Default: 30.
    ///
    /// A timed-out call is treated like any other engine failure and the
    /// next strategy in the chain runs.
    pub engine_timeout_secs: u64,

    /// Timeout for the health check. Default: 5.
    pub health_timeout_secs: u64,

    /// How long a health check result is reused. Default: 30.
    pub health_cache_secs: u64,

    /// Default deadline for a whole request. Default: 120.
    ///
    /// Requests may override it with `options.timeout_secs`. Items still
    /// converting when it passes are abandoned, not retried.
    pub request_timeout_secs: u64,

    /// Number of items (body + attachments) converted at once. Default: 4.
    ///
    /// Every item may hit the same Gotenberg instance; LibreOffice
    /// conversions are heavy, so this stays low.
    pub concurrency: usize,

    /// Maximum number of cached PDFs. Default: 100.
    pub cache_max_entries: usize,

    /// Cache entry lifetime in seconds. Default: 3600.
    pub cache_ttl_secs: u64,

    /// Directory for the opt-in persistent cache. Default: None (memory only).
    pub cache_dir: Option<PathBuf>,

    /// Lifetime of PDFs held for individual download. Default: 3600.
    pub result_ttl_secs: u64,

    /// Maximum number of PDFs held for individual download. Default: 500.
    pub result_max_entries: usize,

    /// Default page layout for requests that do not specify one.
    pub layout: PageLayout,

    /// Output file name when the request does not name one. Default: `email.pdf`.
    pub default_filename: String,

    /// Optional per-item progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            gotenberg_url: "http://localhost:3000".to_string(),
            fallback_renderer_url: Some("http://localhost:5000".to_string()),
            engine_timeout_secs: 30,
            health_timeout_secs: 5,
            health_cache_secs: 30,
            request_timeout_secs: 120,
            concurrency: 4,
            cache_max_entries: 100,
            cache_ttl_secs: 3600,
            cache_dir: None,
            result_ttl_secs: 3600,
            result_max_entries: 500,
            layout: PageLayout::default(),
            default_filename: "email.pdf".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("gotenberg_url", &self.gotenberg_url)
            .field("fallback_renderer_url", &self.fallback_renderer_url)
            .field("engine_timeout_secs", &self.engine_timeout_secs)
            .field("health_timeout_secs", &self.health_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field("cache_max_entries", &self.cache_max_entries)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("cache_dir", &self.cache_dir)
            .field("result_ttl_secs", &self.result_ttl_secs)
            .field("result_max_entries", &self.result_max_entries)
            .field("layout", &self.layout)
            .field("default_filename", &self.default_filename)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn gotenberg_url(mut self, url: impl Into<String>) -> Self {
        self.config.gotenberg_url = url.into();
        self
    }

    pub fn fallback_renderer_url(mut self, url: Option<String>) -> Self {
        self.config.fallback_renderer_url = url;
        self
    }

    pub fn engine_timeout_secs(mut self, secs: u64) -> Self {
        self.config.engine_timeout_secs = secs;
        self
    }

    pub fn health_timeout_secs(mut self, secs: u64) -> Self {
        self.config.health_timeout_secs = secs;
        self
    }

    pub fn health_cache_secs(mut self, secs: u64) -> Self {
        self.config.health_cache_secs = secs;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn cache_max_entries(mut self, n: usize) -> Self {
        self.config.cache_max_entries = n;
        self
    }

    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.config.cache_ttl_secs = secs;
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    pub fn result_ttl_secs(mut self, secs: u64) -> Self {
        self.config.result_ttl_secs = secs;
        self
    }

    pub fn result_max_entries(mut self, n: usize) -> Self {
        self.config.result_max_entries = n;
        self
    }

    pub fn layout(mut self, layout: PageLayout) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn default_filename(mut self, name: impl Into<String>) -> Self {
        self.config.default_filename = name.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, Mail2PdfError> {
        let c = &self.config;
        if c.gotenberg_url.trim().is_empty() {
            return Err(Mail2PdfError::InvalidConfig(
                "Gotenberg URL must not be empty".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(Mail2PdfError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.cache_max_entries == 0 {
            return Err(Mail2PdfError::InvalidConfig(
                "Cache must hold at least one entry".into(),
            ));
        }
        if c.result_max_entries == 0 {
            return Err(Mail2PdfError::InvalidConfig(
                "Result store must hold at least one entry".into(),
            ));
        }
        if c.engine_timeout_secs == 0 || c.health_timeout_secs == 0 || c.request_timeout_secs == 0 {
            return Err(Mail2PdfError::InvalidConfig(
                "Timeouts must be at least one second".into(),
            ));
        }
        if c.request_timeout_secs > MAX_TIMEOUT_SECS {
            return Err(Mail2PdfError::InvalidConfig(format!(
                "Request timeout must not exceed {MAX_TIMEOUT_SECS} seconds"
            )));
        }
        Ok(self.config)
    }
}

// ── Page layout ──────────────────────────────────────────────────────────

/// Paper, orientation and margin for every PDF produced by one request.
///
/// Forwarded to Gotenberg as inches, to the fallback renderer as CSS
/// strings, and used directly by the in-process text/image/placeholder pages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    pub size: PageSize,
    pub orientation: Orientation,
    /// Uniform margin in inches.
    pub margin_in: f32,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            size: PageSize::A4,
            orientation: Orientation::Portrait,
            margin_in: 0.5,
        }
    }
}

impl PageLayout {
    /// Paper `(width, height)` in inches, with orientation applied.
    pub fn paper_inches(&self) -> (f32, f32) {
        let (w, h) = self.size.dimensions_in();
        match self.orientation {
            Orientation::Portrait => (w, h),
            Orientation::Landscape => (h, w),
        }
    }

    /// Paper `(width, height)` in PDF points (1/72 in).
    pub fn paper_points(&self) -> (f32, f32) {
        let (w, h) = self.paper_inches();
        (w * 72.0, h * 72.0)
    }

    pub fn margin_points(&self) -> f32 {
        self.margin_in * 72.0
    }

    /// The margin as a CSS length, for renderers that take strings.
    pub fn margin_css(&self) -> String {
        format!("{:.2}in", self.margin_in)
    }
}

/// Supported paper sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageSize {
    A3,
    #[default]
    A4,
    A5,
    Letter,
    Legal,
    Tabloid,
}

impl PageSize {
    /// Portrait `(width, height)` in inches.
    pub fn dimensions_in(&self) -> (f32, f32) {
        match self {
            PageSize::A3 => (11.69, 16.54),
            PageSize::A4 => (8.27, 11.69),
            PageSize::A5 => (5.83, 8.27),
            PageSize::Letter => (8.5, 11.0),
            PageSize::Legal => (8.5, 14.0),
            PageSize::Tabloid => (11.0, 17.0),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PageSize::A3 => "A3",
            PageSize::A4 => "A4",
            PageSize::A5 => "A5",
            PageSize::Letter => "Letter",
            PageSize::Legal => "Legal",
            PageSize::Tabloid => "Tabloid",
        }
    }
}

impl FromStr for PageSize {
    type Err = Mail2PdfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a3" => Ok(PageSize::A3),
            "a4" => Ok(PageSize::A4),
            "a5" => Ok(PageSize::A5),
            "letter" | "us-letter" => Ok(PageSize::Letter),
            "legal" => Ok(PageSize::Legal),
            "tabloid" | "ledger" => Ok(PageSize::Tabloid),
            _ => Err(Mail2PdfError::InvalidOption {
                field: "page_size".into(),
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Portrait => "portrait",
            Orientation::Landscape => "landscape",
        }
    }
}

impl FromStr for Orientation {
    type Err = Mail2PdfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "portrait" => Ok(Orientation::Portrait),
            "landscape" => Ok(Orientation::Landscape),
            _ => Err(Mail2PdfError::InvalidOption {
                field: "orientation".into(),
                value: s.to_string(),
            }),
        }
    }
}

/// Parse a CSS-style length (`20mm`, `2cm`, `0.5in`, `36pt`, `48px`) into
/// inches. Bare numbers are inches, matching Gotenberg's default unit.
pub fn parse_length_inches(s: &str) -> Option<f32> {
    let s = s.trim().to_ascii_lowercase();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f32 = number.parse().ok()?;
    let inches = match unit.trim() {
        "" | "in" => value,
        "mm" => value / 25.4,
        "cm" => value / 2.54,
        "pt" => value / 72.0,
        "px" => value / 96.0,
        _ => return None,
    };
    (inches.is_finite() && inches >= 0.0).then_some(inches)
}
