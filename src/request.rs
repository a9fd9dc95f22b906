//! The request boundary: the JSON shape a conversion request arrives in,
//! and its validation into typed, decoded input.
//!
//! ```json
//! {
//!   "html": "<p>Hello</p>",
//!   "css": "p { color: navy; }",
//!   "attachments": [
//!     {"name": "report.docx", "content": "<base64>", "contentType": "application/vnd…",
//!      "contentId": "<logo@x>", "isInline": false}
//!   ],
//!   "mode": "full",
//!   "options": {"page_size": "A4", "margin": "20mm", "orientation": "portrait",
//!               "filename": "email.pdf", "timeout_secs": 60, "extract_images": false}
//! }
//! ```
//!
//! Validation fails fast on input errors (missing body, malformed base64,
//! unknown option values) so nothing reaches the pipeline half-decoded.

use crate::config::{parse_length_inches, Orientation, PageLayout, PageSize, ServiceConfig, MAX_TIMEOUT_SECS};
use crate::error::Mail2PdfError;
use crate::merge::sanitize_filename;
use crate::output::ConversionRequest;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How the converted PDFs are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// One merged PDF.
    #[default]
    Full,
    /// Each PDF stored for later download; a manifest is returned.
    Individual,
    /// One zip archive with a PDF per item.
    Zip,
}

impl FromStr for OutputMode {
    type Err = Mail2PdfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "full" => Ok(OutputMode::Full),
            "individual" => Ok(OutputMode::Individual),
            "zip" => Ok(OutputMode::Zip),
            _ => Err(Mail2PdfError::InvalidOption {
                field: "mode".into(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputMode::Full => "full",
            OutputMode::Individual => "individual",
            OutputMode::Zip => "zip",
        })
    }
}

/// A conversion request as received.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailRequest {
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub css: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentPayload>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub options: RequestOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentPayload {
    #[serde(default)]
    pub name: String,
    /// Base64, optionally as a `data:…;base64,` URL.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub is_inline: bool,
}

/// A margin given either as a CSS length string or a bare number of inches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MarginValue {
    Inches(f32),
    Length(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    #[serde(default)]
    pub page_size: Option<String>,
    #[serde(default)]
    pub margin: Option<MarginValue>,
    #[serde(default)]
    pub orientation: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub extract_images: bool,
}

/// A decoded attachment with the e-mail metadata CID resolution needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub request: ConversionRequest,
    pub content_id: Option<String>,
    pub inline: bool,
}

/// Everything the service needs, decoded and defaulted.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub html: String,
    pub css: Option<String>,
    pub attachments: Vec<Attachment>,
    pub mode: OutputMode,
    pub layout: PageLayout,
    /// Output file name, always ending in `.pdf`.
    pub filename: String,
    pub timeout: Duration,
    pub extract_images: bool,
}

impl EmailRequest {
    /// Convenience constructor for a body-only request.
    pub fn from_html(html: impl Into<String>) -> Self {
        Self {
            html: Some(html.into()),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = Some(mode.to_string());
        self
    }

    /// Add an attachment from raw bytes.
    pub fn with_attachment(
        mut self,
        name: impl Into<String>,
        content_type: impl Into<String>,
        content: &[u8],
    ) -> Self {
        self.attachments.push(AttachmentPayload {
            name: name.into(),
            content: STANDARD.encode(content),
            content_type: Some(content_type.into()),
            content_id: None,
            is_inline: false,
        });
        self
    }

    /// Decode and check everything; defaults come from `config`.
    pub fn validate(self, config: &ServiceConfig) -> Result<ValidatedRequest, Mail2PdfError> {
        let html = match self.html {
            Some(h) if !h.trim().is_empty() => h,
            Some(_) => return Err(Mail2PdfError::InvalidInput("'html' field is empty".into())),
            None => return Err(Mail2PdfError::InvalidInput("missing 'html' field".into())),
        };

        let attachments = self
            .attachments
            .into_iter()
            .enumerate()
            .map(|(i, a)| decode_attachment(i, a))
            .collect::<Result<Vec<_>, _>>()?;

        let mode = match self.mode {
            Some(ref m) => m.parse()?,
            None => OutputMode::Full,
        };

        let opts = self.options;
        let mut layout = config.layout;
        if let Some(ref size) = opts.page_size {
            layout.size = size.parse::<PageSize>()?;
        }
        if let Some(ref orientation) = opts.orientation {
            layout.orientation = orientation.parse::<Orientation>()?;
        }
        if let Some(ref margin) = opts.margin {
            layout.margin_in = parse_margin(margin)?;
        }

        let filename = opts
            .filename
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(config.default_filename.as_str());
        let filename = sanitize_filename(filename, "email");

        let timeout_secs = match opts.timeout_secs {
            Some(secs) if secs == 0 || secs > MAX_TIMEOUT_SECS => {
                return Err(Mail2PdfError::InvalidOption {
                    field: "timeout_secs".into(),
                    value: secs.to_string(),
                })
            }
            Some(secs) => secs,
            None => config.request_timeout_secs,
        };

        Ok(ValidatedRequest {
            html,
            css: self.css.filter(|c| !c.trim().is_empty()),
            attachments,
            mode,
            layout,
            filename,
            timeout: Duration::from_secs(timeout_secs),
            extract_images: opts.extract_images,
        })
    }
}

fn decode_attachment(index: usize, a: AttachmentPayload) -> Result<Attachment, Mail2PdfError> {
    let name = if a.name.trim().is_empty() {
        format!("attachment-{}", index + 1)
    } else {
        a.name.trim().to_string()
    };
    let bytes = decode_base64(&a.content).map_err(|reason| Mail2PdfError::MalformedAttachment {
        name: name.clone(),
        reason,
    })?;
    let content_type = a
        .content_type
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| "application/octet-stream".to_string());

    Ok(Attachment {
        request: ConversionRequest::new(bytes, name, content_type),
        content_id: a.content_id.filter(|c| !c.trim().is_empty()),
        inline: a.is_inline,
    })
}

/// Lenient base64: whitespace is ignored, a `data:` prefix is stripped and
/// unpadded or URL-safe alphabets are accepted.
pub fn decode_base64(content: &str) -> Result<Vec<u8>, String> {
    let content = match content.trim_start().strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(""),
        None => content,
    };
    let compact: String = content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Ok(Vec::new());
    }
    STANDARD
        .decode(&compact)
        .or_else(|first| {
            STANDARD_NO_PAD
                .decode(&compact)
                .or_else(|_| URL_SAFE.decode(&compact))
                .map_err(|_| first)
        })
        .map_err(|e| e.to_string())
}

fn parse_margin(margin: &MarginValue) -> Result<f32, Mail2PdfError> {
    let parsed = match margin {
        MarginValue::Inches(v) if v.is_finite() && *v >= 0.0 => Some(*v),
        MarginValue::Inches(_) => None,
        MarginValue::Length(s) => parse_length_inches(s),
    };
    parsed.ok_or_else(|| Mail2PdfError::InvalidOption {
        field: "margin".into(),
        value: match margin {
            MarginValue::Inches(v) => v.to_string(),
            MarginValue::Length(s) => s.clone(),
        },
    })
}
