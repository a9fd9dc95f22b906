//! Output types: what a conversion request produces.
//!
//! [`ConversionRequest`] and [`ConversionResult`] are the per-item unit of
//! work flowing through [`crate::pipeline::ConversionPipeline`];
//! [`ConversionOutput`] is what [`crate::convert::Mail2Pdf::convert`] hands
//! back for the whole e-mail.

use crate::error::ItemError;
use crate::merge::MergeStrategy;
use crate::registry::Strategy;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Per-item unit of work ────────────────────────────────────────────────

/// One attachment (or extracted image) waiting to be converted.
///
/// Immutable once built; the pipeline only ever borrows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    content: Vec<u8>,
    name: String,
    content_type: String,
}

impl ConversionRequest {
    pub fn new(content: Vec<u8>, name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            content,
            name: name.into(),
            content_type: content_type.into(),
        }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Lower-cased extension of the declared name, without the dot.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Which path produced a successful PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducedBy {
    Cache,
    PrimaryRenderer,
    FallbackRenderer,
    Strategy(Strategy),
}

impl fmt::Display for ProducedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProducedBy::Cache => f.write_str("cache"),
            ProducedBy::PrimaryRenderer => f.write_str("primary_renderer"),
            ProducedBy::FallbackRenderer => f.write_str("fallback_renderer"),
            ProducedBy::Strategy(s) => f.write_str(s.as_str()),
        }
    }
}

/// Outcome of converting one item.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionResult {
    Success { pdf: Vec<u8>, produced_by: ProducedBy },
    Failure {
        reason: String,
        /// The content type has no converter at all.
        unsupported: bool,
        /// The whole request must fail (only ever set for the e-mail body).
        fatal: bool,
        /// A converter examined the content and refused it.
        rejected: bool,
    },
}

impl ConversionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ConversionResult::Success { .. })
    }

    pub fn pdf(&self) -> Option<&[u8]> {
        match self {
            ConversionResult::Success { pdf, .. } => Some(pdf),
            ConversionResult::Failure { .. } => None,
        }
    }

    /// Turn a failure into the per-item error recorded in the report.
    pub fn item_error(&self, name: &str) -> Option<ItemError> {
        match self {
            ConversionResult::Success { .. } => None,
            ConversionResult::Failure {
                reason, rejected, ..
            } => Some(if *rejected {
                ItemError::Rejected {
                    name: name.to_string(),
                    reason: reason.clone(),
                }
            } else {
                ItemError::Exhausted {
                    name: name.to_string(),
                    reason: reason.clone(),
                }
            }),
        }
    }
}

// ── Whole-request output ─────────────────────────────────────────────────

/// A converted PDF carrying the name it was declared under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedPdf {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Body,
    Attachment,
    EmbeddedImage,
}

/// Outcome for one item of the request, in request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    /// 0 is the body; attachments follow, then extracted images.
    pub index: usize,
    pub name: String,
    pub kind: ItemKind,
    pub converted: bool,
    /// `cache`, `primary_renderer`, `document_engine`, `placeholder`, …
    #[serde(skip_serializing_if = "Option::is_none")]
    pub produced_by: Option<String>,
    /// PDF size in bytes; 0 on failure.
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

/// One retrievable PDF in individual mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub filename: String,
    pub size: usize,
    pub download_url: String,
}

/// The deliverable: one PDF, one zip, or a manifest of stored PDFs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Pdf {
        filename: String,
        #[serde(skip)]
        bytes: Vec<u8>,
    },
    Zip {
        filename: String,
        #[serde(skip)]
        bytes: Vec<u8>,
    },
    Manifest { entries: Vec<ManifestEntry> },
}

impl Artifact {
    pub fn content_type(&self) -> &'static str {
        match self {
            Artifact::Pdf { .. } => "application/pdf",
            Artifact::Zip { .. } => "application/zip",
            Artifact::Manifest { .. } => "application/json",
        }
    }

    /// Raw bytes for the PDF and zip variants.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Artifact::Pdf { bytes, .. } | Artifact::Zip { bytes, .. } => Some(bytes),
            Artifact::Manifest { .. } => None,
        }
    }
}

/// Statistics about a completed conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Body + attachments + extracted images.
    pub total_items: usize,
    pub converted_items: usize,
    pub failed_items: usize,
    /// Items served from the content cache.
    pub cache_hits: usize,
    /// Items delivered as an "could not be converted" page.
    pub placeholders: usize,
    /// How the merged PDF was built (full mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeStrategy>,
    pub total_duration_ms: u64,
}

/// The complete result of converting one e-mail.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    pub artifact: Artifact,
    pub items: Vec<ItemReport>,
    pub stats: ConversionStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        let req = ConversionRequest::new(vec![1], "Report.DOCX", "application/octet-stream");
        assert_eq!(req.extension().as_deref(), Some("docx"));
    }

    #[test]
    fn dotfiles_and_bare_names_have_no_extension() {
        assert_eq!(ConversionRequest::new(vec![], ".bashrc", "").extension(), None);
        assert_eq!(ConversionRequest::new(vec![], "README", "").extension(), None);
        assert_eq!(ConversionRequest::new(vec![], "trailing.", "").extension(), None);
    }

    #[test]
    fn rejected_failure_maps_to_rejected_item_error() {
        let r = ConversionResult::Failure {
            reason: "corrupt".into(),
            unsupported: false,
            fatal: false,
            rejected: true,
        };
        assert!(matches!(r.item_error("x.docx"), Some(ItemError::Rejected { .. })));
        assert!(r.pdf().is_none());
    }

    #[test]
    fn artifact_serialises_without_bytes() {
        let a = Artifact::Pdf {
            filename: "email.pdf".into(),
            bytes: b"%PDF-1.4".to_vec(),
        };
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["kind"], "pdf");
        assert!(json.get("bytes").is_none());
        assert_eq!(a.content_type(), "application/pdf");
    }

    #[test]
    fn produced_by_display() {
        assert_eq!(ProducedBy::Cache.to_string(), "cache");
        assert_eq!(
            ProducedBy::Strategy(Strategy::Placeholder).to_string(),
            "placeholder"
        );
    }
}
