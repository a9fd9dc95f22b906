//! Content-type dispatch: which conversion strategies to try, in order.
//!
//! The registry is an explicit, ordered rule table. The first rule whose
//! predicate matches the declared MIME type or file extension decides the
//! strategy chain. Every chain ends with [`Strategy::Placeholder`], which
//! cannot fail.

use crate::output::ConversionRequest;
use serde::{Deserialize, Serialize};

/// One way of turning input bytes into a PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// The bytes already are a PDF.
    Passthrough,
    /// The external document-conversion engine (LibreOffice).
    DocumentEngine,
    /// Embed the image on a generated page.
    ImageWrapper,
    /// Monospace rendering, line breaks preserved.
    PlainText,
    /// A page stating the file could not be converted.
    Placeholder,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Passthrough => "passthrough",
            Strategy::DocumentEngine => "document_engine",
            Strategy::ImageWrapper => "image_wrapper",
            Strategy::PlainText => "plain_text",
            Strategy::Placeholder => "placeholder",
        }
    }
}

const OFFICE_EXTENSIONS: &[&str] = &[
    "doc", "docx", "odt", "rtf", "xls", "xlsx", "ods", "ppt", "pptx", "odp", "txt", "csv", "html",
    "htm",
];

const OFFICE_MIME_TYPES: &[&str] = &[
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.oasis.opendocument.text",
    "application/rtf",
    "text/rtf",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.oasis.opendocument.spreadsheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.oasis.opendocument.presentation",
    "text/plain",
    "text/csv",
    "text/html",
];

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// The declared facts the rules look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Lower-cased MIME type without parameters.
    pub mime: String,
    pub extension: Option<String>,
}

impl Classification {
    pub fn new(content_type: &str, extension: Option<&str>) -> Self {
        Self {
            mime: normalize_mime(content_type),
            extension: extension.map(|e| e.trim_start_matches('.').to_ascii_lowercase()),
        }
    }

    pub fn of(req: &ConversionRequest) -> Self {
        Self::new(req.content_type(), req.extension().as_deref())
    }

    fn ext_in(&self, set: &[&str]) -> bool {
        self.extension.as_deref().is_some_and(|e| set.contains(&e))
    }

    /// Plain-text style content the in-process wrapper can render as a
    /// second chance when the document engine is unavailable.
    fn is_textual(&self) -> bool {
        self.mime == "text/plain" || self.mime == "text/csv" || self.ext_in(&["txt", "csv"])
    }
}

/// One row of the rule table.
struct Rule {
    name: &'static str,
    matches: fn(&Classification) -> bool,
    chain: fn(&Classification) -> Vec<Strategy>,
}

/// Maps a declared content type / extension to an ordered strategy chain.
pub struct ConverterRegistry {
    rules: Vec<Rule>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("rules", &self.rules.iter().map(|r| r.name).collect::<Vec<_>>())
            .finish()
    }
}

impl ConverterRegistry {
    pub fn new() -> Self {
        let rules = vec![
            Rule {
                name: "pdf",
                matches: |c| c.mime == "application/pdf",
                chain: |_| vec![Strategy::Passthrough, Strategy::Placeholder],
            },
            Rule {
                name: "office",
                matches: |c| c.ext_in(OFFICE_EXTENSIONS) || OFFICE_MIME_TYPES.contains(&c.mime.as_str()),
                chain: |c| {
                    if c.is_textual() {
                        vec![Strategy::DocumentEngine, Strategy::PlainText, Strategy::Placeholder]
                    } else {
                        vec![Strategy::DocumentEngine, Strategy::Placeholder]
                    }
                },
            },
            Rule {
                name: "image",
                matches: |c| c.mime.starts_with("image/") || c.ext_in(IMAGE_EXTENSIONS),
                chain: |_| vec![Strategy::ImageWrapper, Strategy::Placeholder],
            },
            Rule {
                name: "text",
                matches: |c| c.mime.starts_with("text/"),
                chain: |_| vec![Strategy::PlainText, Strategy::Placeholder],
            },
        ];
        Self { rules }
    }

    /// The strategy chain for `req`. Never empty; always ends with
    /// [`Strategy::Placeholder`].
    pub fn strategies_for(&self, req: &ConversionRequest) -> Vec<Strategy> {
        self.lookup(&Classification::of(req))
    }

    pub fn lookup(&self, class: &Classification) -> Vec<Strategy> {
        self.rules
            .iter()
            .find(|rule| (rule.matches)(class))
            .map(|rule| (rule.chain)(class))
            .unwrap_or_else(|| vec![Strategy::Placeholder])
    }

    /// Name of the rule that matched, for logging.
    pub fn rule_name(&self, class: &Classification) -> &'static str {
        self.rules
            .iter()
            .find(|rule| (rule.matches)(class))
            .map(|rule| rule.name)
            .unwrap_or("unsupported")
    }
}

/// Lower-case and strip parameters: `Text/Plain; charset=utf-8` → `text/plain`.
pub fn normalize_mime(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// A file extension the document engine will recognise for `mime`.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let ext = match normalize_mime(mime).as_str() {
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.oasis.opendocument.text" => "odt",
        "application/rtf" | "text/rtf" => "rtf",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.oasis.opendocument.spreadsheet" => "ods",
        "application/vnd.ms-powerpoint" => "ppt",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        "application/vnd.oasis.opendocument.presentation" => "odp",
        "text/plain" => "txt",
        "text/csv" => "csv",
        "text/html" => "html",
        "application/pdf" => "pdf",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        _ => return None,
    };
    Some(ext)
}
