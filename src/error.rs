//! Error types for the edgequake-mail2pdf library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`Mail2PdfError`] — **Fatal**: the request cannot be answered at all
//!   (missing HTML body, malformed base64, the body failed on every
//!   renderer). Returned as `Err(Mail2PdfError)` from
//!   [`crate::convert::Mail2Pdf::convert`].
//!
//! * [`ItemError`] — **Non-fatal**: one attachment could not be converted
//!   but the e-mail body and every other attachment are fine. Stored inside
//!   [`crate::output::ItemReport`] so callers see per-item outcomes instead
//!   of losing the whole request to one broken file.
//!
//! * [`EngineError`] — the typed result of every call to an external
//!   converter. The pipeline inspects it to decide whether to fall through
//!   to the next strategy; it never escapes the pipeline as-is.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-mail2pdf library.
///
/// Attachment-level failures use [`ItemError`] and are stored in
/// [`crate::output::ItemReport`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Mail2PdfError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The request is structurally unusable (missing or empty HTML body, …).
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    /// An attachment's `content` field is not valid base64.
    #[error("Attachment '{name}' has malformed content: {reason}")]
    MalformedAttachment { name: String, reason: String },

    /// A request option could not be understood.
    #[error("Invalid value for option '{field}': '{value}'")]
    InvalidOption { field: String, value: String },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The e-mail body could not be rendered by any HTML engine.
    #[error("E-mail body could not be converted to PDF: {reason}")]
    BodyConversionFailed { reason: String },

    /// The request deadline passed before the e-mail body was rendered.
    #[error("Request timed out after {secs}s before the e-mail body was converted")]
    RequestTimeout { secs: u64 },

    /// Building the zip archive failed.
    #[error("Failed to package PDFs: {0}")]
    Packaging(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// The opt-in cache directory could not be prepared or read.
    #[error("Cache directory '{path}' is unusable: {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Mail2PdfError {
    /// `true` for errors caused by the caller's request rather than by the
    /// service or its engines.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Mail2PdfError::InvalidInput(_)
                | Mail2PdfError::MalformedAttachment { .. }
                | Mail2PdfError::InvalidOption { .. }
        )
    }

    /// Convert into the JSON body returned to clients.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            success: false,
            error: self.to_string(),
        }
    }
}

/// The `{success: false, error}` shape every failed request answers with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// A non-fatal error for a single attachment or extracted image.
///
/// The item is omitted from the merged PDF, the zip archive and the
/// individual manifest; the request itself still succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemError {
    /// The attachment arrived without any bytes.
    #[error("'{name}': no content provided")]
    Empty { name: String },

    /// A converter examined the content and declared it invalid.
    #[error("'{name}': {reason}")]
    Rejected { name: String, reason: String },

    /// Every strategy in the chain failed, including the placeholder.
    #[error("'{name}': every conversion strategy failed: {reason}")]
    Exhausted { name: String, reason: String },

    /// The request deadline passed while this item was still converting.
    #[error("'{name}': abandoned after the {secs}s request deadline")]
    Abandoned { name: String, secs: u64 },
}

/// Failure of a single call to an external (or in-process) converter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Network failure: connection refused, DNS, reset, …
    #[error("{engine} is unreachable: {detail}")]
    Unavailable { engine: String, detail: String },

    /// The call exceeded its timeout.
    #[error("{engine} timed out after {secs}s")]
    Timeout { engine: String, secs: u64 },

    /// The engine answered with a non-success status.
    #[error("{engine} returned HTTP {status}: {body}")]
    Status {
        engine: String,
        status: u16,
        body: String,
    },

    /// The engine looked at the content and refused it as invalid.
    #[error("{engine} rejected the input: {detail}")]
    Rejected { engine: String, detail: String },

    /// The engine answered 2xx but the body is not a PDF.
    #[error("{engine} returned invalid output: {detail}")]
    InvalidOutput { engine: String, detail: String },
}

impl EngineError {
    /// `true` when the failure says something about the content rather than
    /// about the engine's availability.
    pub fn is_rejection(&self) -> bool {
        matches!(self, EngineError::Rejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_attachment_display() {
        let e = Mail2PdfError::MalformedAttachment {
            name: "report.docx".into(),
            reason: "Invalid byte 42, offset 3.".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("report.docx"), "got: {msg}");
        assert!(e.is_input_error());
    }

    #[test]
    fn body_failure_is_not_input_error() {
        let e = Mail2PdfError::BodyConversionFailed {
            reason: "gotenberg timed out after 30s".into(),
        };
        assert!(!e.is_input_error());
        assert!(e.to_string().contains("timed out"));
    }

    #[test]
    fn error_response_carries_flag_and_reason() {
        let e = Mail2PdfError::InvalidInput("missing 'html' field".into());
        let resp = e.to_response();
        assert!(!resp.success);
        assert!(resp.error.contains("missing 'html' field"));

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
    }

    #[test]
    fn item_error_serialises_with_tag() {
        let e = ItemError::Abandoned {
            name: "big.pptx".into(),
            secs: 120,
        };
        assert!(e.to_string().contains("120s"));
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "abandoned");
        assert_eq!(json["name"], "big.pptx");
    }

    #[test]
    fn only_rejected_counts_as_rejection() {
        let rejected = EngineError::Rejected {
            engine: "gotenberg".into(),
            detail: "corrupt archive".into(),
        };
        let status = EngineError::Status {
            engine: "gotenberg".into(),
            status: 503,
            body: "busy".into(),
        };
        assert!(rejected.is_rejection());
        assert!(!status.is_rejection());
        assert!(status.to_string().contains("503"));
    }
}
