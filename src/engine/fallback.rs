//! Client for the secondary HTML renderer speaking the JSON `/convert`
//! protocol:
//!
//! ```text
//! POST {base}/convert
//! {"html": "...", "css": "...", "options": {"page_size": "A4", "margin": "0.50in", "orientation": "portrait"}}
//!
//! 200 {"success": true,  "pdf": "<base64>", "size": 1234}
//! 4xx {"success": false, "error": "Missing 'html' field in request body"}
//! ```

use super::{validate_pdf, HtmlDocument, HtmlRenderer};
use crate::config::PageLayout;
use crate::error::{EngineError, Mail2PdfError};
use crate::templates;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const ENGINE: &str = "fallback-renderer";

#[derive(Debug, Serialize)]
struct ConvertRequest<'a> {
    html: &'a str,
    css: String,
    options: ConvertOptions,
}

#[derive(Debug, Serialize)]
struct ConvertOptions {
    page_size: &'static str,
    margin: String,
    orientation: &'static str,
}

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    pdf: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FallbackRendererClient {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl FallbackRendererClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, Mail2PdfError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Mail2PdfError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }
}

#[async_trait]
impl HtmlRenderer for FallbackRendererClient {
    fn name(&self) -> &str {
        ENGINE
    }

    async fn render(&self, doc: &HtmlDocument, layout: &PageLayout) -> Result<Vec<u8>, EngineError> {
        let body = ConvertRequest {
            html: &doc.html,
            css: templates::print_stylesheet(layout, doc.css.as_deref()),
            options: ConvertOptions {
                page_size: layout.size.as_str(),
                margin: layout.margin_css(),
                orientation: layout.orientation.as_str(),
            },
        };

        debug!("POST {}/convert", self.base_url);
        let response = self
            .client
            .post(format!("{}/convert", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout {
                        engine: ENGINE.into(),
                        secs: self.timeout_secs,
                    }
                } else {
                    EngineError::Unavailable {
                        engine: ENGINE.into(),
                        detail: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let parsed: Option<ConvertResponse> = response.json().await.ok();
        decode_response(status.as_u16(), parsed)
    }
}

fn decode_response(status: u16, parsed: Option<ConvertResponse>) -> Result<Vec<u8>, EngineError> {
    let Some(parsed) = parsed else {
        return Err(EngineError::Status {
            engine: ENGINE.into(),
            status,
            body: "response is not JSON".into(),
        });
    };
    let error = parsed.error.unwrap_or_else(|| "unknown error".into());

    if status == 400 {
        return Err(EngineError::Rejected {
            engine: ENGINE.into(),
            detail: error,
        });
    }
    if !(200..300).contains(&status) || !parsed.success {
        return Err(EngineError::Status {
            engine: ENGINE.into(),
            status,
            body: error,
        });
    }

    let encoded = parsed.pdf.ok_or_else(|| EngineError::InvalidOutput {
        engine: ENGINE.into(),
        detail: "success without a 'pdf' field".into(),
    })?;
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| EngineError::InvalidOutput {
            engine: ENGINE.into(),
            detail: format!("pdf field is not base64: {e}"),
        })?;
    validate_pdf(ENGINE, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: serde_json::Value) -> Option<ConvertResponse> {
        serde_json::from_value(json).ok()
    }

    #[test]
    fn success_decodes_base64_pdf() {
        let pdf = STANDARD.encode(b"%PDF-1.7 body");
        let bytes = decode_response(
            200,
            response(serde_json::json!({"success": true, "pdf": pdf, "size": 13})),
        )
        .unwrap();
        assert_eq!(bytes, b"%PDF-1.7 body");
    }

    #[test]
    fn bad_request_is_a_rejection() {
        let err = decode_response(
            400,
            response(serde_json::json!({"success": false, "error": "Missing 'html'"})),
        )
        .unwrap_err();
        assert!(err.is_rejection());
        assert!(err.to_string().contains("Missing 'html'"));
    }

    #[test]
    fn server_error_is_not_a_rejection() {
        let err = decode_response(500, response(serde_json::json!({"success": false}))).unwrap_err();
        assert!(matches!(err, EngineError::Status { status: 500, .. }));
    }

    #[test]
    fn non_pdf_payload_is_invalid_output() {
        let junk = STANDARD.encode(b"<html>");
        let err = decode_response(200, response(serde_json::json!({"success": true, "pdf": junk})))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOutput { .. }));
    }

    #[test]
    fn request_serialises_options() {
        let layout = PageLayout::default();
        let body = ConvertRequest {
            html: "<p>x</p>",
            css: String::new(),
            options: ConvertOptions {
                page_size: layout.size.as_str(),
                margin: layout.margin_css(),
                orientation: layout.orientation.as_str(),
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["options"]["page_size"], "A4");
        assert_eq!(json["options"]["margin"], "0.50in");
        assert_eq!(json["options"]["orientation"], "portrait");
    }
}
