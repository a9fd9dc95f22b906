//! Combining per-item PDFs: one merged document, or a zip archive.
//!
//! ## Why best-effort?
//!
//! Merging happens after every conversion already succeeded. Failing the
//! request at this point would throw that work away, so the chain is:
//! external merge engine → in-process merge → the first item (the e-mail
//! body) alone. The caller learns which one ran from [`MergeStrategy`].

use crate::engine::{LocalMerger, PdfMerger};
use crate::error::Mail2PdfError;
use crate::output::NamedPdf;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// How a merged PDF was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Only one item; returned unchanged.
    Single,
    /// The external merge engine.
    Primary,
    /// The in-process page concatenation.
    InProcess,
    /// Both merges failed; only the first item was returned.
    Degraded,
}

#[derive(Debug, Clone)]
pub struct MergedPdf {
    pub bytes: Vec<u8>,
    pub strategy: MergeStrategy,
}

pub struct MergeEngine {
    primary: Option<Arc<dyn PdfMerger>>,
    fallback: Arc<dyn PdfMerger>,
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine")
            .field("primary", &self.primary.as_ref().map(|m| m.name().to_string()))
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

impl MergeEngine {
    /// `primary` (if any) with the in-process merger as fallback.
    pub fn new(primary: Option<Arc<dyn PdfMerger>>) -> Self {
        Self::with_fallback(primary, Arc::new(LocalMerger))
    }

    pub fn with_fallback(primary: Option<Arc<dyn PdfMerger>>, fallback: Arc<dyn PdfMerger>) -> Self {
        Self { primary, fallback }
    }

    /// Merge `items` into one PDF in slice order. Never fails: the worst
    /// case is the first item alone.
    pub async fn merge_full(&self, items: &[NamedPdf]) -> MergedPdf {
        self.merge_with_deadline(items, None).await
    }

    /// [`MergeEngine::merge_full`] with the external merge bounded by
    /// `deadline`. Once it passes, the in-process merge takes over.
    pub async fn merge_full_before(&self, items: &[NamedPdf], deadline: Instant) -> MergedPdf {
        self.merge_with_deadline(items, Some(deadline)).await
    }

    async fn merge_with_deadline(&self, items: &[NamedPdf], deadline: Option<Instant>) -> MergedPdf {
        match items {
            [] => {
                warn!("merge_full called with no items");
                return MergedPdf {
                    bytes: Vec::new(),
                    strategy: MergeStrategy::Degraded,
                };
            }
            [only] => {
                return MergedPdf {
                    bytes: only.bytes.clone(),
                    strategy: MergeStrategy::Single,
                }
            }
            _ => {}
        }

        if let Some(ref primary) = self.primary {
            let merged = match deadline {
                Some(deadline) if Instant::now() >= deadline => None,
                Some(deadline) => tokio::time::timeout_at(deadline, primary.merge(items)).await.ok(),
                None => Some(primary.merge(items).await),
            };
            match merged {
                Some(Ok(bytes)) => {
                    debug!("Merged {} PDFs with {}", items.len(), primary.name());
                    return MergedPdf {
                        bytes,
                        strategy: MergeStrategy::Primary,
                    };
                }
                Some(Err(e)) => warn!("Primary merge failed, merging in-process: {}", e),
                None => warn!(
                    "{} did not merge before the request deadline, merging in-process",
                    primary.name()
                ),
            }
        }

        match self.fallback.merge(items).await {
            Ok(bytes) => {
                debug!("Merged {} PDFs in-process", items.len());
                MergedPdf {
                    bytes,
                    strategy: MergeStrategy::InProcess,
                }
            }
            Err(e) => {
                warn!(
                    "In-process merge failed, returning '{}' alone: {}",
                    items[0].name, e
                );
                MergedPdf {
                    bytes: items[0].bytes.clone(),
                    strategy: MergeStrategy::Degraded,
                }
            }
        }
    }

    /// A zip archive with one `.pdf` entry per item. Entry names are
    /// sanitised and made unique, so no entry overwrites another.
    pub fn package_zip(&self, items: &[NamedPdf]) -> Result<Vec<u8>, Mail2PdfError> {
        let names: Vec<String> = items
            .iter()
            .map(|item| sanitize_filename(&item.name, "attachment"))
            .collect();
        let names = unique_filenames(&names);

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, item) in names.into_iter().zip(items) {
            zip.start_file(name, options)
                .map_err(|e| Mail2PdfError::Packaging(e.to_string()))?;
            zip.write_all(&item.bytes)
                .map_err(|e| Mail2PdfError::Packaging(e.to_string()))?;
        }
        let cursor = zip
            .finish()
            .map_err(|e| Mail2PdfError::Packaging(e.to_string()))?;
        Ok(cursor.into_inner())
    }
}

/// The declared name without its extension, reduced to alphanumerics and
/// `._- `, trimmed. `None` when nothing survives.
pub fn sanitize_stem(name: &str) -> Option<String> {
    let name = name.trim();
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.trim().is_empty() => stem,
        _ => name,
    };
    let cleaned: String = stem
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '))
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// `sanitize_stem(name)` + `.pdf`, using `fallback` when nothing survives
/// and `attachment` when the fallback does not survive either.
pub fn sanitize_filename(name: &str, fallback: &str) -> String {
    let stem = sanitize_stem(name)
        .or_else(|| sanitize_stem(fallback))
        .unwrap_or_else(|| "attachment".to_string());
    format!("{stem}.pdf")
}

/// Make `names` unique, case-insensitively, by suffixing `_2`, `_3`, ….
/// The first occurrence keeps its name.
pub fn unique_filenames(names: &[String]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(names.len());

    for name in names {
        let candidate = if taken.contains(&name.to_lowercase()) {
            let (stem, ext) = match name.rsplit_once('.') {
                Some((stem, ext)) => (stem, format!(".{ext}")),
                None => (name.as_str(), String::new()),
            };
            let mut n = 2;
            loop {
                let c = format!("{stem}_{n}{ext}");
                if !taken.contains(&c.to_lowercase()) {
                    break c;
                }
                n += 1;
            }
        } else {
            name.clone()
        };
        taken.insert(candidate.to_lowercase());
        out.push(candidate);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{labelled_pdf, MockEngine};
    use std::io::Read;

    fn item(name: &str, label: &str) -> NamedPdf {
        NamedPdf {
            name: name.into(),
            bytes: labelled_pdf(label),
        }
    }

    #[test]
    fn sanitising() {
        assert_eq!(sanitize_stem("Report (final).docx").as_deref(), Some("Report final"));
        assert_eq!(sanitize_stem("../../etc/passwd").as_deref(), Some("etcpasswd"));
        assert_eq!(sanitize_stem("???"), None);
        assert_eq!(sanitize_filename("photo.JPG", "attachment"), "photo.pdf");
        assert_eq!(sanitize_filename("", "email"), "email.pdf");
    }

    #[test]
    fn fallback_applies_only_when_nothing_survives() {
        assert_eq!(sanitize_filename("attachment.docx", "email"), "attachment.pdf");
        assert_eq!(sanitize_filename("my attachment.txt", "email"), "my attachment.pdf");
        assert_eq!(sanitize_filename("???.txt", "email"), "email.pdf");
        assert_eq!(sanitize_filename("???", "***"), "attachment.pdf");
    }

    #[test]
    fn unique_names_get_ordinal_suffixes() {
        let names: Vec<String> = ["a.pdf", "A.pdf", "a.pdf", "a_2.pdf"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            unique_filenames(&names),
            vec!["a.pdf", "A_2.pdf", "a_3.pdf", "a_2_2.pdf"]
        );
    }

    #[tokio::test]
    async fn single_item_is_returned_unchanged() {
        let engine = MergeEngine::new(None);
        let only = item("email", "BODY");
        let merged = engine.merge_full(std::slice::from_ref(&only)).await;
        assert_eq!(merged.strategy, MergeStrategy::Single);
        assert_eq!(merged.bytes, only.bytes);
    }

    #[tokio::test]
    async fn primary_failure_falls_back_in_process() {
        let primary = MockEngine::failing("gotenberg");
        let engine = MergeEngine::new(Some(primary.clone()));
        let merged = engine
            .merge_full(&[item("email", "A"), item("doc", "B")])
            .await;
        assert_eq!(merged.strategy, MergeStrategy::InProcess);
        assert_eq!(primary.calls(), 1);
        let doc = lopdf::Document::load_mem(&merged.bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }

    #[tokio::test]
    async fn both_failing_degrades_to_first_item() {
        let engine = MergeEngine::with_fallback(
            Some(MockEngine::failing("gotenberg")),
            MockEngine::failing("local"),
        );
        let first = item("email", "A");
        let merged = engine.merge_full(&[first.clone(), item("doc", "B")]).await;
        assert_eq!(merged.strategy, MergeStrategy::Degraded);
        assert_eq!(merged.bytes, first.bytes);
    }

    struct StalledMerger;

    #[async_trait::async_trait]
    impl PdfMerger for StalledMerger {
        fn name(&self) -> &str {
            "stalled"
        }
        async fn merge(&self, _items: &[NamedPdf]) -> Result<Vec<u8>, crate::error::EngineError> {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok(labelled_pdf("LATE"))
        }
    }

    #[tokio::test]
    async fn stalled_primary_yields_to_in_process_at_deadline() {
        let engine = MergeEngine::new(Some(Arc::new(StalledMerger)));
        let deadline = Instant::now() + std::time::Duration::from_millis(100);
        let started = std::time::Instant::now();
        let merged = engine
            .merge_full_before(&[item("email", "A"), item("doc", "B")], deadline)
            .await;
        assert_eq!(merged.strategy, MergeStrategy::InProcess);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        let doc = lopdf::Document::load_mem(&merged.bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }

    #[tokio::test]
    async fn passed_deadline_skips_the_primary() {
        let primary = MockEngine::ok("gotenberg", "MERGED");
        let engine = MergeEngine::new(Some(primary.clone()));
        let deadline = Instant::now();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let merged = engine
            .merge_full_before(&[item("email", "A"), item("doc", "B")], deadline)
            .await;
        assert_eq!(merged.strategy, MergeStrategy::InProcess);
        assert_eq!(primary.calls(), 0);
    }

    #[test]
    fn zip_keeps_colliding_entries() {
        let engine = MergeEngine::new(None);
        let bytes = engine
            .package_zip(&[item("email", "E"), item("report.docx", "R1"), item("report.xlsx", "R2")])
            .unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 3);
        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        assert!(names.contains(&"email.pdf".to_string()));
        assert!(names.contains(&"report.pdf".to_string()));
        assert!(names.contains(&"report_2.pdf".to_string()));

        let mut entry = archive.by_name("report_2.pdf").unwrap();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        assert!(content.starts_with(b"%PDF-"));
    }
}
