//! The service handle: one e-mail request in, one deliverable out.
//!
//! ## Why one handle?
//!
//! The content cache and the result store are shared by every request a
//! process serves. [`Mail2Pdf`] owns both, is built once at startup and is
//! passed by reference (or behind an `Arc`) to whatever answers requests.
//! Dropping it tears everything down; nothing lives in module globals.
//!
//! ## Request flow
//!
//! ```text
//! validate ─▶ cid ─▶ ┬─ body        (cache, primary, fallback) ─┐
//!                    └─ attachments (cache, strategies) ×N ─────┴─▶ full | zip | individual
//! ```
//!
//! The body and the attachments convert concurrently, attachments bounded
//! by `concurrency`. Every item runs against the same request deadline;
//! whatever has not finished by then is abandoned. The external merge is
//! bounded by that deadline too.

use crate::cache::{CacheStats, ContentCache};
use crate::config::{PageLayout, ServiceConfig};
use crate::engine::Engines;
use crate::error::{ItemError, Mail2PdfError};
use crate::health::{HealthMonitor, HealthReport};
use crate::merge::{sanitize_filename, unique_filenames, MergeEngine};
use crate::output::{
    Artifact, ConversionOutput, ConversionRequest, ConversionResult, ConversionStats, ItemKind, ItemReport,
    ManifestEntry, NamedPdf, ProducedBy,
};
use crate::pipeline::{cid, extract, ConversionPipeline};
use crate::registry::Strategy;
use crate::request::{EmailRequest, OutputMode};
use crate::store::{ResultStore, StoredPdf};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Name the body goes by in progress events and item reports.
const BODY_NAME: &str = "email.html";

struct WorkItem {
    kind: ItemKind,
    request: ConversionRequest,
}

type ItemOutcome = Result<(Vec<u8>, ProducedBy), ItemError>;

/// E-mail to PDF conversion service.
pub struct Mail2Pdf {
    config: ServiceConfig,
    pipeline: ConversionPipeline,
    merger: MergeEngine,
    store: ResultStore,
    health: HealthMonitor,
}

impl std::fmt::Debug for Mail2Pdf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mail2Pdf")
            .field("config", &self.config)
            .field("pipeline", &self.pipeline)
            .field("merger", &self.merger)
            .finish_non_exhaustive()
    }
}

impl Mail2Pdf {
    /// Connect to the engines named in `config`.
    ///
    /// No network traffic happens here; unreachable engines show up as
    /// fallbacks during conversion and in [`Mail2Pdf::health`].
    pub fn new(config: ServiceConfig) -> Result<Self, Mail2PdfError> {
        let engines = Engines::from_config(&config)?;
        Self::with_engines(config, engines)
    }

    /// Use caller-supplied engines (alternative backends, test doubles).
    pub fn with_engines(config: ServiceConfig, engines: Engines) -> Result<Self, Mail2PdfError> {
        let cache = Arc::new(ContentCache::from_config(&config)?);
        let merger = MergeEngine::new(engines.merger.clone());
        let health = HealthMonitor::new(
            engines.health.clone(),
            Duration::from_secs(config.health_cache_secs),
        );
        let store = ResultStore::from_config(&config);
        let pipeline = ConversionPipeline::new(cache, engines);
        Ok(Self {
            config,
            pipeline,
            merger,
            store,
            health,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Convert one e-mail.
    ///
    /// # Errors
    /// Only fatal conditions are returned: invalid input, a body no renderer
    /// could convert, a deadline that passed before the body was ready, or a
    /// zip archive that could not be built. Attachment failures are reported
    /// per item in [`ConversionOutput::items`].
    pub async fn convert(&self, request: EmailRequest) -> Result<ConversionOutput, Mail2PdfError> {
        let started = Instant::now();
        let req = request.validate(&self.config)?;
        let deadline = tokio::time::Instant::now()
            .checked_add(req.timeout)
            .ok_or_else(|| Mail2PdfError::InvalidOption {
                field: "timeout_secs".into(),
                value: req.timeout.as_secs().to_string(),
            })?;
        let deadline_secs = req.timeout.as_secs();
        let cb = self.config.progress_callback.as_ref();
        info!(
            "Starting conversion: {} attachment(s), mode={}",
            req.attachments.len(),
            req.mode
        );

        // ── Step 1: Resolve cid: references ──────────────────────────────
        let resolution = cid::resolve_cids(&req.html, &req.attachments);
        if !resolution.unresolved.is_empty() {
            warn!("Unresolved cid references: {:?}", resolution.unresolved);
        }

        // ── Step 2: Build the work list ──────────────────────────────────
        let mut work: Vec<WorkItem> = Vec::with_capacity(req.attachments.len());
        for (i, attachment) in req.attachments.into_iter().enumerate() {
            if attachment.inline && resolution.resolved.contains(&i) {
                debug!("'{}' was inlined into the body; not converting it again", attachment.request.name());
                continue;
            }
            work.push(WorkItem {
                kind: ItemKind::Attachment,
                request: attachment.request,
            });
        }
        if req.extract_images {
            let images = extract::extract_images(&resolution.html);
            debug!("Extracted {} embedded image(s)", images.len());
            work.extend(images.into_iter().map(|request| WorkItem {
                kind: ItemKind::EmbeddedImage,
                request,
            }));
        }

        let total = work.len() + 1;
        if req.mode == OutputMode::Individual && total > self.store.capacity() {
            return Err(Mail2PdfError::InvalidInput(format!(
                "individual mode would store {} PDFs but the result store holds at most {}",
                total,
                self.store.capacity()
            )));
        }
        if let Some(cb) = cb {
            cb.on_conversion_start(total);
        }

        // ── Step 3: Convert body and attachments concurrently ────────────
        let layout = req.layout;
        let pipeline = &self.pipeline;

        let body = async {
            if let Some(cb) = cb {
                cb.on_item_start(0, total, BODY_NAME);
            }
            let result = tokio::time::timeout_at(
                deadline,
                pipeline.convert_html(&resolution.html, req.css.as_deref(), &layout),
            )
            .await;
            match result {
                Ok(ConversionResult::Success { pdf, produced_by }) => {
                    if let Some(cb) = cb {
                        cb.on_item_complete(0, total, BODY_NAME, pdf.len());
                    }
                    Ok((pdf, produced_by))
                }
                Ok(ConversionResult::Failure { reason, .. }) => {
                    error!("E-mail body could not be converted: {}", reason);
                    if let Some(cb) = cb {
                        cb.on_item_error(0, total, BODY_NAME, &reason);
                    }
                    Err(Mail2PdfError::BodyConversionFailed { reason })
                }
                Err(_) => {
                    error!("Request deadline of {}s passed before the body was converted", deadline_secs);
                    Err(Mail2PdfError::RequestTimeout { secs: deadline_secs })
                }
            }
        };

        let attachments = async {
            let outcomes: Vec<(usize, ItemOutcome)> = stream::iter(work.iter().enumerate().map(|(pos, item)| {
                let index = pos + 1;
                async move {
                    let name = item.request.name();
                    if let Some(cb) = cb {
                        cb.on_item_start(index, total, name);
                    }
                    let outcome = convert_item(pipeline, item, &layout, deadline, deadline_secs).await;
                    if let Some(cb) = cb {
                        match outcome {
                            Ok((ref pdf, _)) => cb.on_item_complete(index, total, name, pdf.len()),
                            Err(ref e) => cb.on_item_error(index, total, name, &e.to_string()),
                        }
                    }
                    (index, outcome)
                }
            }))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;
            Ok::<_, Mail2PdfError>(outcomes)
        };

        let ((body_pdf, body_by), mut outcomes) = tokio::try_join!(body, attachments)?;
        outcomes.sort_by_key(|(index, _)| *index);

        // ── Step 4: Reports and the ordered PDF list ─────────────────────
        let mut stats = ConversionStats {
            total_items: total,
            ..ConversionStats::default()
        };
        let mut items = Vec::with_capacity(total);
        let mut pdfs = Vec::with_capacity(total);

        record_success(&mut stats, body_by);
        items.push(ItemReport {
            index: 0,
            name: BODY_NAME.to_string(),
            kind: ItemKind::Body,
            converted: true,
            produced_by: Some(body_by.to_string()),
            size: body_pdf.len(),
            error: None,
        });
        pdfs.push(NamedPdf {
            name: req.filename.clone(),
            bytes: body_pdf,
        });

        for ((index, outcome), item) in outcomes.into_iter().zip(&work) {
            let name = item.request.name().to_string();
            match outcome {
                Ok((pdf, produced_by)) => {
                    record_success(&mut stats, produced_by);
                    items.push(ItemReport {
                        index,
                        name: name.clone(),
                        kind: item.kind,
                        converted: true,
                        produced_by: Some(produced_by.to_string()),
                        size: pdf.len(),
                        error: None,
                    });
                    pdfs.push(NamedPdf { name, bytes: pdf });
                }
                Err(e) => {
                    warn!("Attachment dropped: {}", e);
                    stats.failed_items += 1;
                    items.push(ItemReport {
                        index,
                        name,
                        kind: item.kind,
                        converted: false,
                        produced_by: None,
                        size: 0,
                        error: Some(e),
                    });
                }
            }
        }

        if let Some(cb) = cb {
            cb.on_conversion_complete(total, stats.converted_items);
        }

        // ── Step 5: Deliver ──────────────────────────────────────────────
        let artifact = match req.mode {
            OutputMode::Full => {
                let merged = self.merger.merge_full_before(&pdfs, deadline).await;
                stats.merge = Some(merged.strategy);
                Artifact::Pdf {
                    filename: req.filename.clone(),
                    bytes: merged.bytes,
                }
            }
            OutputMode::Zip => {
                let bytes = self.merger.package_zip(&pdfs)?;
                let stem = req.filename.strip_suffix(".pdf").unwrap_or(&req.filename);
                Artifact::Zip {
                    filename: format!("{stem}.zip"),
                    bytes,
                }
            }
            OutputMode::Individual => Artifact::Manifest {
                entries: self.store_individually(pdfs)?,
            },
        };

        stats.total_duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Conversion complete: {}/{} items, {} failed, {}ms",
            stats.converted_items, stats.total_items, stats.failed_items, stats.total_duration_ms
        );

        Ok(ConversionOutput {
            artifact,
            items,
            stats,
        })
    }

    /// Fetch a PDF stored by an individual-mode request.
    pub fn download(&self, id: &str) -> Option<StoredPdf> {
        self.store.get(id)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.pipeline.cache().stats()
    }

    pub fn clear_cache(&self) {
        self.pipeline.cache().clear();
        info!("Content cache cleared");
    }

    /// Engine reachability plus cache and store figures.
    pub async fn health(&self) -> HealthReport {
        let status = self.health.check().await;
        HealthReport {
            engine_reachable: status.reachable,
            from_cache: status.from_cache,
            cache: self.cache_stats(),
            stored_results: self.store.len(),
        }
    }

    /// Store every PDF as one batch so none of them evicts another.
    fn store_individually(&self, pdfs: Vec<NamedPdf>) -> Result<Vec<ManifestEntry>, Mail2PdfError> {
        let names: Vec<String> = pdfs
            .iter()
            .map(|p| sanitize_filename(&p.name, "attachment"))
            .collect();
        let filenames = unique_filenames(&names);
        let sizes: Vec<usize> = pdfs.iter().map(|p| p.bytes.len()).collect();
        let count = pdfs.len();

        let batch = pdfs
            .into_iter()
            .zip(&filenames)
            .map(|(pdf, filename)| (pdf.bytes, filename.clone()))
            .collect();
        let ids = self.store.put_all(batch).ok_or_else(|| {
            Mail2PdfError::InvalidInput(format!(
                "individual mode would store {} PDFs but the result store holds at most {}",
                count,
                self.store.capacity()
            ))
        })?;

        Ok(ids
            .into_iter()
            .zip(filenames)
            .zip(sizes)
            .map(|((id, filename), size)| ManifestEntry {
                download_url: format!("/download/{id}"),
                id,
                filename,
                size,
            })
            .collect())
    }
}

async fn convert_item(
    pipeline: &ConversionPipeline,
    item: &WorkItem,
    layout: &PageLayout,
    deadline: tokio::time::Instant,
    deadline_secs: u64,
) -> ItemOutcome {
    let name = item.request.name();
    if item.request.content().is_empty() {
        return Err(ItemError::Empty { name: name.to_string() });
    }
    match tokio::time::timeout_at(deadline, pipeline.convert_attachment(&item.request, layout)).await {
        Ok(ConversionResult::Success { pdf, produced_by }) => Ok((pdf, produced_by)),
        Ok(failure) => Err(failure.item_error(name).unwrap_or_else(|| ItemError::Exhausted {
            name: name.to_string(),
            reason: "unknown failure".into(),
        })),
        Err(_) => Err(ItemError::Abandoned {
            name: name.to_string(),
            secs: deadline_secs,
        }),
    }
}

fn record_success(stats: &mut ConversionStats, produced_by: ProducedBy) {
    stats.converted_items += 1;
    match produced_by {
        ProducedBy::Cache => stats.cache_hits += 1,
        ProducedBy::Strategy(Strategy::Placeholder) => stats.placeholders += 1,
        _ => {}
    }
}

/// Write `bytes` to `path` atomically (temp file + rename).
pub async fn write_output(path: impl AsRef<Path>, bytes: &[u8]) -> Result<(), Mail2PdfError> {
    let path = path.as_ref();
    let failed = |e| Mail2PdfError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, bytes).await.map_err(failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(failed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{healthy, MockEngine};
    use crate::progress::ConversionProgressCallback;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service(engines: Engines) -> Mail2Pdf {
        Mail2Pdf::with_engines(ServiceConfig::default(), engines).unwrap()
    }

    #[tokio::test]
    async fn body_only_full_mode_is_a_single_pdf() {
        let out = service(healthy())
            .convert(EmailRequest::from_html("<h1>Hi</h1>"))
            .await
            .unwrap();
        let bytes = out.artifact.bytes().unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
        assert_eq!(out.stats.merge, Some(crate::merge::MergeStrategy::Single));
        assert_eq!(out.items.len(), 1);
    }

    #[tokio::test]
    async fn missing_body_is_an_input_error() {
        let err = service(healthy()).convert(EmailRequest::default()).await.unwrap_err();
        assert!(err.is_input_error());
    }

    #[tokio::test]
    async fn oversized_timeout_is_an_input_error() {
        let mut req = EmailRequest::from_html("<p>x</p>");
        req.options.timeout_secs = Some(u64::MAX);
        let err = service(healthy()).convert(req).await.unwrap_err();
        assert!(err.is_input_error());
        assert!(matches!(err, Mail2PdfError::InvalidOption { ref field, .. } if field == "timeout_secs"));
    }

    #[tokio::test]
    async fn body_failure_is_fatal() {
        let mut engines = healthy();
        engines.html_primary = MockEngine::failing("chromium");
        engines.html_fallback = None;
        let err = service(engines)
            .convert(EmailRequest::from_html("<p>x</p>"))
            .await
            .unwrap_err();
        assert!(matches!(err, Mail2PdfError::BodyConversionFailed { .. }));
    }

    #[tokio::test]
    async fn empty_attachment_is_reported_not_fatal() {
        let req = EmailRequest::from_html("<p>x</p>").with_attachment("empty.txt", "text/plain", b"");
        let out = service(healthy()).convert(req).await.unwrap();
        assert_eq!(out.stats.failed_items, 1);
        assert!(matches!(out.items[1].error, Some(ItemError::Empty { .. })));
    }

    #[tokio::test]
    async fn inline_cid_attachment_is_not_converted_twice() {
        let mut req = EmailRequest::from_html(r#"<img src="cid:logo@x">"#).with_attachment(
            "logo.png",
            "image/png",
            b"\x89PNG\r\n",
        );
        req.attachments[0].content_id = Some("<logo@x>".into());
        req.attachments[0].is_inline = true;
        let out = service(healthy()).convert(req).await.unwrap();
        assert_eq!(out.stats.total_items, 1);
    }

    #[derive(Default)]
    struct Counter {
        starts: AtomicUsize,
        done: AtomicUsize,
    }

    impl ConversionProgressCallback for Counter {
        fn on_item_start(&self, _: usize, _: usize, _: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn on_conversion_complete(&self, _: usize, success: usize) {
            self.done.store(success, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn progress_events_cover_every_item() {
        let counter = Arc::new(Counter::default());
        let config = ServiceConfig::builder()
            .progress_callback(counter.clone())
            .build()
            .unwrap();
        let svc = Mail2Pdf::with_engines(config, healthy()).unwrap();
        let req = EmailRequest::from_html("<p>x</p>")
            .with_attachment("a.txt", "text/plain", b"a")
            .with_attachment("b.txt", "text/plain", b"b");
        svc.convert(req).await.unwrap();
        assert_eq!(counter.starts.load(Ordering::SeqCst), 3);
        assert_eq!(counter.done.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn write_output_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.pdf");
        write_output(&path, b"%PDF-1.4").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4");
        assert!(!dir.path().join("nested").join("out.pdf.tmp").exists());
    }
}
