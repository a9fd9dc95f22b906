//! CLI binary for edgequake-mail2pdf.
//!
//! A thin shim over the library crate: reads a JSON conversion request,
//! maps CLI flags to `ServiceConfig` and writes the deliverable to disk.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_mail2pdf::request::MarginValue;
use edgequake_mail2pdf::{
    write_output, Artifact, ConversionOutput, ConversionProgressCallback, EmailRequest, Mail2Pdf,
    Mail2PdfError, OutputMode, ProgressCallback, ServiceConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per item. Items finish out of order
/// because attachments convert concurrently.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Validating request…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap()
            .remove(&index)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_items: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} items  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        self.bar.set_length(total_items as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Converting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting e-mail with {} item(s)…", total_items))
        ));
    }

    fn on_item_start(&self, index: usize, _total: usize, name: &str) {
        self.start_times.lock().unwrap().insert(index, Instant::now());
        self.bar.set_message(name.to_string());
    }

    fn on_item_complete(&self, index: usize, total: usize, name: &str, pdf_len: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {:<32} {}  {}",
            green("✓"),
            index + 1,
            total,
            name,
            dim(&format!("{:>8} bytes", pdf_len)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let secs = self.elapsed_secs(index);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {:<32} {}  {}",
            red("✗"),
            index + 1,
            total,
            name,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_items: usize, success_count: usize) {
        let failed = total_items.saturating_sub(success_count);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!("{} {} items converted", green("✔"), bold(&success_count.to_string()));
        } else {
            eprintln!(
                "{} {}/{} items converted  ({} failed)",
                cyan("⚠"),
                bold(&success_count.to_string()),
                total_items,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Merge the body and every attachment into one PDF
  mail2pdf request.json -o email.pdf

  # One PDF per item, written into a directory
  mail2pdf --mode individual request.json -o out/

  # Zip archive, request read from stdin
  cat request.json | mail2pdf --mode zip - -o email.zip

  # Check whether Gotenberg is reachable
  mail2pdf --health-only

REQUEST FILE:
  {
    "html": "<h1>Hi</h1>",
    "css": "h1 { color: navy; }",
    "attachments": [{"name": "notes.txt", "content": "<base64>", "contentType": "text/plain"}],
    "mode": "full",
    "options": {"page_size": "A4", "margin": "20mm", "orientation": "portrait"}
  }

ENVIRONMENT VARIABLES:
  MAIL2PDF_GOTENBERG_URL   Gotenberg base URL (default http://localhost:3000)
  MAIL2PDF_FALLBACK_URL    Fallback HTML renderer base URL (default http://localhost:5000)
  MAIL2PDF_CACHE_DIR       Persist the conversion cache in this directory
  RUST_LOG                 Override the log filter (e.g. edgequake_mail2pdf=debug)
"#;

#[derive(Parser, Debug)]
#[command(
    name = "mail2pdf",
    version,
    about = "Convert HTML e-mail and its attachments to PDF",
    long_about = "Convert an HTML e-mail body and its attachments to PDF using Gotenberg \
(Chromium + LibreOffice) with in-process fallbacks. Produces one merged PDF, a zip archive, \
or one PDF per item.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// JSON request file, or `-` for stdin.
    #[arg(required_unless_present = "health_only")]
    request: Option<String>,

    /// Output file (full, zip) or directory (individual).
    #[arg(short, long, env = "MAIL2PDF_OUTPUT")]
    output: Option<PathBuf>,

    /// Overrides the request's `mode`.
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    #[arg(long, env = "MAIL2PDF_GOTENBERG_URL", default_value = "http://localhost:3000")]
    gotenberg_url: String,

    #[arg(long, env = "MAIL2PDF_FALLBACK_URL", default_value = "http://localhost:5000")]
    fallback_url: String,

    /// Disable the fallback HTML renderer.
    #[arg(long)]
    no_fallback: bool,

    #[arg(long, env = "MAIL2PDF_PAGE_SIZE")]
    page_size: Option<String>,

    #[arg(long, env = "MAIL2PDF_ORIENTATION")]
    orientation: Option<String>,

    /// Margin with unit (`20mm`, `0.5in`, `36pt`); bare numbers are inches.
    #[arg(long, env = "MAIL2PDF_MARGIN")]
    margin: Option<String>,

    #[arg(long)]
    extract_images: bool,

    #[arg(short, long, env = "MAIL2PDF_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    #[arg(long, env = "MAIL2PDF_ENGINE_TIMEOUT", default_value_t = 30)]
    engine_timeout: u64,

    #[arg(long, env = "MAIL2PDF_REQUEST_TIMEOUT", default_value_t = 120)]
    request_timeout: u64,

    #[arg(long, env = "MAIL2PDF_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Print the conversion report as JSON on stdout.
    #[arg(long, env = "MAIL2PDF_JSON")]
    json: bool,

    #[arg(long, env = "MAIL2PDF_NO_PROGRESS")]
    no_progress: bool,

    #[arg(long)]
    health_only: bool,

    #[arg(short, long, env = "MAIL2PDF_VERBOSE")]
    verbose: bool,

    #[arg(short, long, env = "MAIL2PDF_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Full,
    Individual,
    Zip,
}

impl From<ModeArg> for OutputMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Full => OutputMode::Full,
            ModeArg::Individual => OutputMode::Individual,
            ModeArg::Zip => OutputMode::Zip,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO logs are suppressed while the progress bar is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.health_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let service = Mail2Pdf::new(build_config(&cli, progress_cb)?).context("Failed to start the conversion service")?;

    // ── Health-only mode ─────────────────────────────────────────────────
    if cli.health_only {
        let report = service.health().await;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialise health report")?);
        } else {
            println!(
                "Gotenberg:  {} ({})",
                if report.engine_reachable { green("reachable") } else { red("unreachable") },
                service.config().gotenberg_url
            );
            println!("Cache:      {}/{} entries", report.cache.size, report.cache.max_size);
        }
        if !report.engine_reachable {
            std::process::exit(1);
        }
        return Ok(());
    }

    // ── Read and convert ─────────────────────────────────────────────────
    let request = read_request(&cli).await?;
    let output = match service.convert(request).await {
        Ok(output) => output,
        Err(e) if cli.json => {
            println!("{}", serde_json::to_string_pretty(&e.to_response())?);
            std::process::exit(if e.is_input_error() { 2 } else { 1 });
        }
        Err(e) => return Err(e).context("Conversion failed"),
    };

    // ── Write the deliverable ────────────────────────────────────────────
    let written = deliver(&service, &output, cli.output.as_deref()).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&output).context("Failed to serialise output")?);
    }
    if !cli.quiet {
        for item in output.items.iter().filter(|i| !i.converted) {
            if let Some(ref e) = item.error {
                eprintln!("  {} {}", red("✗"), e);
            }
        }
        eprintln!(
            "{}  {}/{} items  {}ms  →  {}",
            if output.stats.failed_items == 0 { green("✔") } else { cyan("⚠") },
            output.stats.converted_items,
            output.stats.total_items,
            output.stats.total_duration_ms,
            bold(&written.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")),
        );
        if output.stats.cache_hits > 0 || output.stats.placeholders > 0 {
            eprintln!(
                "   {}",
                dim(&format!(
                    "{} from cache, {} placeholder page(s)",
                    output.stats.cache_hits, output.stats.placeholders
                ))
            );
        }
    }

    Ok(())
}

fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ServiceConfig> {
    let mut builder = ServiceConfig::builder()
        .gotenberg_url(cli.gotenberg_url.clone())
        .fallback_renderer_url((!cli.no_fallback).then(|| cli.fallback_url.clone()))
        .concurrency(cli.concurrency)
        .engine_timeout_secs(cli.engine_timeout)
        .request_timeout_secs(cli.request_timeout);
    if let Some(ref dir) = cli.cache_dir {
        builder = builder.cache_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

async fn read_request(cli: &Cli) -> Result<EmailRequest> {
    let source = cli.request.as_deref().unwrap_or("-");
    let raw = if source == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).context("Failed to read request from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("Failed to read request from {source}"))?
    };

    let mut request: EmailRequest = serde_json::from_str(&raw).context("Request is not valid JSON")?;
    if let Some(mode) = cli.mode {
        request = request.with_mode(mode.into());
    }
    let opts = &mut request.options;
    if opts.page_size.is_none() {
        opts.page_size = cli.page_size.clone();
    }
    if opts.orientation.is_none() {
        opts.orientation = cli.orientation.clone();
    }
    if opts.margin.is_none() {
        opts.margin = cli.margin.clone().map(MarginValue::Length);
    }
    opts.extract_images |= cli.extract_images;
    Ok(request)
}

/// Write the artifact; returns the paths written.
async fn deliver(service: &Mail2Pdf, output: &ConversionOutput, target: Option<&Path>) -> Result<Vec<PathBuf>> {
    match output.artifact {
        Artifact::Pdf { ref filename, ref bytes } | Artifact::Zip { ref filename, ref bytes } => {
            let path = target.map_or_else(|| PathBuf::from(filename), Path::to_path_buf);
            write_output(&path, bytes).await.context("Failed to write output")?;
            Ok(vec![path])
        }
        Artifact::Manifest { ref entries } => {
            let dir = target.unwrap_or_else(|| Path::new("."));
            let mut written = Vec::with_capacity(entries.len());
            for entry in entries {
                let Some(stored) = service.download(&entry.id) else {
                    bail!(Mail2PdfError::Internal(format!("stored PDF '{}' vanished", entry.id)));
                };
                let path = dir.join(&stored.filename);
                write_output(&path, &stored.content).await.context("Failed to write output")?;
                written.push(path);
            }
            Ok(written)
        }
    }
}
