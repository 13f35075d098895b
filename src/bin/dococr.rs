//! CLI binary for edgequake-ocr.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `OcrConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use edgequake_ocr::{
    CacheConfig, CancelToken, DescriptionType, Document, ExtractOptions, FailurePolicy,
    OcrConfig, OcrEngine, OcrProgressCallback, OcrProvider, OutputFormat, PageSeparator,
    ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Progress bar ─────────────────────────────────────────────────────────────

/// Live page counter; pages may finish out of order.
struct CliProgress {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("reading input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .remove(&index)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl OcrProgressCallback for CliProgress {
    fn on_job_start(&self, total_pages: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_pages as u64);
        self.bar.set_prefix("OCR");
        self.bar.reset_eta();
    }

    fn on_page_start(&self, index: usize, _total: usize) {
        self.start_times.lock().insert(index, Instant::now());
        self.bar.set_message(format!("page {}", index + 1));
    }

    fn on_page_complete(&self, index: usize, total: usize, text_len: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            index + 1,
            total,
            dim(&format!("{text_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, index: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(index);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_job_complete(&self, _total: usize, _success: usize) {
        self.bar.finish_and_clear();
    }

    fn on_cache_hit(&self, fingerprint: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} cache hit {}", green("✔"), dim(&fingerprint[..fingerprint.len().min(12)]));
    }
}

// ── CLI definition ───────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Markdown from a scanned PDF (stdout)
  dococr extract scan.pdf

  # Plain text to a file, 8 pages in flight
  dococr extract --format plain-text -c 8 report.docx -o report.txt

  # From a URL, keep going when single pages fail
  dococr extract --allow-partial https://example.com/deck.pptx

  # JSON document with per-page text and stats
  dococr extract --json invoice.png > invoice.json

  # Scanned receipt through PaddleOCR instead of the vision model
  dococr extract --engine paddle --paddle-endpoint http://paddle-ocr:9000 receipt.jpg

  # Describe an image
  dococr describe --kind concise photo.jpg

ENVIRONMENT VARIABLES:
  OCR_API_BASE        OpenAI-compatible endpoint (default http://localhost:8000/v1)
  OCR_API_KEY         Bearer token for the endpoint
  OCR_MODEL           Model served at the endpoint
  OCR_PROVIDER        Use an edgequake-llm provider instead (openai, anthropic, ...)
  OCR_PADDLE_ENDPOINT PaddleOCR Serving URL for --engine paddle
  OCR_CACHE_DIR       Persist the result cache in this directory
  PDFIUM_LIB_PATH     Directory containing libpdfium
  RUST_LOG            Override the log filter
"#;

/// OCR for PDFs, images and Office documents via a vision model.
#[derive(Parser, Debug)]
#[command(
    name = "dococr",
    version,
    about = "OCR for PDFs, images and Office documents via a vision model",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract text from a file or URL.
    Extract {
        /// Local file path or HTTP/HTTPS URL.
        input: String,

        /// Write the text to this file instead of stdout.
        #[arg(short, long, env = "OCR_OUTPUT")]
        output: Option<PathBuf>,

        /// Output flavour.
        #[arg(long, env = "OCR_FORMAT", value_enum, default_value = "markdown")]
        format: FormatArg,

        /// OCR engine for this document.
        #[arg(long, env = "OCR_ENGINE", value_enum, default_value = "deepseek")]
        engine: EngineArg,

        /// Custom prompt sent with every page.
        #[arg(long, env = "OCR_PROMPT", conflicts_with = "prompt_file")]
        prompt: Option<String>,

        /// Path to a text file with a custom prompt.
        #[arg(long, env = "OCR_PROMPT_FILE")]
        prompt_file: Option<PathBuf>,

        /// Page separator: none, hr, comment, or custom string.
        #[arg(long, env = "OCR_SEPARATOR", default_value = "none")]
        separator: String,

        /// Return the pages that succeeded instead of failing the job.
        #[arg(long, env = "OCR_ALLOW_PARTIAL")]
        allow_partial: bool,

        /// Upload the result to object storage (requires the `s3` feature).
        #[arg(long)]
        store: bool,

        /// Bucket for `--store`.
        #[arg(long, env = "OCR_BUCKET")]
        bucket: Option<String>,
    },

    /// Describe an image.
    Describe {
        /// Local image path or HTTP/HTTPS URL.
        input: String,

        /// Level of detail.
        #[arg(long, value_enum, default_value = "full")]
        kind: KindArg,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// OpenAI-compatible endpoint.
    #[arg(long, global = true, env = "OCR_API_BASE")]
    api_base: Option<String>,

    /// API key sent as a bearer token.
    #[arg(long, global = true, env = "OCR_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model identifier.
    #[arg(long, global = true, env = "OCR_MODEL")]
    model: Option<String>,

    /// edgequake-llm provider name; bypasses the vLLM backend.
    #[arg(long, global = true, env = "OCR_PROVIDER")]
    provider: Option<String>,

    /// PaddleOCR Serving base URL.
    #[arg(long, global = true, env = "OCR_PADDLE_ENDPOINT")]
    paddle_endpoint: Option<String>,

    /// PaddleOCR per-request timeout in seconds.
    #[arg(long, global = true, env = "OCR_PADDLE_TIMEOUT", default_value_t = 60)]
    paddle_timeout: u64,

    /// Pages in flight per document.
    #[arg(short, long, global = true, env = "OCR_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Rendering DPI (72–400).
    #[arg(long, global = true, env = "OCR_DPI", default_value_t = 144,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Maximum pages per document.
    #[arg(long, global = true, env = "OCR_MAX_PAGES", default_value_t = 200)]
    max_pages: usize,

    /// Retries per page on transient failures.
    #[arg(long, global = true, env = "OCR_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-request timeout in seconds.
    #[arg(long, global = true, env = "OCR_REQUEST_TIMEOUT", default_value_t = 3600)]
    request_timeout: u64,

    /// Send DOCX/PPTX text through the model as well.
    #[arg(long, global = true, env = "OCR_REFINE_TEXT")]
    refine_text: bool,

    /// Persist the result cache in this directory.
    #[arg(long, global = true, env = "OCR_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Disable the result cache.
    #[arg(long, global = true, env = "OCR_NO_CACHE")]
    no_cache: bool,

    /// Print the full document as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "OCR_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level logs.
    #[arg(short, long, global = true, env = "OCR_VERBOSE")]
    verbose: bool,

    /// Suppress everything except errors.
    #[arg(short, long, global = true, env = "OCR_QUIET")]
    quiet: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Markdown,
    #[value(alias = "text")]
    PlainText,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Markdown => OutputFormat::Markdown,
            FormatArg::PlainText => OutputFormat::PlainText,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum EngineArg {
    #[value(name = "deepseek")]
    DeepSeek,
    Paddle,
}

impl From<EngineArg> for OcrProvider {
    fn from(v: EngineArg) -> Self {
        match v {
            EngineArg::DeepSeek => OcrProvider::DeepSeek,
            EngineArg::Paddle => OcrProvider::Paddle,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Full,
    Detailed,
    Concise,
}

impl From<KindArg> for DescriptionType {
    fn from(v: KindArg) -> Self {
        match v {
            KindArg::Full => DescriptionType::Full,
            KindArg::Detailed => DescriptionType::Detailed,
            KindArg::Concise => DescriptionType::Concise,
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let common = &cli.common;

    let show_progress = !common.quiet && !common.no_progress && !common.json;
    let filter = if common.verbose {
        "debug"
    } else if common.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgress::new() as Arc<dyn OcrProgressCallback>)
    } else {
        None
    };

    match &cli.command {
        Command::Extract {
            input,
            output,
            format,
            engine: engine_arg,
            prompt,
            prompt_file,
            separator,
            allow_partial,
            store,
            bucket,
        } => {
            let mut builder = base_config(common)
                .page_separator(parse_separator(separator))
                .failure_policy(if *allow_partial {
                    FailurePolicy::AllowPartial
                } else {
                    FailurePolicy::Strict
                });
            if let Some(cb) = progress {
                builder = builder.progress_callback(cb);
            }
            let engine = attach_storage(
                OcrEngine::new(builder.build().context("Invalid configuration")?)?,
                *store,
            )?;

            let mut options = ExtractOptions::new((*format).into())
                .with_provider((*engine_arg).into())
                .store(*store);
            options.bucket = bucket.clone();
            options.prompt = prompt.clone();
            if let Some(path) = prompt_file {
                let prompt = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read prompt from {:?}", path))?;
                options.prompt = Some(prompt);
            }

            let doc = match output {
                Some(path) => engine
                    .extract_text_to_file(input, path, &options)
                    .await
                    .context("Extraction failed")?,
                None => engine
                    .extract_text_with_cancel(input, &options, &CancelToken::new())
                    .await
                    .context("Extraction failed")?,
            };
            print_document(&doc, common, output.is_none())?;
            if !common.quiet {
                if let Some(path) = output {
                    eprintln!("   →  {}", bold(&path.display().to_string()));
                }
                if let Some(ref stored) = doc.stored {
                    eprintln!("   stored at {}/{}", stored.bucket, stored.object_name);
                }
            }
        }
        Command::Describe { input, kind } => {
            let mut builder = base_config(common);
            if let Some(cb) = progress {
                builder = builder.progress_callback(cb);
            }
            let engine = OcrEngine::new(builder.build().context("Invalid configuration")?)?;
            let doc = engine
                .describe_image(input, (*kind).into())
                .await
                .context("Description failed")?;
            print_document(&doc, common, true)?;
        }
    }

    Ok(())
}

/// Map the shared flags onto a config builder.
fn base_config(common: &CommonArgs) -> edgequake_ocr::OcrConfigBuilder {
    let mut builder = OcrConfig::builder()
        .concurrency(common.concurrency)
        .dpi(common.dpi)
        .max_pages(common.max_pages)
        .max_retries(common.max_retries)
        .request_timeout_secs(common.request_timeout)
        .paddle_timeout_secs(common.paddle_timeout)
        .refine_extracted_text(common.refine_text);

    if let Some(ref base) = common.api_base {
        builder = builder.api_base(base);
    }
    if let Some(ref key) = common.api_key {
        builder = builder.api_key(key);
    }
    if let Some(ref model) = common.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = common.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref paddle) = common.paddle_endpoint {
        builder = builder.paddle_endpoint(paddle);
    }

    let cache = if common.no_cache {
        CacheConfig::disabled()
    } else {
        CacheConfig {
            directory: common.cache_dir.clone(),
            ..CacheConfig::default()
        }
    };
    builder.cache(cache)
}

#[cfg(feature = "s3")]
fn attach_storage(engine: OcrEngine, store: bool) -> Result<OcrEngine> {
    use edgequake_ocr::storage::{S3Config, S3ObjectStore};

    if !store {
        return Ok(engine);
    }
    let config = S3Config {
        endpoint: std::env::var("OCR_S3_ENDPOINT").ok(),
        ..S3Config::default()
    };
    Ok(engine.with_storage(Arc::new(S3ObjectStore::new(config))))
}

#[cfg(not(feature = "s3"))]
fn attach_storage(engine: OcrEngine, store: bool) -> Result<OcrEngine> {
    if store {
        anyhow::bail!("--store needs dococr built with the `s3` feature");
    }
    Ok(engine)
}

fn print_document(doc: &Document, common: &CommonArgs, to_stdout: bool) -> Result<()> {
    if common.json {
        let json = serde_json::to_string_pretty(doc).context("Failed to serialise document")?;
        println!("{json}");
    } else if to_stdout {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(doc.text.as_bytes())
            .context("Failed to write to stdout")?;
        if !doc.text.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !common.quiet && !common.json {
        let s = &doc.stats;
        let mark = if s.failed_pages.is_empty() {
            green("✔")
        } else {
            red("⚠")
        };
        eprintln!(
            "{}  {}/{} pages  {}ms{}",
            mark,
            s.processed_pages,
            s.total_pages,
            s.total_duration_ms,
            if doc.from_cache { "  (cached)" } else { "" },
        );
        if !s.failed_pages.is_empty() {
            let pages: Vec<String> = s.failed_pages.iter().map(|i| (i + 1).to_string()).collect();
            eprintln!("   failed pages: {}", red(&pages.join(", ")));
        }
        if !doc.from_cache {
            eprintln!(
                "   {} tokens in  /  {} tokens out  /  {} retries",
                dim(&s.total_prompt_tokens.to_string()),
                dim(&s.total_completion_tokens.to_string()),
                s.total_retries,
            );
        }
    }
    Ok(())
}

/// Parse `--separator` into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "none" => PageSeparator::None,
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        _ => PageSeparator::Custom(s.to_string()),
    }
}
