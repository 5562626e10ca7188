//! CLI binary for mediscan.
//!
//! A thin shim over the library crate: maps CLI flags to `ScanConfig`,
//! scans all inputs as one document, resolves a review non-interactively
//! and prints or exports the result.

use anyhow::{bail, Context, Result};
use clap::Parser;
use mediscan::{
    default_file_name, load_pages, render_markdown, write_report, CropFormat, DocumentController, DocumentId,
    ProcessedDocument, ProgressCallback, ReviewPolicy, ScanConfig, ScanOutcome, ScanProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
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

/// Spinner with a live character count while the response streams in.
struct CliProgressCallback {
    bar: ProgressBar,
    started: Instant,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Instant::now(),
        })
    }
}

impl ScanProgressCallback for CliProgressCallback {
    fn on_scan_start(&self, _id: DocumentId, page_count: usize) {
        self.bar.set_prefix("Analyzing");
        self.bar.set_message(format!("{page_count} page(s)"));
    }

    fn on_fragment(&self, _id: DocumentId, accumulated_len: usize) {
        self.bar.set_message(format!("{accumulated_len} chars received"));
    }

    fn on_graphics_detected(&self, _id: DocumentId, count: usize) {
        self.bar.set_prefix("Cropping");
        self.bar
            .println(format!("  {} Detected {count} graphic(s)", cyan("◆")));
    }

    fn on_review_required(&self, _id: DocumentId, categories: &[String], graphics: usize) {
        self.bar.set_prefix("Review");
        self.bar.println(format!(
            "  {} Review needed: categories [{}], {} graphic(s)",
            cyan("?"),
            categories.join(", "),
            graphics
        ));
    }

    fn on_scan_complete(&self, _id: DocumentId) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} Document ready {}",
            green("✔"),
            dim(&format!("{:.1}s", self.started.elapsed().as_secs_f64()))
        );
    }

    fn on_scan_error(&self, _id: DocumentId, error: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), red(error));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Scan a photographed leaflet (Markdown to stdout)
  mediscan leaflet.jpg

  # Several photos as one document, exported with figures and scans
  mediscan page1.jpg page2.jpg -o reports/

  # Pick the category and skip the cropped figures
  mediscan --category Cardiology --no-graphics ecg_report.png

  # Use a specific model
  mediscan --provider openai --model gpt-4.1-mini lab_results.jpg

  # Scan from a URL, JSON record on stdout
  mediscan --json https://example.org/flyer.png > record.json

REVIEW:
  When the model proposes several categories or finds graphics, the
  document needs review. The CLI resolves it without prompting:
  the first proposed category (or --category) is used, and every
  cropped graphic is kept unless --no-graphics is given.

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (gemini, openai, anthropic, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Log filter (overrides -v)
"#;

/// Scan medical documents into structured reports using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "mediscan",
    version,
    about = "Scan medical documents into structured reports using Vision LLMs",
    long_about = "Scan photographed or uploaded medical documents (JPEG, PNG, WebP or PDF; local \
files or URLs) into a structured report: title, category, executive summary, full transcription \
and cropped charts. Supports Google Gemini, OpenAI, Anthropic and any provider edgequake-llm knows.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Page files or HTTP/HTTPS URLs, in page order. All form one document.
    #[arg(required = true, num_args = 1..)]
    inputs: Vec<String>,

    /// Export the report (Markdown + figures + original scans) into this directory.
    #[arg(short, long, env = "MEDISCAN_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gemini-2.0-flash, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: gemini, openai, anthropic, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set."
    )]
    provider: Option<String>,

    /// Category to use when review is needed (default: the first proposed).
    #[arg(long)]
    category: Option<String>,

    /// Deselect every cropped graphic.
    #[arg(long)]
    no_graphics: bool,

    /// Remove deselected graphics from the record instead of keeping them flagged.
    #[arg(long)]
    drop_deselected: bool,

    /// Raster format of cropped graphics.
    #[arg(long, value_enum, default_value = "jpeg")]
    crop_format: CropFormatArg,

    /// JPEG quality of cropped graphics (1–100).
    #[arg(long, default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    crop_quality: u8,

    /// Downscale page photos to at most this width in pixels.
    #[arg(long, env = "MEDISCAN_MAX_WIDTH", default_value_t = 1024,
          value_parser = clap::value_parser!(u32).range(64..))]
    max_width: u32,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "MEDISCAN_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens.
    #[arg(long, env = "MEDISCAN_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "MEDISCAN_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries on LLM failure.
    #[arg(long, env = "MEDISCAN_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Output the document record as JSON instead of Markdown.
    #[arg(long)]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "MEDISCAN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MEDISCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MEDISCAN_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "MEDISCAN_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CropFormatArg {
    Jpeg,
    Png,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs would fight with the spinner for the terminal.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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
        Some(CliProgressCallback::new() as Arc<dyn ScanProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Load pages ───────────────────────────────────────────────────────
    let pages = load_pages(&cli.inputs, &config)
        .await
        .context("Failed to load pages")?;
    let file_name = default_file_name(&cli.inputs);

    // ── Scan ─────────────────────────────────────────────────────────────
    let controller = DocumentController::from_config(config);
    let ticket = controller
        .start_scan(pages, Some(file_name))
        .context("Failed to start scan")?;

    let doc = match controller.run_scan(&ticket).await {
        ScanOutcome::Completed(doc) => doc,
        ScanOutcome::Reviewing(doc) => {
            let Some(review) = doc.review_data else {
                bail!("Document entered review without candidates");
            };
            let category = cli.category.clone().unwrap_or(review.selected_category);
            let graphics = review
                .potential_graphics
                .into_iter()
                .map(|mut g| {
                    g.selected = !cli.no_graphics;
                    g
                })
                .collect();
            controller
                .resolve_review(&ticket, category, graphics)
                .context("Failed to resolve review")?
        }
        ScanOutcome::Failed(doc) => {
            bail!("Scan failed: {}", doc.error.unwrap_or_else(|| "unknown error".to_string()))
        }
        ScanOutcome::Superseded => bail!("Scan was superseded"),
    };

    // ── Output ───────────────────────────────────────────────────────────
    if let Some(ref dir) = cli.output {
        let path = write_report(&doc, dir).await.context("Export failed")?;
        if !cli.quiet {
            print_summary(&doc);
            eprintln!("   →  {}", bold(&path.display().to_string()));
        }
    } else if cli.json {
        let json = serde_json::to_string_pretty(doc.as_ref()).context("Failed to serialise document")?;
        println!("{json}");
    } else {
        let markdown = render_markdown(&doc);
        io::stdout()
            .lock()
            .write_all(markdown.as_bytes())
            .context("Failed to write to stdout")?;
        if !cli.quiet {
            print_summary(&doc);
        }
    }

    Ok(())
}

fn print_summary(doc: &ProcessedDocument) {
    eprintln!(
        "{}  {}  {}  {} page(s), {} figure(s)",
        green("✔"),
        bold(doc.display_title()),
        dim(doc.category.as_deref().unwrap_or("Uncategorized")),
        doc.pages.len(),
        doc.selected_graphics().count(),
    );
}

/// Map CLI args to `ScanConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ScanConfig> {
    let crop_format = match cli.crop_format {
        CropFormatArg::Jpeg => CropFormat::Jpeg {
            quality: cli.crop_quality,
        },
        CropFormatArg::Png => CropFormat::Png,
    };
    let review_policy = if cli.drop_deselected {
        ReviewPolicy::DropDeselected
    } else {
        ReviewPolicy::KeepDeselected
    };

    let mut builder = ScanConfig::builder()
        .crop_format(crop_format)
        .review_policy(review_policy)
        .max_page_width(cli.max_width)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
