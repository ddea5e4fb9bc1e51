//! CLI binary for docdesk.
//!
//! A thin shim over the library crate: flags become a `StageConfig` and an
//! `OcrConfig`, subcommands drive the upload and processing steps, and
//! results are written to disk.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use docdesk::{
    search_tools, ActivityLog, Collaborator, DirStorage, DocDeskError, OcrConfig, OcrEngine,
    OcrOutput, PdfEngine, PdfiumEngine, Placement, ProcessingOutcome, ProcessingProgressCallback,
    ProcessingStatus, ProcessingStep, ProgressCallback, StageConfig, StageInput, StagedFile,
    StagedFileStore, StagingOptions, ToolId, ToolOutput, UploadStep, VlmOcrEngine,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner until the run starts, then a 0–100
/// bar driven by the collaborator's progress reports.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(100);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading staged files…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    fn activate_bar(&self, tool: ToolId) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}%  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_style(progress_style);
        self.bar.set_prefix(tool.spec().title);
        self.bar.set_position(0);
    }
}

impl ProcessingProgressCallback for CliProgressCallback {
    fn on_processing_start(&self, tool: ToolId, file_count: usize) {
        self.activate_bar(tool);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{}: processing {file_count} file(s)…", tool.spec().title))
        ));
    }

    fn on_status(&self, status: ProcessingStatus) {
        if status == ProcessingStatus::Processing {
            self.bar.set_message("working");
        }
    }

    fn on_progress(&self, percent: u8) {
        self.bar.set_position(u64::from(percent.min(100)));
    }

    fn on_processing_complete(&self, tool: ToolId) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", green("✔"), bold(tool.success_message()));
    }

    fn on_processing_error(&self, _tool: ToolId, message: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), red(message));
    }
}

// ── OCR stand-in when no provider is needed ──────────────────────────────────

/// Used for PDF tools so that they run without any LLM credentials.
struct NoOcrEngine;

#[async_trait]
impl OcrEngine for NoOcrEngine {
    fn name(&self) -> &str {
        "none"
    }

    async fn recognize(
        &self,
        _image: &StagedFile,
        _language: &str,
        _progress: &dyn ProcessingProgressCallback,
    ) -> Result<OcrOutput, DocDeskError> {
        Err(DocDeskError::UnsupportedOperation {
            tool: ToolId::Ocr,
            engine: self.name().to_string(),
        })
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # List tools (optionally filtered)
  docdesk tools
  docdesk tools pdf

  # Stage files for a tool, then process them in a later invocation
  docdesk stage pdf-rotate report.pdf -O angle=90
  docdesk process pdf-rotate -o out/

  # Stage and process in one go (memory-held files survive)
  docdesk run pdf-merge a.pdf b.pdf -o out/
  docdesk run pdf-split book.pdf -O ranges=1-3,4-10 -o parts/
  docdesk run pdf-watermark draft.pdf -O text=DRAFT -O opacity=0.2
  docdesk run image-to-pdf page1.png page2.jpg -o out/

  # Recognise text in an image (needs a vision LLM)
  docdesk run ocr scan.png -O language=fra > scan.txt

  # Inspect or drop the staged set
  docdesk status
  docdesk clear

  # Dashboard history
  docdesk history
  docdesk history --delete 0
  docdesk history --dismiss-resume

TOOL OPTIONS (-O key=value):
  ocr            language=<iso 639-2>     (default: eng)
  pdf-split      ranges=1-3,5             (default: one file per page)
  pdf-protect    password=<secret>        (required; pdfium cannot encrypt, so unavailable)
  pdf-compress   target_size=1MB          (default: 1MB)
  pdf-watermark  text=<text>              (required)  opacity=0.3
  pdf-rotate     angle=90|180|270|-90     (required)

STAGING:
  Files are staged as base64 payloads in a small key/value store under
  --session-dir (5 MiB by default). Oversized images are re-encoded as JPEG;
  anything that still does not fit is held in process memory, which only the
  `run` subcommand can see. `process` after such a `stage` asks you to upload
  again.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (OCR)
  ANTHROPIC_API_KEY       Anthropic API key (OCR)
  GEMINI_API_KEY          Google Gemini API key (OCR)
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory holding libpdfium
  DOCDESK_SESSION_DIR     Staging directory
"#;

/// Document tools with a quota-aware staged file store.
#[derive(Parser, Debug)]
#[command(
    name = "docdesk",
    version,
    about = "Document tools: merge, split, rotate, watermark and compress PDFs, images to PDF, OCR",
    long_about = "Document tools built around a staged file store. Files are validated against \
the selected tool, staged under a small storage budget (compressing or holding in memory what \
does not fit), then handed to pdfium or a vision LLM and written to disk.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory backing the staging key/value store.
    #[arg(long, global = true, env = "DOCDESK_SESSION_DIR")]
    session_dir: Option<PathBuf>,

    /// Capacity of the staging store in bytes.
    #[arg(long, global = true, env = "DOCDESK_CAPACITY", default_value_t = 5 * 1024 * 1024)]
    capacity: usize,

    /// Largest payload kept in the staging store, in bytes.
    #[arg(long, global = true, env = "DOCDESK_BUDGET")]
    budget: Option<usize>,

    /// Per-file upload ceiling in MB.
    #[arg(long, global = true, env = "DOCDESK_MAX_FILE_MB", default_value_t = 10)]
    max_file_mb: u64,

    /// Key prefix in the staging store.
    #[arg(long, global = true, env = "DOCDESK_NAMESPACE", default_value = "docdesk")]
    namespace: String,

    /// HTTP download timeout in seconds for URL inputs.
    #[arg(long, global = true, env = "DOCDESK_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable progress bar.
    #[arg(long, global = true, env = "DOCDESK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCDESK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCDESK_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the available tools.
    Tools {
        /// Case-insensitive filter on tool titles.
        query: Option<String>,
    },
    /// Validate and stage files for a tool.
    Stage {
        #[command(flatten)]
        selection: Selection,
    },
    /// Process the staged set with a tool and clear it.
    Process {
        /// Tool slug, e.g. pdf-merge.
        tool: ToolId,
        #[command(flatten)]
        output: OutputArgs,
        #[command(flatten)]
        ocr: OcrArgs,
    },
    /// Stage and process in a single invocation.
    Run {
        #[command(flatten)]
        selection: Selection,
        #[command(flatten)]
        output: OutputArgs,
        #[command(flatten)]
        ocr: OcrArgs,
    },
    /// Show the staged set, if any.
    Status,
    /// Drop the staged set.
    Clear,
    /// Show or edit the dashboard history.
    History {
        /// Move recent entry N to recently deleted.
        #[arg(long, value_name = "N")]
        delete: Option<usize>,
        /// Move deleted entry N back to recent.
        #[arg(long, value_name = "N")]
        restore: Option<usize>,
        /// Forget deleted entry N.
        #[arg(long, value_name = "N")]
        purge: Option<usize>,
        /// Empty both lists.
        #[arg(long)]
        clear: bool,
        /// Stop suggesting the last-used tool until another one is used.
        #[arg(long)]
        dismiss_resume: bool,
    },
}

#[derive(Args, Debug)]
struct Selection {
    /// Tool slug, e.g. pdf-merge.
    tool: ToolId,

    /// Local files or HTTP/HTTPS URLs.
    #[arg(required = true, num_args = 1..)]
    inputs: Vec<String>,

    /// Tool option as key=value. Repeatable.
    #[arg(short = 'O', long = "option", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    options: Vec<(String, String)>,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output directory. OCR text goes to stdout when omitted.
    #[arg(short, long, env = "DOCDESK_OUTPUT")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct OcrArgs {
    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Max LLM output tokens.
    #[arg(long, env = "DOCDESK_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DOCDESK_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries on LLM failure.
    #[arg(long, env = "DOCDESK_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "DOCDESK_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty option name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the feedback during processing, so INFO logs
    // are muted while it is shown.
    let runs_tool = matches!(cli.command, Command::Process { .. } | Command::Run { .. });
    let show_progress = runs_tool && !cli.quiet && !cli.no_progress;
    let filter = if cli.quiet || show_progress {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = if cli.verbose { "debug" } else { filter };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let session_dir = cli
        .session_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("docdesk-session"));
    let store = Arc::new(open_store(&cli, &session_dir)?);
    let history = Arc::new(open_history(&cli, &session_dir)?);

    match &cli.command {
        Command::Tools { query } => list_tools(query.as_deref().unwrap_or("")),
        Command::Stage { selection } => {
            stage(&cli, &store, &history, selection).await?;
            Ok(())
        }
        Command::Process { tool, output, ocr } => {
            process(&cli, show_progress, &store, &history, *tool, output, ocr).await
        }
        Command::Run {
            selection,
            output,
            ocr,
        } => {
            stage(&cli, &store, &history, selection).await?;
            process(&cli, show_progress, &store, &history, selection.tool, output, ocr).await
        }
        Command::Status => show_status(&store),
        Command::Clear => {
            store.clear();
            if !cli.quiet {
                eprintln!("{} staged set cleared", green("✔"));
            }
            Ok(())
        }
        Command::History {
            delete,
            restore,
            purge,
            clear,
            dismiss_resume,
        } => {
            if *dismiss_resume {
                history.dismiss_resume().context("Failed to update history")?;
            }
            edit_history(&history, *delete, *restore, *purge, *clear)
        }
    }
}

fn open_store(cli: &Cli, session_dir: &Path) -> Result<StagedFileStore> {
    let storage = DirStorage::open_with_capacity(session_dir, cli.capacity)
        .with_context(|| format!("Failed to open session directory {}", session_dir.display()))?;

    let mut builder = StageConfig::builder()
        .namespace(cli.namespace.clone())
        .max_file_bytes(cli.max_file_mb * 1024 * 1024)
        .download_timeout_secs(cli.download_timeout);
    if let Some(budget) = cli.budget {
        builder = builder.storage_budget_bytes(budget);
    }
    let config = builder.build().context("Invalid configuration")?;

    Ok(StagedFileStore::new(Arc::new(storage), config))
}

fn open_history(cli: &Cli, session_dir: &Path) -> Result<ActivityLog> {
    let dir = session_dir.join("history");
    let storage = DirStorage::open(&dir)
        .with_context(|| format!("Failed to open history directory {}", dir.display()))?;
    Ok(ActivityLog::new(Arc::new(storage), cli.namespace.clone()))
}

fn list_tools(query: &str) -> Result<()> {
    let tools = search_tools(query);
    if tools.is_empty() {
        eprintln!("No tools match '{query}'");
        return Ok(());
    }
    let pdf = PdfiumEngine::new();
    for spec in tools {
        let note = match spec.collaborator {
            Collaborator::Pdf if !pdf.supports(spec.id) => red(" (unavailable)"),
            _ => String::new(),
        };
        println!(
            "{:<14} {:<22} {}{}",
            cyan(spec.slug),
            bold(spec.title),
            dim(spec.description),
            note
        );
    }
    Ok(())
}

async fn stage(
    cli: &Cli,
    store: &Arc<StagedFileStore>,
    history: &Arc<ActivityLog>,
    selection: &Selection,
) -> Result<()> {
    let tool = selection.tool;
    if tool.spec().collaborator == Collaborator::Pdf && !PdfiumEngine::new().supports(tool) {
        bail!("{} is not available with the pdfium engine", tool.spec().title);
    }

    let inputs: Vec<StageInput> = selection
        .inputs
        .iter()
        .map(|s| StageInput::resolve(s))
        .collect();
    let mut options = StagingOptions::default();
    for (key, value) in &selection.options {
        options.insert(key.clone(), value.clone());
    }

    let upload = UploadStep::new(store.clone()).with_history(history.clone());
    let route = match upload.submit(selection.tool, inputs, options).await {
        Ok(route) => route,
        Err(e) => {
            tracing::debug!("submit failed: {e}");
            bail!("{}", e.user_message());
        }
    };

    if !cli.quiet {
        if let Some(manifest) = store.status() {
            for entry in &manifest.files {
                let placement = match entry.placement {
                    Placement::Storage => dim("stored"),
                    Placement::Compressed { quality } => cyan(&format!("compressed q{quality}")),
                    Placement::Memory => cyan("in memory"),
                };
                eprintln!(
                    "  {} {:<32} {:>10}  {}",
                    green("✓"),
                    entry.name,
                    dim(&format!("{} bytes", entry.size_bytes)),
                    placement
                );
            }
        }
        eprintln!("{} staged, next: {}", green("✔"), bold(&route.to_string()));
    }
    Ok(())
}

async fn process(
    cli: &Cli,
    show_progress: bool,
    store: &Arc<StagedFileStore>,
    history: &Arc<ActivityLog>,
    tool: ToolId,
    output: &OutputArgs,
    ocr: &OcrArgs,
) -> Result<()> {
    let ocr_engine: Arc<dyn OcrEngine> = match tool.spec().collaborator {
        Collaborator::Ocr => Arc::new(
            VlmOcrEngine::from_config(build_ocr_config(ocr).await?)
                .context("Failed to set up the OCR engine")?,
        ),
        Collaborator::Pdf => Arc::new(NoOcrEngine),
    };

    let mut step = ProcessingStep::new(store.clone(), ocr_engine, Arc::new(PdfiumEngine::new()))
        .with_history(history.clone());
    if show_progress {
        step = step.with_progress(CliProgressCallback::new() as ProgressCallback);
    }

    match step.run(tool).await {
        ProcessingOutcome::Redirect(route) => {
            bail!(
                "Nothing staged for {tool}. Upload again with `docdesk stage {tool} <files>` ({route})"
            )
        }
        ProcessingOutcome::Failed {
            message, detail, ..
        } => {
            if !show_progress {
                eprintln!("{} {}", red("✘"), red(message));
            }
            bail!("{detail}")
        }
        ProcessingOutcome::Completed {
            message, output: result, ..
        } => {
            if !show_progress && !cli.quiet {
                eprintln!("{} {}", green("✔"), bold(message));
            }
            emit(cli, &result, output.output.as_deref()).await
        }
    }
}

async fn emit(cli: &Cli, result: &ToolOutput, dir: Option<&Path>) -> Result<()> {
    if let (ToolOutput::Text { text, .. }, None) = (result, dir) {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(text.as_bytes())
            .context("Failed to write to stdout")?;
        if !text.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
        return Ok(());
    }

    let dir = dir.unwrap_or_else(|| Path::new("."));
    let paths = result.write_to(dir).await.context("Failed to write output")?;
    if !cli.quiet {
        for path in paths {
            eprintln!("   {} {}", dim("→"), bold(&path.display().to_string()));
        }
    }
    Ok(())
}

/// Map CLI args to `OcrConfig`.
async fn build_ocr_config(args: &OcrArgs) -> Result<OcrConfig> {
    let mut builder = OcrConfig::builder()
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .max_retries(args.max_retries);

    if let Some(ref path) = args.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = args.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider.clone());
    }

    builder.build().context("Invalid OCR configuration")
}

fn show_status(store: &StagedFileStore) -> Result<()> {
    let Some(manifest) = store.status() else {
        println!("Nothing staged.");
        return Ok(());
    };

    let tool = manifest
        .options
        .tool
        .map(|t| t.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("Stage:    {}", manifest.stage_id);
    println!("Tool:     {}", tool);
    println!("Files:    {}", manifest.files.len());
    println!("Bytes:    {}", manifest.total_bytes());
    for entry in &manifest.files {
        let placement = match entry.placement {
            Placement::Storage => "stored".to_string(),
            Placement::Compressed { quality } => format!("compressed (q{quality})"),
            Placement::Memory => "in memory".to_string(),
        };
        println!(
            "  {:<32} {:<18} {:>10}  {}",
            entry.name, entry.mime_type, entry.size_bytes, placement
        );
    }
    for (key, value) in manifest.options.iter() {
        println!("  -O {key}={value}");
    }
    Ok(())
}

fn edit_history(
    history: &ActivityLog,
    delete: Option<usize>,
    restore: Option<usize>,
    purge: Option<usize>,
    clear: bool,
) -> Result<()> {
    if clear {
        history.clear_recent();
        history.clear_deleted();
    }
    if let Some(n) = delete {
        history
            .delete_recent(n)
            .context("Failed to update history")?
            .with_context(|| format!("No recent entry {n}"))?;
    }
    if let Some(n) = restore {
        history
            .restore_deleted(n)
            .context("Failed to update history")?
            .with_context(|| format!("No deleted entry {n}"))?;
    }
    if let Some(n) = purge {
        history
            .purge_deleted(n)
            .context("Failed to update history")?
            .with_context(|| format!("No deleted entry {n}"))?;
    }

    if let Some(tool) = history.resume_tool() {
        println!(
            "Resume:     {}  {}",
            bold(tool.spec().title),
            dim(&format!("docdesk stage {tool} …"))
        );
    } else if let Some(tool) = history.last_used_tool() {
        println!("Last used:  {}", bold(tool.spec().title));
    }
    let most_used = history.most_used(3);
    if !most_used.is_empty() {
        let line: Vec<String> = most_used
            .iter()
            .map(|(tool, n)| format!("{tool} ({n})"))
            .collect();
        println!("Most used:  {}", line.join(", "));
    }

    println!("{}", bold("Recent files"));
    for (i, f) in history.recent_files().iter().enumerate() {
        println!("  {i:>2}  {:<32} {}", f.file_name, dim(f.tool.slug()));
    }
    println!("{}", bold("Recently deleted"));
    for (i, f) in history.deleted_files().iter().enumerate() {
        println!("  {i:>2}  {:<32} {}", f.file_name, dim(f.tool.slug()));
    }
    Ok(())
}
