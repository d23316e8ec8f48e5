//! CLI binary for math-ocr.
//!
//! A thin shim over the library crate: maps CLI flags to `OcrConfig`, drives
//! a `Session` for one image (or one per paste in `--watch` mode) and prints
//! the LaTeX.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use math_ocr::preview::write_preview;
use math_ocr::{
    output::write_atomic, subscribe_paste, ClipboardReader, ClipboardWriter, ExtractionState,
    ImageId, KatexHtmlRenderer, OcrConfig, ResponsePolicy, Session, SessionObserver,
};
use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
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

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Terminal observer: shows a spinner while a request is outstanding and a
/// one-line result when it settles.
struct CliObserver {
    /// Spinner for the current request; a fresh one per request.
    bar: Mutex<Option<(ProgressBar, Instant)>>,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: Mutex::new(None),
        })
    }

    fn take_bar(&self) -> Option<(ProgressBar, Instant)> {
        self.bar.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl SessionObserver for CliObserver {
    fn on_image_loaded(&self, image: ImageId, mime_type: &str, bytes: usize) {
        eprintln!(
            "{} Image {}  {}",
            cyan("◆"),
            bold(&image.to_string()),
            dim(&format!("{mime_type}, {bytes} bytes")),
        );
    }

    fn on_extraction_start(&self, image: ImageId) {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Processing");
        bar.set_message(format!("image {image}"));
        bar.enable_steady_tick(Duration::from_millis(80));
        *self.bar.lock().unwrap_or_else(PoisonError::into_inner) = Some((bar, Instant::now()));
    }

    fn on_extraction_settled(&self, _image: ImageId, state: &ExtractionState) {
        let Some((bar, started)) = self.take_bar() else {
            return;
        };
        bar.finish_and_clear();
        let elapsed = dim(&format!("{:.1}s", started.elapsed().as_secs_f64()));

        match state {
            ExtractionState::Succeeded(latex) => eprintln!(
                "{} LaTeX extracted  {}  {}",
                green("✔"),
                dim(&format!("{} chars", latex.chars().count())),
                elapsed,
            ),
            ExtractionState::Failed(message) => {
                eprintln!("{} {}  {}", red("✘"), red(message), elapsed)
            }
            _ => {}
        }
    }

    fn on_stale_response(&self, image: ImageId) {
        if let Some((bar, _)) = self.take_bar() {
            bar.finish_and_clear();
        }
        eprintln!(
            "{} {}",
            cyan("⚠"),
            dim(&format!("Reply for replaced image {image} discarded")),
        );
    }

    fn on_copied(&self, _chars: usize) {
        eprintln!("{} Copied!", green("✔"));
    }
}

/// Platforms where copied text disappears with the process that owns it.
const HOLDS_CLIPBOARD: bool = cfg!(all(
    unix,
    not(any(target_os = "macos", target_os = "android", target_os = "emscripten"))
));

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract LaTeX from an image file (stdout)
  math-ocr equation.png

  # Write to a file and copy to the clipboard
  math-ocr whiteboard.jpg -o formula.tex --copy

  # Use the image currently on the clipboard
  math-ocr --paste

  # Keep running; extract every image pasted to the clipboard
  math-ocr --watch --copy

  # Treat a file as a drop with a declared type (non-image types are ignored)
  math-ocr --drop-type image/webp scan.bin

  # Render a KaTeX preview page next to the output
  math-ocr equation.png --preview preview.html

  # Use another vision provider through edgequake-llm
  math-ocr --provider openai --model gpt-4.1-mini equation.png

  # JSON output with session state
  math-ocr --json equation.png > result.json

SUPPORTED IMAGE TYPES:
  png, jpg/jpeg, gif, webp, bmp, tiff, ico, avif, svg, heic/heif
  Files with other extensions are accepted when their content is an image.

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default backend)
  GOOGLE_API_KEY          Fallback for GEMINI_API_KEY
  EDGEQUAKE_LLM_PROVIDER  Use an edgequake-llm provider instead of Gemini
  EDGEQUAKE_MODEL         Model for EDGEQUAKE_LLM_PROVIDER
  OPENAI_API_KEY          API key when --provider openai
  ANTHROPIC_API_KEY       API key when --provider anthropic
  RUST_LOG                Override the log filter (e.g. math_ocr=debug)

SETUP:
  1. Set API key:     export GEMINI_API_KEY=...
  2. Extract:         math-ocr equation.png
"#;

/// Convert images of math to LaTeX using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "math-ocr",
    version,
    about = "Convert images of mathematical expressions to LaTeX using Vision LLMs",
    long_about = "Convert photos, scans and screenshots of handwritten or printed formulas to \
LaTeX using a Vision Language Model. Uses Google Gemini by default; any edgequake-llm provider \
(OpenAI, Anthropic, Ollama, ...) can be selected instead.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image file to read.
    #[arg(required_unless_present_any = ["paste", "watch"])]
    input: Option<PathBuf>,

    /// Read the image from the clipboard instead of a file.
    #[arg(long, conflicts_with_all = ["input", "watch"])]
    paste: bool,

    /// Keep running and extract every image pasted to the clipboard.
    #[arg(long, conflicts_with = "input")]
    watch: bool,

    /// Clipboard poll interval for --watch, in milliseconds.
    #[arg(long, env = "MATH_OCR_POLL_MS", default_value_t = 500,
          value_parser = clap::value_parser!(u64).range(50..=10_000))]
    poll_ms: u64,

    /// Treat INPUT as a dropped file with this declared MIME type.
    #[arg(long, requires = "input")]
    drop_type: Option<String>,

    /// Write LaTeX to this file instead of stdout.
    #[arg(short, long, env = "MATH_OCR_OUTPUT")]
    output: Option<PathBuf>,

    /// Output the session snapshot as JSON instead of plain LaTeX.
    #[arg(long, env = "MATH_OCR_JSON")]
    json: bool,

    /// Copy the extracted LaTeX to the clipboard.
    #[arg(long, env = "MATH_OCR_COPY")]
    copy: bool,

    /// With --copy on Linux: seconds to keep serving the copied LaTeX before
    /// exiting, unless another app takes the clipboard first. 0 disables.
    #[arg(long, env = "MATH_OCR_COPY_HOLD", default_value_t = 30)]
    copy_hold: u64,

    /// Write a KaTeX-rendered HTML preview to this file.
    #[arg(long, env = "MATH_OCR_PREVIEW")]
    preview: Option<PathBuf>,

    /// Model ID (default: gemini-2.5-flash).
    #[arg(long, env = "MATH_OCR_MODEL")]
    model: Option<String>,

    /// edgequake-llm provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "MATH_OCR_PROVIDER",
        long_help = "Vision provider routed through edgequake-llm. When unset, Gemini is \
          called directly with GEMINI_API_KEY."
    )]
    provider: Option<String>,

    /// Gemini API base URL.
    #[arg(long, env = "MATH_OCR_API_BASE")]
    api_base: Option<String>,

    /// Path to a text file containing a custom instruction.
    #[arg(long, env = "MATH_OCR_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "MATH_OCR_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max output tokens.
    #[arg(long, env = "MATH_OCR_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: usize,

    /// Request timeout in seconds.
    #[arg(long, env = "MATH_OCR_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// What to do with a reply that arrives after the image changed.
    #[arg(long, env = "MATH_OCR_STALE_POLICY", value_enum, default_value = "last-request-wins")]
    stale_policy: StalePolicyArg,

    /// Disable the spinner.
    #[arg(long, env = "MATH_OCR_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MATH_OCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MATH_OCR_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StalePolicyArg {
    LastRequestWins,
    ImageTagged,
}

impl From<StalePolicyArg> for ResponsePolicy {
    fn from(v: StalePolicyArg) -> Self {
        match v {
            StalePolicyArg::ImageTagged => ResponsePolicy::ImageTagged,
            StalePolicyArg::LastRequestWins => ResponsePolicy::LastRequestWins,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner covers progress; library INFO logs would only interleave
    // with it.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    // ── Build config and session ─────────────────────────────────────────
    let observer = show_progress.then(CliObserver::new);
    let config = build_config(&cli, observer).await?;
    let session = Session::from_config(&config).context("Failed to set up vision backend")?;
    // A one-shot run exits right after copying; on Linux the text would go
    // with it unless the write holds the clipboard.
    let mut clipboard = if cli.watch {
        ClipboardWriter::new()
    } else {
        ClipboardWriter::holding(Duration::from_secs(cli.copy_hold))
    };

    if cli.watch {
        return watch(&cli, &session, &mut clipboard).await;
    }

    // ── Acquire ──────────────────────────────────────────────────────────
    if cli.paste {
        let pasted = session
            .acquire_clipboard(&ClipboardReader)
            .await
            .context("Failed to read the clipboard")?;
        if pasted.is_none() {
            anyhow::bail!("The clipboard does not hold an image");
        }
    } else if let Some(ref input) = cli.input {
        match cli.drop_type {
            Some(ref declared) => {
                let bytes = tokio::fs::read(input)
                    .await
                    .with_context(|| format!("Failed to read {}", input.display()))?;
                if session.acquire_drop(declared, bytes).is_none() {
                    anyhow::bail!("Dropped file type '{declared}' is not an image; nothing to do");
                }
            }
            None => {
                session
                    .acquire_file(input)
                    .await
                    .with_context(|| format!("Failed to load {}", input.display()))?;
            }
        }
    }

    // ── Extract and present ──────────────────────────────────────────────
    let start = Instant::now();
    let state = session
        .extract_and_wait()
        .await
        .context("No image to extract from")?;

    if let ExtractionState::Failed(message) = state {
        if cli.json {
            print_json(&session)?;
        }
        anyhow::bail!("Extraction failed: {message}");
    }

    present(&cli, &session, &mut clipboard).await?;

    if !cli.quiet && !show_progress {
        eprintln!("Extracted in {}ms", start.elapsed().as_millis());
    }

    Ok(())
}

/// Extract every image pasted while running, until Ctrl-C.
async fn watch(cli: &Cli, session: &Session, clipboard: &mut ClipboardWriter) -> Result<()> {
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let (subscription, mut pastes) =
        subscribe_paste(ClipboardReader, Duration::from_millis(cli.poll_ms));

    if !cli.quiet {
        eprintln!(
            "{} {}",
            cyan("◆"),
            bold("Watching the clipboard for images… (Ctrl-C to stop)")
        );
    }

    // One Ctrl-C future for the whole run, raced against both the wait for
    // a paste and the request itself.
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let Some(Some(blob)) = unless_interrupted(&mut ctrl_c, pastes.next()).await else {
            break;
        };
        session.load_image(blob);
        let Some(state) = unless_interrupted(&mut ctrl_c, session.extract_and_wait()).await
        else {
            break;
        };
        match state {
            Some(ExtractionState::Succeeded(_)) => {
                // A failed write for one image shouldn't end the watch.
                if let Err(e) = present(cli, session, clipboard).await {
                    eprintln!("{} {:#}", red("✘"), e);
                }
            }
            // The spinner observer has already reported the failure.
            Some(ExtractionState::Failed(message)) if !show_progress => {
                eprintln!("{} {}", red("✘"), message);
                session.dismiss_error();
            }
            Some(ExtractionState::Failed(_)) => session.dismiss_error(),
            _ => {}
        }
    }

    drop(subscription);
    if !cli.quiet {
        eprintln!("{} {}", cyan("◆"), dim("Stopped watching"));
    }
    Ok(())
}

/// Run `work` unless `interrupt` completes first.
async fn unless_interrupted<I, F>(interrupt: &mut Pin<&mut I>, work: F) -> Option<F::Output>
where
    I: Future,
    F: Future,
{
    tokio::select! {
        _ = interrupt.as_mut() => None,
        out = work => Some(out),
    }
}

/// Print or write the LaTeX, then copy and render as requested.
async fn present(cli: &Cli, session: &Session, clipboard: &mut ClipboardWriter) -> Result<()> {
    let latex = session.latex();

    if let Some(ref output_path) = cli.output {
        write_atomic(output_path, latex.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        if !cli.quiet {
            eprintln!(
                "{}  {}",
                dim(&format!("{} chars", latex.chars().count())),
                bold(&format!("→  {}", output_path.display())),
            );
        }
    } else if cli.json {
        print_json(session)?;
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(latex.as_bytes())
            .context("Failed to write to stdout")?;
        // Ensure a trailing newline on stdout.
        if !latex.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if let Some(ref preview_path) = cli.preview {
        write_preview(&KatexHtmlRenderer::default(), &latex, preview_path)
            .await
            .context("Failed to write preview")?;
    }

    if cli.copy {
        if let Some(window) = clipboard.hold().filter(|_| HOLDS_CLIPBOARD) {
            io::stdout().flush().ok();
            if !cli.quiet {
                eprintln!(
                    "{} {}",
                    cyan("◆"),
                    dim(&format!(
                        "Keeping the LaTeX on the clipboard for up to {}s (paste it, or copy something else)…",
                        window.as_secs()
                    )),
                );
            }
        }
        // A holding write blocks until the clipboard changes hands.
        tokio::task::block_in_place(|| session.copy_latex(clipboard))
            .context("Failed to copy LaTeX to the clipboard")?;
    }

    Ok(())
}

fn print_json(session: &Session) -> Result<()> {
    let json =
        serde_json::to_string_pretty(&session.snapshot()).context("Failed to serialise output")?;
    println!("{json}");
    Ok(())
}

/// Map CLI args to `OcrConfig`.
async fn build_config(cli: &Cli, observer: Option<Arc<CliObserver>>) -> Result<OcrConfig> {
    let mut builder = OcrConfig::builder()
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .request_timeout_secs(cli.timeout)
        .response_policy(cli.stale_policy.into());

    if let Some(ref path) = cli.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref base) = cli.api_base {
        builder = builder.api_base(base.clone());
    }
    if let Some(obs) = observer {
        builder = builder.observer(obs as Arc<dyn SessionObserver>);
    }

    builder.build().context("Invalid configuration")
}
