use crate::engine::HttpBackend;
use crate::model::{
    FailureClass, GenerationRequest, Outcome, RetryPolicy, StudioConfig, StudioEvent, Style,
};
use crate::orchestrator::{process_outcome, run_controller, NoticeLevel, RequestController, UiCommand};
use crate::{storage, text_summary, upload};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Exit status after the user aborted a request (128 + SIGINT).
const EXIT_ABORTED: i32 = 130;
const EXIT_FAILED: i32 = 1;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "genstudio",
    version,
    about = "Image-generation studio: upload an image, pick a style, generate"
)]
pub struct Cli {
    /// Generation endpoint (receives a JSON POST)
    #[arg(long, default_value = "http://localhost:3000/api/generate")]
    pub base_url: String,

    /// Image to upload (PNG or JPG, at most 10MB)
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Text prompt describing the desired result
    #[arg(long)]
    pub prompt: Option<String>,

    /// Style preset
    #[arg(long, value_enum, default_value_t = Style::Editorial)]
    pub style: Style,

    /// Maximum attempts per request, including the first
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles for each later attempt
    #[arg(long, default_value = "500ms")]
    pub backoff_base: humantime::Duration,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,

    /// Run silently: suppress all output except errors (for scripting)
    #[arg(long)]
    pub silent: bool,

    /// Show the local generation history and exit
    #[arg(long)]
    pub history: bool,

    /// Re-submit the image, prompt and style of a history entry
    #[arg(long, value_name = "ID")]
    pub rerun: Option<String>,

    /// Export a successful result as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_save: bool,

    /// History file location (defaults to the platform data directory)
    #[arg(long)]
    pub history_file: Option<PathBuf>,
}

pub async fn run(args: Cli) -> Result<i32> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    let cfg = build_config(&args);

    if args.history {
        print_history(&args, &cfg)?;
        return Ok(0);
    }

    let request = build_request(&args, &cfg)?;
    run_generation(args, cfg, request).await
}

/// Build a `StudioConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> StudioConfig {
    StudioConfig {
        base_url: args.base_url.clone(),
        user_agent: format!("genstudio/{}", env!("CARGO_PKG_VERSION")),
        retry: RetryPolicy {
            max_attempts: args.max_attempts,
            backoff_base: Duration::from(args.backoff_base),
        },
        history_path: args.history_file.clone(),
        auto_save: args.auto_save,
    }
}

/// Validate inputs and assemble the request, either fresh or restored from history.
fn build_request(args: &Cli, cfg: &StudioConfig) -> Result<GenerationRequest> {
    if let Some(id) = args.rerun.as_deref() {
        let path = storage::history_path(cfg.history_path.as_deref())?;
        let history = storage::load_history(&path);
        let entry = storage::find_entry(&history, id)
            .with_context(|| format!("no history entry with id {id}"))?;
        let mut request = upload::request_from_history(entry);
        if let Some(prompt) = args.prompt.as_deref() {
            request.prompt = upload::normalize_prompt(prompt)?;
        }
        return Ok(request);
    }

    let image = args
        .image
        .as_deref()
        .context("Please upload an image first")?;
    upload::prepare_request(image, args.prompt.as_deref().unwrap_or_default(), args.style)
}

#[derive(Debug, PartialEq, Eq)]
enum InterruptAction {
    Forwarded,
    Exit,
}

/// Route one Ctrl-C press: abort the running submit, or quit once it has settled.
fn route_interrupt(cmd_tx: &mpsc::UnboundedSender<UiCommand>) -> InterruptAction {
    match cmd_tx.send(UiCommand::Abort) {
        Ok(()) => InterruptAction::Forwarded,
        // The controller loop dropped its receiver.
        Err(_) => InterruptAction::Exit,
    }
}

/// Forward Ctrl-C presses to the controller as abort commands. The handler stays
/// installed until output is flushed, so a press after the submit settled exits.
async fn forward_interrupts(cmd_tx: mpsc::UnboundedSender<UiCommand>) {
    while tokio::signal::ctrl_c().await.is_ok() {
        if route_interrupt(&cmd_tx) == InterruptAction::Exit {
            tracing::debug!("interrupted after the request settled");
            std::process::exit(EXIT_ABORTED);
        }
    }
}

/// Progress line for text mode, if the event deserves one.
fn describe_event(ev: &StudioEvent) -> Option<String> {
    match ev {
        StudioEvent::AttemptStarted {
            attempt: 1,
            ..
        } => Some("Generating…".to_string()),
        StudioEvent::AttemptStarted {
            attempt,
            max_attempts,
        } => Some(format!("Attempt {attempt}/{max_attempts}…")),
        StudioEvent::AttemptFailed {
            attempt,
            class: FailureClass::Retryable,
            message,
        } => Some(format!("Attempt {attempt} failed: {message}")),
        StudioEvent::AttemptFailed { .. } => None,
        StudioEvent::BackoffStarted { delay, .. } => Some(format!(
            "Retrying in {}",
            humantime::format_duration(*delay)
        )),
        StudioEvent::Info(info) => Some(info.to_message()),
        StudioEvent::Completed { .. } => None,
    }
}

fn exit_code(outcome: &Outcome) -> i32 {
    match outcome {
        Outcome::Success(_) => 0,
        Outcome::Aborted => EXIT_ABORTED,
        Outcome::Exhausted { .. } | Outcome::Rejected { .. } => EXIT_FAILED,
    }
}

async fn run_generation(args: Cli, cfg: StudioConfig, request: GenerationRequest) -> Result<i32> {
    let backend = HttpBackend::new(&cfg)?;
    tracing::debug!(endpoint = %backend.endpoint(), style = %request.style, "submitting generation");

    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<StudioEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let controller = RequestController::new(backend, cfg.retry.clone()).with_events(evt_tx);
    let (out_tx, out_handle) = spawn_output_writer();

    // Progress is only narrated in text mode; the attempt count is needed either way.
    let show_progress = !args.json;
    let progress_tx = out_tx.clone();
    let progress = tokio::spawn(async move {
        let mut attempts = 0u32;
        while let Some(ev) = evt_rx.recv().await {
            if let StudioEvent::AttemptStarted { attempt, .. } = ev {
                attempts = attempt;
            }
            if show_progress {
                if let Some(line) = describe_event(&ev) {
                    let _ = progress_tx.send(OutputLine::Stderr(line));
                }
            }
        }
        attempts
    });
    let interrupts = tokio::spawn(forward_interrupts(cmd_tx));

    let outcome = run_controller(&controller, request, cmd_rx).await;
    // Dropping the controller closes the event channel and ends the progress task.
    drop(controller);
    let attempts = progress.await.context("progress task failed")?;

    let history_path = if cfg.auto_save {
        match storage::history_path(cfg.history_path.as_deref()) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "history disabled");
                None
            }
        }
    } else {
        None
    };
    let processed = process_outcome(&args, history_path.as_deref(), &outcome);

    if args.silent {
        if let Some(message) = outcome.error_message().filter(|_| outcome.is_failure()) {
            let _ = out_tx.send(OutputLine::Stdout(message));
        }
    } else {
        for notice in &processed.notices {
            let line = match notice.level {
                NoticeLevel::Success | NoticeLevel::Neutral => notice.message.clone(),
                NoticeLevel::Error => format!("Error: {}", notice.message),
            };
            let _ = out_tx.send(OutputLine::Stderr(line));
        }
        if let Some(p) = processed.saved_path.as_deref() {
            let _ = out_tx.send(OutputLine::Stderr(format!(
                "Saved: {} ({} in history)",
                p.display(),
                processed.history.len()
            )));
        }
        if args.json {
            let out = serde_json::to_string_pretty(&outcome)?;
            let _ = out_tx.send(OutputLine::Stdout(out));
        } else {
            let summary = text_summary::build_text_summary(&outcome, attempts);
            for line in summary.lines {
                let _ = out_tx.send(OutputLine::Stdout(line));
            }
        }
    }

    drop(out_tx);
    let _ = out_handle.await;
    interrupts.abort();
    Ok(exit_code(&outcome))
}

fn print_history(args: &Cli, cfg: &StudioConfig) -> Result<()> {
    let path = storage::history_path(cfg.history_path.as_deref())?;
    let history = storage::load_history(&path);
    let mut stdout = std::io::stdout().lock();
    if args.json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(&history)?)?;
    } else {
        for line in text_summary::build_history_summary(&history).lines {
            writeln!(stdout, "{line}")?;
        }
    }
    Ok(())
}
