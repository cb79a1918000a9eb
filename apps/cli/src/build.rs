//! `autoformatter build`: run one build and answer its gates from the terminal.

use std::collections::BTreeSet;
use std::io::{BufRead, Read};
use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use autoformatter_convert::{Converter, ExternalConverter, PassthroughConverter};
use autoformatter_core::prompt::{ClipboardSink, FileSink, PromptSink};
use autoformatter_core::transform::ChatCompletionsTransform;
use autoformatter_core::{
    BuildControls, BuildEvent, BuildOutcome, Orchestrator, PipelineSettings, Services,
};
use autoformatter_host::{BridgeLauncher, HostLauncher, MemoryLauncher};
use autoformatter_shared::{AppConfig, BuildRequest, ExportTarget, TransformMode};

/// Parsed `build` arguments.
pub(crate) struct BuildArgs {
    pub input: PathBuf,
    pub components: Vec<String>,
    pub mode: TransformMode,
    pub out: Option<PathBuf>,
    pub name: Option<String>,
    pub targets: BTreeSet<ExportTarget>,
    pub prompt_file: Option<PathBuf>,
    pub response_file: Option<PathBuf>,
    pub dry_run: bool,
    pub json: bool,
}

pub(crate) async fn cmd_build(config: &AppConfig, args: BuildArgs) -> Result<()> {
    // Fail on a missing API key before anything runs.
    let transform = match args.mode {
        TransformMode::Automated => Some(ChatCompletionsTransform::from_config(config)?),
        TransformMode::HumanMediated => None,
    };

    let converter: Arc<dyn Converter> = if args.dry_run {
        Arc::new(PassthroughConverter)
    } else {
        Arc::new(ExternalConverter::from_config(&config.converter))
    };
    let launcher: Arc<dyn HostLauncher> = if args.dry_run {
        Arc::new(MemoryLauncher::default())
    } else {
        Arc::new(BridgeLauncher::new(config.host.clone()))
    };
    let sink: Arc<dyn PromptSink> = match &args.prompt_file {
        Some(path) => Arc::new(FileSink::new(path)),
        None => Arc::new(ClipboardSink),
    };

    let mut services = Services::new(converter, launcher).with_prompt_sink(sink);
    if let Some(transform) = transform {
        services = services.with_transform(Arc::new(transform));
    }
    let orchestrator = Orchestrator::new(PipelineSettings::from_config(config)?, services);

    let mut request = BuildRequest::new(args.components, &args.input, args.mode);
    request.targets = args.targets;
    request.output_dir = args.out;
    request.output_base_name = args.name;

    info!(
        input = %request.input_path.display(),
        components = %request.components.join(","),
        dry_run = args.dry_run,
        "starting build"
    );

    let mut handle = orchestrator.spawn(request);
    let mut events = handle
        .take_events()
        .ok_or_else(|| eyre!("build events already taken"))?;
    let controls = handle.controls();

    // Ctrl-C aborts at the next gate; a running stage finishes first.
    let on_interrupt = controls.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let progress = CliProgress::new();
    let outputs_dir = config.paths.outputs_dir();

    while let Some(event) = events.recv().await {
        match event {
            BuildEvent::State { state, .. } => progress.phase(state.name()),
            BuildEvent::Log { line, .. } => progress.log(&line),
            BuildEvent::AwaitingHuman { prompt_location, .. } => {
                progress.suspend(|| {
                    eprintln!();
                    eprintln!("  Prompt copied to {prompt_location}.");
                    eprintln!("  Paste it into your AI chat, then paste the full reply here.");
                    eprintln!("  Finish with Ctrl-D. Empty input cancels the build.");
                    eprintln!();
                });
                answer_reply(controls.clone(), args.response_file.clone());
            }
            BuildEvent::AwaitingOutputLocation { .. } => {
                progress.suspend(|| {
                    eprint!("  Output directory [{}]: ", outputs_dir.display());
                });
                answer_output_dir(controls.clone());
            }
            BuildEvent::Finished { .. } => break,
        }
    }

    let report = handle.wait().await?;
    progress.finish();

    match &report.outcome {
        BuildOutcome::Done { artifacts } => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(artifacts)?);
            } else {
                println!();
                println!("  Build complete!");
                println!("  ID:     {}", report.build_id);
                for artifact in artifacts {
                    println!("  Output: {} ({} bytes)", artifact.path.display(), artifact.size_bytes);
                }
                println!();
            }
            Ok(())
        }
        BuildOutcome::Cancelled => {
            println!("Build cancelled.");
            Ok(())
        }
        BuildOutcome::Failed { .. } => Err(eyre!(report.outcome.summary())),
    }
}

/// Read the pasted reply off-runtime and hand it to the build.
fn answer_reply(controls: BuildControls, response_file: Option<PathBuf>) {
    std::thread::spawn(move || {
        let reply = match response_file {
            Some(path) => std::fs::read_to_string(&path).unwrap_or_else(|e| {
                eprintln!("  cannot read {}: {e}", path.display());
                String::new()
            }),
            None => {
                let mut buf = String::new();
                if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
                    eprintln!("  cannot read stdin: {e}");
                    buf.clear();
                }
                buf
            }
        };
        // The build may already be gone (cancelled).
        let _ = controls.submit_response(reply);
    });
}

fn answer_output_dir(controls: BuildControls) {
    std::thread::spawn(move || {
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            line.clear();
        }
        let _ = controls.choose_output_dir(line.trim());
    });
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner showing the current stage, with build log lines printed above it.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn log(&self, line: &str) {
        self.spinner.println(format!("  {line}"));
    }

    fn suspend<F: FnOnce()>(&self, f: F) {
        self.spinner.suspend(f);
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}
