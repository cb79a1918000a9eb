//! Build orchestration: one request → extract → transform → split → convert →
//! assemble → post-process → export, on its own task.
//!
//! Callers get a [`BuildHandle`]: a stream of [`BuildEvent`]s, the two human
//! gates (AI reply, output location), a cancel switch, and the final
//! [`BuildReport`]. The working directory and the automation host are torn
//! down before the terminal event is sent, whatever the outcome.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use autoformatter_convert::{Converter, FragmentConverter, TextExtractor};
use autoformatter_host::{HostGuard, HostLauncher};
use autoformatter_markdown::split_response;
use autoformatter_shared::{
    AppConfig, AutoFormatterError, BuildId, BuildRequest, ComponentRegistry,
    MissingFragmentPolicy, Result, SourceKind, TransformMode,
};

use crate::assembler::assemble;
use crate::context::PipelineContext;
use crate::export::{
    AppendProbe, ExportedArtifact, Exporter, LockProbe, resolve_base_name, resolve_output_dir,
};
use crate::gate::{CancelToken, GateReceiver, GateSender, gate};
use crate::postprocess::{PostProcessOptions, postprocess};
use crate::prompt::{ClipboardSink, PromptSink, compose_prompt, load_system_prompt};
use crate::state::{BuildState, StateMachine};
use crate::transform::TextTransform;

// ---------------------------------------------------------------------------
// Settings and services
// ---------------------------------------------------------------------------

/// Resolved, build-independent settings.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub registry: ComponentRegistry,
    pub style_template: PathBuf,
    pub prompt_file: PathBuf,
    /// Root for default and relative output directories.
    pub outputs_dir: PathBuf,
    /// Where unparseable AI replies are saved.
    pub debug_dir: PathBuf,
    /// Parent of per-build working directories; the system temp dir when `None`.
    pub work_root: Option<PathBuf>,
    pub min_response_len: usize,
    pub missing_fragment: MissingFragmentPolicy,
    pub proofing_language_id: u32,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            registry: config.registry()?,
            style_template: config.paths.style_template(),
            prompt_file: config.paths.prompt_file(),
            outputs_dir: config.paths.outputs_dir(),
            debug_dir: config.paths.debug_dir(),
            work_root: None,
            min_response_len: config.pipeline.min_response_len,
            missing_fragment: config.pipeline.missing_fragment,
            proofing_language_id: config.pipeline.proofing_language_id,
        })
    }
}

/// The external capabilities a build is wired to.
#[derive(Clone)]
pub struct Services {
    pub converter: Arc<dyn Converter>,
    pub launcher: Arc<dyn HostLauncher>,
    /// Required for automated builds only.
    pub transform: Option<Arc<dyn TextTransform>>,
    pub prompt_sink: Arc<dyn PromptSink>,
    pub lock_probe: Arc<dyn LockProbe>,
}

impl Services {
    /// Clipboard prompts and append-probe lock detection by default.
    pub fn new(converter: Arc<dyn Converter>, launcher: Arc<dyn HostLauncher>) -> Self {
        Self {
            converter,
            launcher,
            transform: None,
            prompt_sink: Arc::new(ClipboardSink),
            lock_probe: Arc::new(AppendProbe),
        }
    }

    pub fn with_transform(mut self, transform: Arc<dyn TextTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_prompt_sink(mut self, sink: Arc<dyn PromptSink>) -> Self {
        self.prompt_sink = sink;
        self
    }

    pub fn with_lock_probe(mut self, probe: Arc<dyn LockProbe>) -> Self {
        self.lock_probe = probe;
        self
    }
}

// ---------------------------------------------------------------------------
// Events and outcome
// ---------------------------------------------------------------------------

/// Progress notifications. `seq` strictly increases across one build.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    Log { seq: u64, line: String },
    State { seq: u64, state: BuildState },
    /// The prompt was published; fill the response gate to continue.
    AwaitingHuman { seq: u64, prompt_location: String },
    /// Fill the output-location gate to continue.
    AwaitingOutputLocation { seq: u64 },
    Finished { seq: u64, outcome: BuildOutcome },
}

impl BuildEvent {
    pub fn seq(&self) -> u64 {
        match self {
            Self::Log { seq, .. }
            | Self::State { seq, .. }
            | Self::AwaitingHuman { seq, .. }
            | Self::AwaitingOutputLocation { seq }
            | Self::Finished { seq, .. } => *seq,
        }
    }
}

#[derive(Debug, Clone)]
pub enum BuildOutcome {
    Done { artifacts: Vec<ExportedArtifact> },
    Failed {
        /// State the build was in when it failed.
        stage: &'static str,
        error: Arc<AutoFormatterError>,
    },
    Cancelled,
}

impl BuildOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    /// One line for the terminal signal.
    pub fn summary(&self) -> String {
        match self {
            Self::Done { artifacts } => {
                let paths: Vec<String> = artifacts.iter().map(|a| a.path.display().to_string()).collect();
                format!("Build finished: {}", paths.join(", "))
            }
            Self::Failed { stage, error } => match error.hint() {
                Some(hint) => format!("Build failed while {stage}: {error} ({hint})"),
                None => format!("Build failed while {stage}: {error}"),
            },
            Self::Cancelled => "Build cancelled".to_string(),
        }
    }
}

/// Final result of one build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub build_id: BuildId,
    /// The (already removed) working directory, if one was created.
    pub work_dir: Option<PathBuf>,
    pub outcome: BuildOutcome,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Caller-side controls for a running build. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BuildControls {
    response: GateSender<String>,
    output_location: GateSender<PathBuf>,
    cancel: CancelToken,
}

impl BuildControls {
    /// Hand back the AI reply. An empty reply cancels the build.
    pub fn submit_response(&self, text: impl Into<String>) -> Result<()> {
        self.response.fill(text.into())
    }

    pub fn choose_output_dir(&self, dir: impl Into<PathBuf>) -> Result<()> {
        self.output_location.fill(dir.into())
    }

    /// Abort at the next human gate. Running stages are not interrupted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

pub struct BuildHandle {
    id: BuildId,
    events: Option<mpsc::UnboundedReceiver<BuildEvent>>,
    controls: BuildControls,
    task: JoinHandle<BuildReport>,
}

impl BuildHandle {
    pub fn id(&self) -> &BuildId {
        &self.id
    }

    /// The event stream. Available once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<BuildEvent>> {
        self.events.take()
    }

    pub fn controls(&self) -> BuildControls {
        self.controls.clone()
    }

    pub fn submit_response(&self, text: impl Into<String>) -> Result<()> {
        self.controls.submit_response(text)
    }

    pub fn choose_output_dir(&self, dir: impl Into<PathBuf>) -> Result<()> {
        self.controls.choose_output_dir(dir)
    }

    pub fn cancel(&self) {
        self.controls.cancel();
    }

    /// Wait for the build to finish.
    pub async fn wait(self) -> Result<BuildReport> {
        let report = self
            .task
            .await
            .map_err(|e| AutoFormatterError::Internal(format!("build task failed: {e}")))?;
        drop(self.controls);
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Starts builds. Each build gets its own task, working directory and host.
#[derive(Clone)]
pub struct Orchestrator {
    settings: Arc<PipelineSettings>,
    services: Services,
}

impl Orchestrator {
    pub fn new(settings: PipelineSettings, services: Services) -> Self {
        Self {
            settings: Arc::new(settings),
            services,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Start `request` in the background. Must be called inside a tokio runtime.
    pub fn spawn(&self, request: BuildRequest) -> BuildHandle {
        let id = BuildId::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = gate("AI reply");
        let (output_tx, output_rx) = gate("output location");
        let cancel = CancelToken::new();

        let run = BuildRun {
            id: id.clone(),
            settings: Arc::clone(&self.settings),
            services: self.services.clone(),
            emitter: Emitter::new(events_tx),
            cancel: cancel.clone(),
        };

        let span = info_span!("build", id = %id);
        let task = tokio::spawn(
            async move {
                let gates = (response_rx, output_rx);
                run.run(request, gates).await
            }
            .instrument(span),
        );

        BuildHandle {
            id,
            events: Some(events_rx),
            controls: BuildControls {
                response: response_tx,
                output_location: output_tx,
                cancel,
            },
            task,
        }
    }

    /// Run `request` to completion, answering no gates.
    ///
    /// Suited to automated builds with an output directory; a build that
    /// reaches a gate ends up cancelled.
    pub async fn run(&self, request: BuildRequest) -> Result<BuildReport> {
        let BuildHandle { task, controls, .. } = self.spawn(request);
        // Without senders, any gate the build reaches resolves as cancelled.
        drop(controls);
        task.await
            .map_err(|e| AutoFormatterError::Internal(format!("build task failed: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Event emission
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Emitter {
    tx: mpsc::UnboundedSender<BuildEvent>,
    seq: Arc<AtomicU64>,
    machine: Arc<Mutex<StateMachine>>,
}

impl Emitter {
    fn new(tx: mpsc::UnboundedSender<BuildEvent>) -> Self {
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
            machine: Arc::new(Mutex::new(StateMachine::default())),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn send(&self, event: BuildEvent) {
        // Nobody listening is fine.
        let _ = self.tx.send(event);
    }

    fn log(&self, line: impl Into<String>) {
        let line = line.into();
        debug!(target: "autoformatter_core::build_log", "{line}");
        self.send(BuildEvent::Log {
            seq: self.next_seq(),
            line,
        });
    }

    fn enter(&self, state: BuildState) -> Result<()> {
        self.machine
            .lock()
            .map_err(|_| AutoFormatterError::Internal("build state poisoned".into()))?
            .advance(state.clone())?;
        debug!(state = state.name(), "state change");
        self.send(BuildEvent::State {
            seq: self.next_seq(),
            state,
        });
        Ok(())
    }

    fn current(&self) -> BuildState {
        self.machine
            .lock()
            .map(|m| m.current().clone())
            .unwrap_or(BuildState::Init)
    }
}

// ---------------------------------------------------------------------------
// One build
// ---------------------------------------------------------------------------

type Gates = (GateReceiver<String>, GateReceiver<PathBuf>);

struct BuildRun {
    id: BuildId,
    settings: Arc<PipelineSettings>,
    services: Services,
    emitter: Emitter,
    cancel: CancelToken,
}

impl BuildRun {
    async fn run(self, request: BuildRequest, (response, output): Gates) -> BuildReport {
        info!(
            input = %request.input_path.display(),
            components = request.components.len(),
            mode = ?request.mode,
            "build started"
        );

        let mut ctx = match PipelineContext::create(
            &self.settings.registry,
            &request.components,
            self.settings.work_root.as_deref(),
            response,
            output,
        ) {
            Ok(ctx) => ctx,
            Err(e) => return self.finish(None, Err(e)),
        };

        let work_dir = ctx.work_dir().to_path_buf();
        let result = self.execute(&mut ctx, &request).await;

        if let Err(e) = ctx.close() {
            warn!(error = %e, "working directory cleanup failed");
            self.emitter.log(format!("Could not remove working directory: {e}"));
        }

        self.finish(Some(work_dir), result)
    }

    /// Record the terminal state and send the terminal event.
    fn finish(&self, work_dir: Option<PathBuf>, result: Result<Vec<ExportedArtifact>>) -> BuildReport {
        let outcome = match result {
            Ok(artifacts) => {
                self.terminate(BuildState::Done);
                BuildOutcome::Done { artifacts }
            }
            Err(AutoFormatterError::Cancelled) => {
                self.terminate(BuildState::Cancelled);
                BuildOutcome::Cancelled
            }
            Err(error) => {
                let stage = self.emitter.current().name();
                self.terminate(BuildState::Failed(error.to_string()));
                BuildOutcome::Failed {
                    stage,
                    error: Arc::new(error),
                }
            }
        };

        self.emitter.log(outcome.summary());
        self.emitter.send(BuildEvent::Finished {
            seq: self.emitter.next_seq(),
            outcome: outcome.clone(),
        });

        BuildReport {
            build_id: self.id.clone(),
            work_dir,
            outcome,
        }
    }

    fn terminate(&self, state: BuildState) {
        if let Err(e) = self.emitter.enter(state) {
            warn!(error = %e, "could not record terminal state");
        }
    }

    async fn execute(&self, ctx: &mut PipelineContext, request: &BuildRequest) -> Result<Vec<ExportedArtifact>> {
        self.validate(ctx, request)?;

        // --- Extracting ---
        self.emitter.enter(BuildState::Extracting)?;
        self.emitter
            .log(format!("Extracting text from {}", request.input_path.display()));
        let extractor = TextExtractor::new(Arc::clone(&self.services.converter));
        let input = request.input_path.clone();
        let text = blocking(move || extractor.extract(&input)).await?;
        self.emitter
            .log(format!("Extracted {} characters", text.chars().count()));

        // --- Transforming ---
        self.emitter.enter(BuildState::Transforming)?;
        let system_prompt = load_system_prompt(&self.settings.prompt_file)?;
        let reply = match request.mode {
            TransformMode::Automated => self.transform(&system_prompt, &text).await?,
            TransformMode::HumanMediated => self.await_reply(ctx, &system_prompt, &text).await?,
        };

        // --- Splitting ---
        self.emitter.enter(BuildState::Splitting)?;
        let fragments_dir = ctx.fragments_dir();
        let debug_dir = self.settings.debug_dir.clone();
        let written = blocking(move || split_response(&reply, &fragments_dir, &debug_dir)).await?;
        let names: Vec<&str> = written.iter().map(String::as_str).collect();
        self.emitter.log(format!(
            "Split reply into {} fragment(s): {}",
            names.len(),
            names.join(", ")
        ));

        // --- Converting ---
        self.emitter.enter(BuildState::Converting)?;
        self.convert_fragments(ctx).await?;

        // --- Assembling + PostProcessing ---
        self.emitter.enter(BuildState::Assembling)?;
        let merged = self.assemble_and_postprocess(ctx).await?;

        // --- Exporting ---
        self.emitter.enter(BuildState::Exporting)?;
        self.export(ctx, request, merged).await
    }

    /// Checks that need no external tool.
    fn validate(&self, ctx: &PipelineContext, request: &BuildRequest) -> Result<()> {
        if request.targets.is_empty() {
            return Err(AutoFormatterError::validation(
                "select at least one export target",
            ));
        }
        if ctx.selected().is_empty() {
            return Err(AutoFormatterError::validation(
                "none of the requested components is registered",
            ));
        }
        if request.mode == TransformMode::Automated && self.services.transform.is_none() {
            return Err(AutoFormatterError::config(
                "automated mode needs an AI transform; configure [ai] or use the human-mediated mode",
            ));
        }
        Ok(())
    }

    async fn transform(&self, system_prompt: &str, text: &str) -> Result<String> {
        let transform = self
            .services
            .transform
            .as_ref()
            .ok_or_else(|| AutoFormatterError::config("no AI transform configured"))?;

        self.emitter.log("Sending document to the AI service");
        let reply = transform.transform(system_prompt, text).await?;
        self.emitter
            .log(format!("AI reply received ({} characters)", reply.chars().count()));
        Ok(reply)
    }

    /// Publish the prompt, then block on the response gate.
    async fn await_reply(&self, ctx: &mut PipelineContext, system_prompt: &str, text: &str) -> Result<String> {
        let prompt = compose_prompt(system_prompt, text);
        let sink = Arc::clone(&self.services.prompt_sink);
        let prompt_location = blocking(move || sink.publish(&prompt)).await?;

        self.emitter.enter(BuildState::AwaitingHuman)?;
        self.emitter.log(format!(
            "Prompt published to {prompt_location}; waiting for the AI reply"
        ));
        self.emitter.send(BuildEvent::AwaitingHuman {
            seq: self.emitter.next_seq(),
            prompt_location,
        });

        let gate = ctx
            .response
            .take()
            .ok_or_else(|| AutoFormatterError::Internal("response gate already consumed".into()))?;
        let reply = gate.wait(&self.cancel).await?;

        let length = reply.trim().chars().count();
        if length == 0 {
            return Err(AutoFormatterError::Cancelled);
        }
        if length < self.settings.min_response_len {
            return Err(AutoFormatterError::validation(format!(
                "the pasted reply is too short ({length} characters, need at least {})",
                self.settings.min_response_len
            )));
        }

        self.emitter
            .log(format!("AI reply received ({length} characters)"));
        Ok(reply)
    }

    /// Convert every requested dynamic component, applying the missing-fragment policy.
    async fn convert_fragments(&self, ctx: &mut PipelineContext) -> Result<()> {
        let pending: Vec<(String, PathBuf)> = ctx
            .selected()
            .iter()
            .filter(|c| c.kind == SourceKind::Dynamic)
            .filter_map(|c| ctx.resolved_path(&c.id).map(|p| (c.id.clone(), p.to_path_buf())))
            .collect();

        let converter = FragmentConverter::new(Arc::clone(&self.services.converter));
        let template = self.settings.style_template.clone();
        let out_dir = ctx.converted_dir();
        let policy = self.settings.missing_fragment;

        let results = blocking(move || {
            std::fs::create_dir_all(&out_dir).map_err(|e| AutoFormatterError::io(&out_dir, e))?;

            let mut results = Vec::with_capacity(pending.len());
            for (id, markdown) in pending {
                let result = converter
                    .convert(&markdown, &template, &out_dir)
                    .map_err(|e| match e {
                        AutoFormatterError::ComponentMissing { path, .. } => {
                            AutoFormatterError::ComponentMissing { id: id.clone(), path }
                        }
                        other => other,
                    });
                let failed = result.is_err();
                results.push((id, result));
                if failed && policy == MissingFragmentPolicy::Fail {
                    break;
                }
            }
            Ok(results)
        })
        .await?;

        for (id, result) in results {
            match result {
                Ok(converted) => {
                    self.emitter.log(format!("Converted fragment '{id}'"));
                    ctx.redirect(&id, converted);
                }
                Err(e) if policy == MissingFragmentPolicy::Skip => {
                    warn!(id = %id, error = %e, "leaving fragment out");
                    self.emitter.log(format!("Skipping '{id}': {e}"));
                    ctx.drop_component(&id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Merge and normalize under one host instance, released on every path.
    async fn assemble_and_postprocess(&self, ctx: &PipelineContext) -> Result<PathBuf> {
        let launcher = Arc::clone(&self.services.launcher);
        let order = ctx.merge_order();
        let template = self.settings.style_template.clone();
        let output = ctx.merged_path();
        let options = PostProcessOptions {
            language_id: self.settings.proofing_language_id,
        };
        let emitter = self.emitter.clone();

        blocking(move || {
            let mut host = HostGuard::acquire(launcher.as_ref()).map_err(|e| {
                AutoFormatterError::Assembly(format!("could not start the automation host: {e}"))
            })?;

            let merged = assemble(&mut *host, &order, &template, &output)?;
            for path in &merged.skipped {
                emitter.log(format!("Component missing, skipped: {}", path.display()));
            }
            emitter.log(format!(
                "Merged {} document(s) with {} page break(s)",
                merged.inserted.len(),
                merged.page_breaks()
            ));

            emitter.enter(BuildState::PostProcessing)?;
            match postprocess(&mut *host, &merged.path, &options) {
                Ok(report) => {
                    for (step, error) in &report.failures {
                        emitter.log(format!("Post-processing step '{}' failed: {error}", step.name()));
                    }
                }
                Err(e) => {
                    warn!(error = %e, "post-processing skipped");
                    emitter.log(format!("Post-processing skipped: {e}"));
                }
            }

            Ok(merged.path)
        })
        .await
    }

    async fn export(
        &self,
        ctx: &mut PipelineContext,
        request: &BuildRequest,
        merged: PathBuf,
    ) -> Result<Vec<ExportedArtifact>> {
        let outputs_root = self.settings.outputs_dir.clone();
        let output_dir = match &request.output_dir {
            Some(dir) => resolve_output_dir(Some(dir.as_path()), &outputs_root),
            None => {
                self.emitter.log("Waiting for an output location");
                self.emitter.send(BuildEvent::AwaitingOutputLocation {
                    seq: self.emitter.next_seq(),
                });
                let gate = ctx.output_location.take().ok_or_else(|| {
                    AutoFormatterError::Internal("output location gate already consumed".into())
                })?;
                let chosen = gate.wait(&self.cancel).await?;
                resolve_output_dir(Some(chosen.as_path()), &outputs_root)
            }
        };
        let base_name = resolve_base_name(request.output_base_name.as_deref(), &request.input_path);

        let exporter = Exporter::new(Arc::clone(&self.services.converter))
            .with_probe(Arc::clone(&self.services.lock_probe));
        let targets = request.targets.clone();
        self.emitter.log(format!(
            "Exporting to {}",
            output_dir.join(&base_name).display()
        ));

        let artifacts = blocking(move || exporter.export(&merged, &output_dir, &base_name, &targets)).await?;
        for artifact in &artifacts {
            self.emitter.log(format!(
                "Wrote {} ({} bytes, sha256 {})",
                artifact.path.display(),
                artifact.size_bytes,
                artifact.sha256
            ));
        }
        Ok(artifacts)
    }
}

/// Run blocking work (subprocesses, host calls, file IO) off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AutoFormatterError::Internal(format!("background task failed: {e}")))?
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
