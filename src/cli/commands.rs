use crate::{
    cli::args::{
        CompileArgs, ConvertArgs, DetectArgs, GenerateArgs, GlobalArgs, RunArgs, SessionCommand,
        ValidateArgs,
    },
    cli::Exit,
    core::{
        config::{ConfigLoader, StepLineConfig},
        types::OutputFormat,
        yaml_layer::{
            actions::ActionRegistry,
            client::{DryRunClient, HttpStepClient, StepApiClient},
            compiler::{CheckpointRef, CompileContext, CompiledProgram},
            executor::{cancellation, ExecutionReport, Executor, ExecutorOptions, StepOutcome},
            files::expand_patterns,
            generate::{self as generation, TemplateLibrary},
            report::{DocumentReport, RunReport},
            service::{LoadedDocument, YamlLayer},
            session::{SessionContext, SessionStore},
            validate::ValidationReport,
            Dialect,
        },
    },
    Result,
};
use anyhow::Context;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Configuration and output settings shared by every command.
struct Workspace {
    root: PathBuf,
    config: StepLineConfig,
    format: OutputFormat,
}

impl Workspace {
    fn open(global: &GlobalArgs) -> Result<Self> {
        let config = match &global.config {
            Some(path) => ConfigLoader::load(path)?,
            None => ConfigLoader::load_from_workspace(&global.workspace)?,
        };
        ConfigLoader::validate_config(&config)?;
        let format = global
            .format
            .map(OutputFormat::from)
            .unwrap_or(config.output.format);
        Ok(Self {
            root: global.workspace.clone(),
            config,
            format,
        })
    }

    fn layer(&self) -> YamlLayer {
        YamlLayer::new(self.config.detection.detector_config())
    }

    fn session_store(&self) -> SessionStore {
        SessionStore::new(self.config.session.resolve_file(&self.root))
    }

    fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{}", text);
    Ok(())
}

pub async fn detect(global: &GlobalArgs, args: DetectArgs) -> Result<Exit> {
    let workspace = Workspace::open(global)?;
    let layer = workspace.layer();
    let text = YamlLayer::read(&args.file)?;
    let detection = layer.detect(&text)?;
    let decision = detection.decide(&workspace.config.detection.detector_config());

    if workspace.is_json() {
        print_json(&json!({
            "file": args.file,
            "dialect": detection.dialect,
            "confidence": detection.confidence,
            "scores": detection.scores,
            "signals": detection.signals,
            "accepted": decision.is_ok(),
            "error": decision.as_ref().err().map(|err| err.to_string()),
        }))?;
    } else {
        println!(
            "{}: {} (confidence {:.2})",
            args.file.display(),
            detection.dialect,
            detection.confidence
        );
        let scores = detection
            .scores
            .iter()
            .map(|(dialect, score)| format!("{}={:.2}", dialect, score))
            .collect::<Vec<_>>()
            .join(" ");
        println!("  scores:  {}", scores);
        for signal in &detection.signals {
            let votes = signal
                .votes
                .iter()
                .map(|vote| format!("{}+{:.2}", vote.dialect, vote.weight))
                .collect::<Vec<_>>()
                .join(", ");
            println!("  signal:  {} ({})", signal.name, votes);
        }
        if let Err(err) = &decision {
            println!("  rejected: {}", err.message);
        }
    }

    Ok(if decision.is_ok() { Exit::Success } else { Exit::Invalid })
}

fn print_report(loaded: &LoadedDocument, report: &ValidationReport) {
    println!(
        "{} ({}): {} error(s), {} warning(s)",
        loaded.label(),
        loaded.dialect(),
        report.errors.len(),
        report.warnings.len()
    );
    for issue in report.issues() {
        println!("  {}", issue);
        if let Some(suggestion) = &issue.suggestion {
            println!("      suggestion: {}", suggestion);
        }
        if let Some(example) = &issue.example {
            for line in example.lines() {
                println!("      | {}", line);
            }
        }
    }
}

pub async fn validate(global: &GlobalArgs, args: ValidateArgs) -> Result<Exit> {
    let workspace = Workspace::open(global)?;
    let layer = workspace.layer();
    let loaded = layer.load_file(&args.file, args.dialect.map(Dialect::from))?;
    let report = layer.validate(&loaded);
    let passed = report.ok && !(args.strict && !report.warnings.is_empty());

    if workspace.is_json() {
        print_json(&json!({
            "file": args.file,
            "dialect": loaded.dialect(),
            "passed": passed,
            "report": report,
        }))?;
    } else {
        print_report(&loaded, &report);
        if passed {
            println!("valid");
        }
    }

    Ok(if passed { Exit::Success } else { Exit::Invalid })
}

fn print_program(program: &CompiledProgram) {
    println!(
        "{} ({}) digest {}",
        program.name,
        program.dialect,
        &program.digest[..program.digest.len().min(12)]
    );
    let registry = ActionRegistry::standard();
    for instruction in &program.instructions {
        let summary = match registry.get(instruction.action) {
            Some(handler) => handler.describe(&instruction.args),
            None => instruction.action.to_string(),
        };
        let mut line = format!(
            "  {}#{:<3} {}",
            instruction.checkpoint, instruction.position, summary
        );
        if !instruction.control.is_empty() {
            line.push_str(" [conditional]");
        }
        if let Some(name) = &instruction.captures {
            line.push_str(&format!(" -> {}", name));
        }
        println!("{}", line.trim_end());
    }
}

pub async fn compile(global: &GlobalArgs, args: CompileArgs) -> Result<Exit> {
    let workspace = Workspace::open(global)?;
    let layer = workspace.layer();
    let loaded = layer.load_file(&args.file, args.dialect.map(Dialect::from))?;

    let mut ctx = CompileContext::default();
    if let Some(target) = &args.target_checkpoint {
        ctx = ctx.with_target_checkpoint(target.clone());
    }
    if args.from_session {
        let session = workspace.session_store().load()?;
        ctx = ctx.with_session(session.current_checkpoint_id, session.next_position);
    }
    let program = layer.compile(&loaded, &ctx)?;

    if workspace.is_json() {
        print_json(&program)?;
    } else {
        print_program(&program);
    }
    Ok(Exit::Success)
}

fn print_execution(label: &str, report: &ExecutionReport) {
    println!("{}", label);
    for result in &report.results {
        let detail = match &result.outcome {
            StepOutcome::Succeeded { step_id } => format!("step {}", step_id),
            StepOutcome::SucceededNoIdentifier => "no step id returned".to_string(),
            StepOutcome::Failed { error, .. } => error.clone(),
            StepOutcome::SkippedByCondition { reason } => reason.clone(),
            StepOutcome::NotAttempted => String::new(),
        };
        println!(
            "  {:<24} {}#{:<3} {:<20} {}",
            result.outcome.label(),
            result.checkpoint,
            result.position,
            result.action,
            detail
        );
    }
    let counts = &report.counts;
    println!(
        "  {} succeeded, {} without id, {} failed, {} skipped, {} not attempted{}",
        counts.succeeded,
        counts.succeeded_no_identifier,
        counts.failed,
        counts.skipped,
        counts.not_attempted,
        if report.interrupted { " (interrupted)" } else { "" }
    );
}

fn print_dry_run(label: &str, client: &DryRunClient) -> Result<()> {
    println!("{} (dry run)", label);
    for request in client.requests() {
        let payload = serde_json::to_string(&request.payload).context("failed to serialize payload")?;
        println!("  {}#{:<3} {}", request.checkpoint_id, request.position, payload);
    }
    Ok(())
}

/// Documents whose checkpoints overlap; they run in order and share positions.
#[derive(Debug)]
struct Lane {
    documents: Vec<usize>,
    targets: BTreeSet<String>,
}

fn plan_lanes(programs: &[(PathBuf, CompiledProgram)], session_checkpoint: Option<&str>) -> Vec<Lane> {
    let mut lanes: Vec<Lane> = Vec::new();
    for (index, (_, program)) in programs.iter().enumerate() {
        let targets = program
            .instructions
            .iter()
            .map(|instruction| match (&instruction.checkpoint, session_checkpoint) {
                (CheckpointRef::Session, Some(id)) => id.to_string(),
                (checkpoint, _) => checkpoint.to_string(),
            })
            .collect();
        let mut lane = Lane {
            documents: vec![index],
            targets,
        };
        let (overlapping, rest): (Vec<Lane>, Vec<Lane>) = lanes
            .into_iter()
            .partition(|other| !other.targets.is_disjoint(&lane.targets));
        lanes = rest;
        for other in overlapping {
            lane.documents.extend(other.documents);
            lane.targets.extend(other.targets);
        }
        lane.documents.sort_unstable();
        lanes.push(lane);
    }
    lanes.sort_by_key(|lane| lane.documents[0]);
    lanes
}

pub async fn run(global: &GlobalArgs, args: RunArgs) -> Result<Exit> {
    let workspace = Workspace::open(global)?;
    let layer = workspace.layer();
    let store = workspace.session_store();
    let mut session = store.load()?;
    if !workspace.config.session.auto_increment {
        session.auto_increment_enabled = false;
    }

    let checkpoint_override = args
        .checkpoint
        .clone()
        .or_else(|| workspace.config.session.checkpoint_override.clone());
    let ctx = match &checkpoint_override {
        Some(id) => {
            let start = if session.current_checkpoint_id.as_deref() == Some(id.as_str()) {
                session.next_position
            } else {
                1
            };
            CompileContext::default().with_session(Some(id.clone()), start)
        }
        None => CompileContext::default()
            .with_session(session.current_checkpoint_id.clone(), session.next_position),
    };
    if let Some(id) = &checkpoint_override {
        session.current_checkpoint_id = Some(id.clone());
    }

    let files = expand_patterns(&args.files)?;
    let mut programs = Vec::with_capacity(files.len());
    for file in &files {
        let loaded = layer.load_file(file, args.dialect.map(Dialect::from))?;
        programs.push((file.clone(), layer.compile(&loaded, &ctx)?));
    }

    let dry_run = args.dry_run.then(|| Arc::new(DryRunClient::new()));
    let client: Arc<dyn StepApiClient> = match &dry_run {
        Some(client) => client.clone() as Arc<dyn StepApiClient>,
        None => Arc::new(HttpStepClient::new(
            &workspace.config.api.base_url,
            workspace.config.api.token.clone(),
            workspace.config.api.timeout(),
        )?),
    };

    let (cancel_tx, cancel_rx) = cancellation();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping after the current step");
            let _ = cancel_tx.send(true);
        }
    });

    let session_checkpoint = session.current_checkpoint_id.clone();
    let lanes = plan_lanes(&programs, session_checkpoint.as_deref());
    // Only the lane appending to the session checkpoint writes the session file.
    let persist_lane = if args.dry_run {
        None
    } else if lanes.len() == 1 {
        Some(0)
    } else {
        lanes.iter().position(|lane| {
            lane.targets.contains(&CheckpointRef::Session.to_string())
                || session_checkpoint
                    .as_ref()
                    .map(|id| lane.targets.contains(id))
                    .unwrap_or(false)
        })
    };
    tracing::info!(documents = programs.len(), lanes = lanes.len(), "run planned");

    let programs = &programs;
    let continue_on_error = args.continue_on_error;
    let runs = lanes.iter().enumerate().map(|(lane_index, lane)| {
        let client = client.clone();
        let cancel = cancel_rx.clone();
        let retry = workspace.config.retry.clone();
        let store = (persist_lane == Some(lane_index)).then(|| store.clone());
        let overridden = checkpoint_override.is_some();
        let mut session: SessionContext = session.clone();
        async move {
            let mut positions: BTreeMap<String, u32> = BTreeMap::new();
            let mut reports = Vec::with_capacity(lane.documents.len());
            for &index in &lane.documents {
                let (file, program) = &programs[index];
                let mut executor = Executor::new(client.clone())
                    .with_options(ExecutorOptions {
                        retry: retry.clone(),
                        continue_on_error: continue_on_error || program.continue_on_error,
                        checkpoint_override: overridden,
                    })
                    .with_cancellation(cancel.clone())
                    .with_start_positions(positions.clone());
                if let Some(store) = &store {
                    executor = executor.with_store(store.clone());
                }
                tracing::info!(file = %file.display(), lane = lane_index, instructions = program.instructions.len(), "run started");
                let report = executor.run(&program.instructions, &mut session).await;
                positions.extend(report.next_positions.clone());
                reports.push((index, report));
            }
            reports
        }
    });
    let mut reports: Vec<(usize, ExecutionReport)> = futures::future::join_all(runs)
        .await
        .into_iter()
        .flatten()
        .collect();
    reports.sort_by_key(|(index, _)| *index);
    watcher.abort();

    let exit = if reports.iter().all(|(_, report)| report.is_success()) {
        Exit::Success
    } else {
        Exit::Failure
    };

    let report_file = match args.report {
        Some(format) => {
            let documents = reports
                .iter()
                .map(|(index, report)| {
                    let (file, program) = &programs[*index];
                    DocumentReport::from_execution(file, &program.name, report)
                })
                .collect();
            Some(RunReport::new(documents).write(format.into(), &workspace.root)?)
        }
        None => None,
    };

    if workspace.is_json() {
        let documents: Vec<_> = reports
            .iter()
            .map(|(index, report)| json!({"file": programs[*index].0, "report": report}))
            .collect();
        let requests = dry_run.as_ref().map(|client| client.requests());
        print_json(&json!({
            "dry_run": args.dry_run,
            "documents": documents,
            "requests": requests,
            "report_file": report_file,
        }))?;
    } else {
        if let Some(client) = &dry_run {
            print_dry_run(&display_files(&files), client)?;
        }
        for (index, report) in &reports {
            print_execution(&programs[*index].0.display().to_string(), report);
        }
        if let Some(path) = &report_file {
            println!("report saved to {}", path.display());
        }
    }
    Ok(exit)
}

fn display_files(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|file| file.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub async fn convert(global: &GlobalArgs, args: ConvertArgs) -> Result<Exit> {
    let workspace = Workspace::open(global)?;
    let layer = workspace.layer();
    let loaded = layer.load_file(&args.from, args.dialect.map(Dialect::from))?;
    let conversion = layer.convert(&loaded, args.to_format.into())?;

    if let Some(output) = &args.output {
        write_output(output, &conversion.yaml)?;
    }

    if workspace.is_json() {
        print_json(&conversion)?;
    } else {
        if args.output.is_none() {
            print!("{}", conversion.yaml);
        } else if let Some(output) = &args.output {
            println!(
                "converted {} ({}) -> {} ({})",
                args.from.display(),
                conversion.from,
                output.display(),
                conversion.dialect
            );
        }
        for warning in &conversion.warnings {
            eprintln!("warning: {}", warning);
        }
    }
    Ok(Exit::Success)
}

pub async fn generate(global: &GlobalArgs, args: GenerateArgs) -> Result<Exit> {
    let workspace = Workspace::open(global)?;
    let library = TemplateLibrary::with_workspace(&workspace.root)?;
    let generated = generation::generate(&library, &args.prompt, args.template.as_deref())?;
    let layer = workspace.layer();
    let loaded = layer.load(&generated.yaml, Some(Dialect::Compact))?;
    let report = layer.validate(&loaded);
    let passed = report.ok && !(args.strict && !report.warnings.is_empty());

    if passed {
        if let Some(output) = &args.output {
            write_output(output, &generated.yaml)?;
        }
    }

    if workspace.is_json() {
        print_json(&json!({
            "template": generated.template,
            "passed": passed,
            "yaml": generated.yaml,
            "report": report,
            "suggestions": generated.suggestions,
        }))?;
    } else {
        match &generated.template {
            Some(name) => eprintln!("using template: {}", name),
            None => eprintln!("no template matched; writing a skeleton"),
        }
        if !passed {
            print_report(&loaded, &report);
        } else if let Some(output) = &args.output {
            println!("generated {}", output.display());
        } else {
            print!("{}", generated.yaml);
        }
        if !generated.suggestions.is_empty() {
            eprintln!("suggestions:");
            for suggestion in &generated.suggestions {
                eprintln!("  - {}", suggestion);
            }
        }
    }

    Ok(if passed { Exit::Success } else { Exit::Invalid })
}

fn write_output(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

pub async fn session(global: &GlobalArgs, command: SessionCommand) -> Result<Exit> {
    let workspace = Workspace::open(global)?;
    let store = workspace.session_store();
    let session = match command {
        SessionCommand::Show => store.load()?,
        SessionCommand::Set(args) => {
            let mut session = store.load()?;
            session.set_checkpoint(args.checkpoint, args.position);
            session.auto_increment_enabled = !args.no_auto_increment;
            store.save(&session)?;
            session
        }
        SessionCommand::Reset => store.reset()?,
    };

    if workspace.is_json() {
        print_json(&session)?;
    } else {
        println!("session file:   {}", store.path().display());
        println!(
            "checkpoint:     {}",
            session.current_checkpoint_id.as_deref().unwrap_or("(not set)")
        );
        println!("next position:  {}", session.next_position);
        println!(
            "auto increment: {}",
            if session.auto_increment_enabled { "on" } else { "off" }
        );
        for (name, value) in &session.variable_bindings {
            println!("  {} = {}", name, value);
        }
    }
    Ok(Exit::Success)
}
