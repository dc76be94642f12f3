//! Crucible CLI
//!
//! The `crucible` command compiles a C source file, suggests and applies
//! fixes, and runs the result in a sandboxed session.
//!
//! ## Commands
//!
//! - `compile`: run the pipeline and print diagnostics
//! - `suggest`: rank fix candidates for the diagnostics
//! - `fix`: apply one or all candidates and print or write the result
//! - `run`: compile and execute, streaming session events
//! - `exec-image`: execute a serialized program (used inside external sandboxes)

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crucible_cli::Workbench;
use crucible_core::{
    init_tracing, CrucibleConfig, Diagnostic, FixCandidate, FixId, ResourceLimits, SessionState,
    METRICS,
};
use crucible_pipeline::{PipelineRun, Program};
use crucible_sandbox::{run_program, EventKind, ExitStatus, OutputSink, ProcessRunner};
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn, Level};

#[derive(Parser)]
#[command(name = "crucible")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile, fix and sandbox-run C programs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON command output
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (JSON)
    #[arg(long, global = true, env = "CRUCIBLE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file and print its diagnostics
    Compile {
        file: PathBuf,
    },

    /// Suggest fixes for a source file's diagnostics
    Suggest {
        file: PathBuf,

        /// Include leak analysis findings
        #[arg(long)]
        leaks: bool,
    },

    /// Apply suggested fixes
    Fix {
        file: PathBuf,

        /// Apply every non-conflicting fix instead of the top-ranked one
        #[arg(long, conflicts_with = "id")]
        all: bool,

        /// Apply the fix with this id
        #[arg(long)]
        id: Option<String>,

        /// Include leak analysis findings
        #[arg(long)]
        leaks: bool,

        /// Write the result back to the file instead of printing it
        #[arg(long)]
        write: bool,
    },

    /// Compile and run a source file, streaming its events
    Run {
        file: PathBuf,

        #[command(flatten)]
        limits: LimitArgs,

        /// Run through an external command instead of the built-in interpreter.
        /// `{image}`, `{memory_bytes}` and `{cpu_millis}` are substituted.
        #[arg(long, env = "CRUCIBLE_RUNNER_COMMAND")]
        runner_command: Option<String>,
    },

    /// Execute a serialized program image on the built-in interpreter
    ExecImage {
        image: PathBuf,

        #[command(flatten)]
        limits: LimitArgs,
    },
}

#[derive(clap::Args, Debug, Default)]
struct LimitArgs {
    /// Wall-clock budget in milliseconds
    #[arg(long)]
    wall_ms: Option<u64>,

    /// CPU budget in milliseconds
    #[arg(long)]
    cpu_ms: Option<u64>,

    /// Memory cap in bytes
    #[arg(long)]
    memory_bytes: Option<u64>,
}

impl LimitArgs {
    fn resolve(&self, defaults: ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            cpu_millis: self.cpu_ms.unwrap_or(defaults.cpu_millis),
            memory_bytes: self.memory_bytes.unwrap_or(defaults.memory_bytes),
            wall_clock_ms: self.wall_ms.unwrap_or(defaults.wall_clock_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    let config = CrucibleConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    debug!(?config, "configuration loaded");

    let result = match cli.command {
        Commands::Compile { file } => cmd_compile(config, &file, cli.json),
        Commands::Suggest { file, leaks } => cmd_suggest(config, &file, leaks, cli.json),
        Commands::Fix {
            file,
            all,
            id,
            leaks,
            write,
        } => cmd_fix(config, &file, all, id, leaks, write, cli.json),
        Commands::Run {
            file,
            limits,
            runner_command,
        } => cmd_run(config, &file, &limits, runner_command.as_deref(), cli.json).await,
        Commands::ExecImage { image, limits } => cmd_exec_image(config, &image, &limits),
    };
    METRICS.flush();
    let code = result?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn read_source(file: &Path) -> Result<(String, String)> {
    let text = std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    Ok((file.display().to_string(), text))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn print_diagnostic(name: &str, diag: &Diagnostic) {
    println!(
        "{}:{}:{}: {} [{}] {}",
        name, diag.location.line, diag.location.column, diag.severity, diag.code, diag.message
    );
}

#[derive(Serialize)]
struct CompileReport<'a> {
    source: &'a str,
    revision: u64,
    succeeded: bool,
    failed_stage: Option<String>,
    stages: Vec<StageReport>,
    diagnostics: Vec<&'a Diagnostic>,
}

#[derive(Serialize)]
struct StageReport {
    stage: String,
    passed: bool,
    duration_ms: u64,
}

fn report(run: &PipelineRun) -> CompileReport<'_> {
    CompileReport {
        source: &run.source_name,
        revision: run.revision,
        succeeded: run.succeeded(),
        failed_stage: run.failed_stage().map(|s| s.to_string()),
        stages: run
            .stages
            .iter()
            .map(|s| StageReport {
                stage: s.stage.to_string(),
                passed: s.passed(),
                duration_ms: s.duration_ms,
            })
            .collect(),
        diagnostics: run.diagnostics().collect(),
    }
}

fn print_run(run: &PipelineRun, json: bool) -> Result<()> {
    if json {
        return print_json(&report(run));
    }
    for diag in run.diagnostics() {
        print_diagnostic(&run.source_name, diag);
    }
    match run.failed_stage() {
        Some(stage) => println!("compilation failed at {stage} (revision {})", run.revision),
        None => println!("compiled {} (revision {})", run.source_name, run.revision),
    }
    Ok(())
}

fn cmd_compile(config: CrucibleConfig, file: &Path, json: bool) -> Result<i32> {
    let (name, text) = read_source(file)?;
    let mut bench = Workbench::new(config);
    let run = bench.compile(&name, &text);
    print_run(run, json)?;
    Ok(if run.succeeded() { 0 } else { 1 })
}

fn print_fixes(fixes: &[FixCandidate], json: bool) -> Result<()> {
    if json {
        return print_json(fixes);
    }
    if fixes.is_empty() {
        println!("No fixes suggested.");
    }
    for fix in fixes {
        println!(
            "[{:.2}] {} {} at {}:{}  ({})",
            fix.confidence, fix.diagnostic_code, fix.description, fix.anchor.line, fix.anchor.column, fix.id
        );
    }
    Ok(())
}

fn cmd_suggest(config: CrucibleConfig, file: &Path, leaks: bool, json: bool) -> Result<i32> {
    let (name, text) = read_source(file)?;
    let mut bench = Workbench::new(config);
    bench.compile(&name, &text);
    let fixes = bench.suggest(leaks)?;
    print_fixes(fixes, json)?;
    Ok(0)
}

fn cmd_fix(
    config: CrucibleConfig,
    file: &Path,
    all: bool,
    id: Option<String>,
    leaks: bool,
    write: bool,
    json: bool,
) -> Result<i32> {
    let (name, text) = read_source(file)?;
    let mut bench = Workbench::new(config);
    bench.compile(&name, &text);
    let fixes = bench.suggest(leaks)?;
    if fixes.is_empty() {
        println!("No fixes to apply.");
        return Ok(0);
    }

    if all {
        let batch = bench.apply_all()?;
        for outcome in &batch.outcomes {
            info!(fix_id = %outcome.fix_id, outcome = ?outcome.outcome, "fix outcome");
        }
        if json {
            print_json(&batch.outcomes)?;
        } else {
            eprintln!("applied {} of {} fixes", batch.applied(), batch.outcomes.len());
        }
    } else {
        let fix_id = match id {
            Some(id) => FixId(id),
            None => fixes[0].id.clone(),
        };
        bench.apply_fix(&fix_id)?;
        eprintln!("applied {fix_id}");
    }

    let (Some(source), Some(run)) = (bench.source(), bench.last_run()) else {
        bail!("no source after applying fixes");
    };
    if write {
        std::fs::write(file, source.text()).with_context(|| format!("Failed to write {}", file.display()))?;
        eprintln!("wrote revision {} to {}", source.revision(), file.display());
    } else if !json {
        print!("{}", source.text());
    }
    if !run.succeeded() {
        warn!(stage = ?run.failed_stage(), "fixed source still fails to compile");
    }
    Ok(0)
}

async fn cmd_run(
    config: CrucibleConfig,
    file: &Path,
    limits: &LimitArgs,
    runner_command: Option<&str>,
    json: bool,
) -> Result<i32> {
    let (name, text) = read_source(file)?;
    let limits = limits.resolve(config.execution.default_limits);
    let mut bench = match runner_command {
        Some(command) => {
            let argv = command.split_whitespace().map(str::to_string).collect();
            let runner = ProcessRunner::new(argv).context("Invalid runner command")?;
            Workbench::with_runner(config, Arc::new(runner))
        }
        None => Workbench::new(config),
    };

    let run = bench.compile(&name, &text);
    if !run.succeeded() {
        print_run(run, json)?;
        return Ok(1);
    }
    for diag in run.diagnostics() {
        print_diagnostic(&run.source_name, diag);
    }

    let handle = bench.run(Some(limits)).await?;
    info!(session = %handle.id(), "session started");
    let mut events = handle.subscribe();
    let mut interrupted = false;
    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                if json {
                    print_json(&event)?;
                    continue;
                }
                match event.kind {
                    EventKind::Stdout { text } => println!("{text}"),
                    EventKind::Stderr { text } => eprintln!("{text}"),
                    EventKind::MetricSample { cpu_percent, memory_bytes, elapsed_ms } => {
                        debug!(cpu_percent, memory_bytes, elapsed_ms, "sample");
                    }
                    EventKind::StateChanged { from, to } => debug!(%from, %to, "state changed"),
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                warn!(session = %handle.id(), "interrupted, stopping session");
                let manager = bench.manager().clone();
                let id = handle.id();
                tokio::spawn(async move {
                    let _ = manager.stop(id).await;
                });
            }
        }
    }

    let session = handle.wait().await;
    if json {
        print_json(&session)?;
    } else {
        let detail = match (&session.failure, session.exit_code) {
            (Some(failure), _) => format!(": {failure}"),
            (None, Some(code)) => format!(" with exit code {code}"),
            (None, None) => String::new(),
        };
        eprintln!(
            "session {} {}{} after {} ms (cpu {} ms, peak memory {} bytes)",
            session.id,
            session.state,
            detail,
            session.usage.elapsed_ms,
            session.usage.cpu_millis_used,
            session.usage.peak_memory_bytes
        );
    }
    Ok(match session.state {
        SessionState::Completed => 0,
        _ => session.exit_code.filter(|c| *c != 0).unwrap_or(1),
    })
}

/// Writes program output straight to the process's stdio.
struct StdioSink {
    stdout: std::io::Stdout,
    stderr: std::io::Stderr,
}

impl OutputSink for StdioSink {
    fn stdout(&mut self, bytes: &[u8]) {
        let mut out = self.stdout.lock();
        let _ = out.write_all(bytes);
        if bytes.contains(&b'\n') {
            let _ = out.flush();
        }
    }

    fn stderr(&mut self, bytes: &[u8]) {
        let _ = self.stderr.lock().write_all(bytes);
    }
}

fn cmd_exec_image(config: CrucibleConfig, image: &Path, limits: &LimitArgs) -> Result<i32> {
    let raw = std::fs::read_to_string(image).with_context(|| format!("Failed to read {}", image.display()))?;
    let program = Program::from_image(&raw).context("Invalid program image")?;
    let limits = limits.resolve(config.execution.default_limits);
    let mut sink = StdioSink {
        stdout: std::io::stdout(),
        stderr: std::io::stderr(),
    };
    let (status, sample) = run_program(&program, limits, &mut sink);
    let _ = sink.stdout.flush();
    debug!(?status, cpu_millis = sample.cpu_millis, peak_memory_bytes = sample.peak_memory_bytes, "image finished");
    match status {
        ExitStatus::Exited { code } => Ok(code),
        ExitStatus::LimitExceeded { resource } => {
            eprintln!("{resource} limit exceeded");
            Ok(137)
        }
        ExitStatus::Killed => Ok(137),
        ExitStatus::Fault { message } => bail!("interpreter fault: {message}"),
    }
}
