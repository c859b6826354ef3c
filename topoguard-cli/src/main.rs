//! TopoGuard CLI - netlist verification and feedback trials from the command line.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use topoguard::ai::{Generator, OpenAiCompatibleClient, ReplayGenerator};
use topoguard::trial::{regenerate, render_markdown, BatchSummary};
use topoguard::{
    BatchConfig, FeedbackMode, ReferenceLibrary, TopoGuardCore, TrialOrchestrator, VerificationReport,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "topoguard-cli")]
#[command(about = "Topology verification and feedback trials for generated circuit netlists", long_about = None)]
#[command(version)]
struct Cli {
    /// Debug logging (RUST_LOG overrides); more detail for `tasks`
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch of feedback trials
    Run(RunArgs),

    /// Verify one generator output against a task
    Verify {
        /// File with the generator output (prose plus a netlist code block, or a bare netlist)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Task id or number
        #[arg(short, long)]
        task: String,

        /// Feedback strength for the printed feedback
        #[arg(short, long, default_value = "full")]
        mode: FeedbackMode,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,

        /// Extra task library directory
        #[arg(long, value_name = "DIR")]
        library: Option<PathBuf>,
    },

    /// List benchmark tasks
    Tasks {
        /// Extra task library directory
        #[arg(long, value_name = "DIR")]
        library: Option<PathBuf>,
    },

    /// Rebuild results.md and results.json from a trials.jsonl file
    Report {
        #[arg(value_name = "TRIALS_JSONL")]
        trials: PathBuf,

        /// k for pass@k
        #[arg(short, long, default_value_t = 5)]
        k: u32,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Batch configuration (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Task range or list: "1-16", "1:16", "5,VDIV_BUS_SENSE"
    #[arg(long)]
    tasks: Option<String>,

    /// Feedback modes, comma separated
    #[arg(long, value_delimiter = ',')]
    modes: Option<Vec<FeedbackMode>>,

    /// Trials per task and mode
    #[arg(long)]
    trials: Option<u32>,

    /// Topology attempts per trial
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Parallel workers
    #[arg(long)]
    parallel: Option<usize>,

    /// Output directory
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Serve recorded outputs from DIR instead of calling a model
    #[arg(long, value_name = "DIR")]
    replay: Option<PathBuf>,

    /// Extra task library directory
    #[arg(long, value_name = "DIR")]
    library: Option<PathBuf>,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match cli.command {
        Commands::Run(args) => handle_run(args),
        Commands::Verify {
            file,
            task,
            mode,
            format,
            library,
        } => handle_verify(&file, &task, mode, format, library.as_deref()),
        Commands::Tasks { library } => handle_tasks(library.as_deref(), cli.verbose),
        Commands::Report { trials, k } => handle_report(&trials, k),
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_library(dir: Option<&Path>) -> anyhow::Result<ReferenceLibrary> {
    let library = match dir {
        Some(dir) => ReferenceLibrary::builtin_with_dir(dir)
            .with_context(|| format!("loading task library from {}", dir.display()))?,
        None => ReferenceLibrary::builtin()?,
    };
    for (task, reason) in library.invalid_tasks() {
        tracing::warn!("Task {} is misconfigured: {}", task, reason);
    }
    Ok(library)
}

fn handle_run(args: RunArgs) -> i32 {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };
    match runtime.block_on(run_batch(args)) {
        Ok(summary) => {
            print_batch_summary(&summary);
            0
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    }
}

async fn run_batch(args: RunArgs) -> anyhow::Result<BatchSummary> {
    let mut config = match &args.config {
        Some(path) => BatchConfig::load(path).with_context(|| format!("reading {}", path.display()))?,
        None => BatchConfig::default(),
    };
    if let Some(tasks) = args.tasks {
        config.tasks = tasks;
    }
    if let Some(modes) = args.modes {
        config.feedback_modes = modes;
    }
    if let Some(trials) = args.trials {
        config.trials_per_task = trials;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(parallel) = args.parallel {
        config.parallelism = parallel;
    }
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    if args.library.is_some() {
        config.library_dir = args.library;
    }
    config.validate()?;

    let library = Arc::new(load_library(config.library_dir.as_deref())?);
    let generator: Arc<dyn Generator> = match &args.replay {
        Some(dir) => Arc::new(ReplayGenerator::from_dir(dir)?),
        None => {
            let client = OpenAiCompatibleClient::from_config(&config.generator)?;
            tracing::info!("Using model {} at {}", client.model(), config.generator.base_url);
            Arc::new(client)
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; finishing in-flight trials");
            let _ = shutdown_tx.send(true);
        }
    });

    let summary = TrialOrchestrator::new(library, generator, config)
        .with_shutdown(shutdown_rx)
        .with_progress(true)
        .run()
        .await?;
    Ok(summary)
}

fn print_batch_summary(summary: &BatchSummary) {
    let stats = &summary.stats;
    println!("\nResults: {}", summary.output_dir.display());
    println!("{}", "─".repeat(60));
    println!(
        "  {} trial(s): {} passed, {} failed, {} errored",
        stats.total_trials, stats.passes, stats.failures, stats.errors
    );
    if summary.skipped > 0 {
        println!("  {} trial(s) not started (interrupted)", summary.skipped);
    }
    println!();
    for mode in &stats.per_mode {
        let delta = stats
            .mode_deltas
            .iter()
            .find(|d| d.mode == mode.mode)
            .and_then(|d| d.delta_vs_none)
            .map(|d| format!("  ({:+.1} pp vs none)", d * 100.0))
            .unwrap_or_default();
        println!(
            "  {:<5} pass@1 {:>5.1}%  pass@{} {:>5.1}%{}",
            mode.mode.as_str(),
            mode.pass_at_1 * 100.0,
            stats.k,
            mode.pass_at_k * 100.0,
            delta
        );
    }
}

fn handle_verify(file: &Path, task: &str, mode: FeedbackMode, format: OutputFormat, library: Option<&Path>) -> i32 {
    let library = match load_library(library) {
        Ok(library) => library,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return 2;
        }
    };

    match TopoGuardCore::verify_file(&library, task, file, mode) {
        Ok(report) => {
            match format {
                OutputFormat::Human => output_human(file, &report),
                OutputFormat::Json => output_json(&report),
            }
            if report.pass {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            2
        }
    }
}

fn output_human(file: &Path, report: &VerificationReport) {
    println!("\nFile: {}", file.display());
    println!("Task: {}", report.task_id);
    println!("{}", "─".repeat(60));
    println!("  Verdict: {}", if report.pass { "PASS" } else { "FAIL" });

    if let Some(symmetry) = &report.verdict.matching.symmetry {
        println!("  Matched through symmetry: {}", symmetry);
    }
    if let Some(stats) = &report.stats {
        println!(
            "  Components: {}  Nets: {}  Connections: {}",
            stats.component_count, stats.net_count, stats.connection_count
        );
    }
    if !report.warnings.is_empty() {
        println!("\n  WARNINGS:");
        for w in &report.warnings {
            println!("    - {}", w);
        }
    }

    println!("\n  Feedback:");
    for line in report.feedback.lines() {
        println!("    {}", line);
    }
}

fn output_json(report: &VerificationReport) {
    let output = serde_json::json!({
        "task": report.task_id,
        "pass": report.pass,
        "violations": report.verdict.violations().collect::<Vec<_>>(),
        "symmetry": report.verdict.matching.symmetry,
        "mapping": report.verdict.matching.mapping,
        "warnings": report.warnings,
        "stats": report.stats,
        "feedback": report.feedback,
    });
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: {}", e),
    }
}

fn handle_tasks(library: Option<&Path>, verbose: bool) -> i32 {
    let library = match load_library(library) {
        Ok(library) => library,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return 2;
        }
    };

    println!("Available tasks:\n");
    for entry in library.entries() {
        let task = &entry.task;
        println!("  {:>2}  {:<24} {}", task.number, task.id, task.difficulty);
        println!(
            "      in: {}  out: {}",
            task.inputs.join(", "),
            task.outputs.join(", ")
        );
        if verbose {
            println!("      {}", task.description);
            if let Some(v) = task.voltage {
                println!("      voltage: {} V in, {} V out", v.input, v.output);
            }
            for req in &task.rules.decoupling {
                println!(
                    "      decoupling: >= {} {}(s) across {} / {}",
                    req.min_count, req.class, req.rail, req.return_net
                );
            }
            if task.rules.isolation_boundary {
                println!("      isolation barrier: checked");
            }
            for swap in &entry.reference.symmetry {
                println!("      symmetry: {}", swap.name);
            }
        }
        println!();
    }

    let invalid: Vec<_> = library.invalid_tasks().collect();
    if !invalid.is_empty() {
        println!("Misconfigured tasks:\n");
        for (task, reason) in invalid {
            println!("  {}: {}", task, reason);
        }
    }
    0
}

fn handle_report(trials: &Path, k: u32) -> i32 {
    match regenerate(trials, k) {
        Ok(stats) => {
            println!("{}", render_markdown(&stats));
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            2
        }
    }
}
