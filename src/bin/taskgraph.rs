//! `taskgraph` CLI: reads a JSON workflow description, schedules it against
//! the async or dummy in-process backend (§6), and prints a tabular summary.
//! The Slurm backend has no serializable-body story for the JSON job
//! surface yet, so it's reachable from the library API only.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Deserialize;

use taskgraph::backend::{self, Backend as EngineBackend, ScheduleOptions};
use taskgraph::config::ConfigLoader;
use taskgraph::engine::CancelToken;
use taskgraph::error::ErrorContext;
use taskgraph::model::{EdgeStatus, Executable, Job, JobId, Join, Predicate, Resources};
use taskgraph::sink::{EventSink, FanOutSink, TracingSink};
use taskgraph::workdir::{JsonlFileSink, RunDir};
use taskgraph::{GraphBuilder, WorkflowError};

#[derive(Parser)]
#[command(name = "taskgraph")]
#[command(about = "DAG job scheduler with local async and dummy backends")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file; TASKGRAPH_* env vars still override it.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow description without running it.
    Validate {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Run a workflow description to quiescence.
    Run {
        #[arg(short, long)]
        file: PathBuf,
        /// Job(s) to schedule; defaults to every job in the description.
        #[arg(short, long)]
        target: Vec<String>,
        #[arg(long, value_enum, default_value_t = CliBackend::Async)]
        backend: CliBackend,
        /// Defaults to `engine.prune` from config (env `TASKGRAPH_PRUNE`) when not given.
        #[arg(long)]
        prune: Option<bool>,
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CliBackend {
    Async,
    Dummy,
}

#[derive(Debug, Deserialize)]
struct WorkflowDescription {
    jobs: Vec<JobDescription>,
}

#[derive(Debug, Deserialize)]
struct JobDescription {
    id: String,
    #[serde(default)]
    name: Option<String>,
    /// Shell command argv; run via `Command::new(argv[0]).args(&argv[1..])`.
    command: Vec<String>,
    #[serde(default)]
    array_size: Option<usize>,
    #[serde(default)]
    array_throttle: Option<usize>,
    #[serde(default)]
    resources: Resources,
    #[serde(default)]
    depends_on: Vec<DependencyDescription>,
    #[serde(default)]
    join: JoinDescription,
    #[serde(default)]
    preconditions: Vec<PredicateDescription>,
    #[serde(default)]
    postconditions: Vec<PredicateDescription>,
    #[serde(default)]
    skipped: bool,
}

#[derive(Debug, Deserialize)]
struct DependencyDescription {
    job: String,
    #[serde(default = "default_status")]
    status: StatusDescription,
}

fn default_status() -> StatusDescription {
    StatusDescription::Success
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum StatusDescription {
    Success,
    Failure,
    Any,
}

impl From<StatusDescription> for EdgeStatus {
    fn from(value: StatusDescription) -> Self {
        match value {
            StatusDescription::Success => EdgeStatus::Success,
            StatusDescription::Failure => EdgeStatus::Failure,
            StatusDescription::Any => EdgeStatus::Any,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
enum JoinDescription {
    #[default]
    All,
    Any,
}

impl From<JoinDescription> for Join {
    fn from(value: JoinDescription) -> Self {
        match value {
            JoinDescription::All => Join::All,
            JoinDescription::Any => Join::Any,
        }
    }
}

/// A small predicate DSL for the JSON surface; arbitrary closures are a
/// programmatic-API-only concept (§6 "Builder API (conceptual)").
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum PredicateDescription {
    Always { value: bool },
    FileExists { path: String },
}

fn build_predicate(desc: &PredicateDescription) -> Predicate {
    match desc {
        PredicateDescription::Always { value } => {
            let value = *value;
            Predicate::scalar(move || value)
        }
        PredicateDescription::FileExists { path } => {
            let path = path.clone();
            Predicate::scalar(move || std::path::Path::new(&path).exists())
        }
    }
}

fn shell_body(argv: Vec<String>) -> Arc<dyn Executable> {
    Arc::new(move |index: Option<usize>| -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if argv.is_empty() {
            return Err("empty command".into());
        }
        let mut command = std::process::Command::new(&argv[0]);
        command.args(&argv[1..]);
        if let Some(i) = index {
            command.env("TASKGRAPH_ARRAY_INDEX", i.to_string());
        }
        let status = command.status()?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("command exited with {status}").into())
        }
    })
}

fn load_workflow(path: &PathBuf) -> anyhow::Result<taskgraph::Workflow> {
    let content = std::fs::read_to_string(path)
        .map_err(WorkflowError::from)
        .with_context(|| format!("reading workflow description {}", path.display()))?;
    let description: WorkflowDescription = serde_json::from_str(&content)
        .map_err(WorkflowError::from)
        .context("parsing workflow description as JSON")?;

    let mut builder = GraphBuilder::new();
    for job in &description.jobs {
        let record = Job {
            id: JobId::new(job.id.clone()),
            name: job.name.clone().unwrap_or_else(|| job.id.clone()),
            body: shell_body(job.command.clone()),
            array_size: job.array_size.unwrap_or(1),
            array_throttle: job.array_throttle,
            resources: job.resources.clone(),
            preconditions: job.preconditions.iter().map(build_predicate).collect(),
            postconditions: job.postconditions.iter().map(build_predicate).collect(),
            join: job.join.into(),
            skipped: job.skipped,
        };
        builder.add_job(record).context("adding job to workflow graph")?;
    }
    for job in &description.jobs {
        for dep in &job.depends_on {
            builder
                .add_edge(dep.job.clone(), job.id.clone(), dep.status.into())
                .context("adding dependency edge to workflow graph")?;
        }
    }

    let all_ids: Vec<JobId> = description.jobs.iter().map(|j| JobId::new(j.id.clone())).collect();
    builder
        .freeze(&all_ids)
        .context("freezing workflow graph")
}

fn print_summary(summary: &taskgraph::WorkflowSummary) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["job", "index", "state", "error"]);
    for report in &summary.failures {
        table.add_row(vec![
            report.job.to_string(),
            report
                .index
                .map(|i| i.to_string())
                .unwrap_or_else(|| "-".to_string()),
            report.state.to_string(),
            report.error.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
    println!(
        "succeeded={} failed={} cancelled={} skipped={} duration={:?}",
        summary.succeeded, summary.failed, summary.cancelled, summary.skipped, summary.duration
    );
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ConfigLoader::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.logging.level))
        .init();

    match cli.command {
        Commands::Validate { file } => match load_workflow(&file) {
            Ok(workflow) => {
                println!("workflow valid: {} jobs", workflow.jobs().count());
                ExitCode::from(0)
            }
            Err(e) => {
                eprintln!("validation error: {e}");
                ExitCode::from(2)
            }
        },
        Commands::Run {
            file,
            target,
            backend,
            prune,
            work_dir,
        } => run(file, target, backend, prune, work_dir, &config),
    }
}

fn run(
    file: PathBuf,
    target: Vec<String>,
    backend: CliBackend,
    prune: Option<bool>,
    work_dir: Option<PathBuf>,
    config: &taskgraph::config::AppConfig,
) -> ExitCode {
    let prune = prune.unwrap_or(config.engine.prune);
    let mut workflow = match load_workflow(&file) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("validation error: {e}");
            return ExitCode::from(2);
        }
    };

    if !target.is_empty() {
        let targets: Vec<JobId> = target.into_iter().map(JobId::new).collect();
        workflow = match reconstruct_with_targets(workflow, &targets) {
            Ok(w) => w,
            Err(e) => {
                eprintln!("validation error: {e}");
                return ExitCode::from(2);
            }
        };
    }

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            eprintln!("warning: failed to install signal handler: {e}");
        }
    }

    let work_dir = work_dir.unwrap_or_else(|| PathBuf::from(&config.persistence.work_dir));
    let run_dir = match RunDir::create_unique(&work_dir) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("persistence error: {e}");
            return ExitCode::from(2);
        }
    };
    let jsonl_sink: Arc<dyn EventSink> = match JsonlFileSink::create(&run_dir) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("persistence error: {e}");
            return ExitCode::from(2);
        }
    };
    let sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(TracingSink), jsonl_sink];
    let sink: Arc<dyn EventSink> = Arc::new(FanOutSink::new(sinks));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::from(2);
        }
    };

    let options = ScheduleOptions {
        backend: match backend {
            CliBackend::Async => EngineBackend::Async,
            CliBackend::Dummy => EngineBackend::Dummy,
        },
        prune,
        parallelism: config.engine.parallelism,
        name: None,
    };

    let workflow = match backend {
        CliBackend::Dummy => backend::with_dummy_bodies(workflow),
        CliBackend::Async => workflow,
    };

    let summary = runtime.block_on(backend::schedule_local(&workflow, &options, sink, cancel.clone()));

    match summary {
        Ok(summary) => {
            print_summary(&summary);
            if cancel.is_cancelled() {
                ExitCode::from(3)
            } else {
                ExitCode::from(summary.exit_code() as u8)
            }
        }
        Err(e) => {
            eprintln!("scheduling error: {e}");
            ExitCode::from(2)
        }
    }
}

fn reconstruct_with_targets(
    workflow: taskgraph::Workflow,
    targets: &[JobId],
) -> Result<taskgraph::Workflow, WorkflowError> {
    let mut builder = GraphBuilder::new();
    for job in workflow.jobs() {
        builder.add_job(job.clone())?;
    }
    for edge in workflow.edges() {
        builder.add_edge(edge.from.clone(), edge.to.clone(), edge.status)?;
    }
    builder.freeze(targets)
}
