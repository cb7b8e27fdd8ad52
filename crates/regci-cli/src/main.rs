//! regci - Regression CI pipeline graph compiler
//!
//! ## Commands
//!
//! - `compile`: validate a topology and summarise its job graph
//! - `resolve`: list the jobs an action selects
//! - `render`: print the staged execution contracts for an action
//! - `actions`: list every action token the topology accepts
//! - `graph`: export the job graph as Graphviz DOT
//! - `run`: execute the resolved pipeline locally

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{error, info, Level};

use regci_core::{
    compile, emit_pipeline, resolve_trigger, sequence, telemetry, to_dot, to_json,
    ActionCatalog, DryRunRunner, JobGraph, JobRunner, PipelineExecutor, PipelinePlan, RegciError,
    ShellRunner, Topology, TopologyConfig, Trigger,
};

/// Exit code for a pipeline run in which some job did not succeed.
const EXIT_RUN_FAILED: u8 = 8;

#[derive(Parser)]
#[command(name = "regci")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Regression CI pipeline graph compiler", long_about = None)]
struct Cli {
    /// Topology document (JSON)
    #[arg(short, long, global = true, env = "REGCI_CONFIG", default_value = "regci.json")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the topology and print a summary of the job graph
    Compile {
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Print the job ids an action selects
    Resolve {
        #[command(flatten)]
        trigger: TriggerArgs,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Print the ordered stages and execution contracts as JSON
    Render {
        #[command(flatten)]
        trigger: TriggerArgs,
    },

    /// List every action token the topology accepts
    Actions {
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Export the job graph as Graphviz DOT
    Graph,

    /// Execute the resolved pipeline locally
    Run {
        #[command(flatten)]
        trigger: TriggerArgs,

        /// Log jobs instead of running their scripts
        #[arg(long)]
        dry_run: bool,

        /// Directory scripts run in
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
    },
}

#[derive(Args)]
struct TriggerArgs {
    /// Action token, e.g. `deploy` or `test-myrte-mytest`
    #[arg(short, long, env = "ACTION")]
    action: Option<String>,

    /// Whether the pipeline was triggered (1/true/yes/on or 0/false/no/off)
    #[arg(long, env = "REGCI_TRIGGERED")]
    triggered: Option<String>,
}

impl TriggerArgs {
    fn to_trigger(&self) -> Result<Trigger> {
        Ok(Trigger::from_values(
            self.action.as_deref(),
            self.triggered.as_deref(),
        )?)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_tracing(cli.json, level);

    match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %format!("{err:#}"), "regci failed");
            eprintln!("Error: {err:#}");
            let code = err
                .downcast_ref::<RegciError>()
                .map(RegciError::exit_code)
                .unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let graph = load_graph(&cli.config)?;

    match cli.command {
        Commands::Compile { format } => cmd_compile(&graph, format)?,
        Commands::Resolve { trigger, format } => cmd_resolve(&graph, &trigger, format)?,
        Commands::Render { trigger } => print_json(&render(&graph, &trigger)?)?,
        Commands::Actions { format } => cmd_actions(&graph, format)?,
        Commands::Graph => print!("{}", to_dot(&graph)),
        Commands::Run {
            trigger,
            dry_run,
            workdir,
        } => return cmd_run(&graph, &trigger, dry_run, &workdir).await,
    }
    Ok(ExitCode::SUCCESS)
}

fn load_graph(path: &Path) -> Result<JobGraph> {
    let config = TopologyConfig::load_from_path(path)
        .with_context(|| format!("Failed to load topology from {}", path.display()))?;
    let topology = Topology::load(&config).context("Invalid topology")?;
    let graph = compile(&topology).context("Failed to compile job graph")?;
    Ok(graph)
}

fn render(graph: &JobGraph, trigger: &TriggerArgs) -> Result<PipelinePlan> {
    let selection = resolve_trigger(graph, &trigger.to_trigger()?)?;
    let pipeline = sequence(graph, &selection)?;
    Ok(emit_pipeline(graph, &pipeline)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_compile(graph: &JobGraph, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", to_json(graph)?),
        Format::Text => {
            println!("module:  {}", graph.topology().module());
            println!("nodes:   {}", graph.topology().nodes().len());
            println!("jobs:    {}", graph.job_count());
            println!("edges:   {}", graph.edge_count());
            println!("digest:  {}", graph.digest());
        }
    }
    Ok(())
}

fn cmd_resolve(graph: &JobGraph, trigger: &TriggerArgs, format: Format) -> Result<()> {
    let selection = resolve_trigger(graph, &trigger.to_trigger()?)?;
    match format {
        Format::Json => print_json(&selection)?,
        Format::Text => {
            for job in &selection.jobs {
                println!("{job}");
            }
        }
    }
    Ok(())
}

fn cmd_actions(graph: &JobGraph, format: Format) -> Result<()> {
    let catalog = ActionCatalog::build(graph);
    match format {
        Format::Json => print_json(&catalog)?,
        Format::Text => {
            for token in catalog.tokens() {
                println!("{token}");
            }
        }
    }
    Ok(())
}

async fn cmd_run(
    graph: &JobGraph,
    trigger: &TriggerArgs,
    dry_run: bool,
    workdir: &Path,
) -> Result<ExitCode> {
    let plan = render(graph, trigger)?;
    let runner: Arc<dyn JobRunner> = if dry_run {
        Arc::new(DryRunRunner)
    } else {
        Arc::new(ShellRunner::new(workdir))
    };

    let executor = PipelineExecutor::new(runner);
    let cancel = executor.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let report = executor.execute(&plan).await?;

    println!("Run {} ({})", report.run_id, report.action);
    for job in &report.jobs {
        println!(
            "  [{}] {} {} (attempts: {})",
            job.stage, job.state, job.job_id, job.attempts
        );
    }
    println!(
        "{} passed, {} failed, {} total",
        report.passed(),
        report.failed(),
        report.jobs.len()
    );

    if report.success {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_RUN_FAILED))
    }
}
