use crate::config::DocflowConfig;
use crate::remote::http::{HttpClient, HttpGateService, HttpPhaseInvokers, ProcessKind, RenameInvoker};
use crate::remote::GateService;
use crate::render::{self, ConsoleObserver};
use crate::runner::Canceller;
use crate::selection::collect_entries;
use crate::state::WorkflowPhase;
use crate::state_machine::StateSnapshot;
use crate::structured_logger::StructuredLogger;
use crate::workflow::{run_single_pass, BatchWorkflow, WorkflowOptions, WorkflowServices};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const LONG_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("DOCFLOW_GIT_SHA"), ")");

#[derive(Parser)]
#[command(name = "docflow")]
#[command(about = "Push a folder of documents through a remote processing service")]
#[command(version, long_version = LONG_VERSION)]
pub struct Cli {
    /// YAML config file (defaults to the built-in docflow.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override api.base_url from the config
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the selection tree of a directory
    Tree { dir: PathBuf },

    /// Rename every document from the code printed on it
    Rename {
        #[arg(long, value_enum)]
        kind: ProcessKind,
        dir: PathBuf,
    },

    /// Upload for OCR, then generate 2-layer PDFs
    TwoLayer {
        dir: PathBuf,
        /// Skip waiting for the server-side OCR stage
        #[arg(long)]
        ungated: bool,
    },
}

/// Runs one command. `Ok(false)` means some item failed or the run was cut short.
pub async fn run(cli: Cli) -> Result<bool> {
    let config = match &cli.config {
        Some(path) => DocflowConfig::load(path)?,
        None => DocflowConfig::default_config(),
    }
    .with_base_url(cli.base_url.clone())?;

    match cli.command {
        Command::Tree { dir } => {
            let entries = collect_entries(&dir, config.selection.skip_hidden)?;
            print!("{}", render::format_selection(&entries));
            Ok(true)
        }
        Command::Rename { kind, dir } => run_rename(&config, kind, &dir).await,
        Command::TwoLayer { dir, ungated } => run_two_layer(&config, &dir, ungated).await,
    }
}

fn open_logger(config: &DocflowConfig) -> Option<Arc<StructuredLogger>> {
    let logs_dir = config.logging.resolve_logs_dir()?;
    let session_id = uuid::Uuid::new_v4().to_string();
    match StructuredLogger::new(&session_id, &logs_dir) {
        Ok(logger) => {
            info!(
                session_id = logger.session_id(),
                path = %logger.log_path().display(),
                "structured log opened"
            );
            Some(Arc::new(logger))
        }
        Err(e) => {
            warn!(dir = %logs_dir.display(), error = %e, "structured logging disabled");
            None
        }
    }
}

fn options(config: &DocflowConfig) -> WorkflowOptions {
    WorkflowOptions {
        poll_interval: config.poll_interval(),
        item_timeout: config.item_timeout(),
        observer: Arc::new(ConsoleObserver::stdout()),
        logger: open_logger(config),
    }
}

/// Cancels on Ctrl-C until the returned task is aborted.
fn cancel_on_interrupt(canceller: Canceller) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            canceller.cancel();
        }
    })
}

/// Prints a line whenever the workflow changes phase or gains a job.
fn print_phases(mut snapshots: watch::Receiver<StateSnapshot>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = String::new();
        while snapshots.changed().await.is_ok() {
            let line = render::format_phase(&snapshots.borrow_and_update());
            if line != last {
                println!("{}", line);
                last = line;
            }
        }
    })
}

async fn run_rename(config: &DocflowConfig, kind: ProcessKind, dir: &Path) -> Result<bool> {
    let entries = collect_entries(dir, config.selection.skip_hidden)?;
    print!("{}", render::format_selection(&entries));

    let client = Arc::new(HttpClient::new(&config.api));
    let invoker = Arc::new(RenameInvoker::new(client, kind, &config.api.routes));
    let canceller = Canceller::new();
    let interrupt = cancel_on_interrupt(canceller.clone());

    let pass = run_single_pass(&entries, invoker, &options(config), &canceller).await;
    interrupt.abort();
    let pass = pass?;

    println!("{}", render::format_summary("rename", &pass.ledger));
    if pass.report.cancelled {
        println!("Cancelled");
    }
    Ok(pass.ledger.error_count() == 0 && !pass.report.cancelled)
}

async fn run_two_layer(config: &DocflowConfig, dir: &Path, ungated: bool) -> Result<bool> {
    let entries = collect_entries(dir, config.selection.skip_hidden)?;

    let client = Arc::new(HttpClient::new(&config.api));
    let gate = (!ungated).then(|| {
        Arc::new(HttpGateService::new(client.clone(), config.api.routes.clone())) as Arc<dyn GateService>
    });
    let services = WorkflowServices {
        invokers: Arc::new(HttpPhaseInvokers::new(client, config.api.routes.clone())),
        gate,
    };

    let mut workflow = BatchWorkflow::new(services, options(config));
    print!("{}", render::format_selection(&entries));
    workflow.select(entries)?;

    let canceller = workflow.canceller();
    let interrupt = cancel_on_interrupt(canceller.clone());
    let phases = print_phases(workflow.subscribe());
    let report = workflow.run_to_completion().await;
    interrupt.abort();
    phases.abort();
    let report = report?;

    println!("{}", render::format_workflow_progress(&workflow.progress()));
    println!("{}", render::format_summary("phase 1", workflow.phase1_ledger()));
    if report.phase2.is_some() {
        println!("{}", render::format_summary("phase 2", workflow.phase2_ledger()));
    }
    if let Some(reason) = &report.refused {
        println!("Stopped in {}: {}", report.final_phase, reason);
    }

    if canceller.is_cancelled() {
        workflow.reset()?;
        println!("Cancelled, workflow reset");
        return Ok(false);
    }
    Ok(report.final_phase == WorkflowPhase::Complete && report.failed_items() == 0)
}
