mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use batchflow_batch::{BatchService, BatchWatcher, CancellationSignal, SqliteBatchStore, WatchUpdate};
use batchflow_core::config::AppConfig;
use batchflow_core::traits::CancelFlagStore;
use batchflow_flow::{validate_for_batch, FlowDefinition};

#[derive(Parser)]
#[command(name = "batchflow", version, about = "Run curation flows over many documents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "batchflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a flow file can run in batch mode
    Validate {
        /// Flow definition (.toml or .json)
        flow: PathBuf,
    },
    /// Create a batch job for a flow and a list of documents
    Create {
        /// Owner of the batch; must own the flow
        #[arg(long)]
        owner: String,
        /// Flow definition (.toml or .json)
        #[arg(long)]
        flow: PathBuf,
        /// Document ids, processed in the given order
        #[arg(required = true)]
        documents: Vec<String>,
    },
    /// Show progress of a batch job
    Status {
        batch_id: String,
        /// Also list every document task
        #[arg(long)]
        tasks: bool,
    },
    /// List batch jobs of an owner
    List {
        #[arg(long)]
        owner: String,
    },
    /// Cancel a pending or running batch job
    Cancel { batch_id: String },
    /// Follow a batch job until it finishes
    Watch { batch_id: String },
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("batchflow=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    // Needs no database
    if let Commands::Validate { flow } = &cli.command {
        return validate(flow, &config);
    }
    if let Commands::Config = &cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let store = Arc::new(SqliteBatchStore::open(&config.database_path())?);
    let purged = store.purge_expired().await?;
    debug!(purged, "Expired cancel flags removed");

    let cancel = Arc::new(CancellationSignal::new(
        store.clone(),
        config.batch.cancel_ttl(),
    ));
    let service = BatchService::new(store.clone(), Arc::new(config.registry()), cancel);

    match cli.command {
        Commands::Create {
            owner,
            flow,
            documents,
        } => {
            let flow = FlowDefinition::load(&flow)?;
            let job = service.create_batch(&owner, &flow, &documents).await?;
            info!(batch_id = %job.id, "Batch job created");
            println!("{}", job.id);
        }
        Commands::Status { batch_id, tasks } => {
            let progress = service.progress(&batch_id).await?;
            println!("{}", report::progress_line(&progress));
            if tasks {
                for task in service.list_tasks(&batch_id).await? {
                    println!("{}", report::task_line(&task));
                }
            }
        }
        Commands::List { owner } => {
            let jobs = service.list_batches(&owner).await?;
            if jobs.is_empty() {
                println!("No batch jobs for {}.", owner);
            }
            for job in &jobs {
                println!("{}", report::job_line(job));
            }
        }
        Commands::Cancel { batch_id } => {
            if service.cancel(&batch_id).await? {
                println!("Cancelled {}", batch_id);
            } else {
                println!("{} has already finished", batch_id);
            }
        }
        Commands::Watch { batch_id } => {
            service.get_batch(&batch_id).await?;
            let mut watcher =
                BatchWatcher::new(store, &batch_id, config.batch.poll_interval());
            while let Some(update) = watcher.next().await? {
                match update {
                    WatchUpdate::Progress(progress) => {
                        println!("{}", report::progress_line(&progress))
                    }
                    WatchUpdate::Event(event) => println!("{}", report::event_line(&event)),
                }
            }
        }
        Commands::Validate { .. } | Commands::Config => {
            unreachable!("handled before opening the database")
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    let home_config = dirs_home().map(|h| h.join(".batchflow").join("config.toml"));
    match home_config {
        Some(p) if p.exists() => Ok(AppConfig::load(&p)?),
        _ => {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(AppConfig::default())
        }
    }
}

fn validate(path: &Path, config: &AppConfig) -> anyhow::Result<()> {
    let flow = FlowDefinition::load(path)?;
    let report = validate_for_batch(&flow, &config.registry());
    if report.valid {
        println!("{}: batch-compatible", flow.name);
    } else {
        println!("{}: not batch-compatible", flow.name);
        for issue in &report.errors {
            println!("  [{}] {}", issue.code(), issue);
        }
    }
    Ok(report.into_result()?)
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
