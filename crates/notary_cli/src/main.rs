//! NOTARY CLI
//!
//! Operator command line for the certification pipeline: register
//! documents, request protection, ingest provider callbacks, run the
//! evaluator, the wake loop and workers, fire legacy triggers, and inspect
//! state, dead letters and flags.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use notary_authority::{Authority, DecisionId};
use notary_core::{EntityId, Fingerprint, OwnerId, Timestamp, WorkerId};
use notary_log::{AnchorNetwork, Event, EventKind, EventSource};
use notary_queue::JobStatus;
use notary_runtime::{HttpProviders, Pipeline, PipelineConfig, Providers, SimulatedProviders};
use notary_storage::RedbStore;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "notary")]
#[command(about = "NOTARY - document certification pipeline", long_about = None)]
struct Cli {
    /// Database file
    #[arg(long, global = true, default_value = "notary.redb")]
    db: PathBuf,
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Use simulated providers instead of the configured HTTP endpoints
    #[arg(long, global = true)]
    sim: bool,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a document
    Create {
        /// File to fingerprint
        #[arg(short, long, conflicts_with = "fingerprint")]
        file: Option<PathBuf>,
        /// Precomputed SHA-256 fingerprint (hex)
        #[arg(long)]
        fingerprint: Option<Fingerprint>,
        /// Owning account, generated if omitted
        #[arg(long)]
        owner: Option<OwnerId>,
    },
    /// Request protection for a document
    Request {
        /// Document id
        entity: EntityId,
        /// Networks to anchor on
        #[arg(short, long = "network", required = true)]
        networks: Vec<AnchorNetwork>,
    },
    /// Append an externally produced event
    Ingest {
        /// Document id
        entity: EntityId,
        /// Event kind wire name, e.g. anchor.confirmed
        #[arg(short, long)]
        kind: EventKind,
        /// Producer tag, e.g. external:polygon-watcher
        #[arg(short, long)]
        source: EventSource,
        /// JSON object payload
        #[arg(short, long, default_value = "{}")]
        payload: String,
    },
    /// Evaluate one document, or every document
    Evaluate {
        /// Document id; all documents when omitted
        entity: Option<EntityId>,
    },
    /// Sweep every document once, or periodically with --follow
    Wake {
        /// Keep sweeping until interrupted
        #[arg(long)]
        follow: bool,
    },
    /// Execute queued jobs
    Work {
        /// Drain the queue with one worker and exit
        #[arg(long)]
        once: bool,
    },
    /// Run the wake loop and the worker pool until interrupted
    Run,
    /// Show a document, its status and its jobs
    Status {
        /// Document id
        entity: EntityId,
    },
    /// List jobs
    Jobs {
        /// Only jobs in this status
        #[arg(long)]
        status: Option<JobStatus>,
        /// Only jobs of this document
        #[arg(long)]
        entity: Option<EntityId>,
    },
    /// List dedupe keys whose newest job failed
    DeadJobs {
        /// Include keys that will still be retried
        #[arg(long)]
        all: bool,
    },
    /// Run a decision through the legacy path, if legacy still owns it
    Legacy {
        /// Document id
        entity: EntityId,
        /// Decision name, e.g. run_timestamp
        decision: DecisionId,
    },
    /// Inspect or change authority flags
    Flags {
        #[command(subcommand)]
        command: FlagCommands,
    },
}

#[derive(Subcommand)]
enum FlagCommands {
    /// List stored flags
    List,
    /// Hand a decision to the pipeline or back to legacy
    Set {
        /// Decision name, e.g. run_timestamp
        decision: DecisionId,
        /// New owner
        authority: AuthorityArg,
    },
    /// Write flags from the configuration file and the environment
    Seed,
}

#[derive(Clone, Copy, ValueEnum)]
enum AuthorityArg {
    Legacy,
    Canonical,
}

impl From<AuthorityArg> for Authority {
    fn from(arg: AuthorityArg) -> Self {
        match arg {
            AuthorityArg::Legacy => Self::Legacy,
            AuthorityArg::Canonical => Self::Canonical,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("notary=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn providers(cli: &Cli, config: &PipelineConfig) -> Result<Providers> {
    if cli.sim {
        return Ok(Providers::uniform(Arc::new(SimulatedProviders::new())));
    }
    let http = HttpProviders::from_config(&config.providers)?;
    Ok(Providers::uniform(Arc::new(http)))
}

fn fingerprint(file: Option<PathBuf>, hex: Option<Fingerprint>) -> Result<Fingerprint> {
    match (file, hex) {
        (Some(path), _) => {
            let bytes = std::fs::read(&path).wrap_err_with(|| format!("reading {}", path.display()))?;
            Ok(Fingerprint::compute(&bytes))
        }
        (None, Some(fp)) => Ok(fp),
        (None, None) => Err(eyre!("either --file or --fingerprint is required")),
    }
}

/// Flip a watch channel on Ctrl-C
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, draining");
            let _ = tx.send(true);
        }
    });
    rx
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = PipelineConfig::load_or_default(cli.config.as_deref())?;
    let store = Arc::new(
        RedbStore::open(&cli.db).wrap_err_with(|| format!("opening {}", cli.db.display()))?,
    );
    let pipeline = Pipeline::from_store(store, providers(&cli, &config)?, config);

    match cli.command {
        Commands::Create {
            file,
            fingerprint: hex,
            owner,
        } => {
            let fp = fingerprint(file, hex)?;
            let owner = owner.unwrap_or_default();
            print(&pipeline.create_entity(owner, fp, EventSource::user("cli")).await?)
        }
        Commands::Request { entity, networks } => print(
            &pipeline
                .request_protection(entity, &networks, EventSource::user("cli"))
                .await?,
        ),
        Commands::Ingest {
            entity,
            kind,
            source,
            payload,
        } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).wrap_err("payload is not valid JSON")?;
            let event = Event::new(kind, source, Timestamp::now()).with_payload(payload);
            print(&pipeline.ingest_event(entity, event).await?)
        }
        Commands::Evaluate { entity: Some(id) } => {
            print(&pipeline.evaluator().evaluate(id).await?)
        }
        Commands::Evaluate { entity: None } | Commands::Wake { follow: false } => {
            print(&pipeline.evaluator().evaluate_all().await?)
        }
        Commands::Wake { follow: true } => {
            pipeline.wake().run(shutdown_on_ctrl_c()).await;
            Ok(())
        }
        Commands::Work { once: true } => {
            let worker = WorkerId::generate(&pipeline.config().engine.worker_prefix);
            let outcomes = pipeline.engine().drain(&worker).await?;
            info!(jobs = outcomes.len(), "queue drained");
            print(&pipeline.metrics().snapshot())
        }
        Commands::Work { once: false } => {
            let stats = pipeline.engine().clone().run_pool(shutdown_on_ctrl_c()).await;
            print(&stats)
        }
        Commands::Run => {
            let stats = pipeline.run(shutdown_on_ctrl_c()).await;
            print(&stats)?;
            print(&pipeline.metrics().snapshot())
        }
        Commands::Status { entity } => print(&pipeline.status(entity).await?),
        Commands::Jobs { status, entity } => {
            let jobs = match entity {
                Some(id) => pipeline
                    .queue()
                    .jobs_for_entity(id)
                    .await?
                    .into_iter()
                    .filter(|j| status.is_none_or(|s| j.status == s))
                    .collect(),
                None => pipeline.queue().list(status).await?,
            };
            print(&jobs)
        }
        Commands::DeadJobs { all } => print(&pipeline.dead_letters(!all).await?),
        Commands::Legacy { entity, decision } => {
            print(&pipeline.fire_legacy(entity, decision).await?)
        }
        Commands::Flags { command } => match command {
            FlagCommands::List => print(&pipeline.gate().list().await?),
            FlagCommands::Set {
                decision,
                authority,
            } => {
                pipeline.gate().set_authority(decision, authority.into()).await?;
                print(&pipeline.gate().list().await?)
            }
            FlagCommands::Seed => {
                let written = pipeline.seed_flags().await?;
                info!(written, "flags seeded");
                print(&pipeline.gate().list().await?)
            }
        },
    }
}
