//! # Dropwell
//!
//! Operator daemon and CLI for airdrop settlement.
//!
//! ## Commands
//!
//! - `run`: resume every recoverable session, pick up new ones, serve until Ctrl-C
//! - `scan`: recovery analysis of every stored session (JSON)
//! - `status <id>`: recovery analysis of one session (JSON)
//! - `create`: create a session from a recipient manifest and print deposit details
//! - `resume <id>`: run one session now, e.g. after a fee top-up
//! - `cancel <id>`: cancel a session that has not finished
//!
//! ## Environment Variables
//!
//! - `DROPWELL_TREASURY_ADDRESS`: service fee destination and default drain address
//! - `BLOCKFROST_PROJECT_ID`: use Blockfrost for balance queries
//! - `CARDANO_NODE_SOCKET_PATH`: node socket for `cardano-cli`
//! - `DROPWELL_PUBLIC_CHANNEL`: channel for completion announcements
//!
//! Only one daemon may run against a sessions directory at a time.

mod config;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dropwell_app::{AppBuilder, AppType};
use dropwell_core::Lovelace;
use dropwell_engine::recovery::analyze;
use dropwell_engine::{
    AirdropRequest, Engine, EngineError, FileSessionStore, FundingWallet, LogNotifier,
    ManifestFile, RecoveryAction, RunOutcome, SessionLedger, SessionStore,
};
use dropwell_logging::LogFormat;
use dropwell_settings::expand_path;
use dropwell_settlement::{
    format_ada, BalanceQuery, BlockfrostBalance, CardanoCli, DryRunTool, SettlementTool,
};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::config::DaemonConfig;

const SERVICE: &str = "dropwell";

#[derive(Parser)]
#[command(version, about = "Dropwell airdrop settlement daemon")]
struct Cli {
    /// Settings file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Data directory (default: platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<String>,
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Emit one JSON object per log line
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resume recoverable sessions and serve until interrupted
    Run,
    /// Analyze every stored session
    Scan,
    /// Analyze one session
    Status { session_id: String },
    /// Create a session and print deposit instructions
    Create {
        #[arg(long)]
        owner: String,
        /// JSON manifest: [{"address": "...", "quantity": N}] or {"policy_id": ..., "recipients": [...]}
        #[arg(long)]
        manifest: String,
        /// Total payout budget in lovelace
        #[arg(long)]
        budget: Lovelace,
        /// Funding address the deposit is watched at
        #[arg(long)]
        address: String,
        /// Signing key file for the funding address
        #[arg(long)]
        signing_key: String,
        /// Where change goes after the service fee (default: treasury)
        #[arg(long)]
        drain: Option<String>,
    },
    /// Run one session now. Retries sessions a restart leaves alone
    Resume { session_id: String },
    /// Cancel a session that has not finished
    Cancel {
        session_id: String,
        #[arg(long, default_value = "cancelled by operator")]
        reason: String,
    },
}

struct Runtime {
    config: DaemonConfig,
    store: Arc<FileSessionStore>,
}

fn load(cli: &Cli) -> Result<Runtime> {
    let app_type = match cli.cmd {
        Commands::Run => AppType::Daemon,
        _ => AppType::Cli,
    };
    let mut builder = AppBuilder::<DaemonConfig>::new(SERVICE)
        .app_type(app_type)
        .verbose(cli.verbose);
    if cli.json_logs {
        builder = builder.log_format(LogFormat::Json);
    }
    if let Some(path) = &cli.config {
        builder = builder.config_path(path);
    }
    if let Some(dir) = &cli.data_dir {
        builder = builder.data_dir(expand_path(dir));
    }
    if !matches!(cli.cmd, Commands::Run) {
        builder = builder.skip_banner();
    }
    let app = builder.build().context("failed to initialize")?;

    let mut config = app.settings.config;
    config.apply_env();
    let sessions_dir = config.sessions_dir(&app.data_dir);
    let store = FileSessionStore::open(&sessions_dir)
        .with_context(|| format!("cannot open session store at {}", sessions_dir.display()))?;

    Ok(Runtime {
        config,
        store: Arc::new(store),
    })
}

fn build_engine(rt: &Runtime) -> Result<Arc<Engine>> {
    let cli = Arc::new(CardanoCli::new(rt.config.cardano.clone()));

    let balance: Arc<dyn BalanceQuery> = match &rt.config.blockfrost {
        Some(bf) => Arc::new(
            BlockfrostBalance::new(&bf.base_url, &bf.project_id)
                .context("failed to set up blockfrost client")?,
        ),
        None => cli.clone(),
    };
    let tool: Arc<dyn SettlementTool> = if rt.config.dry_run {
        warn!("dry run: transactions are recorded, not submitted");
        Arc::new(DryRunTool::new())
    } else {
        cli
    };

    let engine = Engine::new(
        rt.config.engine.clone(),
        rt.store.clone(),
        balance,
        tool,
        Arc::new(LogNotifier),
    )
    .context("invalid engine configuration")?;
    Ok(Arc::new(engine))
}

type RunResult = std::result::Result<RunOutcome, EngineError>;
type Finished = (String, std::result::Result<RunResult, JoinError>);

/// Keep the handle of a session run so its outcome is logged when it ends.
fn track(tasks: &mut JoinSet<Finished>, id: String, handle: JoinHandle<RunResult>) {
    tasks.spawn(async move { (id, handle.await) });
}

fn log_finished(id: &str, outcome: std::result::Result<RunResult, JoinError>) {
    match outcome {
        Ok(Ok(outcome)) => info!(session = %id, ?outcome, "session finished"),
        Ok(Err(EngineError::Cancelled(_))) => info!(session = %id, "session cancelled"),
        Ok(Err(e)) => error!(
            session = %id,
            kind = e.kind().name(),
            error = %e,
            "session stopped; run `dropwell status` for details"
        ),
        Err(e) => error!(session = %id, error = %e, "session task panicked"),
    }
}

async fn cmd_run(rt: &Runtime) -> Result<()> {
    let engine = build_engine(rt)?;
    let mut started: HashSet<String> = HashSet::new();
    let mut tasks = JoinSet::new();

    for (id, handle) in engine.resume_recoverable()? {
        started.insert(id.clone());
        track(&mut tasks, id, handle);
    }
    info!(resumed = started.len(), "recovery scan complete");

    let mut ticker = tokio::time::interval(Duration::from_secs(rt.config.engine.poll_interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(running = tasks.len(), "shutting down; in-flight sessions resume on next start");
                return Ok(());
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                match joined {
                    Ok((id, outcome)) => {
                        log_finished(&id, outcome);
                        started.remove(&id);
                    }
                    Err(e) => error!(error = %e, "session watcher failed"),
                }
            }
            _ = ticker.tick() => {
                // Sessions created by `dropwell create` since the last tick.
                for report in engine.scan()? {
                    if report.action == RecoveryAction::ResumeWaiting
                        && report.should_resume()
                        && !started.contains(&report.session_id)
                        && !engine.locks().is_locked(&report.session_id)
                    {
                        info!(session = %report.session_id, "picking up new session");
                        let handle = engine.spawn(report.session_id.clone());
                        started.insert(report.session_id.clone());
                        track(&mut tasks, report.session_id, handle);
                    }
                }
            }
        }
    }
}

fn cmd_scan(rt: &Runtime) -> Result<()> {
    let reports: Vec<_> = rt
        .store
        .list_ids()?
        .iter()
        .map(|id| analyze(rt.store.as_ref(), id))
        .collect();
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

fn cmd_status(rt: &Runtime, session_id: &str) -> Result<()> {
    let report = analyze(rt.store.as_ref(), session_id);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_create(
    rt: &Runtime,
    owner: String,
    manifest: &str,
    budget: Lovelace,
    wallet: FundingWallet,
    drain: Option<String>,
) -> Result<()> {
    let engine = build_engine(rt)?;
    let source = ManifestFile::open(expand_path(manifest))
        .await
        .with_context(|| format!("cannot read manifest {}", manifest))?;
    info!(manifest = %source.path().display(), "recipients loaded");
    let mut request = AirdropRequest::from_source(owner, &source, budget, wallet).await?;
    request.drain_address = drain;

    let created = engine.create_session(request).await?;
    let session = &created.session;
    println!("session:     {}", session.session_id);
    println!("recipients:  {}", session.recipients.len());
    println!("skipped:     {} invalid, {} dust", created.recipients.dropped_invalid, created.recipients.dropped_dust);
    println!("deposit:     {} ADA", format_ada(session.required_amount));
    println!("to address:  {}", session.funding_address);
    Ok(())
}

async fn cmd_resume(rt: &Runtime, session_id: &str) -> Result<()> {
    let engine = build_engine(rt)?;
    let report = engine.analyze(session_id);
    if report.needs_attention() {
        warn!(session = %session_id, action = %report.action, summary = %report.summary, "resuming on operator request");
    }
    let outcome = engine
        .run(session_id)
        .await
        .with_context(|| format!("session {} did not complete", session_id))?;
    println!("{}: {:?}", session_id, outcome);
    Ok(())
}

fn cmd_cancel(rt: &Runtime, session_id: &str, reason: &str) -> Result<()> {
    let ledger = SessionLedger::new(rt.store.clone());
    let session = ledger.cancel(session_id, reason)?;
    println!("{} cancelled ({} batch id(s) recorded)", session.session_id, session.distribution_tx_ids.len());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let rt = load(&cli)?;

    match cli.cmd {
        Commands::Run => cmd_run(&rt).await,
        Commands::Scan => cmd_scan(&rt),
        Commands::Status { session_id } => cmd_status(&rt, &session_id),
        Commands::Create {
            owner,
            manifest,
            budget,
            address,
            signing_key,
            drain,
        } => {
            let wallet = FundingWallet {
                address,
                signing_key,
            };
            cmd_create(&rt, owner, &manifest, budget, wallet, drain).await
        }
        Commands::Resume { session_id } => cmd_resume(&rt, &session_id).await,
        Commands::Cancel { session_id, reason } => cmd_cancel(&rt, &session_id, &reason),
    }
}
