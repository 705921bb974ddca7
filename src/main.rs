use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::io::BufReader;

use pos_agent::commands::{run_self_update, system};
use pos_agent::db::{self, LastSuccessStore};
use pos_agent::models::{AttemptStatus, DownloadOutcome};
use pos_agent::utils::{format_last_sync, parse_rfc3339, AppError, AppResult, Clock};
use pos_agent::Agent;

#[derive(Parser)]
#[command(name = "pos-agent", version, about = "POS terminal check-in monitor and self-updater")]
struct Cli {
    /// Agent database (defaults to the platform data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the staleness monitor, check in once, run until Ctrl-C.
    /// Reads control lines (`success [RFC 3339]`, `check`) from stdin.
    Run,
    /// Send one device check-in
    Report,
    /// Download and install the configured update package
    Update,
    /// Print the current check-in status as JSON
    Status,
    /// Print device uptime and the suggested restart time
    Uptime,
    /// Record a successful check-in. A running `run` picks it up at its next
    /// tick; send it `success` on stdin to apply it immediately.
    SetLastSuccess {
        /// RFC 3339 timestamp, defaults to now
        #[arg(long)]
        at: Option<String>,
    },
    /// Allow the agent to hand update packages to the installer
    AllowInstall,
}

async fn dispatch(agent: &Agent, command: Command) -> AppResult<()> {
    match command {
        Command::Run => agent.run_service().await,
        Command::Report => agent.report_client().report(&agent.identity()).await,
        Command::Update => {
            let pipeline = agent.update_pipeline()?;
            let mut operator = BufReader::new(tokio::io::stdin());
            let status = tokio::select! {
                status = run_self_update(&pipeline, &mut operator) => status?,
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Interrupted; cancelling the update attempt");
                    pipeline.cancel().await;
                    return Err(AppError::CommandFailed(DownloadOutcome::Cancelled.code()));
                }
            };
            match status {
                AttemptStatus::Finished { outcome, details } => {
                    println!("{}: {}", outcome.code(), details);
                    if outcome.is_success() {
                        Ok(())
                    } else {
                        Err(AppError::CommandFailed(outcome.code()))
                    }
                }
                AttemptStatus::Suspended(stage) => Err(AppError::Custom(format!(
                    "update left suspended at {}",
                    stage.as_str()
                ))),
            }
        }
        Command::Status => {
            let snapshot = system::status_snapshot(agent.store.as_ref(), agent.clock.as_ref(), &agent.settings);
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Command::Uptime => {
            println!("{}", system::uptime_report(agent.clock.as_ref(), &agent.settings));
            Ok(())
        }
        Command::SetLastSuccess { at } => {
            let ts = match at {
                Some(raw) => parse_rfc3339(&raw)?,
                None => agent.clock.now(),
            };
            agent.store.set(ts)?;
            println!("Last sync: {}", format_last_sync(agent.store.get()));
            Ok(())
        }
        Command::AllowInstall => {
            agent.permission_gate().grant_install()?;
            println!("Install grant recorded");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(db::default_db_path);

    let agent = match Agent::open(&db_path) {
        Ok(agent) => agent,
        Err(e) => {
            log::error!("Failed to open agent database {:?}: {}", db_path, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = dispatch(&agent, cli.command.unwrap_or(Command::Run)).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
