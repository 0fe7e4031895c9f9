use clap::Parser;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use ludo_session_sync::{
    GameSession,
    HttpSessionAuthority,
    SessionAuthority,
    SessionConfig,
    SessionDriver,
    SessionEvent,
    SessionId,
    TcpProbe,
    logging,
};
use std::path::PathBuf;
use tracing::{
    info,
    warn,
};

/// Follows a ludo game session and logs every authoritative change.
#[derive(Debug, Parser)]
#[command(name = "session-watch", version)]
struct Args {
    /// Base URL of the game backend
    #[arg(long)]
    authority_url: String,
    /// Game session to follow
    #[arg(long)]
    session: String,
    /// JSON file with session driver settings
    #[arg(long)]
    config: Option<PathBuf>,
    /// Also write logs to daily files in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// Overrides the poll interval from the config file
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(poll_interval_ms) = args.poll_interval_ms {
        config.poll_interval_ms = poll_interval_ms;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    logging::init_tracing(args.log_dir.as_deref());

    let config = load_config(&args)?;
    let session = SessionId::new(args.session.clone());
    let authority = HttpSessionAuthority::with_request_timeout(
        args.authority_url.clone(),
        config.action_timeout(),
    )?;

    let fetched = SessionAuthority::<GameSession>::fetch_session_state(&authority, &session)
        .await
        .wrap_err("failed to fetch initial session state")?;
    let initial = fetched
        .ok_or_else(|| eyre!("session {session} not found at {}", authority.base_url()))?;
    info!(%session, status = ?initial.status, players = ?initial.players, "session loaded");

    let probe = TcpProbe::from_url(
        &args.authority_url,
        config.probe_interval(),
        config.probe_timeout(),
    )?;
    let (monitor, probe_task) = probe.spawn();

    let (mut handle, mut events) =
        SessionDriver::spawn(config, session, initial, authority, monitor);
    let mut display = handle.display_state();
    let mut connectivity = handle.connectivity();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; stopping");
                break;
            }
            changed = display.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = display.borrow_and_update().clone();
                info!(status = ?state.status, last_roll = ?state.last_roll, winner = ?state.winner, "display updated");
            }
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = connectivity.borrow_and_update().clone();
                info!(
                    online = status.online,
                    reconnecting = status.reconnecting,
                    attempts = status.attempt_count,
                    abandoned = status.abandoned,
                    "connectivity updated"
                );
            }
            event = events.recv() => {
                match event {
                    Some(SessionEvent::StateChanged(state)) => {
                        info!(status = ?state.status, "authoritative state changed");
                    }
                    Some(SessionEvent::Rollback(update)) => {
                        warn!(update = %update.id, "tentative move rolled back");
                    }
                    Some(SessionEvent::Recovered(state)) => {
                        info!(status = ?state.status, "session recovered");
                    }
                    Some(SessionEvent::ConnectionLost) => warn!("connection lost"),
                    Some(SessionEvent::Abandoned) => {
                        warn!("session recovery abandoned");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    handle.shutdown().await;
    probe_task.abort();
    Ok(())
}
