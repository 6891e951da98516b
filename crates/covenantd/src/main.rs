//! covenantd: drives watchdog ticks on a timer and persists the checkpoint
//! after each one. Exits non-zero once the watchdog halts.

use anyhow::{Context, Result};
use clap::Parser;
use covenant_core::{
    init_tracing, CovenantConfig, EventLedger, JsonlLedger, Watchdog, WatchdogCheckpoint,
    WatchdogOptions, METRICS,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn, Level};

#[derive(Parser)]
#[command(name = "covenantd")]
#[command(about = "Covenant watchdog daemon", version)]
struct Args {
    /// Path to covenant.toml
    #[arg(short, long, env = "COVENANT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the tick interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Stop after this many ticks
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    verbose: bool,
}

/// Why the tick loop stopped.
#[derive(Debug, PartialEq)]
enum Exit {
    Shutdown,
    Completed,
    Halted(String),
}

struct Daemon {
    watchdog: Watchdog,
    checkpoint_path: PathBuf,
    interval: Duration,
    counter: u64,
}

impl Daemon {
    fn new(watchdog: Watchdog, checkpoint_path: PathBuf, interval: Duration) -> Self {
        Self {
            watchdog,
            checkpoint_path,
            interval,
            counter: 0,
        }
    }

    async fn run(
        &mut self,
        max_ticks: Option<u64>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<Exit> {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if max_ticks.is_some_and(|max| self.counter >= max) {
                return Ok(Exit::Completed);
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(ticks = self.counter, "shutdown requested");
                    self.persist()?;
                    return Ok(Exit::Shutdown);
                }
                _ = ticker.tick() => {
                    if let Some(reason) = self.tick().await? {
                        return Ok(Exit::Halted(reason));
                    }
                }
            }
        }
    }

    /// One tick. Returns the halt reason once the watchdog has halted.
    async fn tick(&mut self) -> Result<Option<String>> {
        self.counter += 1;
        let outcome = self.watchdog.tick(self.counter).await;

        if outcome.should_halt {
            // The halt must reach disk so the gate stays closed after exit.
            self.persist()?;
            METRICS.flush();
            return Ok(Some(
                outcome
                    .reason
                    .unwrap_or_else(|| "critical violation".to_string()),
            ));
        }

        if let Err(e) = self.persist() {
            warn!(counter = self.counter, error = %e, "checkpoint not saved; retrying next tick");
        }
        METRICS.flush();
        Ok(None)
    }

    fn persist(&self) -> Result<()> {
        save_checkpoint(&self.watchdog.checkpoint(), &self.checkpoint_path)
    }
}

fn save_checkpoint(checkpoint: &WatchdogCheckpoint, path: &Path) -> Result<()> {
    checkpoint
        .save(path)
        .with_context(|| format!("Failed to save watchdog checkpoint to {:?}", path))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received terminate signal"),
    }
}

async fn build(config: &CovenantConfig, interval: Duration) -> Result<Daemon> {
    let ledger = JsonlLedger::open(
        &config.ledger.data_dir,
        &config.ledger.file_name,
        config.io_timeout(),
    )
    .await
    .with_context(|| format!("Failed to open ledger in {:?}", config.ledger.data_dir))?;
    let ledger: Arc<dyn EventLedger> = Arc::new(ledger);

    let engine = Arc::new(config.engine().context("Failed to load rule table")?);
    let options = WatchdogOptions::from_config(config);
    let checkpoint_path = config.checkpoint_path();
    let watchdog = match WatchdogCheckpoint::load(&checkpoint_path)
        .context("Failed to read watchdog checkpoint")?
    {
        Some(checkpoint) => {
            info!(
                offset = checkpoint.offset.0,
                events_seen = checkpoint.events_seen,
                "resuming from checkpoint"
            );
            Watchdog::resume(ledger, engine, options, checkpoint)
        }
        None => Watchdog::new(ledger, engine, options),
    };

    Ok(Daemon::new(watchdog, checkpoint_path, interval))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(args.json, level);

    let config = CovenantConfig::resolve(args.config.as_deref())?;
    let interval = args
        .interval_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.poll_interval());
    let mut daemon = build(&config, interval).await?;

    info!(
        version = covenant_core::VERSION,
        interval_ms = interval.as_millis() as u64,
        data_dir = %config.ledger.data_dir.display(),
        "covenantd started"
    );

    match daemon.run(args.max_ticks, shutdown_signal()).await? {
        Exit::Shutdown | Exit::Completed => {
            info!(ticks = daemon.counter, "covenantd stopped");
            Ok(ExitCode::SUCCESS)
        }
        Exit::Halted(reason) => {
            error!(reason = %reason, "watchdog halted; evolution gate is closed");
            Ok(ExitCode::from(2))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::ledger::fakes::MemoryLedger;
    use covenant_core::{event_types, Event, InvariantEngine, WATCHDOG_AGENT_ID};

    fn daemon(ledger: Arc<MemoryLedger>, checkpoint_path: PathBuf) -> Daemon {
        let watchdog = Watchdog::new(
            ledger,
            Arc::new(InvariantEngine::standard().unwrap()),
            WatchdogOptions::default(),
        );
        Daemon::new(watchdog, checkpoint_path, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn runs_requested_ticks_and_saves_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchdog.checkpoint.json");
        let ledger = Arc::new(MemoryLedger::with_events(vec![Event::at(
            event_types::LICENSE_VALID,
            "agent",
            Some("T1"),
            "2026-01-01T00:00:00Z",
        )]));
        let mut d = daemon(ledger, path.clone());

        let exit = d.run(Some(3), std::future::pending()).await.unwrap();
        assert_eq!(exit, Exit::Completed);
        assert_eq!(d.counter, 3);

        let saved = WatchdogCheckpoint::load(&path).unwrap().unwrap();
        assert_eq!(saved.events_seen, 1);
        assert!(saved.halted_reason.is_none());
    }

    #[tokio::test]
    async fn critical_violation_stops_loop_and_persists_halt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchdog.checkpoint.json");
        let ledger = Arc::new(MemoryLedger::with_events(vec![Event::at(
            event_types::CONSTITUTION_DELETED,
            "agent",
            Some("T1"),
            "2026-01-01T00:00:00Z",
        )]));
        let mut d = daemon(ledger.clone(), path.clone());

        let exit = d.run(Some(10), std::future::pending()).await.unwrap();
        let Exit::Halted(reason) = exit else {
            panic!("expected halt, got {exit:?}");
        };
        assert!(reason.contains("CONSTITUTION_INTEGRITY"));
        assert_eq!(d.counter, 1);

        let saved = WatchdogCheckpoint::load(&path).unwrap().unwrap();
        assert_eq!(saved.halted_reason.as_deref(), Some(reason.as_str()));
        assert!(ledger
            .snapshot()
            .iter()
            .any(|e| e.event_type == event_types::WATCHDOG_HALTED && e.agent_id == WATCHDOG_AGENT_ID));
    }

    #[tokio::test]
    async fn shutdown_saves_checkpoint_before_any_tick() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchdog.checkpoint.json");
        let mut d = daemon(Arc::new(MemoryLedger::new()), path.clone());

        let exit = d.run(None, std::future::ready(())).await.unwrap();
        assert_eq!(exit, Exit::Shutdown);
        assert_eq!(d.counter, 0);
        assert!(WatchdogCheckpoint::load(&path).unwrap().is_some());
    }

    #[tokio::test]
    async fn resumes_halted_from_config_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CovenantConfig::default();
        config.ledger.data_dir = dir.path().to_path_buf();
        WatchdogCheckpoint {
            halted_reason: Some("critical invariant THREAT_SCREENING violated".into()),
            ..Default::default()
        }
        .save(config.checkpoint_path())
        .unwrap();

        let mut d = build(&config, Duration::from_millis(10)).await.unwrap();
        let exit = d.run(Some(5), std::future::pending()).await.unwrap();
        assert_eq!(
            exit,
            Exit::Halted("critical invariant THREAT_SCREENING violated".into())
        );
    }
}
