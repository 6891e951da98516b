//! Covenant CLI
//!
//! The `covenant` command is the operator surface over the ledger, the
//! invariant engine, the watchdog and the Evolution Gate.
//!
//! ## Commands
//!
//! - `append`: Append one event to the ledger
//! - `log`: Print ledger events from an offset
//! - `check`: Verify the whole ledger against the rule table
//! - `tick`: Run one watchdog tick and persist the checkpoint
//! - `propose`, `verify`, `seal`: The three gate stages
//! - `dispatch`: Run a gate action read as JSON from stdin
//! - `export`: Copy the ledger to an archive file
//! - `attest`: Record component attestations on the ledger

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use covenant_core::ledger::ReadBatch;
use covenant_core::{
    record_attestation, Attestable, Attestation, CovenantConfig, Event, EventLedger, HaltSignal,
    JsonlLedger, LedgerOffset, TickOutcome, VerificationReport, Watchdog, WatchdogCheckpoint,
    WatchdogOptions, METRICS,
};
use covenant_gate::{
    EvolutionGate, GateAction, GateResponse, ProposeResult, SealResult, VerificationVerdict,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "covenant")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Governance ledger and invariant verification", long_about = None)]
struct Cli {
    /// Configuration file (TOML); defaults apply when omitted
    #[arg(short, long, global = true, env = "COVENANT_CONFIG")]
    config: Option<PathBuf>,

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
    /// Append one event to the ledger
    Append {
        /// Event type, e.g. LICENSE_VALID
        event_type: String,

        /// Agent recorded as the event's author
        #[arg(short, long, default_value = "operator")]
        agent: String,

        /// Task id correlating the event with a unit of work
        #[arg(short, long)]
        task: Option<String>,

        /// Payload field as key=value (value parsed as JSON when possible)
        #[arg(short = 'f', long = "field")]
        fields: Vec<String>,

        /// Whole payload as a JSON object; --field entries are merged on top
        #[arg(long)]
        payload: Option<String>,
    },

    /// Print ledger events as JSON lines
    Log {
        /// Offset to start reading from
        #[arg(long, default_value_t = 0)]
        from: u64,

        /// Maximum number of events to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only events of this type
        #[arg(short = 't', long = "type")]
        event_type: Option<String>,
    },

    /// Verify the entire ledger against the rule table
    Check {
        /// Exit non-zero when any violation is found
        #[arg(long)]
        strict: bool,
    },

    /// Run one watchdog tick over events appended since the last checkpoint
    Tick {
        /// Tick counter recorded in VIOLATION task ids
        #[arg(long, default_value_t = 1)]
        counter: u64,
    },

    /// Stage content for a target path
    Propose {
        /// Path the content is intended for, relative to the repository root
        target: PathBuf,

        /// Content to stage
        #[arg(long, conflicts_with = "content_file")]
        content: Option<String>,

        /// Read the content to stage from a file
        #[arg(long)]
        content_file: Option<PathBuf>,

        /// Free-text description of the change
        #[arg(long, default_value = "")]
        spec: String,

        /// Task id carried onto the ledger when sealed
        #[arg(long)]
        task: Option<String>,
    },

    /// Verify a staged file and print the verdict
    Verify {
        /// Staging path returned by `propose`
        staging_path: PathBuf,
    },

    /// Seal a verified staged file into the repository
    Seal {
        /// Staging path returned by `propose`
        staging_path: PathBuf,

        /// Destination relative to the repository root
        dest: PathBuf,

        /// Verdict JSON file produced by `verify` ("-" for stdin)
        #[arg(long)]
        verdict: PathBuf,

        /// Commit message
        #[arg(short, long)]
        message: String,
    },

    /// Run one gate action read as JSON from stdin
    Dispatch,

    /// Copy the ledger to an archive file
    Export {
        /// Destination file
        dest: PathBuf,
    },

    /// Record component attestations on the ledger
    Attest {
        /// Component to attest
        #[arg(value_enum, default_value_t = Component::All)]
        component: Component,

        /// Agent recorded on the ATTESTATION events
        #[arg(short, long, default_value = "covenant.cli")]
        agent: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Component {
    Watchdog,
    Drafter,
    Verifier,
    Sealer,
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    covenant_core::init_tracing(cli.json, level);

    let config = CovenantConfig::resolve(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let ws = Workspace::open(config).await?;

    match cli.command {
        Commands::Append {
            event_type,
            agent,
            task,
            fields,
            payload,
        } => {
            let event = cmd_append(
                &ws,
                &event_type,
                &agent,
                task.as_deref(),
                &fields,
                payload.as_deref(),
            )
            .await?;
            print_json(&event)
        }
        Commands::Log {
            from,
            limit,
            event_type,
        } => {
            let batch = cmd_log(&ws, from, limit, event_type.as_deref()).await?;
            for event in &batch.events {
                println!("{}", serde_json::to_string(event)?);
            }
            info!(next_offset = %batch.next_offset, "end of ledger");
            Ok(())
        }
        Commands::Check { strict } => {
            let report = cmd_check(&ws).await?;
            print_json(&report)?;
            if strict && !report.passed {
                anyhow::bail!("ledger has {} violation(s)", report.violations.len());
            }
            Ok(())
        }
        Commands::Tick { counter } => {
            let outcome = cmd_tick(&ws, counter).await?;
            print_json(&outcome)?;
            if outcome.should_halt {
                anyhow::bail!(
                    "watchdog halted: {}",
                    outcome.reason.as_deref().unwrap_or("critical violation")
                );
            }
            Ok(())
        }
        Commands::Propose {
            target,
            content,
            content_file,
            spec,
            task,
        } => {
            let content = match (content, content_file) {
                (Some(text), _) => Some(text),
                (None, Some(path)) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read content file: {:?}", path))?,
                ),
                (None, None) => None,
            };
            let result =
                cmd_propose(&ws, &target, content.as_deref(), &spec, task.as_deref()).await?;
            print_json(&result)?;
            if !result.is_staged() {
                anyhow::bail!(
                    "proposal not staged: {}",
                    result.reason.as_deref().unwrap_or("unknown")
                );
            }
            Ok(())
        }
        Commands::Verify { staging_path } => {
            let verdict = cmd_verify(&ws, &staging_path).await?;
            print_json(&verdict)?;
            if !verdict.passed {
                anyhow::bail!("verification failed: {}", verdict.reason);
            }
            Ok(())
        }
        Commands::Seal {
            staging_path,
            dest,
            verdict,
            message,
        } => {
            let text = if verdict.as_os_str() == "-" {
                read_stdin()?
            } else {
                std::fs::read_to_string(&verdict)
                    .with_context(|| format!("Failed to read verdict file: {:?}", verdict))?
            };
            let result = cmd_seal(&ws, &staging_path, &dest, &text, &message).await?;
            print_json(&result)?;
            if !result.is_sealed() {
                anyhow::bail!(
                    "seal {}: {}",
                    result.status,
                    result.reason.as_deref().unwrap_or("unknown")
                );
            }
            Ok(())
        }
        Commands::Dispatch => {
            let response = cmd_dispatch(&ws, &read_stdin()?).await?;
            print_json(&response)
        }
        Commands::Export { dest } => {
            let bytes = cmd_export(&ws, &dest).await?;
            println!("Exported {} bytes to {:?}", bytes, dest);
            Ok(())
        }
        Commands::Attest { component, agent } => {
            let attestations = cmd_attest(&ws, component, &agent).await?;
            print_json(&attestations)
        }
    }
}

/// Ledger and configuration shared by every command.
struct Workspace {
    config: CovenantConfig,
    ledger: Arc<JsonlLedger>,
}

impl Workspace {
    async fn open(config: CovenantConfig) -> Result<Self> {
        let ledger = JsonlLedger::open(
            &config.ledger.data_dir,
            &config.ledger.file_name,
            config.io_timeout(),
        )
        .await
        .with_context(|| {
            format!(
                "Failed to open ledger in {:?}",
                config.ledger.data_dir
            )
        })?;
        Ok(Self {
            config,
            ledger: Arc::new(ledger),
        })
    }

    fn ledger(&self) -> Arc<dyn EventLedger> {
        self.ledger.clone()
    }

    fn checkpoint(&self) -> Result<Option<WatchdogCheckpoint>> {
        WatchdogCheckpoint::load(self.config.checkpoint_path())
            .context("Failed to read watchdog checkpoint")
    }

    fn watchdog(&self) -> Result<Watchdog> {
        let engine = Arc::new(self.config.engine().context("Failed to load rule table")?);
        let options = WatchdogOptions::from_config(&self.config);
        Ok(match self.checkpoint()? {
            Some(checkpoint) => Watchdog::resume(self.ledger(), engine, options, checkpoint),
            None => Watchdog::new(self.ledger(), engine, options),
        })
    }

    /// Gate wired to a halt signal that is already tripped when the last
    /// checkpoint recorded a halt.
    async fn gate(&self) -> Result<EvolutionGate> {
        let halt = HaltSignal::new();
        if self
            .checkpoint()?
            .is_some_and(|checkpoint| checkpoint.halted_reason.is_some())
        {
            halt.trip();
        }
        EvolutionGate::from_config(&self.config, self.ledger(), Some(halt))
            .await
            .context("Failed to set up the evolution gate")
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_stdin() -> Result<String> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("Failed to read stdin")?;
    Ok(text)
}

/// Split `key=value`; the value is JSON when it parses, a string otherwise.
fn parse_field(field: &str) -> Result<(String, Value)> {
    let (key, raw) = field
        .split_once('=')
        .with_context(|| format!("Field must be key=value, got '{}'", field))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Field key must not be empty: '{}'", field);
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Append one event built from command-line parts.
async fn cmd_append(
    ws: &Workspace,
    event_type: &str,
    agent: &str,
    task: Option<&str>,
    fields: &[String],
    payload: Option<&str>,
) -> Result<Event> {
    let mut map = match payload {
        Some(text) => match serde_json::from_str::<Value>(text).context("Payload is not valid JSON")? {
            Value::Object(map) => map,
            other => anyhow::bail!("Payload must be a JSON object, got {}", other),
        },
        None => Map::new(),
    };
    for field in fields {
        let (key, value) = parse_field(field)?;
        map.insert(key, value);
    }

    let event = Event::new(event_type, agent, task.map(ToString::to_string), map);
    ws.ledger
        .append(&event)
        .await
        .context("Failed to append event")?;
    info!(event_type, agent, "event appended");
    Ok(event)
}

/// Read events from `from`, optionally filtered by type and truncated.
async fn cmd_log(
    ws: &Workspace,
    from: u64,
    limit: Option<usize>,
    event_type: Option<&str>,
) -> Result<ReadBatch> {
    let mut batch = ws
        .ledger
        .read_from(LedgerOffset(from))
        .await
        .context("Failed to read ledger")?;
    if let Some(kind) = event_type {
        batch.events.retain(|e| e.event_type == kind);
    }
    if let Some(limit) = limit {
        batch.events.truncate(limit);
    }
    Ok(batch)
}

/// Full batch verification of the ledger.
async fn cmd_check(ws: &Workspace) -> Result<VerificationReport> {
    let engine = ws.config.engine().context("Failed to load rule table")?;
    let events = ws.ledger.read_all().await.context("Failed to read ledger")?;
    let report = engine.verify_ledger(&events);
    info!(
        events = report.events_checked,
        violations = report.violations.len(),
        "ledger checked"
    );
    Ok(report)
}

/// One watchdog tick, resumed from and saved to the checkpoint file.
async fn cmd_tick(ws: &Workspace, counter: u64) -> Result<TickOutcome> {
    let mut watchdog = ws.watchdog()?;
    let outcome = watchdog.tick(counter).await;
    watchdog
        .checkpoint()
        .save(ws.config.checkpoint_path())
        .context("Failed to save watchdog checkpoint")?;
    METRICS.flush();
    Ok(outcome)
}

async fn cmd_propose(
    ws: &Workspace,
    target: &Path,
    content: Option<&str>,
    spec: &str,
    task: Option<&str>,
) -> Result<ProposeResult> {
    let gate = ws.gate().await?;
    Ok(gate.propose(spec, target, content, task).await)
}

async fn cmd_verify(ws: &Workspace, staging_path: &Path) -> Result<VerificationVerdict> {
    let gate = ws.gate().await?;
    Ok(gate.verify(staging_path).await)
}

async fn cmd_seal(
    ws: &Workspace,
    staging_path: &Path,
    dest: &Path,
    verdict_json: &str,
    message: &str,
) -> Result<SealResult> {
    let verdict: VerificationVerdict =
        serde_json::from_str(verdict_json).context("Verdict is not valid verdict JSON")?;
    let gate = ws.gate().await?;
    let result = gate.seal(staging_path, dest, verdict, message).await;
    METRICS.flush();
    Ok(result)
}

async fn cmd_dispatch(ws: &Workspace, input: &str) -> Result<GateResponse> {
    let action: GateAction =
        serde_json::from_str(input).context("Input is not a valid gate action")?;
    info!(action = action.name(), "dispatching gate action");
    let gate = ws.gate().await?;
    Ok(gate.dispatch(action).await)
}

async fn cmd_export(ws: &Workspace, dest: &Path) -> Result<u64> {
    ws.ledger
        .export_to(dest)
        .await
        .with_context(|| format!("Failed to export ledger to {:?}", dest))
}

async fn cmd_attest(ws: &Workspace, component: Component, agent: &str) -> Result<Vec<Attestation>> {
    let watchdog = ws.watchdog()?;
    let gate = ws.gate().await?;
    let components: Vec<&dyn Attestable> = match component {
        Component::Watchdog => vec![&watchdog as &dyn Attestable],
        Component::Drafter => vec![gate.drafter() as &dyn Attestable],
        Component::Verifier => vec![gate.verifier() as &dyn Attestable],
        Component::Sealer => vec![gate.sealer() as &dyn Attestable],
        Component::All => vec![
            &watchdog as &dyn Attestable,
            gate.drafter(),
            gate.verifier(),
            gate.sealer(),
        ],
    };

    let mut attestations = Vec::with_capacity(components.len());
    for c in components {
        let attestation = record_attestation(ws.ledger.as_ref(), c, agent)
            .await
            .with_context(|| format!("Failed to record attestation for {}", c.component_id()))?;
        attestations.push(attestation);
    }
    Ok(attestations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::{event_types, CommitterKind};
    use covenant_gate::{reasons, SealStatus};
    use std::process::Command;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn test_config(root: &Path) -> CovenantConfig {
        let repo = root.join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        run_git(&repo, &["init"]);
        run_git(&repo, &["config", "user.name", "test-user"]);
        run_git(&repo, &["config", "user.email", "test@example.com"]);
        run_git(&repo, &["commit", "--allow-empty", "-m", "initial"]);

        let mut config = CovenantConfig::default();
        config.ledger.data_dir = root.join("data");
        config.gate.repo_root = repo;
        config.gate.committer = CommitterKind::Git;
        config
    }

    #[test]
    fn parse_field_prefers_json() {
        assert_eq!(parse_field("n=3").unwrap(), ("n".to_string(), Value::from(3)));
        assert_eq!(
            parse_field("s=hello world").unwrap(),
            ("s".to_string(), Value::from("hello world"))
        );
        assert_eq!(
            parse_field("eq=a=b").unwrap(),
            ("eq".to_string(), Value::from("a=b"))
        );
        assert!(parse_field("missing-separator").is_err());
        assert!(parse_field("=value").is_err());
    }

    #[tokio::test]
    async fn append_then_log_filters_by_type() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(test_config(dir.path())).await.unwrap();

        cmd_append(&ws, "LICENSE_VALID", "agent-1", Some("T1"), &[], None)
            .await
            .unwrap();
        let event = cmd_append(
            &ws,
            "BROADCAST",
            "agent-1",
            Some("T1"),
            &["channel=\"news\"".to_string(), "count=2".to_string()],
            Some(r#"{"source": "cli"}"#),
        )
        .await
        .unwrap();
        assert_eq!(event.payload["count"], 2);
        assert_eq!(event.payload["source"], "cli");

        let all = cmd_log(&ws, 0, None, None).await.unwrap();
        assert_eq!(all.events.len(), 2);

        let broadcasts = cmd_log(&ws, 0, None, Some("BROADCAST")).await.unwrap();
        assert_eq!(broadcasts.events.len(), 1);
        assert_eq!(broadcasts.events[0].payload_str("channel"), Some("news"));

        let tail = cmd_log(&ws, all.next_offset.0, None, None).await.unwrap();
        assert!(tail.events.is_empty());
    }

    #[tokio::test]
    async fn non_object_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(test_config(dir.path())).await.unwrap();
        let err = cmd_append(&ws, "X", "a", Some("T"), &[], Some("[1, 2]"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[tokio::test]
    async fn check_reports_unlicensed_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(test_config(dir.path())).await.unwrap();
        cmd_append(&ws, "BROADCAST", "agent-1", Some("T1"), &[], None)
            .await
            .unwrap();

        let report = cmd_check(&ws).await.unwrap();
        assert!(!report.passed);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].invariant_name, "BROADCAST_LICENSE_REQUIREMENT");
    }

    #[tokio::test]
    async fn tick_resumes_from_saved_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let ws = Workspace::open(config.clone()).await.unwrap();
        cmd_append(&ws, "BROADCAST", "agent-1", Some("T1"), &[], None)
            .await
            .unwrap();

        let first = cmd_tick(&ws, 1).await.unwrap();
        assert_eq!(first.violations_recorded, 1);
        assert!(config.checkpoint_path().exists());

        // A fresh process sees only the VIOLATION it recorded, which is clean.
        let ws = Workspace::open(config).await.unwrap();
        let second = cmd_tick(&ws, 2).await.unwrap();
        assert_eq!(second.new_events, 1);
        assert_eq!(second.violations_recorded, 0);
        let third = cmd_tick(&ws, 3).await.unwrap();
        assert_eq!(third.new_events, 0);
    }

    #[tokio::test]
    async fn propose_verify_seal_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let ws = Workspace::open(config.clone()).await.unwrap();

        let proposed = cmd_propose(&ws, Path::new("notes.md"), Some("# notes\n"), "notes", None)
            .await
            .unwrap();
        let staging_path = proposed.staging_path.unwrap();

        let verdict = cmd_verify(&ws, &staging_path).await.unwrap();
        assert!(verdict.passed);
        let verdict_json = serde_json::to_string(&verdict).unwrap();

        let sealed = cmd_seal(
            &ws,
            &staging_path,
            Path::new("docs/notes.md"),
            &verdict_json,
            "add notes",
        )
        .await
        .unwrap();
        assert!(sealed.is_sealed(), "{sealed:?}");
        assert!(config.gate.repo_root.join("docs/notes.md").exists());

        let sealed_events = cmd_log(&ws, 0, None, Some(event_types::SEALED)).await.unwrap();
        assert_eq!(sealed_events.events.len(), 1);
    }

    #[tokio::test]
    async fn halted_checkpoint_keeps_gate_closed() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(test_config(dir.path())).await.unwrap();
        cmd_append(&ws, event_types::CONSTITUTION_DELETED, "rogue", Some("T1"), &[], None)
            .await
            .unwrap();
        assert!(cmd_tick(&ws, 1).await.unwrap().should_halt);

        let proposed = cmd_propose(&ws, Path::new("a.txt"), Some("a\n"), "", None)
            .await
            .unwrap();
        let staging_path = proposed.staging_path.unwrap();
        let verdict = cmd_verify(&ws, &staging_path).await.unwrap();
        let result = cmd_seal(
            &ws,
            &staging_path,
            Path::new("a.txt"),
            &serde_json::to_string(&verdict).unwrap(),
            "m",
        )
        .await
        .unwrap();
        assert_eq!(result.status, SealStatus::Error);
        assert_eq!(result.reason.as_deref(), Some(reasons::WATCHDOG_HALTED));
    }

    #[tokio::test]
    async fn dispatch_accepts_gate_action_json() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(test_config(dir.path())).await.unwrap();
        let response = cmd_dispatch(
            &ws,
            r#"{"action":"propose","target_path":"x.toml","content":"a = 1\n"}"#,
        )
        .await
        .unwrap();
        let GateResponse::Propose(proposed) = response else {
            panic!("expected propose response");
        };
        assert!(proposed.is_staged());

        assert!(cmd_dispatch(&ws, r#"{"action":"rollback"}"#).await.is_err());
    }

    #[tokio::test]
    async fn attest_all_records_each_component() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(test_config(dir.path())).await.unwrap();

        let attestations = cmd_attest(&ws, Component::All, "covenant.cli").await.unwrap();
        let ids: Vec<_> = attestations.iter().map(|a| a.component_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "covenant.watchdog",
                "covenant.drafter",
                "covenant.verifier",
                "covenant.sealer"
            ]
        );
        assert!(attestations.iter().all(Attestation::verify));

        let recorded = cmd_log(&ws, 0, None, Some(event_types::ATTESTATION)).await.unwrap();
        assert_eq!(recorded.events.len(), 4);
    }

    #[tokio::test]
    async fn export_copies_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(test_config(dir.path())).await.unwrap();
        cmd_append(&ws, "LICENSE_VALID", "agent-1", Some("T1"), &[], None)
            .await
            .unwrap();

        let dest = dir.path().join("archive.jsonl");
        let bytes = cmd_export(&ws, &dest).await.unwrap();
        assert!(bytes > 0);
        assert_eq!(
            std::fs::read(&dest).unwrap(),
            std::fs::read(ws.config.ledger_path()).unwrap()
        );
    }
}
