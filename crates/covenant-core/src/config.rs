//! Runtime configuration.
//!
//! Loaded from an optional TOML file, then overridden by `COVENANT_*`
//! environment variables. Every field has a default, so an empty file (or no
//! file at all) is a valid configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{CovenantError, Result};
use crate::invariants::{InvariantEngine, RuleTable};
use crate::watchdog::WatchScope;

pub const ENV_DATA_DIR: &str = "COVENANT_DATA_DIR";
pub const ENV_REPO_ROOT: &str = "COVENANT_REPO_ROOT";
pub const ENV_POLL_INTERVAL_MS: &str = "COVENANT_POLL_INTERVAL_MS";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CovenantConfig {
    pub ledger: LedgerSettings,
    pub watchdog: WatchdogSettings,
    pub gate: GateSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerSettings {
    /// Directory holding the ledger, checkpoint, staging area and CAS.
    pub data_dir: PathBuf,
    pub file_name: String,
    pub io_timeout_ms: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".covenant"),
            file_name: "ledger.jsonl".to_string(),
            io_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchdogSettings {
    pub poll_interval_ms: u64,
    pub read_timeout_ms: u64,
    pub eval_timeout_ms: u64,
    pub scope: WatchScope,
    /// Relative paths resolve against `ledger.data_dir`.
    pub checkpoint_file: PathBuf,
    /// TOML rule table replacing the standard rules.
    pub rules_file: Option<PathBuf>,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            read_timeout_ms: 5_000,
            eval_timeout_ms: 10_000,
            scope: WatchScope::Window,
            checkpoint_file: PathBuf::from("watchdog.checkpoint.json"),
            rules_file: None,
        }
    }
}

/// Which durable store the Sealer commits into.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommitterKind {
    #[default]
    Git,
    Cas,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitAuthor {
    pub name: String,
    pub email: String,
}

impl Default for GitAuthor {
    fn default() -> Self {
        Self {
            name: "covenant-sealer".to_string(),
            email: "sealer@covenant.local".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateSettings {
    /// Repository that sealed changes land in.
    pub repo_root: PathBuf,
    /// Defaults to `<data_dir>/staging`.
    pub staging_dir: Option<PathBuf>,
    pub verifier_timeout_ms: u64,
    pub commit_timeout_ms: u64,
    pub max_line_length: usize,
    pub allow_tabs: bool,
    pub require_final_newline: bool,
    pub committer: CommitterKind,
    pub git_author: GitAuthor,
    /// Extension (without dot) to argv. `{path}` is replaced with the staged
    /// file, e.g. `py = ["python3", "-m", "py_compile", "{path}"]`.
    pub external_checks: BTreeMap<String, Vec<String>>,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            staging_dir: None,
            verifier_timeout_ms: 30_000,
            commit_timeout_ms: 30_000,
            max_line_length: 120,
            allow_tabs: false,
            require_final_newline: true,
            committer: CommitterKind::Git,
            git_author: GitAuthor::default(),
            external_checks: BTreeMap::new(),
        }
    }
}

impl CovenantConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CovenantError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Load `path` when given (defaults otherwise) and apply environment
    /// overrides.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `COVENANT_*` overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.ledger.data_dir = PathBuf::from(dir);
        }
        if let Some(root) = lookup(ENV_REPO_ROOT) {
            self.gate.repo_root = PathBuf::from(root);
        }
        if let Some(ms) = lookup(ENV_POLL_INTERVAL_MS) {
            self.watchdog.poll_interval_ms = ms.trim().parse().map_err(|_| {
                CovenantError::Config(format!("{ENV_POLL_INTERVAL_MS} must be an integer, got '{ms}'"))
            })?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.ledger.file_name.trim().is_empty() {
            return Err(CovenantError::Config("ledger.file_name must not be empty".into()));
        }
        let positive = [
            ("ledger.io_timeout_ms", self.ledger.io_timeout_ms),
            ("watchdog.poll_interval_ms", self.watchdog.poll_interval_ms),
            ("watchdog.read_timeout_ms", self.watchdog.read_timeout_ms),
            ("watchdog.eval_timeout_ms", self.watchdog.eval_timeout_ms),
            ("gate.verifier_timeout_ms", self.gate.verifier_timeout_ms),
            ("gate.commit_timeout_ms", self.gate.commit_timeout_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(CovenantError::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.gate.max_line_length == 0 {
            return Err(CovenantError::Config("gate.max_line_length must be greater than zero".into()));
        }
        for (ext, argv) in &self.gate.external_checks {
            if argv.is_empty() {
                return Err(CovenantError::Config(format!(
                    "gate.external_checks.{ext} must name a program"
                )));
            }
        }
        Ok(())
    }

    /// Engine over `watchdog.rules_file`, or the standard table.
    pub fn engine(&self) -> Result<InvariantEngine> {
        let Some(path) = &self.watchdog.rules_file else {
            return InvariantEngine::standard();
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            CovenantError::Config(format!("cannot read rules {}: {e}", path.display()))
        })?;
        let table = RuleTable::from_toml_str(&text)?;
        if table.rules.is_empty() {
            return Err(CovenantError::Config(format!(
                "rules file {} defines no rules",
                path.display()
            )));
        }
        InvariantEngine::from_specs(&table.rules)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.ledger.data_dir.join(&self.ledger.file_name)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.ledger.data_dir.join(&self.watchdog.checkpoint_file)
    }

    pub fn staging_root(&self) -> PathBuf {
        self.gate
            .staging_dir
            .clone()
            .unwrap_or_else(|| self.ledger.data_dir.join("staging"))
    }

    pub fn cas_root(&self) -> PathBuf {
        self.ledger.data_dir.join("cas")
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger.io_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog.poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog.read_timeout_ms)
    }

    pub fn eval_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog.eval_timeout_ms)
    }

    pub fn verifier_timeout(&self) -> Duration {
        Duration::from_millis(self.gate.verifier_timeout_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.gate.commit_timeout_ms)
    }
}
