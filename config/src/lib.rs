//! Gate configuration: TOML file model, loading, and resolution.
//!
//! The raw structs here mirror the file format (`Option` fields, flat
//! per-kind tables). [`GateConfig::resolve`] validates them, expands `${VAR}`
//! references, and produces the strict core types; nothing downstream sees an
//! unvalidated value.

mod env;
mod resolve;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use readygate_core::{AttemptBudget, HandoffMode, HandoffSpecError};
use readygate_probes::{BindingSpec, ExchangeSpec, QueueSpec, Topology};
use serde::Deserialize;

pub use env::{expand_env_vars, expand_with};
pub use resolve::{Overrides, ResolvedGate, STANDARD_DEPENDENCIES, standard_env_checks};

/// Looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "readygate.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("check `{name}`: {message}")]
    Check { name: String, message: String },
    #[error("setup action `{name}`: {message}")]
    Setup { name: String, message: String },
    #[error("duplicate check name `{0}`")]
    DuplicateCheck(String),
    #[error("duplicate setup action name `{0}`")]
    DuplicateSetup(String),
    #[error("invalid handoff: {0}")]
    Handoff(#[from] HandoffSpecError),
    #[error("no handoff command: set [handoff].command or pass one after `--`")]
    MissingHandoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetKeyword {
    Unbounded,
}

/// `max_attempts = 5` or `max_attempts = "unbounded"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MaxAttempts {
    Count(u32),
    Keyword(BudgetKeyword),
}

impl MaxAttempts {
    /// `None` for a zero count.
    #[must_use]
    pub fn budget(self) -> Option<AttemptBudget> {
        match self {
            Self::Count(n) => AttemptBudget::bounded(n),
            Self::Keyword(BudgetKeyword::Unbounded) => Some(AttemptBudget::Unbounded),
        }
    }
}

impl FromStr for MaxAttempts {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("unbounded") {
            return Ok(Self::Keyword(BudgetKeyword::Unbounded));
        }
        match trimmed.parse::<u32>() {
            Ok(0) => Err("max attempts must be at least 1".to_string()),
            Ok(n) => Ok(Self::Count(n)),
            Err(_) => Err(format!("expected a positive integer or `unbounded`, got `{s}`")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    pub interval_ms: Option<u64>,
    pub max_attempts: Option<MaxAttempts>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckKind {
    Tcp,
    Http,
    Command,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "tcp",
            Self::Http => "http",
            Self::Command => "command",
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckConfig {
    pub name: String,
    pub kind: CheckKind,
    /// Required for `tcp` and `http`.
    pub url: Option<String>,
    /// Required for `command`.
    pub command: Option<Vec<String>>,
    pub interval_ms: Option<u64>,
    pub max_attempts: Option<MaxAttempts>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SetupKind {
    RabbitmqTopology,
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopologyPreset {
    EventPipeline,
}

impl TopologyPreset {
    #[must_use]
    pub fn topology(self) -> Topology {
        match self {
            Self::EventPipeline => Topology::event_pipeline(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupConfig {
    pub name: String,
    pub kind: SetupKind,

    // rabbitmq-topology
    pub management_url: Option<String>,
    pub vhost: Option<String>,
    pub preset: Option<TopologyPreset>,
    #[serde(default)]
    pub exchanges: Vec<ExchangeSpec>,
    #[serde(default)]
    pub queues: Vec<QueueSpec>,
    #[serde(default)]
    pub bindings: Vec<BindingSpec>,

    // command
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeConfig {
    Exec,
    Spawn,
}

impl From<ModeConfig> for HandoffMode {
    fn from(mode: ModeConfig) -> Self {
        match mode {
            ModeConfig::Exec => HandoffMode::Exec,
            ModeConfig::Spawn => HandoffMode::Spawn,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandoffConfig {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub mode: Option<ModeConfig>,
}

/// The config file as written.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default, rename = "check")]
    pub checks: Vec<CheckConfig>,
    #[serde(default, rename = "setup")]
    pub setup: Vec<SetupConfig>,
    pub handoff: Option<HandoffConfig>,
}

impl GateConfig {
    /// `origin` only labels parse errors.
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content, path)?;
        tracing::debug!(
            path = %path.display(),
            checks = config.checks.len(),
            setup = config.setup.len(),
            "Loaded config"
        );
        Ok(config)
    }

    /// Loads `explicit` if given (it must exist), otherwise
    /// [`DEFAULT_CONFIG_FILE`] in the working directory if present.
    pub fn discover(explicit: Option<&Path>) -> Result<Option<Self>, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path).map(Some);
        }
        let fallback = Path::new(DEFAULT_CONFIG_FILE);
        if fallback.is_file() {
            return Self::load(fallback).map(Some);
        }
        Ok(None)
    }
}
