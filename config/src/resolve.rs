//! Validation and conversion of a [`GateConfig`] into runnable core types.

use std::collections::{BTreeMap, HashSet};
use std::env;
use std::time::Duration;

use readygate_core::{
    AttemptBudget, DependencyCheck, Gate, HandoffMode, HandoffSpec, SetupAction,
};
use readygate_probes::{CommandAction, CommandProbe, HttpProbe, TcpProbe, Topology, TopologyAction};

use crate::env::expand_with;
use crate::{CheckConfig, CheckKind, ConfigError, GateConfig, MaxAttempts, SetupConfig, SetupKind};

/// Dependencies waited on by `--wait-env`, as `(check name, variable)`.
pub const STANDARD_DEPENDENCIES: [(&str, &str); 3] = [
    ("postgres", "POSTGRES_URL"),
    ("redis", "REDIS_URL"),
    ("rabbitmq", "RABBITMQ_URL"),
];

/// TCP checks for every standard dependency whose variable is set and
/// non-empty. Returns `(name, url)` pairs in a fixed order.
pub fn standard_env_checks<F>(lookup: F) -> Vec<(String, String)>
where
    F: Fn(&str) -> Option<String>,
{
    STANDARD_DEPENDENCIES
        .iter()
        .filter_map(|(name, var)| {
            let url = lookup(var)?;
            let url = url.trim();
            (!url.is_empty()).then(|| ((*name).to_string(), url.to_string()))
        })
        .collect()
}

/// Command-line values layered over the file.
///
/// `interval` and `max_attempts` replace `[defaults]`; a check that sets its
/// own value keeps it.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Extra TCP checks as `(name, url)`, appended after the file's checks.
    pub extra_checks: Vec<(String, String)>,
    pub interval: Option<Duration>,
    pub max_attempts: Option<MaxAttempts>,
    /// Replaces `[handoff].command` when non-empty.
    pub handoff_command: Vec<String>,
    pub spawn: bool,
}

/// Validated checks, setup actions, and the optional handoff.
#[derive(Debug)]
pub struct ResolvedGate {
    pub checks: Vec<DependencyCheck>,
    pub actions: Vec<SetupAction>,
    pub handoff: Option<HandoffSpec>,
}

impl ResolvedGate {
    pub fn into_gate(self) -> Result<Gate, ConfigError> {
        let handoff = self.handoff.ok_or(ConfigError::MissingHandoff)?;
        Ok(Gate::new(self.checks, self.actions, handoff))
    }
}

struct CheckDefaults {
    interval: Duration,
    budget: AttemptBudget,
    timeout: Duration,
}

impl GateConfig {
    pub fn resolve(self, overrides: &Overrides) -> Result<ResolvedGate, ConfigError> {
        self.resolve_with(overrides, |name| env::var(name).ok())
    }

    /// Like [`GateConfig::resolve`] with `${VAR}` values taken from `lookup`.
    pub fn resolve_with<F>(self, overrides: &Overrides, lookup: F) -> Result<ResolvedGate, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let expand = |value: &str| expand_with(value, &lookup);

        let defaults = CheckDefaults {
            interval: overrides
                .interval
                .or(self.defaults.interval_ms.map(Duration::from_millis))
                .unwrap_or(DependencyCheck::DEFAULT_RETRY_INTERVAL),
            budget: match overrides.max_attempts.or(self.defaults.max_attempts) {
                Some(max) => max.budget().ok_or_else(|| ConfigError::Check {
                    name: "[defaults]".to_string(),
                    message: "max_attempts must be at least 1".to_string(),
                })?,
                None => AttemptBudget::DEFAULT,
            },
            timeout: match self.defaults.timeout_ms {
                Some(0) => {
                    return Err(ConfigError::Check {
                        name: "[defaults]".to_string(),
                        message: "timeout_ms must be greater than 0".to_string(),
                    });
                }
                Some(ms) => Duration::from_millis(ms),
                None => DependencyCheck::DEFAULT_ATTEMPT_TIMEOUT,
            },
        };

        let mut seen = HashSet::new();
        let mut checks = Vec::with_capacity(self.checks.len() + overrides.extra_checks.len());
        for raw in self.checks {
            let check = resolve_check(raw, &defaults, &expand)?;
            if !seen.insert(check.name().to_string()) {
                return Err(ConfigError::DuplicateCheck(check.name().to_string()));
            }
            checks.push(check);
        }
        for (name, url) in &overrides.extra_checks {
            let raw = CheckConfig {
                name: name.clone(),
                kind: CheckKind::Tcp,
                url: Some(url.clone()),
                command: None,
                interval_ms: None,
                max_attempts: None,
                timeout_ms: None,
            };
            let check = resolve_check(raw, &defaults, &expand)?;
            if !seen.insert(check.name().to_string()) {
                return Err(ConfigError::DuplicateCheck(check.name().to_string()));
            }
            checks.push(check);
        }

        let mut seen = HashSet::new();
        let mut actions = Vec::with_capacity(self.setup.len());
        for raw in self.setup {
            let action = resolve_setup(raw, &expand)?;
            if !seen.insert(action.name().to_string()) {
                return Err(ConfigError::DuplicateSetup(action.name().to_string()));
            }
            actions.push(action);
        }

        let handoff = resolve_handoff(self.handoff, overrides, &expand)?;

        Ok(ResolvedGate {
            checks,
            actions,
            handoff,
        })
    }
}

fn resolve_check(
    raw: CheckConfig,
    defaults: &CheckDefaults,
    expand: &dyn Fn(&str) -> String,
) -> Result<DependencyCheck, ConfigError> {
    let name = raw.name.trim().to_string();
    let invalid = |message: String| ConfigError::Check {
        name: if name.is_empty() { "<unnamed>".to_string() } else { name.clone() },
        message,
    };
    if name.is_empty() {
        return Err(invalid("name must not be empty".to_string()));
    }

    let check = match raw.kind {
        CheckKind::Tcp | CheckKind::Http => {
            if raw.command.is_some() {
                return Err(invalid(format!("`command` is not valid for kind = \"{}\"", raw.kind)));
            }
            let url = required_url(raw.url.as_deref(), expand).map_err(&invalid)?;
            if raw.kind == CheckKind::Tcp {
                let probe = TcpProbe::from_url(&url).map_err(|e| invalid(e.to_string()))?;
                DependencyCheck::new(name.clone(), probe)
            } else {
                let probe = HttpProbe::new(&url).map_err(|e| invalid(e.to_string()))?;
                DependencyCheck::new(name.clone(), probe)
            }
        }
        CheckKind::Command => {
            if raw.url.is_some() {
                return Err(invalid("`url` is not valid for kind = \"command\"".to_string()));
            }
            let argv = raw
                .command
                .ok_or_else(|| invalid("`command` is required for kind = \"command\"".to_string()))?;
            let argv = argv.iter().map(|arg| expand(arg)).collect();
            let probe = CommandProbe::new(argv).map_err(|e| invalid(e.to_string()))?;
            DependencyCheck::new(name.clone(), probe)
        }
    };

    let budget = match raw.max_attempts {
        Some(max) => max
            .budget()
            .ok_or_else(|| invalid("max_attempts must be at least 1".to_string()))?,
        None => defaults.budget,
    };
    let timeout = match raw.timeout_ms {
        Some(0) => return Err(invalid("timeout_ms must be greater than 0".to_string())),
        Some(ms) => Duration::from_millis(ms),
        None => defaults.timeout,
    };

    Ok(check
        .with_retry_interval(raw.interval_ms.map_or(defaults.interval, Duration::from_millis))
        .with_max_attempts(budget)
        .with_attempt_timeout(timeout))
}

fn required_url(raw: Option<&str>, expand: &dyn Fn(&str) -> String) -> Result<String, String> {
    let raw = raw.ok_or_else(|| "`url` is required".to_string())?;
    let url = expand(raw).trim().to_string();
    if url.is_empty() {
        return Err(format!("`{raw}` expanded to an empty string"));
    }
    Ok(url)
}

fn resolve_setup(
    raw: SetupConfig,
    expand: &dyn Fn(&str) -> String,
) -> Result<SetupAction, ConfigError> {
    let name = raw.name.trim().to_string();
    let invalid = |message: String| ConfigError::Setup {
        name: if name.is_empty() { "<unnamed>".to_string() } else { name.clone() },
        message,
    };
    if name.is_empty() {
        return Err(invalid("name must not be empty".to_string()));
    }

    match raw.kind {
        SetupKind::RabbitmqTopology => {
            if raw.command.is_some() {
                return Err(invalid(
                    "`command` is not valid for kind = \"rabbitmq-topology\"".to_string(),
                ));
            }
            let url = required_url(raw.management_url.as_deref(), expand)
                .map_err(|message| invalid(message.replace("`url`", "`management_url`")))?;
            let vhost = raw.vhost.map_or_else(|| "/".to_string(), |v| expand(&v));

            let mut topology = raw.preset.map(|p| p.topology()).unwrap_or_default();
            topology.exchanges.extend(raw.exchanges);
            topology.queues.extend(raw.queues);
            topology.bindings.extend(raw.bindings);
            check_topology(&topology).map_err(&invalid)?;

            let action =
                TopologyAction::new(&url, vhost, topology).map_err(|e| invalid(e.to_string()))?;
            Ok(SetupAction::new(name.clone(), action))
        }
        SetupKind::Command => {
            if raw.management_url.is_some() || raw.preset.is_some() {
                return Err(invalid(
                    "broker fields are not valid for kind = \"command\"".to_string(),
                ));
            }
            let argv = raw
                .command
                .ok_or_else(|| invalid("`command` is required for kind = \"command\"".to_string()))?;
            let argv = argv.iter().map(|arg| expand(arg)).collect();
            let mut action = CommandAction::new(argv)
                .map_err(|e| invalid(e.to_string()))?
                .with_env(expand_env_map(&raw.env, expand));
            match raw.timeout_ms {
                Some(0) => return Err(invalid("timeout_ms must be greater than 0".to_string())),
                Some(ms) => action = action.with_timeout(Duration::from_millis(ms)),
                None => {}
            }
            Ok(SetupAction::new(name.clone(), action))
        }
    }
}

fn check_topology(topology: &Topology) -> Result<(), String> {
    if topology.is_empty() {
        return Err("declares no exchanges, queues, or bindings".to_string());
    }
    if let Some(exchange) = topology.exchanges.iter().find(|e| e.name.trim().is_empty()) {
        return Err(format!("exchange of type `{}` has an empty name", exchange.kind));
    }
    if topology.queues.iter().any(|q| q.name.trim().is_empty()) {
        return Err("queue has an empty name".to_string());
    }
    Ok(())
}

fn resolve_handoff(
    raw: Option<crate::HandoffConfig>,
    overrides: &Overrides,
    expand: &dyn Fn(&str) -> String,
) -> Result<Option<HandoffSpec>, ConfigError> {
    let (file_command, env, file_mode) = match raw {
        // A table with only `env` or `mode` is fine until a gate is built.
        Some(handoff) if handoff.command.is_empty() && overrides.handoff_command.is_empty() => {
            return Ok(None);
        }
        Some(handoff) => (handoff.command, handoff.env, handoff.mode),
        None if overrides.handoff_command.is_empty() => return Ok(None),
        None => (Vec::new(), BTreeMap::new(), None),
    };

    // Arguments given on the command line are taken verbatim.
    let command = if overrides.handoff_command.is_empty() {
        file_command.iter().map(|arg| expand(arg)).collect()
    } else {
        overrides.handoff_command.clone()
    };
    let mode = if overrides.spawn {
        HandoffMode::Spawn
    } else {
        file_mode.map_or(HandoffMode::Exec, HandoffMode::from)
    };

    Ok(Some(
        HandoffSpec::new(command)?
            .with_env(expand_env_map(&env, expand))
            .with_mode(mode),
    ))
}

fn expand_env_map(
    env: &BTreeMap<String, String>,
    expand: &dyn Fn(&str) -> String,
) -> BTreeMap<String, String> {
    env.iter()
        .map(|(key, value)| (key.clone(), expand(value)))
        .collect()
}
