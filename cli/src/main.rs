//! readygate - container entrypoint.
//!
//! Waits for every configured dependency, runs one-time setup, then hands the
//! process over to the service command.
//!
//! ```text
//! main() -> resolve config -> Gate::prepare() -> handoff (exec | spawn)
//!                                   |
//!                          SIGINT/SIGTERM -> exit 128 + signo
//! ```
//!
//! # Exit codes
//!
//! - `1`: a dependency never became ready, a setup action failed, or the
//!   handoff target could not be launched
//! - `2`: invalid configuration or arguments
//! - `130` / `143`: interrupted before handoff
//! - in spawn mode, the target's own exit code

mod signals;

use std::env;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use readygate_config::{GateConfig, MaxAttempts, Overrides, ResolvedGate, standard_env_checks};
use readygate_core::{GateError, HandoffOutcome, ProcessLauncher, run_setup, wait_for};

use crate::signals::Shutdown;

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;

/// Log filter variable, checked before `RUST_LOG`.
const LOG_ENV: &str = "READYGATE_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "readygate",
    version,
    about = "Wait for dependencies, run setup, then hand off to the service"
)]
struct Cli {
    /// Config file [default: ./readygate.toml if present]
    #[arg(short, long, value_name = "PATH", env = "READYGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Add a TCP readiness check (repeatable)
    #[arg(long = "wait", value_name = "NAME=URL", value_parser = parse_wait)]
    waits: Vec<(String, String)>,

    /// Wait on POSTGRES_URL, REDIS_URL and RABBITMQ_URL when set
    #[arg(long)]
    wait_env: bool,

    /// Retry interval for checks that do not set their own
    #[arg(long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// Attempt budget for checks that do not set their own
    #[arg(long, value_name = "N|unbounded")]
    max_attempts: Option<MaxAttempts>,

    /// Run the target as a child and propagate its exit code
    #[arg(long)]
    spawn: bool,

    /// Stop after checks and setup
    #[arg(long)]
    check_only: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Handoff command, replacing the configured one
    #[arg(last = true, value_name = "COMMAND")]
    command: Vec<String>,
}

fn parse_wait(raw: &str) -> Result<(String, String), String> {
    let (name, url) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=URL, got `{raw}`"))?;
    let (name, url) = (name.trim(), url.trim());
    if name.is_empty() || url.is_empty() {
        return Err(format!("expected NAME=URL, got `{raw}`"));
    }
    Ok((name.to_string(), url.to_string()))
}

fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let env_filter = env::var(LOG_ENV)
        .or_else(|_| env::var(EnvFilter::DEFAULT_ENV))
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal()),
        )
        .with(env_filter)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start runtime: {err}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    ExitCode::from(runtime.block_on(run(cli)))
}

async fn run(cli: Cli) -> u8 {
    let resolved = match resolve(&cli) {
        Ok(resolved) => resolved,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return EXIT_USAGE;
        }
    };

    let mut shutdown = match Shutdown::install() {
        Ok(shutdown) => shutdown,
        Err(err) => {
            eprintln!("Error: failed to install signal handlers: {err}");
            return EXIT_FAILURE;
        }
    };

    if cli.check_only {
        let result = tokio::select! {
            biased;
            signo = shutdown.recv() => return interrupted(signo),
            result = check_and_setup(&resolved) => result,
        };
        return match result {
            Ok(()) => {
                tracing::info!("Checks and setup complete");
                0
            }
            Err(err) => fail(&err),
        };
    }

    let mut gate = match resolved.into_gate() {
        Ok(gate) => gate,
        Err(err) => {
            eprintln!("Error: {err}");
            return EXIT_USAGE;
        }
    };

    let prepared = tokio::select! {
        biased;
        signo = shutdown.recv() => return interrupted(signo),
        result = gate.prepare() => result,
    };
    if let Err(err) = prepared {
        return fail(&err);
    }
    // A signal drained in the same tick that prepare finished is only
    // buffered in `shutdown`.
    if let Some(signo) = shutdown.pending().await {
        return interrupted(signo);
    }

    // `shutdown` stays registered until the launch; spawn mode adds its own
    // forwarding streams before the next poll of the signal driver.
    match gate.handoff(&ProcessLauncher).await {
        Ok(HandoffOutcome::Exited(code)) => u8::try_from(code).unwrap_or(EXIT_FAILURE),
        Err(err) => fail(&err),
    }
}

fn resolve(cli: &Cli) -> Result<ResolvedGate> {
    let config = GateConfig::discover(cli.config.as_deref())
        .context("failed to load configuration")?
        .unwrap_or_default();

    let mut extra_checks = cli.waits.clone();
    if cli.wait_env {
        let found = standard_env_checks(|var| env::var(var).ok());
        if found.is_empty() {
            tracing::warn!("--wait-env given but none of POSTGRES_URL, REDIS_URL, RABBITMQ_URL is set");
        }
        extra_checks.extend(found);
    }

    let overrides = Overrides {
        extra_checks,
        interval: cli.interval_ms.map(Duration::from_millis),
        max_attempts: cli.max_attempts,
        handoff_command: cli.command.clone(),
        spawn: cli.spawn,
    };
    config
        .resolve(&overrides)
        .context("invalid configuration")
}

async fn check_and_setup(resolved: &ResolvedGate) -> Result<(), GateError> {
    for check in &resolved.checks {
        wait_for(check).await?;
    }
    run_setup(&resolved.actions).await?;
    Ok(())
}

fn fail(err: &GateError) -> u8 {
    tracing::error!("{err}");
    eprintln!("Error: {err}");
    EXIT_FAILURE
}

fn interrupted(signo: i32) -> u8 {
    tracing::warn!(signal = signo, "Interrupted before handoff");
    u8::try_from(128 + signo).unwrap_or(EXIT_FAILURE)
}
