//! Handoff to the long-running service process.
//!
//! In [`HandoffMode::Exec`] the gate's process image is replaced: the target
//! inherits the pid, signal dispositions and standard streams, and no gate code
//! runs afterwards. [`HandoffMode::Spawn`] runs the target as a child, forwards
//! SIGINT/SIGTERM to it, and reports its exit code unchanged.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::ExitStatus;

use crate::errors::HandoffError;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum HandoffSpecError {
    #[error("handoff command must not be empty")]
    EmptyCommand,
    #[error("handoff program name must not be blank")]
    BlankProgram,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandoffMode {
    #[default]
    Exec,
    Spawn,
}

impl fmt::Display for HandoffMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exec => "exec",
            Self::Spawn => "spawn",
        })
    }
}

/// The final process to run.
///
/// Invariant: `command` is non-empty and its first element is not blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffSpec {
    command: Vec<String>,
    env: BTreeMap<String, String>,
    mode: HandoffMode,
}

impl HandoffSpec {
    pub fn new(command: Vec<String>) -> Result<Self, HandoffSpecError> {
        let Some(program) = command.first() else {
            return Err(HandoffSpecError::EmptyCommand);
        };
        if program.trim().is_empty() {
            return Err(HandoffSpecError::BlankProgram);
        }
        Ok(Self {
            command,
            env: BTreeMap::new(),
            mode: HandoffMode::default(),
        })
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_mode(mut self, mode: HandoffMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.command[0]
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.command[1..]
    }

    #[must_use]
    pub fn command(&self) -> &[String] {
        &self.command
    }

    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    #[must_use]
    pub fn mode(&self) -> HandoffMode {
        self.mode
    }
}

/// Result of a handoff that returned control to the gate.
///
/// A successful exec never produces one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffOutcome {
    Exited(i32),
}

pub type LaunchFut<'a> =
    Pin<Box<dyn Future<Output = Result<HandoffOutcome, HandoffError>> + Send + 'a>>;

pub trait Launcher {
    fn launch<'a>(&'a self, spec: &'a HandoffSpec) -> LaunchFut<'a>;
}

/// Launches real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch<'a>(&'a self, spec: &'a HandoffSpec) -> LaunchFut<'a> {
        Box::pin(async move {
            let program = resolve_program(spec)?;
            match spec.mode() {
                #[cfg(unix)]
                HandoffMode::Exec => exec_replace(&program, spec),
                #[cfg(not(unix))]
                HandoffMode::Exec => {
                    tracing::debug!("process replacement unavailable; spawning instead");
                    spawn_and_wait(&program, spec).await
                }
                HandoffMode::Spawn => spawn_and_wait(&program, spec).await,
            }
        })
    }
}

fn launch_error(spec: &HandoffSpec, cause: io::Error) -> HandoffError {
    HandoffError {
        program: spec.program().to_string(),
        cause,
    }
}

/// Resolves the program against `PATH` (the one in the handoff env, if set)
/// so a missing binary is reported before anything is replaced.
fn resolve_program(spec: &HandoffSpec) -> Result<PathBuf, HandoffError> {
    let resolved = match spec.env().get("PATH") {
        Some(path) => {
            let cwd = std::env::current_dir().map_err(|e| launch_error(spec, e))?;
            which::which_in(spec.program(), Some(path), cwd)
        }
        None => which::which(spec.program()),
    };
    resolved.map_err(|e| launch_error(spec, io::Error::new(io::ErrorKind::NotFound, e)))
}

#[cfg(unix)]
fn exec_replace(program: &Path, spec: &HandoffSpec) -> Result<HandoffOutcome, HandoffError> {
    use std::os::unix::process::CommandExt;

    let mut command = std::process::Command::new(program);
    command.arg0(spec.program()).args(spec.args()).envs(spec.env());
    // Only returns on failure.
    let cause = command.exec();
    Err(launch_error(spec, cause))
}

async fn spawn_and_wait(
    program: &Path,
    spec: &HandoffSpec,
) -> Result<HandoffOutcome, HandoffError> {
    let mut child = tokio::process::Command::new(program)
        .args(spec.args())
        .envs(spec.env())
        .spawn()
        .map_err(|e| launch_error(spec, e))?;

    let status = wait_forwarding_signals(&mut child)
        .await
        .map_err(|e| launch_error(spec, e))?;
    let code = exit_code(status);
    tracing::info!(program = spec.program(), code, "Handoff target exited");
    Ok(HandoffOutcome::Exited(code))
}

#[cfg(unix)]
async fn wait_forwarding_signals(child: &mut tokio::process::Child) -> io::Result<ExitStatus> {
    use tokio::signal::unix::{SignalKind, signal};

    let pid = child.id();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    loop {
        tokio::select! {
            status = child.wait() => return status,
            _ = sigterm.recv() => forward_signal(pid, libc::SIGTERM),
            _ = sigint.recv() => forward_signal(pid, libc::SIGINT),
        }
    }
}

#[cfg(not(unix))]
async fn wait_forwarding_signals(child: &mut tokio::process::Child) -> io::Result<ExitStatus> {
    child.wait().await
}

#[cfg(unix)]
fn forward_signal(pid: Option<u32>, signo: libc::c_int) {
    let Some(pid) = pid else {
        return;
    };
    tracing::info!(pid, signal = signo, "Forwarding signal to handoff target");
    // SAFETY: kill(2) on the pid of a child we spawned and have not reaped yet.
    if unsafe { libc::kill(pid as libc::pid_t, signo) } == -1 {
        tracing::warn!(pid, "Failed to forward signal: {}", io::Error::last_os_error());
    }
}

/// Shell convention: a child killed by signal N reports 128 + N.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .or_else(|| status.signal().map(|signo| 128 + signo))
            .unwrap_or(1)
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(1)
    }
}
