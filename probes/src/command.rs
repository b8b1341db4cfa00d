//! Command-backed probe and setup action.
//!
//! A command probe is ready when the command exits 0 (`pg_isready`,
//! `redis-cli ping`). A command action fails on any non-zero exit; the exit
//! status is always checked explicitly.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use readygate_core::{Action, ActionError, ActionFut, Probe, ProbeError, ProbeFut, exit_code};
use tokio::io::AsyncReadExt;

use crate::process::{ChildGuard, command_for};

/// Lines of captured stderr kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("command must not be empty")]
pub struct EmptyCommand;

fn validate(argv: Vec<String>) -> Result<Vec<String>, EmptyCommand> {
    match argv.first() {
        Some(program) if !program.trim().is_empty() => Ok(argv),
        _ => Err(EmptyCommand),
    }
}

#[derive(Debug, Clone)]
pub struct CommandProbe {
    argv: Vec<String>,
}

impl CommandProbe {
    pub fn new(argv: Vec<String>) -> Result<Self, EmptyCommand> {
        validate(argv).map(|argv| Self { argv })
    }
}

impl Probe for CommandProbe {
    fn describe(&self) -> String {
        format!("command `{}`", self.argv.join(" "))
    }

    fn probe(&self) -> ProbeFut<'_> {
        Box::pin(async move {
            let program = self.argv[0].clone();
            let mut command = command_for(&self.argv).map_err(|source| ProbeError::Spawn {
                program: program.clone(),
                source,
            })?;
            command
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());

            let child = command.spawn().map_err(|source| ProbeError::Spawn {
                program: program.clone(),
                source,
            })?;
            let mut guard = ChildGuard::new(child);
            let status = guard
                .child_mut()
                .wait()
                .await
                .map_err(|source| ProbeError::Spawn {
                    program: program.clone(),
                    source,
                })?;
            guard.disarm();

            if status.success() {
                Ok(())
            } else {
                Err(ProbeError::Exited {
                    program,
                    code: Some(exit_code(status)),
                })
            }
        })
    }
}

/// Runs a command once; stdout is inherited, stderr is captured for diagnostics.
#[derive(Debug, Clone)]
pub struct CommandAction {
    argv: Vec<String>,
    env: BTreeMap<String, String>,
    timeout: Duration,
}

impl CommandAction {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    pub fn new(argv: Vec<String>) -> Result<Self, EmptyCommand> {
        validate(argv).map(|argv| Self {
            argv,
            env: BTreeMap::new(),
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn execute(&self) -> Result<(), ActionError> {
        let program = self.argv[0].clone();
        let spawn_error = |source| ActionError::Spawn {
            program: program.clone(),
            source,
        };

        let mut command = command_for(&self.argv).map_err(spawn_error)?;
        command
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped());

        let child = command.spawn().map_err(spawn_error)?;
        let mut guard = ChildGuard::new(child);
        let mut stderr_pipe = guard.child_mut().stderr.take();

        let run = async {
            let mut captured = Vec::new();
            let read = async {
                if let Some(pipe) = stderr_pipe.as_mut() {
                    let _ = pipe.read_to_end(&mut captured).await;
                }
            };
            let (status, ()) = tokio::join!(guard.child_mut().wait(), read);
            status.map(|status| (status, captured))
        };

        let (status, captured) = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result.map_err(spawn_error)?,
            Err(_) => {
                return Err(ActionError::TimedOut {
                    program,
                    elapsed: self.timeout,
                });
            }
        };
        guard.disarm();

        let stderr = String::from_utf8_lossy(&captured);
        if status.success() {
            if !stderr.trim().is_empty() {
                tracing::debug!(program = %program, "stderr: {}", stderr.trim());
            }
            return Ok(());
        }
        Err(ActionError::CommandFailed {
            program,
            code: Some(exit_code(status)),
            stderr: tail_lines(&stderr, STDERR_TAIL_LINES),
        })
    }
}

impl Action for CommandAction {
    fn run(&self) -> ActionFut<'_> {
        Box::pin(self.execute())
    }
}

fn tail_lines(text: &str, keep: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(keep);
    lines[start..].join("\n")
}
