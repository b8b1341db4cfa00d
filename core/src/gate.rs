//! The readiness gate: wait for every dependency, run setup, hand off.
//!
//! ```text
//! Waiting(0) -> Waiting(1) -> ... -> Setup -> Ready -> HandedOff
//!      \              \               \          \
//!       +--------------+---------------+----------+--> Failed
//! ```
//!
//! Everything is sequential: one probe in flight at a time, one setup action
//! at a time. Each step gates the next.

use std::fmt;

use crate::check::{DependencyCheck, ProbeError};
use crate::errors::{GateError, HandoffError, SetupError, TimeoutError};
use crate::handoff::{HandoffOutcome, HandoffSpec, Launcher};
use crate::setup::SetupAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    /// Waiting on the check at this index.
    Waiting(usize),
    Setup,
    /// Every check passed and setup succeeded; handoff not yet attempted.
    Ready,
    HandedOff,
    Failed,
}

impl GatePhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::HandedOff | Self::Failed)
    }
}

impl fmt::Display for GatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting(index) => write!(f, "waiting({index})"),
            Self::Setup => f.write_str("setup"),
            Self::Ready => f.write_str("ready"),
            Self::HandedOff => f.write_str("handed-off"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Polls `check` until its probe succeeds or the attempt budget runs out.
///
/// Sleeps `retry_interval` between attempts, never after the last one. Each
/// attempt is bounded by the check's attempt timeout.
pub async fn wait_for(check: &DependencyCheck) -> Result<(), TimeoutError> {
    let budget = check.max_attempts();
    let target = check.probe().describe();
    let mut attempt: u32 = 0;

    loop {
        attempt = attempt.saturating_add(1);
        tracing::info!(
            dependency = check.name(),
            target = %target,
            attempt,
            max_attempts = %budget,
            "Waiting for dependency"
        );

        let result = match tokio::time::timeout(check.attempt_timeout(), check.probe().probe())
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ProbeError::TimedOut {
                elapsed: check.attempt_timeout(),
            }),
        };

        match result {
            Ok(()) => {
                tracing::info!(dependency = check.name(), attempts = attempt, "Dependency ready");
                return Ok(());
            }
            Err(err) if budget.is_exhausted_at(attempt) => {
                return Err(TimeoutError {
                    name: check.name().to_string(),
                    attempts: attempt,
                    last_error: err,
                });
            }
            Err(err) => {
                tracing::info!(
                    dependency = check.name(),
                    attempt,
                    retry_in_ms = check.retry_interval().as_millis() as u64,
                    "Dependency not ready: {err}"
                );
                tokio::time::sleep(check.retry_interval()).await;
            }
        }
    }
}

/// Runs `actions` in order, stopping at the first failure.
pub async fn run_setup(actions: &[SetupAction]) -> Result<(), SetupError> {
    for action in actions {
        tracing::info!(action = action.name(), "Running setup action");
        action.run().await.map_err(|cause| SetupError {
            action: action.name().to_string(),
            cause,
        })?;
        tracing::info!(action = action.name(), "Setup action complete");
    }
    Ok(())
}

/// Transfers control to the handoff target.
///
/// With a real launcher in exec mode this only returns on failure.
pub async fn handoff<L: Launcher>(
    launcher: &L,
    spec: &HandoffSpec,
) -> Result<HandoffOutcome, HandoffError> {
    tracing::info!(
        program = spec.program(),
        args = ?spec.args(),
        mode = %spec.mode(),
        "Handing off"
    );
    launcher.launch(spec).await
}

/// One-shot gate built from static configuration.
#[derive(Debug)]
pub struct Gate {
    checks: Vec<DependencyCheck>,
    actions: Vec<SetupAction>,
    handoff: HandoffSpec,
    phase: GatePhase,
}

impl Gate {
    #[must_use]
    pub fn new(
        checks: Vec<DependencyCheck>,
        actions: Vec<SetupAction>,
        handoff: HandoffSpec,
    ) -> Self {
        Self {
            checks,
            actions,
            handoff,
            phase: GatePhase::Waiting(0),
        }
    }

    #[must_use]
    pub fn phase(&self) -> GatePhase {
        self.phase
    }

    #[must_use]
    pub fn checks(&self) -> &[DependencyCheck] {
        &self.checks
    }

    #[must_use]
    pub fn actions(&self) -> &[SetupAction] {
        &self.actions
    }

    #[must_use]
    pub fn handoff_spec(&self) -> &HandoffSpec {
        &self.handoff
    }

    /// Waits for every check in order, then runs setup.
    ///
    /// Leaves the gate in [`GatePhase::Ready`] on success.
    pub async fn prepare(&mut self) -> Result<(), GateError> {
        match self.phase {
            GatePhase::Ready => return Ok(()),
            phase if phase.is_terminal() => return Err(GateError::Finished(phase)),
            _ => {}
        }

        for index in 0..self.checks.len() {
            self.phase = GatePhase::Waiting(index);
            if let Err(err) = wait_for(&self.checks[index]).await {
                self.phase = GatePhase::Failed;
                return Err(err.into());
            }
        }

        self.phase = GatePhase::Setup;
        if let Err(err) = run_setup(&self.actions).await {
            self.phase = GatePhase::Failed;
            return Err(err.into());
        }

        self.phase = GatePhase::Ready;
        Ok(())
    }

    /// Hands off to the target. Requires a successful [`Gate::prepare`];
    /// any other phase is refused without launching.
    pub async fn handoff<L: Launcher>(&mut self, launcher: &L) -> Result<HandoffOutcome, GateError> {
        match self.phase {
            GatePhase::Ready => {}
            phase if phase.is_terminal() => return Err(GateError::Finished(phase)),
            phase => return Err(GateError::NotReady(phase)),
        }
        self.phase = GatePhase::HandedOff;
        match handoff(launcher, &self.handoff).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.phase = GatePhase::Failed;
                Err(err.into())
            }
        }
    }

    /// `prepare` followed by `handoff`.
    pub async fn run<L: Launcher>(&mut self, launcher: &L) -> Result<HandoffOutcome, GateError> {
        self.prepare().await?;
        self.handoff(launcher).await
    }
}
