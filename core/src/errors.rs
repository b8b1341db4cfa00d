//! Gate failure taxonomy.
//!
//! Every variant is fatal to the run. The binary prints the phase-labelled
//! message and exits non-zero.

use crate::check::ProbeError;
use crate::gate::GatePhase;
use crate::setup::ActionError;

/// A dependency never became ready within its attempt budget.
#[derive(Debug, thiserror::Error)]
#[error("dependency `{name}` not ready after {attempts} attempts: {last_error}")]
pub struct TimeoutError {
    pub name: String,
    pub attempts: u32,
    #[source]
    pub last_error: ProbeError,
}

/// A setup action failed; the remaining actions were not attempted.
#[derive(Debug, thiserror::Error)]
#[error("setup action `{action}` failed: {cause}")]
pub struct SetupError {
    pub action: String,
    #[source]
    pub cause: ActionError,
}

/// The handoff target could not be started.
#[derive(Debug, thiserror::Error)]
#[error("cannot start `{program}`: {cause}")]
pub struct HandoffError {
    pub program: String,
    #[source]
    pub cause: std::io::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("[wait] {0}")]
    Timeout(#[from] TimeoutError),
    #[error("[setup] {0}")]
    Setup(#[from] SetupError),
    #[error("[handoff] {0}")]
    Handoff(#[from] HandoffError),
    /// The gate already reached a terminal phase; it runs at most once.
    #[error("[gate] already {0}")]
    Finished(GatePhase),
    /// Handoff attempted before checks and setup completed.
    #[error("[handoff] gate is {0}, not ready")]
    NotReady(GatePhase),
}
