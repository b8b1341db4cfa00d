//! Readiness gate core.
//!
//! Sequences a container entrypoint: wait until every dependency answers its
//! probe, run idempotent setup actions once, then hand off to the service
//! process. This crate holds the state machine and the seams ([`Probe`],
//! [`Action`], [`Launcher`]); concrete probes and actions live in
//! `readygate-probes`, configuration in `readygate-config`.

pub mod check;
pub mod errors;
pub mod gate;
pub mod handoff;
pub mod setup;

pub use check::{AttemptBudget, DependencyCheck, FnProbe, Probe, ProbeError, ProbeFut};
pub use errors::{GateError, HandoffError, SetupError, TimeoutError};
pub use gate::{Gate, GatePhase, handoff, run_setup, wait_for};
pub use handoff::{
    HandoffMode, HandoffOutcome, HandoffSpec, HandoffSpecError, LaunchFut, Launcher,
    ProcessLauncher, exit_code,
};
pub use setup::{Action, ActionError, ActionFut, FnAction, SetupAction};
