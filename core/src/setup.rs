//! One-time setup actions run after every dependency is ready.
//!
//! Actions must be idempotent against their target system: the whole gate may
//! be re-run after a crash, and a repeated action must converge to the same
//! end state. The gate does not enforce this.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Setup action execution future type alias.
pub type ActionFut<'a> = Pin<Box<dyn Future<Output = Result<(), ActionError>> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` exited with {}{}", describe_code(*code), describe_stderr(stderr))]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("`{program}` timed out after {}s", elapsed.as_secs())]
    TimedOut {
        program: String,
        elapsed: std::time::Duration,
    },
    #[error("{method} {endpoint} answered with HTTP {status}: {body}")]
    Http {
        method: &'static str,
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("{method} {endpoint} failed: {message}")]
    Request {
        method: &'static str,
        endpoint: String,
        message: String,
    },
    #[error("{0}")]
    Failed(String),
}

fn describe_code(code: Option<i32>) -> String {
    code.map_or_else(|| "no exit code".to_string(), |c| format!("status {c}"))
}

fn describe_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

pub trait Action: Send + Sync {
    fn run(&self) -> ActionFut<'_>;
}

/// Adapts a synchronous closure into an [`Action`].
pub struct FnAction<F>(pub F);

impl<F> Action for FnAction<F>
where
    F: Fn() -> Result<(), ActionError> + Send + Sync,
{
    fn run(&self) -> ActionFut<'_> {
        let result = (self.0)();
        Box::pin(async move { result })
    }
}

pub struct SetupAction {
    name: String,
    action: Box<dyn Action>,
}

impl SetupAction {
    pub fn new(name: impl Into<String>, action: impl Action + 'static) -> Self {
        Self {
            name: name.into(),
            action: Box::new(action),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(&self) -> ActionFut<'_> {
        self.action.run()
    }
}

impl fmt::Debug for SetupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetupAction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
