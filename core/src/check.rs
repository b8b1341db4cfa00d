//! Dependency checks: a named readiness probe plus its retry policy.

use std::fmt;
use std::future::Future;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::time::Duration;

/// Probe execution future type alias.
pub type ProbeFut<'a> = Pin<Box<dyn Future<Output = Result<(), ProbeError>> + Send + 'a>>;

/// Why a single probe attempt reported "not ready".
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("{endpoint} unreachable: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no address resolved for {endpoint}")]
    NoAddress { endpoint: String },
    #[error("attempt timed out after {}ms", elapsed.as_millis())]
    TimedOut { elapsed: Duration },
    #[error("{endpoint} answered with HTTP {status}")]
    Status { endpoint: String, status: u16 },
    #[error("request to {endpoint} failed: {message}")]
    Request { endpoint: String, message: String },
    #[error("`{program}` exited with {}", describe_exit(*code))]
    Exited { program: String, code: Option<i32> },
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Failed(String),
}

fn describe_exit(code: Option<i32>) -> String {
    code.map_or_else(|| "no exit code (killed by signal)".to_string(), |c| format!("status {c}"))
}

/// A side-effect-free reachability check, safe to call repeatedly.
pub trait Probe: Send + Sync {
    /// Human-readable target, used in progress lines.
    fn describe(&self) -> String;

    fn probe(&self) -> ProbeFut<'_>;
}

/// Adapts a synchronous closure into a [`Probe`].
pub struct FnProbe<F> {
    label: String,
    f: F,
}

impl<F> FnProbe<F>
where
    F: Fn() -> Result<(), ProbeError> + Send + Sync,
{
    pub fn new(label: impl Into<String>, f: F) -> Self {
        Self {
            label: label.into(),
            f,
        }
    }
}

impl<F> Probe for FnProbe<F>
where
    F: Fn() -> Result<(), ProbeError> + Send + Sync,
{
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn probe(&self) -> ProbeFut<'_> {
        let result = (self.f)();
        Box::pin(async move { result })
    }
}

/// How many attempts a check may spend before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptBudget {
    Bounded(NonZeroU32),
    Unbounded,
}

impl AttemptBudget {
    /// Roughly two minutes at the default interval.
    pub const DEFAULT: Self = match NonZeroU32::new(40) {
        Some(max) => Self::Bounded(max),
        None => Self::Unbounded,
    };

    /// Builds a bounded budget; `None` for zero.
    #[must_use]
    pub fn bounded(attempts: u32) -> Option<Self> {
        NonZeroU32::new(attempts).map(Self::Bounded)
    }

    /// Whether attempt number `attempt` (1-based) is the last one allowed.
    #[must_use]
    pub fn is_exhausted_at(self, attempt: u32) -> bool {
        match self {
            Self::Bounded(max) => attempt >= max.get(),
            Self::Unbounded => false,
        }
    }
}

impl Default for AttemptBudget {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for AttemptBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(max) => write!(f, "{max}"),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// A named dependency the gate must see ready before setup runs.
///
/// Immutable once built.
pub struct DependencyCheck {
    name: String,
    probe: Box<dyn Probe>,
    retry_interval: Duration,
    max_attempts: AttemptBudget,
    attempt_timeout: Duration,
}

impl DependencyCheck {
    pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(3);
    pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(name: impl Into<String>, probe: impl Probe + 'static) -> Self {
        Self {
            name: name.into(),
            probe: Box::new(probe),
            retry_interval: Self::DEFAULT_RETRY_INTERVAL,
            max_attempts: AttemptBudget::DEFAULT,
            attempt_timeout: Self::DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, budget: AttemptBudget) -> Self {
        self.max_attempts = budget;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn probe(&self) -> &dyn Probe {
        self.probe.as_ref()
    }

    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    #[must_use]
    pub fn max_attempts(&self) -> AttemptBudget {
        self.max_attempts
    }

    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }
}

impl fmt::Debug for DependencyCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyCheck")
            .field("name", &self.name)
            .field("target", &self.probe.describe())
            .field("retry_interval", &self.retry_interval)
            .field("max_attempts", &self.max_attempts)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}
