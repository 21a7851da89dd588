//! Policy evaluation by an external program.
//!
//! The program receives the [`FilterArgs`] as its positional arguments and
//! answers through its exit status. Output is captured and only logged.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};

use crate::error::AuthzError;
use crate::filter::{FilterArgs, OpenEvaluation, PolicyEvaluator};

/// How an exit code maps to a decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitPolarity {
    /// Any non-zero exit code authorizes. Existing auth filters report their
    /// decision this way: the close status is the boolean.
    #[default]
    NonZeroAllows,
    /// Exit code 0 authorizes, anything else denies.
    ZeroAllows,
}

pub const DEFAULT_EXIT_POLARITY: ExitPolarity = ExitPolarity::NonZeroAllows;

/// How long the policy program may run before [`OnTimeout`] decides.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

impl ExitPolarity {
    pub fn decide(self, code: i32) -> bool {
        match self {
            ExitPolarity::NonZeroAllows => code != 0,
            ExitPolarity::ZeroAllows => code == 0,
        }
    }
}

/// Decision used when the program outlives its deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnTimeout {
    #[default]
    Deny,
    Allow,
}

impl OnTimeout {
    pub fn decision(self) -> bool {
        matches!(self, OnTimeout::Allow)
    }
}

/// Runs the policy program once per check.
#[derive(Debug, Clone)]
pub struct ProcessEvaluator {
    program: PathBuf,
    name: String,
    timeout: Duration,
    on_timeout: OnTimeout,
    polarity: ExitPolarity,
}

impl ProcessEvaluator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        Self {
            name: program.display().to_string(),
            program,
            timeout: DEFAULT_TIMEOUT,
            on_timeout: OnTimeout::default(),
            polarity: DEFAULT_EXIT_POLARITY,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_on_timeout(mut self, on_timeout: OnTimeout) -> Self {
        self.on_timeout = on_timeout;
        self
    }

    pub fn with_polarity(mut self, polarity: ExitPolarity) -> Self {
        self.polarity = polarity;
        self
    }
}

impl PolicyEvaluator for ProcessEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, args: &FilterArgs) -> Result<Box<dyn OpenEvaluation>, AuthzError> {
        let child = Command::new(&self.program)
            .args(args.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AuthzError::Spawn {
                program: self.name.clone(),
                source,
            })?;

        tracing::debug!(
            program = %self.name,
            pid = child.id(),
            function = args.function(),
            "Spawned policy program"
        );

        Ok(Box::new(RunningProgram {
            child,
            program: self.name.clone(),
            function: args.function().to_string(),
            timeout: self.timeout,
            on_timeout: self.on_timeout,
            polarity: self.polarity,
        }))
    }
}

struct RunningProgram {
    child: Child,
    program: String,
    function: String,
    timeout: Duration,
    on_timeout: OnTimeout,
    polarity: ExitPolarity,
}

impl OpenEvaluation for RunningProgram {
    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<bool, AuthzError>> + Send>> {
        Box::pin(async move {
            let RunningProgram {
                child,
                program,
                function,
                timeout,
                on_timeout,
                polarity,
            } = *self;

            // Dropping the wait future on timeout drops the child, which kills it.
            let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(result) => result.map_err(AuthzError::Wait)?,
                Err(_) => {
                    let authorized = on_timeout.decision();
                    tracing::warn!(
                        program = %program,
                        function = %function,
                        timeout_ms = timeout.as_millis() as u64,
                        authorized,
                        "Policy program timed out, killed"
                    );
                    return Ok(authorized);
                }
            };

            if !output.stderr.is_empty() {
                tracing::debug!(
                    program = %program,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim_end(),
                    "Policy program stderr"
                );
            }

            let Some(code) = output.status.code() else {
                return Err(AuthzError::AbnormalExit(format!(
                    "{program} ({function}): {}",
                    output.status
                )));
            };

            let authorized = polarity.decide(code);
            tracing::debug!(
                program = %program,
                function = %function,
                code,
                stdout_bytes = output.stdout.len(),
                authorized,
                "Policy program exited"
            );
            Ok(authorized)
        })
    }
}
