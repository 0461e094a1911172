// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provisioning orchestration.
//!
//! The orchestrator runs a plan of [`Step`]s strictly in order. Before any
//! step is touched, it checks the privilege policy and the declared ordering
//! of the plan. Either check failing means nothing on the machine changed.
//!
//! Each step's idempotency guard is evaluated first. A satisfied step is
//! skipped. Otherwise its action runs. The first failing step with the
//! [`FailurePolicy::Abort`] policy halts the run, and every step after it is
//! recorded as not attempted. A step with the [`FailurePolicy::Warn`] policy
//! records its failure as a warning and the run moves on.

use crate::{
    config::PrivilegePolicy,
    step::{FailurePolicy, Step, StepContext, StepError},
};

use std::{collections::HashSet, error::Error, fmt};
use tracing::{debug, error, info, instrument, warn};

/// Progress of a single orchestrated run.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    #[default]
    NotStarted,
    Running {
        current: String,
    },
    Completed,
    Failed {
        step: String,
    },
}

/// What happened to one step of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Action ran successfully.
    Completed,

    /// Guard reported the effect as already present.
    Skipped,

    /// Step failed under the warn policy. Holds the error message.
    Warned(String),

    /// Step failed and halted the run. Holds the error message.
    Failed(String),

    /// Step never ran because an earlier step halted the run.
    NotAttempted,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(fmt, "completed"),
            Self::Skipped => write!(fmt, "already satisfied"),
            Self::Warned(message) => write!(fmt, "warning: {message}"),
            Self::Failed(message) => write!(fmt, "failed: {message}"),
            Self::NotAttempted => write!(fmt, "not attempted"),
        }
    }
}

/// Outcome of a named step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub name: String,
    pub outcome: StepOutcome,
}

/// Step that halted a run.
#[derive(Debug)]
pub struct StepFailure {
    pub index: usize,
    pub name: String,
    pub error: StepError,
}

/// Report of a finished run.
#[derive(Debug)]
pub struct RunResult {
    pub records: Vec<StepRecord>,
    pub failure: Option<StepFailure>,
    pub state: RunState,
}

impl RunResult {
    /// Check if every step either completed, was skipped, or only warned.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Name of step that halted the run, if any.
    pub fn failed_step(&self) -> Option<&str> {
        self.failure.as_ref().map(|failure| failure.name.as_str())
    }

    /// Names of steps that finished with a warning.
    pub fn warnings(&self) -> impl Iterator<Item = &StepRecord> {
        self.records
            .iter()
            .filter(|record| matches!(record.outcome, StepOutcome::Warned(_)))
    }
}

/// Listener for run progress.
pub trait RunObserver {
    /// Step at `index` of `total` is about to be checked.
    fn step_started(&mut self, index: usize, total: usize, step: &dyn Step) {
        let _ = (index, total, step);
    }

    /// Step at `index` of `total` has an outcome.
    fn step_finished(&mut self, index: usize, total: usize, record: &StepRecord) {
        let _ = (index, total, record);
    }
}

/// Observer that ignores all progress.
#[derive(Default, Debug, Copy, Clone)]
pub struct SilentObserver;

impl RunObserver for SilentObserver {}

/// Runs provisioning plans.
#[derive(Debug)]
pub struct Orchestrator {
    policy: PrivilegePolicy,
    state: RunState,
}

impl Orchestrator {
    /// Construct new orchestrator enforcing privilege `policy`.
    pub fn new(policy: PrivilegePolicy) -> Self {
        Self {
            policy,
            state: RunState::NotStarted,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Run `steps` in order.
    ///
    /// A step failure does not surface as an error. It is reported through
    /// [`RunResult::failure`] along with the outcome of every step.
    ///
    /// # Errors
    ///
    /// - Return [`OrchestratorError::Privilege`] if the privilege policy
    ///   rejects the current process.
    /// - Return [`OrchestratorError::Ordering`] if a step requires a step
    ///   that does not come before it.
    /// - Return [`OrchestratorError::AlreadyRun`] if this orchestrator ran a
    ///   plan before.
    #[instrument(skip(self, steps, ctx, observer), level = "debug")]
    pub fn run(
        &mut self,
        steps: &[Box<dyn Step>],
        ctx: &StepContext<'_>,
        observer: &mut dyn RunObserver,
    ) -> Result<RunResult> {
        if self.state != RunState::NotStarted {
            return Err(OrchestratorError::AlreadyRun);
        }

        check_privilege(self.policy, ctx.profile.is_privileged())?;
        check_ordering(steps)?;

        let total = steps.len();
        let mut records = Vec::with_capacity(total);
        let mut failure = None;

        for (index, step) in steps.iter().enumerate() {
            if failure.is_some() {
                let record = StepRecord {
                    name: step.name().into(),
                    outcome: StepOutcome::NotAttempted,
                };
                observer.step_finished(index, total, &record);
                records.push(record);
                continue;
            }

            self.state = RunState::Running {
                current: step.name().into(),
            };
            observer.step_started(index, total, step.as_ref());

            let outcome = match attempt(step.as_ref(), ctx) {
                Ok(outcome) => outcome,
                Err(err) if step.policy() == FailurePolicy::Warn => {
                    let message = error_chain(&err);
                    warn!("step {:?} failed, continuing: {message}", step.name());
                    StepOutcome::Warned(message)
                }
                Err(err) => {
                    let message = error_chain(&err);
                    error!("step {:?} failed: {message}", step.name());
                    failure = Some(StepFailure {
                        index,
                        name: step.name().into(),
                        error: err,
                    });
                    StepOutcome::Failed(message)
                }
            };

            let record = StepRecord {
                name: step.name().into(),
                outcome,
            };
            observer.step_finished(index, total, &record);
            records.push(record);
        }

        self.state = match &failure {
            Some(failure) => RunState::Failed {
                step: failure.name.clone(),
            },
            None => RunState::Completed,
        };
        info!("run finished: {:?}", self.state);

        Ok(RunResult {
            records,
            failure,
            state: self.state.clone(),
        })
    }
}

fn attempt(step: &dyn Step, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
    // INVARIANT: A guard that errors counts as a failure of its step.
    if step.is_satisfied(ctx)? {
        debug!("step {:?} already satisfied", step.name());
        return Ok(StepOutcome::Skipped);
    }

    info!("apply step {:?}: {}", step.name(), step.summary());
    step.apply(ctx)?;

    Ok(StepOutcome::Completed)
}

/// Check if privilege `policy` admits a process with `privileged` rights.
///
/// # Errors
///
/// - Return [`PrivilegeError::RootForbidden`] if root is forbidden but the
///   process is privileged.
/// - Return [`PrivilegeError::RootRequired`] if root is required but the
///   process is unprivileged.
pub fn check_privilege(policy: PrivilegePolicy, privileged: bool) -> Result<(), PrivilegeError> {
    match (policy, privileged) {
        (PrivilegePolicy::ForbidRoot, true) => Err(PrivilegeError::RootForbidden),
        (PrivilegePolicy::RequireRoot, false) => Err(PrivilegeError::RootRequired),
        _ => Ok(()),
    }
}

/// Check that every step comes after the steps it requires.
///
/// # Errors
///
/// - Return [`OrchestratorError::Ordering`] for the first step requiring a
///   step that is not earlier in the plan.
pub fn check_ordering(steps: &[Box<dyn Step>]) -> Result<()> {
    let mut seen = HashSet::new();
    for step in steps {
        if let Some(missing) = step
            .requires()
            .iter()
            .find(|required| !seen.contains(required.as_str()))
        {
            return Err(OrchestratorError::Ordering {
                step: step.name().into(),
                requires: missing.clone(),
            });
        }
        seen.insert(step.name());
    }

    Ok(())
}

/// Render `error` followed by all of its sources.
pub fn error_chain(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}

/// Privilege policy violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrivilegeError {
    #[error("refusing to run as root; run deskstrap as your regular user, sudo is used where needed")]
    RootForbidden,

    #[error("must run as root under the require-root privilege policy")]
    RootRequired,
}

/// Orchestration error types.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    /// Step requires a step that does not run before it.
    #[error("step {step:?} requires {requires:?} to run before it")]
    Ordering { step: String, requires: String },

    #[error("orchestrator already ran a plan")]
    AlreadyRun,
}

/// Friendly result alias :3
pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
