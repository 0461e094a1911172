// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provisioning steps.
//!
//! A __step__ is one ordered unit of provisioning work. Every step pairs an
//! __idempotency guard__ with an __action__. The guard is a precondition that
//! tells whether the step's effect is already present on the machine, e.g.,
//! Nix is on the search path, or the shell rc file already holds the
//! environment block. The action is only run when the guard says the effect
//! is missing. This is what makes running deskstrap twice harmless.
//!
//! # Step Kinds
//!
//! Two kinds of step cover everything a workstation needs:
//!
//! - [`ProcessStep`] runs external programs, e.g., the package manager or
//!   the Nix installer, and can verify that a tool appeared afterwards.
//! - [`ArtifactStep`] renders a template and writes it to a file, either
//!   replacing the file or appending to it once.
//!
//! # Ordering
//!
//! Steps may declare the names of steps they depend on. A step must come
//! after everything it requires in a plan. The orchestrator refuses to start
//! a plan that breaks this rule.

pub mod file;
pub mod process;

pub use file::{ArtifactStep, Placement, Target};
pub use process::{Guard, ProcessStep};

use crate::{
    artifact::{ArtifactError, ArtifactWriter},
    command::{CommandError, CommandRunner},
    profile::EnvironmentProfile,
    template::TemplateError,
};

/// Everything a step may use while checking or applying itself.
pub struct StepContext<'a> {
    /// Read-only profile of the machine being provisioned.
    pub profile: &'a EnvironmentProfile,

    /// Spawner of external programs.
    pub runner: &'a dyn CommandRunner,

    /// Writer of generated files.
    pub writer: &'a ArtifactWriter<'a>,
}

/// What happens when a step fails.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Halt the whole run.
    #[default]
    Abort,

    /// Record a warning and continue with the next step.
    Warn,
}

/// A single ordered unit of provisioning work.
pub trait Step {
    /// Unique name of step within a plan.
    fn name(&self) -> &str;

    /// One line description of what the step does.
    fn summary(&self) -> String;

    /// Names of steps that must run before this one.
    fn requires(&self) -> &[String] {
        &[]
    }

    /// Failure policy of step.
    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Abort
    }

    /// Idempotency guard. Return true if the step's effect is already
    /// present, in which case the action is skipped.
    ///
    /// # Errors
    ///
    /// - Return [`StepError`] if the guard itself cannot be evaluated.
    fn is_satisfied(&self, ctx: &StepContext<'_>) -> Result<bool>;

    /// Perform the step's action.
    ///
    /// # Errors
    ///
    /// - Return [`StepError`] describing why the action failed.
    fn apply(&self, ctx: &StepContext<'_>) -> Result<()>;
}

/// All possible error types a step can fail with.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// Required tool is still absent after its installation ran.
    #[error("{tool:?} is still missing after installation; {guidance}")]
    DependencyMissing { tool: String, guidance: String },

    /// Generated artifact lacks a substitution value.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Generated artifact cannot be written.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// External program failed.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Friendly result alias :3
pub type Result<T, E = StepError> = std::result::Result<T, E>;
