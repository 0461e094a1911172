// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Steps that run external programs.

use crate::{
    command::{CommandError, Invocation},
    step::{FailurePolicy, Result, Step, StepContext, StepError},
};

use tracing::{debug, info, instrument};

/// Idempotency guard of a [`ProcessStep`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// Never satisfied. The action runs every time.
    Never,

    /// Satisfied if tool is found through `command -v`.
    ToolAvailable(String),

    /// Satisfied if invocation exits successfully.
    Succeeds(Invocation),

    /// Satisfied if every invocation exits successfully.
    AllSucceed(Vec<Invocation>),

    /// Satisfied if invocation succeeds and its stdout contains needle.
    OutputContains {
        invocation: Invocation,
        needle: String,
    },
}

/// Tool that must be present once a step's actions have run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verify {
    pub tool: String,
    pub guidance: String,
}

/// Step made of one or more external program invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStep {
    name: String,
    summary: String,
    guard: Guard,
    actions: Vec<Invocation>,
    verify: Option<Verify>,
    requires: Vec<String>,
    policy: FailurePolicy,
    nix_env: bool,
}

impl ProcessStep {
    /// Construct new process step with no guard and no actions.
    pub fn new(name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: summary.into(),
            guard: Guard::Never,
            actions: Vec::new(),
            verify: None,
            requires: Vec::new(),
            policy: FailurePolicy::Abort,
            nix_env: false,
        }
    }

    /// Set idempotency guard.
    pub fn guard(mut self, guard: Guard) -> Self {
        self.guard = guard;
        self
    }

    /// Append an action. Actions run in the order they were added.
    pub fn action(mut self, invocation: Invocation) -> Self {
        self.actions.push(invocation);
        self
    }

    /// Require `tool` to be present after the actions ran.
    pub fn verify(mut self, tool: impl Into<String>, guidance: impl Into<String>) -> Self {
        self.verify = Some(Verify {
            tool: tool.into(),
            guidance: guidance.into(),
        });
        self
    }

    /// Declare steps that must run before this one.
    pub fn requires(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.requires.extend(names.into_iter().map(Into::into));
        self
    }

    /// Set failure policy.
    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run guard, actions, and verification with the profile's Nix
    /// environment overlay, so a Nix installed moments ago is usable without
    /// a new login shell.
    pub fn with_nix_env(mut self) -> Self {
        self.nix_env = true;
        self
    }

    /// Box step for use in a plan.
    pub fn boxed(self) -> Box<dyn Step> {
        Box::new(self)
    }

    pub fn actions(&self) -> &[Invocation] {
        &self.actions
    }

    fn prepare(&self, ctx: &StepContext<'_>, invocation: &Invocation) -> Invocation {
        if !self.nix_env {
            return invocation.clone();
        }

        let mut prepared = invocation.clone();
        for (key, value) in ctx.profile.nix_env_overlay() {
            prepared.env.entry(key).or_insert(value);
        }

        prepared
    }
}

impl Step for ProcessStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn summary(&self) -> String {
        self.summary.clone()
    }

    fn requires(&self) -> &[String] {
        &self.requires
    }

    fn policy(&self) -> FailurePolicy {
        self.policy
    }

    #[instrument(skip(self, ctx), fields(step = %self.name), level = "debug")]
    fn is_satisfied(&self, ctx: &StepContext<'_>) -> Result<bool> {
        let satisfied = match &self.guard {
            Guard::Never => false,
            Guard::ToolAvailable(tool) => ctx
                .runner
                .probe(&self.prepare(ctx, &Invocation::presence_of(tool)))?,
            Guard::Succeeds(invocation) => ctx.runner.probe(&self.prepare(ctx, invocation))?,
            Guard::AllSucceed(invocations) => {
                let mut all = true;
                for invocation in invocations {
                    if !ctx.runner.probe(&self.prepare(ctx, invocation))? {
                        all = false;
                        break;
                    }
                }
                all
            }
            Guard::OutputContains { invocation, needle } => {
                match ctx.runner.capture(&self.prepare(ctx, invocation)) {
                    Ok(output) => output.contains(needle.as_str()),
                    // INVARIANT: A guard tool that is missing or failing means the effect is absent.
                    Err(CommandError::Failed { .. } | CommandError::Spawn { .. }) => false,
                }
            }
        };
        debug!("guard satisfied: {satisfied}");

        Ok(satisfied)
    }

    #[instrument(skip(self, ctx), fields(step = %self.name), level = "debug")]
    fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        for invocation in &self.actions {
            let invocation = self.prepare(ctx, invocation);
            info!("run {invocation}");
            ctx.runner.run_checked(&invocation)?;
        }

        if let Some(verify) = &self.verify {
            let present = ctx
                .runner
                .probe(&self.prepare(ctx, &Invocation::presence_of(&verify.tool)))?;
            if !present {
                return Err(StepError::DependencyMissing {
                    tool: verify.tool.clone(),
                    guidance: verify.guidance.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        artifact::ArtifactWriter,
        command::testing::ScriptedRunner,
        config::ProvisionConfig,
        profile::{EnvironmentProfile, GpuProfile, HostFacts},
    };
    use pretty_assertions::assert_eq;

    fn profile() -> EnvironmentProfile {
        let facts = HostFacts {
            user: Some("ada".into()),
            home: Some("/home/ada".into()),
            ..HostFacts::default()
        };
        EnvironmentProfile::new(facts, GpuProfile::Generic, &ProvisionConfig::default())
    }

    fn with_context<T>(runner: &ScriptedRunner, body: impl FnOnce(&StepContext<'_>) -> T) -> T {
        let profile = profile();
        let writer = ArtifactWriter::new(runner, false, false);
        let ctx = StepContext {
            profile: &profile,
            runner,
            writer: &writer,
        };
        body(&ctx)
    }

    #[test]
    fn actions_run_in_order() -> anyhow::Result<()> {
        let runner = ScriptedRunner::new();
        let step = ProcessStep::new("channel", "add channel")
            .action(Invocation::new("nix-channel").args(["--add", "url", "home-manager"]))
            .action(Invocation::new("nix-channel").arg("--update"));

        with_context(&runner, |ctx| step.apply(ctx))?;

        assert_eq!(
            runner.calls(),
            vec![
                "run: nix-channel --add url home-manager".to_string(),
                "run: nix-channel --update".to_string(),
            ]
        );

        Ok(())
    }

    #[test]
    fn failing_action_stops_remaining_actions() {
        let runner = ScriptedRunner::new().on("apt-get update", 100, "");
        let step = ProcessStep::new("packages", "install packages")
            .action(Invocation::new("apt-get").arg("update"))
            .action(Invocation::new("apt-get").args(["install", "-y", "curl"]));

        let result = with_context(&runner, |ctx| step.apply(ctx));

        assert!(matches!(
            result,
            Err(StepError::Command(CommandError::Failed {
                code: Some(100),
                ..
            }))
        ));
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn missing_tool_after_install_is_dependency_error() {
        let runner = ScriptedRunner::new().on("command -v nix", 1, "");
        let step = ProcessStep::new("nix-install", "install nix")
            .action(Invocation::shell("true"))
            .verify("nix", "open a new shell");

        let result = with_context(&runner, |ctx| step.apply(ctx));

        assert!(matches!(
            result,
            Err(StepError::DependencyMissing { ref tool, .. }) if tool == "nix"
        ));
    }

    #[test]
    fn output_guard_inspects_stdout() -> anyhow::Result<()> {
        let listed = ScriptedRunner::new().on(
            "nix-channel --list",
            0,
            "home-manager https://github.com/nix-community/home-manager/archive/master.tar.gz\n",
        );
        let missing = ScriptedRunner::new().on("nix-channel --list", 127, "");
        let step = ProcessStep::new("channel", "add channel").guard(Guard::OutputContains {
            invocation: Invocation::new("nix-channel").arg("--list"),
            needle: "home-manager".into(),
        });

        assert!(with_context(&listed, |ctx| step.is_satisfied(ctx))?);
        assert!(!with_context(&missing, |ctx| step.is_satisfied(ctx))?);

        Ok(())
    }

    #[test]
    fn all_succeed_guard_stops_at_first_miss() -> anyhow::Result<()> {
        let runner = ScriptedRunner::new().on("dpkg-query git", 1, "");
        let step = ProcessStep::new("packages", "install packages").guard(Guard::AllSucceed(vec![
            Invocation::new("dpkg-query").arg("curl"),
            Invocation::new("dpkg-query").arg("git"),
            Invocation::new("dpkg-query").arg("xz-utils"),
        ]));

        assert!(!with_context(&runner, |ctx| step.is_satisfied(ctx))?);
        assert_eq!(runner.calls().len(), 2);

        Ok(())
    }

    #[test]
    fn nix_env_overlay_reaches_actions() -> anyhow::Result<()> {
        let runner = ScriptedRunner::new();
        let step = ProcessStep::new("hm", "install home-manager")
            .action(Invocation::new("nix-shell").args(["<home-manager>", "-A", "install"]))
            .with_nix_env();

        let prepared = with_context(&runner, |ctx| step.prepare(ctx, &step.actions()[0]));

        assert_eq!(
            prepared
                .env
                .get(std::ffi::OsStr::new("NIX_PATH"))
                .map(|value| value.to_string_lossy().into_owned()),
            Some(
                "/home/ada/.nix-defexpr/channels:/nix/var/nix/profiles/per-user/root/channels"
                    .to_string()
            )
        );

        Ok(())
    }
}
