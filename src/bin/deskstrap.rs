// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use deskstrap::{
    artifact::{ArtifactWriter, StagedArtifact, DEFAULT_MODE},
    command::SystemRunner,
    config::ProvisionConfig,
    orchestrator::{
        check_privilege, error_chain, Orchestrator, RunObserver, StepOutcome, StepRecord,
    },
    path::default_config_path,
    profile::EnvironmentProfile,
    step::{Step, StepContext},
    template::{self, TemplateId},
    workstation,
};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use std::{fs, path::PathBuf, process::exit, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "deskstrap [options] [<command>]",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command.unwrap_or_default() {
            Command::Run(opts) => run_provision(self.config, opts),
            Command::Plan => run_plan(self.config),
            Command::Render(opts) => run_render(self.config, opts),
            Command::InitConfig(opts) => run_init_config(self.config, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Provision this machine. Default when no command is given.
    #[command(override_usage = "deskstrap run [options]")]
    Run(RunOptions),

    /// Show which steps are already satisfied and which are pending.
    #[command(override_usage = "deskstrap plan [options]")]
    Plan,

    /// Print a rendered template to standard output.
    #[command(override_usage = "deskstrap render [options] <template>")]
    Render(RenderOptions),

    /// Write default configuration file.
    #[command(override_usage = "deskstrap init-config [options]")]
    InitConfig(InitConfigOptions),
}

impl Default for Command {
    fn default() -> Self {
        Self::Run(RunOptions::default())
    }
}

#[derive(Parser, Clone, Debug, Default)]
#[command(author, about, long_about)]
struct RunOptions {
    /// Do not ask for confirmation before provisioning.
    #[arg(short, long)]
    pub yes: bool,

    /// Do not keep backups of overwritten files.
    #[arg(long)]
    pub no_backup: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RenderOptions {
    /// Name of template to render, e.g., hyprland or nix-conf.
    #[arg(required = true, value_name = "template")]
    pub template: TemplateId,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitConfigOptions {
    /// Overwrite existing configuration file.
    #[arg(short, long)]
    pub force: bool,
}

/// Print one colored status line per step.
struct ConsoleObserver;

impl RunObserver for ConsoleObserver {
    fn step_started(&mut self, index: usize, total: usize, step: &dyn Step) {
        println!(
            "{} {}",
            format!("[{}/{}]", index + 1, total).bold(),
            step.summary()
        );
    }

    fn step_finished(&mut self, index: usize, total: usize, record: &StepRecord) {
        let counter = format!("[{}/{}]", index + 1, total).bold();
        let status = match &record.outcome {
            StepOutcome::Completed => "done".green(),
            StepOutcome::Skipped => "ok".cyan(),
            StepOutcome::Warned(_) => "warn".yellow(),
            StepOutcome::Failed(_) => "fail".red(),
            StepOutcome::NotAttempted => "skip".dimmed(),
        };
        println!("{counter} {status} {}: {}", record.name, record.outcome);
    }
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn load_config(path: Option<PathBuf>) -> Result<ProvisionConfig> {
    let (path, explicit) = match path {
        Some(path) => (path, true),
        None => (default_config_path()?, false),
    };

    // INVARIANT: Only an explicitly requested configuration file must exist.
    if !explicit && !path.exists() {
        info!("no configuration at {:?}, using defaults", path.display());
        return Ok(ProvisionConfig::default());
    }

    let data = fs::read_to_string(&path)
        .with_context(|| format!("failed to read configuration {:?}", path.display()))?;
    let config = data
        .parse()
        .with_context(|| format!("failed to parse configuration {:?}", path.display()))?;

    Ok(config)
}

fn run_provision(config: Option<PathBuf>, opts: RunOptions) -> Result<()> {
    let mut config = load_config(config)?;
    if opts.no_backup {
        config.settings.backup = false;
    }

    let runner = SystemRunner::new();
    let profile = EnvironmentProfile::gather(&config, &runner);
    let steps = workstation::plan(&profile)?;
    check_privilege(config.settings.privilege, profile.is_privileged())?;

    if !opts.yes {
        let proceed = Confirm::new(&format!(
            "Provision this machine with {} steps?",
            steps.len()
        ))
        .with_default(false)
        .prompt()?;
        if !proceed {
            info!("nothing done");
            return Ok(());
        }
    }

    let writer = ArtifactWriter::new(&runner, profile.is_privileged(), config.settings.backup);
    let ctx = StepContext {
        profile: &profile,
        runner: &runner,
        writer: &writer,
    };
    let mut orchestrator = Orchestrator::new(config.settings.privilege);
    let result = orchestrator.run(&steps, &ctx, &mut ConsoleObserver)?;

    if let Some(failure) = result.failure {
        return Err(anyhow::Error::new(failure.error).context(format!(
            "provisioning stopped at step {} ({:?})",
            failure.index + 1,
            failure.name
        )));
    }

    for record in result.warnings() {
        warn!("step {:?} needs attention: {}", record.name, record.outcome);
    }

    println!("\n{}", "Workstation provisioned. Next:".green().bold());
    for action in workstation::next_actions(&profile) {
        println!("  - {action}");
    }

    Ok(())
}

fn run_plan(config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config)?;
    let runner = SystemRunner::new();
    let profile = EnvironmentProfile::gather(&config, &runner);
    let steps = workstation::plan(&profile)?;

    if let Err(err) = check_privilege(config.settings.privilege, profile.is_privileged()) {
        warn!("{err}");
    }

    let writer = ArtifactWriter::new(&runner, profile.is_privileged(), config.settings.backup);
    let ctx = StepContext {
        profile: &profile,
        runner: &runner,
        writer: &writer,
    };

    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    bar.enable_steady_tick(Duration::from_millis(100));

    let mut report = Vec::with_capacity(steps.len());
    for step in &steps {
        bar.set_message(format!("checking {}", step.name()));
        report.push((step.name().to_string(), step.summary(), step.is_satisfied(&ctx)));
    }
    bar.finish_and_clear();

    for (index, (name, summary, status)) in report.into_iter().enumerate() {
        let status = match status {
            Ok(true) => "satisfied".green(),
            Ok(false) => "pending".yellow(),
            Err(err) => format!("error: {}", error_chain(&err)).red(),
        };
        println!(
            "{} {name}: {summary} [{status}]",
            format!("[{}/{}]", index + 1, steps.len()).bold()
        );
    }

    Ok(())
}

fn run_render(config: Option<PathBuf>, opts: RenderOptions) -> Result<()> {
    let config = load_config(config)?;
    let runner = SystemRunner::new();
    let profile = EnvironmentProfile::gather(&config, &runner);
    print!("{}", template::render(opts.template, &profile)?);

    Ok(())
}

fn run_init_config(config: Option<PathBuf>, opts: InitConfigOptions) -> Result<()> {
    let path = match config {
        Some(path) => path,
        None => default_config_path()?,
    };

    if path.exists() && !opts.force {
        return Err(anyhow!(
            "configuration {:?} already exists, pass --force to overwrite it",
            path.display()
        ));
    }

    let content = ProvisionConfig::default().to_string();
    StagedArtifact::new(&path, &content, DEFAULT_MODE)?.commit()?;
    info!("wrote default configuration to {:?}", path.display());

    Ok(())
}
