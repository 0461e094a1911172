// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{profile_fixture, run_fixture, MachineFixture};

use deskstrap::{
    command::Invocation,
    orchestrator::{check_privilege, OrchestratorError, PrivilegeError, StepOutcome},
    path::{hyprland_conf_path, nix_conf_path},
    step::{ArtifactStep, Guard, ProcessStep, Step, Target},
    template::{self, TemplateId, SHELL_BLOCK_MARKER},
};

use anyhow::Result;
use pretty_assertions::assert_eq;
use std::{fs, path::Path};
use tempfile::tempdir;

fn small_plan() -> Vec<Box<dyn Step>> {
    vec![
        ProcessStep::new("nix-install", "install nix")
            .guard(Guard::ToolAvailable("nix".into()))
            .action(Invocation::shell("curl -sSfL https://nixos.org/nix/install | sh"))
            .verify("nix", "open a new login shell")
            .boxed(),
        ArtifactStep::replace("nix-config", TemplateId::NixConf, Target::Home(nix_conf_path))
            .requires(["nix-install"])
            .boxed(),
        ArtifactStep::append_once(
            "shell-environment",
            TemplateId::ShellEnvironment,
            Target::ShellRc,
            SHELL_BLOCK_MARKER,
        )
        .requires(["nix-install"])
        .boxed(),
    ]
}

fn backups_of(path: &Path) -> Result<Vec<String>> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut backups = Vec::new();
    for entry in fs::read_dir(path.parent().unwrap())? {
        let entry = entry?.file_name().to_string_lossy().into_owned();
        if entry.starts_with(&format!("{name}.")) && entry.ends_with(".bak") {
            backups.push(entry);
        }
    }

    Ok(backups)
}

#[test]
fn second_run_changes_nothing() -> Result<()> {
    let home = tempdir()?;
    let profile = profile_fixture(home.path(), false);
    let machine = MachineFixture::new().installs("nixos.org/nix/install", "nix");
    let steps = small_plan();

    let first = run_fixture(&profile, &machine, true, &steps)?;
    assert!(first.is_success());
    assert!(first
        .records
        .iter()
        .all(|record| record.outcome == StepOutcome::Completed));

    let rc = home.path().join(".bashrc");
    let nix_conf = fs::read_to_string(nix_conf_path(home.path()))?;
    let shell_rc = fs::read_to_string(&rc)?;
    machine.forget_calls();

    let second = run_fixture(&profile, &machine, true, &steps)?;
    assert!(second.is_success());
    assert!(second
        .records
        .iter()
        .all(|record| record.outcome == StepOutcome::Skipped));
    assert!(machine.calls().iter().all(|call| !call.starts_with("run:")));
    assert_eq!(fs::read_to_string(nix_conf_path(home.path()))?, nix_conf);
    assert_eq!(fs::read_to_string(&rc)?, shell_rc);
    assert!(backups_of(&nix_conf_path(home.path()))?.is_empty());

    Ok(())
}

#[test]
fn failure_halts_later_steps() -> Result<()> {
    let home = tempdir()?;
    let profile = profile_fixture(home.path(), false);
    let machine = MachineFixture::new().breaks("nixos.org/nix/install");
    let steps: Vec<Box<dyn Step>> = vec![
        ArtifactStep::replace(
            "hyprland-config",
            TemplateId::Hyprland,
            Target::Home(hyprland_conf_path),
        )
        .boxed(),
        small_plan().remove(0),
        ArtifactStep::replace("nix-config", TemplateId::NixConf, Target::Home(nix_conf_path))
            .boxed(),
    ];

    let result = run_fixture(&profile, &machine, true, &steps)?;

    assert_eq!(result.failed_step(), Some("nix-install"));
    assert_eq!(result.records[0].outcome, StepOutcome::Completed);
    assert!(matches!(result.records[1].outcome, StepOutcome::Failed(_)));
    assert_eq!(result.records[2].outcome, StepOutcome::NotAttempted);
    assert!(hyprland_conf_path(home.path()).exists());
    assert!(!nix_conf_path(home.path()).exists());

    Ok(())
}

#[test]
fn root_is_refused_before_any_change() -> Result<()> {
    let home = tempdir()?;
    let profile = profile_fixture(home.path(), true);
    let machine = MachineFixture::new().installs("nixos.org/nix/install", "nix");

    let result = run_fixture(&profile, &machine, true, &small_plan());

    assert!(matches!(
        result,
        Err(OrchestratorError::Privilege(PrivilegeError::RootForbidden))
    ));
    assert!(machine.calls().is_empty());
    assert_eq!(fs::read_dir(home.path())?.count(), 0);

    Ok(())
}

#[test]
fn default_policy_refuses_root_up_front() -> Result<()> {
    let home = tempdir()?;
    let root = profile_fixture(home.path(), true);
    let user = profile_fixture(home.path(), false);

    assert_eq!(
        check_privilege(root.settings().privilege, root.is_privileged()),
        Err(PrivilegeError::RootForbidden)
    );
    assert_eq!(check_privilege(user.settings().privilege, user.is_privileged()), Ok(()));

    Ok(())
}

#[test]
fn overwrite_keeps_one_backup() -> Result<()> {
    let home = tempdir()?;
    let profile = profile_fixture(home.path(), false);
    let machine = MachineFixture::new();
    let path = hyprland_conf_path(home.path());
    fs::create_dir_all(path.parent().unwrap())?;
    fs::write(&path, "monitor = ,highres,auto,2\n")?;
    let steps = vec![ArtifactStep::replace(
        "hyprland-config",
        TemplateId::Hyprland,
        Target::Home(hyprland_conf_path),
    )
    .boxed()];

    run_fixture(&profile, &machine, true, &steps)?;
    run_fixture(&profile, &machine, true, &steps)?;

    let backups = backups_of(&path)?;
    assert_eq!(backups.len(), 1);
    let backup = path.parent().unwrap().join(&backups[0]);
    assert_eq!(fs::read_to_string(backup)?, "monitor = ,highres,auto,2\n");
    assert_eq!(
        fs::read_to_string(&path)?,
        template::render(TemplateId::Hyprland, &profile)?
    );

    Ok(())
}

#[test]
fn elevated_artifact_goes_through_sudo() -> Result<()> {
    let home = tempdir()?;
    let system = tempdir()?;
    let profile = profile_fixture(home.path(), false);
    let machine = MachineFixture::new();
    let target = system.path().join("hyprland.desktop");
    let steps = vec![ArtifactStep::replace(
        "wayland-session",
        TemplateId::WaylandSession,
        Target::Fixed(target.clone()),
    )
    .elevated()
    .boxed()];

    let result = run_fixture(&profile, &machine, true, &steps)?;

    assert!(result.is_success());
    let runs: Vec<String> = machine
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("run: sudo"))
        .collect();
    assert!(runs.iter().any(|call| call.contains("install -m 644")));
    assert!(runs
        .last()
        .is_some_and(|call| call.contains("mv -f") && call.ends_with(&target.display().to_string())));

    Ok(())
}
