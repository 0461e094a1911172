// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Hyprland workstation plan.
//!
//! Build the ordered list of steps that turns a fresh Debian-family machine
//! into a Hyprland desktop managed through Nix and Home Manager. The plan
//! only depends on the environment profile, so the same profile always
//! yields the same plan.

use crate::{
    command::Invocation,
    config::{NixInstall, PackageFrontend},
    path::{
        home_manager_dir, home_manager_flake_path, home_manager_module_path, hyprland_conf_path,
        nix_conf_path, wayland_session_path,
    },
    profile::EnvironmentProfile,
    step::{ArtifactStep, FailurePolicy, Guard, ProcessStep, Step, Target},
    template::{TemplateError, TemplateId, SHELL_BLOCK_MARKER},
};

use std::path::PathBuf;

pub const PACKAGE_FRONTEND: &str = "package-frontend";
pub const SYSTEM_PACKAGES: &str = "system-packages";
pub const NIX_INSTALL: &str = "nix-install";
pub const NIX_DAEMON: &str = "nix-daemon";
pub const NIX_CONFIG: &str = "nix-config";
pub const HOME_MANAGER_CHANNEL: &str = "home-manager-channel";
pub const HOME_MANAGER_INSTALL: &str = "home-manager-install";
pub const HOME_MANAGER_FLAKE: &str = "home-manager-flake";
pub const HOME_MANAGER_MODULE: &str = "home-manager-module";
pub const HYPRLAND_CONFIG: &str = "hyprland-config";
pub const SHELL_ENVIRONMENT: &str = "shell-environment";
pub const WAYLAND_SESSION: &str = "wayland-session";
pub const DISPLAY_MANAGER: &str = "display-manager";
pub const HOME_MANAGER_SWITCH: &str = "home-manager-switch";

/// Official Nix installer script.
pub const NIX_INSTALLER_URL: &str = "https://nixos.org/nix/install";

/// Home Manager channel tracking the latest release.
pub const HOME_MANAGER_CHANNEL_URL: &str =
    "https://github.com/nix-community/home-manager/archive/master.tar.gz";

/// Build provisioning plan for `profile`.
///
/// # Errors
///
/// - Return [`TemplateError::MissingValue`] if activation is requested but
///   the profile has no home directory to find the flake in.
pub fn plan(profile: &EnvironmentProfile) -> Result<Vec<Box<dyn Step>>, TemplateError> {
    let privileged = profile.is_privileged();
    let multi_user = profile.nix_install() == NixInstall::MultiUser;
    let mut steps = Vec::new();

    if profile.frontend() == PackageFrontend::Nala {
        steps.push(
            ProcessStep::new(PACKAGE_FRONTEND, "install nala package frontend")
                .guard(Guard::ToolAvailable("nala".into()))
                .action(apt_get(["update"]).elevated_unless(privileged))
                .action(apt_get(["install", "-y", "nala"]).elevated_unless(privileged))
                .verify("nala", "install nala by hand or switch back to apt-get")
                .boxed(),
        );
    }

    steps.push(system_packages(profile));

    let installer = format!(
        "curl --proto '=https' --tlsv1.2 -sSfL {NIX_INSTALLER_URL} | sh -s -- {} --yes",
        profile.nix_install().installer_flag()
    );
    let guidance = match profile.nix_profile_script() {
        Some(script) => format!("source {:?} or open a new login shell", script.display()),
        None => "open a new login shell".into(),
    };
    steps.push(
        ProcessStep::new(NIX_INSTALL, "install the Nix package manager")
            .guard(Guard::ToolAvailable("nix".into()))
            .action(Invocation::shell(installer))
            .verify("nix", guidance)
            .requires([SYSTEM_PACKAGES])
            .with_nix_env()
            .boxed(),
    );

    if multi_user {
        steps.push(
            ProcessStep::new(NIX_DAEMON, "enable and start the Nix daemon")
                .guard(Guard::Succeeds(
                    Invocation::new("systemctl").args(["is-active", "--quiet", "nix-daemon"]),
                ))
                .action(
                    Invocation::new("systemctl")
                        .args(["enable", "--now", "nix-daemon"])
                        .elevated_unless(privileged),
                )
                .requires([NIX_INSTALL])
                .boxed(),
        );
    }

    steps.push(
        ArtifactStep::replace(NIX_CONFIG, TemplateId::NixConf, Target::Home(nix_conf_path))
            .requires([NIX_INSTALL])
            .boxed(),
    );

    let mut channel_requires = vec![NIX_INSTALL];
    if multi_user {
        channel_requires.push(NIX_DAEMON);
    }
    steps.push(
        ProcessStep::new(HOME_MANAGER_CHANNEL, "subscribe to the Home Manager channel")
            .guard(Guard::OutputContains {
                invocation: Invocation::new("nix-channel").arg("--list"),
                needle: "home-manager".into(),
            })
            .action(Invocation::new("nix-channel").args([
                "--add",
                HOME_MANAGER_CHANNEL_URL,
                "home-manager",
            ]))
            .action(Invocation::new("nix-channel").arg("--update"))
            .requires(channel_requires)
            .with_nix_env()
            .boxed(),
    );

    steps.push(
        ProcessStep::new(HOME_MANAGER_INSTALL, "install Home Manager")
            .guard(Guard::ToolAvailable("home-manager".into()))
            .action(Invocation::new("nix-shell").args(["<home-manager>", "-A", "install"]))
            .verify(
                "home-manager",
                "check that the home-manager channel is listed by `nix-channel --list`",
            )
            .requires([HOME_MANAGER_CHANNEL])
            .with_nix_env()
            .boxed(),
    );

    steps.push(
        ArtifactStep::replace(
            HOME_MANAGER_FLAKE,
            TemplateId::HomeManagerFlake,
            Target::Home(home_manager_flake_path),
        )
        .boxed(),
    );
    steps.push(
        ArtifactStep::replace(
            HOME_MANAGER_MODULE,
            TemplateId::HomeManagerModule,
            Target::Home(home_manager_module_path),
        )
        .boxed(),
    );
    steps.push(
        ArtifactStep::replace(
            HYPRLAND_CONFIG,
            TemplateId::Hyprland,
            Target::Home(hyprland_conf_path),
        )
        .boxed(),
    );
    steps.push(
        ArtifactStep::append_once(
            SHELL_ENVIRONMENT,
            TemplateId::ShellEnvironment,
            Target::ShellRc,
            SHELL_BLOCK_MARKER,
        )
        .requires([NIX_INSTALL])
        .boxed(),
    );
    steps.push(
        ArtifactStep::replace(
            WAYLAND_SESSION,
            TemplateId::WaylandSession,
            Target::Fixed(wayland_session_path()),
        )
        .elevated()
        .boxed(),
    );

    if let Some(manager) = &profile.desktop().display_manager {
        let policy = if profile.desktop().display_manager_required {
            FailurePolicy::Abort
        } else {
            FailurePolicy::Warn
        };
        steps.push(
            ProcessStep::new(DISPLAY_MANAGER, format!("enable the {manager} display manager"))
                .guard(Guard::Succeeds(
                    Invocation::new("systemctl").args(["is-enabled", "--quiet", manager.as_str()]),
                ))
                .action(
                    Invocation::new("systemctl")
                        .args(["enable", "--force", manager.as_str()])
                        .elevated_unless(privileged),
                )
                .requires([SYSTEM_PACKAGES, WAYLAND_SESSION])
                .policy(policy)
                .boxed(),
        );
    }

    if profile.settings().activate {
        let flake = flake_dir(profile).ok_or_else(|| TemplateError::MissingValue {
            template: TemplateId::HomeManagerFlake,
            key: "home".into(),
        })?;
        steps.push(
            ProcessStep::new(HOME_MANAGER_SWITCH, "activate the Home Manager configuration")
                .action(
                    Invocation::new("home-manager")
                        .arg("switch")
                        .arg("--flake")
                        .arg(flake),
                )
                .requires([
                    NIX_CONFIG,
                    HOME_MANAGER_INSTALL,
                    HOME_MANAGER_FLAKE,
                    HOME_MANAGER_MODULE,
                ])
                .with_nix_env()
                .boxed(),
        );
    }

    Ok(steps)
}

/// Things left for the user to do after a successful run.
pub fn next_actions(profile: &EnvironmentProfile) -> Vec<String> {
    let mut actions =
        vec!["Log out and back in, or reboot, so login shells pick up Nix.".to_string()];

    if !profile.settings().activate {
        let flake = flake_dir(profile)
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| "~/.config/home-manager".into());
        actions.push(format!(
            "Run `home-manager switch --flake {flake}` to build the Hyprland desktop."
        ));
    }

    match &profile.desktop().display_manager {
        Some(manager) => actions.push(format!(
            "Pick the \"Hyprland\" session in {manager} at the next login."
        )),
        None => actions.push("Start Hyprland from a TTY with `Hyprland`.".into()),
    }

    actions
}

fn system_packages(profile: &EnvironmentProfile) -> Box<dyn Step> {
    let mut packages = profile.system_packages().to_vec();
    if let Some(manager) = &profile.desktop().display_manager {
        if !packages.contains(manager) {
            packages.push(manager.clone());
        }
    }

    let frontend = profile.frontend().program();
    let guard = packages.iter().map(|package| is_installed(package)).collect();
    let noninteractive = [("DEBIAN_FRONTEND", "noninteractive")];
    let mut step = ProcessStep::new(
        SYSTEM_PACKAGES,
        format!("install system packages through {frontend}"),
    )
    .guard(Guard::AllSucceed(guard))
    .action(
        Invocation::new(frontend)
            .arg("update")
            .envs(noninteractive)
            .elevated_unless(profile.is_privileged()),
    )
    .action(
        Invocation::new(frontend)
            .args(["install", "-y"])
            .args(&packages)
            .envs(noninteractive)
            .elevated_unless(profile.is_privileged()),
    );

    if profile.frontend() == PackageFrontend::Nala {
        step = step.requires([PACKAGE_FRONTEND]);
    }

    step.boxed()
}

fn apt_get<const N: usize>(args: [&str; N]) -> Invocation {
    Invocation::new("apt-get")
        .args(args)
        .envs([("DEBIAN_FRONTEND", "noninteractive")])
}

fn is_installed(package: &str) -> Invocation {
    Invocation::shell(format!(
        "dpkg-query -W -f='${{Status}}' {package} 2>/dev/null | grep -q 'install ok installed'"
    ))
}

fn flake_dir(profile: &EnvironmentProfile) -> Option<PathBuf> {
    profile.home().map(home_manager_dir)
}
