// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Environment profile.
//!
//! The __environment profile__ is the set of facts about the machine and the
//! invoking user that every step needs: who is running, where their home is,
//! whether the process is privileged, and which variant of workstation is
//! being provisioned. It is gathered exactly once before anything runs, and
//! then only ever handed out by shared reference. Steps never read `$USER` or
//! `$HOME` on their own.

use crate::{
    command::{CommandRunner, Invocation},
    config::{
        DesktopSettings, GpuSelection, NixInstall, PackageFrontend, ProvisionConfig, Settings,
    },
    path::{self, nix_profile_bin},
};

use nix::unistd::{geteuid, User};
use std::{
    collections::BTreeMap,
    env,
    ffi::OsString,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Default profile of a multi-user Nix installation.
pub const NIX_DEFAULT_PROFILE: &str = "/nix/var/nix/profiles/default";

/// Channels of root, where a multi-user installation subscribes `nixpkgs`.
pub const NIX_ROOT_CHANNELS: &str = "/nix/var/nix/profiles/per-user/root/channels";

/// Raw facts read from the process environment.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HostFacts {
    /// Login name from `$USER`, or from the password database.
    pub user: Option<String>,

    /// Home directory from `$HOME`.
    pub home: Option<PathBuf>,

    /// Effective uid is root.
    pub privileged: bool,

    /// Value of `$NIX_PATH`.
    pub nix_path: Option<String>,

    /// Value of `$PATH`.
    pub search_path: Option<OsString>,
}

impl HostFacts {
    /// Read facts from the current process.
    ///
    /// Empty variables count as absent. Falls back to the password database
    /// for the user name if `$USER` is not set, and through [`dirs`] for the
    /// home directory if `$HOME` is not set.
    pub fn from_env() -> Self {
        let home = env::var_os("HOME")
            .filter(|home| !home.is_empty())
            .map(PathBuf::from)
            .or_else(|| path::home_dir().ok());

        Self {
            user: env::var("USER")
                .ok()
                .filter(|user| !user.is_empty())
                .or_else(passwd_user),
            home,
            privileged: geteuid().is_root(),
            nix_path: env::var("NIX_PATH").ok().filter(|path| !path.is_empty()),
            search_path: env::var_os("PATH").filter(|path| !path.is_empty()),
        }
    }
}

/// Name of the effective user in the password database.
fn passwd_user() -> Option<String> {
    match User::from_uid(geteuid()) {
        Ok(user) => user.map(|user| user.name),
        Err(err) => {
            debug!("no password entry for effective uid: {err}");
            None
        }
    }
}

/// GPU vendor the workstation is configured for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GpuProfile {
    Nvidia,
    Generic,
}

impl GpuProfile {
    /// Resolve configured selection, probing `lspci` for automatic selection.
    ///
    /// Detection failure is not fatal. A machine whose GPU cannot be
    /// determined is treated as generic.
    #[instrument(skip(runner), level = "debug")]
    pub fn resolve(selection: GpuSelection, runner: &dyn CommandRunner) -> Self {
        match selection {
            GpuSelection::Nvidia => Self::Nvidia,
            GpuSelection::Generic => Self::Generic,
            GpuSelection::Auto => match runner.capture(&Invocation::new("lspci")) {
                Ok(listing) => Self::from_lspci(&listing),
                Err(error) => {
                    warn!("cannot detect GPU vendor, assuming generic: {error}");
                    Self::Generic
                }
            },
        }
    }

    /// Classify `lspci` output.
    pub fn from_lspci(listing: &str) -> Self {
        let nvidia = listing
            .lines()
            .filter(|line| line.contains("VGA") || line.contains("3D controller"))
            .any(|line| line.to_ascii_lowercase().contains("nvidia"));
        debug!("nvidia display controller present: {nvidia}");

        if nvidia {
            Self::Nvidia
        } else {
            Self::Generic
        }
    }

    /// Check if profile is NVIDIA.
    pub fn is_nvidia(&self) -> bool {
        matches!(self, Self::Nvidia)
    }
}

/// Read-only environment profile threaded through every step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentProfile {
    facts: HostFacts,
    gpu: GpuProfile,
    settings: Settings,
    desktop: DesktopSettings,
    system_packages: Vec<String>,
    home_packages: Vec<String>,
}

impl EnvironmentProfile {
    /// Construct new environment profile from gathered facts and configuration.
    pub fn new(facts: HostFacts, gpu: GpuProfile, config: &ProvisionConfig) -> Self {
        Self {
            facts,
            gpu,
            settings: config.settings.clone(),
            desktop: config.desktop.clone(),
            system_packages: config.packages.system.clone(),
            home_packages: config.packages.home.clone(),
        }
    }

    /// Gather profile from the running process.
    pub fn gather(config: &ProvisionConfig, runner: &dyn CommandRunner) -> Self {
        let facts = HostFacts::from_env();
        let gpu = GpuProfile::resolve(config.hardware.gpu, runner);
        info!(
            "profile: user {:?}, home {:?}, privileged {}, gpu {:?}",
            facts.user, facts.home, facts.privileged, gpu
        );

        Self::new(facts, gpu, config)
    }

    pub fn user(&self) -> Option<&str> {
        self.facts.user.as_deref()
    }

    pub fn home(&self) -> Option<&Path> {
        self.facts.home.as_deref()
    }

    pub fn is_privileged(&self) -> bool {
        self.facts.privileged
    }

    pub fn gpu(&self) -> GpuProfile {
        self.gpu
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn desktop(&self) -> &DesktopSettings {
        &self.desktop
    }

    pub fn frontend(&self) -> PackageFrontend {
        self.settings.package_frontend
    }

    pub fn nix_install(&self) -> NixInstall {
        self.settings.nix_install
    }

    pub fn system_packages(&self) -> &[String] {
        &self.system_packages
    }

    pub fn home_packages(&self) -> &[String] {
        &self.home_packages
    }

    /// Channel directories Nix tools search, most specific first.
    ///
    /// The user's own channels always come first. A multi-user installation
    /// keeps `nixpkgs` in root's channels, so those follow.
    pub fn nix_channel_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(home) = self.home() {
            dirs.push(home.join(".nix-defexpr").join("channels"));
        }
        if self.nix_install() == NixInstall::MultiUser {
            dirs.push(PathBuf::from(NIX_ROOT_CHANNELS));
        }

        dirs
    }

    /// Channel search path for Nix tools.
    ///
    /// Channel directories come first, followed by inherited `$NIX_PATH`.
    pub fn nix_path(&self) -> Option<String> {
        let mut entries: Vec<String> = self
            .nix_channel_dirs()
            .iter()
            .map(|dir| dir.to_string_lossy().into_owned())
            .collect();
        if let Some(inherited) = &self.facts.nix_path {
            for entry in inherited.split(':') {
                if !entry.is_empty() && !entries.iter().any(|seen| seen == entry) {
                    entries.push(entry.to_owned());
                }
            }
        }

        (!entries.is_empty()).then(|| entries.join(":"))
    }

    /// Shell script that puts Nix on the search path of a login shell.
    pub fn nix_profile_script(&self) -> Option<PathBuf> {
        match self.nix_install() {
            NixInstall::MultiUser => Some(
                Path::new(NIX_DEFAULT_PROFILE)
                    .join("etc")
                    .join("profile.d")
                    .join("nix-daemon.sh"),
            ),
            NixInstall::SingleUser => self.home().map(|home| {
                home.join(".nix-profile")
                    .join("etc")
                    .join("profile.d")
                    .join("nix.sh")
            }),
        }
    }

    /// Environment overlay that makes a fresh Nix installation usable
    /// without sourcing any shell profile.
    pub fn nix_env_overlay(&self) -> BTreeMap<OsString, OsString> {
        let mut dirs = Vec::new();
        if let Some(home) = self.home() {
            dirs.push(nix_profile_bin(home));
        }
        dirs.push(Path::new(NIX_DEFAULT_PROFILE).join("bin"));
        if let Some(search_path) = &self.facts.search_path {
            dirs.extend(env::split_paths(search_path));
        }

        let mut overlay = BTreeMap::new();
        if let Ok(joined) = env::join_paths(dirs) {
            overlay.insert(OsString::from("PATH"), joined);
        }
        if let Some(nix_path) = self.nix_path() {
            overlay.insert(OsString::from("NIX_PATH"), OsString::from(nix_path));
        }

        overlay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::ScriptedRunner;
    use indoc::indoc;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;
    use std::ffi::OsStr;

    fn facts() -> HostFacts {
        HostFacts {
            user: Some("ada".into()),
            home: Some("/home/ada".into()),
            privileged: false,
            nix_path: None,
            search_path: Some("/usr/bin:/bin".into()),
        }
    }

    #[sealed_test(env = [
        ("USER", "ada"),
        ("HOME", "/home/ada"),
        ("NIX_PATH", "nixpkgs=/nix/channels/nixpkgs"),
        ("PATH", "/usr/bin:/bin"),
    ])]
    fn host_facts_from_env() {
        let result = HostFacts::from_env();
        assert_eq!(result.user.as_deref(), Some("ada"));
        assert_eq!(result.home, Some(PathBuf::from("/home/ada")));
        assert_eq!(
            result.nix_path.as_deref(),
            Some("nixpkgs=/nix/channels/nixpkgs")
        );
        assert_eq!(result.search_path, Some(OsString::from("/usr/bin:/bin")));
    }

    #[sealed_test(env = [("NIX_PATH", "")])]
    fn empty_variables_count_as_absent() {
        let result = HostFacts::from_env();
        assert_eq!(result.nix_path, None);
    }

    #[sealed_test(env = [("USER", "")])]
    fn missing_user_falls_back_to_password_database() {
        let expect = User::from_uid(geteuid()).unwrap().map(|user| user.name);
        let result = HostFacts::from_env();
        assert_eq!(result.user, expect);
    }

    #[test]
    fn lspci_listing_with_nvidia_controller() {
        let listing = indoc! {"
            00:02.0 VGA compatible controller: Intel Corporation UHD Graphics 630
            01:00.0 3D controller: NVIDIA Corporation TU117M [GeForce GTX 1650 Mobile]
            02:00.0 Network controller: Intel Corporation Wi-Fi 6 AX200
        "};
        assert_eq!(GpuProfile::from_lspci(listing), GpuProfile::Nvidia);
    }

    #[test]
    fn lspci_listing_ignores_non_display_devices() {
        let listing = indoc! {"
            00:02.0 VGA compatible controller: Advanced Micro Devices, Inc. [AMD/ATI] Navi 23
            00:1f.3 Audio device: NVIDIA Corporation GA104 High Definition Audio
        "};
        assert_eq!(GpuProfile::from_lspci(listing), GpuProfile::Generic);
    }

    #[test_case(GpuSelection::Nvidia, GpuProfile::Nvidia; "forced nvidia")]
    #[test_case(GpuSelection::Generic, GpuProfile::Generic; "forced generic")]
    #[test]
    fn explicit_selection_skips_detection(selection: GpuSelection, expect: GpuProfile) {
        let runner = ScriptedRunner::new();
        assert_eq!(GpuProfile::resolve(selection, &runner), expect);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn failed_detection_falls_back_to_generic() {
        let runner = ScriptedRunner::new().on("lspci", 127, "");
        assert_eq!(
            GpuProfile::resolve(GpuSelection::Auto, &runner),
            GpuProfile::Generic
        );
    }

    #[test]
    fn nix_overlay_prefers_profile_bins() {
        let profile = EnvironmentProfile::new(
            facts(),
            GpuProfile::Generic,
            &ProvisionConfig::default(),
        );
        let overlay = profile.nix_env_overlay();
        assert_eq!(
            overlay.get(OsStr::new("PATH")),
            Some(&OsString::from(
                "/home/ada/.nix-profile/bin:/nix/var/nix/profiles/default/bin:/usr/bin:/bin"
            ))
        );
        assert_eq!(
            overlay.get(OsStr::new("NIX_PATH")),
            Some(&OsString::from(
                "/home/ada/.nix-defexpr/channels:/nix/var/nix/profiles/per-user/root/channels"
            ))
        );
    }

    #[test_case(
        NixInstall::MultiUser,
        "/home/ada/.nix-defexpr/channels:/nix/var/nix/profiles/per-user/root/channels:nixos-config=/etc/nixos";
        "multi user"
    )]
    #[test_case(
        NixInstall::SingleUser,
        "/home/ada/.nix-defexpr/channels:nixos-config=/etc/nixos";
        "single user"
    )]
    #[test]
    fn nix_path_keeps_inherited_entries_after_channels(install: NixInstall, expect: &str) {
        let mut config = ProvisionConfig::default();
        config.settings.nix_install = install;
        let facts = HostFacts {
            nix_path: Some(
                "/nix/var/nix/profiles/per-user/root/channels:nixos-config=/etc/nixos".into(),
            ),
            ..facts()
        };
        let profile = EnvironmentProfile::new(facts, GpuProfile::Generic, &config);
        assert_eq!(profile.nix_path().as_deref(), Some(expect));
    }

    #[test_case(NixInstall::MultiUser, "/nix/var/nix/profiles/default/etc/profile.d/nix-daemon.sh"; "multi user")]
    #[test_case(NixInstall::SingleUser, "/home/ada/.nix-profile/etc/profile.d/nix.sh"; "single user")]
    #[test]
    fn nix_profile_script_follows_install_flavour(install: NixInstall, expect: &str) {
        let mut config = ProvisionConfig::default();
        config.settings.nix_install = install;
        let profile = EnvironmentProfile::new(facts(), GpuProfile::Generic, &config);
        assert_eq!(profile.nix_profile_script(), Some(PathBuf::from(expect)));
    }
}
