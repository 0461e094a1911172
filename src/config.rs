// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of deskstrap's configuration file to simplify the
//! process of serialization and deserialization. File I/O is left to the
//! caller to figure out.
//!
//! # Variants
//!
//! Workstations differ in small ways: some prefer nala over plain apt, some
//! want a single-user Nix store instead of the multi-user daemon, some have an
//! NVIDIA card that needs extra environment variables. None of these is more
//! correct than the other, so each one is simply a configuration value that
//! shapes the environment profile and the resulting step list.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Top-level configuration file layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// General behaviour of a provisioning run.
    pub settings: Settings,

    /// Hardware selection.
    pub hardware: HardwareSettings,

    /// Desktop session settings fed into generated artifacts.
    pub desktop: DesktopSettings,

    /// Package listings.
    pub packages: PackageSettings,
}

impl FromStr for ProvisionConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: ProvisionConfig =
            toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on shell rc field.
        config.desktop.shell_rc = ShellRc::new(
            shellexpand::full(config.desktop.shell_rc.to_string().as_str())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned(),
        );

        Ok(config)
    }
}

impl Display for ProvisionConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// General run settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Frontend used to install system packages.
    pub package_frontend: PackageFrontend,

    /// Flavour of Nix installation.
    pub nix_install: NixInstall,

    /// Which identity deskstrap is allowed to run under.
    pub privilege: PrivilegePolicy,

    /// Keep a timestamped copy of any file that gets overwritten.
    pub backup: bool,

    /// Run `home-manager switch` at the end instead of leaving it to the user.
    pub activate: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            package_frontend: PackageFrontend::default(),
            nix_install: NixInstall::default(),
            privilege: PrivilegePolicy::default(),
            backup: true,
            activate: false,
        }
    }
}

/// Hardware selection.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HardwareSettings {
    /// GPU vendor to configure for.
    pub gpu: GpuSelection,
}

/// Desktop session settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DesktopSettings {
    /// Display manager service to install and enable, if any.
    pub display_manager: Option<String>,

    /// Treat a failure to enable the display manager as fatal.
    pub display_manager_required: bool,

    /// Keyboard layout handed to Hyprland's input section.
    pub keyboard_layout: String,

    /// Hyprland monitor rule.
    pub monitor: String,

    /// Terminal bound to the main mod key.
    pub terminal: String,

    /// Application launcher bound to the main mod key.
    pub launcher: String,

    /// Shell rc file that receives the environment block.
    pub shell_rc: ShellRc,

    /// Nix system double used by the flake.
    pub nix_system: String,

    /// Home Manager state version.
    pub state_version: String,
}

impl Default for DesktopSettings {
    fn default() -> Self {
        Self {
            display_manager: Some("sddm".into()),
            display_manager_required: false,
            keyboard_layout: "us".into(),
            monitor: ",preferred,auto,1".into(),
            terminal: "kitty".into(),
            launcher: "wofi --show drun".into(),
            shell_rc: ShellRc::new("~/.bashrc"),
            nix_system: "x86_64-linux".into(),
            state_version: "24.05".into(),
        }
    }
}

/// Package listings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PackageSettings {
    /// Packages installed through the system package manager.
    pub system: Vec<String>,

    /// Packages installed into the user's Home Manager profile.
    pub home: Vec<String>,
}

impl Default for PackageSettings {
    fn default() -> Self {
        Self {
            system: [
                "curl",
                "git",
                "xz-utils",
                "ca-certificates",
                "build-essential",
                "pciutils",
            ]
            .into_iter()
            .map(Into::into)
            .collect(),
            home: [
                "hyprland", "kitty", "waybar", "wofi", "mako", "grim", "slurp", "wl-clipboard",
            ]
            .into_iter()
            .map(Into::into)
            .collect(),
        }
    }
}

/// System package manager frontend.
#[derive(Default, Debug, Copy, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageFrontend {
    /// Plain `apt-get`.
    #[default]
    Apt,

    /// The nala frontend, installed through apt on first use.
    Nala,
}

impl PackageFrontend {
    /// Executable name of the frontend.
    pub fn program(&self) -> &'static str {
        match self {
            Self::Apt => "apt-get",
            Self::Nala => "nala",
        }
    }
}

/// Nix installation flavour.
#[derive(Default, Debug, Copy, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NixInstall {
    /// Multi-user installation backed by `nix-daemon`.
    #[default]
    MultiUser,

    /// Single-user installation owned by the invoking user.
    SingleUser,
}

impl NixInstall {
    /// Flag handed to the upstream installer script.
    pub fn installer_flag(&self) -> &'static str {
        match self {
            Self::MultiUser => "--daemon",
            Self::SingleUser => "--no-daemon",
        }
    }
}

/// Identity policy checked once before any step runs.
#[derive(Default, Debug, Copy, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrivilegePolicy {
    /// Refuse to run as root. Per-user state would end up owned by root.
    #[default]
    ForbidRoot,

    /// Refuse to run unless root.
    RequireRoot,

    /// Run under any identity.
    Any,
}

/// GPU selection.
#[derive(Default, Debug, Copy, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GpuSelection {
    /// Detect the vendor through `lspci`.
    #[default]
    Auto,

    /// NVIDIA proprietary driver.
    Nvidia,

    /// Anything that needs no extra environment.
    Generic,
}

/// Shell rc file receiving the environment block.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ShellRc(PathBuf);

impl ShellRc {
    /// Construct new shell rc path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Treat shell rc as [`Path`] slice.
    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }

    /// Resolve against a home directory.
    ///
    /// A leading `~` left over from an unexpanded default is replaced with
    /// `home`, and relative paths are taken relative to `home`.
    pub fn resolve(&self, home: &Path) -> PathBuf {
        match self.0.strip_prefix("~") {
            Ok(rest) => home.join(rest),
            Err(_) if self.0.is_relative() => home.join(&self.0),
            Err(_) => self.0.clone(),
        }
    }
}

impl Display for ShellRc {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_path().to_string_lossy().as_ref())
    }
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
