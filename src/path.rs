// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where deskstrap looks for its own configuration, and where the
//! artifacts it generates are placed relative to a user's home directory.

use std::path::{Path, PathBuf};

/// System-wide directory that display managers scan for Wayland sessions.
pub const WAYLAND_SESSIONS_DIR: &str = "/usr/share/wayland-sessions";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to deskstrap's configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/deskstrap/config.toml`.
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("deskstrap").join("config.toml"))
        .ok_or(NoWayHome)
}

/// Directory holding the Home Manager flake for a given home directory.
pub fn home_manager_dir(home: &Path) -> PathBuf {
    home.join(".config").join("home-manager")
}

/// Home Manager flake describing the user's configuration.
pub fn home_manager_flake_path(home: &Path) -> PathBuf {
    home_manager_dir(home).join("flake.nix")
}

/// Home Manager module holding packages and session variables.
pub fn home_manager_module_path(home: &Path) -> PathBuf {
    home_manager_dir(home).join("home.nix")
}

/// Per-user Nix configuration file.
pub fn nix_conf_path(home: &Path) -> PathBuf {
    home.join(".config").join("nix").join("nix.conf")
}

/// Hyprland's main configuration file.
pub fn hyprland_conf_path(home: &Path) -> PathBuf {
    home.join(".config").join("hypr").join("hyprland.conf")
}

/// Binary directory of the per-user Nix profile.
pub fn nix_profile_bin(home: &Path) -> PathBuf {
    home.join(".nix-profile").join("bin")
}

/// Session descriptor that display managers list as "Hyprland".
pub fn wayland_session_path() -> PathBuf {
    Path::new(WAYLAND_SESSIONS_DIR).join("hyprland.desktop")
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
