// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Artifact templates.
//!
//! Every file deskstrap generates comes from one of a small set of named,
//! versioned templates. Rendering is a pure function of the template and an
//! [`EnvironmentProfile`]: the same profile always yields byte-identical text.
//!
//! # Placeholder Syntax
//!
//! Placeholders are written as `{{ key }}`. Whitespace inside the braces is
//! ignored. Single braces are left alone, which keeps Nix attribute sets and
//! Hyprland sections readable in the template sources. A placeholder whose
//! key has no value in the profile is an error, never an empty substitution.
//!
//! Some values are whole blocks of lines, e.g., the NVIDIA environment lines.
//! Those carry their own trailing newline and are empty when not applicable,
//! so a template places them at the start of a line with no newline after.

use crate::profile::EnvironmentProfile;

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// First line of the block appended to the user's shell rc file.
pub const SHELL_BLOCK_MARKER: &str = "# >>> deskstrap environment >>>";

/// Environment variables the proprietary NVIDIA driver needs under Wayland.
pub const NVIDIA_ENV: &[(&str, &str)] = &[
    ("LIBVA_DRIVER_NAME", "nvidia"),
    ("GBM_BACKEND", "nvidia-drm"),
    ("__GLX_VENDOR_LIBRARY_NAME", "nvidia"),
    ("WLR_NO_HARDWARE_CURSORS", "1"),
];

/// Identifier of a template.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TemplateId {
    NixConf,
    HomeManagerFlake,
    HomeManagerModule,
    Hyprland,
    WaylandSession,
    ShellEnvironment,
}

impl TemplateId {
    /// Every template, in the order they are usually generated.
    pub const ALL: [TemplateId; 6] = [
        Self::NixConf,
        Self::HomeManagerFlake,
        Self::HomeManagerModule,
        Self::Hyprland,
        Self::WaylandSession,
        Self::ShellEnvironment,
    ];

    /// Stable name used on the command line and in generated headers.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NixConf => "nix-conf",
            Self::HomeManagerFlake => "home-manager-flake",
            Self::HomeManagerModule => "home-manager-module",
            Self::Hyprland => "hyprland",
            Self::WaylandSession => "wayland-session",
            Self::ShellEnvironment => "shell-environment",
        }
    }

    /// Revision of template text. Bump whenever the text changes.
    pub fn version(&self) -> u32 {
        match self {
            Self::NixConf => 1,
            Self::HomeManagerFlake => 2,
            Self::HomeManagerModule => 2,
            Self::Hyprland => 3,
            Self::WaylandSession => 1,
            Self::ShellEnvironment => 3,
        }
    }

    fn source(&self) -> &'static str {
        match self {
            Self::NixConf => NIX_CONF,
            Self::HomeManagerFlake => HOME_MANAGER_FLAKE,
            Self::HomeManagerModule => HOME_MANAGER_MODULE,
            Self::Hyprland => HYPRLAND,
            Self::WaylandSession => WAYLAND_SESSION,
            Self::ShellEnvironment => SHELL_ENVIRONMENT,
        }
    }
}

impl Display for TemplateId {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.name())
    }
}

impl FromStr for TemplateId {
    type Err = TemplateError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.name() == name)
            .ok_or_else(|| TemplateError::Unknown { name: name.into() })
    }
}

/// Render template with values drawn from profile.
///
/// # Errors
///
/// - Return [`TemplateError::MissingValue`] if the profile lacks a value the
///   template needs, e.g., no `$USER`.
/// - Return [`TemplateError::Unterminated`] if a placeholder is not closed.
pub fn render(id: TemplateId, profile: &EnvironmentProfile) -> Result<String> {
    let mut values = variables(profile);
    values.insert(
        "header",
        format!(
            "Generated by deskstrap from template {} v{}.",
            id.name(),
            id.version()
        ),
    );

    substitute(id, id.source(), &values)
}

/// Values a profile provides to templates.
///
/// Keys whose backing fact is absent from the profile are left out.
pub fn variables(profile: &EnvironmentProfile) -> BTreeMap<&'static str, String> {
    let desktop = profile.desktop();
    let nvidia = profile.gpu().is_nvidia();
    let mut values = BTreeMap::new();

    if let Some(user) = profile.user() {
        values.insert("user", user.to_owned());
    }
    if let Some(home) = profile.home() {
        values.insert("home", home.to_string_lossy().into_owned());
        values.insert(
            "hyprland_exec",
            crate::path::nix_profile_bin(home)
                .join("Hyprland")
                .to_string_lossy()
                .into_owned(),
        );
    }
    if profile.home().is_some() {
        let channels = profile
            .nix_channel_dirs()
            .iter()
            .map(|dir| dir.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(":");
        values.insert("nix_channels", channels);
    }
    if let Some(script) = profile.nix_profile_script() {
        values.insert("nix_profile_script", script.to_string_lossy().into_owned());
    }

    values.insert("system", desktop.nix_system.clone());
    values.insert("state_version", desktop.state_version.clone());
    values.insert("monitor", desktop.monitor.clone());
    values.insert("keyboard_layout", desktop.keyboard_layout.clone());
    values.insert("terminal", desktop.terminal.clone());
    values.insert("launcher", desktop.launcher.clone());
    values.insert(
        "packages",
        lines(profile.home_packages(), |package| format!("    {package}")),
    );
    values.insert(
        "nvidia_env",
        lines(nvidia_env(nvidia), |(key, value)| format!("env = {key},{value}")),
    );
    values.insert(
        "nvidia_exports",
        lines(nvidia_env(nvidia), |(key, value)| {
            format!("export {key}={value}")
        }),
    );
    values.insert(
        "session_variables",
        lines(nvidia_env(nvidia), |(key, value)| {
            format!("    {key} = \"{value}\";")
        }),
    );

    values
}

fn nvidia_env(enabled: bool) -> &'static [(&'static str, &'static str)] {
    if enabled {
        NVIDIA_ENV
    } else {
        &[]
    }
}

fn lines<T>(items: impl IntoIterator<Item = T>, line: impl Fn(T) -> String) -> String {
    items.into_iter().fold(String::new(), |mut block, item| {
        block.push_str(&line(item));
        block.push('\n');
        block
    })
}

fn substitute(id: TemplateId, source: &str, values: &BTreeMap<&str, String>) -> Result<String> {
    let mut output = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| TemplateError::Unterminated {
            template: id,
            offset: source.len() - rest.len() + start,
        })?;

        let key = after[..end].trim();
        let value = values.get(key).ok_or_else(|| TemplateError::MissingValue {
            template: id,
            key: key.into(),
        })?;
        output.push_str(value);
        rest = &after[end + 2..];
    }
    output.push_str(rest);

    Ok(output)
}

const NIX_CONF: &str = r#"# {{ header }}
experimental-features = nix-command flakes
"#;

const HOME_MANAGER_FLAKE: &str = r#"# {{ header }}
{
  description = "Home Manager configuration of {{ user }}";

  inputs = {
    nixpkgs.url = "github:nixos/nixpkgs/nixos-unstable";
    home-manager = {
      url = "github:nix-community/home-manager";
      inputs.nixpkgs.follows = "nixpkgs";
    };
  };

  outputs = { nixpkgs, home-manager, ... }:
    let
      system = "{{ system }}";
      pkgs = nixpkgs.legacyPackages.${system};
    in
    {
      homeConfigurations."{{ user }}" = home-manager.lib.homeManagerConfiguration {
        inherit pkgs;
        modules = [ ./home.nix ];
      };
    };
}
"#;

const HOME_MANAGER_MODULE: &str = r#"# {{ header }}
{ config, pkgs, ... }:

{
  home.username = "{{ user }}";
  home.homeDirectory = "{{ home }}";
  home.stateVersion = "{{ state_version }}";

  home.packages = with pkgs; [
{{ packages }}  ];

  home.sessionVariables = {
{{ session_variables }}  };

  programs.home-manager.enable = true;
}
"#;

const HYPRLAND: &str = r#"# {{ header }}

monitor = {{ monitor }}

{{ nvidia_env }}env = XCURSOR_SIZE,24

exec-once = waybar
exec-once = mako

input {
    kb_layout = {{ keyboard_layout }}
    follow_mouse = 1

    touchpad {
        natural_scroll = true
    }
}

general {
    gaps_in = 5
    gaps_out = 10
    border_size = 2
    layout = dwindle
}

decoration {
    rounding = 8
}

$mod = SUPER

bind = $mod, Return, exec, {{ terminal }}
bind = $mod, D, exec, {{ launcher }}
bind = $mod, Q, killactive,
bind = $mod SHIFT, E, exit,
bind = $mod, F, fullscreen,
bind = $mod, V, togglefloating,
bind = $mod, left, movefocus, l
bind = $mod, right, movefocus, r
bind = $mod, up, movefocus, u
bind = $mod, down, movefocus, d
bind = $mod, 1, workspace, 1
bind = $mod, 2, workspace, 2
bind = $mod, 3, workspace, 3
bind = $mod, 4, workspace, 4
bind = $mod, 5, workspace, 5
bind = $mod SHIFT, 1, movetoworkspace, 1
bind = $mod SHIFT, 2, movetoworkspace, 2
bind = $mod SHIFT, 3, movetoworkspace, 3
bind = $mod SHIFT, 4, movetoworkspace, 4
bind = $mod SHIFT, 5, movetoworkspace, 5
bindm = $mod, mouse:272, movewindow
bindm = $mod, mouse:273, resizewindow
"#;

const WAYLAND_SESSION: &str = r#"# {{ header }}
[Desktop Entry]
Name=Hyprland
Comment=An intelligent dynamic tiling Wayland compositor
Exec={{ hyprland_exec }}
Type=Application
"#;

const SHELL_ENVIRONMENT: &str = r#"# >>> deskstrap environment >>>
# {{ header }}
if [ -e "{{ nix_profile_script }}" ]; then
    . "{{ nix_profile_script }}"
fi
export NIX_PATH="{{ nix_channels }}${NIX_PATH:+:$NIX_PATH}"
{{ nvidia_exports }}# <<< deskstrap environment <<<
"#;

/// Template rendering error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// Profile has no value for a placeholder.
    #[error("template {template} needs a value for {key:?}, but none is available")]
    MissingValue { template: TemplateId, key: String },

    /// Placeholder opened but never closed.
    #[error("template {template} has an unterminated placeholder at byte {offset}")]
    Unterminated { template: TemplateId, offset: usize },

    /// No template goes by the given name.
    #[error("no template named {name:?}")]
    Unknown { name: String },
}

/// Friendly result alias :3
pub type Result<T, E = TemplateError> = std::result::Result<T, E>;
