// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Workstation provisioning.
//!
//! deskstrap turns a fresh Debian-family machine into a Hyprland desktop
//! managed through Nix and Home Manager. Provisioning is an ordered plan of
//! idempotent [`step::Step`]s run by an [`orchestrator::Orchestrator`]. Each
//! step first checks whether its effect is already present, so running
//! deskstrap again only does whatever is still missing.
//!
//! # Bootstrap Flow
//!
//! 1. Load [`config::ProvisionConfig`] and gather the
//!    [`profile::EnvironmentProfile`] of the machine once.
//! 2. Build the plan with [`workstation::plan`].
//! 3. Run the plan. Generated files go through the [`artifact::ArtifactWriter`]
//!    and external programs through a [`command::CommandRunner`].

pub mod artifact;
pub mod command;
pub mod config;
pub mod orchestrator;
pub mod path;
pub mod profile;
pub mod step;
pub mod template;
pub mod workstation;
