// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Steps that generate files from templates.
//!
//! A replaced artifact counts as satisfied when the file on disk already
//! holds exactly what the template renders to. Nothing is rewritten, and no
//! backup is taken, on a run that would not change anything. An appended
//! artifact counts as satisfied as soon as its marker shows up in the file.

use crate::{
    artifact::{self, AppendOutcome, DEFAULT_MODE},
    profile::EnvironmentProfile,
    step::{Result, Step, StepContext},
    template::{self, TemplateError, TemplateId},
};

use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Where an artifact lives.
#[derive(Debug, Clone)]
pub enum Target {
    /// Fixed absolute path.
    Fixed(PathBuf),

    /// Path derived from the user's home directory.
    Home(fn(&Path) -> PathBuf),

    /// The shell rc file chosen in the profile.
    ShellRc,
}

impl Target {
    /// Resolve target against profile.
    ///
    /// # Errors
    ///
    /// - Return [`TemplateError::MissingValue`] if the target depends on a
    ///   home directory the profile does not know.
    pub fn resolve(&self, template: TemplateId, profile: &EnvironmentProfile) -> Result<PathBuf> {
        let home = || {
            profile.home().ok_or_else(|| TemplateError::MissingValue {
                template,
                key: "home".into(),
            })
        };

        Ok(match self {
            Self::Fixed(path) => path.clone(),
            Self::Home(derive) => derive(home()?),
            Self::ShellRc => profile.desktop().shell_rc.resolve(home()?),
        })
    }
}

/// How rendered content lands in the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Atomically replace target.
    Replace { mode: u32, elevated: bool },

    /// Append to target once, guarded by marker.
    AppendOnce { marker: &'static str },
}

/// Step that renders a template into a file.
#[derive(Debug, Clone)]
pub struct ArtifactStep {
    name: String,
    template: TemplateId,
    target: Target,
    placement: Placement,
    requires: Vec<String>,
}

impl ArtifactStep {
    /// Construct step replacing `target` with rendered `template`.
    pub fn replace(name: impl Into<String>, template: TemplateId, target: Target) -> Self {
        Self {
            name: name.into(),
            template,
            target,
            placement: Placement::Replace {
                mode: DEFAULT_MODE,
                elevated: false,
            },
            requires: Vec::new(),
        }
    }

    /// Construct step appending rendered `template` to `target` unless
    /// `marker` is already there.
    pub fn append_once(
        name: impl Into<String>,
        template: TemplateId,
        target: Target,
        marker: &'static str,
    ) -> Self {
        Self {
            placement: Placement::AppendOnce { marker },
            ..Self::replace(name, template, target)
        }
    }

    /// Write target through the privileged helper when not root.
    pub fn elevated(mut self) -> Self {
        if let Placement::Replace { elevated, .. } = &mut self.placement {
            *elevated = true;
        }
        self
    }

    /// Declare steps that must run before this one.
    pub fn requires(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.requires.extend(names.into_iter().map(Into::into));
        self
    }

    /// Box step for use in a plan.
    pub fn boxed(self) -> Box<dyn Step> {
        Box::new(self)
    }

    pub fn template(&self) -> TemplateId {
        self.template
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }
}

impl Step for ArtifactStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn summary(&self) -> String {
        let location = match &self.target {
            Target::Fixed(path) => path.display().to_string(),
            Target::Home(derive) => derive(Path::new("~")).display().to_string(),
            Target::ShellRc => "shell rc file".into(),
        };

        match self.placement {
            Placement::Replace { .. } => format!(
                "write {location} from template {} v{}",
                self.template,
                self.template.version()
            ),
            Placement::AppendOnce { .. } => {
                format!("append {} block to {location}", self.template)
            }
        }
    }

    fn requires(&self) -> &[String] {
        &self.requires
    }

    #[instrument(skip(self, ctx), fields(step = %self.name), level = "debug")]
    fn is_satisfied(&self, ctx: &StepContext<'_>) -> Result<bool> {
        let path = self.target.resolve(self.template, ctx.profile)?;
        let satisfied = match self.placement {
            Placement::Replace { .. } => {
                let content = template::render(self.template, ctx.profile)?;
                artifact::has_content(&path, &content)?
            }
            Placement::AppendOnce { marker } => artifact::contains_marker(&path, marker)?,
        };

        Ok(satisfied)
    }

    #[instrument(skip(self, ctx), fields(step = %self.name), level = "debug")]
    fn apply(&self, ctx: &StepContext<'_>) -> Result<()> {
        let path = self.target.resolve(self.template, ctx.profile)?;
        let content = template::render(self.template, ctx.profile)?;

        match self.placement {
            Placement::Replace { mode, elevated } => {
                if let Some(backup) = ctx.writer.write(&path, &content, mode, elevated)? {
                    info!("previous {:?} kept at {:?}", path.display(), backup.display());
                }
            }
            Placement::AppendOnce { marker } => {
                match ctx.writer.append_block(&path, marker, &content)? {
                    AppendOutcome::Appended {
                        backup: Some(backup),
                    } => {
                        info!("previous {:?} kept at {:?}", path.display(), backup.display());
                    }
                    AppendOutcome::Appended { backup: None } | AppendOutcome::AlreadyPresent => {}
                }
            }
        }

        Ok(())
    }
}
