// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Artifact writing.
//!
//! Generated files must never be observed half-written. A file is first
//! __staged__ as a temporary file next to its destination, flushed to disk,
//! and given its final mode. Only then is it __committed__ by renaming it
//! over the destination, which replaces the old file in one step. A staged
//! artifact that is dropped without being committed removes its temporary
//! file and leaves the destination untouched.
//!
//! Files under system directories need root. When the process is not
//! privileged, the artifact is staged in the system temporary directory and
//! moved into place through `sudo`, again through a sibling temporary path
//! and a rename.

use crate::command::{CommandRunner, Invocation};

use chrono::Local;
use std::{
    fs::{self, Permissions},
    io::{ErrorKind, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

/// Mode used for generated files unless stated otherwise.
pub const DEFAULT_MODE: u32 = 0o644;

/// Artifact staged next to its destination but not yet committed.
#[derive(Debug)]
pub struct StagedArtifact {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedArtifact {
    /// Stage `content` for `target` with permission bits `mode`.
    ///
    /// Creates missing parent directories of `target`. A symlinked `target`
    /// is staged next to the file it points at.
    ///
    /// # Errors
    ///
    /// - Return [`ArtifactError::Permission`] if the parent directory is not
    ///   writable.
    /// - Return [`ArtifactError::Io`] for any other I/O failure.
    pub fn new(target: impl Into<PathBuf>, content: &str, mode: u32) -> Result<Self> {
        let target = resolve_link(&target.into())?;
        let parent = parent_dir(&target);
        mkdirp::mkdirp(&parent).map_err(|err| io_error(&parent, err))?;

        let temp = tempfile::Builder::new()
            .prefix(".deskstrap-")
            .suffix(".tmp")
            .tempfile_in(&parent)
            .map_err(|err| io_error(&parent, err))?;
        fill(&temp, content, mode)?;

        Ok(Self { temp, target })
    }

    /// Path of temporary file holding staged content.
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Atomically replace destination with staged content.
    ///
    /// # Errors
    ///
    /// - Return [`ArtifactError::Permission`] or [`ArtifactError::Io`] if the
    ///   rename fails.
    pub fn commit(self) -> Result<()> {
        self.temp
            .persist(&self.target)
            .map_err(|err| io_error(&self.target, err.error))?;
        debug!("committed {:?}", self.target.display());

        Ok(())
    }
}

/// Result of a block append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Block was appended, possibly after backing up the previous file.
    Appended { backup: Option<PathBuf> },

    /// Marker already present, file left alone.
    AlreadyPresent,
}

/// Write generated artifacts to their destinations.
pub struct ArtifactWriter<'a> {
    runner: &'a dyn CommandRunner,
    privileged: bool,
    backup: bool,
}

impl<'a> ArtifactWriter<'a> {
    /// Construct new artifact writer.
    ///
    /// `privileged` tells whether the process may write system paths
    /// directly. `backup` enables timestamped copies of overwritten files.
    pub fn new(runner: &'a dyn CommandRunner, privileged: bool, backup: bool) -> Self {
        Self {
            runner,
            privileged,
            backup,
        }
    }

    /// Write `content` to `path` atomically.
    ///
    /// Returns path of the backup copy, if one was made.
    ///
    /// # Errors
    ///
    /// - Return [`ArtifactError::Permission`] if the destination cannot be
    ///   written, or if the privileged helper fails.
    /// - Return [`ArtifactError::Io`] for any other I/O failure.
    #[instrument(skip(self, content), level = "debug")]
    pub fn write(
        &self,
        path: &Path,
        content: &str,
        mode: u32,
        requires_elevation: bool,
    ) -> Result<Option<PathBuf>> {
        let resolved = resolve_link(path)?;
        let path = resolved.as_path();
        if requires_elevation && !self.privileged {
            return self.write_elevated(path, content, mode);
        }

        let staged = StagedArtifact::new(path, content, mode)?;
        let backup = self.backup_existing(path)?;
        staged.commit()?;
        info!("wrote {:?}", path.display());

        Ok(backup)
    }

    /// Append `block` to `path` unless `marker` already occurs in it.
    ///
    /// Existing content is kept as is. The block is separated from it by a
    /// blank line. A missing file is created with [`DEFAULT_MODE`].
    ///
    /// # Errors
    ///
    /// - Return [`ArtifactError::Io`] if the file cannot be read.
    /// - Return any error of [`ArtifactWriter::write`].
    #[instrument(skip(self, block), level = "debug")]
    pub fn append_block(&self, path: &Path, marker: &str, block: &str) -> Result<AppendOutcome> {
        let existing = read_optional(path)?;
        if let Some(existing) = &existing {
            if existing.contains(marker) {
                info!("{:?} already contains {marker:?}", path.display());
                return Ok(AppendOutcome::AlreadyPresent);
            }
        }

        let mode = match fs::metadata(path) {
            Ok(metadata) => metadata.permissions().mode() & 0o7777,
            Err(_) => DEFAULT_MODE,
        };

        let mut content = existing.unwrap_or_default();
        if !content.is_empty() {
            if !content.ends_with('\n') {
                content.push('\n');
            }
            content.push('\n');
        }
        content.push_str(block);

        let backup = self.write(path, &content, mode, false)?;

        Ok(AppendOutcome::Appended { backup })
    }

    fn backup_existing(&self, path: &Path) -> Result<Option<PathBuf>> {
        if !self.backup || !path.exists() {
            return Ok(None);
        }

        let backup = backup_path(path, &timestamp());
        fs::copy(path, &backup).map_err(|err| io_error(&backup, err))?;
        info!("backed up {:?} to {:?}", path.display(), backup.display());

        Ok(Some(backup))
    }

    fn write_elevated(&self, path: &Path, content: &str, mode: u32) -> Result<Option<PathBuf>> {
        let staged = NamedTempFile::new().map_err(|err| io_error(&std::env::temp_dir(), err))?;
        fill(&staged, content, 0o600)?;

        let parent = parent_dir(path);
        let sibling = parent.join(format!(
            ".{}.deskstrap-tmp",
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));

        let mut backup = None;
        self.sudo(path, Invocation::new("mkdir").arg("-p").arg(&parent))?;
        if self.backup && path.exists() {
            let target = backup_path(path, &timestamp());
            self.sudo(
                path,
                Invocation::new("cp").arg("-p").arg(path).arg(&target),
            )?;
            backup = Some(target);
        }
        self.sudo(
            path,
            Invocation::new("install")
                .arg("-m")
                .arg(format!("{mode:o}"))
                .arg(staged.path())
                .arg(&sibling),
        )?;
        self.sudo(path, Invocation::new("mv").arg("-f").arg(&sibling).arg(path))?;
        info!("wrote {:?} through sudo", path.display());

        Ok(backup)
    }

    fn sudo(&self, path: &Path, invocation: Invocation) -> Result<()> {
        self.runner
            .run_checked(&invocation.elevated())
            .map_err(|err| ArtifactError::Permission {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })
    }
}

/// Check if file at `path` holds exactly `content`.
///
/// A missing file never matches.
///
/// # Errors
///
/// - Return [`ArtifactError::Io`] if the file exists but cannot be read.
pub fn has_content(path: &Path, content: &str) -> Result<bool> {
    Ok(read_optional(path)?.is_some_and(|existing| existing == content))
}

/// Check if file at `path` contains `marker`.
///
/// A missing file never contains anything.
///
/// # Errors
///
/// - Return [`ArtifactError::Io`] if the file exists but cannot be read.
pub fn contains_marker(path: &Path, marker: &str) -> Result<bool> {
    Ok(read_optional(path)?.is_some_and(|existing| existing.contains(marker)))
}

/// Pick backup path for `path` tagged with `stamp`.
///
/// Backups sit next to the original as `<name>.<stamp>.bak`. If that name is
/// taken, a counter is appended to the stamp.
pub fn backup_path(path: &Path, stamp: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = parent_dir(path);

    let mut candidate = parent.join(format!("{name}.{stamp}.bak"));
    let mut counter = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{name}.{stamp}-{counter}.bak"));
        counter += 1;
    }

    candidate
}

fn timestamp() -> String {
    Local::now().format("%Y%m%d%H%M%S").to_string()
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn fill(temp: &NamedTempFile, content: &str, mode: u32) -> Result<()> {
    let mut file = temp.as_file();
    file.write_all(content.as_bytes())
        .map_err(|err| io_error(temp.path(), err))?;
    file.sync_all().map_err(|err| io_error(temp.path(), err))?;
    fs::set_permissions(temp.path(), Permissions::from_mode(mode))
        .map_err(|err| io_error(temp.path(), err))?;

    Ok(())
}

/// Follow `path` to the file it links to, so the link itself survives the
/// rename. A dangling link resolves to its target relative to the link.
fn resolve_link(path: &Path) -> Result<PathBuf> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => match fs::canonicalize(path) {
            Ok(real) => Ok(real),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let target = fs::read_link(path).map_err(|err| io_error(path, err))?;
                debug!("{:?} dangles to {:?}", path.display(), target.display());
                Ok(parent_dir(path).join(target))
            }
            Err(err) => Err(io_error(path, err)),
        },
        _ => Ok(path.to_path_buf()),
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(path, err)),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ArtifactError {
    if source.kind() == ErrorKind::PermissionDenied {
        return ArtifactError::Permission {
            path: path.to_path_buf(),
            reason: source.to_string(),
        };
    }

    ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Artifact writing error types.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// Destination needs privileges the process does not have, or the
    /// privileged helper failed.
    #[error("permission denied writing {:?}: {reason}", path.display())]
    Permission { path: PathBuf, reason: String },

    /// Any other file system failure.
    #[error("failed to write {:?}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ArtifactError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::ScriptedRunner;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn listing(dir: &Path) -> Vec<String> {
        let mut names = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    #[test]
    fn write_creates_parents_with_mode() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let runner = ScriptedRunner::new();
        let writer = ArtifactWriter::new(&runner, false, true);
        let path = dir.path().join(".config").join("hypr").join("hyprland.conf");

        let backup = writer.write(&path, "monitor = ,preferred,auto,1\n", 0o600, false)?;

        assert_eq!(backup, None);
        assert_eq!(fs::read_to_string(&path)?, "monitor = ,preferred,auto,1\n");
        assert_eq!(fs::metadata(&path)?.permissions().mode() & 0o777, 0o600);
        assert!(runner.calls().is_empty());

        Ok(())
    }

    #[test]
    fn interrupted_write_keeps_prior_content() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nix.conf");
        fs::write(&path, "experimental-features = nix-command\n")?;

        let staged = StagedArtifact::new(&path, "experimental-features = flakes\n", DEFAULT_MODE)?;
        assert!(staged.temp_path().exists());
        assert_eq!(
            fs::read_to_string(&path)?,
            "experimental-features = nix-command\n"
        );

        // Interruption between staging and rename.
        drop(staged);

        assert_eq!(
            fs::read_to_string(&path)?,
            "experimental-features = nix-command\n"
        );
        assert_eq!(listing(dir.path()), vec!["nix.conf".to_string()]);

        Ok(())
    }

    #[test]
    fn interrupted_write_leaves_no_target() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("flake.nix");

        drop(StagedArtifact::new(&path, "{ }\n", DEFAULT_MODE)?);

        assert!(!path.exists());
        assert!(listing(dir.path()).is_empty());

        Ok(())
    }

    #[test]
    fn overwrite_makes_exactly_one_backup() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let runner = ScriptedRunner::new();
        let writer = ArtifactWriter::new(&runner, false, true);
        let path = dir.path().join("home.nix");
        fs::write(&path, "old\n")?;

        let backup = writer.write(&path, "new\n", DEFAULT_MODE, false)?;

        let backup = backup.expect("backup should be made");
        assert_eq!(fs::read_to_string(&backup)?, "old\n");
        assert_eq!(fs::read_to_string(&path)?, "new\n");
        let backups = listing(dir.path())
            .into_iter()
            .filter(|name| name.ends_with(".bak"))
            .count();
        assert_eq!(backups, 1);

        Ok(())
    }

    #[test]
    fn disabled_backup_overwrites_in_place() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let runner = ScriptedRunner::new();
        let writer = ArtifactWriter::new(&runner, false, false);
        let path = dir.path().join("home.nix");
        fs::write(&path, "old\n")?;

        assert_eq!(writer.write(&path, "new\n", DEFAULT_MODE, false)?, None);
        assert_eq!(listing(dir.path()), vec!["home.nix".to_string()]);

        Ok(())
    }

    #[test]
    fn backup_path_avoids_collisions() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(".bashrc");
        let first = backup_path(&path, "20240101120000");
        assert_eq!(first, dir.path().join(".bashrc.20240101120000.bak"));

        fs::write(&first, "")?;
        let second = backup_path(&path, "20240101120000");
        assert_eq!(second, dir.path().join(".bashrc.20240101120000-1.bak"));

        Ok(())
    }

    #[test]
    fn append_block_only_once() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let runner = ScriptedRunner::new();
        let writer = ArtifactWriter::new(&runner, false, false);
        let path = dir.path().join(".bashrc");
        fs::write(&path, "alias ll='ls -l'")?;
        let block = "# >>> block >>>\nexport A=1\n# <<< block <<<\n";

        let first = writer.append_block(&path, "# >>> block >>>", block)?;
        let second = writer.append_block(&path, "# >>> block >>>", block)?;

        assert_eq!(first, AppendOutcome::Appended { backup: None });
        assert_eq!(second, AppendOutcome::AlreadyPresent);
        assert_eq!(
            fs::read_to_string(&path)?,
            "alias ll='ls -l'\n\n# >>> block >>>\nexport A=1\n# <<< block <<<\n"
        );
        assert!(contains_marker(&path, "# >>> block >>>")?);

        Ok(())
    }

    #[test]
    fn append_block_creates_missing_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let runner = ScriptedRunner::new();
        let writer = ArtifactWriter::new(&runner, false, true);
        let path = dir.path().join(".zshrc");

        writer.append_block(&path, "marker", "marker\n")?;

        assert_eq!(fs::read_to_string(&path)?, "marker\n");
        assert!(has_content(&path, "marker\n")?);
        assert!(!has_content(&dir.path().join("absent"), "marker\n")?);

        Ok(())
    }

    #[test]
    fn elevated_write_goes_through_sudo() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let runner = ScriptedRunner::new();
        let writer = ArtifactWriter::new(&runner, false, true);
        let path = dir.path().join("hyprland.desktop");

        writer.write(&path, "[Desktop Entry]\n", DEFAULT_MODE, true)?;

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].starts_with("run: sudo mkdir -p "));
        assert!(calls[1].starts_with("run: sudo install -m 644 "));
        assert!(calls[2].starts_with("run: sudo mv -f "));
        assert!(calls[2].ends_with("hyprland.desktop"));

        Ok(())
    }

    #[test]
    fn write_through_symlink_keeps_link() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let runner = ScriptedRunner::new();
        let writer = ArtifactWriter::new(&runner, false, true);
        let real = dir.path().join("dotfiles").join("hyprland.conf");
        fs::create_dir_all(real.parent().unwrap())?;
        fs::write(&real, "monitor = ,preferred,auto,1\n")?;
        let link = dir.path().join("hyprland.conf");
        std::os::unix::fs::symlink(&real, &link)?;

        let backup = writer.write(&link, "monitor = ,highres,auto,2\n", DEFAULT_MODE, false)?;

        assert!(fs::symlink_metadata(&link)?.file_type().is_symlink());
        assert_eq!(fs::read_to_string(&real)?, "monitor = ,highres,auto,2\n");
        let backup = backup.unwrap();
        assert_eq!(backup.parent(), fs::canonicalize(&real)?.parent());
        assert_eq!(fs::read_to_string(backup)?, "monitor = ,preferred,auto,1\n");

        Ok(())
    }

    #[test]
    fn append_through_symlink_keeps_link() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let runner = ScriptedRunner::new();
        let writer = ArtifactWriter::new(&runner, false, false);
        let real = dir.path().join("bashrc.shared");
        fs::write(&real, "alias ll='ls -l'\n")?;
        let link = dir.path().join(".bashrc");
        std::os::unix::fs::symlink("bashrc.shared", &link)?;

        writer.append_block(&link, "# >>> block >>>", "# >>> block >>>\n")?;

        assert!(fs::symlink_metadata(&link)?.file_type().is_symlink());
        assert_eq!(
            fs::read_to_string(&real)?,
            "alias ll='ls -l'\n\n# >>> block >>>\n"
        );

        Ok(())
    }

    #[test]
    fn dangling_symlink_creates_its_target() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let runner = ScriptedRunner::new();
        let writer = ArtifactWriter::new(&runner, false, false);
        let link = dir.path().join("nix.conf");
        std::os::unix::fs::symlink("nix.conf.real", &link)?;

        writer.write(&link, "experimental-features = nix-command flakes\n", DEFAULT_MODE, false)?;

        assert!(fs::symlink_metadata(&link)?.file_type().is_symlink());
        assert_eq!(
            fs::read_to_string(dir.path().join("nix.conf.real"))?,
            "experimental-features = nix-command flakes\n"
        );

        Ok(())
    }

    #[test]
    fn failed_sudo_is_permission_error() {
        let runner = ScriptedRunner::new().on("sudo install", 1, "");
        let writer = ArtifactWriter::new(&runner, false, false);
        let result = writer.write(
            Path::new("/usr/share/wayland-sessions/hyprland.desktop"),
            "[Desktop Entry]\n",
            DEFAULT_MODE,
            true,
        );

        assert!(matches!(result, Err(ArtifactError::Permission { .. })));
        assert!(!runner.calls().iter().any(|call| call.contains("mv -f")));
    }

    #[test]
    fn privileged_writer_skips_sudo() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let runner = ScriptedRunner::new();
        let writer = ArtifactWriter::new(&runner, true, false);
        let path = dir.path().join("hyprland.desktop");

        writer.write(&path, "[Desktop Entry]\n", DEFAULT_MODE, true)?;

        assert!(runner.calls().is_empty());
        assert_eq!(fs::read_to_string(&path)?, "[Desktop Entry]\n");

        Ok(())
    }
}
