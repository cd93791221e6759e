//! Per-run working directory.
//!
//! ```text
//! <root>/marina-<ulid>/
//!   context/        copy of the application directory
//!   ssh_identity    optional private key
//!   build.sh        compile script
//! ```
//!
//! The whole directory is bind-mounted into the compile container and is
//! the unit of cleanup.

use std::fs;
use std::path::{Path, PathBuf};

use marina_shared::constants::workdir;
use marina_shared::errors::{MarinaError, MarinaResult};

use crate::options::BuildContext;
use crate::script::BuildScript;

#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    removed: bool,
}

impl Workspace {
    /// Create a fresh, uniquely named directory under `root`.
    pub fn create(root: &Path) -> MarinaResult<Self> {
        let root = root.canonicalize().map_err(|e| {
            MarinaError::Storage(format!("invalid build root {}: {}", root.display(), e))
        })?;
        let path = root.join(format!("{}{}", workdir::PREFIX, ulid::Ulid::new()));
        fs::create_dir(&path).map_err(|e| {
            MarinaError::Storage(format!(
                "failed to create working directory {}: {}",
                path.display(),
                e
            ))
        })?;
        tracing::debug!(path = %path.display(), "created working directory");
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn context_dir(&self) -> PathBuf {
        self.path.join(workdir::CONTEXT_DIR)
    }

    /// Populate the directory with the context copy, identity and script.
    pub fn prepare(&self, context: &BuildContext, script: &BuildScript) -> MarinaResult<()> {
        self.write_context(&context.context_path)?;
        self.write_identity_file(context.identity_file.as_deref())?;
        script.write_to(&self.path)?;
        Ok(())
    }

    fn write_context(&self, source: &Path) -> MarinaResult<()> {
        if !source.is_dir() {
            return Err(MarinaError::Storage(format!(
                "build context {} is not a directory",
                source.display()
            )));
        }
        let source = source.canonicalize().map_err(|e| {
            MarinaError::Storage(format!("invalid build context {}: {}", source.display(), e))
        })?;
        copy_tree(&source, &self.context_dir(), &self.path)?;
        tracing::debug!(path = %source.display(), "copied the build context");
        Ok(())
    }

    fn write_identity_file(&self, identity: Option<&Path>) -> MarinaResult<()> {
        let Some(identity) = identity else {
            tracing::warn!("no ssh identity file given");
            return Ok(());
        };
        let dst = self.path.join(workdir::SSH_IDENTITY);
        fs::copy(identity, &dst).map_err(|e| {
            MarinaError::Storage(format!(
                "failed to copy identity file {}: {}",
                identity.display(),
                e
            ))
        })?;
        tracing::info!(path = %identity.display(), "found ssh identity");
        Ok(())
    }

    /// Delete the directory tree. Safe to call more than once.
    pub fn remove(&mut self) -> MarinaResult<()> {
        if self.removed {
            return Ok(());
        }
        match fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(MarinaError::Storage(format!(
                    "failed to remove working directory {}: {}",
                    self.path.display(),
                    e
                )));
            }
        }
        self.removed = true;
        tracing::debug!(path = %self.path.display(), "removed working directory");
        Ok(())
    }
}

/// Recursively copy `src` to `dst`, keeping symlinks as links.
///
/// Anything under `skip` is left out, so a working directory created
/// inside the application directory does not copy itself.
fn copy_tree(src: &Path, dst: &Path, skip: &Path) -> MarinaResult<()> {
    let walker = walkdir::WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !e.path().starts_with(skip));
    for entry in walker {
        let entry = entry.map_err(|e| {
            MarinaError::Storage(format!("failed to walk {}: {}", src.display(), e))
        })?;
        let rel = entry.path().strip_prefix(src).map_err(|e| {
            MarinaError::Storage(format!(
                "failed to rebase path {}: {}",
                entry.path().display(),
                e
            ))
        })?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| {
                MarinaError::Storage(format!(
                    "failed to create directory {}: {}",
                    target.display(),
                    e
                ))
            })?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| {
                MarinaError::Storage(format!(
                    "failed to copy {} -> {}: {}",
                    entry.path().display(),
                    target.display(),
                    e
                ))
            })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> MarinaResult<()> {
    let link = fs::read_link(src).map_err(|e| {
        MarinaError::Storage(format!("failed to read symlink {}: {}", src.display(), e))
    })?;
    std::os::unix::fs::symlink(&link, dst).map_err(|e| {
        MarinaError::Storage(format!(
            "failed to create symlink {} -> {}: {}",
            dst.display(),
            link.display(),
            e
        ))
    })
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, _dst: &Path) -> MarinaResult<()> {
    tracing::warn!(path = %src.display(), "skipping symlink in build context");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("meta.yml"), "name: app\n").unwrap();
        fs::write(dir.path().join("src/nested/main.c"), "int main;").unwrap();
        dir
    }

    #[test]
    fn test_prepare_layout() {
        let root = tempfile::tempdir().unwrap();
        let app = app_dir();
        let key = root.path().join("id_rsa");
        fs::write(&key, "secret").unwrap();

        let ws = Workspace::create(root.path()).unwrap();
        let ctx = BuildContext::new(root.path(), app.path()).with_identity_file(&key);
        ws.prepare(&ctx, &BuildScript::new()).unwrap();

        let name = ws.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("marina-"));
        assert_eq!(
            fs::read_to_string(ws.context_dir().join("src/nested/main.c")).unwrap(),
            "int main;"
        );
        assert!(ws.context_dir().join("meta.yml").is_file());
        assert_eq!(
            fs::read_to_string(ws.path().join("ssh_identity")).unwrap(),
            "secret"
        );
        assert!(ws.path().join("build.sh").is_file());
    }

    #[test]
    fn test_prepare_without_identity() {
        let root = tempfile::tempdir().unwrap();
        let app = app_dir();
        let ws = Workspace::create(root.path()).unwrap();
        ws.prepare(&BuildContext::new(root.path(), app.path()), &BuildScript::new())
            .unwrap();
        assert!(!ws.path().join("ssh_identity").exists());
    }

    #[test]
    fn test_missing_context_fails() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path()).unwrap();
        let ctx = BuildContext::new(root.path(), root.path().join("missing"));
        assert!(matches!(
            ws.prepare(&ctx, &BuildScript::new()),
            Err(MarinaError::Storage(_))
        ));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let mut ws = Workspace::create(root.path()).unwrap();
        let path = ws.path().to_path_buf();
        ws.remove().unwrap();
        assert!(!path.exists());
        ws.remove().unwrap();
    }

    #[test]
    fn test_unique_names() {
        let root = tempfile::tempdir().unwrap();
        let a = Workspace::create(root.path()).unwrap();
        let b = Workspace::create(root.path()).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_build_root_inside_context() {
        let app = app_dir();
        let ws = Workspace::create(app.path()).unwrap();
        ws.prepare(&BuildContext::new(app.path(), app.path()), &BuildScript::new())
            .unwrap();
        assert!(ws.context_dir().join("src/nested/main.c").is_file());
        let ws_name = ws.path().file_name().unwrap();
        assert!(!ws.context_dir().join(ws_name).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_preserved() {
        let root = tempfile::tempdir().unwrap();
        let app = app_dir();
        std::os::unix::fs::symlink("src/nested/main.c", app.path().join("link")).unwrap();

        let ws = Workspace::create(root.path()).unwrap();
        ws.prepare(&BuildContext::new(root.path(), app.path()), &BuildScript::new())
            .unwrap();
        let link = ws.context_dir().join("link");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(link).unwrap(), PathBuf::from("src/nested/main.c"));
    }
}
