//! Build script synthesis.
//!
//! The compile container runs `sh build.sh` from the mounted working
//! directory. The script installs the optional SSH identity, prepares the
//! cache directory, runs the user's commands from the copied application
//! directory, and finally archives the declared output patterns into
//! `$BUILD_ARCHIVE_PATH`.
//!
//! User commands are trusted shell source and are emitted verbatim.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use marina_shared::constants::{container, envs, workdir};
use marina_shared::errors::{MarinaError, MarinaResult};

use crate::manifest::CompileSpec;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildScript {
    commands: Vec<String>,
    archive_patterns: Vec<String>,
    wipe_cache: bool,
}

impl BuildScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script for a compile phase, wiping the cache first if `wipe_cache`.
    pub fn for_compile(spec: &CompileSpec, wipe_cache: bool) -> Self {
        Self::new()
            .with_commands(spec.commands().iter().cloned())
            .with_archive_patterns(spec.files().iter().cloned())
            .with_wipe_cache(wipe_cache)
    }

    pub fn with_commands(mut self, commands: impl IntoIterator<Item = String>) -> Self {
        self.commands.extend(commands);
        self
    }

    pub fn with_archive_patterns(mut self, patterns: impl IntoIterator<Item = String>) -> Self {
        self.archive_patterns.extend(patterns);
        self
    }

    pub fn with_wipe_cache(mut self, wipe: bool) -> Self {
        self.wipe_cache = wipe;
        self
    }

    pub fn has_archive(&self) -> bool {
        !self.archive_patterns.is_empty()
    }

    pub fn render(&self) -> String {
        let mut script = String::from(SETUP_SCRIPT);

        if self.wipe_cache {
            let _ = writeln!(script, "find \"${}\" -mindepth 1 -delete", envs::BUILD_CACHE);
        }

        script.push_str("\nset -e\n\n");
        let _ = writeln!(script, "cd {}", container::CONTEXT_DIR);
        script.push('\n');

        for command in &self.commands {
            script.push_str(command);
            script.push('\n');
        }

        if self.has_archive() {
            let patterns: Vec<String> = self
                .archive_patterns
                .iter()
                .map(|p| format!("\"{}\"", p))
                .collect();
            let _ = writeln!(
                script,
                "\ntar czf \"${}\" --posix {}",
                envs::BUILD_ARCHIVE_PATH,
                patterns.join(" ")
            );
        }

        script
    }

    /// Write `build.sh` into `dir`, returning its path.
    pub fn write_to(&self, dir: &Path) -> MarinaResult<PathBuf> {
        let path = dir.join(workdir::BUILD_SCRIPT);
        std::fs::write(&path, self.render()).map_err(|e| {
            MarinaError::Storage(format!("failed to write {}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "wrote build script");
        Ok(path)
    }
}

const SETUP_SCRIPT: &str = r#"#!/bin/sh

SSH_DIR="${HOME:-/root}/.ssh"
mkdir -p "$SSH_DIR"
chmod 700 "$SSH_DIR"

if [ -f ssh_identity ]; then
    cp ssh_identity "$SSH_DIR/ssh_identity"
    chmod 600 "$SSH_DIR/ssh_identity"
fi

cat > "$SSH_DIR/config" << EOF
Host *
    StrictHostKeyChecking no
    UserKnownHostsFile /dev/null
    IdentityFile $SSH_DIR/ssh_identity
EOF

if [ ! -d "$BUILD_CACHE" ]; then
    mkdir -p "$BUILD_CACHE"
fi
"#;
