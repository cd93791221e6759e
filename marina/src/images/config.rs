//! Runner image configuration: base image config merged with user overrides.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::engine::ImageConfig;

/// A `CMD`/`ENTRYPOINT` value.
///
/// Image configs always carry the exec form. Manifests may use either:
/// a YAML string is kept as shell form, a YAML list as exec form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandForm {
    Shell(String),
    Exec(Vec<String>),
}

impl From<Vec<String>> for CommandForm {
    fn from(args: Vec<String>) -> Self {
        CommandForm::Exec(args)
    }
}

/// User overrides from the manifest's `run.config` mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub entrypoint: Option<CommandForm>,

    #[serde(default)]
    pub cmd: Option<CommandForm>,

    #[serde(default)]
    pub working_dir: Option<String>,

    #[serde(default)]
    pub user: Option<String>,

    /// Environment variables; these always win over the base image's.
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Exposed ports (e.g. `8080/tcp`), unioned with the base image's.
    #[serde(default)]
    pub exposed_ports: Vec<String>,

    /// Declared volumes, unioned with the base image's.
    #[serde(default)]
    pub volumes: Vec<String>,
}

/// Configuration of the final image, rendered into the build descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerImageConfig {
    pub author: Option<String>,
    pub entrypoint: Option<CommandForm>,
    pub cmd: Option<CommandForm>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub env: IndexMap<String, String>,
    pub exposed_ports: IndexSet<String>,
    pub volumes: IndexSet<String>,
}

impl RunnerImageConfig {
    /// Merge a base image config with user overrides.
    ///
    /// - scalar fields (author, entrypoint, cmd, working_dir, user): the override wins
    /// - ports and volumes: union, base entries first, insertion order kept
    /// - env: base keys keep their position, but a key set by the user always
    ///   carries the user's value; new user keys are appended
    pub fn merge(base: &ImageConfig, overrides: &ConfigOverrides) -> Self {
        let mut env = IndexMap::new();
        for entry in &base.env {
            let (key, value) = split_env(entry);
            // first writer wins inside the base list
            env.entry(key.to_string()).or_insert_with(|| value.to_string());
        }
        for (key, value) in &overrides.env {
            env.insert(key.clone(), value.clone());
        }

        let exposed_ports = base
            .exposed_ports
            .iter()
            .chain(overrides.exposed_ports.iter())
            .cloned()
            .collect();
        let volumes = base
            .volumes
            .iter()
            .chain(overrides.volumes.iter())
            .cloned()
            .collect();

        Self {
            author: pick(&overrides.author, &base.author),
            entrypoint: overrides
                .entrypoint
                .clone()
                .or_else(|| base.entrypoint.clone().map(CommandForm::Exec)),
            cmd: overrides
                .cmd
                .clone()
                .or_else(|| base.cmd.clone().map(CommandForm::Exec)),
            working_dir: pick(&overrides.working_dir, &base.working_dir),
            user: pick(&overrides.user, &base.user),
            env,
            exposed_ports,
            volumes,
        }
    }
}

fn pick(preferred: &Option<String>, fallback: &Option<String>) -> Option<String> {
    preferred.clone().or_else(|| fallback.clone())
}

/// Split `KEY=VALUE`; a bare `KEY` has an empty value.
pub(crate) fn split_env(entry: &str) -> (&str, &str) {
    match entry.find('=') {
        Some(pos) => (&entry[..pos], &entry[pos + 1..]),
        None => (entry, ""),
    }
}
