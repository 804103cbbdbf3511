use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::store::DEFAULT_STORAGE_KEY;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ThesisboardConfig {
    /// Directory holding the stored progress record. Relative paths resolve
    /// against the directory containing the config file.
    pub store_dir: Option<String>,
    /// Key the progress record is stored under.
    pub storage_key: Option<String>,
    /// Replacement default catalog (`.json`, `.yaml` or `.yml`).
    pub defaults_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Project,
    Global,
    Default,
}

impl ConfigSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigSource::Project => "project",
            ConfigSource::Global => "global",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ConfigSource,
}

pub fn config_filename() -> &'static str {
    ".thesisboard.toml"
}

pub fn config_path(project_root: &Path) -> PathBuf {
    project_root.join(config_filename())
}

pub fn resolve_user_home_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    if let Ok(profile) = std::env::var("USERPROFILE") {
        let trimmed = profile.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    None
}

pub fn resolve_thesisboard_home_dir() -> Option<PathBuf> {
    if let Ok(value) = std::env::var("THESISBOARD_HOME") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    resolve_user_home_dir().map(|home| home.join(".thesisboard"))
}

pub fn global_config_path() -> Option<PathBuf> {
    resolve_thesisboard_home_dir().map(|home| home.join("config.toml"))
}

pub fn find_config_root(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    start
        .ancestors()
        .find(|candidate| candidate.join(config_filename()).is_file())
        .map(Path::to_path_buf)
}

fn read_config(path: &Path) -> Result<Option<ThesisboardConfig>, ConfigError> {
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)?;
    Ok(Some(toml::from_str::<ThesisboardConfig>(&text)?))
}

/// Unreadable or invalid project config is logged and treated as absent.
pub fn load_config(project_root: &Path) -> Option<ThesisboardConfig> {
    let path = config_path(project_root);
    match read_config(&path) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %path.display(), "ignoring config: {err}");
            None
        }
    }
}

pub fn load_global_config() -> Option<ThesisboardConfig> {
    let path = global_config_path()?;
    match read_config(&path) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %path.display(), "ignoring global config: {err}");
            None
        }
    }
}

fn resolve_path_field(
    project_root: Option<&Path>,
    field: impl Fn(&ThesisboardConfig) -> Option<&String>,
) -> Option<Resolved<PathBuf>> {
    if let Some(root) = project_root {
        if let Some(config) = load_config(root) {
            if let Some(value) = field(&config).filter(|v| !v.trim().is_empty()) {
                return Some(Resolved {
                    value: root.join(value.trim()),
                    source: ConfigSource::Project,
                });
            }
        }
    }
    let home = resolve_thesisboard_home_dir()?;
    let config = load_global_config()?;
    let value = field(&config).filter(|v| !v.trim().is_empty())?;
    Some(Resolved {
        value: home.join(value.trim()),
        source: ConfigSource::Global,
    })
}

/// Project config, then global config, then `$THESISBOARD_HOME/store`.
pub fn resolve_store_dir(project_root: Option<&Path>) -> Option<Resolved<PathBuf>> {
    if let Some(resolved) = resolve_path_field(project_root, |c| c.store_dir.as_ref()) {
        return Some(resolved);
    }
    resolve_thesisboard_home_dir().map(|home| Resolved {
        value: home.join("store"),
        source: ConfigSource::Default,
    })
}

pub fn resolve_defaults_path(project_root: Option<&Path>) -> Option<Resolved<PathBuf>> {
    resolve_path_field(project_root, |c| c.defaults_path.as_ref())
}

pub fn resolve_storage_key(project_root: Option<&Path>) -> Resolved<String> {
    let from = |config: Option<ThesisboardConfig>| {
        config
            .and_then(|c| c.storage_key)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    };
    if let Some(value) = from(project_root.and_then(load_config)) {
        return Resolved {
            value,
            source: ConfigSource::Project,
        };
    }
    if let Some(value) = from(load_global_config()) {
        return Resolved {
            value,
            source: ConfigSource::Global,
        };
    }
    Resolved {
        value: DEFAULT_STORAGE_KEY.to_string(),
        source: ConfigSource::Default,
    }
}
