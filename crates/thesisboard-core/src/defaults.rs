use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::model::{State, TaskGroup};

const BUILTIN_CATALOG: &str = include_str!("defaults.json");

#[derive(Debug, Error)]
pub enum DefaultsError {
    #[error("Failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse JSON catalog: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to parse YAML catalog: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Unsupported catalog format: {0}")]
    UnsupportedFormat(String),
}

/// The default deliverable catalog. Treated as immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultSchema {
    state: State,
}

#[derive(Debug, Default, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl DefaultSchema {
    pub fn builtin() -> Result<Self, DefaultsError> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn from_state(state: State) -> Self {
        Self { state }
    }

    pub fn from_json(text: &str) -> Result<Self, DefaultsError> {
        let state: State = serde_json::from_str(text)?;
        Ok(Self::from_state(state))
    }

    pub fn from_yaml(text: &str) -> Result<Self, DefaultsError> {
        let state: State = serde_yaml::from_str(text)?;
        Ok(Self::from_state(state))
    }

    pub fn from_path(path: &Path) -> Result<Self, DefaultsError> {
        let text = fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "json" => Self::from_json(&text),
            "yaml" | "yml" => Self::from_yaml(&text),
            _ => Err(DefaultsError::UnsupportedFormat(
                path.display().to_string(),
            )),
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.state.keys()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.state.contains(key)
    }

    pub fn deliverable(&self, key: &str) -> Option<&[TaskGroup]> {
        self.state.deliverable(key)
    }

    /// Deep copy used to seed a fresh store.
    pub fn seed(&self) -> State {
        self.state.clone()
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        for (key, groups) in self.state.iter() {
            let mut group_ids = HashSet::new();
            for group in groups {
                if !group_ids.insert(group.id.as_str()) {
                    result
                        .errors
                        .push(format!("{key}: duplicate group id {}", group.id));
                }
                if group.text.trim().is_empty() {
                    result
                        .warnings
                        .push(format!("{key}/{}: group has no text", group.id));
                }
                if group.subtasks.is_empty() {
                    result
                        .warnings
                        .push(format!("{key}/{}: group has no subtasks", group.id));
                }
                let mut subtask_ids = HashSet::new();
                for subtask in &group.subtasks {
                    if !subtask_ids.insert(subtask.id.as_str()) {
                        result.errors.push(format!(
                            "{key}/{}: duplicate subtask id {}",
                            group.id, subtask.id
                        ));
                    }
                    if subtask.text.trim().is_empty() {
                        result.warnings.push(format!(
                            "{key}/{}/{}: subtask has no text",
                            group.id, subtask.id
                        ));
                    }
                }
            }
        }
        result
    }
}
