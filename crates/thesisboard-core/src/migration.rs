//! Shape migrations for stored progress records.
//!
//! Records written by older builds differ from the current layout in three
//! ways: groups whose checklist lived in an HTML `description`, groups with no
//! artifact list, and groups that never got `userNotes`/`completed`. Each is a
//! separate step over the raw JSON so it can be tested on its own.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("Stored record is malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ShapeVersion {
    /// At least one group has no `subtasks` list.
    V1,
    /// Subtasks present but some group lacks its artifact list or notes.
    V2,
    Current,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StepReport {
    pub step: &'static str,
    pub groups_changed: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: ShapeVersion,
    pub steps: Vec<StepReport>,
}

impl MigrationReport {
    pub fn changed(&self) -> bool {
        self.steps.iter().any(|step| step.groups_changed > 0)
    }
}

type Step = fn(&mut Map<String, Value>) -> usize;

const STEPS: [(&str, ShapeVersion, Step); 3] = [
    (
        "subtasks_from_description",
        ShapeVersion::V1,
        subtasks_from_description,
    ),
    ("ensure_artifact_lists", ShapeVersion::V2, ensure_artifact_lists),
    ("ensure_notes_and_flags", ShapeVersion::V2, ensure_notes_and_flags),
];

pub fn detect_version(value: &Value) -> Result<ShapeVersion, MigrationError> {
    let root = as_root(value)?;
    let mut version = ShapeVersion::Current;
    for (key, groups) in root {
        let groups = groups
            .as_array()
            .ok_or_else(|| MigrationError::Malformed(format!("{key} is not a list of groups")))?;
        for group in groups {
            let Some(group) = group.as_object() else {
                return Err(MigrationError::Malformed(format!(
                    "{key} contains a non-object group"
                )));
            };
            if is_missing(group, "subtasks") {
                return Ok(ShapeVersion::V1);
            }
            if ["deliverables", "userNotes", "completed"]
                .iter()
                .any(|field| is_missing(group, field))
            {
                version = ShapeVersion::V2;
            }
        }
    }
    Ok(version)
}

/// Bring a stored record up to the current shape in place.
pub fn migrate_value(value: &mut Value) -> Result<MigrationReport, MigrationError> {
    let from = detect_version(value)?;
    let mut steps = Vec::new();
    let Value::Object(root) = value else {
        return Err(MigrationError::Malformed("record is not an object".to_string()));
    };
    for (name, applies_to, step) in STEPS {
        if from > applies_to {
            continue;
        }
        let groups_changed = step(root);
        tracing::debug!(step = name, groups_changed, "applied shape migration");
        steps.push(StepReport {
            step: name,
            groups_changed,
        });
    }
    Ok(MigrationReport { from, steps })
}

fn as_root(value: &Value) -> Result<&Map<String, Value>, MigrationError> {
    value
        .as_object()
        .ok_or_else(|| MigrationError::Malformed("record is not an object".to_string()))
}

fn groups_mut(root: &mut Map<String, Value>) -> impl Iterator<Item = &mut Map<String, Value>> {
    root.values_mut()
        .filter_map(Value::as_array_mut)
        .flat_map(|groups| groups.iter_mut())
        .filter_map(Value::as_object_mut)
}

/// Absent and `null` fields both count as missing.
fn is_missing(group: &Map<String, Value>, field: &str) -> bool {
    group.get(field).map_or(true, Value::is_null)
}

fn list_item_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<li>(.*?)</li>").expect("regex"))
}

/// Text of every `<li>` item, trimmed, in document order.
pub fn extract_list_items(html: &str) -> Vec<String> {
    list_item_regex()
        .captures_iter(html)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect()
}

fn subtasks_from_description(root: &mut Map<String, Value>) -> usize {
    let mut changed = 0;
    for group in groups_mut(root) {
        if !is_missing(group, "subtasks") {
            continue;
        }
        let group_id = group
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let description = group
            .remove("description")
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default();
        let subtasks: Vec<Value> = extract_list_items(&description)
            .into_iter()
            .enumerate()
            .map(|(idx, text)| {
                json!({
                    "id": format!("{group_id}_migrated_{idx}"),
                    "text": text,
                    "completed": false,
                })
            })
            .collect();
        group.insert("subtasks".to_string(), Value::Array(subtasks));
        changed += 1;
    }
    changed
}

fn ensure_artifact_lists(root: &mut Map<String, Value>) -> usize {
    let mut changed = 0;
    for group in groups_mut(root) {
        if is_missing(group, "deliverables") {
            group.insert("deliverables".to_string(), Value::Array(Vec::new()));
            changed += 1;
        }
    }
    changed
}

fn ensure_notes_and_flags(root: &mut Map<String, Value>) -> usize {
    let mut changed = 0;
    for group in groups_mut(root) {
        let mut touched = false;
        if is_missing(group, "userNotes") {
            group.insert("userNotes".to_string(), Value::String(String::new()));
            touched = true;
        }
        if is_missing(group, "completed") {
            group.insert("completed".to_string(), Value::Bool(false));
            touched = true;
        }
        changed += usize::from(touched);
    }
    changed
}
