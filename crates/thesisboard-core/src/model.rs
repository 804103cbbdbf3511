use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::progress::Progress;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

impl Subtask {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            completed: false,
        }
    }
}

/// Expected output file of a task group. Carries no completion state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub text: String,
}

impl Artifact {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// A named collection of subtasks inside one deliverable.
///
/// The serialized field names match the record layout written by earlier
/// installations (`userNotes`, and `deliverables` for the artifact list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGroup {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub completed: bool,
    #[serde(rename = "userNotes", default)]
    pub user_notes: String,
    #[serde(rename = "deliverables", default)]
    pub artifacts: Vec<Artifact>,
}

impl TaskGroup {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            subtasks: Vec::new(),
            completed: false,
            user_notes: String::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn subtask(&self, subtask_id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|subtask| subtask.id == subtask_id)
    }

    pub fn subtask_mut(&mut self, subtask_id: &str) -> Option<&mut Subtask> {
        self.subtasks
            .iter_mut()
            .find(|subtask| subtask.id == subtask_id)
    }

    /// True when the group has subtasks and every one of them is done.
    pub fn derived_completed(&self) -> bool {
        !self.subtasks.is_empty() && self.subtasks.iter().all(|subtask| subtask.completed)
    }

    pub fn refresh_completed(&mut self) {
        self.completed = self.derived_completed();
    }

    pub fn progress(&self) -> Progress {
        Progress::from_subtasks(self.subtasks.iter())
    }
}

/// Every deliverable's task groups, keyed by deliverable key (`d0`..`d7`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    deliverables: BTreeMap<String, Vec<TaskGroup>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.deliverables.keys().map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.deliverables.contains_key(key)
    }

    pub fn deliverable(&self, key: &str) -> Option<&[TaskGroup]> {
        self.deliverables.get(key).map(Vec::as_slice)
    }

    pub fn deliverable_mut(&mut self, key: &str) -> Option<&mut Vec<TaskGroup>> {
        self.deliverables.get_mut(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, groups: Vec<TaskGroup>) {
        self.deliverables.insert(key.into(), groups);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[TaskGroup])> {
        self.deliverables
            .iter()
            .map(|(key, groups)| (key.as_str(), groups.as_slice()))
    }

    pub fn group(&self, key: &str, group_id: &str) -> Option<&TaskGroup> {
        self.deliverables
            .get(key)?
            .iter()
            .find(|group| group.id == group_id)
    }

    pub fn group_mut(&mut self, key: &str, group_id: &str) -> Option<&mut TaskGroup> {
        self.deliverables
            .get_mut(key)?
            .iter_mut()
            .find(|group| group.id == group_id)
    }

    pub fn groups_mut(&mut self) -> impl Iterator<Item = &mut TaskGroup> {
        self.deliverables
            .values_mut()
            .flat_map(|groups| groups.iter_mut())
    }

    pub fn all_subtasks(&self) -> impl Iterator<Item = &Subtask> {
        self.deliverables
            .values()
            .flat_map(|groups| groups.iter())
            .flat_map(|group| group.subtasks.iter())
    }
}
