use std::collections::HashSet;

use chrono::Local;
use serde::Serialize;
use serde_json::Value;
use ulid::Ulid;

use crate::command::{CommandEffect, StoreCommand};
use crate::defaults::DefaultSchema;
use crate::migration::MigrationReport;
use crate::model::{Artifact, State, Subtask, TaskGroup};
use crate::progress::{deliverable_progress, overall_progress, Progress, ProgressReport};
use crate::reconcile::{parse_stored, reconcile, ReconcileChange};
use crate::storage::KeyValueStore;

pub const DEFAULT_STORAGE_KEY: &str = "thesis_progress_tracker_v5_editable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnknownDeliverable,
    UnknownGroup,
    UnknownSubtask,
    EmptyTitle,
}

impl SkipReason {
    pub fn describe(&self) -> &'static str {
        match self {
            SkipReason::UnknownDeliverable => "unknown deliverable",
            SkipReason::UnknownGroup => "unknown task group",
            SkipReason::UnknownSubtask => "unknown subtask",
            SkipReason::EmptyTitle => "title is empty",
        }
    }
}

/// Result of a store mutation. `Skipped` means nothing changed and nothing was persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Applied(T),
    Skipped(SkipReason),
}

impl<T> Outcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(value) => Some(value),
            Outcome::Skipped(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Applied(value) => Outcome::Applied(f(value)),
            Outcome::Skipped(reason) => Outcome::Skipped(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistStatus {
    Written,
    Failed(String),
    /// Storage could not be read at load time; nothing is written back.
    Disabled,
}

impl PersistStatus {
    pub fn is_written(&self) -> bool {
        matches!(self, PersistStatus::Written)
    }
}

/// Progress values a view needs to refresh after a mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub deliverable: String,
    pub group_id: String,
    /// `None` once the group has been removed.
    pub group: Option<Progress>,
    pub group_completed: bool,
    pub deliverable_progress: Progress,
    pub overall: Progress,
    pub persisted: PersistStatus,
}

/// One line of the subtask editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtaskRow {
    pub previous_id: Option<String>,
    pub text: String,
}

impl SubtaskRow {
    pub fn existing(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            previous_id: Some(id.into()),
            text: text.into(),
        }
    }

    pub fn fresh(text: impl Into<String>) -> Self {
        Self {
            previous_id: None,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    Seeded,
    Stored,
    RecoveredFromCorrupt,
    StorageUnavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub source: LoadSource,
    pub migration: Option<MigrationReport>,
    pub changes: Vec<ReconcileChange>,
    pub persisted: PersistStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub at: String,
    pub message: String,
}

/// Owns every deliverable's task tree and persists it after each mutation.
pub struct TaskStore<S: KeyValueStore> {
    storage: S,
    key: String,
    defaults: DefaultSchema,
    state: State,
    in_memory_only: bool,
    notices: Vec<Notice>,
    load_report: LoadReport,
}

impl<S: KeyValueStore> TaskStore<S> {
    pub fn load(storage: S, defaults: DefaultSchema) -> Self {
        Self::load_with_key(storage, defaults, DEFAULT_STORAGE_KEY)
    }

    pub fn load_with_key(storage: S, defaults: DefaultSchema, key: &str) -> Self {
        let mut store = Self {
            storage,
            key: key.to_string(),
            defaults,
            state: State::new(),
            in_memory_only: false,
            notices: Vec::new(),
            load_report: LoadReport {
                source: LoadSource::Seeded,
                migration: None,
                changes: Vec::new(),
                persisted: PersistStatus::Disabled,
            },
        };
        store.reload();
        store
    }

    /// Re-read the stored record, migrate and reconcile it, and persist the result.
    pub fn reload(&mut self) -> &LoadReport {
        self.in_memory_only = false;
        let (source, migration, state) = match self.storage.get(&self.key) {
            Ok(None) => (LoadSource::Seeded, None, self.defaults.seed()),
            Ok(Some(raw)) => match parse_raw(&raw) {
                Ok((migration, state)) => (LoadSource::Stored, Some(migration), state),
                Err(message) => {
                    self.notice(format!(
                        "stored progress is unreadable ({message}); starting from defaults"
                    ));
                    self.backup_corrupt(&raw);
                    (LoadSource::RecoveredFromCorrupt, None, self.defaults.seed())
                }
            },
            Err(err) => {
                self.in_memory_only = true;
                self.notice(format!(
                    "storage unavailable ({err}); changes will not be saved"
                ));
                (LoadSource::StorageUnavailable, None, self.defaults.seed())
            }
        };

        let reconciled = reconcile(state, &self.defaults);
        let changes = reconciled.changes;
        self.state = reconciled.state;
        tracing::debug!(
            key = %self.key,
            source = ?source,
            changes = changes.len(),
            "loaded progress state"
        );

        let persisted = self.persist();
        self.load_report = LoadReport {
            source,
            migration,
            changes,
            persisted,
        };
        &self.load_report
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_key(&self) -> &str {
        &self.key
    }

    pub fn is_in_memory_only(&self) -> bool {
        self.in_memory_only
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn deliverable(&self, key: &str) -> Option<&[TaskGroup]> {
        self.state.deliverable(key)
    }

    pub fn group(&self, key: &str, group_id: &str) -> Option<&TaskGroup> {
        self.state.group(key, group_id)
    }

    pub fn report(&self) -> ProgressReport {
        ProgressReport::from_state(&self.state)
    }

    pub fn apply(&mut self, command: StoreCommand) -> Outcome<CommandEffect> {
        tracing::debug!(command = command.name(), "applying store command");
        match command {
            StoreCommand::ToggleSubtask {
                deliverable,
                group,
                subtask,
                completed,
            } => self
                .toggle_subtask(&deliverable, &group, &subtask, completed)
                .map(CommandEffect::Progress),
            StoreCommand::ReplaceGroupContents {
                deliverable,
                group,
                title,
                subtasks,
                artifacts,
            } => self
                .replace_group_contents(&deliverable, &group, &title, subtasks, artifacts)
                .map(CommandEffect::Progress),
            StoreCommand::AddGroup { deliverable, title } => self
                .add_group(&deliverable, &title)
                .map(CommandEffect::Progress),
            StoreCommand::RemoveGroup { deliverable, group } => self
                .remove_group(&deliverable, &group)
                .map(CommandEffect::Progress),
            StoreCommand::SetUserNotes {
                deliverable,
                group,
                text,
            } => self
                .set_user_notes(&deliverable, &group, &text)
                .map(|persisted| CommandEffect::NotesSaved { persisted }),
        }
    }

    pub fn toggle_subtask(
        &mut self,
        key: &str,
        group_id: &str,
        subtask_id: &str,
        completed: bool,
    ) -> Outcome<ProgressUpdate> {
        let result = self.locate_group_mut(key, group_id).and_then(|group| {
            let subtask = group
                .subtask_mut(subtask_id)
                .ok_or(SkipReason::UnknownSubtask)?;
            subtask.completed = completed;
            group.refresh_completed();
            Ok(())
        });
        match result {
            Ok(()) => Outcome::Applied(self.commit(key, group_id)),
            Err(reason) => Outcome::Skipped(reason),
        }
    }

    /// Replace a group's title, subtasks and artifacts from an editor submission.
    ///
    /// Rows naming a subtask that still exists keep its completion; every other
    /// row starts incomplete. Rows and artifacts that trim to nothing are dropped.
    pub fn replace_group_contents(
        &mut self,
        key: &str,
        group_id: &str,
        title: &str,
        rows: Vec<SubtaskRow>,
        artifacts: Vec<String>,
    ) -> Outcome<ProgressUpdate> {
        let group = match self.locate_group_mut(key, group_id) {
            Ok(group) => group,
            Err(reason) => return Outcome::Skipped(reason),
        };

        let mut taken: HashSet<String> = HashSet::new();
        let mut subtasks = Vec::with_capacity(rows.len());
        for row in rows {
            let text = row.text.trim();
            if text.is_empty() {
                continue;
            }
            let previous = row
                .previous_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty() && !taken.contains(*id));
            let (id, completed) = match previous {
                Some(id) => (
                    id.to_string(),
                    group.subtask(id).map(|s| s.completed).unwrap_or(false),
                ),
                None => {
                    let id = unique_id(&format!("{group_id}_s"), |candidate| {
                        taken.contains(candidate) || group.subtask(candidate).is_some()
                    });
                    (id, false)
                }
            };
            taken.insert(id.clone());
            subtasks.push(Subtask {
                id,
                text: text.to_string(),
                completed,
            });
        }

        let title = title.trim();
        if !title.is_empty() {
            group.text = title.to_string();
        }
        group.subtasks = subtasks;
        group.artifacts = artifacts
            .iter()
            .map(|text| text.trim())
            .filter(|text| !text.is_empty())
            .map(Artifact::new)
            .collect();
        group.refresh_completed();
        Outcome::Applied(self.commit(key, group_id))
    }

    pub fn add_group(&mut self, key: &str, title: &str) -> Outcome<ProgressUpdate> {
        let title = title.trim();
        if title.is_empty() {
            return Outcome::Skipped(SkipReason::EmptyTitle);
        }
        if !self.state.contains(key) {
            if !self.defaults.contains_key(key) {
                return Outcome::Skipped(SkipReason::UnknownDeliverable);
            }
            self.state.insert(key, Vec::new());
        }
        let Some(groups) = self.state.deliverable_mut(key) else {
            return Outcome::Skipped(SkipReason::UnknownDeliverable);
        };
        let id = unique_id(&format!("{key}_g"), |candidate| {
            groups.iter().any(|group| group.id == candidate)
        });
        groups.push(TaskGroup::new(id.clone(), title));
        Outcome::Applied(self.commit(key, &id))
    }

    pub fn remove_group(&mut self, key: &str, group_id: &str) -> Outcome<ProgressUpdate> {
        let Some(groups) = self.state.deliverable_mut(key) else {
            return Outcome::Skipped(SkipReason::UnknownDeliverable);
        };
        let before = groups.len();
        groups.retain(|group| group.id != group_id);
        if groups.len() == before {
            return Outcome::Skipped(SkipReason::UnknownGroup);
        }
        Outcome::Applied(self.commit(key, group_id))
    }

    /// Notes do not feed progress, so only the persist status comes back.
    pub fn set_user_notes(
        &mut self,
        key: &str,
        group_id: &str,
        text: &str,
    ) -> Outcome<PersistStatus> {
        match self.locate_group_mut(key, group_id) {
            Ok(group) => group.user_notes = text.to_string(),
            Err(reason) => return Outcome::Skipped(reason),
        }
        Outcome::Applied(self.persist())
    }

    fn locate_group_mut(&mut self, key: &str, group_id: &str) -> Result<&mut TaskGroup, SkipReason> {
        let groups = self
            .state
            .deliverable_mut(key)
            .ok_or(SkipReason::UnknownDeliverable)?;
        groups
            .iter_mut()
            .find(|group| group.id == group_id)
            .ok_or(SkipReason::UnknownGroup)
    }

    fn commit(&mut self, key: &str, group_id: &str) -> ProgressUpdate {
        let persisted = self.persist();
        let group = self.state.group(key, group_id);
        ProgressUpdate {
            deliverable: key.to_string(),
            group_id: group_id.to_string(),
            group: group.map(TaskGroup::progress),
            group_completed: group.map(|group| group.completed).unwrap_or(false),
            deliverable_progress: deliverable_progress(&self.state, key),
            overall: overall_progress(&self.state),
            persisted,
        }
    }

    fn persist(&mut self) -> PersistStatus {
        if self.in_memory_only {
            return PersistStatus::Disabled;
        }
        let body = match serde_json::to_string(&self.state) {
            Ok(body) => body,
            Err(err) => {
                let message = format!("failed to serialize progress: {err}");
                self.notice(message.clone());
                return PersistStatus::Failed(message);
            }
        };
        match self.storage.set(&self.key, &body) {
            Ok(()) => {
                tracing::debug!(key = %self.key, bytes = body.len(), "persisted progress state");
                PersistStatus::Written
            }
            Err(err) => {
                let message = format!("failed to save progress: {err}");
                self.notice(message.clone());
                PersistStatus::Failed(message)
            }
        }
    }

    fn backup_corrupt(&mut self, raw: &str) {
        let backup_key = format!("{}.corrupt", self.key);
        if let Err(err) = self.storage.set(&backup_key, raw) {
            self.notice(format!("failed to back up unreadable progress: {err}"));
        }
    }

    fn notice(&mut self, message: String) {
        tracing::warn!("{message}");
        self.notices.push(Notice {
            at: Local::now().to_rfc3339(),
            message,
        });
    }
}

fn parse_raw(raw: &str) -> Result<(MigrationReport, State), String> {
    let value: Value = serde_json::from_str(raw).map_err(|err| err.to_string())?;
    parse_stored(value).map_err(|err| err.to_string())
}

fn unique_id(prefix: &str, exists: impl Fn(&str) -> bool) -> String {
    loop {
        let candidate = format!("{prefix}{}", Ulid::new());
        if !exists(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StorageError};

    fn schema() -> DefaultSchema {
        DefaultSchema::from_json(
            r#"{
                "d0": [
                    {"id": "d0_1", "text": "Scope", "subtasks": [
                        {"id": "d0_1_s1", "text": "a", "completed": false},
                        {"id": "d0_1_s2", "text": "b", "completed": false}
                    ], "completed": false, "userNotes": "", "deliverables": [{"text": "scope.md"}]},
                    {"id": "d0_2", "text": "System", "subtasks": [
                        {"id": "d0_2_s1", "text": "c", "completed": false}
                    ], "completed": false, "userNotes": "", "deliverables": []}
                ],
                "d1": [
                    {"id": "d1_1", "text": "Anchors", "subtasks": [
                        {"id": "d1_1_s1", "text": "d", "completed": false},
                        {"id": "d1_1_s2", "text": "e", "completed": false}
                    ], "completed": false, "userNotes": "", "deliverables": []}
                ]
            }"#,
        )
        .expect("schema")
    }

    fn fresh_store() -> TaskStore<MemoryStore> {
        TaskStore::load(MemoryStore::new(), schema())
    }

    fn assert_completion_invariant(state: &State) {
        for (_, groups) in state.iter() {
            for group in groups {
                assert_eq!(group.completed, group.derived_completed(), "{}", group.id);
            }
        }
    }

    #[test]
    fn first_load_seeds_and_persists() {
        let store = fresh_store();
        assert_eq!(store.load_report().source, LoadSource::Seeded);
        assert!(store.load_report().persisted.is_written());
        assert_eq!(store.state(), schema().state());
        assert!(store
            .storage()
            .contains_key(DEFAULT_STORAGE_KEY)
            .expect("contains"));
    }

    #[test]
    fn toggle_recomputes_group_completion() {
        let mut store = fresh_store();
        let update = store
            .toggle_subtask("d0", "d0_1", "d0_1_s1", true)
            .applied()
            .expect("applied");
        assert!(!update.group_completed);
        assert_eq!(update.group, Some(Progress::new(1, 2)));
        assert_completion_invariant(store.state());

        let update = store
            .toggle_subtask("d0", "d0_1", "d0_1_s2", true)
            .applied()
            .expect("applied");
        assert!(update.group_completed);
        assert_eq!(update.deliverable_progress, Progress::new(2, 3));
        assert_eq!(update.overall, Progress::new(2, 5));
        assert_completion_invariant(store.state());

        store.toggle_subtask("d0", "d0_1", "d0_1_s2", false);
        assert!(!store.group("d0", "d0_1").expect("group").completed);
    }

    #[test]
    fn stale_ids_are_skipped_without_writing() {
        let mut store = fresh_store();
        let before = store.state().clone();
        assert_eq!(
            store.toggle_subtask("d9", "d0_1", "d0_1_s1", true),
            Outcome::Skipped(SkipReason::UnknownDeliverable)
        );
        assert_eq!(
            store.toggle_subtask("d0", "nope", "d0_1_s1", true),
            Outcome::Skipped(SkipReason::UnknownGroup)
        );
        assert_eq!(
            store.toggle_subtask("d0", "d0_1", "nope", true),
            Outcome::Skipped(SkipReason::UnknownSubtask)
        );
        assert_eq!(
            store.remove_group("d0", "nope"),
            Outcome::Skipped(SkipReason::UnknownGroup)
        );
        assert_eq!(
            store.set_user_notes("d0", "nope", "x"),
            Outcome::Skipped(SkipReason::UnknownGroup)
        );
        assert_eq!(store.state(), &before);
    }

    #[test]
    fn edit_keeps_completion_of_surviving_rows() {
        let mut store = fresh_store();
        store.toggle_subtask("d0", "d0_1", "d0_1_s1", true);
        let update = store
            .replace_group_contents(
                "d0",
                "d0_1",
                "Scope v2",
                vec![
                    SubtaskRow::existing("d0_1_s1", "a, reworded"),
                    SubtaskRow::fresh("brand new"),
                    SubtaskRow::fresh("   "),
                ],
                vec!["scope.md".to_string(), " ".to_string(), "notes.md".to_string()],
            )
            .applied()
            .expect("applied");
        let group = store.group("d0", "d0_1").expect("group");
        assert_eq!(group.text, "Scope v2");
        assert_eq!(group.subtasks.len(), 2);
        assert_eq!(group.subtasks[0].id, "d0_1_s1");
        assert_eq!(group.subtasks[0].text, "a, reworded");
        assert!(group.subtasks[0].completed);
        assert!(group.subtasks[1].id.starts_with("d0_1_s"));
        assert!(!group.subtasks[1].completed);
        let artifacts: Vec<&str> = group.artifacts.iter().map(|a| a.text.as_str()).collect();
        assert_eq!(artifacts, vec!["scope.md", "notes.md"]);
        assert_eq!(update.group, Some(Progress::new(1, 2)));
        assert_completion_invariant(store.state());
    }

    #[test]
    fn edit_dropping_incomplete_rows_can_complete_group() {
        let mut store = fresh_store();
        store.toggle_subtask("d0", "d0_1", "d0_1_s1", true);
        let update = store
            .replace_group_contents(
                "d0",
                "d0_1",
                "",
                vec![SubtaskRow::existing("d0_1_s1", "a")],
                Vec::new(),
            )
            .applied()
            .expect("applied");
        assert!(update.group_completed);
        assert_eq!(store.group("d0", "d0_1").expect("group").text, "Scope");
    }

    #[test]
    fn edit_with_repeated_previous_id_keeps_ids_unique() {
        let mut store = fresh_store();
        store.toggle_subtask("d0", "d0_1", "d0_1_s1", true);
        store.replace_group_contents(
            "d0",
            "d0_1",
            "Scope",
            vec![
                SubtaskRow::existing("d0_1_s1", "first"),
                SubtaskRow::existing("d0_1_s1", "copy"),
            ],
            Vec::new(),
        );
        let group = store.group("d0", "d0_1").expect("group");
        assert_eq!(group.subtasks.len(), 2);
        assert_ne!(group.subtasks[0].id, group.subtasks[1].id);
        assert!(group.subtasks[0].completed);
        assert!(!group.subtasks[1].completed);
    }

    #[test]
    fn edit_with_vanished_previous_id_starts_incomplete() {
        let mut store = fresh_store();
        store.replace_group_contents(
            "d0",
            "d0_1",
            "Scope",
            vec![SubtaskRow::existing("gone", "resurrected")],
            Vec::new(),
        );
        let group = store.group("d0", "d0_1").expect("group");
        assert!(!group.subtasks[0].completed);
        assert!(!group.completed);
    }

    #[test]
    fn add_group_generates_unique_ids() {
        let mut store = fresh_store();
        let mut ids = HashSet::new();
        for idx in 0..50 {
            let update = store
                .add_group("d1", &format!("Group {idx}"))
                .applied()
                .expect("applied");
            assert!(update.group_id.starts_with("d1_g"));
            assert!(ids.insert(update.group_id));
        }
        let group = store.deliverable("d1").expect("d1").last().expect("last");
        assert!(group.subtasks.is_empty());
        assert!(group.artifacts.is_empty());
        assert!(group.user_notes.is_empty());
        assert!(!group.completed);
    }

    #[test]
    fn add_group_rejects_empty_titles_and_unknown_deliverables() {
        let mut store = fresh_store();
        assert_eq!(
            store.add_group("d0", "  "),
            Outcome::Skipped(SkipReason::EmptyTitle)
        );
        assert_eq!(
            store.add_group("d9", "Side"),
            Outcome::Skipped(SkipReason::UnknownDeliverable)
        );
    }

    #[test]
    fn remove_group_updates_progress() {
        let mut store = fresh_store();
        store.toggle_subtask("d0", "d0_2", "d0_2_s1", true);
        let update = store
            .remove_group("d0", "d0_2")
            .applied()
            .expect("applied");
        assert_eq!(update.group, None);
        assert_eq!(update.deliverable_progress, Progress::new(0, 2));
        assert!(store.group("d0", "d0_2").is_none());
    }

    #[test]
    fn notes_do_not_change_progress() {
        let mut store = fresh_store();
        let before = store.report().overall;
        let status = store
            .set_user_notes("d0", "d0_1", "calibrate first")
            .applied()
            .expect("applied");
        assert!(status.is_written());
        assert_eq!(store.group("d0", "d0_1").expect("group").user_notes, "calibrate first");
        assert_eq!(store.report().overall, before);
    }

    #[test]
    fn apply_dispatches_commands() {
        let mut store = fresh_store();
        let effect = store
            .apply(StoreCommand::ToggleSubtask {
                deliverable: "d1".to_string(),
                group: "d1_1".to_string(),
                subtask: "d1_1_s1".to_string(),
                completed: true,
            })
            .applied()
            .expect("applied");
        assert!(effect.persisted().is_written());
        let effect = store
            .apply(StoreCommand::SetUserNotes {
                deliverable: "d1".to_string(),
                group: "d1_1".to_string(),
                text: "n".to_string(),
            })
            .applied()
            .expect("applied");
        assert!(matches!(effect, CommandEffect::NotesSaved { .. }));
    }

    #[test]
    fn corrupt_record_falls_back_to_defaults_and_is_backed_up() {
        let storage = MemoryStore::new().with_entry(DEFAULT_STORAGE_KEY, "{not json");
        let store = TaskStore::load(storage, schema());
        assert_eq!(store.load_report().source, LoadSource::RecoveredFromCorrupt);
        assert_eq!(store.state(), schema().state());
        assert_eq!(store.notices().len(), 1);
        let backup = store
            .storage()
            .get(&format!("{DEFAULT_STORAGE_KEY}.corrupt"))
            .expect("get");
        assert_eq!(backup.as_deref(), Some("{not json"));
    }

    #[test]
    fn write_failures_keep_state_in_memory() {
        let mut storage = MemoryStore::new();
        storage.set_fail_writes(true);
        let mut store = TaskStore::load(storage, schema());
        assert!(matches!(
            store.load_report().persisted,
            PersistStatus::Failed(_)
        ));
        let update = store
            .toggle_subtask("d0", "d0_1", "d0_1_s1", true)
            .applied()
            .expect("applied");
        assert!(matches!(update.persisted, PersistStatus::Failed(_)));
        assert!(store.group("d0", "d0_1").expect("group").subtasks[0].completed);
        assert!(!store.is_in_memory_only());
        assert_eq!(store.notices().len(), 2);
    }

    #[test]
    fn load_recomputes_stale_completion_flags() {
        let raw = r#"{"d0": [
            {"id": "d0_legacy", "text": "Legacy", "completed": true,
             "userNotes": "", "description": "<li>A</li>"},
            {"id": "d0_user", "text": "Mine", "completed": true,
             "userNotes": "", "subtasks": [], "deliverables": []}
        ]}"#;
        let storage = MemoryStore::new().with_entry(DEFAULT_STORAGE_KEY, raw);
        let store = TaskStore::load(storage, schema());
        assert_eq!(store.load_report().source, LoadSource::Stored);
        assert!(!store.group("d0", "d0_legacy").expect("legacy").completed);
        assert!(!store.group("d0", "d0_user").expect("user").completed);
        assert_completion_invariant(store.state());
    }

    #[test]
    fn null_collections_do_not_discard_the_record() {
        let raw = r#"{"d0": [
            {"id": "d0_1", "text": "Scope", "completed": false, "userNotes": "keep me",
             "subtasks": [
                {"id": "d0_1_s1", "text": "a", "completed": true},
                {"id": "d0_1_s2", "text": "b", "completed": false}
             ],
             "deliverables": null},
            {"id": "d0_old", "text": "Old", "completed": false, "userNotes": null,
             "subtasks": null, "description": "<li>x</li><li>y</li>"}
        ]}"#;
        let storage = MemoryStore::new().with_entry(DEFAULT_STORAGE_KEY, raw);
        let store = TaskStore::load(storage, schema());
        assert_eq!(store.load_report().source, LoadSource::Stored);
        assert!(store.notices().is_empty());
        let scope = store.group("d0", "d0_1").expect("scope");
        assert_eq!(scope.user_notes, "keep me");
        assert_eq!(scope.artifacts.len(), 1);
        let old = store.group("d0", "d0_old").expect("old");
        assert_eq!(old.subtasks.len(), 2);
        assert_eq!(old.user_notes, "");
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "denied",
            )))
        }

        fn set(&mut self, _key: &str, _value: &str) -> Result<(), StorageError> {
            panic!("set must not be called when reads fail");
        }
    }

    struct FlakyStore {
        readable: bool,
        inner: MemoryStore,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            if self.readable {
                self.inner.get(key)
            } else {
                BrokenStore.get(key)
            }
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
            self.inner.set(key, value)
        }
    }

    #[test]
    fn successful_reload_leaves_memory_only_mode() {
        let storage = FlakyStore {
            readable: false,
            inner: MemoryStore::new(),
        };
        let mut store = TaskStore::load(storage, schema());
        assert!(store.is_in_memory_only());

        store.storage.readable = true;
        let report = store.reload();
        assert_eq!(report.source, LoadSource::Seeded);
        assert!(report.persisted.is_written());
        assert!(!store.is_in_memory_only());
        let update = store
            .toggle_subtask("d0", "d0_1", "d0_1_s1", true)
            .applied()
            .expect("applied");
        assert!(update.persisted.is_written());
    }

    #[test]
    fn unreadable_storage_switches_to_memory_only() {
        let mut store = TaskStore::load(BrokenStore, schema());
        assert_eq!(store.load_report().source, LoadSource::StorageUnavailable);
        assert_eq!(store.load_report().persisted, PersistStatus::Disabled);
        assert!(store.is_in_memory_only());
        let update = store
            .toggle_subtask("d0", "d0_1", "d0_1_s1", true)
            .applied()
            .expect("applied");
        assert_eq!(update.persisted, PersistStatus::Disabled);
    }
}
