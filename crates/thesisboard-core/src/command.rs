use serde::Serialize;

use crate::store::{PersistStatus, ProgressUpdate, SubtaskRow};

/// A mutation requested by a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    ToggleSubtask {
        deliverable: String,
        group: String,
        subtask: String,
        completed: bool,
    },
    ReplaceGroupContents {
        deliverable: String,
        group: String,
        title: String,
        subtasks: Vec<SubtaskRow>,
        artifacts: Vec<String>,
    },
    AddGroup {
        deliverable: String,
        title: String,
    },
    RemoveGroup {
        deliverable: String,
        group: String,
    },
    SetUserNotes {
        deliverable: String,
        group: String,
        text: String,
    },
}

impl StoreCommand {
    pub fn name(&self) -> &'static str {
        match self {
            StoreCommand::ToggleSubtask { .. } => "toggle_subtask",
            StoreCommand::ReplaceGroupContents { .. } => "replace_group_contents",
            StoreCommand::AddGroup { .. } => "add_group",
            StoreCommand::RemoveGroup { .. } => "remove_group",
            StoreCommand::SetUserNotes { .. } => "set_user_notes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum CommandEffect {
    Progress(ProgressUpdate),
    NotesSaved { persisted: PersistStatus },
}

impl CommandEffect {
    pub fn persisted(&self) -> &PersistStatus {
        match self {
            CommandEffect::Progress(update) => &update.persisted,
            CommandEffect::NotesSaved { persisted } => persisted,
        }
    }
}
