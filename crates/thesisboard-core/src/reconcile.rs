use serde::Serialize;
use serde_json::Value;

use crate::defaults::DefaultSchema;
use crate::migration::{migrate_value, MigrationError, MigrationReport};
use crate::model::State;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconcileChange {
    DeliverableSeeded { deliverable: String },
    GroupAppended { deliverable: String, group: String },
    GroupUpgraded { deliverable: String, group: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub state: State,
    pub changes: Vec<ReconcileChange>,
}

/// Merge a stored state with the catalog.
///
/// Missing deliverables and groups are copied from the catalog. A stored group
/// whose subtask or artifact count is below the catalog's is overwritten with
/// the catalog's title, subtasks and artifacts; its notes are kept. Count
/// comparison only: text edits in the catalog do not reach groups that are
/// already level with it. Every group's `completed` flag is recomputed from
/// its subtasks afterwards.
pub fn reconcile(mut state: State, defaults: &DefaultSchema) -> Reconciled {
    let mut changes = Vec::new();
    for (key, default_groups) in defaults.state().iter() {
        let Some(groups) = state.deliverable_mut(key) else {
            state.insert(key, default_groups.to_vec());
            changes.push(ReconcileChange::DeliverableSeeded {
                deliverable: key.to_string(),
            });
            continue;
        };
        for default_group in default_groups {
            match groups.iter_mut().find(|group| group.id == default_group.id) {
                None => {
                    groups.push(default_group.clone());
                    changes.push(ReconcileChange::GroupAppended {
                        deliverable: key.to_string(),
                        group: default_group.id.clone(),
                    });
                }
                Some(group) => {
                    let behind = group.subtasks.len() < default_group.subtasks.len()
                        || group.artifacts.len() < default_group.artifacts.len();
                    if behind {
                        group.subtasks = default_group.subtasks.clone();
                        group.artifacts = default_group.artifacts.clone();
                        group.text = default_group.text.clone();
                        changes.push(ReconcileChange::GroupUpgraded {
                            deliverable: key.to_string(),
                            group: default_group.id.clone(),
                        });
                    }
                }
            }
        }
    }
    for group in state.groups_mut() {
        group.refresh_completed();
    }
    Reconciled { state, changes }
}

#[derive(Debug)]
pub struct StoredReconciliation {
    pub migration: MigrationReport,
    pub reconciled: Reconciled,
}

#[derive(Debug, thiserror::Error)]
pub enum StoredRecordError {
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error("Stored record does not match the group layout: {0}")]
    Shape(#[from] serde_json::Error),
}

/// Shape-migrate a raw stored record into a typed state, without reconciling.
pub fn parse_stored(mut value: Value) -> Result<(MigrationReport, State), StoredRecordError> {
    let migration = migrate_value(&mut value)?;
    let state: State = serde_json::from_value(value)?;
    Ok((migration, state))
}

/// Shape-migrate a raw stored record, then reconcile it with the catalog.
pub fn reconcile_stored(
    value: Value,
    defaults: &DefaultSchema,
) -> Result<StoredReconciliation, StoredRecordError> {
    let (migration, state) = parse_stored(value)?;
    Ok(StoredReconciliation {
        migration,
        reconciled: reconcile(state, defaults),
    })
}
