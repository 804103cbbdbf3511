use serde::Serialize;

use crate::model::{State, Subtask};

/// Completed/total subtask counts and the rounded percentage derived from them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub percent: u8,
}

impl Progress {
    pub fn new(completed: usize, total: usize) -> Self {
        Self {
            completed,
            total,
            percent: percent(completed, total),
        }
    }

    pub fn from_subtasks<'a>(subtasks: impl IntoIterator<Item = &'a Subtask>) -> Self {
        let (completed, total) = subtasks
            .into_iter()
            .fold((0, 0), |(done, total), subtask| {
                (done + usize::from(subtask.completed), total + 1)
            });
        Self::new(completed, total)
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

/// `round(100 * completed / total)`, 0 when there is nothing to complete.
pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let ratio = completed.min(total) as f64 / total as f64;
    (ratio * 100.0).round() as u8
}

pub fn deliverable_progress(state: &State, key: &str) -> Progress {
    let groups = state.deliverable(key).unwrap_or_default();
    Progress::from_subtasks(groups.iter().flat_map(|group| group.subtasks.iter()))
}

pub fn overall_progress(state: &State) -> Progress {
    Progress::from_subtasks(state.all_subtasks())
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub id: String,
    pub text: String,
    pub completed: bool,
    pub progress: Progress,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliverableSummary {
    pub key: String,
    pub completed: bool,
    pub progress: Progress,
    pub groups: Vec<GroupSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub overall: Progress,
    pub deliverables: Vec<DeliverableSummary>,
}

impl ProgressReport {
    pub fn from_state(state: &State) -> Self {
        let deliverables = state
            .iter()
            .map(|(key, groups)| {
                let progress = deliverable_progress(state, key);
                DeliverableSummary {
                    key: key.to_string(),
                    completed: progress.is_complete(),
                    progress,
                    groups: groups
                        .iter()
                        .map(|group| GroupSummary {
                            id: group.id.clone(),
                            text: group.text.clone(),
                            completed: group.completed,
                            progress: group.progress(),
                        })
                        .collect(),
                }
            })
            .collect();
        Self {
            overall: overall_progress(state),
            deliverables,
        }
    }

    pub fn deliverable(&self, key: &str) -> Option<&DeliverableSummary> {
        self.deliverables.iter().find(|summary| summary.key == key)
    }
}

pub fn render_progress_bar(progress: &Progress, width: usize) -> String {
    let filled = (usize::from(progress.percent) * width + 50) / 100;
    format!(
        "[{}{}] {:>3}%",
        "#".repeat(filled),
        "-".repeat(width.saturating_sub(filled)),
        progress.percent
    )
}
