use thesisboard_core::model::TaskGroup;
use thesisboard_core::progress::{render_progress_bar, ProgressReport};
use thesisboard_core::store::ProgressUpdate;

const BAR_WIDTH: usize = 20;

pub fn status_lines(report: &ProgressReport) -> Vec<String> {
    let mut lines = vec![format!(
        "overall | {} | {}/{}",
        render_progress_bar(&report.overall, BAR_WIDTH),
        report.overall.completed,
        report.overall.total
    )];
    for summary in &report.deliverables {
        let marker = if summary.completed { " (done)" } else { "" };
        lines.push(format!(
            "{} | {} | {}/{}{}",
            summary.key,
            render_progress_bar(&summary.progress, BAR_WIDTH),
            summary.progress.completed,
            summary.progress.total,
            marker
        ));
    }
    lines
}

pub fn group_lines(group: &TaskGroup) -> Vec<String> {
    let progress = group.progress();
    let title = if group.text.trim().is_empty() {
        "(untitled)"
    } else {
        group.text.trim()
    };
    let mut lines = vec![format!("{} | {:>3}% | {}", group.id, progress.percent, title)];
    for subtask in &group.subtasks {
        let mark = if subtask.completed { "x" } else { " " };
        lines.push(format!("  [{}] {} {}", mark, subtask.id, subtask.text));
    }
    if !group.artifacts.is_empty() {
        lines.push("  artifacts:".to_string());
        for artifact in &group.artifacts {
            lines.push(format!("    - {}", artifact.text));
        }
    }
    if !group.user_notes.trim().is_empty() {
        lines.push("  notes:".to_string());
        for note in group.user_notes.lines() {
            lines.push(format!("    {}", note));
        }
    }
    lines
}

pub fn update_line(update: &ProgressUpdate) -> String {
    let group = match update.group {
        Some(progress) => format!("{}%", progress.percent),
        None => "removed".to_string(),
    };
    format!(
        "{}/{} | group {} | {} {}% | overall {}%",
        update.deliverable,
        update.group_id,
        group,
        update.deliverable,
        update.deliverable_progress.percent,
        update.overall.percent
    )
}
