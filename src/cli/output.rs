//! CLI output formatting

use crate::{
    core::state::{FailureCause, RunStatus, StepState},
    execution::ExecutionEvent,
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static BRANCH: Emoji<'_, '_> = Emoji("🔀 ", "? ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create a progress bar over `total` steps
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a step state for display
pub fn format_step_state(state: &StepState) -> String {
    match state {
        StepState::Pending => style("PENDING").dim().to_string(),
        StepState::Running { .. } => style("RUNNING").yellow().to_string(),
        StepState::Succeeded {
            decision: Some(branch),
            ..
        } => style(format!("SUCCEEDED ({} branch)", branch)).green().to_string(),
        StepState::Succeeded { .. } => style("SUCCEEDED").green().to_string(),
        StepState::Failed { .. } => style("FAILED").red().to_string(),
        StepState::Skipped { .. } => style("SKIPPED").dim().to_string(),
        StepState::Cancelled { .. } => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
        RunStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format a run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
        _ => INFO,
    };

    format!(
        "{} {} - {} - {} ({}/{}, {} skipped) - {}",
        status_icon,
        style(short_id(&summary.run_id)).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        summary.succeeded_steps,
        summary.total_steps,
        summary.skipped_steps,
        style(format!("{:.0}%", summary.progress * 100.0)).cyan()
    )
}

fn format_cause(cause: &FailureCause) -> String {
    match cause {
        FailureCause::Resolution => "input resolution".to_string(),
        FailureCause::Condition => "condition".to_string(),
        FailureCause::Execution => "executor".to_string(),
        FailureCause::UpstreamFailed { step } => format!("upstream {}", step),
    }
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline_name,
        } => format!(
            "{} Starting pipeline {} ({})",
            ROCKET,
            style(pipeline_name).bold(),
            style(short_id(run_id)).dim()
        ),
        ExecutionEvent::StepStarted { step, .. } => {
            format!("{} {}", SPINNER, style(step).cyan())
        }
        ExecutionEvent::StepSucceeded { step, .. } => {
            format!("{} {}", CHECK, style(step).green())
        }
        ExecutionEvent::StepFailed {
            step, error, cause, ..
        } => format!(
            "{} {} [{}]: {}",
            CROSS,
            style(step).red(),
            format_cause(cause),
            style(error).dim()
        ),
        ExecutionEvent::StepSkipped { step, reason, .. } => {
            format!("{} {} ({})", SKIP, style(step).dim(), reason)
        }
        ExecutionEvent::StepCancelled { step, .. } => {
            format!("{} {} cancelled", WARN, style(step).yellow())
        }
        ExecutionEvent::ConditionEvaluated {
            step,
            branch,
            activated,
            ..
        } => {
            let activated = if activated.is_empty() {
                style("(empty)").dim().to_string()
            } else {
                activated.join(", ")
            };
            format!(
                "{} {} → {} branch: {}",
                BRANCH,
                style(step).cyan(),
                style(branch).bold(),
                activated
            )
        }
        ExecutionEvent::RunCompleted { run_id, status } => format!(
            "{} Run ({}) {}",
            INFO,
            style(short_id(run_id)).dim(),
            format_status(*status)
        ),
    }
}

/// Whether an event moves a step into a terminal state
pub fn is_step_terminal_event(event: &ExecutionEvent) -> bool {
    matches!(
        event,
        ExecutionEvent::StepSucceeded { .. }
            | ExecutionEvent::StepFailed { .. }
            | ExecutionEvent::StepSkipped { .. }
            | ExecutionEvent::StepCancelled { .. }
            | ExecutionEvent::ConditionEvaluated { .. }
    )
}

/// Format a duration as `1h 2m 3s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
