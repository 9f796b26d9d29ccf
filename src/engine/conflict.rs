use crate::limits::*;
use crate::model::*;
use crate::policy::BlackoutPolicy;

use super::EngineError;

pub(crate) fn validate_span(span: &Span, policy: &BlackoutPolicy) -> Result<(), EngineError> {
    if span.end <= span.start {
        return Err(EngineError::InvalidInterval {
            start: span.start,
            end: span.end,
        });
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > policy.max_task_duration() {
        return Err(EngineError::LimitExceeded("task longer than the gap between blackout windows"));
    }
    Ok(())
}

pub(crate) fn validate_task(task: &Task, policy: &BlackoutPolicy) -> Result<(), EngineError> {
    if task.id.is_empty() || task.id.len() > MAX_ID_LEN {
        return Err(EngineError::LimitExceeded("task id length"));
    }
    let text_fields = [
        &task.title,
        &task.description,
        &task.customer_id,
        &task.location_id,
        &task.timezone,
        &task.country,
    ];
    if text_fields
        .iter()
        .any(|f| f.as_ref().is_some_and(|s| s.len() > MAX_TEXT_LEN))
    {
        return Err(EngineError::LimitExceeded("task text field too long"));
    }
    validate_span(&task.span, policy)
}

/// Overlapping pairs and blackout intrusions in a start-sorted task list.
pub fn find_conflicts(tasks: &[Task], policy: &BlackoutPolicy) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    // Task with the furthest end seen so far.
    let mut reach: Option<&Task> = None;
    for task in tasks {
        if let Some(prev) = reach
            && task.span.start < prev.span.end
        {
            conflicts.push(Conflict::Overlap {
                first: prev.id.clone(),
                second: task.id.clone(),
            });
        }
        if reach.is_none_or(|prev| task.span.end > prev.span.end) {
            reach = Some(task);
        }
        if let Some(blackout) = policy.occurrence_overlapping(&task.span) {
            conflicts.push(Conflict::Blackout {
                task_id: task.id.clone(),
                blackout,
            });
        }
    }
    conflicts
}
