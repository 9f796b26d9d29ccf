//! Pure reconciliation over owned snapshots. No locking, no I/O.
//!
//! Both operations only ever move tasks later and never change a task's
//! duration.

use crate::model::*;
use crate::policy::BlackoutPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationPlan {
    pub task: Task,
    pub shifted: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReshufflePlan {
    /// Working set in priority-then-start order.
    pub tasks: Vec<Task>,
    pub shifted: Vec<String>,
}

fn by_start(a: &Task, b: &Task) -> std::cmp::Ordering {
    a.span.start.cmp(&b.span.start).then_with(|| a.id.cmp(&b.id))
}

/// Move `task` to the requested span and push displaced neighbours later.
///
/// `affected` is every other task of the task's old and new engineer. The
/// cascade is one forward pass: a cursor starts at `task.end + buffer`, each
/// neighbour starting before it is moved to the cursor (then clamped out of
/// the blackout) and the cursor jumps past it. A neighbour already at or past
/// the cursor stops the cascade, since everything after it starts later still.
pub fn relocate(
    mut task: Task,
    request: &RelocationRequest,
    mut affected: Vec<Task>,
    policy: &BlackoutPolicy,
) -> RelocationPlan {
    task.span = policy.clamp(request.span);
    if let Some(engineer_id) = &request.engineer_id {
        task.engineer_id = Some(engineer_id.clone());
    }
    if let Some(tz) = &request.timezone {
        task.timezone = Some(tz.clone());
    }
    if let Some(country) = &request.country {
        task.country = Some(country.clone());
    }

    affected.sort_by(by_start);

    let buffer = policy.buffer();
    let mut cursor = task.span.end + buffer;
    let mut shifted = Vec::new();
    for mut other in affected {
        if other.span.start >= cursor {
            break;
        }
        other.span = policy.clamp(other.span.shifted_to(cursor));
        cursor = other.span.end + buffer;
        shifted.push(other);
    }

    RelocationPlan { task, shifted }
}

/// Add `new_task` to an engineer's tasks and re-pack them priority first.
///
/// Sort key is (priority, start); a single pass then pushes each task to at
/// least `previous.end + insert_buffer` and out of the blackout. A P1 task
/// can therefore displace P2/P3 work that never overlapped it.
pub fn reshuffle(existing: Vec<Task>, new_task: Task, policy: &BlackoutPolicy) -> ReshufflePlan {
    let original: Vec<(String, Span)> = existing.iter().map(|t| (t.id.clone(), t.span)).collect();

    let mut tasks = existing;
    tasks.sort_by(by_start);
    tasks.push(new_task);
    // Stable: equal (priority, start) keeps the existing order, new task last.
    tasks.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.span.start.cmp(&b.span.start))
    });

    let gap = policy.insert_buffer();
    let mut prev_end: Option<Ms> = None;
    for task in tasks.iter_mut() {
        if let Some(end) = prev_end {
            let threshold = end + gap;
            if task.span.start < threshold {
                task.span = task.span.shifted_to(threshold);
            }
        }
        task.span = policy.clamp(task.span);
        prev_end = Some(task.span.end);
    }

    let shifted = original
        .into_iter()
        .filter(|(id, span)| {
            tasks
                .iter()
                .find(|t| &t.id == id)
                .is_some_and(|t| t.span != *span)
        })
        .map(|(id, _)| id)
        .collect();

    ReshufflePlan { tasks, shifted }
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: Ms = MINUTE_MS;
    const H: Ms = HOUR_MS;
    /// 2024-03-04T00:00:00Z
    const DAY0: Ms = 1_709_510_400_000;

    fn at(h: Ms, m: Ms) -> Ms {
        DAY0 + h * H + m * M
    }

    fn task(id: &str, priority: Priority, start: Ms, end: Ms) -> Task {
        Task::new(id, priority, Span::new(start, end)).assigned_to("E1")
    }

    fn span_of<'a>(tasks: &'a [Task], id: &str) -> &'a Span {
        &tasks.iter().find(|t| t.id == id).unwrap().span
    }

    #[test]
    fn reshuffle_priority_first_example() {
        let policy = BlackoutPolicy::default();
        let existing = vec![
            task("T1", Priority::P2, at(9, 0), at(10, 0)),
            task("T2", Priority::P1, at(10, 5), at(11, 0)),
        ];
        let new_task = task("T3", Priority::P1, at(9, 30), at(10, 15));
        let plan = reshuffle(existing, new_task, &policy);

        let order: Vec<_> = plan.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(order, ["T3", "T2", "T1"]);
        assert_eq!(*span_of(&plan.tasks, "T3"), Span::new(at(9, 30), at(10, 15)));
        assert_eq!(*span_of(&plan.tasks, "T2"), Span::new(at(10, 45), at(11, 40)));
        // 11:40 + 30 min = 12:10 lands in the blackout, clamped to 12:35.
        assert_eq!(*span_of(&plan.tasks, "T1"), Span::new(at(12, 35), at(13, 35)));
        assert_eq!(plan.shifted, vec!["T1".to_string(), "T2".to_string()]);
    }

    #[test]
    fn reshuffle_leaves_spread_out_tasks_alone() {
        let policy = BlackoutPolicy::default();
        let existing = vec![
            task("a", Priority::P1, at(8, 0), at(9, 0)),
            task("b", Priority::P2, at(14, 0), at(15, 0)),
        ];
        let plan = reshuffle(existing, task("c", Priority::P3, at(16, 0), at(17, 0)), &policy);
        assert!(plan.shifted.is_empty());
        assert_eq!(*span_of(&plan.tasks, "c"), Span::new(at(16, 0), at(17, 0)));
    }

    #[test]
    fn reshuffle_clamps_new_task_out_of_blackout() {
        let policy = BlackoutPolicy::default();
        let plan = reshuffle(Vec::new(), task("n", Priority::P1, at(12, 10), at(12, 40)), &policy);
        assert_eq!(plan.tasks[0].span, Span::new(at(12, 35), at(13, 5)));
    }

    #[test]
    fn reshuffle_p1_preempts_earlier_p3() {
        let policy = BlackoutPolicy::default();
        let existing = vec![task("low", Priority::P3, at(8, 0), at(9, 0))];
        let plan = reshuffle(existing, task("urgent", Priority::P1, at(15, 0), at(16, 0)), &policy);
        assert_eq!(*span_of(&plan.tasks, "low"), Span::new(at(16, 30), at(17, 30)));
        assert_eq!(plan.shifted, vec!["low".to_string()]);
    }

    #[test]
    fn relocate_into_blackout_starts_at_twelve_thirty_five() {
        let policy = BlackoutPolicy::default();
        let t = task("t", Priority::P2, at(9, 0), at(9, 30));
        let request = RelocationRequest::new("t", Span::new(at(12, 0), at(12, 30)));
        let plan = relocate(t, &request, Vec::new(), &policy);
        assert_eq!(plan.task.span, Span::new(at(12, 35), at(13, 5)));
        assert!(plan.shifted.is_empty());
    }

    #[test]
    fn relocate_cascades_with_buffer() {
        let policy = BlackoutPolicy::default();
        let t = task("t", Priority::P2, at(16, 0), at(17, 0));
        let affected = vec![
            task("a", Priority::P2, at(9, 30), at(10, 30)),
            task("b", Priority::P2, at(10, 40), at(11, 0)),
            task("c", Priority::P2, at(15, 0), at(16, 0)),
        ];
        let request = RelocationRequest::new("t", Span::new(at(9, 0), at(10, 0)));
        let plan = relocate(t, &request, affected, &policy);

        assert_eq!(plan.task.span, Span::new(at(9, 0), at(10, 0)));
        let ids: Vec<_> = plan.shifted.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(plan.shifted[0].span, Span::new(at(10, 5), at(11, 5)));
        assert_eq!(plan.shifted[1].span, Span::new(at(11, 10), at(11, 30)));
    }

    #[test]
    fn relocate_cascade_clamps_moved_neighbour() {
        let policy = BlackoutPolicy::default();
        let t = task("t", Priority::P2, at(8, 0), at(9, 0));
        let affected = vec![task("a", Priority::P2, at(11, 30), at(12, 0))];
        let request = RelocationRequest::new("t", Span::new(at(11, 0), at(11, 45)));
        let plan = relocate(t, &request, affected, &policy);
        // a would move to 11:50-12:20, which hits the blackout.
        assert_eq!(plan.shifted[0].span, Span::new(at(12, 35), at(13, 5)));
    }

    #[test]
    fn relocate_applies_engineer_and_locale() {
        let policy = BlackoutPolicy::default();
        let t = task("t", Priority::P2, at(8, 0), at(9, 0));
        let mut request = RelocationRequest::new("t", Span::new(at(14, 0), at(15, 0))).to_engineer("E2");
        request.timezone = Some("IST".into());
        request.country = Some("India".into());
        let plan = relocate(t, &request, Vec::new(), &policy);
        assert_eq!(plan.task.engineer_id.as_deref(), Some("E2"));
        assert_eq!(plan.task.timezone.as_deref(), Some("IST"));
        assert_eq!(plan.task.country.as_deref(), Some("India"));
    }

    #[test]
    fn relocate_moves_earlier_neighbours_behind_the_task() {
        // Every neighbour that starts before the cursor is pushed after it.
        let policy = BlackoutPolicy::default();
        let t = task("t", Priority::P2, at(8, 0), at(9, 0));
        let affected = vec![task("early", Priority::P1, at(9, 0), at(10, 0))];
        let request = RelocationRequest::new("t", Span::new(at(15, 0), at(16, 0)));
        let plan = relocate(t, &request, affected, &policy);
        assert_eq!(plan.shifted[0].span, Span::new(at(16, 5), at(17, 5)));
    }

    #[test]
    fn relocate_cascade_ends_at_first_gap() {
        let policy = BlackoutPolicy::default();
        let t = task("t", Priority::P2, at(17, 0), at(18, 0));
        let affected = vec![
            task("a", Priority::P2, at(10, 0), at(10, 30)),
            task("b", Priority::P2, at(14, 0), at(15, 0)),
            task("c", Priority::P2, at(15, 0), at(15, 30)),
        ];
        let request = RelocationRequest::new("t", Span::new(at(9, 0), at(10, 0)));
        let plan = relocate(t, &request, affected, &policy);
        let ids: Vec<_> = plan.shifted.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["a"]);
        assert_eq!(plan.shifted[0].span, Span::new(at(10, 5), at(10, 35)));
    }
}
