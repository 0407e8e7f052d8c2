use chrono::{DateTime, Duration, Utc};

use crate::model::{Task, TaskStatus};

/// Width of the "due now" window after the due date.
pub const DEADLINE_WINDOW_MINUTES: i64 = 1;

/// Quiet period after the due date before a task counts as overdue.
pub const OVERDUE_GRACE_MINUTES: i64 = 5;

/// Where a task sits relative to its due date at a given instant.
///
/// ```text
///            reminder         due    due+1m      due+5m
/// Upcoming      | ReminderDue  | Deadline | Passed  |  Overdue
/// --------------[--------------[----------[---------]---------→
/// ```
///
/// `DeadlinePassed` is the quiet gap between the deadline window and
/// overdue; nothing is emitted there. DONE tasks are always `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueState {
    Done,
    Upcoming,
    ReminderDue,
    DeadlineDue,
    DeadlinePassed,
    Overdue,
}

/// Classify `task` against its due date at instant `now`.
///
/// Pure window math over (due date, reminder offset, status, now). The
/// reminder latch (`task.notified`) does not factor in here; the sweep
/// applies it when deciding whether to act on `ReminderDue`.
///
/// Returns `None` for tasks with no due date: there is nothing to watch,
/// which is a normal case rather than an error.
pub fn classify(task: &Task, now: DateTime<Utc>) -> Option<DueState> {
    let due = task.due_date?;

    if task.status == TaskStatus::Done {
        return Some(DueState::Done);
    }

    let reminder_at = due - Duration::minutes(i64::from(task.reminder_minutes));
    let deadline_end = due + Duration::minutes(DEADLINE_WINDOW_MINUTES);
    let overdue_from = due + Duration::minutes(OVERDUE_GRACE_MINUTES);

    let state = if now < reminder_at {
        DueState::Upcoming
    } else if now < due {
        DueState::ReminderDue
    } else if now < deadline_end {
        DueState::DeadlineDue
    } else if now <= overdue_from {
        DueState::DeadlinePassed
    } else {
        DueState::Overdue
    };
    Some(state)
}
