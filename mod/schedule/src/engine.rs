use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info};

use chime_core::{ServiceError, new_id};

use crate::duewatch::{self, DueState};
use crate::model::{NotificationKind, RecurrenceKind, RecurrenceRule, Task, TaskStatus};
use crate::notify::Notifier;
use crate::recurrence::next_occurrence;
use crate::store::TaskStore;

/// How far ahead of `now` the recurrence sweep materializes instances.
/// One full day of slack decouples the sweep period from occurrence
/// granularity: a template is discovered up to a day early, so missed
/// ticks delay an instance instead of skipping it.
const RECURRENCE_LOOKAHEAD_HOURS: i64 = 24;

/// Counts from one due-date sweep tick. Only notifications the sink
/// actually accepted are counted; suppressed emissions are not.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DueSweepStats {
    pub reminders: u32,
    pub deadlines: u32,
    pub overdue: u32,
}

impl DueSweepStats {
    pub fn total(&self) -> u32 {
        self.reminders + self.deadlines + self.overdue
    }
}

// ---------------------------------------------------------------------------
// ScheduleEngine
// ---------------------------------------------------------------------------

/// The scheduling engine.
///
/// Owns the two sweeps and the operations under them:
/// - Recurrence: turn template tasks into concrete instances on schedule,
///   advancing each template's next-occurrence pointer as it goes.
/// - Due-date watching: classify every outstanding task against its due
///   windows and emit reminder / deadline / overdue notifications.
///
/// Every entry point takes `now` explicitly; nothing in here reads the wall
/// clock. The worker passes `Utc::now()`, tests pass fixed instants.
pub struct ScheduleEngine {
    store: Arc<TaskStore>,
    notifier: Arc<dyn Notifier>,
}

impl ScheduleEngine {
    /// Create a new engine over the given store and notification sink.
    pub fn new(store: Arc<TaskStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    // =======================================================================
    // Recurrence setup / teardown
    // =======================================================================

    /// Turn a task into a recurring template with the given rule and compute
    /// its first next-occurrence pointer (anchored at the task's due date,
    /// or at `now` when it has none).
    pub fn setup_recurrence(
        &self,
        task_id: &str,
        rule: RecurrenceRule,
        now: DateTime<Utc>,
    ) -> Result<Task, ServiceError> {
        validate_rule(&rule)?;

        let mut task = self.store.get(task_id)?;
        task.recurrence = rule;
        task.is_recurring_template = true;
        let base = task.due_date.unwrap_or(now);
        task.next_occurrence = next_occurrence(&task.recurrence, base, now);
        task.updated_at = now;
        self.store.update(&task)?;

        info!(
            "recurrence enabled for task {} ({} every {})",
            task.id, task.recurrence.kind, task.recurrence.interval
        );
        Ok(task)
    }

    /// Stop a template from recurring. Already-spawned instances are
    /// untouched; they are ordinary tasks.
    pub fn stop_recurrence(&self, task_id: &str, now: DateTime<Utc>) -> Result<Task, ServiceError> {
        let mut task = self.store.get(task_id)?;
        task.recurrence = RecurrenceRule::default();
        task.next_occurrence = None;
        task.is_recurring_template = false;
        task.updated_at = now;
        self.store.update(&task)?;

        info!("recurrence stopped for task {}", task.id);
        Ok(task)
    }

    // =======================================================================
    // Template expansion
    // =======================================================================

    /// Spawn the next instance of a recurring template, or `Ok(None)` when
    /// there is nothing to spawn: the rule is unset, the recurrence has
    /// passed its end date, or no occurrence is computable.
    ///
    /// The instance's due date is the template's persisted next-occurrence
    /// pointer when that still lies in the future; a stale pointer (missed
    /// sweeps, downtime) is caught up through the calculator instead, which
    /// skips missed occurrences rather than backfilling them. After the
    /// instance is persisted the pointer is recomputed from the INSTANCE's
    /// due date, so consecutive expansions always advance to a later
    /// occurrence instead of regenerating the same one.
    pub fn expand_template(
        &self,
        template: &Task,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, ServiceError> {
        if !template.is_recurring() {
            debug!("task {} is not a recurring template, nothing to expand", template.id);
            return Ok(None);
        }

        if let Some(end) = template.recurrence.end_date {
            if now > end {
                debug!("recurrence for task {} ended at {end}, nothing to expand", template.id);
                return Ok(None);
            }
        }

        let anchor = template
            .next_occurrence
            .or(template.due_date)
            .unwrap_or(now);
        let due = if anchor > now {
            anchor
        } else {
            match next_occurrence(&template.recurrence, anchor, now) {
                Some(due) => due,
                None => {
                    debug!("no computable occurrence for template {}", template.id);
                    return Ok(None);
                }
            }
        };

        let instance = Task {
            id: new_id(),
            title: template.title.clone(),
            description: template.description.clone(),
            status: TaskStatus::Todo,
            priority: template.priority,
            due_date: Some(due),
            estimated_minutes: template.estimated_minutes,
            reminder_minutes: template.reminder_minutes,
            notified: false,
            user_id: template.user_id.clone(),
            project_id: template.project_id.clone(),
            tags: template.tags.clone(),
            timer_enabled: template.timer_enabled,
            reactivable: template.reactivable,
            recurrence: RecurrenceRule::default(),
            next_occurrence: None,
            parent_task_id: Some(template.id.clone()),
            is_recurring_template: false,
            created_at: now,
            updated_at: now,
        };
        self.store.create(&instance)?;

        let mut template = template.clone();
        template.next_occurrence = next_occurrence(&template.recurrence, due, now);
        template.updated_at = now;
        self.store.save(&template)?;

        info!(
            "spawned task {} from template {} (due {due})",
            instance.id, template.id
        );
        Ok(Some(instance))
    }

    // =======================================================================
    // Sweeps
    // =======================================================================

    /// One recurrence sweep tick: expand every template whose next
    /// occurrence falls before `now` + the lookahead horizon. Per-template
    /// failures are logged and skipped; only the initial query can fail the
    /// tick. Returns the number of instances spawned.
    pub fn run_recurrence_sweep(&self, now: DateTime<Utc>) -> Result<u32, ServiceError> {
        let horizon = now + Duration::hours(RECURRENCE_LOOKAHEAD_HOURS);
        let templates = self.store.templates_due_within(horizon)?;
        debug!("recurrence sweep: {} templates due before {horizon}", templates.len());

        let mut spawned = 0u32;
        for template in templates {
            // Re-verify on the deserialized task; the SQL predicate is only
            // a prefilter over the indexed columns.
            match template.next_occurrence {
                Some(next) if next < horizon => {}
                _ => continue,
            }

            match self.expand_template(&template, now) {
                Ok(Some(_)) => spawned += 1,
                Ok(None) => {}
                Err(e) => error!("expanding template {} failed: {e}", template.id),
            }
        }
        Ok(spawned)
    }

    /// One due-date sweep tick: classify every not-done task that has a due
    /// date and emit whatever its window calls for. Tasks without an owner
    /// are skipped (there is nobody to notify). Per-task failures are
    /// logged and skipped.
    pub fn run_due_date_sweep(&self, now: DateTime<Utc>) -> Result<DueSweepStats, ServiceError> {
        let candidates = self.store.due_check_candidates(TaskStatus::Done)?;
        debug!("due-date sweep: {} candidate tasks", candidates.len());

        let mut stats = DueSweepStats::default();
        for task in candidates {
            let Some(user_id) = task.user_id.clone() else {
                continue;
            };
            let Some(state) = duewatch::classify(&task, now) else {
                continue;
            };

            let outcome = match state {
                DueState::ReminderDue if !task.notified => {
                    self.send_reminder(&task, &user_id, now).map(|sent| {
                        if sent {
                            stats.reminders += 1;
                        }
                    })
                }
                DueState::DeadlineDue => self.send_deadline(&task, &user_id, now).map(|sent| {
                    if sent {
                        stats.deadlines += 1;
                    }
                }),
                DueState::Overdue => self.send_overdue(&task, &user_id, now).map(|sent| {
                    if sent {
                        stats.overdue += 1;
                    }
                }),
                _ => Ok(()),
            };
            if let Err(e) = outcome {
                error!("due-date check for task {} failed: {e}", task.id);
            }
        }
        Ok(stats)
    }

    /// Emit the reminder and flip the one-way latch. The latch is persisted
    /// even when the sink suppressed the emission; it is what guarantees at
    /// most one reminder per task lifetime.
    fn send_reminder(
        &self,
        task: &Task,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let due = match task.due_date {
            Some(d) => d,
            None => return Ok(false),
        };
        let minutes_left = (due - now).num_minutes();
        let body = format!("\"{}\" is due in {minutes_left} minutes.", task.title);
        let accepted = self
            .notifier
            .notify(user_id, task, "Task due soon", &body, NotificationKind::Reminder, now)?
            .is_some();

        let mut latched = task.clone();
        latched.notified = true;
        latched.updated_at = now;
        self.store.save(&latched)?;
        Ok(accepted)
    }

    fn send_deadline(
        &self,
        task: &Task,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let body = format!("\"{}\" has reached its due date.", task.title);
        Ok(self
            .notifier
            .notify(user_id, task, "Task due now", &body, NotificationKind::Deadline, now)?
            .is_some())
    }

    fn send_overdue(
        &self,
        task: &Task,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let due = match task.due_date {
            Some(d) => d,
            None => return Ok(false),
        };
        let late = now - due;
        let body = if late.num_hours() >= 1 {
            format!("\"{}\" is overdue by {} hours.", task.title, late.num_hours())
        } else {
            format!("\"{}\" is overdue by {} minutes.", task.title, late.num_minutes())
        };
        Ok(self
            .notifier
            .notify(user_id, task, "Task overdue", &body, NotificationKind::Overdue, now)?
            .is_some())
    }
}

fn validate_rule(rule: &RecurrenceRule) -> Result<(), ServiceError> {
    if rule.kind == RecurrenceKind::None {
        return Err(ServiceError::Validation(
            "recurrence kind must be set; use stop_recurrence to clear a rule".into(),
        ));
    }
    if let Some(day) = rule.day_of_month {
        if !(1..=31).contains(&day) {
            return Err(ServiceError::Validation(format!(
                "day_of_month {day} is out of range 1-31"
            )));
        }
    }
    Ok(())
}
