use std::sync::Arc;

use chrono::{DateTime, Utc};
use chime_core::ServiceError;
use chime_sql::{Row, SQLStore, Value};

use crate::model::{Task, TaskStatus};

/// SQL schema for the tasks table.
///
/// The `data` column holds the full task document; the scalar columns are
/// rewritten on every save and exist only for the sweep queries below.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id              TEXT PRIMARY KEY,
    data            TEXT NOT NULL,
    status          TEXT NOT NULL,
    user_id         TEXT,
    due_date        TEXT,
    next_occurrence TEXT,
    is_template     INTEGER NOT NULL,
    parent_id       TEXT,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_task_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_task_due ON tasks(due_date);
CREATE INDEX IF NOT EXISTS idx_task_template ON tasks(is_template, next_occurrence);
CREATE INDEX IF NOT EXISTS idx_task_parent ON tasks(parent_id);
";

/// Persistent storage for tasks, backed by SQLStore (SQLite).
pub struct TaskStore {
    db: Arc<dyn SQLStore>,
}

impl TaskStore {
    /// Create a new TaskStore and initialise the schema.
    pub fn new(db: Arc<dyn SQLStore>) -> Result<Self, ServiceError> {
        db.exec_batch(SCHEMA)
            .map_err(|e| ServiceError::Storage(format!("task schema init: {e}")))?;
        Ok(Self { db })
    }

    // -----------------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------------

    /// Insert a new task.
    pub fn create(&self, task: &Task) -> Result<(), ServiceError> {
        let data =
            serde_json::to_string(task).map_err(|e| ServiceError::Internal(e.to_string()))?;

        self.db
            .exec(
                "INSERT INTO tasks (id, data, status, user_id, due_date, next_occurrence, \
                 is_template, parent_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                &[
                    Value::Text(task.id.clone()),
                    Value::Text(data),
                    Value::Text(task.status.as_str().to_string()),
                    opt_text(&task.user_id),
                    opt_time(&task.due_date),
                    opt_time(&task.next_occurrence),
                    Value::Integer(i64::from(task.is_recurring_template)),
                    opt_text(&task.parent_task_id),
                    Value::Text(task.created_at.to_rfc3339()),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Get a task by ID.
    pub fn get(&self, id: &str) -> Result<Task, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM tasks WHERE id = ?1",
                &[Value::Text(id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let row = rows
            .first()
            .ok_or_else(|| ServiceError::NotFound(format!("task {id}")))?;

        row_to_task(row)
    }

    /// Update a task (full replacement of the data column + indexed columns).
    pub fn update(&self, task: &Task) -> Result<(), ServiceError> {
        let data =
            serde_json::to_string(task).map_err(|e| ServiceError::Internal(e.to_string()))?;

        let affected = self
            .db
            .exec(
                "UPDATE tasks SET data = ?1, status = ?2, user_id = ?3, due_date = ?4, \
                 next_occurrence = ?5, is_template = ?6, parent_id = ?7 WHERE id = ?8",
                &[
                    Value::Text(data),
                    Value::Text(task.status.as_str().to_string()),
                    opt_text(&task.user_id),
                    opt_time(&task.due_date),
                    opt_time(&task.next_occurrence),
                    Value::Integer(i64::from(task.is_recurring_template)),
                    opt_text(&task.parent_task_id),
                    Value::Text(task.id.clone()),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        if affected == 0 {
            return Err(ServiceError::NotFound(format!("task {}", task.id)));
        }
        Ok(())
    }

    /// Update-or-insert. The sweeps go through this so a task deleted midway
    /// through a tick does not abort the whole pass.
    pub fn save(&self, task: &Task) -> Result<(), ServiceError> {
        match self.update(task) {
            Err(ServiceError::NotFound(_)) => self.create(task),
            other => other,
        }
    }

    // -----------------------------------------------------------------------
    // Sweep queries
    // -----------------------------------------------------------------------

    /// Tasks with a due date whose status is not `exclude`. Candidates for
    /// the due-date sweep; the final window decision is made on the
    /// deserialized task, not on the columns.
    pub fn due_check_candidates(&self, exclude: TaskStatus) -> Result<Vec<Task>, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM tasks WHERE due_date IS NOT NULL AND status != ?1",
                &[Value::Text(exclude.as_str().to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        rows.iter().map(row_to_task).collect()
    }

    /// Recurring templates whose next occurrence falls before `horizon`.
    pub fn templates_due_within(&self, horizon: DateTime<Utc>) -> Result<Vec<Task>, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM tasks WHERE is_template = 1 \
                 AND next_occurrence IS NOT NULL AND next_occurrence < ?1",
                &[Value::Text(horizon.to_rfc3339())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        rows.iter().map(row_to_task).collect()
    }

    /// Instances spawned from a template, oldest first.
    pub fn instances_of(&self, template_id: &str) -> Result<Vec<Task>, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM tasks WHERE parent_id = ?1 ORDER BY created_at ASC",
                &[Value::Text(template_id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        rows.iter().map(row_to_task).collect()
    }
}

fn opt_text(v: &Option<String>) -> Value {
    match v {
        Some(s) => Value::Text(s.clone()),
        None => Value::Null,
    }
}

fn opt_time(v: &Option<DateTime<Utc>>) -> Value {
    match v {
        Some(t) => Value::Text(t.to_rfc3339()),
        None => Value::Null,
    }
}

/// Deserialize a Task from a row's `data` JSON column.
fn row_to_task(row: &Row) -> Result<Task, ServiceError> {
    let json = row
        .get_str("data")
        .ok_or_else(|| ServiceError::Storage("missing data column".into()))?;
    serde_json::from_str(json).map_err(|e| ServiceError::Storage(format!("bad task json: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use chime_sql::SqliteStore;

    use super::*;
    use crate::model::{RecurrenceKind, RecurrenceRule, TaskPriority};

    fn test_store() -> TaskStore {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        TaskStore::new(db).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap()
    }

    fn make_task(id: &str, status: TaskStatus) -> Task {
        Task {
            id: id.into(),
            title: format!("task {id}"),
            description: None,
            status,
            priority: TaskPriority::Medium,
            due_date: None,
            estimated_minutes: None,
            reminder_minutes: 15,
            notified: false,
            user_id: Some("u1".into()),
            project_id: None,
            tags: Vec::new(),
            timer_enabled: true,
            reactivable: false,
            recurrence: RecurrenceRule::default(),
            next_occurrence: None,
            parent_task_id: None,
            is_recurring_template: false,
            created_at: t0(),
            updated_at: t0(),
        }
    }

    #[test]
    fn create_and_get() {
        let store = test_store();
        let task = make_task("t1", TaskStatus::Todo);
        store.create(&task).unwrap();

        let got = store.get("t1").unwrap();
        assert_eq!(got.id, "t1");
        assert_eq!(got.status, TaskStatus::Todo);
        assert_eq!(got.title, "task t1");
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = test_store();
        assert!(matches!(store.get("nope"), Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn update_replaces_document_and_columns() {
        let store = test_store();
        let mut task = make_task("t1", TaskStatus::Todo);
        store.create(&task).unwrap();

        task.status = TaskStatus::Done;
        task.notified = true;
        store.update(&task).unwrap();

        let got = store.get("t1").unwrap();
        assert_eq!(got.status, TaskStatus::Done);
        assert!(got.notified);

        // Status column was rewritten too: DONE is excluded below.
        let candidates = store.due_check_candidates(TaskStatus::Done).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn update_missing_is_not_found() {
        let store = test_store();
        let task = make_task("ghost", TaskStatus::Todo);
        assert!(matches!(store.update(&task), Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn save_inserts_then_updates() {
        let store = test_store();
        let mut task = make_task("t1", TaskStatus::Todo);

        store.save(&task).unwrap();
        assert_eq!(store.get("t1").unwrap().status, TaskStatus::Todo);

        task.status = TaskStatus::InProgress;
        store.save(&task).unwrap();
        assert_eq!(store.get("t1").unwrap().status, TaskStatus::InProgress);
    }

    #[test]
    fn due_check_candidates_filters() {
        let store = test_store();

        let mut due_todo = make_task("due-todo", TaskStatus::Todo);
        due_todo.due_date = Some(t0());
        store.create(&due_todo).unwrap();

        let mut due_done = make_task("due-done", TaskStatus::Done);
        due_done.due_date = Some(t0());
        store.create(&due_done).unwrap();

        store.create(&make_task("no-due", TaskStatus::Todo)).unwrap();

        let got = store.due_check_candidates(TaskStatus::Done).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, "due-todo");
    }

    #[test]
    fn templates_due_within_horizon() {
        let store = test_store();
        let horizon = t0() + Duration::hours(24);

        let mut soon = make_task("soon", TaskStatus::Todo);
        soon.is_recurring_template = true;
        soon.recurrence.kind = RecurrenceKind::Daily;
        soon.next_occurrence = Some(t0() + Duration::hours(3));
        store.create(&soon).unwrap();

        let mut later = make_task("later", TaskStatus::Todo);
        later.is_recurring_template = true;
        later.recurrence.kind = RecurrenceKind::Daily;
        later.next_occurrence = Some(horizon + Duration::hours(1));
        store.create(&later).unwrap();

        let mut unset = make_task("unset", TaskStatus::Todo);
        unset.is_recurring_template = true;
        unset.recurrence.kind = RecurrenceKind::Daily;
        store.create(&unset).unwrap();

        // Not a template, even though its next_occurrence qualifies.
        let mut plain = make_task("plain", TaskStatus::Todo);
        plain.next_occurrence = Some(t0() + Duration::hours(3));
        store.create(&plain).unwrap();

        let got = store.templates_due_within(horizon).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, "soon");
    }

    #[test]
    fn instances_of_orders_oldest_first() {
        let store = test_store();

        let mut a = make_task("a", TaskStatus::Todo);
        a.parent_task_id = Some("tpl".into());
        a.created_at = t0();
        store.create(&a).unwrap();

        let mut b = make_task("b", TaskStatus::Todo);
        b.parent_task_id = Some("tpl".into());
        b.created_at = t0() - Duration::days(1);
        store.create(&b).unwrap();

        store.create(&make_task("other", TaskStatus::Todo)).unwrap();

        let got = store.instances_of("tpl").unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].id, "b");
        assert_eq!(got[1].id, "a");
    }
}
