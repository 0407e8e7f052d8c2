use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chime_core::{ServiceError, new_id};
use chime_sql::{Row, SQLStore, Value};
use tracing::debug;

use crate::model::{Notification, NotificationKind, Task};

/// Suppression window for repeated REMINDER and DEADLINE notifications.
const REPEAT_WINDOW_MINUTES: i64 = 5;

/// Suppression window for OVERDUE notifications. Together with the sweep
/// this makes overdue nagging repeat hourly while the task stays open.
const OVERDUE_WINDOW_MINUTES: i64 = 60;

/// Cap on stored notifications per user. Already-read records are evicted
/// first, then the oldest unread.
const MAX_PER_USER: i64 = 50;

/// Where scheduling notifications go.
///
/// The sink owns suppression policy; callers emit unconditionally and get
/// `Ok(None)` back when a policy swallowed the emission. Delivery channels
/// are out of scope: implementations persist records for clients to fetch.
pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        user_id: &str,
        task: &Task,
        title: &str,
        body: &str,
        kind: NotificationKind,
        now: DateTime<Utc>,
    ) -> Result<Option<Notification>, ServiceError>;
}

/// SQL schema for the notifications table.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS notifications (
    id          TEXT PRIMARY KEY,
    data        TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    task_id     TEXT,
    kind        TEXT NOT NULL,
    is_read     INTEGER NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notif_user ON notifications(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_notif_task ON notifications(task_id, kind, created_at);
";

/// Persistent notification sink, backed by SQLStore (SQLite).
pub struct NotificationStore {
    db: Arc<dyn SQLStore>,
}

impl NotificationStore {
    /// Create a new NotificationStore and initialise the schema.
    pub fn new(db: Arc<dyn SQLStore>) -> Result<Self, ServiceError> {
        db.exec_batch(SCHEMA)
            .map_err(|e| ServiceError::Storage(format!("notification schema init: {e}")))?;
        Ok(Self { db })
    }

    /// Insert a notification record.
    pub fn create(&self, n: &Notification) -> Result<(), ServiceError> {
        let data = serde_json::to_string(n).map_err(|e| ServiceError::Internal(e.to_string()))?;

        self.db
            .exec(
                "INSERT INTO notifications (id, data, user_id, task_id, kind, is_read, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                &[
                    Value::Text(n.id.clone()),
                    Value::Text(data),
                    Value::Text(n.user_id.clone()),
                    match &n.task_id {
                        Some(t) => Value::Text(t.clone()),
                        None => Value::Null,
                    },
                    Value::Text(n.kind.as_str().to_string()),
                    Value::Integer(i64::from(n.is_read)),
                    Value::Text(n.created_at.to_rfc3339()),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Whether a notification of `kind` for `task_id` was recorded after
    /// `since` (strictly).
    pub fn exists_recent(
        &self,
        task_id: &str,
        kind: NotificationKind,
        since: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT COUNT(*) as cnt FROM notifications \
                 WHERE task_id = ?1 AND kind = ?2 AND created_at > ?3",
                &[
                    Value::Text(task_id.to_string()),
                    Value::Text(kind.as_str().to_string()),
                    Value::Text(since.to_rfc3339()),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        Ok(rows.first().and_then(|r| r.get_i64("cnt")).unwrap_or(0) > 0)
    }

    /// All notifications for a user, newest first.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<Notification>, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM notifications WHERE user_id = ?1 ORDER BY created_at DESC",
                &[Value::Text(user_id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        rows.iter().map(row_to_notification).collect()
    }

    /// Number of stored notifications for a user.
    pub fn count_for_user(&self, user_id: &str) -> Result<i64, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT COUNT(*) as cnt FROM notifications WHERE user_id = ?1",
                &[Value::Text(user_id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        Ok(rows.first().and_then(|r| r.get_i64("cnt")).unwrap_or(0))
    }

    /// Evict the user's overflow beyond the per-user cap: read records go
    /// first (any age), then the oldest unread. Returns how many were
    /// deleted.
    pub fn prune_excess(&self, user_id: &str) -> Result<u64, ServiceError> {
        let overflow = self.count_for_user(user_id)? - MAX_PER_USER;
        if overflow <= 0 {
            return Ok(0);
        }

        let rows = self
            .db
            .query(
                "SELECT id FROM notifications WHERE user_id = ?1 \
                 ORDER BY is_read DESC, created_at ASC LIMIT ?2",
                &[Value::Text(user_id.to_string()), Value::Integer(overflow)],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let mut deleted = 0;
        for row in &rows {
            if let Some(id) = row.get_str("id") {
                deleted += self
                    .db
                    .exec(
                        "DELETE FROM notifications WHERE id = ?1",
                        &[Value::Text(id.to_string())],
                    )
                    .map_err(|e| ServiceError::Storage(e.to_string()))?;
            }
        }
        Ok(deleted)
    }
}

impl Notifier for NotificationStore {
    fn notify(
        &self,
        user_id: &str,
        task: &Task,
        title: &str,
        body: &str,
        kind: NotificationKind,
        now: DateTime<Utc>,
    ) -> Result<Option<Notification>, ServiceError> {
        let window = match kind {
            NotificationKind::Reminder | NotificationKind::Deadline => REPEAT_WINDOW_MINUTES,
            NotificationKind::Overdue => OVERDUE_WINDOW_MINUTES,
        };
        if self.exists_recent(&task.id, kind, now - Duration::minutes(window))? {
            debug!("{kind} for task {} suppressed (within {window}m window)", task.id);
            return Ok(None);
        }

        let n = Notification {
            id: new_id(),
            user_id: user_id.to_string(),
            task_id: Some(task.id.clone()),
            title: title.to_string(),
            body: body.to_string(),
            kind,
            is_read: false,
            read_at: None,
            created_at: now,
        };
        self.create(&n)?;

        let pruned = self.prune_excess(user_id)?;
        if pruned > 0 {
            debug!("pruned {pruned} old notifications for user {user_id}");
        }
        Ok(Some(n))
    }
}

/// Deserialize a Notification from a row's `data` JSON column.
fn row_to_notification(row: &Row) -> Result<Notification, ServiceError> {
    let json = row
        .get_str("data")
        .ok_or_else(|| ServiceError::Storage("missing data column".into()))?;
    serde_json::from_str(json)
        .map_err(|e| ServiceError::Storage(format!("bad notification json: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chime_sql::SqliteStore;

    use super::*;
    use crate::model::{RecurrenceRule, TaskPriority, TaskStatus};

    fn test_sink() -> NotificationStore {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        NotificationStore::new(db).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
    }

    fn make_task(id: &str) -> Task {
        Task {
            id: id.into(),
            title: format!("task {id}"),
            description: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            due_date: Some(t0()),
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

    fn stored(id: &str, user: &str, is_read: bool, at: DateTime<Utc>) -> Notification {
        Notification {
            id: id.into(),
            user_id: user.into(),
            task_id: None,
            title: "t".into(),
            body: "b".into(),
            kind: NotificationKind::Reminder,
            is_read,
            read_at: None,
            created_at: at,
        }
    }

    #[test]
    fn notify_records_and_lists_newest_first() {
        let sink = test_sink();
        let task = make_task("t1");

        let n = sink
            .notify("u1", &task, "Task due soon", "due in 15 minutes", NotificationKind::Reminder, t0())
            .unwrap()
            .unwrap();
        assert_eq!(n.user_id, "u1");
        assert_eq!(n.task_id.as_deref(), Some("t1"));
        assert!(!n.is_read);

        let other = make_task("t2");
        sink.notify("u1", &other, "Task overdue", "overdue by 6 minutes", NotificationKind::Overdue, t0() + Duration::minutes(1))
            .unwrap()
            .unwrap();

        let list = sink.list_for_user("u1").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].task_id.as_deref(), Some("t2"));
        assert_eq!(list[1].task_id.as_deref(), Some("t1"));
    }

    #[test]
    fn reminder_window_suppresses_then_releases() {
        let sink = test_sink();
        let task = make_task("t1");
        let kind = NotificationKind::Reminder;

        assert!(sink.notify("u1", &task, "a", "b", kind, t0()).unwrap().is_some());
        // Within the 5 minute window: suppressed.
        let again = sink
            .notify("u1", &task, "a", "b", kind, t0() + Duration::minutes(4))
            .unwrap();
        assert!(again.is_none());
        // At exactly the window edge the prior record no longer counts.
        let released = sink
            .notify("u1", &task, "a", "b", kind, t0() + Duration::minutes(5))
            .unwrap();
        assert!(released.is_some());
    }

    #[test]
    fn overdue_window_is_an_hour() {
        let sink = test_sink();
        let task = make_task("t1");
        let kind = NotificationKind::Overdue;

        assert!(sink.notify("u1", &task, "a", "b", kind, t0()).unwrap().is_some());
        assert!(
            sink.notify("u1", &task, "a", "b", kind, t0() + Duration::minutes(59))
                .unwrap()
                .is_none()
        );
        assert!(
            sink.notify("u1", &task, "a", "b", kind, t0() + Duration::minutes(60))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn windows_are_per_task_and_per_kind() {
        let sink = test_sink();
        let t1 = make_task("t1");
        let t2 = make_task("t2");

        assert!(sink.notify("u1", &t1, "a", "b", NotificationKind::Reminder, t0()).unwrap().is_some());
        // Different kind, same task: not suppressed.
        assert!(sink.notify("u1", &t1, "a", "b", NotificationKind::Deadline, t0()).unwrap().is_some());
        // Same kind, different task: not suppressed.
        assert!(sink.notify("u1", &t2, "a", "b", NotificationKind::Reminder, t0()).unwrap().is_some());
    }

    #[test]
    fn cap_evicts_read_first_then_oldest() {
        let sink = test_sink();

        // 50 unread, oldest first; the 10th is read.
        for i in 0..50 {
            let mut n = stored(&format!("n{i:02}"), "u1", false, t0() + Duration::minutes(i));
            n.is_read = i == 10;
            sink.create(&n).unwrap();
        }
        assert_eq!(sink.count_for_user("u1").unwrap(), 50);

        // Emitting one more overflows the cap by one; the single read record
        // goes, not the oldest unread.
        let task = make_task("t-new");
        sink.notify("u1", &task, "a", "b", NotificationKind::Reminder, t0() + Duration::hours(2))
            .unwrap()
            .unwrap();

        assert_eq!(sink.count_for_user("u1").unwrap(), 50);
        let ids: Vec<String> = sink
            .list_for_user("u1")
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert!(!ids.contains(&"n10".to_string()));
        assert!(ids.contains(&"n00".to_string()));
    }

    #[test]
    fn cap_evicts_oldest_when_nothing_is_read() {
        let sink = test_sink();
        for i in 0..52 {
            sink.create(&stored(&format!("n{i:02}"), "u1", false, t0() + Duration::minutes(i)))
                .unwrap();
        }
        let deleted = sink.prune_excess("u1").unwrap();
        assert_eq!(deleted, 2);

        let ids: Vec<String> = sink
            .list_for_user("u1")
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids.len(), 50);
        assert!(!ids.contains(&"n00".to_string()));
        assert!(!ids.contains(&"n01".to_string()));
        assert!(ids.contains(&"n02".to_string()));
    }

    #[test]
    fn caps_are_per_user() {
        let sink = test_sink();
        for i in 0..52 {
            sink.create(&stored(&format!("a{i:02}"), "u1", false, t0() + Duration::minutes(i)))
                .unwrap();
        }
        sink.create(&stored("b00", "u2", false, t0())).unwrap();

        sink.prune_excess("u1").unwrap();
        assert_eq!(sink.count_for_user("u2").unwrap(), 1);
    }
}
