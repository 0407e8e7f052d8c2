use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
///
/// ```text
/// TODO → IN_PROGRESS → DONE
/// ```
///
/// DONE is terminal for scheduling: done tasks get no reminders, no deadline
/// or overdue notifications, and recurring templates are never DONE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "TODO",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "TODO" => Some(Self::Todo),
            "IN_PROGRESS" => Some(Self::InProgress),
            "DONE" => Some(Self::Done),
            _ => None,
        }
    }

    /// Whether the task has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TaskPriority
// ---------------------------------------------------------------------------

/// Task priority, carried from template to spawned instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_priority() -> TaskPriority {
    TaskPriority::Medium
}

// ---------------------------------------------------------------------------
// RecurrenceKind / Weekday
// ---------------------------------------------------------------------------

/// How often a recurring template spawns instances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceKind {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RecurrenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
            Self::Yearly => "YEARLY",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(Self::None),
            "DAILY" => Some(Self::Daily),
            "WEEKLY" => Some(Self::Weekly),
            "MONTHLY" => Some(Self::Monthly),
            "YEARLY" => Some(Self::Yearly),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecurrenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Day of week for WEEKLY rules. Wire form is the uppercase English name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monday => "MONDAY",
            Self::Tuesday => "TUESDAY",
            Self::Wednesday => "WEDNESDAY",
            Self::Thursday => "THURSDAY",
            Self::Friday => "FRIDAY",
            Self::Saturday => "SATURDAY",
            Self::Sunday => "SUNDAY",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "MONDAY" => Some(Self::Monday),
            "TUESDAY" => Some(Self::Tuesday),
            "WEDNESDAY" => Some(Self::Wednesday),
            "THURSDAY" => Some(Self::Thursday),
            "FRIDAY" => Some(Self::Friday),
            "SATURDAY" => Some(Self::Saturday),
            "SUNDAY" => Some(Self::Sunday),
            _ => None,
        }
    }

    /// Parse a comma-separated weekday list ("MONDAY, WEDNESDAY,FRIDAY").
    /// Tokens are trimmed; unknown names are ignored.
    pub fn parse_set(s: &str) -> Vec<Weekday> {
        s.split(',')
            .filter_map(|tok| Weekday::from_str(tok.trim()))
            .collect()
    }

    pub fn to_chrono(self) -> chrono::Weekday {
        match self {
            Self::Monday => chrono::Weekday::Mon,
            Self::Tuesday => chrono::Weekday::Tue,
            Self::Wednesday => chrono::Weekday::Wed,
            Self::Thursday => chrono::Weekday::Thu,
            Self::Friday => chrono::Weekday::Fri,
            Self::Saturday => chrono::Weekday::Sat,
            Self::Sunday => chrono::Weekday::Sun,
        }
    }
}

impl std::fmt::Display for Weekday {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialize a weekday set as its comma-separated wire form.
mod weekday_csv {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Weekday;

    pub fn serialize<S: Serializer>(days: &[Weekday], ser: S) -> Result<S::Ok, S::Error> {
        let joined = days
            .iter()
            .map(|d| d.as_str())
            .collect::<Vec<_>>()
            .join(",");
        ser.serialize_str(&joined)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<Weekday>, D::Error> {
        let s = String::deserialize(de)?;
        Ok(Weekday::parse_set(&s))
    }
}

// ---------------------------------------------------------------------------
// RecurrenceRule
// ---------------------------------------------------------------------------

/// The recurrence settings of a template task.
///
/// `end_date` is the inclusive last instant any occurrence may start; it is
/// enforced by the expander, not by occurrence arithmetic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    #[serde(default)]
    pub kind: RecurrenceKind,

    /// Step between occurrences, in units of `kind`. 0 is treated as 1.
    #[serde(default = "default_interval")]
    pub interval: u32,

    /// WEEKLY only: which weekdays qualify. Empty means plain week stepping.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "weekday_csv")]
    pub weekdays: Vec<Weekday>,

    /// MONTHLY only: target day of month (1..=31), clamped to month length.
    /// Unset means the base date's day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

fn default_interval() -> u32 {
    1
}

impl Default for RecurrenceRule {
    fn default() -> Self {
        Self {
            kind: RecurrenceKind::None,
            interval: default_interval(),
            weekdays: Vec::new(),
            day_of_month: None,
            end_date: None,
        }
    }
}

impl RecurrenceRule {
    fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A task as seen by the scheduling core.
///
/// Two roles share this shape. A recurring TEMPLATE (`is_recurring_template`)
/// is never worked on directly; it carries the rule and `next_occurrence`,
/// and the recurrence sweep stamps out instances from it. An INSTANCE is a
/// plain task, optionally pointing back at its template via `parent_task_id`
/// (a weak reference: lookup only, no lifecycle coupling).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    // --- content ---
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    // --- state ---
    pub status: TaskStatus,
    #[serde(default = "default_priority")]
    pub priority: TaskPriority,

    // --- scheduling ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    /// Estimated effort in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<u32>,
    /// How long before the due date the reminder window opens.
    #[serde(default = "default_reminder_minutes")]
    pub reminder_minutes: u32,
    /// One-way latch: set once the reminder for this task has been sent.
    #[serde(default)]
    pub notified: bool,

    // --- ownership ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    // --- behavior flags ---
    #[serde(default = "default_true")]
    pub timer_enabled: bool,
    #[serde(default)]
    pub reactivable: bool,

    // --- recurrence ---
    #[serde(default, skip_serializing_if = "RecurrenceRule::is_default")]
    pub recurrence: RecurrenceRule,
    /// Templates only: when the next instance should start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_occurrence: Option<DateTime<Utc>>,
    /// Instances only: id of the template that spawned this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub is_recurring_template: bool,

    // --- timestamps ---
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_reminder_minutes() -> u32 {
    15
}

fn default_true() -> bool {
    true
}

impl Task {
    /// Whether this task is a live recurring template.
    pub fn is_recurring(&self) -> bool {
        self.is_recurring_template && self.recurrence.kind != RecurrenceKind::None
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// Kind of a scheduling notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Reminder,
    Deadline,
    Overdue,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reminder => "REMINDER",
            Self::Deadline => "DEADLINE",
            Self::Overdue => "OVERDUE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "REMINDER" => Some(Self::Reminder),
            "DEADLINE" => Some(Self::Deadline),
            "OVERDUE" => Some(Self::Overdue),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored notification record. Delivery channels are out of scope; this
/// module persists the record and leaves presentation to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
