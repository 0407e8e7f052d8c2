pub mod duewatch;
pub mod engine;
pub mod model;
pub mod notify;
pub mod recurrence;
pub mod store;
pub mod worker;

use std::sync::Arc;

use chime_sql::SQLStore;

use engine::ScheduleEngine;
use notify::NotificationStore;
use store::TaskStore;
use worker::SweepConfig;

pub use engine::DueSweepStats;
pub use model::{
    Notification, NotificationKind, RecurrenceKind, RecurrenceRule, Task, TaskPriority,
    TaskStatus, Weekday,
};

/// The Schedule module: recurring tasks and due-date notifications.
///
/// Embed this in a business service to get recurring-template expansion,
/// reminder / deadline / overdue notifications, and the background sweepers
/// that drive both.
pub struct ScheduleModule {
    engine: Arc<ScheduleEngine>,
    worker_cancel: tokio_util::sync::CancellationToken,
}

impl ScheduleModule {
    /// Create the schedule module, initialise storage, and start the sweepers.
    pub fn new(db: Arc<dyn SQLStore>) -> Result<Self, chime_core::ServiceError> {
        Self::with_config(db, SweepConfig::default())
    }

    /// Create with explicit sweep configuration.
    pub fn with_config(
        db: Arc<dyn SQLStore>,
        sweep_config: SweepConfig,
    ) -> Result<Self, chime_core::ServiceError> {
        let store = Arc::new(TaskStore::new(Arc::clone(&db))?);
        let notifier = Arc::new(NotificationStore::new(db)?);
        let engine = Arc::new(ScheduleEngine::new(store, notifier));
        let cancel = worker::start(Arc::clone(&engine), sweep_config);

        Ok(Self {
            engine,
            worker_cancel: cancel,
        })
    }

    /// Get a reference to the ScheduleEngine for programmatic use.
    pub fn engine(&self) -> &Arc<ScheduleEngine> {
        &self.engine
    }

    /// Stop the background sweepers.
    pub fn shutdown(&self) {
        self.worker_cancel.cancel();
    }
}
