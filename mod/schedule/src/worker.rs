use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::ScheduleEngine;

/// Configuration for the background sweepers.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often to check tasks against their due-date windows (seconds).
    pub due_check_interval: u64,
    /// How often to expand recurring templates (seconds).
    pub recurrence_interval: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            due_check_interval: 60,
            recurrence_interval: 3600,
        }
    }
}

/// Start the background sweep loops.
///
/// - **Due-date sweeper**: emits reminder / deadline / overdue notifications
///   for tasks approaching or past their due date.
/// - **Recurrence sweeper**: materializes instances of recurring templates
///   whose next occurrence falls inside the lookahead horizon.
///
/// Returns a CancellationToken that stops the sweepers when cancelled.
pub fn start(engine: Arc<ScheduleEngine>, config: SweepConfig) -> CancellationToken {
    let cancel = CancellationToken::new();

    // --- Due-date sweeper ---
    {
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        let interval = Duration::from_secs(config.due_check_interval);

        tokio::spawn(async move {
            info!("due-date sweeper started (interval={interval:?})");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("due-date sweeper stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        debug!("due-date sweep");
                        match engine.run_due_date_sweep(Utc::now()) {
                            Ok(stats) if stats.total() == 0 => {}
                            Ok(stats) => info!(
                                "due-date sweep: {} reminders, {} deadlines, {} overdue",
                                stats.reminders, stats.deadlines, stats.overdue
                            ),
                            Err(e) => error!("due-date sweep error: {e}"),
                        }
                    }
                }
            }
        });
    }

    // --- Recurrence sweeper ---
    {
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        let interval = Duration::from_secs(config.recurrence_interval);

        tokio::spawn(async move {
            info!("recurrence sweeper started (interval={interval:?})");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("recurrence sweeper stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        debug!("recurrence sweep");
                        match engine.run_recurrence_sweep(Utc::now()) {
                            Ok(0) => {}
                            Ok(n) => info!("recurrence sweep: spawned {n} tasks"),
                            Err(e) => error!("recurrence sweep error: {e}"),
                        }
                    }
                }
            }
        });
    }

    cancel
}
