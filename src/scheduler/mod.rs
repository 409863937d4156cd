//! Daily scheduler (spec.md 4.G): fires on startup and hourly afterward,
//! runs each date-keyed task at most once per calendar day. Task state is
//! the `scheduler_state` table rather than the `daily-scheduler-state.json`
//! file this stack historically used elsewhere; a task failure is logged
//! and the stored date is left untouched so the task retries on the next
//! tick.

use std::time::Duration;

use chrono::{Days, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::AppResult;
use crate::store::Store;

const TICK: Duration = Duration::from_secs(60 * 60);
const BACKUP_RETENTION_DAYS: u64 = 7;
const TRASH_RETENTION_DAYS: u64 = 30;

const TASK_BACKUP: &str = "daily_backup";
const TASK_RETENTION: &str = "retention_sweep";

pub async fn run(config: Config, store: Store, mut stop: watch::Receiver<bool>) {
    run_due_tasks(&config, &store).await;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(TICK) => {}
            _ = stop.changed() => return,
        }
        if *stop.borrow() {
            return;
        }
        run_due_tasks(&config, &store).await;
    }
}

async fn run_due_tasks(config: &Config, store: &Store) {
    let today = Utc::now().date_naive().to_string();

    if store.scheduler_last_run(TASK_BACKUP).await.ok().flatten().as_deref() != Some(today.as_str()) {
        match run_backup(config, store).await {
            Ok(()) => {
                if let Err(e) = store.scheduler_set_last_run(TASK_BACKUP, &today).await {
                    warn!(error = %e, "failed to record backup task completion");
                }
            }
            Err(e) => warn!(error = %e, "daily backup task failed"),
        }
    }

    if store.scheduler_last_run(TASK_RETENTION).await.ok().flatten().as_deref() != Some(today.as_str()) {
        match run_retention_sweep(store).await {
            Ok(()) => {
                if let Err(e) = store.scheduler_set_last_run(TASK_RETENTION, &today).await {
                    warn!(error = %e, "failed to record retention task completion");
                }
            }
            Err(e) => warn!(error = %e, "retention sweep task failed"),
        }
    }
}

async fn run_backup(config: &Config, store: &Store) -> AppResult<()> {
    let dir = config.backups_dir();
    std::fs::create_dir_all(&dir).map_err(|e| {
        crate::errors::AppError::Storage(crate::errors::StorageError::new(
            crate::errors::StorageErrorKind::Io,
            e.to_string(),
        ))
    })?;

    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let dest = dir.join(format!("meremail-{stamp}.sqlite3"));
    store.vacuum_into(&dest).await?;
    info!(path = %dest.display(), "daily backup written");

    let cutoff = std::time::SystemTime::now() - Duration::from_secs(BACKUP_RETENTION_DAYS * 86_400);
    if let Ok(entries) = std::fs::read_dir(&dir) {
        for entry in entries.flatten() {
            let Ok(metadata) = entry.metadata() else { continue };
            let Ok(modified) = metadata.modified() else { continue };
            if modified < cutoff {
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    warn!(path = ?entry.path(), error = %e, "failed to prune old backup");
                }
            }
        }
    }
    Ok(())
}

async fn run_retention_sweep(store: &Store) -> AppResult<()> {
    let cutoff = Utc::now()
        .checked_sub_days(Days::new(TRASH_RETENTION_DAYS))
        .unwrap_or_else(Utc::now);
    let ids = store.list_aged_thread_ids_in_folders(&["trash", "junk"], cutoff).await?;
    let count = ids.len();
    for id in ids {
        store.delete_thread(id).await?;
    }
    info!(deleted = count, "retention sweep finished");
    Ok(())
}
