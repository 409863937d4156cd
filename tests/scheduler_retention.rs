use chrono::{Days, Utc};
use meremail::store::Store;

async fn open_store(dir: &std::path::Path) -> Store {
    Store::open(&dir.join("meremail.db")).await.unwrap()
}

#[tokio::test]
async fn aged_threads_in_trash_or_junk_are_swept_and_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;

    let (alice, _) = store.get_or_create_contact("alice@example.com", None).await.unwrap();

    let old = store.create_thread("old thread", alice.id, "trash").await.unwrap();
    let recent = store.create_thread("recent thread", alice.id, "trash").await.unwrap();
    let kept_folder = store.create_thread("inbox thread", alice.id, "inbox").await.unwrap();

    // Backdate `old`'s creation by rewriting created_at directly, since
    // Store has no public "insert with an arbitrary timestamp" surface.
    sqlx::query("UPDATE threads SET created_at = ?1 WHERE id = ?2")
        .bind((Utc::now() - Days::new(60)).to_rfc3339())
        .bind(old.id)
        .execute(store.pool())
        .await
        .unwrap();

    let cutoff = Utc::now().checked_sub_days(Days::new(30)).unwrap();
    let aged = store
        .list_aged_thread_ids_in_folders(&["trash", "junk"], cutoff)
        .await
        .unwrap();

    assert_eq!(aged, vec![old.id]);
    assert!(!aged.contains(&recent.id));
    assert!(!aged.contains(&kept_folder.id));

    for id in &aged {
        store.delete_thread(*id).await.unwrap();
    }
    assert!(store.get_thread(old.id).await.is_err());
    assert!(store.get_thread(recent.id).await.is_ok());
}

#[tokio::test]
async fn scheduler_task_runs_at_most_once_per_calendar_day() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;

    let today = Utc::now().date_naive().to_string();
    assert_eq!(store.scheduler_last_run("daily_backup").await.unwrap(), None);

    store.scheduler_set_last_run("daily_backup", &today).await.unwrap();
    assert_eq!(
        store.scheduler_last_run("daily_backup").await.unwrap().as_deref(),
        Some(today.as_str())
    );

    // A second write for the same day is idempotent.
    store.scheduler_set_last_run("daily_backup", &today).await.unwrap();
    assert_eq!(
        store.scheduler_last_run("daily_backup").await.unwrap().as_deref(),
        Some(today.as_str())
    );
}
