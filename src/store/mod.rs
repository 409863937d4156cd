pub mod fts;

use crate::errors::{AppError, AppResult, StorageError, StorageErrorKind};
use crate::rules::{ConditionGroup, RuleEvaluationContext};
use crate::types::{
    now, Attachment, Bucket, Contact, ContactRole, Message, MessageStatus, Rule, RuleActionType,
    RuleApplication, RuleApplicationStatus, Thread, ThreadContactRole,
};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
}

impl Store {
    pub async fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePool::connect(&url).await?;
        let store = Store {
            pool,
            path: db_path.to_path_buf(),
        };
        store.migrate().await?;
        store.recover_interrupted_rule_applications().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                name TEXT,
                is_me INTEGER NOT NULL DEFAULT 0,
                is_default_identity INTEGER NOT NULL DEFAULT 0,
                bucket TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS threads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject TEXT NOT NULL,
                creator_id INTEGER NOT NULL REFERENCES contacts(id),
                created_at TEXT NOT NULL,
                reply_later_at TEXT,
                set_aside_at TEXT,
                folder_id TEXT NOT NULL DEFAULT 'inbox',
                trashed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_threads_folder ON threads(folder_id);
            CREATE INDEX IF NOT EXISTS idx_threads_trashed ON threads(trashed_at);

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id INTEGER REFERENCES threads(id) ON DELETE CASCADE,
                sender_id INTEGER NOT NULL REFERENCES contacts(id),
                message_id TEXT UNIQUE,
                in_reply_to TEXT,
                references_json TEXT NOT NULL DEFAULT '[]',
                subject TEXT NOT NULL DEFAULT '',
                content_text TEXT NOT NULL DEFAULT '',
                content_html TEXT,
                headers_json TEXT NOT NULL DEFAULT '{}',
                sent_at TEXT,
                received_at TEXT NOT NULL,
                read_at TEXT,
                status TEXT NOT NULL,
                folder TEXT NOT NULL DEFAULT 'inbox',
                queued_at TEXT,
                send_attempts INTEGER NOT NULL DEFAULT 0,
                last_send_attempt_at TEXT,
                last_send_error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id);
            CREATE INDEX IF NOT EXISTS idx_messages_status ON messages(status);
            CREATE INDEX IF NOT EXISTS idx_messages_in_reply_to ON messages(in_reply_to);

            CREATE TABLE IF NOT EXISTS message_contacts (
                message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                contact_id INTEGER NOT NULL REFERENCES contacts(id),
                role TEXT NOT NULL,
                PRIMARY KEY (message_id, contact_id, role)
            );

            CREATE TABLE IF NOT EXISTS thread_contacts (
                thread_id INTEGER NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
                contact_id INTEGER NOT NULL REFERENCES contacts(id),
                role TEXT NOT NULL,
                PRIMARY KEY (thread_id, contact_id)
            );

            CREATE TABLE IF NOT EXISTS attachments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                filename TEXT NOT NULL,
                mime_type TEXT,
                size INTEGER,
                file_path TEXT NOT NULL,
                content_id TEXT,
                is_inline INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id);

            CREATE TABLE IF NOT EXISTS rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                conditions_json TEXT NOT NULL,
                action_type TEXT NOT NULL,
                action_config_json TEXT,
                folder_ids_json TEXT NOT NULL DEFAULT '[]',
                position INTEGER NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rule_applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_id INTEGER REFERENCES rules(id),
                status TEXT NOT NULL,
                total_count INTEGER NOT NULL DEFAULT 0,
                processed_count INTEGER NOT NULL DEFAULT 0,
                matched_count INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                started_at TEXT,
                completed_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS scheduler_state (
                task_key TEXT PRIMARY KEY,
                last_run_date TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        // FTS5 shadow index over subject/body, kept in sync via triggers so
        // callers never touch it directly (spec.md search is read-only).
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
                subject, content_text, content='messages', content_rowid='id'
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS messages_fts_ai AFTER INSERT ON messages BEGIN
                INSERT INTO messages_fts(rowid, subject, content_text)
                VALUES (new.id, new.subject, new.content_text);
            END;
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS messages_fts_ad AFTER DELETE ON messages BEGIN
                INSERT INTO messages_fts(messages_fts, rowid, subject, content_text)
                VALUES ('delete', old.id, old.subject, old.content_text);
            END;
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS messages_fts_au AFTER UPDATE ON messages BEGIN
                INSERT INTO messages_fts(messages_fts, rowid, subject, content_text)
                VALUES ('delete', old.id, old.subject, old.content_text);
                INSERT INTO messages_fts(rowid, subject, content_text)
                VALUES (new.id, new.subject, new.content_text);
            END;
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// A `running` RuleApplication row left behind by an unclean shutdown
    /// has no resume semantics; mark it failed so polling clients don't
    /// treat it as still live.
    async fn recover_interrupted_rule_applications(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE rule_applications
            SET status = 'failed', error = 'interrupted by restart', completed_at = ?1
            WHERE status = 'running';
            "#,
        )
        .bind(now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn vacuum_into(&self, dest: &Path) -> AppResult<()> {
        sqlx::query("VACUUM INTO ?1")
            .bind(dest.to_string_lossy().to_string())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Contacts
    // ---------------------------------------------------------------

    /// Creates a contact by email if absent; if present and `name` is
    /// given while the stored name is empty, promotes the stored name
    /// (spec.md 4.C recipient processing).
    pub async fn upsert_contact(&self, email: &str, name: Option<&str>) -> AppResult<Contact> {
        let email_norm = email.trim().to_lowercase();
        let existing = sqlx::query(
            "SELECT id, email, name, is_me, is_default_identity, bucket, created_at FROM contacts WHERE email = ?1",
        )
        .bind(&email_norm)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;

        if let Some(row) = existing {
            let stored_name: Option<String> = row.get(2);
            if stored_name.as_deref().unwrap_or("").is_empty() {
                if let Some(n) = name.filter(|n| !n.is_empty()) {
                    sqlx::query("UPDATE contacts SET name = ?1 WHERE id = ?2")
                        .bind(n)
                        .bind(row.get::<i64, _>(0))
                        .execute(&self.pool)
                        .await
                        .map_err(StorageError::from)?;
                }
            }
            return self.get_contact(row.get(0)).await;
        }

        let created_at = now();
        let id = sqlx::query(
            r#"
            INSERT INTO contacts (email, name, is_me, is_default_identity, bucket, created_at)
            VALUES (?1, ?2, 0, 0, NULL, ?3)
            "#,
        )
        .bind(&email_norm)
        .bind(name)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?
        .last_insert_rowid();

        self.get_contact(id).await
    }

    pub async fn get_contact(&self, id: i64) -> AppResult<Contact> {
        let row = sqlx::query(
            "SELECT id, email, name, is_me, is_default_identity, bucket, created_at FROM contacts WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?
        .ok_or_else(|| AppError::NotFound(format!("contact {id}")))?;
        Ok(row_to_contact(&row))
    }

    /// Like `upsert_contact`, but also reports whether the row was just
    /// created, so the importer can apply junk-quarantine-on-first-sighting.
    pub async fn get_or_create_contact(
        &self,
        email: &str,
        name: Option<&str>,
    ) -> AppResult<(Contact, bool)> {
        let already_existed = self.find_contact_by_email(email).await?.is_some();
        let contact = self.upsert_contact(email, name).await?;
        Ok((contact, !already_existed))
    }

    pub async fn find_contact_by_email(&self, email: &str) -> AppResult<Option<Contact>> {
        let email_norm = email.trim().to_lowercase();
        let row = sqlx::query(
            "SELECT id, email, name, is_me, is_default_identity, bucket, created_at FROM contacts WHERE email = ?1",
        )
        .bind(&email_norm)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(row.map(|r| row_to_contact(&r)))
    }

    pub async fn set_contact_bucket(&self, id: i64, bucket: Bucket) -> AppResult<()> {
        sqlx::query("UPDATE contacts SET bucket = ?1 WHERE id = ?2")
            .bind(bucket.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn set_contact_is_me(&self, id: i64, is_me: bool) -> AppResult<()> {
        sqlx::query("UPDATE contacts SET is_me = ?1 WHERE id = ?2")
            .bind(is_me)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// At most one contact may be the default identity; setting one clears
    /// any previous holder in the same transaction (spec.md 3 invariant).
    pub async fn set_default_identity(&self, id: i64) -> AppResult<()> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;
        sqlx::query("UPDATE contacts SET is_default_identity = 0")
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from)?;
        sqlx::query("UPDATE contacts SET is_default_identity = 1, is_me = 1 WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from)?;
        tx.commit().await.map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn list_contacts(&self) -> AppResult<Vec<Contact>> {
        let rows = sqlx::query(
            "SELECT id, email, name, is_me, is_default_identity, bucket, created_at FROM contacts ORDER BY email ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(rows.iter().map(row_to_contact).collect())
    }

    pub async fn default_identity(&self) -> AppResult<Option<Contact>> {
        let row = sqlx::query(
            "SELECT id, email, name, is_me, is_default_identity, bucket, created_at FROM contacts WHERE is_default_identity = 1 LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(row.map(|r| row_to_contact(&r)))
    }

    pub async fn all_contact_emails(&self) -> AppResult<Vec<String>> {
        let rows = sqlx::query("SELECT email FROM contacts")
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    // ---------------------------------------------------------------
    // Threads
    // ---------------------------------------------------------------

    pub async fn create_thread(
        &self,
        subject: &str,
        creator_id: i64,
        folder_id: &str,
    ) -> AppResult<Thread> {
        let created_at = now();
        let id = sqlx::query(
            r#"
            INSERT INTO threads (subject, creator_id, created_at, folder_id)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(subject)
        .bind(creator_id)
        .bind(created_at.to_rfc3339())
        .bind(folder_id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?
        .last_insert_rowid();
        self.get_thread(id).await
    }

    pub async fn get_thread(&self, id: i64) -> AppResult<Thread> {
        let row = sqlx::query(
            "SELECT id, subject, creator_id, created_at, reply_later_at, set_aside_at, folder_id, trashed_at FROM threads WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?
        .ok_or_else(|| AppError::NotFound(format!("thread {id}")))?;
        Ok(row_to_thread(&row))
    }

    /// Reassigns the thread's creator to whichever message is now
    /// chronologically earliest (spec.md 3: "creator = earliest sender").
    pub async fn reassign_thread_creator(&self, thread_id: i64, creator_id: i64) -> AppResult<()> {
        sqlx::query("UPDATE threads SET creator_id = ?1 WHERE id = ?2")
            .bind(creator_id)
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn list_threads_by_folder(
        &self,
        folder_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Thread>> {
        let rows = sqlx::query(
            r#"
            SELECT id, subject, creator_id, created_at, reply_later_at, set_aside_at, folder_id, trashed_at
            FROM threads
            WHERE folder_id = ?1 AND trashed_at IS NULL
            ORDER BY created_at DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(folder_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(rows.iter().map(row_to_thread).collect())
    }

    pub async fn count_threads(&self) -> AppResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM threads")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(row.get(0))
    }

    pub async fn list_thread_ids_batch(&self, offset: i64, limit: i64) -> AppResult<Vec<i64>> {
        let rows = sqlx::query("SELECT id FROM threads ORDER BY id ASC LIMIT ?1 OFFSET ?2")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    pub async fn trash_thread(&self, id: i64, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE threads SET trashed_at = ?1 WHERE id = ?2")
            .bind(at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Cascading delete for threads whose retention window has elapsed
    /// (spec.md 4.G). Messages/attachments cascade via FK ON DELETE CASCADE
    /// in the database; attachment files on disk are unlinked separately
    /// since the filesystem has no foreign keys of its own.
    pub async fn delete_thread(&self, id: i64) -> AppResult<()> {
        let file_paths: Vec<String> = sqlx::query(
            "SELECT a.file_path FROM attachments a JOIN messages m ON a.message_id = m.id WHERE m.thread_id = ?1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?
        .iter()
        .map(|r| r.get(0))
        .collect();

        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;
        sqlx::query("DELETE FROM thread_contacts WHERE thread_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from)?;
        sqlx::query("DELETE FROM threads WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from)?;
        tx.commit().await.map_err(StorageError::from)?;

        for path in file_paths {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path, error = %e, "failed to remove attachment file during thread delete");
            }
        }

        Ok(())
    }

    pub async fn list_trashed_thread_ids_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<i64>> {
        let rows = sqlx::query("SELECT id FROM threads WHERE trashed_at IS NOT NULL AND trashed_at < ?1")
            .bind(cutoff.to_rfc3339())
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    /// Threads sitting in trash/junk whose latest activity predates
    /// `cutoff`, for the scheduler's daily retention sweep (spec.md 4.G).
    pub async fn list_aged_thread_ids_in_folders(
        &self,
        folders: &[&str],
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<i64>> {
        let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
            r#"
            SELECT t.id FROM threads t
            WHERE t.folder_id IN (
            "#,
        );
        {
            let mut sep = qb.separated(", ");
            for f in folders {
                sep.push_bind(*f);
            }
        }
        qb.push(") AND COALESCE((SELECT MAX(m.received_at) FROM messages m WHERE m.thread_id = t.id), t.created_at) < ");
        qb.push_bind(cutoff.to_rfc3339());

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    pub async fn move_thread_folder(&self, id: i64, folder_id: &str) -> AppResult<()> {
        sqlx::query("UPDATE threads SET folder_id = ?1 WHERE id = ?2")
            .bind(folder_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn mark_thread_read(&self, id: i64, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            "UPDATE messages SET read_at = ?1 WHERE thread_id = ?2 AND read_at IS NULL",
        )
        .bind(at.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn set_thread_reply_later(
        &self,
        id: i64,
        at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        sqlx::query("UPDATE threads SET reply_later_at = ?1 WHERE id = ?2")
            .bind(at.map(|d| d.to_rfc3339()))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn set_thread_set_aside(&self, id: i64, at: Option<DateTime<Utc>>) -> AppResult<()> {
        sqlx::query("UPDATE threads SET set_aside_at = ?1 WHERE id = ?2")
            .bind(at.map(|d| d.to_rfc3339()))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Clears `replyLaterAt` once no sibling message remains draft/queued
    /// (spec.md 4.F thread reconciliation).
    pub async fn reconcile_thread_reply_later(&self, thread_id: i64) -> AppResult<()> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM messages WHERE thread_id = ?1 AND status IN ('draft', 'queued')",
        )
        .bind(thread_id)
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::from)?;
        let remaining: i64 = row.get(0);
        if remaining == 0 {
            self.set_thread_reply_later(thread_id, None).await?;
        }
        Ok(())
    }

    pub async fn add_thread_contact(
        &self,
        thread_id: i64,
        contact_id: i64,
        role: ThreadContactRole,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO thread_contacts (thread_id, contact_id, role)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(thread_id, contact_id) DO UPDATE SET role = excluded.role
            "#,
        )
        .bind(thread_id)
        .bind(contact_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Messages
    // ---------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_message(
        &self,
        thread_id: Option<i64>,
        sender_id: i64,
        message_id: Option<&str>,
        in_reply_to: Option<&str>,
        references: &[String],
        subject: &str,
        content_text: &str,
        content_html: Option<&str>,
        headers: &serde_json::Value,
        received_at: DateTime<Utc>,
        status: MessageStatus,
        folder: &str,
    ) -> AppResult<Message> {
        let id = sqlx::query(
            r#"
            INSERT INTO messages (
                thread_id, sender_id, message_id, in_reply_to, references_json,
                subject, content_text, content_html, headers_json,
                received_at, status, folder
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(thread_id)
        .bind(sender_id)
        .bind(message_id)
        .bind(in_reply_to)
        .bind(serde_json::to_string(references).unwrap_or_else(|_| "[]".into()))
        .bind(subject)
        .bind(content_text)
        .bind(content_html)
        .bind(headers.to_string())
        .bind(received_at.to_rfc3339())
        .bind(status.as_str())
        .bind(folder)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?
        .last_insert_rowid();
        self.get_message(id).await
    }

    pub async fn get_message(&self, id: i64) -> AppResult<Message> {
        let row = sqlx::query(&format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?
            .ok_or_else(|| AppError::NotFound(format!("message {id}")))?;
        Ok(row_to_message(&row))
    }

    pub async fn find_message_by_message_id(&self, message_id: &str) -> AppResult<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM messages WHERE message_id = ?1",
            MESSAGE_COLUMNS
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(row.map(|r| row_to_message(&r)))
    }

    pub async fn list_messages_by_thread(&self, thread_id: i64) -> AppResult<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM messages WHERE thread_id = ?1 ORDER BY received_at ASC",
            MESSAGE_COLUMNS
        ))
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(rows.iter().map(row_to_message).collect())
    }

    /// Step 1 of threading: does any existing message's `messageId` match
    /// one of this message's `inReplyTo`/`references` values?
    pub async fn find_thread_id_by_message_ids(&self, ids: &[String]) -> AppResult<Option<i64>> {
        if ids.is_empty() {
            return Ok(None);
        }
        let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
            "SELECT thread_id FROM messages WHERE thread_id IS NOT NULL AND message_id IN (",
        );
        {
            let mut sep = qb.separated(", ");
            for id in ids {
                sep.push_bind(id);
            }
        }
        qb.push(") ORDER BY received_at ASC LIMIT 1");
        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(row.and_then(|r| r.get::<Option<i64>, _>(0)))
    }

    /// Steps 2/3 of threading: the most recently active thread whose
    /// (normalized) subject matches exactly.
    pub async fn find_thread_by_normalized_subject(&self, norm: &str) -> AppResult<Option<Thread>> {
        let row = sqlx::query(
            r#"
            SELECT id, subject, creator_id, created_at, reply_later_at, set_aside_at, folder_id, trashed_at
            FROM threads
            WHERE subject = ?1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(norm)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(row.map(|r| row_to_thread(&r)))
    }

    /// The earliest message currently in a thread, used to decide whether a
    /// newly-joined message should reassign thread creatorship.
    pub async fn earliest_message_in_thread(&self, thread_id: i64) -> AppResult<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM messages WHERE thread_id = ?1 ORDER BY received_at ASC LIMIT 1",
            MESSAGE_COLUMNS
        ))
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(row.map(|r| row_to_message(&r)))
    }


    pub async fn set_message_thread(&self, message_id: i64, thread_id: i64) -> AppResult<()> {
        sqlx::query("UPDATE messages SET thread_id = ?1 WHERE id = ?2")
            .bind(thread_id)
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn add_message_contact(
        &self,
        message_id: i64,
        contact_id: i64,
        role: ContactRole,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO message_contacts (message_id, contact_id, role)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(message_id, contact_id, role) DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(contact_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn list_message_contacts(
        &self,
        message_id: i64,
    ) -> AppResult<Vec<(i64, ContactRole)>> {
        let rows = sqlx::query("SELECT contact_id, role FROM message_contacts WHERE message_id = ?1")
            .bind(message_id)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows
            .iter()
            .filter_map(|r| {
                let role = ContactRole::parse(&r.get::<String, _>(1))?;
                Some((r.get::<i64, _>(0), role))
            })
            .collect())
    }

    pub async fn mark_message_read(&self, id: i64, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE messages SET read_at = ?1 WHERE id = ?2")
            .bind(at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Creates (or updates in place) a draft/queued message authored locally.
    pub async fn create_draft(
        &self,
        thread_id: Option<i64>,
        sender_id: i64,
        subject: &str,
        content_text: &str,
        content_html: Option<&str>,
        in_reply_to: Option<&str>,
        folder: &str,
    ) -> AppResult<Message> {
        self.insert_message(
            thread_id,
            sender_id,
            None,
            in_reply_to,
            &[],
            subject,
            content_text,
            content_html,
            &serde_json::json!({}),
            now(),
            MessageStatus::Draft,
            folder,
        )
        .await
    }

    pub async fn queue_message(&self, id: i64) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE messages
            SET status = 'queued', queued_at = ?1,
                send_attempts = 0, last_send_attempt_at = NULL, last_send_error = NULL
            WHERE id = ?2 AND status = 'draft'
            "#,
        )
        .bind(now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn list_queued_messages(&self) -> AppResult<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM messages WHERE status = 'queued' ORDER BY queued_at ASC",
            MESSAGE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(rows.iter().map(row_to_message).collect())
    }

    pub async fn mark_message_sent(
        &self,
        id: i64,
        message_id: &str,
        sent_at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE messages
            SET status = 'sent', message_id = ?1, sent_at = ?2, last_send_error = NULL, folder = 'sent'
            WHERE id = ?3
            "#,
        )
        .bind(message_id)
        .bind(sent_at.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn record_send_failure(
        &self,
        id: i64,
        attempted_at: DateTime<Utc>,
        error: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE messages
            SET send_attempts = send_attempts + 1, last_send_attempt_at = ?1, last_send_error = ?2
            WHERE id = ?3
            "#,
        )
        .bind(attempted_at.to_rfc3339())
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Attachments
    // ---------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_attachment(
        &self,
        message_id: i64,
        filename: &str,
        mime_type: Option<&str>,
        size: Option<i64>,
        file_path: &str,
        content_id: Option<&str>,
        is_inline: bool,
    ) -> AppResult<Attachment> {
        let created_at = now();
        let id = sqlx::query(
            r#"
            INSERT INTO attachments (message_id, filename, mime_type, size, file_path, content_id, is_inline, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(message_id)
        .bind(filename)
        .bind(mime_type)
        .bind(size)
        .bind(file_path)
        .bind(content_id)
        .bind(is_inline)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?
        .last_insert_rowid();

        let row = sqlx::query(
            "SELECT id, message_id, filename, mime_type, size, file_path, content_id, is_inline, created_at FROM attachments WHERE id = ?1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(row_to_attachment(&row))
    }

    pub async fn list_attachments_by_message(&self, message_id: i64) -> AppResult<Vec<Attachment>> {
        let rows = sqlx::query(
            "SELECT id, message_id, filename, mime_type, size, file_path, content_id, is_inline, created_at FROM attachments WHERE message_id = ?1",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(rows.iter().map(row_to_attachment).collect())
    }

    pub async fn list_filenames_for_message(&self, message_id: i64) -> AppResult<Vec<String>> {
        let rows = sqlx::query("SELECT filename FROM attachments WHERE message_id = ?1")
            .bind(message_id)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    // ---------------------------------------------------------------
    // Rules
    // ---------------------------------------------------------------

    pub async fn create_rule(&self, rule: &Rule) -> AppResult<Rule> {
        let created_at = now();
        let id = sqlx::query(
            r#"
            INSERT INTO rules (name, conditions_json, action_type, action_config_json, folder_ids_json, position, enabled, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&rule.name)
        .bind(serde_json::to_string(&rule.conditions).map_err(|e| AppError::Validation(e.to_string()))?)
        .bind(rule.action_type.as_str())
        .bind(rule.action_config.as_ref().map(|v| v.to_string()))
        .bind(serde_json::to_string(&rule.folder_ids).unwrap_or_else(|_| "[]".into()))
        .bind(rule.position)
        .bind(rule.enabled)
        .bind(created_at.to_rfc3339())
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?
        .last_insert_rowid();
        self.get_rule(id).await
    }

    pub async fn get_rule(&self, id: i64) -> AppResult<Rule> {
        let row = sqlx::query(
            "SELECT id, name, conditions_json, action_type, action_config_json, folder_ids_json, position, enabled, created_at, updated_at FROM rules WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?
        .ok_or_else(|| AppError::NotFound(format!("rule {id}")))?;
        row_to_rule(&row)
    }

    /// Enabled rules ascending by position, optionally filtered to those
    /// whose `folderIds` include the target folder (spec.md 4.D).
    pub async fn list_enabled_rules(&self, folder: Option<&str>) -> AppResult<Vec<Rule>> {
        let rows = sqlx::query(
            "SELECT id, name, conditions_json, action_type, action_config_json, folder_ids_json, position, enabled, created_at, updated_at FROM rules WHERE enabled = 1 ORDER BY position ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;

        let mut out = Vec::new();
        for row in &rows {
            let rule = row_to_rule(row)?;
            if let Some(folder) = folder {
                if !rule.folder_ids.is_empty() && !rule.folder_ids.iter().any(|f| f == folder) {
                    continue;
                }
            }
            out.push(rule);
        }
        Ok(out)
    }

    pub async fn list_rules(&self) -> AppResult<Vec<Rule>> {
        let rows = sqlx::query(
            "SELECT id, name, conditions_json, action_type, action_config_json, folder_ids_json, position, enabled, created_at, updated_at FROM rules ORDER BY position ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        rows.iter().map(row_to_rule).collect()
    }

    pub async fn delete_rule(&self, id: i64) -> AppResult<()> {
        sqlx::query("DELETE FROM rules WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Builds the condition-evaluation context for a thread's most recent
    /// message, used by both live first-match-wins evaluation and
    /// retroactive `RuleApplication` batches.
    pub async fn build_rule_context_for_thread(
        &self,
        thread_id: i64,
    ) -> AppResult<RuleEvaluationContext> {
        let thread = self.get_thread(thread_id).await?;
        let messages = self.list_messages_by_thread(thread_id).await?;
        let latest = messages.last();

        let mut ctx = RuleEvaluationContext {
            thread_subject: thread.subject.clone(),
            ..Default::default()
        };

        if let Some(msg) = latest {
            ctx.email_subject = msg.subject.clone();
            ctx.content = msg.content_text.clone();

            let sender = self.get_contact(msg.sender_id).await?;
            ctx.sender_name = sender.name.clone().unwrap_or_default();
            ctx.sender_email = sender.email.clone();

            for (contact_id, role) in self.list_message_contacts(msg.id).await? {
                let contact = self.get_contact(contact_id).await?;
                match role {
                    ContactRole::To => {
                        ctx.to_names.push(contact.name.clone().unwrap_or_default());
                        ctx.to_emails.push(contact.email.clone());
                    }
                    ContactRole::Cc => {
                        ctx.cc_names.push(contact.name.clone().unwrap_or_default());
                        ctx.cc_emails.push(contact.email.clone());
                    }
                    _ => {}
                }
            }

            ctx.attachment_filenames = self.list_filenames_for_message(msg.id).await?;

            if let Some(obj) = msg.headers.as_object() {
                for (k, v) in obj {
                    if let Some(s) = v.as_str() {
                        ctx.headers.push((k.to_lowercase(), s.to_string()));
                    }
                }
            }
        }

        ctx.contact_emails = self.all_contact_emails().await?;
        Ok(ctx)
    }

    // ---------------------------------------------------------------
    // Rule applications
    // ---------------------------------------------------------------

    pub async fn create_rule_application(&self, rule_id: i64) -> AppResult<RuleApplication> {
        let created_at = now();
        let id = sqlx::query(
            r#"
            INSERT INTO rule_applications (rule_id, status, started_at, created_at)
            VALUES (?1, 'running', ?2, ?2)
            "#,
        )
        .bind(rule_id)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?
        .last_insert_rowid();
        self.get_rule_application(id).await
    }

    pub async fn get_rule_application(&self, id: i64) -> AppResult<RuleApplication> {
        let row = sqlx::query(
            "SELECT id, rule_id, status, total_count, processed_count, matched_count, error, started_at, completed_at, created_at FROM rule_applications WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?
        .ok_or_else(|| AppError::NotFound(format!("rule application {id}")))?;
        Ok(row_to_rule_application(&row))
    }

    pub async fn set_rule_application_total(&self, id: i64, total: i64) -> AppResult<()> {
        sqlx::query("UPDATE rule_applications SET total_count = ?1 WHERE id = ?2")
            .bind(total)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn update_rule_application_progress(
        &self,
        id: i64,
        processed: i64,
        matched: i64,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE rule_applications SET processed_count = ?1, matched_count = ?2 WHERE id = ?3",
        )
        .bind(processed)
        .bind(matched)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn complete_rule_application(&self, id: i64) -> AppResult<()> {
        sqlx::query(
            "UPDATE rule_applications SET status = 'completed', completed_at = ?1 WHERE id = ?2",
        )
        .bind(now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn fail_rule_application(&self, id: i64, error: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE rule_applications SET status = 'failed', error = ?1, completed_at = ?2 WHERE id = ?3",
        )
        .bind(error)
        .bind(now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Scheduler state
    // ---------------------------------------------------------------

    pub async fn scheduler_last_run(&self, task_key: &str) -> AppResult<Option<String>> {
        let row = sqlx::query("SELECT last_run_date FROM scheduler_state WHERE task_key = ?1")
            .bind(task_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(row.map(|r| r.get(0)))
    }

    pub async fn scheduler_set_last_run(&self, task_key: &str, date: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduler_state (task_key, last_run_date) VALUES (?1, ?2)
            ON CONFLICT(task_key) DO UPDATE SET last_run_date = excluded.last_run_date
            "#,
        )
        .bind(task_key)
        .bind(date)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // HTTP-surface helpers
    // ---------------------------------------------------------------

    pub async fn update_contact(
        &self,
        id: i64,
        name: Option<&str>,
        bucket: Option<Bucket>,
    ) -> AppResult<Contact> {
        if let Some(n) = name {
            sqlx::query("UPDATE contacts SET name = ?1 WHERE id = ?2")
                .bind(n)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(StorageError::from)?;
        }
        if let Some(b) = bucket {
            sqlx::query("UPDATE contacts SET bucket = ?1 WHERE id = ?2")
                .bind(b.as_str())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(StorageError::from)?;
        }
        self.get_contact(id).await
    }

    pub async fn update_rule(&self, rule: &Rule) -> AppResult<Rule> {
        sqlx::query(
            r#"
            UPDATE rules SET
                name = ?1, conditions_json = ?2, action_type = ?3, action_config_json = ?4,
                folder_ids_json = ?5, position = ?6, enabled = ?7, updated_at = ?8
            WHERE id = ?9
            "#,
        )
        .bind(&rule.name)
        .bind(serde_json::to_string(&rule.conditions).map_err(|e| AppError::Validation(e.to_string()))?)
        .bind(rule.action_type.as_str())
        .bind(rule.action_config.as_ref().map(|v| v.to_string()))
        .bind(serde_json::to_string(&rule.folder_ids).unwrap_or_else(|_| "[]".into()))
        .bind(rule.position)
        .bind(rule.enabled)
        .bind(now().to_rfc3339())
        .bind(rule.id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        self.get_rule(rule.id).await
    }

    pub async fn get_attachment(&self, id: i64) -> AppResult<Attachment> {
        let row = sqlx::query(
            "SELECT id, message_id, filename, mime_type, size, file_path, content_id, is_inline, created_at FROM attachments WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?
        .ok_or_else(|| AppError::NotFound(format!("attachment {id}")))?;
        Ok(row_to_attachment(&row))
    }

    /// Drafts may only be edited or deleted before they enter the send
    /// queue (spec.md 4.F guards `queued` onward).
    pub async fn update_draft(
        &self,
        id: i64,
        subject: Option<&str>,
        content_text: Option<&str>,
        content_html: Option<&str>,
    ) -> AppResult<Message> {
        let draft = self.get_message(id).await?;
        if draft.status != MessageStatus::Draft {
            return Err(AppError::Conflict(format!("message {id} is not a draft")));
        }
        sqlx::query(
            r#"
            UPDATE messages SET
                subject = COALESCE(?1, subject),
                content_text = COALESCE(?2, content_text),
                content_html = COALESCE(?3, content_html)
            WHERE id = ?4
            "#,
        )
        .bind(subject)
        .bind(content_text)
        .bind(content_html)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        self.get_message(id).await
    }

    pub async fn delete_draft(&self, id: i64) -> AppResult<()> {
        let draft = self.get_message(id).await?;
        if draft.status != MessageStatus::Draft {
            return Err(AppError::Conflict(format!("message {id} is not a draft")));
        }
        sqlx::query("DELETE FROM messages WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn mark_messages_read_bulk(&self, ids: &[i64], at: DateTime<Utc>) -> AppResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new("UPDATE messages SET read_at = ");
        qb.push_bind(at.to_rfc3339());
        qb.push(" WHERE id IN (");
        {
            let mut sep = qb.separated(", ");
            for id in ids {
                sep.push_bind(id);
            }
        }
        qb.push(")");
        qb.build().execute(&self.pool).await.map_err(StorageError::from)?;
        Ok(())
    }

    /// Per-folder unread message counts plus the outbound queue depth, for
    /// the sidebar badge counters.
    pub async fn unread_counts(&self) -> AppResult<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT folder, COUNT(*) FROM messages WHERE read_at IS NULL AND status = 'received' GROUP BY folder",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        let mut out: Vec<(String, i64)> = rows.iter().map(|r| (r.get(0), r.get(1))).collect();

        let queued: i64 = sqlx::query("SELECT COUNT(*) FROM messages WHERE status = 'queued'")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::from)?
            .get(0);
        out.push(("queued".to_string(), queued));
        Ok(out)
    }

    /// Threads whose creator sits in the given contact bucket — backs the
    /// feed view (spec.md 6: bucket-specific views).
    pub async fn list_threads_by_creator_bucket(
        &self,
        bucket: Bucket,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Thread>> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.subject, t.creator_id, t.created_at, t.reply_later_at, t.set_aside_at, t.folder_id, t.trashed_at
            FROM threads t
            JOIN contacts c ON c.id = t.creator_id
            WHERE c.bucket = ?1 AND t.trashed_at IS NULL
            ORDER BY t.created_at DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(bucket.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(rows.iter().map(row_to_thread).collect())
    }

    pub async fn list_set_aside_threads(&self, limit: i64, offset: i64) -> AppResult<Vec<Thread>> {
        let rows = sqlx::query(
            r#"
            SELECT id, subject, creator_id, created_at, reply_later_at, set_aside_at, folder_id, trashed_at
            FROM threads
            WHERE set_aside_at IS NOT NULL AND trashed_at IS NULL
            ORDER BY set_aside_at DESC
            LIMIT ?1 OFFSET ?2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(rows.iter().map(row_to_thread).collect())
    }

    /// Unread messages from contacts in the `approved` bucket, newest
    /// first, bounded — backs the desktop-notification poll endpoint.
    pub async fn list_pending_notifications(&self, limit: i64) -> AppResult<Vec<Message>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE read_at IS NULL
              AND status = 'received'
              AND sender_id IN (SELECT id FROM contacts WHERE bucket = 'approved')
            ORDER BY received_at DESC
            LIMIT ?1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(rows.iter().map(row_to_message).collect())
    }
}

const MESSAGE_COLUMNS: &str = "id, thread_id, sender_id, message_id, in_reply_to, references_json, subject, content_text, content_html, headers_json, sent_at, received_at, read_at, status, folder, queued_at, send_attempts, last_send_attempt_at, last_send_error";

fn row_to_contact(row: &sqlx::sqlite::SqliteRow) -> Contact {
    Contact {
        id: row.get(0),
        email: row.get(1),
        name: row.get(2),
        is_me: row.get::<i64, _>(3) != 0,
        is_default_identity: row.get::<i64, _>(4) != 0,
        bucket: row.get::<Option<String>, _>(5).and_then(|s| Bucket::parse(&s)),
        created_at: parse_ts(&row.get::<String, _>(6)),
    }
}

fn row_to_thread(row: &sqlx::sqlite::SqliteRow) -> Thread {
    Thread {
        id: row.get(0),
        subject: row.get(1),
        creator_id: row.get(2),
        created_at: parse_ts(&row.get::<String, _>(3)),
        reply_later_at: row.get::<Option<String>, _>(4).map(|s| parse_ts(&s)),
        set_aside_at: row.get::<Option<String>, _>(5).map(|s| parse_ts(&s)),
        folder_id: row.get(6),
        trashed_at: row.get::<Option<String>, _>(7).map(|s| parse_ts(&s)),
    }
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Message {
    let references: Vec<String> =
        serde_json::from_str(&row.get::<String, _>(5)).unwrap_or_default();
    let headers: serde_json::Value =
        serde_json::from_str(&row.get::<String, _>(9)).unwrap_or(serde_json::json!({}));
    Message {
        id: row.get(0),
        thread_id: row.get(1),
        sender_id: row.get(2),
        message_id: row.get(3),
        in_reply_to: row.get(4),
        references,
        subject: row.get(6),
        content_text: row.get(7),
        content_html: row.get(8),
        headers,
        sent_at: row.get::<Option<String>, _>(10).map(|s| parse_ts(&s)),
        received_at: parse_ts(&row.get::<String, _>(11)),
        read_at: row.get::<Option<String>, _>(12).map(|s| parse_ts(&s)),
        status: MessageStatus::parse(&row.get::<String, _>(13)).unwrap_or(MessageStatus::Received),
        folder: row.get(14),
        queued_at: row.get::<Option<String>, _>(15).map(|s| parse_ts(&s)),
        send_attempts: row.get(16),
        last_send_attempt_at: row.get::<Option<String>, _>(17).map(|s| parse_ts(&s)),
        last_send_error: row.get(18),
    }
}

fn row_to_attachment(row: &sqlx::sqlite::SqliteRow) -> Attachment {
    Attachment {
        id: row.get(0),
        message_id: row.get(1),
        filename: row.get(2),
        mime_type: row.get(3),
        size: row.get(4),
        file_path: row.get(5),
        content_id: row.get(6),
        is_inline: row.get::<i64, _>(7) != 0,
        created_at: parse_ts(&row.get::<String, _>(8)),
    }
}

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> AppResult<Rule> {
    let conditions: ConditionGroup = serde_json::from_str(&row.get::<String, _>(2))
        .map_err(|e| AppError::Parse(format!("invalid rule conditions: {e}")))?;
    let folder_ids: Vec<String> =
        serde_json::from_str(&row.get::<String, _>(5)).unwrap_or_default();
    Ok(Rule {
        id: row.get(0),
        name: row.get(1),
        conditions,
        action_type: RuleActionType::parse(&row.get::<String, _>(3))
            .ok_or_else(|| AppError::Parse("invalid rule action_type".into()))?,
        action_config: row
            .get::<Option<String>, _>(4)
            .and_then(|s| serde_json::from_str(&s).ok()),
        folder_ids,
        position: row.get(6),
        enabled: row.get::<i64, _>(7) != 0,
        created_at: parse_ts(&row.get::<String, _>(8)),
        updated_at: parse_ts(&row.get::<String, _>(9)),
    })
}

fn row_to_rule_application(row: &sqlx::sqlite::SqliteRow) -> RuleApplication {
    RuleApplication {
        id: row.get(0),
        rule_id: row.get(1),
        status: RuleApplicationStatus::parse(&row.get::<String, _>(2))
            .unwrap_or(RuleApplicationStatus::Failed),
        total_count: row.get(3),
        processed_count: row.get(4),
        matched_count: row.get(5),
        error: row.get(6),
        started_at: row.get::<Option<String>, _>(7).map(|s| parse_ts(&s)),
        completed_at: row.get::<Option<String>, _>(8).map(|s| parse_ts(&s)),
        created_at: parse_ts(&row.get::<String, _>(9)),
    }
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| now())
}
