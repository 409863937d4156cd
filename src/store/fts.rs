use super::Store;
use crate::errors::{AppResult, StorageError};
use sqlx::Row;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub message_id: i64,
    pub thread_id: Option<i64>,
    pub subject: String,
    pub snippet: String,
}

impl Store {
    /// Full-text search over message subject/body via the `messages_fts`
    /// shadow table, ranked by FTS5's built-in bm25.
    pub async fn search_messages(&self, query: &str, limit: i64) -> AppResult<Vec<SearchHit>> {
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.thread_id, m.subject,
                   snippet(messages_fts, 1, '[', ']', '...', 10) AS snip
            FROM messages_fts
            JOIN messages m ON m.id = messages_fts.rowid
            WHERE messages_fts MATCH ?1
            ORDER BY bm25(messages_fts)
            LIMIT ?2
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(StorageError::from)?;

        Ok(rows
            .iter()
            .map(|r| SearchHit {
                message_id: r.get(0),
                thread_id: r.get(1),
                subject: r.get(2),
                snippet: r.get(3),
            })
            .collect())
    }
}
