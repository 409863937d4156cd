//! Applies the single-match action a Rule fires (spec.md 4.D).

use crate::errors::AppResult;
use crate::store::Store;
use crate::types::{now, RuleActionType};

pub async fn apply_action(
    store: &Store,
    thread_id: i64,
    action_type: RuleActionType,
    action_config: Option<&serde_json::Value>,
) -> AppResult<()> {
    match action_type {
        RuleActionType::DeleteThread => {
            store.move_thread_folder(thread_id, "trash").await?;
            store.mark_thread_read(thread_id, now()).await?;
            store.trash_thread(thread_id, now()).await?;
        }
        RuleActionType::MoveToFolder => {
            let folder = action_config
                .and_then(|c| c.get("folderId"))
                .and_then(|v| v.as_str())
                .unwrap_or("archive");
            store.move_thread_folder(thread_id, folder).await?;
        }
        RuleActionType::MarkRead => {
            store.mark_thread_read(thread_id, now()).await?;
        }
        RuleActionType::AddToReplyLater => {
            store.set_thread_reply_later(thread_id, Some(now())).await?;
        }
        RuleActionType::AddToSetAside => {
            store.set_thread_set_aside(thread_id, Some(now())).await?;
        }
    }
    Ok(())
}
