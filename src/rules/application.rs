//! Retroactive rule application: runs a single rule's conditions against
//! every existing thread and applies its action on each match (spec.md
//! 4.D). Spawned as a background task and tracked through a
//! `RuleApplication` row that HTTP clients poll.

use crate::rules::actions::apply_action;
use crate::store::Store;
use tracing::{info, warn};

const BATCH_SIZE: i64 = 100;

/// Runs to completion (or failure) and persists the outcome on the
/// `RuleApplication` row. Not cancellable, per spec.
pub async fn run(store: Store, application_id: i64, rule_id: i64) {
    if let Err(e) = run_inner(&store, application_id, rule_id).await {
        warn!(application_id, rule_id, error = %e, "rule application failed");
        let _ = store
            .fail_rule_application(application_id, &e.to_string())
            .await;
        return;
    }
    if let Err(e) = store.complete_rule_application(application_id).await {
        warn!(application_id, error = %e, "failed to mark rule application completed");
    }
}

async fn run_inner(
    store: &Store,
    application_id: i64,
    rule_id: i64,
) -> Result<(), crate::errors::AppError> {
    let rule = store.get_rule(rule_id).await?;
    let total = store.count_threads().await?;
    store
        .set_rule_application_total(application_id, total)
        .await?;

    let mut processed: i64 = 0;
    let mut matched: i64 = 0;
    let mut offset: i64 = 0;

    loop {
        let thread_ids = store.list_thread_ids_batch(offset, BATCH_SIZE).await?;
        if thread_ids.is_empty() {
            break;
        }

        for thread_id in &thread_ids {
            let ctx = store.build_rule_context_for_thread(*thread_id).await?;
            if rule.conditions.evaluate(&ctx) {
                matched += 1;
                apply_action(
                    store,
                    *thread_id,
                    rule.action_type,
                    rule.action_config.as_ref(),
                )
                .await?;
            }
            processed += 1;
        }

        store
            .update_rule_application_progress(application_id, processed, matched)
            .await?;
        offset += thread_ids.len() as i64;
    }

    info!(rule_id, processed, matched, "rule application finished");
    Ok(())
}
