use meremail::rules::{Condition, ConditionGroup, ConditionNode, GroupOperator, MatchType};
use meremail::rules::application;
use meremail::store::Store;
use meremail::types::{now, ContactRole, MessageStatus, Rule, RuleActionType, RuleApplicationStatus, ThreadContactRole};

async fn open_store(dir: &std::path::Path) -> Store {
    Store::open(&dir.join("meremail.db")).await.unwrap()
}

fn matching_rule() -> Rule {
    Rule {
        id: 0,
        name: "newsletters to archive".to_string(),
        conditions: ConditionGroup {
            operator: GroupOperator::And,
            children: vec![ConditionNode::Leaf(Condition {
                field: "sender_email".to_string(),
                match_type: MatchType::Contains,
                value: "newsletter".to_string(),
                negate: false,
            })],
        },
        action_type: RuleActionType::MoveToFolder,
        action_config: Some(serde_json::json!({ "folderId": "archive" })),
        folder_ids: Vec::new(),
        position: 0,
        enabled: true,
        created_at: now(),
        updated_at: now(),
    }
}

#[tokio::test]
async fn retroactive_application_only_moves_matching_threads() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;

    let (newsletter_sender, _) = store
        .get_or_create_contact("newsletter@example.com", None)
        .await
        .unwrap();
    let (friend, _) = store.get_or_create_contact("friend@example.com", None).await.unwrap();

    let matching_thread = store
        .create_thread("weekly digest", newsletter_sender.id, "inbox")
        .await
        .unwrap();
    store
        .add_thread_contact(matching_thread.id, newsletter_sender.id, ThreadContactRole::Sender)
        .await
        .unwrap();
    store
        .insert_message(
            Some(matching_thread.id),
            newsletter_sender.id,
            None,
            None,
            &[],
            "weekly digest",
            "news",
            None,
            &serde_json::Value::Null,
            now(),
            MessageStatus::Received,
            "inbox",
        )
        .await
        .unwrap();
    store
        .add_message_contact(
            store.list_messages_by_thread(matching_thread.id).await.unwrap()[0].id,
            newsletter_sender.id,
            ContactRole::From,
        )
        .await
        .unwrap();

    let other_thread = store.create_thread("dinner plans", friend.id, "inbox").await.unwrap();
    store
        .add_thread_contact(other_thread.id, friend.id, ThreadContactRole::Sender)
        .await
        .unwrap();
    store
        .insert_message(
            Some(other_thread.id),
            friend.id,
            None,
            None,
            &[],
            "dinner plans",
            "are you free",
            None,
            &serde_json::Value::Null,
            now(),
            MessageStatus::Received,
            "inbox",
        )
        .await
        .unwrap();

    let rule = store.create_rule(&matching_rule()).await.unwrap();
    let app = store.create_rule_application(rule.id).await.unwrap();

    application::run(store.clone(), app.id, rule.id).await;

    let finished = store.get_rule_application(app.id).await.unwrap();
    assert_eq!(finished.status, RuleApplicationStatus::Completed);
    assert_eq!(finished.matched_count, 1);
    assert_eq!(finished.processed_count, 2);

    let matched_after = store.get_thread(matching_thread.id).await.unwrap();
    assert_eq!(matched_after.folder_id, "archive");

    let other_after = store.get_thread(other_thread.id).await.unwrap();
    assert_eq!(other_after.folder_id, "inbox");
}

