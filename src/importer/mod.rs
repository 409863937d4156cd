//! Idempotent insertion: dedup, identity/impostor resolution, threading,
//! recipient processing, attachments, EML archival, rule invocation
//! (spec.md 4.C). New logic throughout; the transaction discipline is the
//! teacher's `storage/db.rs` batch-write shape.

pub mod eml;
pub mod threading;

use crate::config::Config;
use crate::errors::AppResult;
use crate::parser::ImportableMessage;
use crate::rules::actions::apply_action;
use crate::store::Store;
use crate::types::{now, Bucket, ContactRole, MessageStatus, ThreadContactRole};
use tracing::{debug, info, warn};

const IMPOSTOR_ADDRESS: &str = "impostor@impostor";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Duplicate,
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub imported: bool,
    pub skip_reason: Option<SkipReason>,
    pub message_db_id: Option<i64>,
    pub thread_id: Option<i64>,
}

impl ImportOutcome {
    fn skipped(reason: SkipReason) -> Self {
        ImportOutcome {
            imported: false,
            skip_reason: Some(reason),
            message_db_id: None,
            thread_id: None,
        }
    }
}

/// Imports one parsed message. At-most-once by Message-ID.
pub async fn import(
    store: &Store,
    config: &Config,
    msg: &ImportableMessage,
    raw: &[u8],
    folder: &str,
    uid: Option<u32>,
    flags: &[String],
) -> AppResult<ImportOutcome> {
    if let Some(mid) = &msg.message_id {
        if store.find_message_by_message_id(mid).await?.is_some() {
            debug!(message_id = %mid, "duplicate message, skipping");
            return Ok(ImportOutcome::skipped(SkipReason::Duplicate));
        }
    }

    // Identity reconciliation: the isMe set only grows.
    if msg.is_sent {
        if let Some(from) = msg.from.first() {
            let (contact, _) = store.get_or_create_contact(&from.email, from.name.as_deref()).await?;
            if !contact.is_me {
                store.set_contact_is_me(contact.id, true).await?;
            }
        }
    } else if let Some(delivered_to) = &msg.delivered_to {
        let (contact, _) = store.get_or_create_contact(delivered_to, None).await?;
        if !contact.is_me {
            store.set_contact_is_me(contact.id, true).await?;
        }
    }

    // Impostor handling: junk mail claiming to be from an existing isMe
    // contact is rewritten to a synthetic sender so it can't poison the
    // trusted set.
    let from_addr = msg.from.first();
    let sender_email = if msg.is_junk {
        if let Some(from) = from_addr {
            match store.find_contact_by_email(&from.email).await? {
                Some(c) if c.is_me => {
                    warn!(original = %from.email, "impostor mail claiming an isMe address");
                    IMPOSTOR_ADDRESS.to_string()
                }
                _ => from.email.clone(),
            }
        } else {
            IMPOSTOR_ADDRESS.to_string()
        }
    } else {
        from_addr.map(|a| a.email.clone()).unwrap_or_else(|| IMPOSTOR_ADDRESS.to_string())
    };
    let sender_name = from_addr.and_then(|a| a.name.clone());

    let (sender, sender_is_new) = store
        .get_or_create_contact(&sender_email, sender_name.as_deref())
        .await?;

    if sender_is_new && msg.is_junk && !sender.is_me {
        store.set_contact_bucket(sender.id, Bucket::Quarantine).await?;
    }

    // Threading.
    let mut candidate_ids: Vec<String> = Vec::new();
    if let Some(irt) = &msg.in_reply_to {
        candidate_ids.push(irt.clone());
    }
    candidate_ids.extend(msg.references.iter().cloned());

    let normalized_subject = threading::normalize_subject(&msg.subject);
    let has_prefix = threading::has_reply_prefix(&msg.subject);

    let thread_id = if let Some(tid) = store.find_thread_id_by_message_ids(&candidate_ids).await? {
        tid
    } else if has_prefix {
        match store.find_thread_by_normalized_subject(&normalized_subject).await? {
            Some(t) => t.id,
            None => {
                let t = store
                    .create_thread(&normalized_subject, sender.id, folder)
                    .await?;
                t.id
            }
        }
    } else if let Some(candidate) = store.find_thread_by_normalized_subject(&normalized_subject).await? {
        let creator = store.get_contact(candidate.creator_id).await?;
        if creator.is_me != sender.is_me {
            candidate.id
        } else {
            store
                .create_thread(&normalized_subject, sender.id, folder)
                .await?
                .id
        }
    } else {
        store
            .create_thread(&normalized_subject, sender.id, folder)
            .await?
            .id
    };

    // Creator reassignment: the creator is always the earliest known
    // sender in the thread.
    let sent_at = msg.sent_at.unwrap_or_else(now);
    if let Some(earliest) = store.earliest_message_in_thread(thread_id).await? {
        if sent_at < earliest.received_at {
            store.reassign_thread_creator(thread_id, sender.id).await?;
        }
    }

    let status = if msg.is_sent {
        MessageStatus::Sent
    } else {
        MessageStatus::Received
    };

    let message = store
        .insert_message(
            Some(thread_id),
            sender.id,
            msg.message_id.as_deref(),
            msg.in_reply_to.as_deref(),
            &msg.references,
            &msg.subject,
            &msg.text,
            msg.html.as_deref(),
            &msg.headers,
            sent_at,
            status,
            folder,
        )
        .await?;

    if msg.is_read {
        store.mark_message_read(message.id, now()).await?;
    }

    store.add_message_contact(message.id, sender.id, ContactRole::From).await?;
    store
        .add_thread_contact(thread_id, sender.id, ThreadContactRole::Sender)
        .await?;

    // Recipient processing.
    for (addrs, role) in [
        (&msg.to, ContactRole::To),
        (&msg.cc, ContactRole::Cc),
        (&msg.bcc, ContactRole::Bcc),
    ] {
        for addr in addrs {
            let (contact, _) = store.get_or_create_contact(&addr.email, addr.name.as_deref()).await?;
            if msg.is_sent && !contact.is_me && contact.bucket.is_none() {
                store.set_contact_bucket(contact.id, Bucket::Approved).await?;
            }
            store.add_message_contact(message.id, contact.id, role).await?;
            store
                .add_thread_contact(thread_id, contact.id, ThreadContactRole::Recipient)
                .await?;
        }
    }

    // Attachments: collision-resistant filenames under the attachments dir.
    if !msg.attachments.is_empty() {
        let dir = config.attachments_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(error = %e, "failed to create attachments directory");
        }
        for att in &msg.attachments {
            if att.bytes.len() as u64 > config.max_attachment_size {
                warn!(filename = %att.filename, "attachment exceeds max size, skipping write");
                continue;
            }
            let ext = std::path::Path::new(&att.filename)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!(".{e}"))
                .unwrap_or_default();
            let stored_name = format!("{}{}", uuid::Uuid::new_v4(), ext);
            let path = dir.join(&stored_name);
            if let Err(e) = std::fs::write(&path, &att.bytes) {
                warn!(filename = %att.filename, error = %e, "failed to write attachment, skipping");
                continue;
            }
            store
                .insert_attachment(
                    message.id,
                    &att.filename,
                    Some(&att.mime_type),
                    Some(att.bytes.len() as i64),
                    &path.to_string_lossy(),
                    att.content_id.as_deref(),
                    att.is_inline,
                )
                .await?;
        }
    }

    // EML archival.
    if config.eml_backup_enabled {
        let backup_dir = config.eml_backup_dir();
        let archive_id = msg.message_id.as_deref().unwrap_or("no-message-id");
        match eml::archive(&backup_dir, folder, archive_id, uid, flags, raw) {
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to archive eml"),
        }
    }

    // Rule invocation: first-match-wins against the source folder.
    if let Err(e) = invoke_rules(store, thread_id, folder).await {
        warn!(error = %e, "rule invocation failed for imported message");
    }

    info!(message_db_id = message.id, thread_id, folder, "message imported");

    Ok(ImportOutcome {
        imported: true,
        skip_reason: None,
        message_db_id: Some(message.id),
        thread_id: Some(thread_id),
    })
}

async fn invoke_rules(store: &Store, thread_id: i64, folder: &str) -> AppResult<()> {
    let rules = store.list_enabled_rules(Some(folder)).await?;
    let ctx = store.build_rule_context_for_thread(thread_id).await?;
    for rule in rules {
        if rule.conditions.evaluate(&ctx) {
            apply_action(store, thread_id, rule.action_type, rule.action_config.as_ref()).await?;
            break;
        }
    }
    Ok(())
}
