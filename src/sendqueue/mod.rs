//! Outbound send queue (spec.md 4.F): a 30s tick over `status = queued`
//! messages, reply-quoting grounded on the compose/quote shape this stack
//! already uses, delivery via `lettre`'s async SMTP transport, backoff on
//! failure per [`crate::types::SEND_BACKOFF_SECONDS`].

use std::time::Duration;

use lettre::message::{header::ContentType, Mailbox as LettreMailbox, MultiPart, SinglePart};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, Tokio1Executor};
use rand::RngCore;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::AppResult;
use crate::store::Store;
use crate::types::{now, Contact, ContactRole, Message, SEND_BACKOFF_SECONDS, SEND_MAX_ATTEMPTS};

const TICK: Duration = Duration::from_secs(30);

pub async fn run(config: Config, store: Store, mut stop: watch::Receiver<bool>) {
    loop {
        if *stop.borrow() {
            return;
        }
        if let Err(e) = tick(&config, &store).await {
            warn!(error = %e, "send queue tick failed");
        }
        tokio::select! {
            _ = tokio::time::sleep(TICK) => {}
            _ = stop.changed() => return,
        }
    }
}

async fn tick(config: &Config, store: &Store) -> AppResult<()> {
    for message in store.list_queued_messages().await? {
        if !is_due(&message) {
            continue;
        }
        match send_one(config, store, &message).await {
            Ok(()) => {
                info!(message_id = message.id, "queued message sent");
            }
            Err(e) => {
                warn!(message_id = message.id, error = %e, "send attempt failed");
                store
                    .record_send_failure(message.id, now(), &e.to_string())
                    .await?;
            }
        }
        if let Some(thread_id) = message.thread_id {
            store.reconcile_thread_reply_later(thread_id).await?;
        }
    }
    Ok(())
}

fn is_due(message: &Message) -> bool {
    let Some(attempted_at) = message.last_send_attempt_at else {
        return true;
    };
    if message.send_attempts >= SEND_MAX_ATTEMPTS {
        return false;
    }
    let idx = (message.send_attempts.max(1) - 1) as usize;
    let delay = SEND_BACKOFF_SECONDS[idx.min(SEND_BACKOFF_SECONDS.len() - 1)];
    now() - attempted_at >= chrono::Duration::seconds(delay)
}

async fn send_one(config: &Config, store: &Store, message: &Message) -> anyhow::Result<()> {
    let sender = store.get_contact(message.sender_id).await?;
    let recipients = store.list_message_contacts(message.id).await?;

    let mut builder = LettreMessage::builder()
        .from(mailbox(&sender)?)
        .subject(&message.subject);

    let mut has_recipient = false;
    for (contact_id, role) in &recipients {
        let contact = store.get_contact(*contact_id).await?;
        let mb = mailbox(&contact)?;
        builder = match role {
            ContactRole::To => {
                has_recipient = true;
                builder.to(mb)
            }
            ContactRole::Cc => {
                has_recipient = true;
                builder.cc(mb)
            }
            ContactRole::Bcc => {
                has_recipient = true;
                builder.bcc(mb)
            }
            ContactRole::From => builder,
        };
    }
    if !has_recipient {
        anyhow::bail!("message {} has no recipients", message.id);
    }

    let local_message_id = format!("<{}@{}>", random_hex32(), config.local_domain());
    builder = builder.message_id(Some(local_message_id.clone()));
    if let Some(in_reply_to) = &message.in_reply_to {
        builder = builder.in_reply_to(in_reply_to.clone());
        builder = builder.references(in_reply_to.clone());
    }

    let (text_body, html_body) = quote_reply(store, message).await?;

    let attachments = store.list_attachments_by_message(message.id).await?;
    let body = if attachments.is_empty() {
        match &html_body {
            Some(html) => MultiPart::alternative_plain_html(text_body.clone(), html.clone()),
            None => MultiPart::mixed().singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(text_body.clone()),
            ),
        }
    } else {
        let mut mixed = MultiPart::mixed().multipart(match &html_body {
            Some(html) => MultiPart::alternative_plain_html(text_body.clone(), html.clone()),
            None => MultiPart::alternative().singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(text_body.clone()),
            ),
        });
        for att in attachments {
            let bytes = tokio::fs::read(&att.file_path).await?;
            let content_type = att
                .mime_type
                .as_deref()
                .and_then(|m| m.parse::<ContentType>().ok())
                .or_else(|| ContentType::parse("application/octet-stream").ok())
                .unwrap_or(ContentType::TEXT_PLAIN);
            mixed = mixed.singlepart(
                lettre::message::Attachment::new(att.filename.clone())
                    .body(bytes, content_type),
            );
        }
        mixed
    };

    let email = builder.multipart(body)?;

    let transport = build_transport(config)?;
    transport.send(email).await?;

    store
        .mark_message_sent(message.id, &local_message_id, now())
        .await?;
    Ok(())
}

fn mailbox(contact: &Contact) -> anyhow::Result<LettreMailbox> {
    let formatted = match &contact.name {
        Some(name) if !name.trim().is_empty() => format!("{name} <{}>", contact.email),
        _ => contact.email.clone(),
    };
    Ok(formatted.parse()?)
}

fn random_hex32() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn build_transport(config: &Config) -> anyhow::Result<AsyncSmtpTransport<Tokio1Executor>> {
    let creds = lettre::transport::smtp::authentication::Credentials::new(
        config.smtp_user.clone(),
        config.smtp_pass.clone(),
    );
    let builder = if config.smtp_secure {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
    };
    Ok(builder.port(config.smtp_port).credentials(creds).build())
}

/// Builds the quoted reply body. Text is `> `-prefixed with an attribution
/// line; HTML gets a matching blockquote. A message with no HTML of its own
/// whose original had one is promoted to a minimal HTML body so the quoted
/// thread still renders as one conversation.
async fn quote_reply(store: &Store, message: &Message) -> AppResult<(String, Option<String>)> {
    let Some(in_reply_to) = &message.in_reply_to else {
        return Ok((message.content_text.clone(), message.content_html.clone()));
    };
    let Some(original) = store.find_message_by_message_id(in_reply_to).await? else {
        return Ok((message.content_text.clone(), message.content_html.clone()));
    };
    let original_sender = store.get_contact(original.sender_id).await?;
    let display = original_sender
        .name
        .clone()
        .unwrap_or_else(|| original_sender.email.clone());
    let date = original
        .sent_at
        .unwrap_or(original.received_at)
        .format("%b %d, %Y at %H:%M");
    let attribution = format!("On {date}, {display} <{}> wrote:", original_sender.email);

    let quoted_text = original
        .content_text
        .lines()
        .map(|l| format!("> {l}"))
        .collect::<Vec<_>>()
        .join("\n");
    let text = format!("{}\n\n{attribution}\n{quoted_text}", message.content_text);

    let html = match (&message.content_html, &original.content_html) {
        (Some(new_html), _) => Some(format!(
            "{new_html}<br><br>{attribution}<blockquote>{}</blockquote>",
            original
                .content_html
                .clone()
                .unwrap_or_else(|| original.content_text.replace('\n', "<br>"))
        )),
        (None, Some(original_html)) => Some(format!(
            "<div>{}</div><br><br>{attribution}<blockquote>{original_html}</blockquote>",
            message.content_text.replace('\n', "<br>")
        )),
        (None, None) => None,
    };

    Ok((text, html))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageStatus;

    fn fixture(
        send_attempts: i64,
        last_send_attempt_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Message {
        Message {
            id: 1,
            thread_id: Some(1),
            sender_id: 1,
            message_id: None,
            in_reply_to: None,
            references: Vec::new(),
            subject: "hi".to_string(),
            content_text: "hi".to_string(),
            content_html: None,
            headers: serde_json::Value::Null,
            sent_at: None,
            received_at: now(),
            read_at: None,
            status: MessageStatus::Queued,
            folder: "outbox".to_string(),
            queued_at: Some(now()),
            send_attempts,
            last_send_attempt_at,
            last_send_error: None,
        }
    }

    #[test]
    fn never_attempted_is_due_immediately() {
        assert!(is_due(&fixture(0, None)));
    }

    #[test]
    fn recent_failure_is_not_due() {
        let m = fixture(1, Some(now()));
        assert!(!is_due(&m));
    }

    #[test]
    fn failure_past_its_backoff_window_is_due() {
        let attempted_at = now() - chrono::Duration::seconds(SEND_BACKOFF_SECONDS[0] + 1);
        assert!(is_due(&fixture(1, Some(attempted_at))));
    }

    #[test]
    fn exhausted_attempts_never_become_due_again() {
        let attempted_at = now() - chrono::Duration::days(365);
        assert!(!is_due(&fixture(SEND_MAX_ATTEMPTS, Some(attempted_at))));
    }
}
