//! RFC 5322 bytes -> `ImportableMessage` (spec.md 4.B), generalized from the
//! teacher's MIME-walk/sanitize-for-display pass into canonical extraction
//! that the Importer consumes directly.

pub mod address;

use html2text::from_read;
use mailparse::{parse_mail, DispositionType, MailHeaderMap, ParsedMail};
use once_cell::sync::Lazy;
use regex::Regex;

use address::{parse_list, ParsedAddress};
use crate::errors::AppError;

#[derive(Debug, Clone)]
pub struct ImportableAttachment {
    pub filename: String,
    pub mime_type: String,
    pub content_id: Option<String>,
    pub is_inline: bool,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ImportableMessage {
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub from: Vec<ParsedAddress>,
    pub to: Vec<ParsedAddress>,
    pub cc: Vec<ParsedAddress>,
    pub bcc: Vec<ParsedAddress>,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
    pub sent_at: Option<chrono::DateTime<chrono::Utc>>,
    pub is_read: bool,
    pub is_sent: bool,
    pub is_junk: bool,
    pub delivered_to: Option<String>,
    pub attachments: Vec<ImportableAttachment>,
    pub headers: serde_json::Value,
}

static SENT_FOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(sent|sent items|sent mail|\[gmail\]/sent mail)$").unwrap());
static JUNK_FOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(junk|spam|\[gmail\]/spam)$").unwrap());

/// Parses raw RFC 5322 bytes into an `ImportableMessage`. Never panics on
/// malformed input; callers log and skip on `AppError::Parse`.
pub fn parse(raw: &[u8], folder: &str, flags: &[String]) -> Result<ImportableMessage, AppError> {
    let parsed = parse_mail(raw).map_err(|e| AppError::Parse(e.to_string()))?;

    let headers = &parsed.headers;
    let subject = headers
        .get_first_value("Subject")
        .map(|s| decode_subject(&s))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "(no subject)".to_string());

    let message_id = headers
        .get_first_value("Message-ID")
        .map(|v| strip_angle_brackets(&v));
    let in_reply_to = headers
        .get_first_value("In-Reply-To")
        .map(|v| strip_angle_brackets(&v));
    let references = headers
        .get_first_value("References")
        .map(|v| {
            v.split_whitespace()
                .map(strip_angle_brackets)
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let from = headers
        .get_first_value("From")
        .map(|v| parse_list(&v))
        .unwrap_or_default();
    let to = headers
        .get_first_value("To")
        .map(|v| parse_list(&v))
        .unwrap_or_default();
    let cc = headers
        .get_first_value("Cc")
        .map(|v| parse_list(&v))
        .unwrap_or_default();
    let bcc = headers
        .get_first_value("Bcc")
        .map(|v| parse_list(&v))
        .unwrap_or_default();

    let delivered_to = headers
        .get_first_value("X-PM-Original-To")
        .or_else(|| headers.get_first_value("X-PM-Known-Alias"))
        .or_else(|| headers.get_first_value("Delivered-To"));

    let sent_at = headers
        .get_first_value("Date")
        .and_then(|v| mailparse::dateparse(&v).ok())
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0));

    let is_read = flags.iter().any(|f| f.eq_ignore_ascii_case("\\Seen"));
    let is_sent = SENT_FOLDER_RE.is_match(folder);
    let is_junk = JUNK_FOLDER_RE.is_match(folder);

    let mut attachments = Vec::new();
    let text = extract_preferred_text(&parsed);
    let html = extract_html(&parsed);
    walk_attachments(&parsed, &mut attachments);

    let mut header_map = serde_json::Map::new();
    for h in headers.iter() {
        let key = h.get_key();
        let value = h.get_value();
        header_map
            .entry(key)
            .or_insert_with(|| serde_json::Value::String(value));
    }

    Ok(ImportableMessage {
        message_id,
        in_reply_to,
        references,
        from,
        to,
        cc,
        bcc,
        subject,
        text: text.unwrap_or_default(),
        html,
        sent_at,
        is_read: is_read || is_sent,
        is_sent,
        is_junk,
        delivered_to,
        attachments,
        headers: serde_json::Value::Object(header_map),
    })
}

fn decode_subject(raw: &str) -> String {
    mailparse::parse_header(format!("Subject: {raw}\r\n").as_bytes())
        .ok()
        .map(|(h, _)| h.get_value())
        .unwrap_or_else(|| raw.to_string())
}

fn strip_angle_brackets(raw: &str) -> String {
    raw.trim().trim_matches(&['<', '>'][..]).to_string()
}

fn extract_preferred_text(part: &ParsedMail) -> Option<String> {
    let mimetype = part.ctype.mimetype.to_ascii_lowercase();
    if part.subparts.is_empty() {
        if mimetype == "text/plain" {
            let body = part.get_body().ok()?;
            return Some(body);
        }
        if mimetype == "text/html" {
            let raw = part.get_body_raw().ok()?;
            return Some(html_to_text(&raw));
        }
        return None;
    }

    if mimetype.starts_with("multipart/alternative") {
        if let Some(p) = part
            .subparts
            .iter()
            .find(|p| p.ctype.mimetype.eq_ignore_ascii_case("text/plain"))
        {
            if let Some(t) = extract_preferred_text(p) {
                return Some(t);
            }
        }
        if let Some(p) = part
            .subparts
            .iter()
            .find(|p| p.ctype.mimetype.eq_ignore_ascii_case("text/html"))
        {
            if let Some(t) = extract_preferred_text(p) {
                return Some(t);
            }
        }
    }

    for child in &part.subparts {
        if let Some(t) = extract_preferred_text(child) {
            return Some(t);
        }
    }

    None
}

fn extract_html(part: &ParsedMail) -> Option<String> {
    let mimetype = part.ctype.mimetype.to_ascii_lowercase();
    if part.subparts.is_empty() {
        if mimetype == "text/html" {
            return part.get_body().ok();
        }
        return None;
    }
    for child in &part.subparts {
        if let Some(h) = extract_html(child) {
            return Some(h);
        }
    }
    None
}

fn html_to_text(raw: &[u8]) -> String {
    from_read(raw, 80).unwrap_or_default()
}

fn walk_attachments(part: &ParsedMail, out: &mut Vec<ImportableAttachment>) {
    if out.len() > 200 {
        return;
    }

    let disp = part.get_content_disposition();
    let filename = extract_filename(part);
    let content_id = part
        .headers
        .get_first_value("Content-ID")
        .map(|v| strip_angle_brackets(&v));
    let is_inline = matches!(disp.disposition, DispositionType::Inline) || content_id.is_some();

    let is_container = part.ctype.mimetype.starts_with("multipart/") && !part.subparts.is_empty();
    if !is_container
        && is_attachment_part(
            &part.ctype.mimetype,
            &disp.disposition,
            filename.as_deref(),
            content_id.as_deref(),
        )
    {
        if let Ok(bytes) = part.get_body_raw() {
            out.push(ImportableAttachment {
                filename: filename.unwrap_or_else(|| "attachment".to_string()),
                mime_type: part.ctype.mimetype.clone(),
                content_id,
                is_inline,
                bytes,
            });
        }
    }

    for child in &part.subparts {
        walk_attachments(child, out);
    }
}

fn extract_filename(part: &ParsedMail) -> Option<String> {
    let disp = part.get_content_disposition();
    let disp_name = disp
        .params
        .get("filename")
        .or_else(|| disp.params.get("name"))
        .cloned();
    let ctype_name = part
        .ctype
        .params
        .get("name")
        .or_else(|| part.ctype.params.get("filename"))
        .cloned();
    disp_name.or(ctype_name).and_then(|v| {
        let t = v.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn is_attachment_part(
    mimetype: &str,
    disposition: &DispositionType,
    filename: Option<&str>,
    content_id: Option<&str>,
) -> bool {
    if matches!(disposition, DispositionType::Attachment) {
        return true;
    }
    if filename.is_some() {
        return true;
    }
    if content_id.is_some() && !mimetype.starts_with("text/") {
        return true;
    }
    !mimetype.starts_with("text/") && !mimetype.starts_with("multipart/")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &[u8] = b"From: Alice <alice@example.com>\r\nTo: bob@example.com\r\nSubject: Hi\r\nMessage-ID: <abc@example.com>\r\nContent-Type: text/plain\r\n\r\nHello there\r\n";

    #[test]
    fn parses_simple_text_message() {
        let msg = parse(SIMPLE, "INBOX", &[]).unwrap();
        assert_eq!(msg.subject, "Hi");
        assert_eq!(msg.message_id.as_deref(), Some("abc@example.com"));
        assert_eq!(msg.from[0].email, "alice@example.com");
        assert!(msg.text.contains("Hello there"));
        assert!(!msg.is_read);
    }

    #[test]
    fn empty_subject_becomes_placeholder() {
        let raw = b"From: a@example.com\r\nTo: b@example.com\r\nContent-Type: text/plain\r\n\r\nbody\r\n";
        let msg = parse(raw, "INBOX", &[]).unwrap();
        assert_eq!(msg.subject, "(no subject)");
    }

    #[test]
    fn seen_flag_marks_read() {
        let msg = parse(SIMPLE, "INBOX", &["\\Seen".to_string()]).unwrap();
        assert!(msg.is_read);
    }

    #[test]
    fn sent_folder_detected_by_name() {
        let msg = parse(SIMPLE, "[Gmail]/Sent Mail", &[]).unwrap();
        assert!(msg.is_sent);
        assert!(msg.is_read);
    }

    #[test]
    fn malformed_bytes_do_not_panic() {
        let res = parse(b"not a valid mime message at all \x00\x01", "INBOX", &[]);
        assert!(res.is_ok() || matches!(res, Err(AppError::Parse(_))));
    }
}
