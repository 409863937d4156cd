//! Idempotent EML archival (spec.md 4.C): raw bytes prefixed with three
//! synthetic headers, written to `eml-backup/<folder>/<sanitized-id>.eml`.

use std::path::Path;

pub fn sanitize_for_path(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Writes the archival copy if it doesn't already exist. Returns `Ok(true)`
/// if a file was written, `Ok(false)` if it already existed.
pub fn archive(
    backup_dir: &Path,
    folder: &str,
    message_id: &str,
    uid: Option<u32>,
    flags: &[String],
    raw: &[u8],
) -> std::io::Result<bool> {
    let folder_dir = backup_dir.join(sanitize_for_path(folder));
    std::fs::create_dir_all(&folder_dir)?;

    let filename = format!("{}.eml", sanitize_for_path(message_id));
    let path = folder_dir.join(filename);
    if path.exists() {
        return Ok(false);
    }

    let mut out = Vec::with_capacity(raw.len() + 128);
    out.extend_from_slice(format!("X-Meremail-Folder: {folder}\r\n").as_bytes());
    out.extend_from_slice(
        format!(
            "X-Meremail-Uid: {}\r\n",
            uid.map(|u| u.to_string()).unwrap_or_default()
        )
        .as_bytes(),
    );
    out.extend_from_slice(format!("X-Meremail-Flags: {}\r\n", flags.join(" ")).as_bytes());
    out.extend_from_slice(raw);

    std::fs::write(&path, out)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_unsafe_characters() {
        assert_eq!(sanitize_for_path("abc/def:ghi"), "abc_def_ghi");
    }

    #[test]
    fn archive_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let wrote_first = archive(
            dir.path(),
            "INBOX",
            "abc@example.com",
            Some(42),
            &["\\Seen".to_string()],
            b"From: a@b.com\r\n\r\nhello",
        )
        .unwrap();
        assert!(wrote_first);

        let wrote_second = archive(
            dir.path(),
            "INBOX",
            "abc@example.com",
            Some(42),
            &["\\Seen".to_string()],
            b"From: a@b.com\r\n\r\nhello",
        )
        .unwrap();
        assert!(!wrote_second);
    }
}
