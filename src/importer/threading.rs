//! Subject normalization for threading steps 2/3 (spec.md 4.C).

use once_cell::sync::Lazy;
use regex::Regex;

static REPLY_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(re|fwd|fw|aw|sv|vs|ref)(\[\d+\])?\s*:\s*").unwrap());

/// Strips repeated reply/forward prefixes and normalizes case/whitespace so
/// "Re: Re: [2]FW: lunch?" and "lunch?" compare equal.
pub fn normalize_subject(subject: &str) -> String {
    let mut s = subject.trim();
    loop {
        if let Some(m) = REPLY_PREFIX_RE.find(s) {
            if m.start() == 0 {
                s = s[m.end()..].trim();
                continue;
            }
        }
        break;
    }
    let normalized = s.to_lowercase();
    if normalized.is_empty() {
        "(no subject)".to_string()
    } else {
        normalized
    }
}

/// True if the raw subject carries a leading reply/forward prefix.
pub fn has_reply_prefix(subject: &str) -> bool {
    REPLY_PREFIX_RE.is_match(subject.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_single_prefix() {
        assert_eq!(normalize_subject("Re: lunch?"), "lunch?");
    }

    #[test]
    fn strips_repeated_and_numbered_prefixes() {
        assert_eq!(normalize_subject("Re: Re: [2]FW: lunch?"), "lunch?");
    }

    #[test]
    fn detects_reply_prefix() {
        assert!(has_reply_prefix("RE: hello"));
        assert!(!has_reply_prefix("hello"));
    }

    #[test]
    fn empty_subject_normalizes_to_placeholder() {
        assert_eq!(normalize_subject("  "), "(no subject)");
    }
}
