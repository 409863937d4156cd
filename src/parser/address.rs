//! Address parsing and normalization (spec.md 4.B).

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedAddress {
    pub email: String,
    pub name: Option<String>,
}

/// Parses a single "Display Name <addr@host>" or bare "addr@host" entry.
/// Lowercases the mailbox, trims/unquotes the display name, and treats a
/// display name equal case-insensitively to the local-part as absent.
pub fn parse_one(raw: &str) -> Option<ParsedAddress> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (name, addr) = if let Some(lt) = raw.rfind('<') {
        if let Some(gt) = raw[lt..].find('>') {
            let name = raw[..lt].trim();
            let addr = raw[lt + 1..lt + gt].trim();
            (Some(name), addr)
        } else {
            (None, raw)
        }
    } else {
        (None, raw)
    };

    let email = addr.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return None;
    }

    let name = name
        .map(|n| n.trim().trim_matches('"').trim())
        .filter(|n| !n.is_empty())
        .map(|n| n.to_string());

    let local_part = email.split('@').next().unwrap_or("");
    let name = name.filter(|n| !n.eq_ignore_ascii_case(local_part));

    Some(ParsedAddress { email, name })
}

/// Splits an address-list header value (comma-separated, respecting quoted
/// display names) and parses each entry.
pub fn parse_list(raw: &str) -> Vec<ParsedAddress> {
    split_respecting_quotes(raw)
        .iter()
        .filter_map(|s| parse_one(s))
        .collect()
}

fn split_respecting_quotes(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut depth = 0i32;

    for c in raw.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '<' if !in_quotes => {
                depth += 1;
                current.push(c);
            }
            '>' if !in_quotes => {
                depth -= 1;
                current.push(c);
            }
            ',' if !in_quotes && depth <= 0 => {
                out.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_display_name_and_mailbox() {
        let a = parse_one("Jane Doe <Jane@Example.com>").unwrap();
        assert_eq!(a.email, "jane@example.com");
        assert_eq!(a.name.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn treats_name_equal_to_local_part_as_absent() {
        let a = parse_one("jane <jane@example.com>").unwrap();
        assert_eq!(a.name, None);
    }

    #[test]
    fn splits_list_with_quoted_commas() {
        let list = parse_list(r#""Doe, Jane" <jane@example.com>, bob@example.com"#);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].email, "jane@example.com");
        assert_eq!(list[1].email, "bob@example.com");
    }

    #[test]
    fn rejects_addresses_without_at_sign() {
        assert!(parse_one("not-an-email").is_none());
    }
}
