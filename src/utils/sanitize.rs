//! Masks credential material in free text before it reaches the log.
//!
//! Remote error messages are surfaced unmodified to the caller, but the copy
//! that goes through `tracing` is passed through [`redact`] first.

const MASK: &str = "[REDACTED]";
const SECRET_KEYS: &[&str] = &["password", "passphrase", "privatekey", "private_key", "token"];

/// Replace `key=value` / `key: value` pairs with secret-looking keys and any
/// PEM private key block.
pub fn redact(text: &str) -> String {
    let without_pem = redact_pem_blocks(text);
    without_pem
        .split_inclusive(char::is_whitespace)
        .scan(false, |mask_next, token| {
            let trimmed = token.trim_end();
            let trailing = &token[trimmed.len()..];

            if *mask_next && !trimmed.is_empty() {
                *mask_next = false;
                return Some(format!("{MASK}{trailing}"));
            }

            Some(match split_pair(trimmed) {
                Some((key, sep, value)) if is_secret_key(key) => {
                    if value.is_empty() {
                        *mask_next = true;
                        format!("{key}{sep}{trailing}")
                    } else {
                        format!("{key}{sep}{MASK}{trailing}")
                    }
                }
                _ => token.to_string(),
            })
        })
        .collect()
}

fn split_pair(token: &str) -> Option<(&str, char, &str)> {
    let idx = token.find(['=', ':'])?;
    let sep = token[idx..].chars().next()?;
    Some((&token[..idx], sep, &token[idx + 1..]))
}

fn is_secret_key(key: &str) -> bool {
    let normalized = key.trim_matches(|c: char| !c.is_alphanumeric() && c != '_');
    let normalized = normalized.to_ascii_lowercase();
    SECRET_KEYS.iter().any(|secret| normalized == *secret)
}

fn redact_pem_blocks(text: &str) -> String {
    const BEGIN: &str = "-----BEGIN";
    const END_MARK: &str = "PRIVATE KEY-----";

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(BEGIN) {
        let Some(end_rel) = rest[start..].rfind(END_MARK) else {
            break;
        };
        let end = start + end_rel + END_MARK.len();
        // Only private keys, certificates are public
        if !rest[start..end].contains("PRIVATE KEY") {
            out.push_str(&rest[..end]);
            rest = &rest[end..];
            continue;
        }
        out.push_str(&rest[..start]);
        out.push_str(MASK);
        rest = &rest[end..];
    }
    out.push_str(rest);
    out
}
