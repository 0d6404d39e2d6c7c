use std::sync::LazyLock;

use regex::{Captures, Regex};

static RE_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").unwrap());

/// Decode HTML entities as GLPI stores them (`&#60;`, `&lt;`, `&amp;`, ...).
///
/// Decoding is a single left-to-right pass, so `&amp;lt;` becomes `&lt;`
/// and not `<`. Unknown named entities are left as-is.
pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }
    RE_ENTITY
        .replace_all(input, |caps: &Captures| {
            let entity = &caps[1];
            decode_one(entity).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn decode_one(entity: &str) -> Option<String> {
    if let Some(num) = entity.strip_prefix('#') {
        let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code).map(|c| c.to_string());
    }
    let c = match entity {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        _ => return None,
    };
    Some(c.to_string())
}

/// Canonical form used for body comparison: CRLF folded to LF, trailing
/// spaces stripped per line, outer whitespace trimmed.
pub fn normalize_body(input: &str) -> String {
    input
        .replace("\r\n", "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Lowercased, trimmed identity used as a lookup key for user names and
/// emails.
pub fn normalize_identity(input: &str) -> String {
    input.trim().to_lowercase()
}
