//! Recipient list cleanup for the email and messaging adapters
//!
//! Recipient lists arrive pasted from spreadsheets and forms: mixed separators,
//! JSON-ish brackets, quotes and invisible characters.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// International number, or a 9-digit national mobile/landline number.
static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\+[1-9]\d{7,14}|[6789]\d{8})$").expect("phone pattern compiles")
});

const SEPARATORS: [char; 6] = [',', ';', '|', '\n', '\r', '\t'];
const WRAPPERS: [char; 8] = ['"', '\'', '(', ')', '[', ']', '{', '}'];

fn strip_invisible(raw: &str) -> String {
    raw.replace(['\u{feff}', '\u{200b}'], "")
        .replace('\u{a0}', " ")
        .trim()
        .to_string()
}

fn split_entries(raw: &str) -> Vec<String> {
    let cleaned = strip_invisible(raw);
    if cleaned.is_empty() {
        return Vec::new();
    }

    let bracketed = (cleaned.starts_with('[') && cleaned.ends_with(']'))
        || (cleaned.starts_with('{') && cleaned.ends_with('}'));

    let parts: Vec<String> = if bracketed {
        cleaned
            .trim_matches(|c| matches!(c, '[' | ']' | '{' | '}'))
            .replace(['"', '\''], "")
            .split(',')
            .map(str::to_string)
            .collect()
    } else {
        cleaned.split(SEPARATORS).map(str::to_string).collect()
    };

    parts
        .into_iter()
        .map(|p| p.trim().trim_matches(WRAPPERS).trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn dedup(entries: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| seen.insert(e.clone()))
        .collect()
}

/// Normalize email recipients: split, unquote, lowercase, dedup (order kept).
pub fn clean_emails<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let entries = raw
        .iter()
        .flat_map(|r| split_entries(r.as_ref()))
        .map(|e| e.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
        .filter(|e| e.contains('@'))
        .collect();
    dedup(entries)
}

/// Normalize phone recipients: split, unquote, dedup (order kept).
///
/// Entries without a single digit are dropped; format validation is left to
/// [`normalize_phone`] so invalid entries can be reported.
pub fn clean_phones<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let entries = raw
        .iter()
        .flat_map(|r| split_entries(r.as_ref()))
        .filter(|e| e.chars().any(|c| c.is_ascii_digit()))
        .collect();
    dedup(entries)
}

/// Validate a cleaned phone entry and turn it into the digits-only form the
/// messaging API expects. National numbers get `default_country_code`.
pub fn normalize_phone(phone: &str, default_country_code: &str) -> Option<String> {
    let compact: String = phone
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    if !PHONE.is_match(&compact) {
        return None;
    }
    match compact.strip_prefix('+') {
        Some(international) => Some(international.to_string()),
        None => Some(format!("{}{}", default_country_code, compact)),
    }
}
