//! Text shaping applied before text leaves for a platform

use regex::Regex;
use std::sync::LazyLock;

const ELLIPSIS: char = '…';

static HASHTAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#[\p{L}\p{N}_]+").expect("hashtag pattern compiles"));

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[a-zA-Z!/][^>]*>").expect("html tag pattern compiles"));

/// Cut `text` to at most `limit` characters, ending in an ellipsis when cut.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    if limit == 0 {
        return String::new();
    }
    let mut cut: String = text.chars().take(limit - 1).collect();
    cut.truncate(cut.trim_end().len());
    cut.push(ELLIPSIS);
    cut
}

/// Drop every hashtag after the first `max`.
pub fn limit_hashtags(text: &str, max: usize) -> String {
    let mut seen = 0;
    let limited = HASHTAG.replace_all(text, |caps: &regex::Captures<'_>| {
        seen += 1;
        if seen <= max {
            caps[0].to_string()
        } else {
            String::new()
        }
    });
    if seen <= max {
        return text.to_string();
    }
    let collapsed: Vec<&str> = limited.split(' ').filter(|s| !s.is_empty()).collect();
    collapsed.join(" ").trim().to_string()
}

pub fn count_hashtags(text: &str) -> usize {
    HASHTAG.find_iter(text).count()
}

/// First non-empty line, for platforms that need a title or subject.
pub fn first_line(text: &str, limit: usize) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    truncate_chars(line, limit)
}

pub fn looks_like_html(text: &str) -> bool {
    HTML_TAG.is_match(text)
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Plain text to paragraphs: blank lines split paragraphs, single newlines become `<br>`.
pub fn text_to_paragraphs(text: &str) -> String {
    text.replace("\r\n", "\n")
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("<p>{}</p>", escape_html(p).replace('\n', "<br>")))
        .collect::<Vec<_>>()
        .join("\n")
}
