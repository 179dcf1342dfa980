//! HTML body assembly for outgoing mail
//!
//! Bodies may carry layout preferences as HTML comments:
//! `<!-- PREF:INLINE_IMAGES -->` embeds image attachments in the body and
//! `<!-- PREF:IMG_SIZE:300px -->` sets their width. Both comments are removed
//! before sending. The footer is placed behind a marker comment so it is never
//! added twice, and inline images are inserted just above it.

use regex::Regex;
use std::sync::LazyLock;

use crate::format::{escape_html, looks_like_html};

pub const FOOTER_MARKER: &str = "<!-- EMAIL-FOOTER -->";
const DEFAULT_IMAGE_WIDTH: &str = "100%";

static INLINE_PREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*PREF:INLINE_IMAGES\s*-->").expect("inline pref pattern compiles")
});

static SIZE_PREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*PREF:IMG_SIZE:(.*?)\s*-->").expect("size pref pattern compiles")
});

static BODY_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</body>").expect("body close pattern compiles"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlinePreferences {
    pub inline_images: bool,
    pub image_width: String,
}

impl Default for InlinePreferences {
    fn default() -> Self {
        Self {
            inline_images: false,
            image_width: DEFAULT_IMAGE_WIDTH.to_string(),
        }
    }
}

/// HTML bodies pass through; plain text is escaped with newlines as `<br>`.
pub fn ensure_html(body: &str) -> String {
    if looks_like_html(body) {
        body.to_string()
    } else {
        format!("<div>{}</div>", escape_html(body).replace('\n', "<br>"))
    }
}

/// Read and strip the preference comments.
pub fn extract_preferences(html: &str) -> (String, InlinePreferences) {
    let mut prefs = InlinePreferences::default();
    let mut html = html.to_string();

    if INLINE_PREF.is_match(&html) {
        prefs.inline_images = true;
        html = INLINE_PREF.replace_all(&html, "").into_owned();
    }

    if let Some(width) = SIZE_PREF
        .captures(&html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|w| !w.is_empty())
    {
        prefs.image_width = width;
    }
    html = SIZE_PREF.replace_all(&html, "").into_owned();

    (html, prefs)
}

fn insert_before_body_close(html: &str, fragment: &str) -> String {
    match BODY_CLOSE.find(html) {
        Some(m) => format!("{}{}{}", &html[..m.start()], fragment, &html[m.start()..]),
        None => format!("{}{}", html, fragment),
    }
}

/// Append the footer unless the marker shows it is already there.
pub fn ensure_footer_once(html: &str, footer: &str) -> String {
    if html.contains(FOOTER_MARKER) {
        return html.to_string();
    }
    insert_before_body_close(html, &format!("<br><br>\n{}\n{}", FOOTER_MARKER, footer))
}

/// Insert `fragment` just above the footer, or at the end of the body without one.
pub fn insert_before_footer(html: &str, fragment: &str) -> String {
    if fragment.is_empty() {
        return html.to_string();
    }
    match html.find(FOOTER_MARKER) {
        Some(at) => format!("{}{}{}", &html[..at], fragment, &html[at..]),
        None => insert_before_body_close(html, fragment),
    }
}

pub fn inline_image_tag(content_id: &str, alt: &str, width: &str) -> String {
    format!(
        "<br><img src=\"cid:{}\" alt=\"{}\" style=\"width:{}; height:auto;\"><br>",
        content_id,
        escape_html(alt),
        escape_html(width)
    )
}
