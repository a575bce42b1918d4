use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

use crate::report::{escape_html, unescape_html};

static HREF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"href="([^"]*)""#).unwrap());
static ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<a\s([^>]*)>(.*?)</a>").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Asset hosts that never count as citations.
pub const ASSET_DENYLIST: [&str; 6] = [
    "fonts.googleapis.com",
    "fonts.gstatic.com",
    "ajax.googleapis.com",
    "cdnjs.cloudflare.com",
    "cdn.jsdelivr.net",
    "unpkg.com",
];

pub const UNVERIFIED_ATTR: &str = r#"data-citation="unverified""#;
pub const UNVERIFIED_MARK: &str = " (Unverified)";

/// One unique external link found in a report.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    /// Attribute text exactly as it appears in the markup.
    pub raw: String,
    /// `raw` with entities decoded, the address to probe.
    pub url: String,
    /// Text of the first anchor pointing at this link.
    pub anchor_text: Option<String>,
    /// Some anchor for this link was already annotated by an earlier pass.
    pub unverified: bool,
}

pub fn is_asset(url: &str) -> bool {
    host(url).is_some_and(|h| {
        ASSET_DENYLIST
            .iter()
            .any(|d| h == *d || h.ends_with(&format!(".{}", d)))
    })
}

fn host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
}

fn attr_href(attrs: &str) -> Option<&str> {
    HREF_RE.captures(attrs).and_then(|c| c.get(1)).map(|m| m.as_str())
}

fn anchor_text(inner: &str) -> String {
    let text = TAG_RE.replace_all(inner, "");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Unique external links in first-seen order, assets excluded.
pub fn extract_links(html: &str) -> Vec<Link> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for cap in HREF_RE.captures_iter(html) {
        let raw = &cap[1];
        let url = unescape_html(raw);
        if !(url.starts_with("http://") || url.starts_with("https://")) || is_asset(&url) {
            continue;
        }
        if !seen.insert(raw.to_string()) {
            continue;
        }
        links.push(Link {
            raw: raw.to_string(),
            url,
            anchor_text: None,
            unverified: false,
        });
    }

    for cap in ANCHOR_RE.captures_iter(html) {
        let attrs = &cap[1];
        let Some(href) = attr_href(attrs) else {
            continue;
        };
        let Some(link) = links.iter_mut().find(|l| l.raw == href) else {
            continue;
        };
        if attrs.contains(UNVERIFIED_ATTR) {
            link.unverified = true;
        }
        if link.anchor_text.is_none() {
            let text = anchor_text(&cap[2]);
            if !text.is_empty() {
                link.anchor_text = Some(text);
            }
        }
    }

    links
}

/// Point every `href` at `from` to `to` instead. `to` is a plain URL.
pub fn replace_target(html: &str, from_raw: &str, to: &str) -> String {
    let from_attr = format!(r#"href="{}""#, from_raw);
    let to_attr = format!(r#"href="{}""#, escape_html(to));
    html.replace(&from_attr, &to_attr)
}

/// Tag every anchor targeting `raw` as unverified and append the visible
/// marker to its text. Anchors already tagged are left alone.
pub fn annotate_unverified(html: &str, raw: &str) -> String {
    ANCHOR_RE
        .replace_all(html, |cap: &Captures| {
            let attrs = &cap[1];
            if attr_href(attrs) != Some(raw) || attrs.contains(UNVERIFIED_ATTR) {
                return cap[0].to_string();
            }
            format!(
                "<a {} {}>{}{}</a>",
                attrs.trim_end(),
                UNVERIFIED_ATTR,
                &cap[2],
                UNVERIFIED_MARK
            )
        })
        .into_owned()
}
