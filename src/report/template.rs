use std::collections::HashSet;
use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::agents::analyst::{SynthesisRecord, Tier};
use crate::agents::findings::{Citation, EvidenceFindings};

use super::Narrative;

pub const FONT_URL: &str =
    "https://fonts.googleapis.com/css2?family=Inter:wght@400;600;700&display=swap";

pub const MAX_QUOTES_PER_SECTION: usize = 3;

pub const STYLESHEET: &str = r#"
:root { --ink: #1d2433; --muted: #5b6478; --line: #e3e7ef; --bg: #f6f8fb; --accent: #2f5bea; }
* { box-sizing: border-box; }
body { margin: 0; font-family: 'Inter', system-ui, sans-serif; color: var(--ink); background: var(--bg); display: flex; }
nav.sidebar { position: sticky; top: 0; height: 100vh; width: 220px; padding: 24px 16px; background: #fff; border-right: 1px solid var(--line); }
nav.sidebar a { display: block; padding: 6px 8px; color: var(--muted); text-decoration: none; border-radius: 6px; }
nav.sidebar a:hover { background: var(--bg); color: var(--ink); }
main { flex: 1; max-width: 960px; padding: 32px 40px; }
section { background: #fff; border: 1px solid var(--line); border-radius: 10px; padding: 20px 24px; margin: 20px 0; }
h1 { margin: 8px 0; font-size: 26px; }
h2 { margin-top: 0; font-size: 19px; }
.banner { border-radius: 12px; padding: 24px 28px; color: #fff; }
.banner .tier { font-size: 13px; font-weight: 700; letter-spacing: .08em; }
.banner .meta { font-size: 12px; opacity: .85; }
.tier-strong-build { background: #137a4b; }
.tier-build-mvp { background: #2f5bea; }
.tier-re-evaluate { background: #b7791f; }
.tier-deprioritize { background: #a23b3b; }
.cards { display: grid; grid-template-columns: repeat(auto-fill, minmax(260px, 1fr)); gap: 12px; }
.card { border: 1px solid var(--line); border-left: 4px solid var(--accent); border-radius: 8px; padding: 12px 14px; }
.card.support { border-left-color: #137a4b; }
.card.refute { border-left-color: #a23b3b; }
.card .source { font-size: 12px; }
table { width: 100%; border-collapse: collapse; font-size: 14px; }
th, td { text-align: left; padding: 8px 10px; border-bottom: 1px solid var(--line); vertical-align: top; }
ol.tree li { margin: 8px 0; }
ol.tree .answer { font-weight: 600; }
blockquote { margin: 12px 0; padding: 8px 14px; border-left: 3px solid var(--line); color: var(--muted); }
blockquote cite { display: block; margin-top: 4px; font-size: 12px; font-style: normal; }
.sources-grid { display: grid; grid-template-columns: 1fr 1fr; gap: 24px; font-size: 14px; }
a { color: var(--accent); }
a[data-citation="unverified"] { color: #a23b3b; text-decoration: line-through dotted; }
"#;

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_html`]. Unknown entities pass through untouched.
pub fn unescape_html(text: &str) -> String {
    const ENTITIES: [(&str, char); 6] = [
        ("&amp;", '&'),
        ("&lt;", '<'),
        ("&gt;", '>'),
        ("&quot;", '"'),
        ("&#39;", '\''),
        ("&#x27;", '\''),
    ];
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find('&') {
        out.push_str(&rest[..at]);
        rest = &rest[at..];
        match ENTITIES.iter().find(|(entity, _)| rest.starts_with(entity)) {
            Some((entity, c)) => {
                out.push(*c);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Lowercase, collapse non-alphanumeric runs to `-`, cap at `max_len`.
pub fn slugify(text: &str, max_len: usize) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    let slug: String = slug.chars().take(max_len).collect();
    slug.trim_matches('-').to_string()
}

pub fn report_file_name(date: DateTime<Utc>, hypothesis: &str, short_id: &str, slug_len: usize) -> String {
    let slug = slugify(hypothesis, slug_len);
    let slug = if slug.is_empty() { "report".to_string() } else { slug };
    format!("{}_{}_{}.html", date.format("%Y-%m-%d"), slug, short_id)
}

fn tier_class(tier: Tier) -> String {
    format!("tier-{}", tier.as_str().to_lowercase().replace('_', "-"))
}

pub(crate) fn external_link(url: &str, text: &str) -> String {
    format!(
        r#"<a href="{}" target="_blank" rel="noopener noreferrer">{}</a>"#,
        escape_html(url),
        escape_html(text)
    )
}

fn source_title<'a>(findings: &'a EvidenceFindings, url: &'a str) -> &'a str {
    findings
        .sources
        .iter()
        .find(|s| s.url == url && !s.title.trim().is_empty())
        .map(|s| s.title.as_str())
        .unwrap_or(url)
}

fn evidence_cards(findings: &EvidenceFindings) -> String {
    let mut html = String::from(r#"<div class="cards">"#);
    for claim in findings.claims.iter().filter(|c| !c.claim.trim().is_empty()) {
        let _ = write!(
            html,
            r#"<div class="card {}"><p>{}</p>"#,
            findings.side.css_class(),
            escape_html(&claim.claim)
        );
        if let Some(url) = claim.source_url.as_deref().filter(|u| !u.trim().is_empty()) {
            let _ = write!(
                html,
                r#"<p class="source">{}</p>"#,
                external_link(url, source_title(findings, url))
            );
        }
        html.push_str("</div>");
    }
    html.push_str("</div>");
    html
}

fn blockquotes(sources: &[Citation]) -> String {
    sources
        .iter()
        .filter(|s| s.is_citable())
        .filter_map(|s| s.excerpt().map(|e| (s, e)))
        .take(MAX_QUOTES_PER_SECTION)
        .map(|(s, excerpt)| {
            let title = if s.title.trim().is_empty() { &s.url } else { &s.title };
            format!(
                "<blockquote>&ldquo;{}&rdquo;<cite>{}</cite></blockquote>",
                escape_html(excerpt),
                external_link(&s.url, title)
            )
        })
        .collect()
}

fn micro_macro_table(synthesis: &SynthesisRecord) -> String {
    let mut html = String::from(
        "<table><thead><tr><th>Micro (user)</th><th>Macro (market)</th><th>Insight</th></tr></thead><tbody>",
    );
    for p in &synthesis.micro_macro_pairs {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&p.micro),
            escape_html(&p.macro_trend),
            escape_html(&p.insight)
        );
    }
    html.push_str("</tbody></table>");
    html
}

fn decision_steps(synthesis: &SynthesisRecord) -> String {
    let mut html = String::from(r#"<ol class="tree">"#);
    for step in &synthesis.decision_tree_path {
        let _ = write!(
            html,
            r#"<li>{} <span class="answer">{}</span></li>"#,
            escape_html(&step.question),
            escape_html(&step.answer)
        );
    }
    let _ = write!(
        html,
        r#"<li>Outcome: <span class="answer">{}</span></li></ol>"#,
        synthesis.tier
    );
    html
}

fn source_list(heading: &str, findings: &EvidenceFindings) -> String {
    let mut seen = HashSet::new();
    let mut html = format!("<div><h3>{}</h3><ul>", heading);
    for s in findings.sources.iter().filter(|s| s.is_citable()) {
        if !seen.insert(s.url.as_str()) {
            continue;
        }
        let title = if s.title.trim().is_empty() { &s.url } else { &s.title };
        let _ = write!(html, "<li>{}</li>", external_link(&s.url, title));
    }
    html.push_str("</ul></div>");
    html
}

/// Everything the fixed skeleton needs.
pub struct Page<'a> {
    pub hypothesis: &'a str,
    pub run_id: &'a str,
    pub generated_at: DateTime<Utc>,
    pub synthesis: &'a SynthesisRecord,
    pub supporting: &'a EvidenceFindings,
    pub refuting: &'a EvidenceFindings,
    pub narrative: &'a Narrative,
}

const NAV: [(&str, &str); 7] = [
    ("summary", "Executive Summary"),
    ("supporting", "Supporting Evidence"),
    ("skeptic", "Skeptic Analysis"),
    ("micro-macro", "Micro / Macro"),
    ("decision-tree", "Decision Tree"),
    ("recommendation", "Recommendation"),
    ("sources", "Sources"),
];

pub fn assemble(page: &Page<'_>) -> String {
    let n = page.narrative;
    let hypothesis = escape_html(page.hypothesis);
    let mut html = String::with_capacity(16 * 1024);

    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Product Research: {hypothesis}</title>
<link href="{font}" rel="stylesheet">
<style>{style}</style>
</head>
<body>
<nav class="sidebar">"#,
        font = escape_html(FONT_URL),
        style = STYLESHEET,
    );
    for (id, label) in NAV {
        let _ = write!(html, r##"<a href="#{}">{}</a>"##, id, label);
    }
    html.push_str("</nav>\n<main>\n");

    let _ = write!(
        html,
        r#"<header class="banner {class}"><div class="tier">{tier}</div><h1>{hypothesis}</h1><p>{desc}</p><p class="meta">Run {run_id} &middot; {ts}</p></header>
"#,
        class = tier_class(page.synthesis.tier),
        tier = page.synthesis.tier,
        desc = page.synthesis.tier.description(),
        run_id = escape_html(page.run_id),
        ts = page.generated_at.format("%Y-%m-%d %H:%M UTC"),
    );

    let _ = write!(
        html,
        "<section id=\"summary\"><h2>Executive Summary</h2>{}</section>\n",
        n.executive_summary
    );
    let _ = write!(
        html,
        "<section id=\"supporting\"><h2>Supporting Evidence</h2>{}{}{}</section>\n",
        n.supporting_section,
        evidence_cards(page.supporting),
        blockquotes(&page.supporting.sources)
    );
    let _ = write!(
        html,
        "<section id=\"skeptic\"><h2>Skeptic Analysis</h2>{}{}{}</section>\n",
        n.skeptic_section,
        evidence_cards(page.refuting),
        blockquotes(&page.refuting.sources)
    );
    let _ = write!(
        html,
        "<section id=\"micro-macro\"><h2>Micro / Macro Analysis</h2>{}{}</section>\n",
        n.micro_macro_section,
        micro_macro_table(page.synthesis)
    );
    let _ = write!(
        html,
        "<section id=\"decision-tree\"><h2>Decision Tree</h2>{}{}</section>\n",
        n.decision_tree_section,
        decision_steps(page.synthesis)
    );
    let _ = write!(
        html,
        "<section id=\"recommendation\"><h2>Recommendation</h2>{}<p><strong>{}</strong></p></section>\n",
        n.recommendation_section,
        escape_html(&page.synthesis.final_recommendation)
    );
    let _ = write!(
        html,
        "<section id=\"sources\"><h2>Sources</h2><div class=\"sources-grid\">{}{}</div></section>\n",
        source_list("Supporting", page.supporting),
        source_list("Skeptic", page.refuting)
    );

    html.push_str("</main>\n</body>\n</html>\n");
    html
}
