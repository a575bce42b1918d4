pub mod links;
pub mod probe;

use std::path::Path;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::report::Report;
use crate::search::SearchProvider;
use links::Link;
use probe::LinkProbe;

static HOMEPAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^https?://[^/]+/?$").unwrap());

/// Result of checking a single URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Valid(u16),
    /// Bare domain root, not a citable deep link.
    Homepage,
    HttpError(u16),
    NetworkError(String),
}

impl LinkStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, LinkStatus::Valid(_))
    }

    pub fn reason(&self) -> String {
        match self {
            LinkStatus::Valid(_) => "OK".to_string(),
            LinkStatus::Homepage => "HOMEPAGE_LINK".to_string(),
            LinkStatus::HttpError(code) => format!("HTTP_{}", code),
            LinkStatus::NetworkError(msg) => msg.clone(),
        }
    }
}

/// What the validator did about a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Unchanged,
    Repaired,
    Unverified,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub url: String,
    pub valid: bool,
    pub reason: String,
    pub replacement: Option<String>,
    pub resolution: Resolution,
}

pub fn is_homepage(url: &str) -> bool {
    HOMEPAGE_RE.is_match(url)
}

enum Patch {
    Replace { raw: String, to: String },
    Annotate { raw: String },
}

/// Checks every citation in a rendered report and repairs or flags the
/// broken ones. Runs single-threaded over the finished markup.
pub struct CitationValidator {
    search: Arc<dyn SearchProvider>,
    probe: Arc<dyn LinkProbe>,
}

impl CitationValidator {
    pub fn new(search: Arc<dyn SearchProvider>, probe: Arc<dyn LinkProbe>) -> Self {
        Self { search, probe }
    }

    pub async fn classify(&self, url: &str) -> LinkStatus {
        if is_homepage(url) {
            return LinkStatus::Homepage;
        }
        match self.probe.status(url).await {
            Ok(code) if (200..400).contains(&code) => LinkStatus::Valid(code),
            Ok(code) => LinkStatus::HttpError(code),
            Err(e) => LinkStatus::NetworkError(e.to_string()),
        }
    }

    /// First search result that itself classifies as valid.
    async fn repair(&self, link: &Link) -> Option<String> {
        let subject = link.anchor_text.as_deref().unwrap_or(&link.url);
        let query = format!("{} article research", subject);
        let hits = match self.search.search(&query).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(query = %query, error = %e, "Repair search failed");
                return None;
            }
        };
        for hit in hits {
            let candidate = hit.url.trim();
            if candidate.is_empty() || candidate == link.url {
                continue;
            }
            let status = self.classify(candidate).await;
            debug!(candidate, reason = %status.reason(), "Repair candidate checked");
            if status.is_valid() {
                return Some(candidate.to_string());
            }
        }
        None
    }

    pub async fn validate_and_fix(&self, report: &mut Report) -> Vec<ValidationOutcome> {
        let links = links::extract_links(&report.html);
        info!(count = links.len(), "Validating citation links");

        let mut outcomes = Vec::with_capacity(links.len());
        let mut patches = Vec::new();

        for link in &links {
            if link.unverified {
                outcomes.push(ValidationOutcome {
                    url: link.url.clone(),
                    valid: false,
                    reason: "PREVIOUSLY_UNVERIFIED".to_string(),
                    replacement: None,
                    resolution: Resolution::Unchanged,
                });
                continue;
            }

            let status = self.classify(&link.url).await;
            if status.is_valid() {
                outcomes.push(ValidationOutcome {
                    url: link.url.clone(),
                    valid: true,
                    reason: status.reason(),
                    replacement: None,
                    resolution: Resolution::Unchanged,
                });
                continue;
            }

            warn!(url = %link.url, reason = %status.reason(), "Broken citation");
            let (replacement, resolution) = match self.repair(link).await {
                Some(to) => {
                    info!(from = %link.url, to = %to, "Citation repaired");
                    patches.push(Patch::Replace {
                        raw: link.raw.clone(),
                        to: to.clone(),
                    });
                    (Some(to), Resolution::Repaired)
                }
                None => {
                    patches.push(Patch::Annotate {
                        raw: link.raw.clone(),
                    });
                    (None, Resolution::Unverified)
                }
            };
            outcomes.push(ValidationOutcome {
                url: link.url.clone(),
                valid: false,
                reason: status.reason(),
                replacement,
                resolution,
            });
        }

        for patch in patches {
            report.html = match patch {
                Patch::Replace { raw, to } => links::replace_target(&report.html, &raw, &to),
                Patch::Annotate { raw } => links::annotate_unverified(&report.html, &raw),
            };
        }

        let count = |r: Resolution| outcomes.iter().filter(|o| o.resolution == r).count();
        info!(
            checked = outcomes.len(),
            valid = outcomes.iter().filter(|o| o.valid).count(),
            repaired = count(Resolution::Repaired),
            unverified = count(Resolution::Unverified),
            "Citation validation complete"
        );
        outcomes
    }

    /// Validate a report on disk, writing it back only if something changed.
    pub async fn validate_file(&self, path: &Path) -> Result<Vec<ValidationOutcome>> {
        let html = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read report {}", path.display()))?;
        let mut report = Report { html };
        let before = report.html.clone();
        let outcomes = self.validate_and_fix(&mut report).await;
        if report.html != before {
            tokio::fs::write(path, &report.html)
                .await
                .with_context(|| format!("Failed to write report {}", path.display()))?;
            info!(path = %path.display(), "Report updated with citation fixes");
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::testing::{hit, BrokenSearch, FixedSearch};
    use probe::testing::MapProbe;

    fn report(body: &str) -> Report {
        Report {
            html: format!(
                r#"<html><head><link href="https://fonts.googleapis.com/css2?family=Inter" rel="stylesheet"></head><body>{}</body></html>"#,
                body
            ),
        }
    }

    const SKIFT: &str = r#"<p>Per <a href="https://www.skift.com/" target="_blank">Skift Report</a>.</p>
<ul class="sources"><li><a href="https://www.skift.com/" target="_blank">Skift Report</a></li></ul>"#;

    #[test]
    fn test_homepage_pattern() {
        assert!(is_homepage("https://www.skift.com/"));
        assert!(is_homepage("http://example.com"));
        assert!(!is_homepage("https://example.com/travel-trends-2024"));
        assert!(!is_homepage("https://example.com//"));
    }

    #[tokio::test]
    async fn test_classify_statuses() {
        let probe = Arc::new(MapProbe::new(&[
            ("https://a.example/ok", 200),
            ("https://a.example/moved", 301),
            ("https://a.example/gone", 404),
            ("https://a.example/", 200),
        ]));
        let v = CitationValidator::new(Arc::new(FixedSearch::empty()), probe.clone());

        assert_eq!(v.classify("https://a.example/ok").await, LinkStatus::Valid(200));
        assert_eq!(v.classify("https://a.example/moved").await, LinkStatus::Valid(301));
        assert_eq!(v.classify("https://a.example/gone").await.reason(), "HTTP_404");
        // reachable, still rejected
        assert_eq!(v.classify("https://a.example/").await, LinkStatus::Homepage);
        let net = v.classify("https://dead.example/x").await;
        assert!(matches!(net, LinkStatus::NetworkError(_)));
        assert!(net.reason().contains("dns error"));
        assert!(!probe.probed().contains(&"https://a.example/".to_string()));
    }

    #[tokio::test]
    async fn test_homepage_without_repair_is_annotated() {
        let search = Arc::new(FixedSearch::empty());
        let probe = Arc::new(MapProbe::default());
        let v = CitationValidator::new(search.clone(), probe.clone());
        let mut doc = report(SKIFT);

        let outcomes = v.validate_and_fix(&mut doc).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].reason, "HOMEPAGE_LINK");
        assert_eq!(outcomes[0].resolution, Resolution::Unverified);
        assert_eq!(search.queries(), vec!["Skift Report article research"]);
        assert!(probe.probed().is_empty());
        assert_eq!(doc.html.matches(r#"data-citation="unverified""#).count(), 2);
        assert_eq!(doc.html.matches("Skift Report (Unverified)").count(), 2);
        assert_eq!(doc.html.matches(r#"href="https://www.skift.com/""#).count(), 2);
    }

    #[tokio::test]
    async fn test_second_pass_is_noop() {
        let search = Arc::new(FixedSearch::empty());
        let v = CitationValidator::new(search.clone(), Arc::new(MapProbe::default()));
        let mut doc = report(SKIFT);
        v.validate_and_fix(&mut doc).await;
        let first = doc.html.clone();

        let outcomes = v.validate_and_fix(&mut doc).await;
        assert_eq!(doc.html, first);
        assert_eq!(outcomes[0].resolution, Resolution::Unchanged);
        assert_eq!(search.queries().len(), 1);
    }

    #[tokio::test]
    async fn test_broken_link_repaired_with_first_valid_candidate() {
        let search = Arc::new(FixedSearch::new(vec![
            hit("Home", "https://news.example/", ""),
            hit("Same", "https://news.example/old", ""),
            hit("Dead", "https://news.example/dead", ""),
            hit("Good", "https://news.example/2024/study", ""),
            hit("Later", "https://news.example/later", ""),
        ]));
        let probe = Arc::new(MapProbe::new(&[
            ("https://news.example/old", 404),
            ("https://news.example/dead", 500),
            ("https://news.example/2024/study", 200),
            ("https://news.example/later", 200),
        ]));
        let v = CitationValidator::new(search.clone(), probe);
        let mut doc = report(r#"<a href="https://news.example/old">Travel Study</a> and <a href="https://news.example/old">again</a>"#);

        let outcomes = v.validate_and_fix(&mut doc).await;

        assert_eq!(outcomes[0].reason, "HTTP_404");
        assert_eq!(outcomes[0].resolution, Resolution::Repaired);
        assert_eq!(outcomes[0].replacement.as_deref(), Some("https://news.example/2024/study"));
        assert_eq!(search.queries(), vec!["Travel Study article research"]);
        assert!(!doc.html.contains("news.example/old"));
        assert_eq!(doc.html.matches("https://news.example/2024/study").count(), 2);

        let again = v.validate_and_fix(&mut doc).await;
        assert!(again[0].valid);
        assert_eq!(search.queries().len(), 1);
    }

    #[tokio::test]
    async fn test_valid_links_untouched() {
        let probe = Arc::new(MapProbe::new(&[("https://example.com/travel-trends-2024", 200)]));
        let v = CitationValidator::new(Arc::new(BrokenSearch), probe);
        let mut doc = report(r#"<a href="https://example.com/travel-trends-2024">Travel Trends 2024</a>"#);
        let before = doc.html.clone();
        let outcomes = v.validate_and_fix(&mut doc).await;
        assert_eq!(doc.html, before);
        assert!(outcomes[0].valid);
        assert_eq!(outcomes[0].reason, "OK");
    }

    #[tokio::test]
    async fn test_escaped_apostrophe_url_is_probed_as_written() {
        let url = "https://en.wikipedia.org/wiki/Schindler's_List";
        let probe = Arc::new(MapProbe::new(&[(url, 200)]));
        let search = Arc::new(FixedSearch::empty());
        let v = CitationValidator::new(search.clone(), probe.clone());
        let mut doc = report(&crate::report::template::external_link(url, "Schindler's List"));
        assert!(doc.html.contains("Schindler&#39;s_List"));
        let before = doc.html.clone();

        let outcomes = v.validate_and_fix(&mut doc).await;

        assert_eq!(probe.probed(), vec![url.to_string()]);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].valid);
        assert_eq!(outcomes[0].resolution, Resolution::Unchanged);
        assert!(search.queries().is_empty());
        assert_eq!(doc.html, before);
    }

    #[tokio::test]
    async fn test_failed_repair_search_annotates() {
        let v = CitationValidator::new(Arc::new(BrokenSearch), Arc::new(MapProbe::default()));
        let mut doc = report(r#"<a href="https://gone.example/page">Gone</a>"#);
        let outcomes = v.validate_and_fix(&mut doc).await;
        assert_eq!(outcomes[0].resolution, Resolution::Unverified);
        assert!(doc.html.contains("Gone (Unverified)"));
    }

    #[tokio::test]
    async fn test_validate_file_writes_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.html");
        std::fs::write(&path, report(SKIFT).html).unwrap();

        let v = CitationValidator::new(Arc::new(FixedSearch::empty()), Arc::new(MapProbe::default()));
        let outcomes = v.validate_file(&path).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("Skift Report (Unverified)"));

        assert!(v.validate_file(&dir.path().join("missing.html")).await.is_err());
    }
}
