use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::parse::string_field;
use crate::search::SearchHit;

/// Which side of the hypothesis an evidence agent argues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Supporting,
    Refuting,
}

impl Polarity {
    /// The key under which the model lists its claims.
    pub fn evidence_key(self) -> &'static str {
        match self {
            Polarity::Supporting => "supporting_evidence",
            Polarity::Refuting => "refuting_evidence",
        }
    }

    /// CSS class used by the report for this side.
    pub fn css_class(self) -> &'static str {
        match self {
            Polarity::Supporting => "support",
            Polarity::Refuting => "refute",
        }
    }
}

/// One external source backing a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl Citation {
    pub fn is_citable(&self) -> bool {
        !self.url.trim().is_empty()
    }

    /// Text shown in a blockquote: the quote, else the snippet.
    pub fn excerpt(&self) -> Option<&str> {
        self.quote
            .as_deref()
            .or(self.snippet.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    fn from_value(v: &Value) -> Option<Self> {
        if !v.is_object() {
            return None;
        }
        Some(Self {
            title: string_field(v, "title")
                .or_else(|| string_field(v, "name"))
                .unwrap_or_default(),
            url: string_field(v, "url")
                .or_else(|| string_field(v, "source_url"))
                .unwrap_or_default(),
            quote: string_field(v, "quote").filter(|s| !s.is_empty()),
            snippet: string_field(v, "snippet").filter(|s| !s.is_empty()),
        })
    }
}

impl From<SearchHit> for Citation {
    fn from(hit: SearchHit) -> Self {
        Self {
            title: hit.title,
            url: hit.url,
            quote: None,
            snippet: Some(hit.snippet),
        }
    }
}

/// A single claim with the URL it rests on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim: String,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub quote: Option<String>,
}

impl Claim {
    fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::String(s) => Some(Self {
                claim: s.clone(),
                source_url: None,
                quote: None,
            }),
            Value::Object(_) => Some(Self {
                claim: string_field(v, "claim")
                    .or_else(|| string_field(v, "risk"))
                    .or_else(|| string_field(v, "insight"))
                    .unwrap_or_default(),
                source_url: string_field(v, "source_url").filter(|s| !s.is_empty()),
                quote: string_field(v, "quote").filter(|s| !s.is_empty()),
            }),
            _ => None,
        }
    }
}

/// Output of one evidence agent. Produced once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceFindings {
    pub side: Polarity,
    pub claims: Vec<Claim>,
    pub sources: Vec<Citation>,
    /// Remaining model fields (trends, gaps, risks, competitor examples).
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl EvidenceFindings {
    /// Build findings from the model's object. When the model gave no
    /// `sources`, the raw search pool becomes the source list.
    pub fn from_model(side: Polarity, mut obj: Map<String, Value>, pool: &[SearchHit]) -> Self {
        let claims = match obj.remove(side.evidence_key()) {
            Some(Value::Array(items)) => items.iter().filter_map(Claim::from_value).collect(),
            Some(other) => Claim::from_value(&other).into_iter().collect(),
            None => Vec::new(),
        };

        let mut sources: Vec<Citation> = match obj.remove("sources") {
            Some(Value::Array(items)) => items.iter().filter_map(Citation::from_value).collect(),
            _ => Vec::new(),
        };
        if sources.is_empty() {
            sources = pool.iter().cloned().map(Citation::from).collect();
        }
        obj.remove("side");

        Self {
            side,
            claims,
            sources,
            details: obj,
        }
    }

    /// Claims whose `source_url` is not among the cited sources.
    pub fn orphan_claims(&self) -> Vec<&Claim> {
        self.claims
            .iter()
            .filter(|c| match &c.source_url {
                Some(url) => !self.sources.iter().any(|s| &s.url == url),
                None => true,
            })
            .collect()
    }

    pub fn to_prompt_json(&self, max_chars: usize) -> String {
        let json = serde_json::to_string_pretty(self).unwrap_or_default();
        crate::llm::preview(&json, max_chars).to_string()
    }
}
