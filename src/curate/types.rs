use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agents::parse::{string_field, string_list};

/// A normalized input source. Quotes are trusted to be verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurationRecord {
    pub source_type: String,
    pub summary: String,
    pub key_data_points: Vec<String>,
    pub verbatim_quotes: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl CurationRecord {
    /// Lenient conversion of a curator reply. Missing fields stay empty.
    pub fn from_value(source_type: &str, value: &Value) -> Self {
        let metadata = match value.get("metadata") {
            Some(Value::Object(m)) => m.clone(),
            _ => Map::new(),
        };
        Self {
            source_type: string_field(value, "source_type")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| source_type.to_string()),
            summary: string_list(value.get("summary")).join(" "),
            key_data_points: string_list(value.get("key_data_points")),
            verbatim_quotes: string_list(value.get("verbatim_quotes")),
            metadata,
        }
    }

    /// Merge records in order under a new source type tag.
    pub fn merge(source_type: &str, records: &[CurationRecord]) -> Self {
        let summary = records
            .iter()
            .map(|r| r.summary.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let mut merged = Self {
            source_type: source_type.to_string(),
            summary,
            ..Default::default()
        };
        for r in records {
            merged.key_data_points.extend(r.key_data_points.iter().cloned());
            merged.verbatim_quotes.extend(r.verbatim_quotes.iter().cloned());
        }
        merged
    }

    /// Pretty JSON capped to `max_chars`, for prompt context.
    pub fn prompt_context(&self, max_chars: usize) -> String {
        let json = serde_json::to_string_pretty(self).unwrap_or_default();
        crate::llm::preview(&json, max_chars).to_string()
    }
}
