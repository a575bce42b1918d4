use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One web search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

/// Default provider: no backend, every query comes back empty.
pub struct NoSearch;

#[async_trait]
impl SearchProvider for NoSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        warn!(query, "No search provider configured, returning no results");
        Ok(vec![])
    }
}
