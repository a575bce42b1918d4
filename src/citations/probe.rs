use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Liveness check for a citation URL.
#[async_trait]
pub trait LinkProbe: Send + Sync {
    /// Final status code after redirects. Transport failures are errors.
    async fn status(&self, url: &str) -> Result<u16>;
}

/// HEAD request over reqwest, following redirects.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent("Mozilla/5.0 (compatible; pra/0.1)")
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LinkProbe for HttpProbe {
    async fn status(&self, url: &str) -> Result<u16> {
        let resp = self.client.head(url).send().await?;
        Ok(resp.status().as_u16())
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Answers from a fixed table. Unknown URLs fail like a dead host.
    #[derive(Default)]
    pub struct MapProbe {
        statuses: HashMap<String, u16>,
        pub probed: Mutex<Vec<String>>,
    }

    impl MapProbe {
        pub fn new(entries: &[(&str, u16)]) -> Self {
            Self {
                statuses: entries.iter().map(|(u, s)| (u.to_string(), *s)).collect(),
                probed: Mutex::new(Vec::new()),
            }
        }

        pub fn probed(&self) -> Vec<String> {
            self.probed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LinkProbe for MapProbe {
        async fn status(&self, url: &str) -> Result<u16> {
            self.probed.lock().unwrap().push(url.to_string());
            match self.statuses.get(url) {
                Some(s) => Ok(*s),
                None => anyhow::bail!("dns error: failed to lookup address for {}", url),
            }
        }
    }
}
