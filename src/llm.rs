use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::state::{AgentProfile, RunContext, TraceRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// The raw model call. Implementations do not retry; `CompletionClient` does.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn call(
        &self,
        system: &str,
        user: &str,
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;
}

/// OpenAI-compatible chat completions endpoint.
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl LlmClient {
    /// Build a client from `LLM_BASE_URL` / `LLM_API_KEY`.
    /// Returns `None` when no endpoint is configured.
    pub fn from_env() -> Result<Option<Self>> {
        let Some(base_url) = dotenv::var("LLM_BASE_URL").ok().filter(|u| !u.is_empty()) else {
            return Ok(None);
        };
        let api_key = dotenv::var("LLM_API_KEY").ok().filter(|k| !k.is_empty());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Some(Self {
            client,
            base_url,
            api_key,
        }))
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }
}

#[async_trait]
impl ModelBackend for LlmClient {
    async fn call(
        &self,
        system: &str,
        user: &str,
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let messages = [
            Message {
                role: "system".to_string(),
                content: system.to_string(),
            },
            Message {
                role: "user".to_string(),
                content: user.to_string(),
            },
        ];
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.context("LLM request failed")?;
        let status = resp.status();
        let text = resp.text().await.context("Failed to read LLM response")?;
        if !status.is_success() {
            anyhow::bail!("LLM endpoint returned {}: {}", status, preview(&text, 300));
        }
        let json: serde_json::Value =
            serde_json::from_str(&text).context("Failed to parse LLM JSON")?;

        // choices[0].message.content, null is an error here so the caller retries
        json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("LLM response had no message content"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("[{agent}] no model backend configured (set LLM_BASE_URL)")]
    NoBackend { agent: String },
    #[error("[{agent}] LLM call failed after {attempts} attempts: {last}")]
    Exhausted {
        agent: String,
        attempts: u32,
        last: String,
    },
    #[error("could not parse LLM output as JSON: {reason}\n\nRaw output:\n{raw}")]
    Malformed { reason: String, raw: String },
}

/// Attempt ceiling and exponential backoff schedule.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based): base * 2^(attempt-1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Per-agent completion client: bounded retries plus a trace record per success.
#[derive(Clone)]
pub struct CompletionClient {
    backend: Option<Arc<dyn ModelBackend>>,
    ctx: Arc<RunContext>,
    agent: &'static str,
    retry: RetryPolicy,
}

impl CompletionClient {
    pub fn new(
        backend: Option<Arc<dyn ModelBackend>>,
        ctx: Arc<RunContext>,
        agent: &'static str,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            ctx,
            agent,
            retry,
        }
    }

    pub fn agent(&self) -> &'static str {
        self.agent
    }

    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, CompletionError> {
        let Some(backend) = &self.backend else {
            return Err(CompletionError::NoBackend {
                agent: self.agent.to_string(),
            });
        };

        debug!(
            agent = self.agent,
            system = preview(system, 300),
            user = preview(user, 300),
            "PROMPT"
        );

        let attempts = self.retry.max_attempts.max(1);
        let mut last = String::new();
        for attempt in 1..=attempts {
            match backend.call(system, user, model, temperature, max_tokens).await {
                Ok(completion) => {
                    debug!(
                        agent = self.agent,
                        attempt,
                        completion = preview(&completion, 500),
                        "COMPLETION"
                    );
                    self.trace(system, user, &completion, model, temperature)
                        .await;
                    return Ok(completion);
                }
                Err(e) => {
                    last = format!("{:#}", e);
                    if attempt < attempts {
                        let wait = self.retry.delay_for(attempt);
                        warn!(
                            agent = self.agent,
                            attempt,
                            max_attempts = attempts,
                            error = %last,
                            wait_ms = wait.as_millis() as u64,
                            "LLM call failed, retrying"
                        );
                        tokio::time::sleep(wait).await;
                    } else {
                        warn!(agent = self.agent, attempt, error = %last, "LLM call failed");
                    }
                }
            }
        }

        Err(CompletionError::Exhausted {
            agent: self.agent.to_string(),
            attempts,
            last,
        })
    }

    /// Convenience wrapper using an agent profile's model and temperature.
    pub async fn complete_with(
        &self,
        profile: &AgentProfile,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, CompletionError> {
        self.complete(system, user, &profile.model, profile.temperature, max_tokens)
            .await
    }

    async fn trace(&self, system: &str, user: &str, completion: &str, model: &str, temperature: f32) {
        let record = TraceRecord {
            run_id: self.ctx.run_id.clone(),
            agent: self.agent.to_string(),
            model: model.to_string(),
            temperature,
            timestamp: Utc::now(),
            system_prompt_chars: system.chars().count(),
            user_prompt_chars: user.chars().count(),
            completion_chars: completion.chars().count(),
        };
        self.ctx.trace.append(&record).await;
    }
}

/// Char-safe prefix for log previews and prompt budgets.
pub fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Backend that replays a fixed script of replies, then repeats a fallback.
    pub struct ScriptedBackend {
        script: Mutex<VecDeque<Result<String, String>>>,
        fallback: Option<String>,
        pub calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedBackend {
        pub fn new(script: Vec<Result<String, String>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn replies(replies: &[&str]) -> Self {
            Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
        }

        pub fn with_fallback(mut self, reply: &str) -> Self {
            self.fallback = Some(reply.to_string());
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        async fn call(
            &self,
            system: &str,
            user: &str,
            _model: &str,
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(e)) => Err(anyhow::anyhow!(e)),
                None => self
                    .fallback
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("script exhausted")),
            }
        }
    }

    pub fn test_context(dir: &std::path::Path) -> Arc<RunContext> {
        Arc::new(RunContext::new("Test hypothesis", vec![], dir))
    }

    pub fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }
}
