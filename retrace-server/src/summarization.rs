//! Periodic summarization of recently extracted text. The backend is an
//! external collaborator behind a trait; failures are logged and the next
//! cycle tries again.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use retrace_events::{EventBus, RetraceEvent};
use retrace_storage::ReconcilingIndex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const SUMMARY_INTERVAL: Duration = Duration::from_secs(30 * 60);
/// Windows overlap by ten minutes so text enriched late still gets covered.
pub const SUMMARY_LOOKBACK_MINUTES: i64 = 40;

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String>;
}

/// One summarization pass over the lookback window ending at `now`.
pub async fn run_summary_cycle(
    summarizer: &dyn Summarizer,
    index: &ReconcilingIndex,
    bus: &EventBus,
    now: DateTime<Utc>,
) {
    let start = now - ChronoDuration::minutes(SUMMARY_LOOKBACK_MINUTES);
    let text = index.recent_text_since(start);
    if text.trim().is_empty() {
        debug!("no extracted text in window, skipping summary");
        return;
    }

    match summarizer.summarize(&text).await {
        Ok(summary) if !summary.trim().is_empty() => {
            let id = index.add_summary(start, now, summary);
            info!(%id, "summary recorded");
            bus.send(RetraceEvent::SummaryAdded { id });
        }
        Ok(_) => debug!("backend returned empty summary, skipping"),
        Err(e) => warn!(error = %e, "summarization backend failed"),
    }
}

pub fn spawn_summarization_loop(
    summarizer: Arc<dyn Summarizer>,
    index: Arc<ReconcilingIndex>,
    bus: EventBus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SUMMARY_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            run_summary_cycle(summarizer.as_ref(), &index, &bus, Utc::now()).await;
        }
    })
}

/// OpenAI-compatible chat-completions backend.
pub struct HttpSummarizer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpSummarizer {
    pub fn new(endpoint: String, model: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
            api_key,
        }
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(&self, text: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "summarize the following screen activity text in a few sentences"
                },
                { "role": "user", "content": text }
            ],
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?.error_for_status()?;
        let payload: serde_json::Value = response.json().await?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow!("malformed completion response"))
    }
}
