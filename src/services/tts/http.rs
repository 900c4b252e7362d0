use crate::services::tts::SpeechSynthesizer;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{sleep, Duration};
use url::Url;

// --- Config ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpSynthesizerConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

// --- Client ---

/// Talks to a speech endpoint that answers `POST /synthesize` with raw
/// 24 kHz mono s16le PCM (or `204 No Content` when it has nothing).
pub struct HttpSynthesizer {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    retry_count: usize,
    retry_delay: Duration,
}

enum Attempt {
    Audio(Vec<u8>),
    Empty,
    Retry(anyhow::Error),
}

impl HttpSynthesizer {
    pub fn new(config: HttpSynthesizerConfig, retry_count: usize, retry_delay_seconds: u64) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid synthesis base_url: {}", config.base_url))?;
        let endpoint = base.join("synthesize")?;
        Ok(Self {
            client: Client::new(),
            endpoint,
            api_key: config.api_key,
            retry_count,
            retry_delay: Duration::from_secs(retry_delay_seconds),
        })
    }

    async fn try_synthesize(&self, text: &str, voice_id: &str) -> Result<Attempt> {
        let payload = json!({ "text": text, "voice": voice_id });
        let mut req = self.client.post(self.endpoint.clone()).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => return Ok(Attempt::Retry(anyhow!(e).context("Failed to send synthesis request"))),
        };

        let status = resp.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(Attempt::Empty);
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Ok(Attempt::Retry(anyhow!("Synthesis backend answered {}", status)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Synthesis rejected ({}): {}", status, body));
        }

        let mut audio = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => audio.extend_from_slice(&bytes),
                Err(e) => return Ok(Attempt::Retry(anyhow!(e).context("Synthesis stream interrupted"))),
            }
        }

        if audio.is_empty() {
            Ok(Attempt::Empty)
        } else {
            Ok(Attempt::Audio(audio))
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Option<Vec<u8>>> {
        let attempts = self.retry_count + 1;
        let mut last_error = anyhow!("Unknown error");

        for attempt in 0..attempts {
            if attempt > 0 {
                warn!(
                    "Speech synthesis failed (attempt {}/{}), retrying...",
                    attempt + 1,
                    attempts
                );
                sleep(self.retry_delay).await;
            }

            match self.try_synthesize(text, voice_id).await? {
                Attempt::Audio(bytes) => {
                    debug!("Synthesized {} bytes with voice {}", bytes.len(), voice_id);
                    return Ok(Some(bytes));
                }
                Attempt::Empty => return Ok(None),
                Attempt::Retry(e) => {
                    warn!("Speech synthesis error: {:#}", e);
                    last_error = e;
                }
            }
        }

        Err(last_error.context("Speech synthesis still failing after retries"))
    }

    fn name(&self) -> &str {
        "http"
    }
}
