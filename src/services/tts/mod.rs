use crate::core::config::Config;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::info;
use std::sync::Arc;

/// Remote speech synthesis, as offered by the generation backend.
///
/// The call may be slow and rate limited. `Ok(None)` means the backend
/// produced nothing for this text; callers treat it like a failure and
/// never abort playback over it.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Option<Vec<u8>>>;

    fn name(&self) -> &str;
}

/// Synthesizer used when no backend is configured: every line is silent.
#[derive(Debug, Default)]
pub struct SilentSynthesizer;

#[async_trait]
impl SpeechSynthesizer for SilentSynthesizer {
    async fn synthesize(&self, _text: &str, _voice_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn name(&self) -> &str {
        "none"
    }
}

pub fn create_synthesizer(config: &Config) -> Result<Arc<dyn SpeechSynthesizer>> {
    info!(
        "Initializing speech synthesizer for provider: {}",
        config.synthesis.provider
    );
    match config.synthesis.provider.as_str() {
        "none" => Ok(Arc::new(SilentSynthesizer)),
        "http" => {
            let http_config = config
                .synthesis
                .http
                .clone()
                .ok_or_else(|| anyhow!("HTTP synthesis config missing"))?;
            Ok(Arc::new(http::HttpSynthesizer::new(
                http_config,
                config.synthesis.retry_count,
                config.synthesis.retry_delay_seconds,
            )?))
        }
        _ => Err(anyhow!(
            "Unknown synthesis provider: {}",
            config.synthesis.provider
        )),
    }
}

pub mod http;
