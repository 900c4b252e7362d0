use crate::core::movie::AudioMode;
use crate::services::source::{
    spawn_synthetic_delay, AudioSource, Completion, InFlight, SpeakRequest,
};
use crate::utils::audio::SpeechEstimate;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// The platform's text-to-speech engine.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    fn is_available(&self) -> bool;

    /// Speaks `text`, resolving on end-of-speech. An error stands for the
    /// engine's error event.
    async fn speak(&self, text: &str, voice_id: &str) -> Result<()>;

    /// Cancels any utterance in progress.
    fn cancel(&self);
}

/// Speaks every line live through the platform engine. Nothing is cached;
/// revisiting a line synthesizes it again.
pub struct SpeechSource {
    engine: Arc<dyn SpeechEngine>,
    estimate: SpeechEstimate,
    in_flight: InFlight,
}

impl SpeechSource {
    pub fn new(engine: Arc<dyn SpeechEngine>, estimate: SpeechEstimate) -> Self {
        Self {
            engine,
            estimate,
            in_flight: InFlight::default(),
        }
    }
}

impl AudioSource for SpeechSource {
    fn mode(&self) -> AudioMode {
        AudioMode::OnDevice
    }

    fn speak(&mut self, request: SpeakRequest, done: Completion) -> Duration {
        self.stop_current();

        let delay = self
            .estimate
            .for_text(&request.text)
            .saturating_sub(request.elapsed);
        if !request.audio_enabled {
            self.in_flight.start(spawn_synthetic_delay(delay, done));
            return delay;
        }

        if !self.engine.is_available() {
            debug!("Speech engine unavailable, skipping {}", request.key);
            done.complete();
            return Duration::ZERO;
        }

        let engine = self.engine.clone();
        self.in_flight.start(tokio::spawn(async move {
            if let Err(e) = engine.speak(&request.text, &request.voice).await {
                warn!("Speech engine failed on {}: {:#}", request.key, e);
            }
            done.complete();
        }));
        delay
    }

    fn stop_current(&mut self) {
        self.in_flight.abort();
        self.engine.cancel();
    }
}
