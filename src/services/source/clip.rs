use crate::core::movie::AudioMode;
use crate::services::cache::AudioCache;
use crate::services::source::{
    spawn_synthetic_delay, AudioSource, Completion, InFlight, SpeakRequest,
};
use crate::utils::audio::{AudioBuffer, SpeechEstimate};
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// The single shared output channel clips are played on.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Plays `buffer`, resolving when it has been heard to the end.
    async fn play(&self, buffer: &AudioBuffer) -> Result<()>;

    /// Cuts off whatever is playing. No fade.
    fn stop(&self);
}

/// Plays clips prepared ahead of time and found in the audio cache.
pub struct ClipSource {
    cache: AudioCache,
    output: Arc<dyn AudioOutput>,
    estimate: SpeechEstimate,
    inter_line_pause: Duration,
    in_flight: InFlight,
}

impl ClipSource {
    pub fn new(
        cache: AudioCache,
        output: Arc<dyn AudioOutput>,
        estimate: SpeechEstimate,
        inter_line_pause: Duration,
    ) -> Self {
        Self {
            cache,
            output,
            estimate,
            inter_line_pause,
            in_flight: InFlight::default(),
        }
    }
}

impl AudioSource for ClipSource {
    fn mode(&self) -> AudioMode {
        AudioMode::Generated
    }

    fn speak(&mut self, request: SpeakRequest, done: Completion) -> Duration {
        self.stop_current();

        let fallback = self
            .estimate
            .for_text(&request.text)
            .saturating_sub(request.elapsed);

        if !request.audio_enabled {
            self.in_flight.start(spawn_synthetic_delay(fallback, done));
            return fallback;
        }

        let Some(buffer) = self.cache.get(&request.key) else {
            debug!("No clip for {}, pacing by text length", request.key);
            self.in_flight.start(spawn_synthetic_delay(fallback, done));
            return fallback;
        };
        let expected = buffer.duration() + self.inter_line_pause;

        let output = self.output.clone();
        let pause = self.inter_line_pause;
        let key = request.key;
        self.in_flight.start(tokio::spawn(async move {
            match output.play(&buffer).await {
                Ok(()) => tokio::time::sleep(pause).await,
                Err(e) => {
                    warn!("Playback of {} failed: {:#}", key, e);
                    tokio::time::sleep(fallback).await;
                }
            }
            done.complete();
        }));
        expected
    }

    fn stop_current(&mut self) {
        self.in_flight.abort();
        self.output.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::CacheKey;
    use crate::services::source::simulated::SimulatedOutput;
    use crate::services::source::PlayerEvent;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    fn request(key: CacheKey, text: &str, audio_enabled: bool) -> SpeakRequest {
        SpeakRequest {
            key,
            text: text.to_string(),
            voice: "Kore".to_string(),
            audio_enabled,
            elapsed: Duration::ZERO,
        }
    }

    fn assert_near(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(10),
            "expected ~{:?}, got {:?}",
            expected,
            actual
        );
    }

    fn source(cache: AudioCache, output: Arc<SimulatedOutput>) -> ClipSource {
        ClipSource::new(
            cache,
            output,
            SpeechEstimate::default(),
            Duration::from_millis(500),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_clip_plays_then_pauses() {
        let cache = AudioCache::new();
        // One second of audio
        cache.put(CacheKey::line("s1", 0), AudioBuffer::new(24_000, vec![0; 24_000]));
        let output = Arc::new(SimulatedOutput::default());
        let mut clip = source(cache, output.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let started = Instant::now();
        let expected = clip.speak(request(CacheKey::line("s1", 0), "Hi", true), Completion::new(1, tx));
        assert_eq!(expected, Duration::from_millis(1500));

        assert_eq!(rx.recv().await, Some(PlayerEvent::StepComplete { token: 1 }));
        assert_near(started.elapsed(), Duration::from_millis(1500));
        assert_eq!(output.played_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_clip_uses_estimate() {
        let output = Arc::new(SimulatedOutput::default());
        let mut clip = source(AudioCache::new(), output.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let started = Instant::now();
        clip.speak(request(CacheKey::narration("s1"), "Hi", true), Completion::new(2, tx));

        assert_eq!(rx.recv().await, Some(PlayerEvent::StepComplete { token: 2 }));
        assert_near(started.elapsed(), Duration::from_millis(2000));
        assert_eq!(output.played_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_disabled_never_plays() {
        let cache = AudioCache::new();
        cache.put(CacheKey::line("s1", 0), AudioBuffer::new(24_000, vec![0; 2_400]));
        let output = Arc::new(SimulatedOutput::default());
        let mut clip = source(cache, output.clone());

        let text = "x".repeat(100);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let started = Instant::now();
        clip.speak(request(CacheKey::line("s1", 0), &text, false), Completion::new(3, tx));

        assert_eq!(rx.recv().await, Some(PlayerEvent::StepComplete { token: 3 }));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(2000));
        assert_near(waited, SpeechEstimate::default().for_text(&text));
        assert_eq!(output.played_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_line_stops_previous_clip() {
        let cache = AudioCache::new();
        cache.put(CacheKey::line("s1", 0), AudioBuffer::new(24_000, vec![0; 240_000]));
        cache.put(CacheKey::line("s1", 1), AudioBuffer::new(24_000, vec![0; 24_000]));
        let output = Arc::new(SimulatedOutput::default());
        let mut clip = source(cache, output.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        clip.speak(request(CacheKey::line("s1", 0), "long", true), Completion::new(1, tx.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        clip.speak(request(CacheKey::line("s1", 1), "short", true), Completion::new(2, tx));

        assert_eq!(rx.recv().await, Some(PlayerEvent::StepComplete { token: 2 }));
        assert!(output.stop_count() >= 2);
        assert_eq!(output.played_count(), 2);
    }
}
