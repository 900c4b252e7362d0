use crate::core::config::PlaybackConfig;
use crate::core::movie::{AudioMode, Movie};
use crate::services::cache::{AudioCache, CacheKey};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

pub mod clip;
pub mod device;
pub mod simulated;
pub mod speech;
pub mod track;

pub use clip::{AudioOutput, ClipSource};
pub use speech::{SpeechEngine, SpeechSource};
pub use track::{TrackClock, TrackPosition, TrackSource, TrackTimeline};

/// Identifies one issued step; completions for older tokens are stale.
pub type StepToken = u64;

/// Everything that can wake the playback loop besides host commands.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StepComplete { token: StepToken },
    StepTimedOut { token: StepToken },
    PrefetchDone { scene_index: usize },
}

/// One-shot completion handed to a strategy with every `speak`.
#[derive(Debug)]
pub struct Completion {
    token: StepToken,
    events: UnboundedSender<PlayerEvent>,
}

impl Completion {
    pub fn new(token: StepToken, events: UnboundedSender<PlayerEvent>) -> Self {
        Self { token, events }
    }

    pub fn token(&self) -> StepToken {
        self.token
    }

    pub fn complete(self) {
        // The loop is gone when the receiver is dropped; nothing left to notify.
        let _ = self.events.send(PlayerEvent::StepComplete { token: self.token });
    }
}

#[derive(Debug, Clone)]
pub struct SpeakRequest {
    pub key: CacheKey,
    pub text: String,
    pub voice: String,
    pub audio_enabled: bool,
    /// Time already spent on this line before a re-issue.
    pub elapsed: Duration,
}

/// "Speak this text, then complete." One strategy is active per session and
/// owns the session's output device exclusively.
pub trait AudioSource: Send {
    fn mode(&self) -> AudioMode;

    /// Starts the line. Implementations call `stop_current` first.
    ///
    /// Returns how long the line is expected to take, so the caller can
    /// tell a long clip from a stalled one.
    fn speak(&mut self, request: SpeakRequest, done: Completion) -> Duration;

    /// Silences whatever this strategy is producing. The pending completion
    /// is dropped without firing.
    fn stop_current(&mut self);

    fn pause(&mut self) {
        self.stop_current();
    }

    fn resume(&mut self) {}

    fn rewind(&mut self) {}

    fn set_audio_enabled(&mut self, _enabled: bool) {}

    /// Playback position of an external track, if this strategy follows one.
    fn current_time(&self) -> Option<f64> {
        None
    }

    /// Which scene an external track position belongs to.
    fn locate(&self, _time: f64) -> Option<TrackPosition> {
        None
    }

    fn shutdown(&mut self) {
        self.stop_current();
    }
}

/// Handle of the single task a strategy may have running.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    handle: Option<JoinHandle<()>>,
}

impl InFlight {
    pub(crate) fn start(&mut self, handle: JoinHandle<()>) {
        self.abort();
        self.handle = Some(handle);
    }

    pub(crate) fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Completes after `delay` without producing any sound.
pub(crate) fn spawn_synthetic_delay(delay: Duration, done: Completion) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        done.complete();
    })
}

/// The devices a session may speak through. Only the one matching the
/// movie's audio mode is used.
#[derive(Clone)]
pub struct Devices {
    pub output: Arc<dyn AudioOutput>,
    pub speech: Arc<dyn SpeechEngine>,
    pub track: Arc<dyn TrackClock>,
}

pub fn create_audio_source(
    movie: &Movie,
    devices: Devices,
    cache: AudioCache,
    config: &PlaybackConfig,
) -> Box<dyn AudioSource> {
    match movie.audio_mode {
        AudioMode::Generated => Box::new(ClipSource::new(
            cache,
            devices.output,
            config.estimate(),
            config.inter_line_pause(),
        )),
        AudioMode::OnDevice => Box::new(SpeechSource::new(devices.speech, config.estimate())),
        AudioMode::ExternalTrack => Box::new(TrackSource::new(
            devices.track,
            TrackTimeline::from_movie(movie),
        )),
    }
}
