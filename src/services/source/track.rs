use crate::core::movie::{AudioMode, Movie};
use crate::services::source::{AudioSource, Completion, SpeakRequest};
use std::sync::Arc;
use std::time::Duration;

/// Transport of the externally supplied audio track.
pub trait TrackClock: Send + Sync {
    fn play(&self);
    fn pause(&self);
    fn seek(&self, seconds: f64);
    fn set_muted(&self, muted: bool);
    /// Current playback position in seconds.
    fn current_time(&self) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackPosition {
    Scene(usize),
    /// Inside no scene's interval; the current scene stays on screen.
    Gap,
    /// At or past the last scene's end.
    Ended,
}

/// Per-scene `[start, end)` intervals of the external track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackTimeline {
    intervals: Vec<Option<(f64, f64)>>,
    end: Option<f64>,
}

impl TrackTimeline {
    pub fn from_movie(movie: &Movie) -> Self {
        Self {
            intervals: movie.scenes.iter().map(|s| s.interval()).collect(),
            end: movie.scenes.last().and_then(|s| s.end),
        }
    }

    pub fn locate(&self, time: f64) -> TrackPosition {
        if let Some(end) = self.end {
            if time >= end {
                return TrackPosition::Ended;
            }
        }
        self.intervals
            .iter()
            .position(|iv| matches!(iv, Some((start, end)) if time >= *start && time < *end))
            .map(TrackPosition::Scene)
            .unwrap_or(TrackPosition::Gap)
    }
}

/// Follows an external track. Lines are never spoken individually; the
/// track's clock decides which scene is on screen.
pub struct TrackSource {
    clock: Arc<dyn TrackClock>,
    timeline: TrackTimeline,
}

impl TrackSource {
    pub fn new(clock: Arc<dyn TrackClock>, timeline: TrackTimeline) -> Self {
        Self { clock, timeline }
    }
}

impl AudioSource for TrackSource {
    fn mode(&self) -> AudioMode {
        AudioMode::ExternalTrack
    }

    fn speak(&mut self, _request: SpeakRequest, _done: Completion) -> Duration {
        Duration::ZERO
    }

    fn stop_current(&mut self) {}

    fn pause(&mut self) {
        self.clock.pause();
    }

    fn resume(&mut self) {
        self.clock.play();
    }

    fn rewind(&mut self) {
        self.clock.seek(0.0);
    }

    fn set_audio_enabled(&mut self, enabled: bool) {
        self.clock.set_muted(!enabled);
    }

    fn current_time(&self) -> Option<f64> {
        Some(self.clock.current_time())
    }

    fn locate(&self, time: f64) -> Option<TrackPosition> {
        Some(self.timeline.locate(time))
    }

    fn shutdown(&mut self) {
        self.clock.pause();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::movie::tests::timed_movie;
    use crate::services::source::simulated::SimulatedTrack;

    #[test]
    fn test_locate_scene_by_time() {
        let timeline = TrackTimeline::from_movie(&timed_movie(&[(0.0, 5.0), (5.0, 12.0), (12.0, 20.0)]));
        assert_eq!(timeline.locate(0.0), TrackPosition::Scene(0));
        assert_eq!(timeline.locate(4.99), TrackPosition::Scene(0));
        assert_eq!(timeline.locate(5.0), TrackPosition::Scene(1));
        assert_eq!(timeline.locate(7.5), TrackPosition::Scene(1));
        assert_eq!(timeline.locate(19.9), TrackPosition::Scene(2));
        assert_eq!(timeline.locate(20.0), TrackPosition::Ended);
        assert_eq!(timeline.locate(31.0), TrackPosition::Ended);
    }

    #[test]
    fn test_gaps_and_missing_end() {
        let mut movie = timed_movie(&[(1.0, 5.0), (6.0, 12.0)]);
        let timeline = TrackTimeline::from_movie(&movie);
        assert_eq!(timeline.locate(0.5), TrackPosition::Gap);
        assert_eq!(timeline.locate(5.5), TrackPosition::Gap);

        movie.scenes[1].end = None;
        let timeline = TrackTimeline::from_movie(&movie);
        assert_eq!(timeline.locate(500.0), TrackPosition::Gap);
        assert_eq!(timeline.locate(7.0), TrackPosition::Gap);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_is_forwarded_to_clock() {
        let clock = Arc::new(SimulatedTrack::new());
        let movie = timed_movie(&[(0.0, 5.0)]);
        let mut source = TrackSource::new(clock.clone(), TrackTimeline::from_movie(&movie));

        source.resume();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!((source.current_time().unwrap() - 3.0).abs() < 0.01);

        source.pause();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!((clock.current_time() - 3.0).abs() < 0.01);

        source.set_audio_enabled(false);
        assert!(clock.is_muted());

        source.rewind();
        assert_eq!(clock.current_time(), 0.0);
        assert_eq!(source.locate(2.0), Some(TrackPosition::Scene(0)));
    }
}
