//! Stand-in devices for hosts without sound hardware. They keep real timing,
//! so a session paces exactly as it would with speakers attached.

use crate::services::source::{AudioOutput, SpeechEngine, TrackClock};
use crate::utils::audio::{AudioBuffer, SpeechEstimate};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Plays nothing but takes as long as the clip lasts.
#[derive(Debug, Default)]
pub struct SimulatedOutput {
    played: AtomicUsize,
    stopped: AtomicUsize,
}

impl SimulatedOutput {
    pub fn played_count(&self) -> usize {
        self.played.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioOutput for SimulatedOutput {
    async fn play(&self, buffer: &AudioBuffer) -> Result<()> {
        self.played.fetch_add(1, Ordering::SeqCst);
        debug!("Playing {:?} clip", buffer.duration());
        tokio::time::sleep(buffer.duration()).await;
        Ok(())
    }

    fn stop(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Speech engine that "speaks" at the estimated reading pace.
#[derive(Debug)]
pub struct SimulatedSpeechEngine {
    available: bool,
    fail: bool,
    pace: SpeechEstimate,
    spoken: Mutex<Vec<(String, String)>>,
    cancelled: AtomicUsize,
}

impl Default for SimulatedSpeechEngine {
    fn default() -> Self {
        Self {
            available: true,
            fail: false,
            pace: SpeechEstimate {
                floor: Duration::from_millis(300),
                per_char: Duration::from_millis(50),
            },
            spoken: Mutex::new(Vec::new()),
            cancelled: AtomicUsize::new(0),
        }
    }
}

impl SimulatedSpeechEngine {
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<(String, String)> {
        lock(&self.spoken).clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechEngine for SimulatedSpeechEngine {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn speak(&self, text: &str, voice_id: &str) -> Result<()> {
        if self.fail {
            return Err(anyhow!("synthesis-failed"));
        }
        lock(&self.spoken).push((text.to_string(), voice_id.to_string()));
        tokio::time::sleep(self.pace.for_text(text)).await;
        Ok(())
    }

    fn cancel(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct TrackState {
    playing_since: Option<Instant>,
    offset: f64,
    muted: bool,
}

/// A track transport driven by the runtime clock.
#[derive(Debug)]
pub struct SimulatedTrack {
    state: Mutex<TrackState>,
}

impl SimulatedTrack {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackState {
                playing_since: None,
                offset: 0.0,
                muted: false,
            }),
        }
    }

    pub fn is_muted(&self) -> bool {
        lock(&self.state).muted
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.state).playing_since.is_some()
    }
}

impl Default for SimulatedTrack {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackState {
    fn position(&self) -> f64 {
        self.offset
            + self
                .playing_since
                .map(|since| since.elapsed().as_secs_f64())
                .unwrap_or(0.0)
    }
}

impl TrackClock for SimulatedTrack {
    fn play(&self) {
        let mut state = lock(&self.state);
        if state.playing_since.is_none() {
            state.playing_since = Some(Instant::now());
        }
    }

    fn pause(&self) {
        let mut state = lock(&self.state);
        state.offset = state.position();
        state.playing_since = None;
    }

    fn seek(&self, seconds: f64) {
        let mut state = lock(&self.state);
        state.offset = seconds.max(0.0);
        if state.playing_since.is_some() {
            state.playing_since = Some(Instant::now());
        }
    }

    fn set_muted(&self, muted: bool) {
        lock(&self.state).muted = muted;
    }

    fn current_time(&self) -> f64 {
        lock(&self.state).position()
    }
}
