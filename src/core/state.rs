use serde::Serialize;

/// Position within a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Step {
    /// Nothing loaded yet.
    PreRoll,
    Narrating,
    Dialogue(usize),
    SceneComplete,
    /// Scene chosen by the external track's clock.
    OnTrack,
    Finished,
}

/// The sequencer's only mutable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cursor {
    pub scene_index: usize,
    pub step: Step,
}

impl Cursor {
    pub fn start() -> Self {
        Self {
            scene_index: 0,
            step: Step::PreRoll,
        }
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::start()
    }
}

/// What a host UI observes about a playback session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSnapshot {
    pub cursor: Cursor,
    pub scene_count: usize,
    pub is_playing: bool,
    pub is_narrating: bool,
    pub active_line: Option<usize>,
    pub is_preparing_audio: bool,
    pub audio_enabled: bool,
    pub is_fullscreen: bool,
    pub finished: bool,
    /// Last sampled position of the external track, in seconds.
    pub track_time: Option<f64>,
}

impl PlayerSnapshot {
    pub fn new(scene_count: usize, audio_enabled: bool) -> Self {
        Self {
            cursor: Cursor::start(),
            scene_count,
            is_playing: false,
            is_narrating: false,
            active_line: None,
            is_preparing_audio: false,
            audio_enabled,
            is_fullscreen: false,
            finished: false,
            track_time: None,
        }
    }

    pub fn scene_index(&self) -> usize {
        self.cursor.scene_index
    }
}
