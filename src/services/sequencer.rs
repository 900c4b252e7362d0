use crate::core::movie::{AudioMode, Movie, Scene};
use crate::core::state::{Cursor, Step};
use crate::services::cache::CacheKey;
use crate::services::source::TrackPosition;
use crate::services::voices::VoiceAssignmentMap;
use log::debug;
use std::sync::Arc;

/// One thing to be said, with everything a strategy needs to say it.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub scene_index: usize,
    pub key: CacheKey,
    pub text: String,
    pub voice: String,
}

/// What the controller must do after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Say this; `prefetch_next` names a scene to start preparing meanwhile.
    Speak {
        utterance: Utterance,
        prefetch_next: Option<usize>,
    },
    /// Hold until this scene's clips are cached, then call `scene_ready`.
    Prefetch(usize),
    /// Report the end of the movie. Emitted once per session.
    Finish,
    Idle,
}

/// Walks a movie scene by scene: narration first, then each dialogue line.
///
/// Pure and synchronous. Every completion path funnels into [`advance`],
/// and the returned [`Action`] tells the caller what to start next.
///
/// [`advance`]: Sequencer::advance
pub struct Sequencer {
    movie: Arc<Movie>,
    voices: Arc<VoiceAssignmentMap>,
    cursor: Cursor,
    finish_reported: bool,
}

impl Sequencer {
    pub fn new(movie: Arc<Movie>, voices: Arc<VoiceAssignmentMap>) -> Self {
        Self {
            movie,
            voices,
            cursor: Cursor::start(),
            finish_reported: false,
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn movie(&self) -> &Movie {
        &self.movie
    }

    pub fn is_finished(&self) -> bool {
        self.cursor.step == Step::Finished
    }

    fn scene(&self, index: usize) -> &Scene {
        &self.movie.scenes[index.min(self.last_index())]
    }

    fn last_index(&self) -> usize {
        self.movie.scene_count().saturating_sub(1)
    }

    fn time_driven(&self) -> bool {
        self.movie.audio_mode == AudioMode::ExternalTrack
    }

    fn needs_prefetch(&self) -> bool {
        self.movie.audio_mode == AudioMode::Generated
    }

    /// Every utterance of a scene, in speaking order.
    pub fn scene_utterances(&self, scene_index: usize) -> Vec<Utterance> {
        let scene = self.scene(scene_index);
        let mut out = Vec::with_capacity(scene.dialogue.len() + 1);
        if scene.has_narration() {
            out.push(self.narration(scene_index));
        }
        for n in 0..scene.dialogue.len() {
            out.push(self.line(scene_index, n));
        }
        out
    }

    fn narration(&self, scene_index: usize) -> Utterance {
        let scene = self.scene(scene_index);
        Utterance {
            scene_index,
            key: CacheKey::narration(&scene.id),
            text: scene.narration.clone(),
            voice: self.voices.narrator().to_string(),
        }
    }

    fn line(&self, scene_index: usize, n: usize) -> Utterance {
        let scene = self.scene(scene_index);
        let line = &scene.dialogue[n];
        Utterance {
            scene_index,
            key: CacheKey::line(&scene.id, n),
            text: line.text.clone(),
            voice: self.voices.voice_for(&line.character_id).to_string(),
        }
    }

    /// Leaves `PreRoll`. Time-driven sessions wait for the track instead.
    pub fn begin(&mut self) -> Action {
        if self.cursor.step != Step::PreRoll || self.time_driven() {
            return Action::Idle;
        }
        if self.needs_prefetch() {
            Action::Prefetch(self.cursor.scene_index)
        } else {
            self.enter_scene(self.cursor.scene_index)
        }
    }

    /// The clips of `scene_index` are cached; move into it if we were
    /// waiting for exactly that scene.
    pub fn scene_ready(&mut self, scene_index: usize) -> Action {
        let waiting_for = match self.cursor.step {
            Step::PreRoll => Some(self.cursor.scene_index),
            Step::SceneComplete => Some(self.cursor.scene_index + 1),
            _ => None,
        };
        if waiting_for != Some(scene_index) || scene_index > self.last_index() {
            return Action::Idle;
        }
        self.enter_scene(scene_index)
    }

    fn enter_scene(&mut self, scene_index: usize) -> Action {
        let scene_index = scene_index.min(self.last_index());
        debug!("Entering scene {}", scene_index);
        self.cursor = Cursor {
            scene_index,
            step: Step::Narrating,
        };
        if self.scene(scene_index).has_narration() {
            self.speak(self.narration(scene_index))
        } else {
            self.after_narration()
        }
    }

    fn after_narration(&mut self) -> Action {
        if self.scene(self.cursor.scene_index).dialogue.is_empty() {
            self.complete_scene()
        } else {
            self.cursor.step = Step::Dialogue(0);
            self.speak(self.line(self.cursor.scene_index, 0))
        }
    }

    fn complete_scene(&mut self) -> Action {
        self.cursor.step = Step::SceneComplete;
        let next = self.cursor.scene_index + 1;
        if next > self.last_index() {
            return self.finish();
        }
        if self.needs_prefetch() {
            Action::Prefetch(next)
        } else {
            self.enter_scene(next)
        }
    }

    fn finish(&mut self) -> Action {
        self.cursor.step = Step::Finished;
        if self.finish_reported {
            return Action::Idle;
        }
        self.finish_reported = true;
        Action::Finish
    }

    /// Wraps the utterance for the current step, flagging the scene's final
    /// step so the next scene can be prepared while it plays.
    fn speak(&self, utterance: Utterance) -> Action {
        let scene = self.scene(self.cursor.scene_index);
        let is_last_step = match self.cursor.step {
            Step::Narrating => scene.dialogue.is_empty(),
            Step::Dialogue(n) => n + 1 == scene.dialogue.len(),
            _ => false,
        };
        let next = self.cursor.scene_index + 1;
        let prefetch_next =
            (is_last_step && self.needs_prefetch() && next <= self.last_index()).then_some(next);
        Action::Speak {
            utterance,
            prefetch_next,
        }
    }

    /// The current step finished speaking.
    pub fn advance(&mut self) -> Action {
        match self.cursor.step {
            Step::Narrating => self.after_narration(),
            Step::Dialogue(n) => {
                let count = self.scene(self.cursor.scene_index).dialogue.len();
                if n + 1 < count {
                    self.cursor.step = Step::Dialogue(n + 1);
                    self.speak(self.line(self.cursor.scene_index, n + 1))
                } else {
                    self.complete_scene()
                }
            }
            Step::PreRoll | Step::SceneComplete | Step::OnTrack | Step::Finished => Action::Idle,
        }
    }

    /// Re-issues the current step from its beginning (after a pause).
    pub fn resume(&mut self) -> Action {
        if self.time_driven() {
            return Action::Idle;
        }
        match self.cursor.step {
            Step::PreRoll => self.begin(),
            Step::Narrating => {
                if self.scene(self.cursor.scene_index).has_narration() {
                    self.speak(self.narration(self.cursor.scene_index))
                } else {
                    self.after_narration()
                }
            }
            Step::Dialogue(n) => self.speak(self.line(self.cursor.scene_index, n)),
            Step::SceneComplete => self.complete_scene(),
            Step::OnTrack | Step::Finished => Action::Idle,
        }
    }

    /// Back to the first scene; a new session as far as `Finish` goes.
    pub fn restart(&mut self) -> Action {
        self.cursor = Cursor::start();
        self.finish_reported = false;
        self.begin()
    }

    /// Follows the external track to `position`.
    pub fn sync_to(&mut self, position: TrackPosition) -> Action {
        if self.is_finished() {
            return Action::Idle;
        }
        match position {
            TrackPosition::Scene(index) => {
                let index = index.min(self.last_index());
                if self.cursor.scene_index != index || self.cursor.step != Step::OnTrack {
                    debug!("Track moved to scene {}", index);
                }
                self.cursor = Cursor {
                    scene_index: index,
                    step: Step::OnTrack,
                };
                Action::Idle
            }
            TrackPosition::Gap => Action::Idle,
            TrackPosition::Ended => self.finish(),
        }
    }
}
