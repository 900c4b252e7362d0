use crate::core::movie::Movie;
use crate::utils::audio::AudioBuffer;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Which utterance of a scene a clip belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheSlot {
    Narration,
    Line(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub scene_id: String,
    pub slot: CacheSlot,
}

impl CacheKey {
    pub fn narration(scene_id: &str) -> Self {
        Self {
            scene_id: scene_id.to_string(),
            slot: CacheSlot::Narration,
        }
    }

    pub fn line(scene_id: &str, index: usize) -> Self {
        Self {
            scene_id: scene_id.to_string(),
            slot: CacheSlot::Line(index),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot {
            CacheSlot::Narration => write!(f, "{}/narration", self.scene_id),
            CacheSlot::Line(n) => write!(f, "{}/line-{}", self.scene_id, n),
        }
    }
}

/// Decoded clips for one playback session. Cloning shares the store.
#[derive(Debug, Clone, Default)]
pub struct AudioCache {
    clips: Arc<Mutex<HashMap<CacheKey, AudioBuffer>>>,
}

impl AudioCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache pre-seeded with any audio already embedded in the movie.
    pub fn seeded_from(movie: &Movie) -> Self {
        let cache = Self::new();
        for scene in &movie.scenes {
            if let Some(audio) = &scene.narration_audio {
                cache.put(CacheKey::narration(&scene.id), audio.clone());
            }
            for (i, line) in scene.dialogue.iter().enumerate() {
                if let Some(audio) = &line.audio {
                    cache.put(CacheKey::line(&scene.id, i), audio.clone());
                }
            }
        }
        cache
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, AudioBuffer>> {
        // A panic while holding the lock cannot leave a half-written entry.
        self.clips.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &CacheKey) -> Option<AudioBuffer> {
        self.lock().get(key).cloned()
    }

    pub fn put(&self, key: CacheKey, buffer: AudioBuffer) {
        self.lock().insert(key, buffer);
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
