use crate::core::config::VoiceConfig;
use crate::core::movie::Character;
use log::{debug, warn};
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reserved key of the narrator voice.
pub const NARRATOR_KEY: &str = "narrator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
}

/// Guesses a speaker's gender from a display name.
pub trait GenderPolicy: Send + Sync {
    fn guess(&self, name: &str) -> Gender;
}

/// Names ending in `a` read as feminine, everything else as masculine.
///
/// Tuned for languages where that ending marks grammatical gender (Spanish,
/// Italian, Portuguese, Polish...). Names from other languages are routinely
/// misclassified; users fix those with explicit overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrailingVowelPolicy;

impl GenderPolicy for TrailingVowelPolicy {
    fn guess(&self, name: &str) -> Gender {
        let last = name
            .trim()
            .chars()
            .rev()
            .find(|c| c.is_alphabetic())
            .map(|c| c.to_lowercase().next().unwrap_or(c));
        match last {
            Some('a' | 'á' | 'à' | 'â' | 'ã') => Gender::Female,
            _ => Gender::Male,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoicePools {
    pub narrator: String,
    pub male: Vec<String>,
    pub female: Vec<String>,
}

impl VoicePools {
    /// Keeps the two pools disjoint; a voice listed in both stays male.
    pub fn new(narrator: String, male: Vec<String>, female: Vec<String>) -> Self {
        let female = female
            .into_iter()
            .filter(|v| {
                let shared = male.contains(v);
                if shared {
                    warn!("Voice '{}' is in both pools; keeping it in the male pool", v);
                }
                !shared
            })
            .collect();
        Self {
            narrator,
            male,
            female,
        }
    }

    pub fn from_config(config: &VoiceConfig) -> Self {
        Self::new(
            config.narrator.clone(),
            config.male_pool.clone(),
            config.female_pool.clone(),
        )
    }

    fn pick_random_voice<R: Rng + ?Sized>(&self, gender: Gender, rng: &mut R) -> String {
        let (preferred, other) = match gender {
            Gender::Male => (&self.male, &self.female),
            Gender::Female => (&self.female, &self.male),
        };
        preferred
            .choose(rng)
            .or_else(|| other.choose(rng))
            .cloned()
            .unwrap_or_else(|| self.narrator.clone())
    }
}

/// Character id (plus [`NARRATOR_KEY`]) to voice id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceAssignmentMap {
    voices: HashMap<String, String>,
}

impl VoiceAssignmentMap {
    pub fn build(
        characters: &[&Character],
        overrides: &HashMap<String, String>,
        pools: &VoicePools,
        policy: &dyn GenderPolicy,
    ) -> Self {
        Self::build_with_rng(characters, overrides, pools, policy, &mut rand::rng())
    }

    pub fn build_with_rng<R: Rng + ?Sized>(
        characters: &[&Character],
        overrides: &HashMap<String, String>,
        pools: &VoicePools,
        policy: &dyn GenderPolicy,
        rng: &mut R,
    ) -> Self {
        let mut map = Self::default();
        map.voices
            .insert(NARRATOR_KEY.to_string(), pools.narrator.clone());
        map.assign_missing_with_rng(characters, overrides, pools, policy, rng);
        map
    }

    /// Assigns voices to characters that have none yet. Existing entries,
    /// the narrator included, are never touched.
    pub fn assign_missing_with_rng<R: Rng + ?Sized>(
        &mut self,
        characters: &[&Character],
        overrides: &HashMap<String, String>,
        pools: &VoicePools,
        policy: &dyn GenderPolicy,
        rng: &mut R,
    ) {
        self.voices
            .entry(NARRATOR_KEY.to_string())
            .or_insert_with(|| pools.narrator.clone());

        for character in characters {
            if self.voices.contains_key(&character.id) {
                continue;
            }
            let voice = match overrides.get(&character.id) {
                Some(v) => v.clone(),
                None => {
                    let gender = policy.guess(&character.name);
                    let v = pools.pick_random_voice(gender, rng);
                    debug!(
                        "Guessed {:?} voice '{}' for {} ({})",
                        gender, v, character.name, character.id
                    );
                    v
                }
            };
            self.voices.insert(character.id.clone(), voice);
        }
    }

    pub fn narrator(&self) -> &str {
        self.voices
            .get(NARRATOR_KEY)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Voice for a speaker; unknown speakers get the narrator's voice.
    pub fn voice_for(&self, character_id: &str) -> &str {
        self.voices
            .get(character_id)
            .map(String::as_str)
            .unwrap_or_else(|| self.narrator())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.voices.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}
