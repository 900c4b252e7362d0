use crate::utils::audio::AudioBuffer;
use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// How spoken audio is produced for every scene of a movie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudioMode {
    Generated,
    OnDevice,
    ExternalTrack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub style: String,
    pub audio_mode: AudioMode,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    /// Location of the user supplied track (external-track mode only).
    #[serde(default)]
    pub external_audio: Option<String>,
    pub scenes: Vec<Scene>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: String,
    /// Advisory; the real audio duration wins when known.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
    #[serde(default)]
    pub background_image_url: Option<String>,
    #[serde(default)]
    pub narration: String,
    #[serde(default)]
    pub narration_audio: Option<AudioBuffer>,
    #[serde(default)]
    pub dialogue: Vec<DialogueLine>,
    #[serde(default)]
    pub characters: Vec<Character>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueLine {
    pub character_id: String,
    pub text: String,
    #[serde(default)]
    pub audio: Option<AudioBuffer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub name: String,
}

impl Scene {
    pub fn has_narration(&self) -> bool {
        !self.narration.trim().is_empty()
    }

    pub fn speaker(&self, character_id: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.id == character_id)
    }

    /// The `[start, end)` interval, when both bounds are present and ordered.
    pub fn interval(&self) -> Option<(f64, f64)> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end > start => Some((start, end)),
            _ => None,
        }
    }
}

impl Movie {
    pub fn from_json(content: &str) -> Result<Self> {
        let movie: Movie = serde_json::from_str(content).context("Failed to parse movie JSON")?;
        movie.validate()?;
        Ok(movie)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read movie file {:?}", path))?;
        Self::from_json(&content)
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    /// Every distinct character across all scenes, in first-appearance order.
    pub fn characters(&self) -> Vec<&Character> {
        let mut seen = HashSet::new();
        self.scenes
            .iter()
            .flat_map(|s| s.characters.iter())
            .filter(|c| seen.insert(c.id.as_str()))
            .collect()
    }

    /// Rejects movies no session can be built from. Timing problems in
    /// external-track data are reported but left as authored.
    pub fn validate(&self) -> Result<()> {
        if self.scenes.is_empty() {
            bail!("Movie '{}' has no scenes", self.title);
        }

        let mut ids = HashSet::new();
        for scene in &self.scenes {
            if !ids.insert(scene.id.as_str()) {
                bail!("Duplicate scene id '{}' in movie '{}'", scene.id, self.title);
            }
            for line in &scene.dialogue {
                if scene.speaker(&line.character_id).is_none() {
                    warn!(
                        "Scene '{}': dialogue speaker '{}' is not listed in the scene",
                        scene.id, line.character_id
                    );
                }
            }
        }

        if self.audio_mode == AudioMode::ExternalTrack {
            if self.external_audio.is_none() {
                warn!("Movie '{}' uses an external track but names none", self.title);
            }
            for scene in &self.scenes {
                if scene.interval().is_none() {
                    warn!(
                        "Scene '{}' has no valid [start, end) interval and will never be shown",
                        scene.id
                    );
                }
            }
            if self.scenes.last().and_then(|s| s.end).is_none() {
                warn!("Last scene has no end time; playback will not finish on its own");
            }
        }
        Ok(())
    }
}
