use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::services::tts::http::HttpSynthesizerConfig;
use crate::utils::audio::SpeechEstimate;

const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_movie_path")]
    pub movie_path: String,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub voices: VoiceConfig,

    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlaybackConfig {
    #[serde(default = "default_true")]
    pub audio_enabled: bool,
    #[serde(default = "default_inter_line_pause_ms")]
    pub inter_line_pause_ms: u64,
    #[serde(default = "default_min_estimate_ms")]
    pub min_estimate_ms: u64,
    #[serde(default = "default_ms_per_char")]
    pub ms_per_char: u64,
    #[serde(default = "default_prefetch_delay_ms")]
    pub prefetch_delay_ms: u64,
    /// 0 disables the stalled-line watchdog.
    #[serde(default = "default_line_timeout_secs")]
    pub line_timeout_secs: u64,
    #[serde(default = "default_track_poll_ms")]
    pub track_poll_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VoiceConfig {
    #[serde(default = "default_narrator_voice")]
    pub narrator: String,
    #[serde(default = "default_male_pool")]
    pub male_pool: Vec<String>,
    #[serde(default = "default_female_pool")]
    pub female_pool: Vec<String>,
    /// Character id -> voice id, set by the user in the editor.
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SynthesisConfig {
    #[serde(default = "default_synthesis_provider")]
    pub provider: String, // "http" or "none"
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    pub http: Option<HttpSynthesizerConfig>,
}

fn default_true() -> bool {
    true
}
fn default_movie_path() -> String {
    "movie.json".to_string()
}
fn default_inter_line_pause_ms() -> u64 {
    500
}
fn default_min_estimate_ms() -> u64 {
    2000
}
fn default_ms_per_char() -> u64 {
    60
}
fn default_prefetch_delay_ms() -> u64 {
    1000
}
fn default_line_timeout_secs() -> u64 {
    30
}
fn default_track_poll_ms() -> u64 {
    250
}
fn default_narrator_voice() -> String {
    "Kore".to_string()
}
fn default_male_pool() -> Vec<String> {
    ["Puck", "Charon", "Fenrir", "Orus"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_female_pool() -> Vec<String> {
    ["Zephyr", "Aoede", "Leda", "Callirrhoe"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_synthesis_provider() -> String {
    "none".to_string()
}
fn default_retry_count() -> usize {
    3
}
fn default_retry_delay() -> u64 {
    2
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            inter_line_pause_ms: default_inter_line_pause_ms(),
            min_estimate_ms: default_min_estimate_ms(),
            ms_per_char: default_ms_per_char(),
            prefetch_delay_ms: default_prefetch_delay_ms(),
            line_timeout_secs: default_line_timeout_secs(),
            track_poll_ms: default_track_poll_ms(),
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            narrator: default_narrator_voice(),
            male_pool: default_male_pool(),
            female_pool: default_female_pool(),
            overrides: HashMap::new(),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            provider: default_synthesis_provider(),
            retry_count: default_retry_count(),
            retry_delay_seconds: default_retry_delay(),
            http: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            movie_path: default_movie_path(),
            playback: PlaybackConfig::default(),
            voices: VoiceConfig::default(),
            synthesis: SynthesisConfig::default(),
        }
    }
}

impl PlaybackConfig {
    pub fn estimate(&self) -> SpeechEstimate {
        SpeechEstimate {
            floor: Duration::from_millis(self.min_estimate_ms),
            per_char: Duration::from_millis(self.ms_per_char),
        }
    }

    pub fn inter_line_pause(&self) -> Duration {
        Duration::from_millis(self.inter_line_pause_ms)
    }

    pub fn prefetch_delay(&self) -> Duration {
        Duration::from_millis(self.prefetch_delay_ms)
    }

    pub fn line_timeout(&self) -> Option<Duration> {
        (self.line_timeout_secs > 0).then(|| Duration::from_secs(self.line_timeout_secs))
    }

    pub fn track_poll_interval(&self) -> Duration {
        Duration::from_millis(self.track_poll_ms.max(1))
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_FILE);
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", CONFIG_FILE);
        }
        Self::load_from(path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Path::new(CONFIG_FILE))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }
}
