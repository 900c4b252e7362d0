use crate::core::movie::{AudioMode, Movie, Scene};
use crate::core::state::{PlayerSnapshot, Step};
use serde::Serialize;

pub const UNKNOWN_SPEAKER: &str = "Unknown speaker";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Background {
    Image(String),
    /// The scene's picture is still being generated.
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Speaker {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bubble {
    pub speaker: Speaker,
    pub text: String,
}

/// Everything a host needs to draw one moment of playback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub background: Background,
    pub scene_index: usize,
    pub scene_count: usize,
    pub speaker: Option<Speaker>,
    pub subtitle: Option<String>,
    pub bubble: Option<Bubble>,
    pub preparing_audio: bool,
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn speaker(scene: &Scene, character_id: &str) -> Speaker {
    Speaker {
        id: character_id.to_string(),
        name: scene
            .speaker(character_id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| UNKNOWN_SPEAKER.to_string()),
    }
}

/// Text shown under a scene that follows an external track: its narration,
/// or failing that its dialogue.
fn track_subtitle(scene: &Scene) -> Option<String> {
    non_empty(&scene.narration).or_else(|| {
        let lines: Vec<&str> = scene
            .dialogue
            .iter()
            .map(|l| l.text.trim())
            .filter(|t| !t.is_empty())
            .collect();
        (!lines.is_empty()).then(|| lines.join("\n"))
    })
}

/// Derives the frame for `snapshot`. Pure; holds no state of its own.
pub fn project(movie: &Movie, snapshot: &PlayerSnapshot) -> Frame {
    let scene_index = snapshot
        .scene_index()
        .min(movie.scene_count().saturating_sub(1));
    let mut frame = Frame {
        background: Background::Placeholder,
        scene_index,
        scene_count: movie.scene_count(),
        speaker: None,
        subtitle: None,
        bubble: None,
        preparing_audio: snapshot.is_preparing_audio,
    };
    let Some(scene) = movie.scenes.get(scene_index) else {
        return frame;
    };

    if let Some(url) = scene.background_image_url.as_deref().filter(|u| !u.is_empty()) {
        frame.background = Background::Image(url.to_string());
    }

    if movie.audio_mode == AudioMode::ExternalTrack {
        if snapshot.cursor.step == Step::OnTrack {
            frame.subtitle = track_subtitle(scene);
        }
        return frame;
    }

    match snapshot.cursor.step {
        Step::Narrating if snapshot.is_narrating => {
            frame.subtitle = non_empty(&scene.narration);
        }
        // A paused or unspoken line shows no bubble
        Step::Dialogue(n) if snapshot.active_line == Some(n) => {
            if let Some(line) = scene.dialogue.get(n) {
                let who = speaker(scene, &line.character_id);
                frame.subtitle = non_empty(&line.text);
                frame.bubble = Some(Bubble {
                    speaker: who.clone(),
                    text: line.text.clone(),
                });
                frame.speaker = Some(who);
            }
        }
        _ => {}
    }
    frame
}
