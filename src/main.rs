use anyhow::Result;
use log::{info, warn};
use movie_player::core::config::Config;
use movie_player::core::movie::{AudioMode, Movie};
use movie_player::core::state::PlayerSnapshot;
use movie_player::services::cache::AudioCache;
use movie_player::services::player::Player;
use movie_player::services::projection::{project, Background, Frame};
use movie_player::services::source::device::CpalOutput;
use movie_player::services::source::simulated::{
    SimulatedOutput, SimulatedSpeechEngine, SimulatedTrack,
};
use movie_player::services::source::{create_audio_source, AudioOutput, Devices};
use movie_player::services::tts::create_synthesizer;
use movie_player::services::voices::{TrailingVowelPolicy, VoiceAssignmentMap, VoicePools};
use std::path::PathBuf;
use std::sync::Arc;

fn print_frame(frame: &Frame) {
    let background = match &frame.background {
        Background::Image(url) => url.as_str(),
        Background::Placeholder => "(generating)",
    };
    println!(
        "[{}/{}] {}",
        frame.scene_index + 1,
        frame.scene_count,
        background
    );
    if let Some(bubble) = &frame.bubble {
        println!("    {}: {}", bubble.speaker.name, bubble.text);
    } else if let Some(subtitle) = &frame.subtitle {
        println!("    {}", subtitle);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load config, falling back to defaults when there is none
    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Continuing with default settings.");
            Config::default()
        }
    };
    if let Some(path) = std::env::args().nth(1) {
        config.movie_path = path;
    }

    // 2. Load the movie
    let movie = Arc::new(Movie::load(&PathBuf::from(&config.movie_path)).await?);
    info!(
        "Loaded '{}': {} scene(s), {:?} audio",
        movie.title,
        movie.scene_count(),
        movie.audio_mode
    );

    // 3. Assign voices
    let pools = VoicePools::from_config(&config.voices);
    let voices = Arc::new(VoiceAssignmentMap::build(
        &movie.characters(),
        &config.voices.overrides,
        &pools,
        &TrailingVowelPolicy,
    ));

    // 4. Initialize synthesis and devices
    let synth = create_synthesizer(&config)?;
    let cache = AudioCache::seeded_from(&movie);
    let output: Arc<dyn AudioOutput> = if movie.audio_mode == AudioMode::Generated {
        match CpalOutput::open() {
            Ok(output) => Arc::new(output),
            Err(e) => {
                warn!("No audio output ({:#}), clips will play silently", e);
                Arc::new(SimulatedOutput::default())
            }
        }
    } else {
        Arc::new(SimulatedOutput::default())
    };
    let devices = Devices {
        output,
        speech: Arc::new(SimulatedSpeechEngine::default()),
        track: Arc::new(SimulatedTrack::new()),
    };
    let source = create_audio_source(&movie, devices, cache.clone(), &config.playback);

    // 5. Play to the end, printing each change of frame
    let (mut player, handle) = Player::new(
        movie.clone(),
        voices,
        source,
        synth,
        cache,
        &config.playback,
    );
    player.on_finished(|| info!("The end"));

    let mut snapshots = handle.subscribe();
    let printer = tokio::spawn(async move {
        let mut last: Option<Frame> = None;
        loop {
            let snapshot: PlayerSnapshot = snapshots.borrow_and_update().clone();
            let frame = project(&movie, &snapshot);
            if last.as_ref() != Some(&frame) {
                print_frame(&frame);
                last = Some(frame);
            }
            if snapshot.finished || snapshots.changed().await.is_err() {
                break;
            }
        }
    });

    player.run_until_finished().await;
    drop(player);
    drop(handle);
    printer.await?;

    Ok(())
}
