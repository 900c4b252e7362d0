use crate::core::config::PlaybackConfig;
use crate::core::movie::{AudioMode, Movie};
use crate::core::state::{PlayerSnapshot, Step};
use crate::services::cache::AudioCache;
use crate::services::prefetch::{PrefetchStatus, Prefetcher};
use crate::services::sequencer::{Action, Sequencer, Utterance};
use crate::services::source::{
    AudioSource, Completion, InFlight, PlayerEvent, SpeakRequest, StepToken,
};
use crate::services::tts::SpeechSynthesizer;
use crate::services::voices::VoiceAssignmentMap;
use crate::utils::audio::SpeechEstimate;
use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Requests a host sends into the playback loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Restart,
    SetAudioEnabled(bool),
    ToggleFullscreen,
    /// Position report from the external track's own clock.
    TimeUpdate(f64),
    Shutdown,
}

/// Cloneable remote control of a running [`Player`].
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<PlayerSnapshot>,
}

impl PlayerHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("Playback loop has stopped"))
    }

    pub fn play(&self) -> Result<()> {
        self.send(Command::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn restart(&self) -> Result<()> {
        self.send(Command::Restart)
    }

    pub fn set_audio_enabled(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetAudioEnabled(enabled))
    }

    pub fn toggle_fullscreen(&self) -> Result<()> {
        self.send(Command::ToggleFullscreen)
    }

    pub fn time_update(&self, seconds: f64) -> Result<()> {
        self.send(Command::TimeUpdate(seconds))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerSnapshot> {
        self.snapshots.clone()
    }

    pub async fn wait_until_finished(&mut self) -> Result<()> {
        self.snapshots
            .wait_for(|s| s.finished)
            .await
            .map_err(|_| anyhow!("Playback loop has stopped"))?;
        Ok(())
    }
}

enum Wake {
    Command(Option<Command>),
    Event(PlayerEvent),
    Poll,
}

/// Owns a playback session: the sequencer, the active audio strategy and
/// the prefetcher. All state changes happen on the task driving [`run`].
///
/// [`run`]: Player::run
pub struct Player {
    sequencer: Sequencer,
    source: Box<dyn AudioSource>,
    prefetcher: Prefetcher,
    snapshot: PlayerSnapshot,
    snapshot_tx: watch::Sender<PlayerSnapshot>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    events_tx: mpsc::UnboundedSender<PlayerEvent>,
    events_rx: mpsc::UnboundedReceiver<PlayerEvent>,
    token: StepToken,
    current: Option<Utterance>,
    line_started: Instant,
    waiting_for: Option<usize>,
    watchdog: InFlight,
    estimate: SpeechEstimate,
    line_timeout: Option<Duration>,
    track_poll: Duration,
    poll: Option<Interval>,
    on_finished: Option<Box<dyn FnMut() + Send>>,
}

impl Player {
    pub fn new(
        movie: Arc<Movie>,
        voices: Arc<VoiceAssignmentMap>,
        mut source: Box<dyn AudioSource>,
        synth: Arc<dyn SpeechSynthesizer>,
        cache: AudioCache,
        config: &PlaybackConfig,
    ) -> (Self, PlayerHandle) {
        let snapshot = PlayerSnapshot::new(movie.scene_count(), config.audio_enabled);
        let (snapshot_tx, snapshots) = watch::channel(snapshot.clone());
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        source.set_audio_enabled(config.audio_enabled);

        let player = Self {
            sequencer: Sequencer::new(movie, voices),
            source,
            prefetcher: Prefetcher::new(synth, cache, config.prefetch_delay()),
            snapshot,
            snapshot_tx,
            commands_rx,
            commands_open: true,
            events_tx,
            events_rx,
            token: 0,
            current: None,
            line_started: Instant::now(),
            waiting_for: None,
            watchdog: InFlight::default(),
            estimate: config.estimate(),
            line_timeout: config.line_timeout(),
            track_poll: config.track_poll_interval(),
            poll: None,
            on_finished: None,
        };
        let handle = PlayerHandle {
            commands,
            snapshots,
        };
        (player, handle)
    }

    /// Called once each time a session reaches the end of the movie.
    pub fn on_finished(&mut self, callback: impl FnMut() + Send + 'static) {
        self.on_finished = Some(Box::new(callback));
    }

    pub fn snapshot(&self) -> &PlayerSnapshot {
        &self.snapshot
    }

    fn time_driven(&self) -> bool {
        self.source.mode() == AudioMode::ExternalTrack
    }

    pub fn play(&mut self) {
        if self.snapshot.is_playing {
            return;
        }
        if self.sequencer.is_finished() {
            self.restart();
            return;
        }
        info!("Playback started");
        self.snapshot.is_playing = true;
        if self.time_driven() {
            self.source.resume();
            self.publish();
            return;
        }
        let action = self.sequencer.resume();
        self.apply(action);
    }

    pub fn pause(&mut self) {
        if !self.snapshot.is_playing {
            return;
        }
        info!("Playback paused");
        self.snapshot.is_playing = false;
        self.invalidate_step();
        self.waiting_for = None;
        self.source.pause();
        self.publish();
    }

    /// Back to the first scene, playing.
    pub fn restart(&mut self) {
        info!("Restarting from the first scene");
        self.invalidate_step();
        self.waiting_for = None;
        self.source.stop_current();
        self.source.rewind();
        self.snapshot.is_playing = true;
        self.snapshot.track_time = None;
        let action = self.sequencer.restart();
        if self.time_driven() {
            self.source.resume();
        }
        self.apply(action);
    }

    /// Mutes or unmutes. Turning audio off mid-line re-issues the line so it
    /// finishes on the text-length estimate, minus the time already spent.
    pub fn set_audio_enabled(&mut self, enabled: bool) {
        if self.snapshot.audio_enabled == enabled {
            return;
        }
        self.snapshot.audio_enabled = enabled;
        self.source.set_audio_enabled(enabled);
        if !enabled && self.snapshot.is_playing {
            if let Some(utterance) = self.current.clone() {
                let elapsed = self.line_started.elapsed();
                debug!("Audio off during {}, {:?} in", utterance.key, elapsed);
                self.start_line(utterance, elapsed);
            }
        }
        self.publish();
    }

    pub fn toggle_fullscreen(&mut self) {
        self.snapshot.is_fullscreen = !self.snapshot.is_fullscreen;
        self.publish();
    }

    /// Moves the on-screen scene to wherever the external track is.
    pub fn on_time_update(&mut self, seconds: f64) {
        let Some(position) = self.source.locate(seconds) else {
            return;
        };
        self.snapshot.track_time = Some(seconds);
        let action = self.sequencer.sync_to(position);
        self.apply(action);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::Restart => self.restart(),
            Command::SetAudioEnabled(enabled) => self.set_audio_enabled(enabled),
            Command::ToggleFullscreen => self.toggle_fullscreen(),
            Command::TimeUpdate(seconds) => self.on_time_update(seconds),
            Command::Shutdown => {}
        }
    }

    fn handle_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::StepComplete { token } | PlayerEvent::StepTimedOut { token }
                if token != self.token || !self.snapshot.is_playing =>
            {
                debug!("Ignoring stale completion {:?}", event);
            }
            PlayerEvent::StepComplete { .. } => self.step_done(),
            PlayerEvent::StepTimedOut { .. } => {
                if let Some(utterance) = &self.current {
                    warn!("{} never completed, moving on", utterance.key);
                }
                self.source.stop_current();
                self.step_done();
            }
            PlayerEvent::PrefetchDone { scene_index } => {
                self.prefetcher.finished(scene_index);
                if self.waiting_for == Some(scene_index) {
                    self.waiting_for = None;
                    let action = self.sequencer.scene_ready(scene_index);
                    self.apply(action);
                }
            }
        }
    }

    fn step_done(&mut self) {
        self.invalidate_step();
        let action = self.sequencer.advance();
        self.apply(action);
    }

    fn poll_track(&mut self) {
        if let Some(seconds) = self.source.current_time() {
            self.on_time_update(seconds);
        }
    }

    fn apply(&mut self, mut action: Action) {
        loop {
            action = match action {
                Action::Speak {
                    utterance,
                    prefetch_next,
                } => {
                    if let Some(next) = prefetch_next {
                        let items = self.sequencer.scene_utterances(next);
                        self.prefetcher.ensure_scene(next, items, &self.events_tx);
                    }
                    self.start_line(utterance, Duration::ZERO);
                    break;
                }
                Action::Prefetch(scene_index) => {
                    let items = self.sequencer.scene_utterances(scene_index);
                    match self
                        .prefetcher
                        .ensure_scene(scene_index, items, &self.events_tx)
                    {
                        PrefetchStatus::Ready => self.sequencer.scene_ready(scene_index),
                        PrefetchStatus::Pending => {
                            debug!("Waiting for clips of scene {}", scene_index);
                            self.waiting_for = Some(scene_index);
                            break;
                        }
                    }
                }
                Action::Finish => {
                    self.finish();
                    break;
                }
                Action::Idle => break,
            };
        }
        self.publish();
    }

    fn start_line(&mut self, utterance: Utterance, elapsed: Duration) {
        self.token += 1;
        self.line_started = Instant::now()
            .checked_sub(elapsed)
            .unwrap_or_else(Instant::now);

        let request = SpeakRequest {
            key: utterance.key.clone(),
            text: utterance.text.clone(),
            voice: utterance.voice.clone(),
            audio_enabled: self.snapshot.audio_enabled,
            elapsed,
        };
        let done = Completion::new(self.token, self.events_tx.clone());
        let expected = self.source.speak(request, done);

        if let Some(timeout) = self.line_timeout {
            let limit = self.estimate.for_text(&utterance.text).max(expected) + timeout;
            let token = self.token;
            let events = self.events_tx.clone();
            self.watchdog.start(tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                let _ = events.send(PlayerEvent::StepTimedOut { token });
            }));
        }
        self.current = Some(utterance);
    }

    /// Makes every outstanding completion stale.
    fn invalidate_step(&mut self) {
        self.token += 1;
        self.current = None;
        self.watchdog.abort();
    }

    fn finish(&mut self) {
        info!("Playback finished");
        self.invalidate_step();
        self.snapshot.is_playing = false;
        self.source.pause();
        if let Some(callback) = self.on_finished.as_mut() {
            callback();
        }
    }

    fn publish(&mut self) {
        let cursor = self.sequencer.cursor();
        let speaking = self.current.is_some();
        self.snapshot.cursor = cursor;
        self.snapshot.is_narrating = speaking && cursor.step == Step::Narrating;
        self.snapshot.active_line = match cursor.step {
            Step::Dialogue(n) if speaking => Some(n),
            _ => None,
        };
        self.snapshot.is_preparing_audio = self.waiting_for.is_some();
        self.snapshot.finished = self.sequencer.is_finished();
        self.snapshot_tx.send_replace(self.snapshot.clone());
    }

    async fn next_wake(&mut self) -> Wake {
        let polling = self.time_driven() && self.snapshot.is_playing;
        let period = self.track_poll;
        let poll = self.poll.get_or_insert_with(|| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        tokio::select! {
            command = self.commands_rx.recv(), if self.commands_open => Wake::Command(command),
            Some(event) = self.events_rx.recv() => Wake::Event(event),
            _ = poll.tick(), if polling => Wake::Poll,
        }
    }

    /// Handles one wake-up. Returns false once the loop should stop.
    async fn turn(&mut self) -> bool {
        match self.next_wake().await {
            Wake::Command(Some(Command::Shutdown)) => false,
            Wake::Command(Some(command)) => {
                self.handle_command(command);
                true
            }
            Wake::Command(None) => {
                self.commands_open = false;
                true
            }
            Wake::Event(event) => {
                self.handle_event(event);
                true
            }
            Wake::Poll => {
                self.poll_track();
                true
            }
        }
    }

    /// Serves host commands until shutdown or until every handle is gone.
    pub async fn run(mut self) {
        while self.turn().await && self.commands_open {}
        debug!("Playback loop stopped");
    }

    /// Plays from the current position until the movie ends.
    pub async fn run_until_finished(&mut self) {
        self.play();
        while !self.snapshot.finished {
            if !self.turn().await {
                break;
            }
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.source.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::movie::tests::{movie, scene, timed_movie};
    use crate::core::movie::Character;
    use crate::services::cache::CacheKey;
    use crate::services::source::simulated::{SimulatedOutput, SimulatedSpeechEngine, SimulatedTrack};
    use crate::services::source::{create_audio_source, Devices, SpeechEngine};
    use crate::services::tts::SilentSynthesizer;
    use crate::services::voices::{TrailingVowelPolicy, VoicePools};
    use crate::utils::audio::AudioBuffer;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Rig {
        output: Arc<SimulatedOutput>,
        speech: Arc<SimulatedSpeechEngine>,
        track: Arc<SimulatedTrack>,
    }

    impl Rig {
        fn new(speech: SimulatedSpeechEngine) -> Self {
            Self {
                output: Arc::new(SimulatedOutput::default()),
                speech: Arc::new(speech),
                track: Arc::new(SimulatedTrack::new()),
            }
        }

        fn devices(&self) -> Devices {
            Devices {
                output: self.output.clone(),
                speech: self.speech.clone(),
                track: self.track.clone(),
            }
        }
    }

    fn voices(m: &Movie) -> Arc<VoiceAssignmentMap> {
        let chars: Vec<&Character> = m.characters();
        let pools = VoicePools::new("Kore".to_string(), vec!["Puck".to_string()], vec!["Leda".to_string()]);
        Arc::new(VoiceAssignmentMap::build(
            &chars,
            &HashMap::new(),
            &pools,
            &TrailingVowelPolicy,
        ))
    }

    fn build(m: Movie, rig: &Rig, cache: AudioCache, config: &PlaybackConfig) -> (Player, PlayerHandle) {
        build_with(m, rig, Arc::new(SilentSynthesizer), cache, config)
    }

    fn build_with(
        m: Movie,
        rig: &Rig,
        synth: Arc<dyn SpeechSynthesizer>,
        cache: AudioCache,
        config: &PlaybackConfig,
    ) -> (Player, PlayerHandle) {
        let voices = voices(&m);
        let source = create_audio_source(&m, rig.devices(), cache.clone(), config);
        Player::new(Arc::new(m), voices, source, synth, cache, config)
    }

    fn two_scenes(mode: AudioMode) -> Movie {
        movie(
            mode,
            vec![
                scene("a", "Dawn.", &[("mia", "Morning!"), ("tom", "Hi.")]),
                scene("b", "", &[("tom", "Bye.")]),
            ],
        )
    }

    fn assert_near(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(50),
            "expected ~{:?}, got {:?}",
            expected,
            actual
        );
    }

    fn counter(player: &mut Player) -> Arc<AtomicUsize> {
        let finished = Arc::new(AtomicUsize::new(0));
        let count = finished.clone();
        player.on_finished(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        finished
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_device_speaks_every_line_in_order() {
        let rig = Rig::new(SimulatedSpeechEngine::default());
        let (mut player, _handle) = build(
            two_scenes(AudioMode::OnDevice),
            &rig,
            AudioCache::new(),
            &PlaybackConfig::default(),
        );
        let finished = counter(&mut player);

        player.run_until_finished().await;

        let spoken = rig.speech.spoken();
        let expected = vec![
            ("Dawn.".to_string(), "Kore".to_string()),
            ("Morning!".to_string(), "Leda".to_string()),
            ("Hi.".to_string(), "Puck".to_string()),
            ("Bye.".to_string(), "Puck".to_string()),
        ];
        assert_eq!(spoken, expected);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(player.snapshot().finished);
        assert!(!player.snapshot().is_playing);
        assert_eq!(player.snapshot().scene_index(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generated_without_clips_paces_by_estimate() {
        let rig = Rig::new(SimulatedSpeechEngine::default());
        let config = PlaybackConfig::default();
        let (mut player, _handle) = build(two_scenes(AudioMode::Generated), &rig, AudioCache::new(), &config);

        let started = Instant::now();
        player.run_until_finished().await;

        // Scene a's three requests are spaced 1s apart before it can start,
        // then four short lines are each held for the 2s floor
        assert_near(started.elapsed(), Duration::from_millis(10_000));
        assert_eq!(rig.output.played_count(), 0);
        assert!(player.snapshot().finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generated_plays_cached_clips() {
        let rig = Rig::new(SimulatedSpeechEngine::default());
        let m = movie(AudioMode::Generated, vec![scene("a", "Dawn.", &[("mia", "Hi.")])]);
        let cache = AudioCache::new();
        let second = AudioBuffer::new(24_000, vec![0; 24_000]);
        cache.put(CacheKey::narration("a"), second.clone());
        cache.put(CacheKey::line("a", 0), second);
        let (mut player, _handle) = build(m, &rig, cache, &PlaybackConfig::default());

        let started = Instant::now();
        player.run_until_finished().await;

        // Two 1s clips, each followed by the 500ms pause
        assert_near(started.elapsed(), Duration::from_millis(3000));
        assert_eq!(rig.output.played_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_clip_plays_to_the_end() {
        let rig = Rig::new(SimulatedSpeechEngine::default());
        let m = movie(AudioMode::Generated, vec![scene("a", "Dawn.", &[])]);
        let cache = AudioCache::new();
        // Forty seconds of audio for a five-character line
        cache.put(CacheKey::narration("a"), AudioBuffer::new(24_000, vec![0; 960_000]));
        let (mut player, _handle) = build(m, &rig, cache, &PlaybackConfig::default());

        let started = Instant::now();
        player.run_until_finished().await;

        assert_near(started.elapsed(), Duration::from_millis(40_500));
        assert_eq!(rig.output.played_count(), 1);
    }

    /// Takes three seconds per request and returns one second of audio.
    struct SlowSynth;

    #[async_trait]
    impl SpeechSynthesizer for SlowSynth {
        async fn synthesize(&self, _text: &str, _voice_id: &str) -> anyhow::Result<Option<Vec<u8>>> {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok(Some(vec![0u8; 48_000]))
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_plays_while_clips_are_prepared() {
        let rig = Rig::new(SimulatedSpeechEngine::default());
        let m = movie(AudioMode::Generated, vec![scene("a", "Dawn.", &[("mia", "Hi.")])]);
        let cache = AudioCache::new();
        let (player, handle) = build_with(
            m,
            &rig,
            Arc::new(SlowSynth),
            cache.clone(),
            &PlaybackConfig::default(),
        );
        let mut watcher = handle.clone();
        let task = tokio::spawn(player.run());

        let started = Instant::now();
        handle.play().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let snap = handle.snapshot();
        assert!(snap.is_playing);
        assert!(snap.is_preparing_audio);
        assert!(!snap.is_narrating);
        assert_eq!(snap.active_line, None);
        assert_eq!(snap.cursor.step, Step::PreRoll);
        assert_eq!(rig.output.played_count(), 0);

        // Pausing drops the wait but not the fetch
        handle.pause().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let snap = handle.snapshot();
        assert!(!snap.is_playing);
        assert!(!snap.is_preparing_audio);

        // Two 3s requests with a 1s gap are done by 7s
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(cache.len(), 2);
        assert_eq!(rig.output.played_count(), 0);
        assert_eq!(handle.snapshot().cursor.step, Step::PreRoll);

        handle.play().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let snap = handle.snapshot();
        assert!(!snap.is_preparing_audio);
        assert!(snap.is_narrating);
        assert_eq!(rig.output.played_count(), 1);

        watcher.wait_until_finished().await.unwrap();
        // Resumed at 8s, then two 1s clips each followed by the 500ms pause
        assert_near(started.elapsed(), Duration::from_millis(11_000));
        assert_eq!(rig.output.played_count(), 2);
        handle.shutdown().unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_disabled_never_touches_engine() {
        let rig = Rig::new(SimulatedSpeechEngine::default());
        let config = PlaybackConfig {
            audio_enabled: false,
            ..PlaybackConfig::default()
        };
        let (mut player, _handle) = build(two_scenes(AudioMode::OnDevice), &rig, AudioCache::new(), &config);

        let started = Instant::now();
        player.run_until_finished().await;

        assert!(rig.speech.spoken().is_empty());
        assert!(started.elapsed() >= Duration::from_millis(8000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_muting_mid_line_shortens_the_wait() {
        let rig = Rig::new(SimulatedSpeechEngine::default());
        let m = movie(AudioMode::Generated, vec![scene("a", "Dawn.", &[])]);
        let cache = AudioCache::new();
        // Ten seconds of audio
        cache.put(CacheKey::narration("a"), AudioBuffer::new(24_000, vec![0; 240_000]));
        let (player, handle) = build(m, &rig, cache, &PlaybackConfig::default());
        let mut watcher = handle.clone();
        let task = tokio::spawn(player.run());

        let started = Instant::now();
        handle.play().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.set_audio_enabled(false).unwrap();
        watcher.wait_until_finished().await.unwrap();

        // 2s estimate, one of which was already spent
        assert_near(started.elapsed(), Duration::from_millis(2000));
        assert!(rig.output.stop_count() >= 1);
        assert!(!handle.snapshot().audio_enabled);
        handle.shutdown().unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_then_play_repeats_the_line() {
        let rig = Rig::new(SimulatedSpeechEngine::default());
        let (player, handle) = build(
            two_scenes(AudioMode::OnDevice),
            &rig,
            AudioCache::new(),
            &PlaybackConfig::default(),
        );
        let mut watcher = handle.clone();
        let task = tokio::spawn(player.run());

        handle.play().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.pause().unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let snap = handle.snapshot();
        assert!(!snap.is_playing);
        assert_eq!(snap.cursor.step, Step::Narrating);
        assert!(rig.speech.cancel_count() >= 1);

        handle.play().unwrap();
        watcher.wait_until_finished().await.unwrap();

        let spoken: Vec<String> = rig.speech.spoken().into_iter().map(|(t, _)| t).collect();
        assert_eq!(spoken, vec!["Dawn.", "Dawn.", "Morning!", "Hi.", "Bye."]);
        handle.shutdown().unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_after_finish_restarts() {
        let rig = Rig::new(SimulatedSpeechEngine::default());
        let (mut player, _handle) = build(
            two_scenes(AudioMode::OnDevice),
            &rig,
            AudioCache::new(),
            &PlaybackConfig::default(),
        );
        let finished = counter(&mut player);

        player.run_until_finished().await;
        player.run_until_finished().await;

        assert_eq!(rig.speech.spoken().len(), 8);
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_mid_movie() {
        let rig = Rig::new(SimulatedSpeechEngine::default());
        let (player, handle) = build(
            two_scenes(AudioMode::OnDevice),
            &rig,
            AudioCache::new(),
            &PlaybackConfig::default(),
        );
        let mut watcher = handle.clone();
        let task = tokio::spawn(player.run());

        handle.play().unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;
        handle.restart().unwrap();
        watcher.wait_until_finished().await.unwrap();

        let spoken: Vec<String> = rig.speech.spoken().into_iter().map(|(t, _)| t).collect();
        assert_eq!(spoken[0], "Dawn.");
        assert_eq!(spoken.iter().filter(|t| *t == "Dawn.").count(), 2);
        assert_eq!(spoken.last().map(String::as_str), Some("Bye."));
        handle.shutdown().unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_track_drives_scenes() {
        let rig = Rig::new(SimulatedSpeechEngine::default());
        let m = timed_movie(&[(0.0, 5.0), (5.0, 12.0), (12.0, 20.0)]);
        let (mut player, _handle) = build(m, &rig, AudioCache::new(), &PlaybackConfig::default());
        let finished = counter(&mut player);

        player.play();
        assert!(rig.track.is_playing());
        player.on_time_update(7.5);
        assert_eq!(player.snapshot().scene_index(), 1);
        assert_eq!(player.snapshot().cursor.step, Step::OnTrack);
        assert_eq!(player.snapshot().track_time, Some(7.5));

        player.on_time_update(20.0);
        assert!(player.snapshot().finished);
        assert!(!player.snapshot().is_playing);
        player.on_time_update(21.0);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(rig.speech.spoken().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_track_polled_to_the_end() {
        let rig = Rig::new(SimulatedSpeechEngine::default());
        let m = timed_movie(&[(0.0, 5.0), (5.0, 12.0), (12.0, 20.0)]);
        let (player, handle) = build(m, &rig, AudioCache::new(), &PlaybackConfig::default());
        let mut watcher = handle.clone();
        let task = tokio::spawn(player.run());

        handle.play().unwrap();
        tokio::time::sleep(Duration::from_millis(7_600)).await;
        assert_eq!(handle.snapshot().scene_index(), 1);

        handle.set_audio_enabled(false).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(rig.track.is_muted());

        watcher.wait_until_finished().await.unwrap();
        let snap = handle.snapshot();
        assert_eq!(snap.scene_index(), 2);
        assert!(snap.track_time.unwrap_or_default() >= 20.0);
        assert!(!rig.track.is_playing());
        handle.shutdown().unwrap();
        task.await.unwrap();
    }

    struct HangingEngine;

    #[async_trait]
    impl SpeechEngine for HangingEngine {
        fn is_available(&self) -> bool {
            true
        }

        async fn speak(&self, _text: &str, _voice_id: &str) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }

        fn cancel(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_line_times_out() {
        let rig = Rig::new(SimulatedSpeechEngine::default());
        let m = movie(AudioMode::OnDevice, vec![scene("a", "Hi.", &[])]);
        let config = PlaybackConfig {
            line_timeout_secs: 1,
            ..PlaybackConfig::default()
        };
        let devices = Devices {
            speech: Arc::new(HangingEngine),
            ..rig.devices()
        };
        let source = create_audio_source(&m, devices, AudioCache::new(), &config);
        let v = voices(&m);
        let (mut player, _handle) = Player::new(
            Arc::new(m),
            v,
            source,
            Arc::new(SilentSynthesizer),
            AudioCache::new(),
            &config,
        );

        let started = Instant::now();
        player.run_until_finished().await;

        // 2s estimate plus the 1s allowance
        assert_near(started.elapsed(), Duration::from_millis(3000));
        assert!(player.snapshot().finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fullscreen_and_snapshot_flags() {
        let rig = Rig::new(SimulatedSpeechEngine::default());
        let (mut player, handle) = build(
            two_scenes(AudioMode::OnDevice),
            &rig,
            AudioCache::new(),
            &PlaybackConfig::default(),
        );
        player.toggle_fullscreen();
        assert!(handle.snapshot().is_fullscreen);

        player.play();
        let snap = handle.snapshot();
        assert!(snap.is_playing);
        assert!(snap.is_narrating);
        assert_eq!(snap.active_line, None);

        player.pause();
        let snap = handle.snapshot();
        assert!(!snap.is_playing);
        assert!(!snap.is_narrating);
        assert_eq!(snap.scene_count, 2);
    }
}
