use crate::services::cache::AudioCache;
use crate::services::sequencer::Utterance;
use crate::services::source::PlayerEvent;
use crate::services::tts::SpeechSynthesizer;
use crate::utils::audio::decode_payload;
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Synthesizes `items` one at a time, waiting `delay` between requests.
/// Lines already in the cache cost neither a request nor a wait.
///
/// Failures are logged and skipped; a line without a clip is later paced
/// by its text length instead.
pub async fn fetch_sequentially(
    synth: Arc<dyn SpeechSynthesizer>,
    cache: AudioCache,
    items: Vec<Utterance>,
    delay: Duration,
) {
    let mut requested = false;
    for item in items {
        if cache.contains(&item.key) {
            continue;
        }
        if requested {
            tokio::time::sleep(delay).await;
        }
        requested = true;
        match synth.synthesize(&item.text, &item.voice).await {
            Ok(Some(bytes)) => match decode_payload(&bytes) {
                Ok(buffer) => {
                    debug!("Cached {} ({:?})", item.key, buffer.duration());
                    cache.put(item.key, buffer);
                }
                Err(e) => warn!("Discarding audio for {}: {:#}", item.key, e),
            },
            Ok(None) => warn!("{} returned no audio for {}", synth.name(), item.key),
            Err(e) => warn!("Synthesis failed for {}: {:#}", item.key, e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchStatus {
    /// Nothing left to fetch for the scene.
    Ready,
    /// A fetch is running; `PlayerEvent::PrefetchDone` follows.
    Pending,
}

/// Prepares scene clips in the background, at most one fetch per scene.
pub struct Prefetcher {
    synth: Arc<dyn SpeechSynthesizer>,
    cache: AudioCache,
    delay: Duration,
    tasks: HashMap<usize, JoinHandle<()>>,
    done: HashSet<usize>,
}

impl Prefetcher {
    pub fn new(synth: Arc<dyn SpeechSynthesizer>, cache: AudioCache, delay: Duration) -> Self {
        Self {
            synth,
            cache,
            delay,
            tasks: HashMap::new(),
            done: HashSet::new(),
        }
    }

    /// Makes sure the clips of `scene_index` are cached or being fetched.
    ///
    /// A scene whose fetch already ran counts as ready even if some lines
    /// failed; those are not retried.
    pub fn ensure_scene(
        &mut self,
        scene_index: usize,
        items: Vec<Utterance>,
        events: &UnboundedSender<PlayerEvent>,
    ) -> PrefetchStatus {
        let missing: Vec<Utterance> = items
            .into_iter()
            .filter(|u| !self.cache.contains(&u.key))
            .collect();
        if missing.is_empty() {
            return PrefetchStatus::Ready;
        }
        if self.done.contains(&scene_index) {
            return PrefetchStatus::Ready;
        }
        if self.tasks.contains_key(&scene_index) {
            return PrefetchStatus::Pending;
        }

        info!(
            "Preparing {} clip(s) for scene {}",
            missing.len(),
            scene_index
        );
        let synth = self.synth.clone();
        let cache = self.cache.clone();
        let delay = self.delay;
        let events = events.clone();
        let task = tokio::spawn(async move {
            let fetch = fetch_sequentially(synth, cache, missing, delay);
            if AssertUnwindSafe(fetch).catch_unwind().await.is_err() {
                error!("Clip preparation for scene {} panicked", scene_index);
            }
            let _ = events.send(PlayerEvent::PrefetchDone { scene_index });
        });
        self.tasks.insert(scene_index, task);
        PrefetchStatus::Pending
    }

    /// Records the `PrefetchDone` of a scene.
    pub fn finished(&mut self, scene_index: usize) {
        self.tasks.remove(&scene_index);
        self.done.insert(scene_index);
    }

    pub fn is_fetching(&self, scene_index: usize) -> bool {
        self.tasks.contains_key(&scene_index)
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.abort();
        }
    }
}
