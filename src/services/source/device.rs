//! Speaker output through the system's default audio device.

use crate::services::source::AudioOutput;
use crate::utils::audio::AudioBuffer;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use log::{debug, error, info};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use tokio::sync::oneshot;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Converts 16-bit mono at `from` Hz into float samples at `to` Hz, using
/// linear interpolation.
pub fn resample(samples: &[i16], from: u32, to: u32) -> Vec<f32> {
    let input: Vec<f32> = samples.iter().map(|s| f32::from(*s) / 32768.0).collect();
    if from == to || from == 0 || to == 0 || input.is_empty() {
        return input;
    }
    let out_len = (input.len() as u64 * u64::from(to) / u64::from(from)) as usize;
    let step = f64::from(from) / f64::from(to);
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = input[idx.min(input.len() - 1)];
            let b = input.get(idx + 1).copied().unwrap_or(a);
            a + (b - a) * frac
        })
        .collect()
}

/// The clip the device callback is draining.
#[derive(Default)]
struct Voice {
    samples: Vec<f32>,
    position: usize,
    done: Option<oneshot::Sender<()>>,
}

impl Voice {
    /// Replaces whatever was playing. The previous clip's waiter sees it
    /// cut off.
    fn load(&mut self, samples: Vec<f32>, done: oneshot::Sender<()>) {
        self.samples = samples;
        self.position = 0;
        self.done = Some(done);
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.position = 0;
        self.done = None;
    }

    /// Writes the next frames into `data`, copying each mono sample to every
    /// channel. Silence once the clip has run out.
    fn fill<T>(&mut self, data: &mut [T], channels: usize)
    where
        T: Sample + FromSample<f32>,
    {
        for frame in data.chunks_mut(channels.max(1)) {
            let value = match self.samples.get(self.position) {
                Some(v) => {
                    self.position += 1;
                    *v
                }
                None => 0.0,
            };
            for sample in frame.iter_mut() {
                *sample = Sample::from_sample(value);
            }
        }
        if self.position >= self.samples.len() {
            if let Some(done) = self.done.take() {
                let _ = done.send(());
            }
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    voice: Arc<Mutex<Voice>>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = usize::from(config.channels);
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                lock(&voice).fill(data, channels);
            },
            |err| error!("Audio stream error: {}", err),
            None,
        )
        .context("Failed to build output stream")
}

fn start_stream(voice: Arc<Mutex<Voice>>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No default output device available"))?;
    let supported = device
        .default_output_config()
        .context("Failed to get default output config")?;
    let format = supported.sample_format();
    let config: StreamConfig = supported.config();

    let stream = match format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, voice)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, voice)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, voice)?,
        other => bail!("Unsupported sample format: {:?}", other),
    };
    stream.play().context("Failed to start audio stream")?;

    info!(
        "Audio output: {} at {} Hz, {} channel(s)",
        device.name().unwrap_or_else(|_| "unknown device".to_string()),
        config.sample_rate.0,
        config.channels
    );
    Ok((stream, config.sample_rate.0))
}

/// Plays clips on the default output device, one at a time.
///
/// The cpal stream lives on its own thread until the output is dropped.
pub struct CpalOutput {
    voice: Arc<Mutex<Voice>>,
    sample_rate: u32,
    _keepalive: std_mpsc::Sender<()>,
}

impl CpalOutput {
    pub fn open() -> Result<Self> {
        let voice = Arc::new(Mutex::new(Voice::default()));
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32>>();
        let (keepalive, closed) = std_mpsc::channel::<()>();

        let shared = voice.clone();
        thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match start_stream(shared) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Nothing is ever sent; this returns once the output is dropped
                let _ = closed.recv();
                let _ = stream.pause();
                debug!("Audio output closed");
            })
            .context("Failed to spawn the audio output thread")?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| anyhow!("Audio output thread exited early"))??;
        Ok(Self {
            voice,
            sample_rate,
            _keepalive: keepalive,
        })
    }
}

#[async_trait]
impl AudioOutput for CpalOutput {
    async fn play(&self, buffer: &AudioBuffer) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let samples = resample(&buffer.samples, buffer.sample_rate, self.sample_rate);
        let (done, finished) = oneshot::channel();
        lock(&self.voice).load(samples, done);
        finished
            .await
            .map_err(|_| anyhow!("Playback was cut off"))
    }

    fn stop(&self) {
        lock(&self.voice).clear();
    }
}
