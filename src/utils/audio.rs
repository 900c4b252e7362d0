use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;

/// Sample rate of the speech payloads produced by the synthesis backend.
pub const PCM_SAMPLE_RATE: u32 = 24_000;

/// A decoded, ready-to-play mono clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub samples: Arc<Vec<i16>>,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            sample_rate,
            samples: Arc::new(samples),
        }
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Pacing used when a line has no playable audio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechEstimate {
    pub floor: Duration,
    pub per_char: Duration,
}

impl Default for SpeechEstimate {
    fn default() -> Self {
        Self {
            floor: Duration::from_millis(2000),
            per_char: Duration::from_millis(60),
        }
    }
}

impl SpeechEstimate {
    /// Estimated speaking time for `text`, never below the floor.
    pub fn for_text(&self, text: &str) -> Duration {
        let chars = text.chars().count() as u32;
        self.floor.max(self.per_char * chars)
    }
}

struct WavInfo {
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    data_offset: u64,
    data_size: u32,
}

fn scan_wav<R: Read + Seek>(r: &mut R, len: u64) -> Result<WavInfo> {
    let mut id = [0u8; 4];
    r.read_exact(&mut id)?;
    if &id != b"RIFF" {
        return Err(anyhow!("Not a RIFF payload"));
    }
    r.seek(SeekFrom::Current(4))?;
    r.read_exact(&mut id)?;
    if &id != b"WAVE" {
        return Err(anyhow!("Not a WAVE payload"));
    }

    let mut fmt: Option<(u16, u32, u16)> = None;
    loop {
        let mut chunk_id = [0u8; 4];
        if r.read_exact(&mut chunk_id).is_err() {
            break;
        }
        let mut size_buf = [0u8; 4];
        r.read_exact(&mut size_buf)?;
        let chunk_size = u32::from_le_bytes(size_buf);
        // Chunks are word aligned
        let padded = u64::from(chunk_size) + u64::from(chunk_size % 2);
        let remaining = len.saturating_sub(r.stream_position()?);

        if &chunk_id == b"fmt " {
            if u64::from(chunk_size) > remaining {
                return Err(anyhow!("fmt chunk exceeds payload"));
            }
            let mut content = vec![0u8; chunk_size as usize];
            r.read_exact(&mut content)?;
            if content.len() < 16 {
                return Err(anyhow!("fmt chunk too short"));
            }
            let channels = u16::from_le_bytes([content[2], content[3]]);
            let sample_rate =
                u32::from_le_bytes([content[4], content[5], content[6], content[7]]);
            let bits = u16::from_le_bytes([content[14], content[15]]);
            fmt = Some((channels, sample_rate, bits));
            r.seek(SeekFrom::Current((padded - u64::from(chunk_size)) as i64))?;
        } else if &chunk_id == b"data" {
            let (channels, sample_rate, bits_per_sample) =
                fmt.ok_or_else(|| anyhow!("data chunk before fmt chunk"))?;
            return Ok(WavInfo {
                sample_rate,
                channels,
                bits_per_sample,
                data_offset: r.stream_position()?,
                data_size: chunk_size,
            });
        } else {
            if padded > remaining {
                break;
            }
            r.seek(SeekFrom::Current(padded as i64))?;
        }
    }
    Err(anyhow!("No data chunk found"))
}

/// Decodes raw single-channel 16-bit little-endian PCM.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32) -> Result<AudioBuffer> {
    if bytes.is_empty() {
        return Err(anyhow!("Empty audio payload"));
    }
    if bytes.len() % 2 != 0 {
        return Err(anyhow!(
            "Malformed PCM payload: odd byte count {}",
            bytes.len()
        ));
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(AudioBuffer::new(sample_rate, samples))
}

/// Decodes a synthesis payload. Raw PCM at [`PCM_SAMPLE_RATE`] is the normal
/// case; a mono 16-bit WAV wrapper is unwrapped as well.
pub fn decode_payload(bytes: &[u8]) -> Result<AudioBuffer> {
    if bytes.starts_with(b"RIFF") {
        let mut cursor = Cursor::new(bytes);
        let info = scan_wav(&mut cursor, bytes.len() as u64)?;
        if info.channels != 1 || info.bits_per_sample != 16 {
            return Err(anyhow!(
                "Unsupported WAV layout: {} channel(s), {} bits",
                info.channels,
                info.bits_per_sample
            ));
        }
        let start = info.data_offset as usize;
        let end = start
            .checked_add(info.data_size as usize)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| anyhow!("WAV data chunk exceeds payload"))?;
        return decode_pcm16(&bytes[start..end], info.sample_rate);
    }
    decode_pcm16(bytes, PCM_SAMPLE_RATE)
}
