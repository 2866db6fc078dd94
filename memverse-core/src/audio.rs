//! Audio playback boundary for spoken gatekeeper lines.
//!
//! Speech arrives as raw 16-bit little-endian PCM. It is decoded into
//! [`AudioClip`]s and handed to an [`AudioSink`] supplied by the presentation
//! layer. The [`AudioContext`] ties a sink to a sample rate and is created
//! lazily by the gateway on first use.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Sample rate of synthesized speech.
pub const SPEECH_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("PCM16 data has odd length {0}")]
    OddLength(usize),

    #[error("Audio clip must have at least one channel")]
    NoChannels,

    #[error("Audio sink failed: {0}")]
    Sink(String),
}

/// Decoded, interleaved audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples in [-1.0, 1.0).
    pub samples: Vec<f32>,
}

impl AudioClip {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

/// Decode 16-bit little-endian PCM into floating point samples.
///
/// A trailing partial frame is dropped.
pub fn decode_pcm16(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<AudioClip, AudioError> {
    if channels == 0 {
        return Err(AudioError::NoChannels);
    }
    if bytes.len() % 2 != 0 {
        return Err(AudioError::OddLength(bytes.len()));
    }

    let raw: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let frames = raw.len() / channels as usize;

    let samples = raw[..frames * channels as usize]
        .iter()
        .map(|&s| s as f32 / 32768.0)
        .collect();

    Ok(AudioClip {
        sample_rate,
        channels,
        samples,
    })
}

/// Where decoded audio goes to be heard.
pub trait AudioSink: Send + Sync {
    fn play(&self, clip: AudioClip) -> Result<(), AudioError>;
}

/// Discards audio. Used when no presentation layer is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn play(&self, clip: AudioClip) -> Result<(), AudioError> {
        debug!(duration_ms = clip.duration().as_millis() as u64, "discarding speech clip");
        Ok(())
    }
}

/// Keeps clips until someone drains them.
#[derive(Debug, Default)]
pub struct BufferedSink {
    clips: Mutex<Vec<AudioClip>>,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every buffered clip, oldest first.
    pub fn drain(&self) -> Vec<AudioClip> {
        std::mem::take(&mut *self.clips.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.clips.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AudioSink for BufferedSink {
    fn play(&self, clip: AudioClip) -> Result<(), AudioError> {
        self.clips
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(clip);
        Ok(())
    }
}

/// A playback context: one sink at one sample rate, reused for a whole session.
pub struct AudioContext {
    sample_rate: u32,
    sink: Arc<dyn AudioSink>,
    played: AtomicUsize,
}

impl AudioContext {
    pub fn new(sample_rate: u32, sink: Arc<dyn AudioSink>) -> Self {
        debug!(sample_rate, "audio context created");
        Self {
            sample_rate,
            sink,
            played: AtomicUsize::new(0),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decode mono PCM16 at the context's rate and play it.
    pub fn play_pcm16(&self, bytes: &[u8]) -> Result<(), AudioError> {
        let clip = decode_pcm16(bytes, self.sample_rate, 1)?;
        self.play(clip)
    }

    pub fn play(&self, clip: AudioClip) -> Result<(), AudioError> {
        self.sink.play(clip)?;
        self.played.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of clips handed to the sink so far.
    pub fn clips_played(&self) -> usize {
        self.played.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioContext")
            .field("sample_rate", &self.sample_rate)
            .field("clips_played", &self.clips_played())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_mono() {
        let bytes = [0x00, 0x00, 0x00, 0x40, 0x00, 0x80];
        let clip = decode_pcm16(&bytes, SPEECH_SAMPLE_RATE, 1).unwrap();
        assert_eq!(clip.samples, vec![0.0, 0.5, -1.0]);
        assert_eq!(clip.frames(), 3);
    }

    #[test]
    fn test_decode_drops_partial_frame() {
        let bytes = [0x00, 0x40, 0x00, 0x40, 0x00, 0x40];
        let clip = decode_pcm16(&bytes, 8_000, 2).unwrap();
        assert_eq!(clip.frames(), 1);
        assert_eq!(clip.samples.len(), 2);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(matches!(
            decode_pcm16(&[0x00], SPEECH_SAMPLE_RATE, 1),
            Err(AudioError::OddLength(1))
        ));
        assert!(matches!(
            decode_pcm16(&[], SPEECH_SAMPLE_RATE, 0),
            Err(AudioError::NoChannels)
        ));
    }

    #[test]
    fn test_clip_duration() {
        let clip = AudioClip {
            sample_rate: 24_000,
            channels: 1,
            samples: vec![0.0; 12_000],
        };
        assert_eq!(clip.duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_context_plays_into_sink() {
        let sink = Arc::new(BufferedSink::new());
        let context = AudioContext::new(SPEECH_SAMPLE_RATE, sink.clone());

        context.play_pcm16(&[0x00, 0x00, 0xff, 0x7f]).unwrap();
        assert_eq!(context.clips_played(), 1);

        let clips = sink.drain();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].sample_rate, SPEECH_SAMPLE_RATE);
        assert!(sink.is_empty());
    }
}
