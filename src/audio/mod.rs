//! Microphone capture, speaker playback, and PCM conversion via cpal.

pub mod capture;
pub mod pcm;
pub mod playback;

use std::time::Instant;

/// A fixed-size chunk of raw microphone samples.
///
/// Produced by the capture callback, immutable once built; ownership moves
/// to the transport task through the frame channel.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Mono f32 samples at `sample_rate`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count (always 1 on the wire).
    pub channels: u16,
    /// Timestamp when this frame was completed.
    pub captured_at: Instant,
}

/// A decoded chunk of synthetic speech from the engine.
///
/// Owned by the playback queue until played or discarded.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Mono f32 samples at `sample_rate`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz (the configured output rate; no local resampling).
    pub sample_rate: u32,
}
