//! Gapless playback of streamed engine speech via cpal.
//!
//! Inbound audio buffers are queued strictly FIFO and drained by the cpal
//! output callback. The queue is the only state shared with the audio
//! thread; everything else communicates through events.

use crate::audio::AudioBuffer;
use crate::config::AudioConfig;
use crate::error::{Result, VoiceError};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Playback lifecycle events observed by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A buffer began playing while the output was previously silent.
    Started,
    /// The queue emptied and the last in-flight buffer finished naturally.
    Drained,
}

/// Queue state shared with the output callback.
struct QueueState {
    queue: VecDeque<AudioBuffer>,
    /// Buffer currently being drained, with its read position.
    current: Option<(AudioBuffer, usize)>,
    /// True while any audio is audible or pending.
    playing: bool,
}

impl QueueState {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            playing: false,
        }
    }

    /// Fill `out` from the queue, advancing through buffers in FIFO order.
    ///
    /// Returns events to emit: `(started, drained)`. This is the core of
    /// the output callback, kept free of cpal types so it can be tested.
    fn fill(&mut self, out: &mut [f32]) -> (bool, bool) {
        let mut started = false;
        let mut drained = false;

        for slot in out.iter_mut() {
            // Advance to the next buffer when the current one is exhausted.
            loop {
                match self.current {
                    Some((ref buf, pos)) if pos < buf.samples.len() => break,
                    _ => match self.queue.pop_front() {
                        Some(next) => self.current = Some((next, 0)),
                        None => {
                            self.current = None;
                            break;
                        }
                    },
                }
            }

            match self.current {
                Some((ref buf, ref mut pos)) => {
                    if !self.playing {
                        self.playing = true;
                        started = true;
                    }
                    *slot = buf.samples[*pos];
                    *pos += 1;
                }
                None => {
                    if self.playing && self.queue.is_empty() {
                        self.playing = false;
                        drained = true;
                    }
                    *slot = 0.0;
                }
            }
        }

        (started, drained)
    }

    /// Drop everything: pending buffers and the in-progress one.
    fn clear(&mut self) -> usize {
        let discarded = self.queue.len() + usize::from(self.current.is_some());
        self.queue.clear();
        self.current = None;
        self.playing = false;
        discarded
    }
}

/// Handle to the playback queue, cloneable across tasks.
///
/// [`enqueue`](Self::enqueue) appends; [`clear`](Self::clear) cuts playback
/// at the next output callback — the queue is observably empty the moment
/// `clear` returns.
#[derive(Clone)]
pub struct PlaybackQueue {
    state: Arc<Mutex<QueueState>>,
    event_tx: mpsc::UnboundedSender<PlaybackEvent>,
}

impl PlaybackQueue {
    /// Create a queue and the event stream the session listens on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::new(Mutex::new(QueueState::new())),
                event_tx,
            },
            event_rx,
        )
    }

    /// Append a buffer to the tail of the queue.
    pub fn enqueue(&self, buffer: AudioBuffer) {
        if let Ok(mut state) = self.state.lock() {
            state.queue.push_back(buffer);
        }
    }

    /// Discard all queued audio and halt the in-progress buffer immediately.
    ///
    /// Returns the number of buffers discarded (including the partial one).
    pub fn clear(&self) -> usize {
        self.state.lock().map(|mut s| s.clear()).unwrap_or(0)
    }

    /// True while a buffer is audible or queued.
    pub fn is_active(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.playing || s.current.is_some() || !s.queue.is_empty())
            .unwrap_or(false)
    }

    /// Number of buffers waiting behind the one currently playing.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.queue.len()).unwrap_or(0)
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill an output slice from the queue, emitting lifecycle events.
    fn fill(&self, out: &mut [f32]) {
        let (started, drained) = match self.state.lock() {
            Ok(mut state) => state.fill(out),
            Err(_) => return,
        };
        if started {
            let _ = self.event_tx.send(PlaybackEvent::Started);
        }
        if drained {
            let _ = self.event_tx.send(PlaybackEvent::Drained);
        }
    }
}

/// Drain a playback queue at real-time pace without audio hardware.
///
/// Used by headless sessions: queue semantics, ordering, and lifecycle
/// events behave exactly as with a real output device, the samples just go
/// nowhere. Ticks every 10 ms, pulling one tick's worth of samples.
pub async fn run_null_sink(queue: PlaybackQueue, sample_rate: u32, cancel: CancellationToken) {
    const TICK: std::time::Duration = std::time::Duration::from_millis(10);
    let samples_per_tick = (sample_rate as usize / 100).max(1);
    let mut scratch = vec![0.0f32; samples_per_tick];
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => queue.fill(&mut scratch),
        }
    }
}

/// Audio playback to system speakers via cpal.
pub struct CpalPlayback {
    device: cpal::Device,
    stream_config: StreamConfig,
}

impl CpalPlayback {
    /// Create a new playback instance at the configured output rate.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device is available.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.output_device {
            host.output_devices()
                .map_err(|e| VoiceError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| VoiceError::Audio(format!("output device '{name}' not found")))?
        } else {
            host.default_output_device()
                .ok_or_else(|| VoiceError::Audio("no default output device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");

        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: config.output_sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            stream_config,
        })
    }

    /// Run the output stream, draining `queue` until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the output stream cannot be created or started.
    pub async fn run(&self, queue: PlaybackQueue, cancel: CancellationToken) -> Result<()> {
        let stream = self
            .device
            .build_output_stream(
                &self.stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    queue.fill(data);
                },
                move |err| {
                    error!("audio output stream error: {err}");
                },
                None,
            )
            .map_err(|e| VoiceError::Audio(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| VoiceError::Audio(format!("failed to start output stream: {e}")))?;

        info!(
            "audio playback started at {}Hz",
            self.stream_config.sample_rate
        );

        cancel.cancelled().await;

        drop(stream);
        info!("audio playback stopped");
        Ok(())
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| VoiceError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(samples: &[f32]) -> AudioBuffer {
        AudioBuffer {
            samples: samples.to_vec(),
            sample_rate: 24_000,
        }
    }

    fn drain(queue: &PlaybackQueue, n: usize) -> Vec<f32> {
        let mut out = vec![0.0; n];
        queue.fill(&mut out);
        out
    }

    #[test]
    fn plays_buffers_in_arrival_order() {
        let (queue, _rx) = PlaybackQueue::new();
        queue.enqueue(buffer(&[1.0, 1.0]));
        queue.enqueue(buffer(&[2.0, 2.0]));
        queue.enqueue(buffer(&[3.0, 3.0]));

        let out = drain(&queue, 6);
        assert_eq!(out, vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn crosses_buffer_boundaries_gaplessly() {
        let (queue, _rx) = PlaybackQueue::new();
        queue.enqueue(buffer(&[1.0, 1.0, 1.0]));
        queue.enqueue(buffer(&[2.0]));

        // A single callback spanning both buffers plus trailing silence.
        let out = drain(&queue, 6);
        assert_eq!(out, vec![1.0, 1.0, 1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn emits_started_then_drained() {
        let (queue, mut rx) = PlaybackQueue::new();
        queue.enqueue(buffer(&[1.0, 1.0]));

        drain(&queue, 4);
        assert_eq!(rx.try_recv().ok(), Some(PlaybackEvent::Started));
        assert_eq!(rx.try_recv().ok(), Some(PlaybackEvent::Drained));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn drained_fires_once_per_utterance() {
        let (queue, mut rx) = PlaybackQueue::new();
        queue.enqueue(buffer(&[1.0]));
        drain(&queue, 8);
        // Silence-only callbacks must not re-emit Drained.
        drain(&queue, 8);
        assert_eq!(rx.try_recv().ok(), Some(PlaybackEvent::Started));
        assert_eq!(rx.try_recv().ok(), Some(PlaybackEvent::Drained));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn clear_empties_queue_and_cuts_current_buffer() {
        let (queue, mut rx) = PlaybackQueue::new();
        queue.enqueue(buffer(&[1.0, 1.0, 1.0, 1.0]));
        queue.enqueue(buffer(&[2.0, 2.0]));

        // Start playing mid-buffer.
        let out = drain(&queue, 2);
        assert_eq!(out, vec![1.0, 1.0]);

        let discarded = queue.clear();
        assert_eq!(discarded, 2);
        assert_eq!(queue.len(), 0);
        assert!(!queue.is_active());

        // The rest of the interrupted buffer never plays.
        let out = drain(&queue, 4);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.0]);

        assert_eq!(rx.try_recv().ok(), Some(PlaybackEvent::Started));
        // No Drained after a clear: the cut is not a natural finish.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn clear_on_idle_queue_is_harmless() {
        let (queue, _rx) = PlaybackQueue::new();
        assert_eq!(queue.clear(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn enqueue_after_clear_restarts_playback() {
        let (queue, mut rx) = PlaybackQueue::new();
        queue.enqueue(buffer(&[1.0, 1.0]));
        drain(&queue, 1);
        queue.clear();
        let _ = rx.try_recv(); // Started

        queue.enqueue(buffer(&[2.0]));
        let out = drain(&queue, 2);
        assert_eq!(out, vec![2.0, 0.0]);
        assert_eq!(rx.try_recv().ok(), Some(PlaybackEvent::Started));
        assert_eq!(rx.try_recv().ok(), Some(PlaybackEvent::Drained));
    }

    #[test]
    fn is_active_tracks_queue_and_current() {
        let (queue, _rx) = PlaybackQueue::new();
        assert!(!queue.is_active());
        queue.enqueue(buffer(&[1.0, 1.0]));
        assert!(queue.is_active());
        drain(&queue, 1);
        assert!(queue.is_active());
        drain(&queue, 4);
        assert!(!queue.is_active());
    }
}
