//! Microphone audio capture using cpal.
//!
//! Captures at the device's native sample rate, downsamples to the
//! configured input rate, and accumulates fixed-size frames for the
//! session transport.

use crate::audio::{Frame, pcm};
use crate::config::AudioConfig;
use crate::error::{Result, VoiceError};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Audio capture from the system microphone via cpal.
///
/// The cpal input callback runs on the OS real-time audio thread; frames
/// cross into the async world only through a bounded channel, never shared
/// mutable state.
pub struct CpalCapture {
    device: cpal::Device,
    stream_config: StreamConfig,
    /// The rate frames are delivered at (the wire input rate).
    target_sample_rate: u32,
    /// Samples per delivered frame.
    frame_size: usize,
}

impl CpalCapture {
    /// Create a new capture instance.
    ///
    /// Uses the device's default configuration for maximum compatibility,
    /// then downsamples to the target rate in software.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::PermissionDenied`] if no input device is
    /// available (the usual symptom of refused microphone access), or
    /// [`VoiceError::Audio`] for other device failures.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.input_device {
            host.input_devices()
                .map_err(|e| VoiceError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| VoiceError::Audio(format!("input device '{name}' not found")))?
        } else {
            host.default_input_device()
                .ok_or_else(|| VoiceError::PermissionDenied("no default input device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using input device: {device_name}");

        let default_config = device
            .default_input_config()
            .map_err(|e| VoiceError::PermissionDenied(format!("no default input config: {e}")))?;

        let native_rate = default_config.sample_rate();
        let native_channels = default_config.channels();

        let stream_config = StreamConfig {
            channels: native_channels,
            sample_rate: native_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        if native_rate != config.input_sample_rate {
            info!(
                "will downsample from {}Hz to {}Hz",
                native_rate, config.input_sample_rate
            );
        }

        Ok(Self {
            device,
            stream_config,
            target_sample_rate: config.input_sample_rate,
            frame_size: config.frame_size,
        })
    }

    /// Run the capture loop, sending completed frames to the provided channel.
    ///
    /// Blocks until the cancellation token is triggered, then tears down in
    /// order: stop the hardware stream, drop the cpal handles, close the
    /// frame channel. Repeated cancellation is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::PermissionDenied`] if the input stream cannot
    /// be created or started.
    pub async fn run(&self, tx: mpsc::Sender<Frame>, cancel: CancellationToken) -> Result<()> {
        let native_rate = self.stream_config.sample_rate;
        let native_channels = self.stream_config.channels;
        let target_rate = self.target_sample_rate;
        let frame_size = self.frame_size;
        let tx_clone = tx.clone();

        // Framer state owned by the callback closure. The callback is the
        // only writer, so no locking is needed.
        let mut pending: Vec<f32> = Vec::with_capacity(frame_size * 2);
        let mut dropping = false;

        let stream = self
            .device
            .build_input_stream(
                &self.stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let mono = if native_channels > 1 {
                        pcm::to_mono(data, native_channels)
                    } else {
                        data.to_vec()
                    };

                    let samples = if native_rate != target_rate {
                        pcm::downsample(&mono, native_rate, target_rate)
                    } else {
                        mono
                    };

                    pending.extend_from_slice(&samples);
                    while pending.len() >= frame_size {
                        let rest = pending.split_off(frame_size);
                        let frame = Frame {
                            samples: std::mem::replace(&mut pending, rest),
                            sample_rate: target_rate,
                            channels: 1,
                            captured_at: Instant::now(),
                        };
                        // try_send keeps the audio thread non-blocking; a full
                        // channel drops the new frame (see DESIGN.md).
                        match tx_clone.try_send(frame) {
                            Ok(()) => dropping = false,
                            Err(_) if !dropping => {
                                dropping = true;
                                warn!("frame channel full, dropping capture frames");
                            }
                            Err(_) => debug!("frame channel still full"),
                        }
                    }
                },
                move |err| {
                    error!("audio input stream error: {err}");
                },
                None,
            )
            .map_err(|e| VoiceError::PermissionDenied(format!("failed to open microphone: {e}")))?;

        stream
            .play()
            .map_err(|e| VoiceError::PermissionDenied(format!("failed to start microphone: {e}")))?;

        info!(
            "audio capture started: native {}Hz -> target {}Hz, {} samples/frame",
            native_rate, target_rate, frame_size
        );

        // Hold the stream alive until cancelled.
        cancel.cancelled().await;

        // Teardown order: stop the hardware stream, then release the device
        // handle. The frame channel closes when the last sender drops.
        if let Err(e) = stream.pause() {
            debug!("pausing input stream on teardown: {e}");
        }
        drop(stream);
        drop(tx);
        info!("audio capture stopped");
        Ok(())
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
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
