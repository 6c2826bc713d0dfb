//! Session lifecycle and event orchestration.
//!
//! A [`Session`] owns everything for one conversation: the microphone
//! capture stream, the playback scheduler, the live transport, the tool
//! dispatcher, and the transcript aggregator. Capture and playback run as
//! independent event-driven paths over the one connection; all
//! coordination happens through channels and the shared status cell.

pub mod events;
pub mod status;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::capture::CpalCapture;
use crate::audio::playback::{CpalPlayback, PlaybackEvent, PlaybackQueue, run_null_sink};
use crate::audio::{AudioBuffer, Frame};
use crate::config::KiranaConfig;
use crate::engine::transport::{LiveTransport, TransportEvent, TransportState};
use crate::engine::wire;
use crate::error::Result;
use crate::tools::{ProviderRegistry, ToolCall, ToolDispatcher};
use crate::transcript::TranscriptAggregator;

pub use events::{SessionEvent, Speaker};
pub use status::{ConversationStatus, StatusCell};

/// Broadcast capacity for session events. Slow consumers lag; they never
/// stall the session.
const EVENT_CHANNEL_SIZE: usize = 256;

/// How audio reaches the OS.
enum AudioBackend {
    /// Real microphone and speakers via cpal.
    Device,
    /// No audio hardware: frames are fed with [`Session::send_frame`] and
    /// inbound audio drains to a paced null sink, preserving status
    /// semantics. For embedding hosts and tests.
    Headless,
}

/// One end-to-end connected conversation. At most one per client.
pub struct Session {
    id: String,
    status: StatusCell,
    event_tx: broadcast::Sender<SessionEvent>,
    /// Cancels every task owned by the session.
    cancel: CancellationToken,
    /// Child token halting only the capture path.
    capture_cancel: CancellationToken,
    /// Idempotence latch for [`disconnect`](Self::disconnect).
    disconnected: Arc<AtomicBool>,
    transport: Arc<LiveTransport>,
    playback: PlaybackQueue,
    frame_tx: mpsc::Sender<Frame>,
    input_sample_rate: u32,
}

impl Session {
    /// Connect using the system microphone and speakers.
    ///
    /// Fails before dialing if microphone access is refused — that failure
    /// is fatal to session start and is never retried automatically.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::VoiceError::PermissionDenied`] for refused
    /// microphone access, [`crate::error::VoiceError::Transport`] /
    /// [`crate::error::VoiceError::ConnectTimeout`] for connect failures.
    pub async fn connect(config: KiranaConfig, registry: ProviderRegistry) -> Result<Self> {
        Self::connect_inner(config, registry, AudioBackend::Device).await
    }

    /// Connect without touching audio hardware.
    ///
    /// Frames are supplied with [`send_frame`](Self::send_frame); inbound
    /// audio is consumed by a real-time-paced null sink so status and
    /// interruption behave exactly as in device mode.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect), minus device failures.
    pub async fn connect_headless(config: KiranaConfig, registry: ProviderRegistry) -> Result<Self> {
        Self::connect_inner(config, registry, AudioBackend::Headless).await
    }

    async fn connect_inner(
        config: KiranaConfig,
        registry: ProviderRegistry,
        backend: AudioBackend,
    ) -> Result<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        let status = StatusCell::new();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        let capture_cancel = cancel.child_token();

        status.set(ConversationStatus::Connecting);

        // Acquire audio hardware before dialing: a refused microphone must
        // fail the session without ever opening a connection.
        let (capture, playback_out) = match backend {
            AudioBackend::Device => (
                Some(CpalCapture::new(&config.audio)?),
                Some(CpalPlayback::new(&config.audio)?),
            ),
            AudioBackend::Headless => (None, None),
        };

        let registry = Arc::new(registry);
        let (transport, transport_rx) = match LiveTransport::connect(
            &config.engine,
            registry.declarations(),
            cancel.clone(),
        )
        .await
        {
            Ok((transport, events)) => (Arc::new(transport), events),
            Err(e) => {
                status.set(ConversationStatus::Error);
                return Err(e);
            }
        };

        status.set(ConversationStatus::Listening);
        let _ = event_tx.send(SessionEvent::Connected);
        let _ = event_tx.send(SessionEvent::StatusChanged(ConversationStatus::Listening));

        // Capture path: frames cross from the audio callback through this
        // bounded channel; ownership transfers here.
        let (frame_tx, frame_rx) = mpsc::channel::<Frame>(config.audio.frame_channel_capacity);
        if let Some(capture) = capture {
            let tx = frame_tx.clone();
            let token = capture_cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = capture.run(tx, token).await {
                    warn!("capture stopped: {e}");
                }
            });
        }

        // Playback path.
        let (playback, playback_rx) = PlaybackQueue::new();
        match playback_out {
            Some(out) => {
                let queue = playback.clone();
                let token = cancel.clone();
                tokio::spawn(async move {
                    if let Err(e) = out.run(queue, token).await {
                        warn!("playback stopped: {e}");
                    }
                });
            }
            None => {
                let queue = playback.clone();
                let token = cancel.clone();
                let rate = config.audio.output_sample_rate;
                tokio::spawn(async move {
                    run_null_sink(queue, rate, token).await;
                });
            }
        }

        // Tool dispatch: results stream back out of order, correlated by id.
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let dispatcher = ToolDispatcher::new(Arc::clone(&registry), result_tx, cancel.clone());

        let disconnected = Arc::new(AtomicBool::new(false));
        let pump = EventPump {
            config: config.clone(),
            status: status.clone(),
            event_tx: event_tx.clone(),
            cancel: cancel.clone(),
            disconnected: Arc::clone(&disconnected),
            transport: Arc::clone(&transport),
            playback: playback.clone(),
            dispatcher,
            aggregator: TranscriptAggregator::new(&config.transcript),
        };
        tokio::spawn(pump.run(transport_rx, playback_rx, frame_rx, result_rx));

        info!("session {id} connected");

        Ok(Self {
            id,
            status,
            event_tx,
            cancel,
            capture_cancel,
            disconnected,
            transport,
            playback,
            frame_tx,
            input_sample_rate: config.audio.input_sample_rate,
        })
    }

    /// Unique identifier of this session instance.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribe to session events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Current conversational status, read fresh.
    pub fn status(&self) -> ConversationStatus {
        self.status.get()
    }

    /// Current transport protocol state.
    pub fn transport_state(&self) -> TransportState {
        self.transport.state()
    }

    /// True while the session is neither closed nor failed.
    pub fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Buffers waiting behind the one currently playing.
    pub fn playback_queue_len(&self) -> usize {
        self.playback.len()
    }

    /// Feed one frame of microphone samples (headless mode).
    ///
    /// Frames are dropped after [`disconnect`](Self::disconnect) and when
    /// the channel is saturated, mirroring the capture callback's policy.
    pub fn send_frame(&self, samples: Vec<f32>) {
        if self.disconnected.load(Ordering::Acquire) {
            return;
        }
        let frame = Frame {
            samples,
            sample_rate: self.input_sample_rate,
            channels: 1,
            captured_at: Instant::now(),
        };
        if self.frame_tx.try_send(frame).is_err() {
            warn!("frame channel full, dropping frame");
        }
    }

    /// Disconnect gracefully: halt capture, send the "no more audio"
    /// end-marker, then close the connection. Idempotent — repeated calls
    /// are no-ops beyond the first.
    pub fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("disconnect requested");
        self.capture_cancel.cancel();
        self.transport.shutdown();
    }

    /// Resolves once the session has fully torn down.
    pub async fn wait_closed(&self) {
        self.cancel.cancelled().await;
    }
}

/// State moved into the session's single event-pump task.
struct EventPump {
    config: KiranaConfig,
    status: StatusCell,
    event_tx: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    disconnected: Arc<AtomicBool>,
    transport: Arc<LiveTransport>,
    playback: PlaybackQueue,
    dispatcher: ToolDispatcher,
    aggregator: TranscriptAggregator,
}

impl EventPump {
    async fn run(
        mut self,
        mut transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
        mut playback_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
        mut frame_rx: mpsc::Receiver<Frame>,
        mut result_rx: mpsc::UnboundedReceiver<wire::FunctionResponse>,
    ) {
        let mut flush = tokio::time::interval(Duration::from_millis(
            self.config.transcript.debounce_ms.max(1),
        ));
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,

                event = transport_rx.recv() => {
                    match event {
                        Some(event) => {
                            if self.on_transport_event(event) {
                                break;
                            }
                        }
                        None => {
                            // I/O task died without a close event.
                            self.fail("transport task exited".to_owned());
                            break;
                        }
                    }
                }

                event = playback_rx.recv() => {
                    if let Some(event) = event {
                        self.on_playback_event(event);
                    }
                }

                frame = frame_rx.recv() => {
                    if let Some(frame) = frame {
                        self.on_frame(frame);
                    }
                }

                result = result_rx.recv() => {
                    if let Some(result) = result {
                        self.on_tool_result(result);
                    }
                }

                _ = flush.tick() => {
                    for update in self.aggregator.tick(Instant::now()) {
                        self.emit_transcript(update);
                    }
                }
            }
        }

        // Teardown is unconditional: capture, playback, transport, and any
        // in-flight tool tasks all hang off this token.
        self.cancel.cancel();
        debug!("event pump stopped");
    }

    /// Handle one transport event. Returns true when the session is over.
    fn on_transport_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Audio(blob) => {
                // A corrupt payload is dropped; playback continues with the
                // next buffer.
                match wire::decode_audio(&blob) {
                    Ok(samples) => {
                        let _ = self.event_tx.send(SessionEvent::AudioChunk {
                            samples: samples.len(),
                        });
                        self.playback.enqueue(AudioBuffer {
                            samples,
                            sample_rate: self.config.audio.output_sample_rate,
                        });
                    }
                    Err(e) => warn!("dropping inbound audio buffer: {e}"),
                }
            }
            TransportEvent::InputTranscript(fragment) => {
                self.aggregator.push(Speaker::User, &fragment.text);
                // The engine heard the user; until agent audio actually
                // plays, the conversation is thinking, not speaking.
                if !self.playback.is_active()
                    && self
                        .status
                        .transition(ConversationStatus::Listening, ConversationStatus::Thinking)
                {
                    let _ = self
                        .event_tx
                        .send(SessionEvent::StatusChanged(ConversationStatus::Thinking));
                }
            }
            TransportEvent::OutputTranscript(fragment) => {
                self.aggregator.push(Speaker::Agent, &fragment.text);
            }
            TransportEvent::TurnComplete => {
                for update in self.aggregator.finalize(Instant::now()) {
                    self.emit_transcript(update);
                }
                let _ = self.event_tx.send(SessionEvent::TurnComplete);
            }
            TransportEvent::Interrupted => {
                let discarded = self.playback.clear();
                debug!("interrupted: flushed {discarded} queued buffers");
                let current = self.status.get();
                if matches!(
                    current,
                    ConversationStatus::Speaking | ConversationStatus::Thinking
                ) && self.status.set(ConversationStatus::Listening)
                {
                    let _ = self
                        .event_tx
                        .send(SessionEvent::StatusChanged(ConversationStatus::Listening));
                }
                for update in self.aggregator.finalize(Instant::now()) {
                    self.emit_transcript(update);
                }
                let _ = self.event_tx.send(SessionEvent::Interrupted);
            }
            TransportEvent::ToolCalls(calls) => {
                let calls: Vec<ToolCall> = calls
                    .into_iter()
                    .map(|c| ToolCall {
                        id: c.id,
                        name: c.name,
                        args: c.args,
                    })
                    .collect();
                let _ = self.event_tx.send(SessionEvent::ToolCalls(calls.clone()));
                self.dispatcher.dispatch(calls);
            }
            TransportEvent::Closed { code, reason } => {
                self.on_closed(code, reason);
                return true;
            }
            TransportEvent::Error(message) => {
                self.fail(message);
                return true;
            }
        }
        false
    }

    fn on_playback_event(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Started => {
                // Re-check the queue at the point of use: a Started event
                // that raced an interruption flush must not claim Speaking
                // for audio that will never play.
                if !self.playback.is_active() {
                    return;
                }
                let current = self.status.get();
                if matches!(
                    current,
                    ConversationStatus::Listening | ConversationStatus::Thinking
                ) && self.status.set(ConversationStatus::Speaking)
                {
                    let _ = self
                        .event_tx
                        .send(SessionEvent::StatusChanged(ConversationStatus::Speaking));
                }
            }
            PlaybackEvent::Drained => {
                if self
                    .status
                    .transition(ConversationStatus::Speaking, ConversationStatus::Listening)
                {
                    let _ = self
                        .event_tx
                        .send(SessionEvent::StatusChanged(ConversationStatus::Listening));
                }
            }
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        // disconnect() halts capture synchronously; frames already queued
        // behind the latch are dropped, not sent.
        if self.disconnected.load(Ordering::Acquire) {
            return;
        }
        let pcm = crate::audio::pcm::f32_to_pcm16_le(&frame.samples);
        if let Err(e) = self
            .transport
            .send(wire::audio_frame(&pcm, frame.sample_rate))
        {
            debug!("frame send failed: {e}");
        }
    }

    fn on_tool_result(&mut self, result: wire::FunctionResponse) {
        let success = result.response.get("error").is_none();
        let event = SessionEvent::ToolResult {
            id: result.id.clone(),
            name: result.name.clone(),
            success,
        };
        let message = wire::ClientMessage::ToolResponse(wire::ToolResponse {
            function_responses: vec![result],
        });
        if let Err(e) = self.transport.send(message) {
            debug!("tool result send failed: {e}");
            return;
        }
        let _ = self.event_tx.send(event);
    }

    fn on_closed(&mut self, code: u16, reason: String) {
        // Normal closure lands in Idle; anything else is an error with the
        // close reason (or a formatted fallback) as the message.
        if code == 1000 {
            if self.status.set(ConversationStatus::Idle) {
                let _ = self
                    .event_tx
                    .send(SessionEvent::StatusChanged(ConversationStatus::Idle));
            }
        } else {
            let message = if reason.is_empty() {
                format!("connection closed (code {code})")
            } else {
                reason.clone()
            };
            self.fail(message);
        }
        let _ = self.event_tx.send(SessionEvent::Closed { code, reason });
    }

    fn fail(&mut self, message: String) {
        warn!("session error: {message}");
        if self.status.set(ConversationStatus::Error) {
            let _ = self
                .event_tx
                .send(SessionEvent::StatusChanged(ConversationStatus::Error));
        }
        let _ = self.event_tx.send(SessionEvent::Error(message));
    }

    fn emit_transcript(&self, update: crate::transcript::TranscriptUpdate) {
        let _ = self.event_tx.send(SessionEvent::Transcript {
            speaker: update.speaker,
            text: update.text,
            is_final: update.is_final,
        });
    }
}
