//! WebSocket transport for the engine's live session.
//!
//! One transport per session. `connect` performs the handshake, sends the
//! one-shot setup message, and waits (bounded) for the engine's
//! acknowledgement; after that a background task owns the socket and all
//! I/O goes through channels. Turn-boundary signals (`turnComplete`,
//! `interrupted`) are forwarded verbatim — the engine's turn detector is
//! authoritative and nothing is reinterpreted locally.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::wire::{
    ClientMessage, FunctionCall, ServerMessage, Setup, TranscriptionFragment,
};
use crate::engine::wire;
use crate::error::{Result, VoiceError};
use crate::tools::ToolDeclaration;

/// Protocol state of the transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    Disconnected = 0,
    Connecting = 1,
    Open = 2,
    Closing = 3,
    Error = 4,
}

impl TransportState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Open,
            3 => Self::Closing,
            4 => Self::Error,
            _ => Self::Disconnected,
        }
    }
}

/// Events surfaced from the engine, in arrival order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One inline audio payload from the model turn (still encoded; the
    /// session decodes and may drop a corrupt payload without killing the
    /// stream).
    Audio(wire::AudioBlob),
    /// Partial transcript of the user's speech.
    InputTranscript(TranscriptionFragment),
    /// Partial transcript of the agent's speech.
    OutputTranscript(TranscriptionFragment),
    /// The agent finished its turn.
    TurnComplete,
    /// The user interrupted the agent; queued playback should be flushed.
    Interrupted,
    /// A batch of tool calls to dispatch.
    ToolCalls(Vec<FunctionCall>),
    /// The connection closed. `code` 1000 is a clean close; anything else
    /// (including the 1006 synthesized for a vanished peer) is abnormal.
    Closed { code: u16, reason: String },
    /// Abnormal transport failure (read/write error).
    Error(String),
}

/// Outbound traffic to the background I/O task.
enum Outbound {
    Message(ClientMessage),
    /// Graceful close: end-marker has already been queued; send the close
    /// frame and drain until the peer closes.
    Shutdown,
}

/// Handle to a live transport connection.
///
/// Dropping the handle (or cancelling the session token) tears the
/// connection down.
pub struct LiveTransport {
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    state: Arc<AtomicU8>,
}

impl LiveTransport {
    /// Connect to the engine, negotiate the session, and spawn the I/O task.
    ///
    /// Returns the handle plus the inbound event stream. Session parameters
    /// are serialized into the setup message here and cannot change for the
    /// lifetime of the connection.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Transport`] if the handshake fails and
    /// [`VoiceError::ConnectTimeout`] if the engine does not acknowledge
    /// setup within the configured window.
    pub async fn connect(
        config: &EngineConfig,
        tools: Vec<ToolDeclaration>,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        let state = Arc::new(AtomicU8::new(TransportState::Connecting as u8));
        let url = endpoint_url(config);
        url::Url::parse(&url)
            .map_err(|e| VoiceError::Config(format!("invalid engine endpoint: {e}")))?;
        let timeout = Duration::from_millis(config.connect_timeout_ms);

        let connect_phase = async {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| VoiceError::Transport(format!("connect failed: {e}")))?;
            let (mut write, mut read) = ws_stream.split();

            // Negotiate: setup goes out exactly once, then we wait for the
            // engine's acknowledgement before declaring the session open.
            let setup = ClientMessage::Setup(Setup::from_config(config, tools));
            let json = serde_json::to_string(&setup)
                .map_err(|e| VoiceError::Transport(format!("serialize setup: {e}")))?;
            write
                .send(Message::Text(json))
                .await
                .map_err(|e| VoiceError::Transport(format!("send setup: {e}")))?;

            loop {
                match read.next().await {
                    Some(Ok(msg)) => {
                        let Some(text) = message_text(msg) else {
                            continue;
                        };
                        let parsed: ServerMessage =
                            serde_json::from_str(&text).unwrap_or_default();
                        if parsed.setup_complete.is_some() {
                            return Ok((write, read));
                        }
                        debug!("ignoring pre-setup message");
                    }
                    Some(Err(e)) => {
                        return Err(VoiceError::Transport(format!("handshake read: {e}")));
                    }
                    None => {
                        return Err(VoiceError::Transport(
                            "connection closed during setup".to_owned(),
                        ));
                    }
                }
            }
        };

        let (write, read) = tokio::time::timeout(timeout, connect_phase)
            .await
            .map_err(|_| VoiceError::ConnectTimeout(config.connect_timeout_ms))??;

        state.store(TransportState::Open as u8, Ordering::Release);
        info!("live session open: {}", config.model);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let loop_state = Arc::clone(&state);
        tokio::spawn(async move {
            io_loop(write, read, outbound_rx, event_tx, loop_state, cancel).await;
        });

        Ok((
            Self {
                outbound_tx,
                state,
            },
            event_rx,
        ))
    }

    /// Current protocol state.
    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Queue an outbound message. Fails when the connection is gone.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Channel`] if the I/O task has exited.
    pub fn send(&self, message: ClientMessage) -> Result<()> {
        self.outbound_tx
            .send(Outbound::Message(message))
            .map_err(|_| VoiceError::Channel("transport closed".to_owned()))
    }

    /// Begin the close protocol: the explicit "no more audio" end-marker,
    /// then the close frame. Safe to call more than once.
    pub fn shutdown(&self) {
        let _ = self
            .outbound_tx
            .send(Outbound::Message(wire::audio_stream_end()));
        let _ = self.outbound_tx.send(Outbound::Shutdown);
    }
}

/// Compose the dial URL, attaching the API key when configured.
fn endpoint_url(config: &EngineConfig) -> String {
    match config.api_key {
        Some(ref key) if !key.is_empty() => {
            let sep = if config.endpoint.contains('?') { '&' } else { '?' };
            format!("{}{}key={}", config.endpoint, sep, key)
        }
        _ => config.endpoint.clone(),
    }
}

/// Extract a JSON text payload from a WebSocket message. The engine sends
/// both text and binary frames carrying UTF-8 JSON.
fn message_text(msg: Message) -> Option<String> {
    match msg {
        Message::Text(text) => Some(text),
        Message::Binary(bytes) => String::from_utf8(bytes).ok(),
        _ => None,
    }
}

/// Drive the socket until close: outbound channel on one side, inbound
/// frames on the other, session cancellation cutting both.
async fn io_loop<W, R>(
    mut write: W,
    mut read: R,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
) where
    W: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    R: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut outbound_open = true;
    let mut closing = false;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                // Unconditional teardown: best-effort close frame, no drain.
                state.store(TransportState::Disconnected as u8, Ordering::Release);
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            out = outbound_rx.recv(), if outbound_open => {
                outbound_open = out.is_some();
                match out {
                    Some(Outbound::Message(msg)) => {
                        if closing {
                            // The close frame is already on the wire;
                            // stragglers (late tool results) are dropped.
                            continue;
                        }
                        let json = match serde_json::to_string(&msg) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!("dropping unserializable message: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(json)).await {
                            state.store(TransportState::Error as u8, Ordering::Release);
                            let _ = event_tx.send(TransportEvent::Error(format!("send: {e}")));
                            return;
                        }
                    }
                    Some(Outbound::Shutdown) | None => {
                        if closing {
                            continue;
                        }
                        closing = true;
                        state.store(TransportState::Closing as u8, Ordering::Release);
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        };
                        if write.send(Message::Close(Some(frame))).await.is_err() {
                            // Peer already gone; report the synthetic code.
                            emit_closed(&event_tx, &state, 1006, String::new());
                            return;
                        }
                        // Keep draining so the engine can flush any
                        // in-flight response before its close frame.
                    }
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (u16::from(f.code), f.reason.to_string()),
                            None => (1006, String::new()),
                        };
                        emit_closed(&event_tx, &state, code, reason);
                        return;
                    }
                    Some(Ok(msg)) => {
                        if let Some(text) = message_text(msg) {
                            handle_server_message(&text, &event_tx);
                        }
                        // Ping/Pong frames are handled by tungstenite.
                    }
                    Some(Err(e)) => {
                        state.store(TransportState::Error as u8, Ordering::Release);
                        let _ = event_tx.send(TransportEvent::Error(format!("read: {e}")));
                        return;
                    }
                    None => {
                        emit_closed(&event_tx, &state, 1006, String::new());
                        return;
                    }
                }
            }
        }
    }
}

/// Emit the close event and settle the final protocol state.
fn emit_closed(
    event_tx: &mpsc::UnboundedSender<TransportEvent>,
    state: &Arc<AtomicU8>,
    code: u16,
    reason: String,
) {
    let final_state = if code == 1000 {
        TransportState::Disconnected
    } else {
        TransportState::Error
    };
    state.store(final_state as u8, Ordering::Release);
    let _ = event_tx.send(TransportEvent::Closed { code, reason });
}

/// Translate one inbound message into transport events, preserving the
/// engine's ordering.
fn handle_server_message(text: &str, event_tx: &mpsc::UnboundedSender<TransportEvent>) {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("ignoring unparseable engine message: {e}");
            return;
        }
    };

    if let Some(batch) = msg.tool_call {
        if !batch.function_calls.is_empty() {
            let _ = event_tx.send(TransportEvent::ToolCalls(batch.function_calls));
        }
    }

    let Some(content) = msg.server_content else {
        return;
    };

    if let Some(fragment) = content.input_transcription {
        let _ = event_tx.send(TransportEvent::InputTranscript(fragment));
    }
    if let Some(fragment) = content.output_transcription {
        let _ = event_tx.send(TransportEvent::OutputTranscript(fragment));
    }
    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(blob) = part.inline_data {
                let _ = event_tx.send(TransportEvent::Audio(blob));
            }
            if let Some(text) = part.text {
                debug!("engine annotation: {text}");
            }
        }
    }

    // Boundary signals are forwarded verbatim; interruption is emitted
    // after audio parts so flushing covers everything queued before it.
    if content.interrupted {
        let _ = event_tx.send(TransportEvent::Interrupted);
    }
    if content.turn_complete {
        let _ = event_tx.send(TransportEvent::TurnComplete);
    }
}
