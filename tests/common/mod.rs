//! Shared test support: an in-process WebSocket engine stub.
//!
//! The stub plays the remote engine's role: it accepts one connection,
//! answers the setup handshake, then pushes scripted traffic to the client
//! and forwards everything the client sends back to the test.

#![allow(dead_code)]

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use kirana::config::KiranaConfig;
use kirana::session::SessionEvent;

/// Commands the test script sends to the stub.
pub enum StubCommand {
    /// Push a JSON text message to the client.
    Send(String),
    /// Close the connection with the given code and reason.
    Close { code: u16, reason: String },
}

/// Handle to a running engine stub.
pub struct EngineStub {
    /// `ws://` URL to dial.
    pub url: String,
    /// Script channel toward the client.
    pub cmd_tx: mpsc::UnboundedSender<StubCommand>,
    /// Messages the client sent, parsed as JSON.
    pub inbound_rx: mpsc::UnboundedReceiver<serde_json::Value>,
}

impl EngineStub {
    /// Push a JSON message to the client.
    pub fn send(&self, json: impl Into<String>) {
        let _ = self.cmd_tx.send(StubCommand::Send(json.into()));
    }

    /// Close the connection.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.cmd_tx.send(StubCommand::Close {
            code,
            reason: reason.to_owned(),
        });
    }

    /// Wait for the next client message matching `pred`.
    pub async fn expect_inbound(
        &mut self,
        pred: impl Fn(&serde_json::Value) -> bool,
    ) -> serde_json::Value {
        tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                match self.inbound_rx.recv().await {
                    Some(v) if pred(&v) => return v,
                    Some(_) => continue,
                    None => panic!("stub connection ended before expected message"),
                }
            }
        })
        .await
        .expect("timed out waiting for client message")
    }

    /// Drain every client message received so far.
    pub async fn drain_inbound(&mut self) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();
        while let Ok(v) = self.inbound_rx.try_recv() {
            messages.push(v);
        }
        messages
    }
}

/// Start a stub engine listening on an ephemeral port.
pub async fn spawn_engine_stub() -> EngineStub {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<StubCommand>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(ws) = accept_async(stream).await else {
            return;
        };
        let (mut write, mut read) = ws.split();

        // Handshake: the first client message must be setup.
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let v: serde_json::Value = serde_json::from_str(&text).unwrap_or_default();
                    let _ = inbound_tx.send(v.clone());
                    if v.get("setup").is_some() {
                        let _ = write
                            .send(Message::Text("{\"setupComplete\":{}}".to_owned()))
                            .await;
                        break;
                    }
                }
                Some(Ok(_)) => continue,
                _ => return,
            }
        }

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(StubCommand::Send(json)) => {
                        let _ = write.send(Message::Text(json)).await;
                    }
                    Some(StubCommand::Close { code, reason }) => {
                        let frame = CloseFrame {
                            code: code.into(),
                            reason: reason.into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                    }
                    None => return,
                },
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let v = serde_json::from_str(&text).unwrap_or_default();
                        let _ = inbound_tx.send(v);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        // Echo the close so the client always sees the code
                        // it sent, then keep draining until the peer is gone.
                        let _ = write.send(Message::Close(frame)).await;
                        continue;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(_)) | None => return,
                },
            }
        }
    });

    EngineStub {
        url: format!("ws://{addr}"),
        cmd_tx,
        inbound_rx,
    }
}

/// Session config pointed at the stub, with test-friendly timings.
pub fn test_config(url: &str) -> KiranaConfig {
    let mut config = KiranaConfig::default();
    config.engine.endpoint = url.to_owned();
    config.engine.api_key = None;
    config.engine.connect_timeout_ms = 3_000;
    config.transcript.debounce_ms = 30;
    config.transcript.agent_retention_ms = 200;
    config
}

/// A serverContent message carrying one inline audio part.
pub fn audio_message(samples: &[f32]) -> String {
    let pcm = kirana::audio::pcm::f32_to_pcm16_le(samples);
    serde_json::json!({
        "serverContent": {
            "modelTurn": {
                "parts": [{
                    "inlineData": {
                        "mimeType": "audio/pcm;rate=24000",
                        "data": BASE64.encode(&pcm),
                    }
                }]
            }
        }
    })
    .to_string()
}

/// A buffer of `ms` milliseconds of quiet tone at the output rate.
pub fn tone(ms: usize) -> Vec<f32> {
    vec![0.1; 24_000 * ms / 1_000]
}

/// Wait (bounded) for the next session event matching `pred`.
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}
