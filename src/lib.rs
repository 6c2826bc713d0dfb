//! Kirana: real-time voice shopping assistant client.
//!
//! Streams microphone audio to a remote speech-to-speech engine over a
//! persistent WebSocket live session, plays streamed synthetic speech back
//! gaplessly, and services engine-initiated tool calls (product lookup)
//! mid-conversation.
//!
//! # Architecture
//!
//! Independent event-driven stages connected by channels over one
//! connection:
//! - **Capture**: records from the microphone via `cpal`, frames samples,
//!   and hands them to the transport by message passing
//! - **Transport**: owns the bidirectional WebSocket; audio out, audio /
//!   transcripts / tool calls / turn signals in
//! - **Playback**: strict-FIFO scheduler for inbound speech with immediate
//!   flush on interruption
//! - **Status**: one atomic cell deriving the conversational status from
//!   transport and playback activity
//! - **Tools**: per-call async dispatch to registered capability providers
//! - **Transcripts**: debounced per-speaker coalescing of partial text

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod session;
pub mod tools;
pub mod transcript;

pub use config::KiranaConfig;
pub use error::{Result, VoiceError};
pub use session::{ConversationStatus, Session, SessionEvent, Speaker};
pub use tools::{CapabilityProvider, ProviderRegistry, ToolCall, ToolDeclaration};
