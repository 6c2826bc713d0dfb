//! Remote engine connectivity: wire schema and the live-session transport.

pub mod transport;
pub mod wire;

pub use transport::{LiveTransport, TransportEvent, TransportState};
