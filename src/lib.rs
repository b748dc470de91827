//! Peer link engine: pairing, WebRTC negotiation, and chunked file
//! transfer for the music player's "connect webplayer" feature.
//!
//! # Overview
//!
//! Two devices pair through a WebSocket signaling relay: one side enters
//! the other's PIN, the relay matches the sessions, and the accepted
//! side drives a standard offer/answer/trickle-ICE exchange to bring up
//! a WebRTC data channel. Files then stream over that channel in
//! bounded chunks, framed with START/END/CANCEL control messages and
//! integrity-checked end to end.
//!
//! The host application owns everything around the engine — screens,
//! storage, playback. It talks to the engine through three surfaces:
//!
//! - [`PeerSession`] — connect, `start_call(pin)`, `send_file`, close
//! - the event bus ([`PeerSession::subscribe`]) — connection-state and
//!   transfer events for the UI
//! - [`init_tracing`] — optional logging setup feeding the UI log pane
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use peerlink::{normalize_pin, PeerSession};
//!
//! let session = PeerSession::connect("wss://relay.example.org/websockets/music").await?;
//! let mut events = session.subscribe();
//! session.start_call(&normalize_pin("ab 12"));
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod utils;

pub use crate::core::events::{EventBus, PeerEvent, TransferEvent};
pub use crate::core::link::{LinkState, PeerLink};
pub use crate::core::session::{normalize_pin, PeerSession};
pub use crate::core::signaling::{SignalingClient, SignalingEnvelope};
pub use crate::core::transfer::SendStatus;
pub use crate::utils::log_buffer::LogBuffer;

use crate::utils::log_buffer::BufferLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the engine's tracing setup: an env-filter plus the in-memory
/// ring buffer for the host UI's log pane. Call at most once per
/// process; returns the buffer to render from.
pub fn init_tracing(filter: &str) -> LogBuffer {
    let buffer = LogBuffer::new();
    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(BufferLayer::new(buffer.clone()))
        .init();
    buffer
}
