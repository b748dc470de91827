//! Event bus: republishes connection-state and transfer-state changes to
//! UI observers.
//!
//! The engine never talks to the UI directly. Everything observable —
//! link state transitions, transfer progress, reconstructed files,
//! integrity failures — crosses this bus. Publishing is fire-and-forget:
//! with no subscribers the event is dropped, and a subscriber that lags
//! past the channel capacity skips ahead rather than backpressuring the
//! protocol tasks.

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::core::config::EVENT_BUS_CAPACITY;
use crate::core::link::LinkState;

/// Transfer-related events, both directions.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Progress update for an outgoing file.
    SendProgress {
        sent_chunks: u32,
        total_chunks: u32,
        sent_bytes: u64,
        total_bytes: u64,
    },
    /// Outgoing file fully sent (END frame emitted).
    SendComplete { total_bytes: u64 },
    /// Outgoing transfer halted by local cancellation (CANCEL frame emitted).
    SendCancelled { sent_chunks: u32 },
    /// Progress update for an incoming file.
    ReceiveProgress {
        received_bytes: u64,
        total_bytes: u64,
    },
    /// Incoming file fully reassembled and integrity-verified.
    FileReceived { bytes: Bytes, mime_type: String },
    /// Incoming file failed its length or hash check; the buffered data
    /// was discarded. The channel stays open for a future attempt.
    IntegrityFailure { reason: String },
    /// The remote side cancelled its transfer; buffered data was discarded.
    ReceiveCancelled,
}

/// Events delivered from the engine to UI observers.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// The peer connection moved to a new state.
    ConnectionState(LinkState),
    /// A transfer-related event.
    Transfer(TransferEvent),
}

/// Publish/subscribe channel for [`PeerEvent`]s.
///
/// Clones share the same underlying channel. Receivers returned by
/// [`subscribe`](EventBus::subscribe) unsubscribe by being dropped, so
/// teardown is deterministic and nothing leaks onto a replaced link.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PeerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    /// Register a new observer.
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current observers. Never fails.
    pub fn publish(&self, event: PeerEvent) {
        let _ = self.tx.send(event);
    }

    /// Publish a connection-state transition.
    pub fn connection_state(&self, state: LinkState) {
        self.publish(PeerEvent::ConnectionState(state));
    }

    /// Publish a transfer event.
    pub fn transfer(&self, event: TransferEvent) {
        self.publish(PeerEvent::Transfer(event));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
