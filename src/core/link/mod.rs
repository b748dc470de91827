//! [`PeerLink`] struct definition and its inherent `impl`.
//!
//! Negotiation logic lives in the sibling sub-modules (`initializer` for
//! the offer/answer/ICE exchange, `channel` for data-channel wiring).
//! This file owns the struct fields and the operations that depend
//! directly on the `peer_connection` handle.

mod channel;
mod initializer;

pub use channel::ChannelSink;

use anyhow::{anyhow, Result};
use std::fmt;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;

use crate::core::events::EventBus;
use crate::core::signaling::SignalingHandle;
use crate::core::transfer::{FileSender, IncomingTransfer, SendStatus};

// ── Connection state ──────────────────────────────────────────────────────────

/// Peer-connection state as observed by UI subscribers.
///
/// Mutated only by the transport's own state-change notification —
/// application logic never shortcuts a transition (there is no way to
/// jump to `Connected` by hand).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for LinkState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => LinkState::New,
            RTCPeerConnectionState::Connecting => LinkState::Connecting,
            RTCPeerConnectionState::Connected => LinkState::Connected,
            RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
            RTCPeerConnectionState::Failed => LinkState::Failed,
            RTCPeerConnectionState::Closed => LinkState::Closed,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::New => "new",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Disconnected => "disconnected",
            LinkState::Failed => "failed",
            LinkState::Closed => "closed",
        };
        f.write_str(s)
    }
}

// ── Struct ────────────────────────────────────────────────────────────────────

/// One WebRTC peer connection with its file-transfer data channel.
///
/// Owns every per-connection resource: the connection object, the
/// channel, the pending-ICE buffer, and the transfer state for both
/// directions. Constructed per call (caller or callee role) and torn
/// down explicitly — a new incoming offer always gets a fresh link
/// rather than a recycled one, so no event sink outlives its connection.
pub struct PeerLink {
    pub(crate) peer_connection: Arc<RTCPeerConnection>,
    /// The `filetransfer` data channel, present once created (caller) or
    /// announced by the transport (callee).
    pub(crate) transfer_channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,

    /// Last transport-reported state; see [`LinkState`].
    pub(crate) state: Arc<RwLock<LinkState>>,

    /// ICE candidates that arrived before the remote description was
    /// set; drained right after it is.
    pub(crate) pending_candidates: Arc<RwLock<Vec<RTCIceCandidateInit>>>,
    /// Whether a remote description has been applied.
    pub(crate) remote_described: Arc<AtomicBool>,
    /// Set once the caller's first offer has been sent; gates the
    /// renegotiation handler.
    pub(crate) offer_sent: Arc<AtomicBool>,

    /// Outgoing transfer pump (single-flight, cancellable).
    pub(crate) sender: FileSender,
    /// Incoming transfer reassembly, fed by the channel handlers.
    pub(crate) incoming: Arc<Mutex<IncomingTransfer>>,

    pub(crate) signaling: SignalingHandle,
    pub(crate) bus: EventBus,
}

impl PeerLink {
    /// Current connection state.
    pub async fn state(&self) -> LinkState {
        *self.state.read().await
    }

    /// Whether this link has been torn down or has failed terminally; a
    /// session seeing this builds a fresh link for the next offer.
    pub async fn is_defunct(&self) -> bool {
        matches!(self.state().await, LinkState::Failed | LinkState::Closed)
    }

    /// Send a file over the transfer channel.
    ///
    /// Requires the channel to be open; a second call while a transfer
    /// is in flight is ignored ([`SendStatus::AlreadyInFlight`]).
    pub async fn send_file(&self, path: impl AsRef<Path>) -> Result<SendStatus> {
        let dc = self
            .transfer_channel
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("Transfer channel not available"))?;
        if dc.ready_state() != RTCDataChannelState::Open {
            return Err(anyhow!(
                "Transfer channel not open: {:?}",
                dc.ready_state()
            ));
        }
        let sink = ChannelSink::new(dc);
        self.sender.send_file(&sink, path).await
    }

    /// Request cooperative cancellation of the in-flight outgoing
    /// transfer, if any.
    pub fn cancel_transfer(&self) {
        self.sender.cancel();
    }

    /// Tear the connection down.
    ///
    /// The resulting `closed` state is reported by the transport's own
    /// state-change callback, like every other transition.
    pub async fn close(&self) {
        if let Some(dc) = self.transfer_channel.read().await.clone() {
            let _ = dc.close().await;
        }
        if let Err(e) = self.peer_connection.close().await {
            tracing::warn!(event = "link_close_failed", error = %e, "Error closing peer connection");
        }
        info!(event = "link_closed", "Peer link torn down");
    }

    #[cfg(test)]
    pub(crate) async fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.read().await.len()
    }
}
