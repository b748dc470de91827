//! Peer link initialization: offer/answer exchange, trickle ICE, and
//! transport event wiring.
//!
//! Every subscription on the connection object is registered here, at
//! construction time, exactly once. Teardown therefore never has to
//! unhook anything — dropping the link drops its callbacks with it, and
//! a replacement link starts from a clean set.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::{channel, LinkState, PeerLink};
use crate::core::config::{ICE_CANDIDATE_POOL_SIZE, STUN_SERVERS, TRANSFER_CHANNEL_LABEL};
use crate::core::events::EventBus;
use crate::core::signaling::{SignalPayload, SignalingEnvelope, SignalingHandle};
use crate::core::transfer::{FileSender, IncomingTransfer};

impl PeerLink {
    fn rtc_configuration() -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }],
            ice_candidate_pool_size: ICE_CANDIDATE_POOL_SIZE,
            ..Default::default()
        }
    }

    async fn create_api() -> Result<webrtc::api::API> {
        let mut media = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media)?;
        Ok(APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build())
    }

    /// Construct the connection object and register every transport
    /// subscription. Shared by both roles.
    async fn build(signaling: SignalingHandle, bus: EventBus) -> Result<Self> {
        let api = Self::create_api().await?;
        let pc = Arc::new(
            api.new_peer_connection(Self::rtc_configuration())
                .await
                .context("creating peer connection")?,
        );

        let state = Arc::new(RwLock::new(LinkState::New));
        let transfer_channel = Arc::new(RwLock::new(None));
        let pending_candidates = Arc::new(RwLock::new(Vec::new()));
        let remote_described = Arc::new(AtomicBool::new(false));
        let offer_sent = Arc::new(AtomicBool::new(false));
        let incoming = Arc::new(Mutex::new(IncomingTransfer::new()));
        let sender = FileSender::new(bus.clone());

        // State transitions come from the transport alone; this callback
        // is the only writer of `state`.
        {
            let state = state.clone();
            let bus = bus.clone();
            pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state = state.clone();
                let bus = bus.clone();
                Box::pin(async move {
                    let mapped = LinkState::from(s);
                    match mapped {
                        LinkState::Connected => {
                            info!(event = "link_connected", "Peer connection established")
                        }
                        LinkState::Failed => {
                            error!(event = "link_failed", "Peer connection failed")
                        }
                        LinkState::Disconnected => warn!(
                            event = "link_disconnected",
                            "Transient connection loss (ICE may recover)"
                        ),
                        LinkState::Closed => {
                            info!(event = "link_state_closed", "Peer connection closed")
                        }
                        LinkState::New | LinkState::Connecting => {
                            debug!(event = "link_state", state = %mapped)
                        }
                    }
                    *state.write().await = mapped;
                    bus.connection_state(mapped);
                })
            }));
        }

        // Trickle ICE: forward each candidate the moment it is
        // discovered. `None` marks end-of-candidates and is not relayed.
        {
            let signaling = signaling.clone();
            pc.on_ice_candidate(Box::new(move |candidate| {
                let signaling = signaling.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        debug!(event = "ice_gathering_done", "Local candidate gathering complete");
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            debug!(event = "ice_candidate_out", "Forwarding local ICE candidate");
                            signaling.send(SignalingEnvelope::LinkSignal {
                                data: SignalPayload::IceCandidate { candidate: init },
                            });
                        }
                        Err(e) => {
                            warn!(event = "ice_candidate_encode_failed", error = %e, "Could not serialize local candidate")
                        }
                    }
                })
            }));
        }

        // Renegotiation: once the initial offer is out, any change that
        // needs a new round (e.g. a channel added later) re-offers
        // automatically. Weak reference — the callback must not keep a
        // torn-down connection alive.
        {
            let pc_weak = Arc::downgrade(&pc);
            let offer_sent = offer_sent.clone();
            let signaling = signaling.clone();
            pc.on_negotiation_needed(Box::new(move || {
                let pc_weak = pc_weak.clone();
                let offer_sent = offer_sent.clone();
                let signaling = signaling.clone();
                Box::pin(async move {
                    if !offer_sent.load(Ordering::Acquire) {
                        return;
                    }
                    let Some(pc) = pc_weak.upgrade() else {
                        return;
                    };
                    match pc.create_offer(None).await {
                        Ok(offer) => {
                            let sdp = offer.sdp.clone();
                            if let Err(e) = pc.set_local_description(offer).await {
                                warn!(event = "renegotiation_failed", error = %e, "Could not set renegotiated offer");
                                return;
                            }
                            info!(event = "renegotiation_offer", "Re-offering after negotiation-needed");
                            signaling.send(SignalingEnvelope::LinkSignal {
                                data: SignalPayload::Offer { sdp },
                            });
                        }
                        Err(e) => {
                            warn!(event = "renegotiation_failed", error = %e, "Could not create renegotiated offer")
                        }
                    }
                })
            }));
        }

        Ok(Self {
            peer_connection: pc,
            transfer_channel,
            state,
            pending_candidates,
            remote_described,
            offer_sent,
            sender,
            incoming,
            signaling,
            bus,
        })
    }

    // ── Roles ─────────────────────────────────────────────────────────────

    /// Begin as the offering side: create the transfer channel, produce
    /// an offer, set it locally, and emit it via the relay.
    pub async fn new_caller(signaling: SignalingHandle, bus: EventBus) -> Result<Arc<Self>> {
        let link = Arc::new(Self::build(signaling, bus).await?);
        let pc = &link.peer_connection;

        // Explicit ordered + fully reliable (SCTP default).
        let dc = pc
            .create_data_channel(
                TRANSFER_CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await
            .context("creating transfer data channel")?;
        channel::attach_transfer_handlers(&dc, link.incoming.clone(), link.bus.clone());
        *link.transfer_channel.write().await = Some(dc);

        let offer = pc.create_offer(None).await.context("creating offer")?;
        let sdp = offer.sdp.clone();
        pc.set_local_description(offer)
            .await
            .context("setting local offer")?;
        link.offer_sent.store(true, Ordering::Release);

        info!(event = "offer_sent", "Created offer and sent via relay");
        link.signaling.send(SignalingEnvelope::LinkSignal {
            data: SignalPayload::Offer { sdp },
        });
        Ok(link)
    }

    /// Begin as the answering side from a received offer: construct the
    /// connection, apply the remote description, answer, and emit it.
    pub async fn new_callee(
        signaling: SignalingHandle,
        bus: EventBus,
        offer_sdp: String,
    ) -> Result<Arc<Self>> {
        let link = Arc::new(Self::build(signaling, bus).await?);
        let pc = &link.peer_connection;

        // The remote side created the channel; it arrives via the
        // transport's inbound-channel notification.
        {
            let transfer_channel = link.transfer_channel.clone();
            let incoming = link.incoming.clone();
            let bus = link.bus.clone();
            pc.on_data_channel(Box::new(move |dc| {
                let transfer_channel = transfer_channel.clone();
                let incoming = incoming.clone();
                let bus = bus.clone();
                Box::pin(async move {
                    if dc.label() != TRANSFER_CHANNEL_LABEL {
                        warn!(
                            event = "unexpected_channel",
                            label = %dc.label(),
                            "Ignoring data channel with unknown label"
                        );
                        return;
                    }
                    info!(event = "channel_announced", label = %dc.label(), "Transfer channel received");
                    channel::attach_transfer_handlers(&dc, incoming, bus);
                    *transfer_channel.write().await = Some(dc);
                })
            }));
        }

        let desc = RTCSessionDescription::offer(offer_sdp).context("parsing remote offer")?;
        pc.set_remote_description(desc)
            .await
            .context("applying remote offer")?;
        link.remote_described.store(true, Ordering::Release);
        link.drain_pending_candidates().await;

        let answer = pc.create_answer(None).await.context("creating answer")?;
        let sdp = answer.sdp.clone();
        pc.set_local_description(answer)
            .await
            .context("setting local answer")?;

        info!(event = "answer_sent", "Created answer and sent via relay");
        link.signaling.send(SignalingEnvelope::LinkSignal {
            data: SignalPayload::Answer { sdp },
        });
        Ok(link)
    }

    // ── Remote signals ────────────────────────────────────────────────────

    /// Apply a renegotiation offer on an already-established link and
    /// answer it. Failures are logged, never fatal — the previous
    /// description stays in effect.
    pub async fn apply_offer(&self, sdp: String) {
        let desc = match RTCSessionDescription::offer(sdp) {
            Ok(desc) => desc,
            Err(e) => {
                warn!(event = "reoffer_rejected", error = %e, "Ignoring malformed renegotiation offer");
                return;
            }
        };
        if let Err(e) = self.peer_connection.set_remote_description(desc).await {
            warn!(event = "reoffer_rejected", error = %e, "Could not apply renegotiation offer");
            return;
        }
        self.remote_described.store(true, Ordering::Release);
        self.drain_pending_candidates().await;

        let answer = match self.peer_connection.create_answer(None).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(event = "reanswer_failed", error = %e, "Could not answer renegotiation offer");
                return;
            }
        };
        let sdp = answer.sdp.clone();
        if let Err(e) = self.peer_connection.set_local_description(answer).await {
            warn!(event = "reanswer_failed", error = %e, "Could not set renegotiated answer");
            return;
        }
        info!(event = "reanswer_sent", "Answered renegotiation offer");
        self.signaling.send(SignalingEnvelope::LinkSignal {
            data: SignalPayload::Answer { sdp },
        });
    }

    /// Apply the remote answer. Late or duplicate answers are ignored,
    /// not errors — the relay may deliver replays.
    pub async fn apply_answer(&self, sdp: String) {
        if self.remote_described.load(Ordering::Acquire) {
            debug!(event = "answer_ignored", "Remote description already set, ignoring answer");
            return;
        }
        let desc = match RTCSessionDescription::answer(sdp) {
            Ok(desc) => desc,
            Err(e) => {
                warn!(event = "answer_rejected", error = %e, "Ignoring malformed answer");
                return;
            }
        };
        if let Err(e) = self.peer_connection.set_remote_description(desc).await {
            warn!(event = "answer_rejected", error = %e, "Could not apply remote answer");
            return;
        }
        self.remote_described.store(true, Ordering::Release);
        info!(event = "answer_applied", "Remote answer applied");
        self.drain_pending_candidates().await;
    }

    /// Apply a remote ICE candidate.
    ///
    /// Candidates racing ahead of the offer/answer are buffered until
    /// the remote description lands; individual add failures are logged
    /// and skipped — the exchange continues with whatever candidates
    /// succeed, and the link never fails purely because of ordering.
    pub async fn apply_ice_candidate(&self, candidate: RTCIceCandidateInit) {
        if !self.remote_described.load(Ordering::Acquire) {
            debug!(
                event = "ice_candidate_buffered",
                "Candidate arrived before remote description, buffering"
            );
            self.pending_candidates.write().await.push(candidate);
            return;
        }
        if let Err(e) = self.peer_connection.add_ice_candidate(candidate).await {
            warn!(event = "ice_candidate_rejected", error = %e, "Could not add remote candidate");
        }
    }

    async fn drain_pending_candidates(&self) {
        let drained: Vec<RTCIceCandidateInit> =
            std::mem::take(&mut *self.pending_candidates.write().await);
        if drained.is_empty() {
            return;
        }
        debug!(
            event = "ice_candidates_drained",
            count = drained.len(),
            "Applying buffered candidates"
        );
        for candidate in drained {
            if let Err(e) = self.peer_connection.add_ice_candidate(candidate).await {
                warn!(event = "ice_candidate_rejected", error = %e, "Buffered candidate rejected");
            }
        }
    }
}
