//! Session pairing: PIN-based link requests and signaling-envelope
//! routing.
//!
//! A [`PeerSession`] owns the relay socket, the event bus, and the
//! (lazily created) peer link. Exactly one is active at a time. The
//! routing loop realizes the pairing flow:
//!
//! - user enters a PIN → [`start_call`] sends `link`
//! - relay pushes `accept-link` → after a fixed debounce this side
//!   becomes the caller and emits an offer
//! - `link-signal` envelopes drive the negotiator for both roles, with
//!   a fresh link constructed lazily when an offer arrives and none (or
//!   only a defunct one) exists
//!
//! [`start_call`]: PeerSession::start_call

use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::config::ACCEPT_LINK_DELAY;
use crate::core::events::{EventBus, PeerEvent};
use crate::core::link::PeerLink;
use crate::core::signaling::{
    SignalPayload, SignalingClient, SignalingEnvelope, SignalingHandle,
};
use crate::core::transfer::SendStatus;

/// Canonicalize a user-entered PIN: uppercase, all whitespace stripped.
///
/// Callers normalize before [`PeerSession::start_call`]; the helper
/// lives here so every call site agrees on the canonical form.
pub fn normalize_pin(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

type LinkSlot = Arc<RwLock<Option<Arc<PeerLink>>>>;

/// One signaling-relay session and its peer link.
pub struct PeerSession {
    signaling: SignalingHandle,
    bus: EventBus,
    link: LinkSlot,
    router: JoinHandle<()>,
}

impl PeerSession {
    /// Connect to the relay and start routing envelopes.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = SignalingClient::connect(url).await?;
        Ok(Self::from_client(client))
    }

    /// Build a session over an already-connected signaling client.
    pub fn from_client(client: SignalingClient) -> Self {
        let (handle, inbound) = client.into_parts();
        Self::with_parts(handle, inbound)
    }

    pub(crate) fn with_parts(
        signaling: SignalingHandle,
        inbound: mpsc::UnboundedReceiver<SignalingEnvelope>,
    ) -> Self {
        let bus = EventBus::new();
        let link: LinkSlot = Arc::new(RwLock::new(None));

        let router = tokio::spawn(route_loop(
            inbound,
            signaling.clone(),
            bus.clone(),
            link.clone(),
        ));

        Self {
            signaling,
            bus,
            link,
            router,
        }
    }

    /// Subscribe to connection-state and transfer events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PeerEvent> {
        self.bus.subscribe()
    }

    /// Request pairing with the session identified by `pin`.
    ///
    /// The PIN is sent as given — normalize with [`normalize_pin`]
    /// first. A silent no-op when the signaling socket is not open.
    pub fn start_call(&self, pin: &str) {
        if !self.signaling.is_open() {
            warn!(event = "start_call_dropped", "No open signaling connection, ignoring start_call");
            return;
        }
        info!(event = "start_call", target = pin, "Requesting link with peer session");
        self.signaling.send(SignalingEnvelope::Link {
            target: pin.to_string(),
        });
    }

    /// The current peer link, if one has been negotiated.
    pub async fn link(&self) -> Option<Arc<PeerLink>> {
        self.link.read().await.clone()
    }

    /// Send a file to the connected peer. Errors when no link exists or
    /// its transfer channel is not open.
    pub async fn send_file(&self, path: impl AsRef<Path>) -> Result<SendStatus> {
        let link = self
            .link()
            .await
            .ok_or_else(|| anyhow!("No peer link established"))?;
        link.send_file(path).await
    }

    /// Cancel the in-flight outgoing transfer, if any.
    pub async fn cancel_transfer(&self) {
        if let Some(link) = self.link().await {
            link.cancel_transfer();
        }
    }

    /// Tear down the session: the link, then the routing task.
    pub async fn close(&self) {
        if let Some(link) = self.link.write().await.take() {
            link.close().await;
        }
        self.router.abort();
        info!(event = "session_closed", "Peer session closed");
    }
}

async fn route_loop(
    mut inbound: mpsc::UnboundedReceiver<SignalingEnvelope>,
    signaling: SignalingHandle,
    bus: EventBus,
    link_slot: LinkSlot,
) {
    while let Some(envelope) = inbound.recv().await {
        match envelope {
            SignalingEnvelope::Link { target } => {
                // Relay echo of our own request; nothing to do.
                debug!(event = "link_echo", target = %target, "Relay acknowledged link request");
            }
            SignalingEnvelope::AcceptLink => {
                info!(event = "accept_link", "Pairing accepted, becoming caller");
                // Fixed debounce so the relay finishes bookkeeping on
                // both ends before the offer lands.
                tokio::time::sleep(ACCEPT_LINK_DELAY).await;
                become_caller(&signaling, &bus, &link_slot).await;
            }
            SignalingEnvelope::LinkSignal { data } => {
                route_signal(data, &signaling, &bus, &link_slot).await;
            }
        }
    }
    debug!(event = "router_stopped", "Signaling stream ended, routing loop exited");
}

async fn become_caller(signaling: &SignalingHandle, bus: &EventBus, link_slot: &LinkSlot) {
    // The old link (if any) is fully released before the replacement is
    // built, so no event sink survives onto the new connection.
    if let Some(old) = link_slot.write().await.take() {
        old.close().await;
    }
    match PeerLink::new_caller(signaling.clone(), bus.clone()).await {
        Ok(link) => *link_slot.write().await = Some(link),
        Err(e) => error!(event = "caller_setup_failed", error = %e, "Could not start as caller"),
    }
}

async fn route_signal(
    data: SignalPayload,
    signaling: &SignalingHandle,
    bus: &EventBus,
    link_slot: &LinkSlot,
) {
    match data {
        SignalPayload::Offer { sdp } => {
            let existing = link_slot.read().await.clone();
            if let Some(link) = &existing {
                if !link.is_defunct().await {
                    // Live link: this is a renegotiation round.
                    link.apply_offer(sdp).await;
                    return;
                }
            }
            // No link, or only a defunct one: release it fully, then
            // construct a fresh connection for this offer.
            if let Some(old) = existing {
                old.close().await;
                link_slot.write().await.take();
            }
            match PeerLink::new_callee(signaling.clone(), bus.clone(), sdp).await {
                Ok(link) => *link_slot.write().await = Some(link),
                Err(e) => {
                    error!(event = "callee_setup_failed", error = %e, "Could not answer offer")
                }
            }
        }
        SignalPayload::Answer { sdp } => match link_slot.read().await.clone() {
            Some(link) => link.apply_answer(sdp).await,
            None => warn!(event = "orphan_answer", "Answer with no link in progress, dropping"),
        },
        SignalPayload::IceCandidate { candidate } => match link_slot.read().await.clone() {
            Some(link) => link.apply_ice_candidate(candidate).await,
            None => {
                warn!(event = "orphan_candidate", "ICE candidate with no link in progress, dropping")
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn open_parts() -> (
        PeerSession,
        mpsc::UnboundedSender<SignalingEnvelope>,
        mpsc::UnboundedReceiver<SignalingEnvelope>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let handle = SignalingHandle::new(out_tx, Arc::new(AtomicBool::new(true)));
        (PeerSession::with_parts(handle, in_rx), in_tx, out_rx)
    }

    /// Poll `check` until it yields `Some` or the deadline passes.
    async fn wait_for<T>(
        mut check: impl FnMut() -> Option<T>,
        what: &str,
    ) -> T {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(value) = check() {
                return value;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {what}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn offer_from(envelopes: &mut Vec<SignalingEnvelope>) -> Option<String> {
        envelopes.iter().find_map(|env| match env {
            SignalingEnvelope::LinkSignal {
                data: SignalPayload::Offer { sdp },
            } => Some(sdp.clone()),
            _ => None,
        })
    }

    #[test]
    fn normalize_pin_uppercases_and_strips_whitespace() {
        assert_eq!(normalize_pin("ab12"), "AB12");
        assert_eq!(normalize_pin(" a b\t1 2 "), "AB12");
        assert_eq!(normalize_pin("AB12"), "AB12");
        assert_eq!(normalize_pin(""), "");
    }

    #[tokio::test]
    async fn start_call_without_open_connection_is_a_noop() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let handle = SignalingHandle::new(out_tx, Arc::new(AtomicBool::new(false)));
        let session = PeerSession::with_parts(handle, in_rx);

        session.start_call("AB12");

        assert!(out_rx.try_recv().is_err(), "no envelope may be sent");
        session.close().await;
    }

    #[tokio::test]
    async fn start_call_sends_the_link_envelope() {
        let (session, _in_tx, mut out_rx) = open_parts();

        session.start_call("AB12");

        match out_rx.try_recv().unwrap() {
            SignalingEnvelope::Link { target } => assert_eq!(target, "AB12"),
            other => panic!("unexpected envelope: {other:?}"),
        }
        session.close().await;
    }

    #[tokio::test]
    async fn accept_link_makes_this_side_offer() {
        let (session, in_tx, mut out_rx) = open_parts();

        in_tx.send(SignalingEnvelope::AcceptLink).unwrap();

        let mut seen = Vec::new();
        let sdp = wait_for(
            || {
                while let Ok(env) = out_rx.try_recv() {
                    seen.push(env);
                }
                offer_from(&mut seen)
            },
            "offer after accept-link",
        )
        .await;
        assert!(sdp.contains("v=0"), "offer must carry a non-empty sdp");
        assert!(session.link().await.is_some(), "caller link must exist");

        session.close().await;
    }

    #[tokio::test]
    async fn incoming_offer_lazily_constructs_the_link() {
        // Generate a realistic offer from an independent caller session.
        let (offer_session, offer_in, mut offer_out) = open_parts();
        offer_in.send(SignalingEnvelope::AcceptLink).unwrap();
        let mut seen = Vec::new();
        let offer_sdp = wait_for(
            || {
                while let Ok(env) = offer_out.try_recv() {
                    seen.push(env);
                }
                offer_from(&mut seen)
            },
            "offer sdp",
        )
        .await;

        let (session, in_tx, mut out_rx) = open_parts();
        assert!(session.link().await.is_none());

        in_tx
            .send(SignalingEnvelope::LinkSignal {
                data: SignalPayload::Offer { sdp: offer_sdp },
            })
            .unwrap();

        let answer = wait_for(
            || match out_rx.try_recv() {
                Ok(SignalingEnvelope::LinkSignal {
                    data: SignalPayload::Answer { sdp },
                }) => Some(sdp),
                _ => None,
            },
            "answer after offer",
        )
        .await;
        assert!(answer.contains("v=0"));
        assert!(
            session.link().await.is_some(),
            "callee link must be constructed before the remote description is applied"
        );

        offer_session.close().await;
        session.close().await;
    }

    #[tokio::test]
    async fn candidate_before_any_link_is_dropped_and_routing_survives() {
        let (session, in_tx, mut out_rx) = open_parts();

        in_tx
            .send(SignalingEnvelope::LinkSignal {
                data: SignalPayload::IceCandidate {
                    candidate: Default::default(),
                },
            })
            .unwrap();

        // The loop must still be alive: accept-link still produces an offer.
        in_tx.send(SignalingEnvelope::AcceptLink).unwrap();
        let mut seen = Vec::new();
        wait_for(
            || {
                while let Ok(env) = out_rx.try_recv() {
                    seen.push(env);
                }
                offer_from(&mut seen)
            },
            "offer after stray candidate",
        )
        .await;

        session.close().await;
    }
}
