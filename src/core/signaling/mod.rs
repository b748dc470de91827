//! Signaling client: one persistent WebSocket to the pairing relay.
//!
//! The client owns two tasks: a writer draining the outbound envelope
//! queue, and a reader parsing inbound text frames through the
//! fail-closed envelope parser. Cheap [`SignalingHandle`] clones are
//! handed to whoever needs to transmit (pairing, negotiator); a handle
//! whose socket is not open degrades every `send` to a logged no-op.
//!
//! There is no reconnect-on-drop: once the socket closes, the handle
//! stays closed and recovery is a fresh [`SignalingClient::connect`]
//! driven by the host.

pub mod envelope;

pub use envelope::{parse_envelope, SignalPayload, SignalingEnvelope};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Transmit side of the signaling socket.
///
/// Clones share the socket and its open-flag. Sending on a closed
/// handle is a deliberate no-op (warn-logged) — callers that care check
/// [`is_open`](SignalingHandle::is_open) first.
#[derive(Clone)]
pub struct SignalingHandle {
    outbound: mpsc::UnboundedSender<SignalingEnvelope>,
    open: Arc<AtomicBool>,
}

impl SignalingHandle {
    pub(crate) fn new(
        outbound: mpsc::UnboundedSender<SignalingEnvelope>,
        open: Arc<AtomicBool>,
    ) -> Self {
        Self { outbound, open }
    }

    /// Whether the underlying socket is currently open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Queue an envelope for transmission.
    ///
    /// No-op when the socket is not open; the envelope is dropped and a
    /// warning logged. Socket-level failures never surface here.
    pub fn send(&self, envelope: SignalingEnvelope) {
        if !self.is_open() {
            warn!(event = "signaling_send_dropped", "Signaling socket not open, dropping envelope");
            return;
        }
        if self.outbound.send(envelope).is_err() {
            self.open.store(false, Ordering::Release);
            warn!(event = "signaling_send_dropped", "Signaling writer gone, dropping envelope");
        }
    }
}

/// A connected signaling client.
pub struct SignalingClient {
    handle: SignalingHandle,
    inbound: mpsc::UnboundedReceiver<SignalingEnvelope>,
}

impl SignalingClient {
    /// Open the socket to the relay and spawn the reader/writer tasks.
    ///
    /// One socket per session; calling this again builds a new,
    /// independent client.
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("connecting signaling socket to {url}"))?;
        info!(event = "signaling_connected", url, "Signaling socket open");

        let (mut sink, mut source) = stream.split();
        let open = Arc::new(AtomicBool::new(true));

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SignalingEnvelope>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SignalingEnvelope>();

        // Writer: serialize and transmit queued envelopes until the
        // socket rejects a write or the handle side is dropped.
        let writer_open = open.clone();
        tokio::spawn(async move {
            while let Some(env) = out_rx.recv().await {
                let text = envelope::encode_envelope(&env);
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(event = "signaling_write_failed", error = %e, "Signaling socket write failed");
                    break;
                }
            }
            writer_open.store(false, Ordering::Release);
            debug!(event = "signaling_writer_stopped", "Signaling writer task exited");
        });

        // Reader: parse inbound text frames; anything unparseable is
        // swallowed by `parse_envelope`. Socket errors and close frames
        // end the session.
        let reader_open = open.clone();
        tokio::spawn(async move {
            while let Some(item) = source.next().await {
                match item {
                    Ok(Message::Text(text)) => {
                        if let Some(env) = parse_envelope(text.as_str()) {
                            if in_tx.send(env).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!(event = "signaling_closed", "Relay closed the signaling socket");
                        break;
                    }
                    // The relay speaks JSON text; tolerate anything else.
                    Ok(_) => {}
                    Err(e) => {
                        warn!(event = "signaling_read_failed", error = %e, "Signaling socket read failed");
                        break;
                    }
                }
            }
            reader_open.store(false, Ordering::Release);
            debug!(event = "signaling_reader_stopped", "Signaling reader task exited");
        });

        Ok(Self {
            handle: SignalingHandle::new(out_tx, open),
            inbound: in_rx,
        })
    }

    /// Transmit handle, cheaply cloneable.
    pub fn handle(&self) -> SignalingHandle {
        self.handle.clone()
    }

    /// Consume the client, yielding the transmit handle and the inbound
    /// envelope stream.
    pub fn into_parts(self) -> (SignalingHandle, mpsc::UnboundedReceiver<SignalingEnvelope>) {
        (self.handle, self.inbound)
    }
}
