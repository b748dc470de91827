//! Data channel wiring: inbound frame dispatch and the live frame sink.
//!
//! Inbound messages are classified by the transfer codec and fed to the
//! link's [`IncomingTransfer`]; terminal outcomes and periodic progress
//! are republished on the event bus. Outbound, [`ChannelSink`] adapts
//! the channel to the sender's [`FrameSink`] seam: control frames as
//! channel text, chunks as binary.

use anyhow::Result;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

use crate::core::config::CHUNK_SIZE;
use crate::core::events::{EventBus, TransferEvent};
use crate::core::transfer::{FrameSink, IncomingTransfer, ReceiveOutcome, TransferFrame};

/// Emit a `ReceiveProgress` event roughly every this many chunks.
const RECEIVE_PROGRESS_INTERVAL_CHUNKS: u64 = 16;

// ── Outbound ──────────────────────────────────────────────────────────────────

/// [`FrameSink`] over a live data channel.
pub struct ChannelSink {
    dc: Arc<RTCDataChannel>,
}

impl ChannelSink {
    pub fn new(dc: Arc<RTCDataChannel>) -> Self {
        Self { dc }
    }
}

impl FrameSink for ChannelSink {
    async fn send_text(&self, text: String) -> Result<()> {
        self.dc.send_text(text).await?;
        Ok(())
    }

    async fn send_chunk(&self, data: Bytes) -> Result<()> {
        self.dc.send(&data).await?;
        Ok(())
    }
}

// ── Inbound ───────────────────────────────────────────────────────────────────

/// Attach `on_open` / `on_close` / `on_error` / `on_message` to the
/// transfer channel. Called exactly once per channel, right after it is
/// created (caller) or announced (callee).
pub(crate) fn attach_transfer_handlers(
    dc: &Arc<RTCDataChannel>,
    incoming: Arc<Mutex<IncomingTransfer>>,
    bus: EventBus,
) {
    {
        let label = dc.label().to_string();
        dc.on_open(Box::new(move || {
            let label = label.clone();
            Box::pin(async move {
                info!(event = "channel_open", channel = %label, "Data channel open");
            })
        }));
    }

    {
        let label = dc.label().to_string();
        dc.on_close(Box::new(move || {
            let label = label.clone();
            Box::pin(async move {
                warn!(event = "channel_closed", channel = %label, "Data channel closed by transport");
            })
        }));
    }

    {
        let label = dc.label().to_string();
        dc.on_error(Box::new(move |err| {
            let label = label.clone();
            Box::pin(async move {
                error!(event = "channel_error", channel = %label, error = %err, "Data channel transport error");
            })
        }));
    }

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let incoming = incoming.clone();
        let bus = bus.clone();
        Box::pin(async move {
            handle_message(&incoming, &bus, msg.is_string, msg.data).await;
        })
    }));
}

/// Dispatch one inbound channel message through the reassembly state
/// machine and publish whatever it produced.
pub(crate) async fn handle_message(
    incoming: &Mutex<IncomingTransfer>,
    bus: &EventBus,
    is_string: bool,
    data: Bytes,
) {
    let Some(frame) = TransferFrame::from_message(is_string, data) else {
        // Unknown text frames are dropped by the codec; nothing to do.
        return;
    };
    let is_chunk = matches!(frame, TransferFrame::Chunk(_));

    let mut transfer = incoming.lock().await;
    let outcome = transfer.accept_frame(frame);

    if outcome.is_none() && is_chunk {
        if let Some((received_bytes, total_bytes)) = transfer.progress() {
            let chunk_no = received_bytes.div_ceil(CHUNK_SIZE as u64);
            if chunk_no % RECEIVE_PROGRESS_INTERVAL_CHUNKS == 0 || received_bytes == total_bytes {
                bus.transfer(TransferEvent::ReceiveProgress {
                    received_bytes,
                    total_bytes,
                });
            }
        }
    }
    drop(transfer);

    match outcome {
        Some(ReceiveOutcome::Completed { bytes, mime_type }) => {
            bus.transfer(TransferEvent::FileReceived { bytes, mime_type });
        }
        Some(ReceiveOutcome::IntegrityFailure { reason }) => {
            debug!(event = "integrity_event_published", %reason);
            bus.transfer(TransferEvent::IntegrityFailure { reason });
        }
        Some(ReceiveOutcome::Cancelled) => {
            bus.transfer(TransferEvent::ReceiveCancelled);
        }
        None => {}
    }
}
