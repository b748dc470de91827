//! Incoming-transfer reassembly.
//!
//! [`IncomingTransfer`] is a pure state machine: the channel dispatch
//! feeds it decoded [`TransferFrame`]s and it yields a terminal
//! [`ReceiveOutcome`] when a transfer completes, fails its integrity
//! check, or is cancelled. It owns no I/O — reconstructed bytes are
//! handed to the host via the event bus, and the host decides where (or
//! whether) they land on disk.

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::frame::{StartHeader, TransferFrame};
use crate::utils::hash::hash_bytes;

/// Largest buffer preallocated from a START header's declared size.
/// The declared total is untrusted; anything beyond this grows as data
/// actually arrives.
const MAX_PREALLOC: usize = 4 * 1024 * 1024;

/// Terminal result of one incoming transfer.
#[derive(Debug, Clone)]
pub enum ReceiveOutcome {
    /// Reassembled and verified: byte count and digest both match the
    /// START header.
    Completed { bytes: Bytes, mime_type: String },
    /// Length or hash mismatch. Buffered data was discarded; the channel
    /// stays usable for another attempt.
    IntegrityFailure { reason: String },
    /// The sender aborted; buffered data was discarded.
    Cancelled,
}

enum State {
    Idle,
    Receiving { header: StartHeader, buf: Vec<u8> },
}

/// Reassembles one file at a time from transfer frames.
pub struct IncomingTransfer {
    state: State,
}

impl IncomingTransfer {
    pub fn new() -> Self {
        Self { state: State::Idle }
    }

    /// Whether a transfer is currently buffering between START and a
    /// terminal frame.
    pub fn is_receiving(&self) -> bool {
        matches!(self.state, State::Receiving { .. })
    }

    /// `(received, total)` byte counts of the in-progress transfer.
    pub fn progress(&self) -> Option<(u64, u64)> {
        match &self.state {
            State::Receiving { header, buf } => Some((buf.len() as u64, header.total_bytes)),
            State::Idle => None,
        }
    }

    /// Feed one frame. Returns `Some` when the frame terminated a
    /// transfer (successfully or not); `None` while it is still in
    /// flight or the frame was dropped.
    pub fn accept_frame(&mut self, frame: TransferFrame) -> Option<ReceiveOutcome> {
        match frame {
            TransferFrame::Start(header) => self.on_start(header),
            TransferFrame::Chunk(data) => self.on_chunk(data),
            TransferFrame::End(_) => self.on_end(),
            TransferFrame::Cancel => self.on_cancel(),
        }
    }

    fn on_start(&mut self, header: StartHeader) -> Option<ReceiveOutcome> {
        if let State::Receiving { buf, .. } = &self.state {
            // A fresh START mid-transfer means the sender restarted;
            // the partial buffer is unusable.
            warn!(
                event = "transfer_restarted",
                discarded = buf.len(),
                "START received mid-transfer, discarding partial data"
            );
        }
        info!(
            event = "transfer_incoming",
            mime = %header.mime_type,
            total = header.total_bytes,
            "Incoming file transfer"
        );
        let capacity = usize::try_from(header.total_bytes)
            .unwrap_or(MAX_PREALLOC)
            .min(MAX_PREALLOC);
        self.state = State::Receiving {
            header,
            buf: Vec::with_capacity(capacity),
        };
        None
    }

    fn on_chunk(&mut self, data: Bytes) -> Option<ReceiveOutcome> {
        let State::Receiving { header, buf } = &mut self.state else {
            warn!(event = "orphan_chunk", len = data.len(), "Chunk with no transfer in progress");
            return None;
        };

        buf.extend_from_slice(&data);
        if (buf.len() as u64) > header.total_bytes {
            let received = buf.len() as u64;
            let declared = header.total_bytes;
            self.state = State::Idle;
            warn!(
                event = "transfer_overflow",
                received, declared, "Received more bytes than declared, discarding"
            );
            return Some(ReceiveOutcome::IntegrityFailure {
                reason: format!("received {received} bytes, sender declared {declared}"),
            });
        }
        None
    }

    fn on_end(&mut self) -> Option<ReceiveOutcome> {
        let State::Receiving { header, buf } = std::mem::replace(&mut self.state, State::Idle)
        else {
            warn!(event = "orphan_end", "END with no transfer in progress");
            return None;
        };

        if (buf.len() as u64) != header.total_bytes {
            warn!(
                event = "transfer_short",
                received = buf.len(),
                declared = header.total_bytes,
                "Byte count mismatch on END, discarding"
            );
            return Some(ReceiveOutcome::IntegrityFailure {
                reason: format!(
                    "received {} bytes, sender declared {}",
                    buf.len(),
                    header.total_bytes
                ),
            });
        }

        let digest = hash_bytes(&buf);
        if !digest.eq_ignore_ascii_case(&header.hash) {
            warn!(
                event = "transfer_hash_mismatch",
                expected = %header.hash,
                actual = %digest,
                "Digest mismatch on END, discarding"
            );
            return Some(ReceiveOutcome::IntegrityFailure {
                reason: "content hash does not match the declared hash".into(),
            });
        }

        info!(
            event = "transfer_received",
            bytes = buf.len(),
            mime = %header.mime_type,
            "File reassembled and verified"
        );
        Some(ReceiveOutcome::Completed {
            bytes: Bytes::from(buf),
            mime_type: header.mime_type,
        })
    }

    fn on_cancel(&mut self) -> Option<ReceiveOutcome> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Receiving { buf, .. } => {
                info!(
                    event = "transfer_cancelled_by_peer",
                    discarded = buf.len(),
                    "Peer cancelled transfer, discarding partial data"
                );
                Some(ReceiveOutcome::Cancelled)
            }
            State::Idle => {
                debug!(event = "orphan_cancel", "CANCEL with no transfer in progress");
                None
            }
        }
    }
}

impl Default for IncomingTransfer {
    fn default() -> Self {
        Self::new()
    }
}
