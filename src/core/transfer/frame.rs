//! Data-channel framing for file transfer.
//!
//! Control frames are text: a sentinel prefix followed by a JSON header.
//! Chunk frames are raw binary, at most [`CHUNK_SIZE`] bytes each.
//!
//! ```text
//! TEXT   "__START__OF__FILE__" + {"type": mime, "total": bytes, "hash": hex}
//! BINARY <chunk bytes>                              (repeated, offset order)
//! TEXT   "__END__OF__FILE__" + {"type": mime}
//! TEXT   "__CANCEL_TRANSFER_CACHE_EXISING__"        (either side, aborts)
//! ```
//!
//! Exactly one START precedes all chunks and exactly one terminal frame
//! (END or CANCEL) follows the last one; the receiver state machine in
//! [`super::receiver`] enforces this.
//!
//! [`CHUNK_SIZE`]: crate::core::config::CHUNK_SIZE

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Prefix of the transfer-opening control frame.
pub const START_SENTINEL: &str = "__START__OF__FILE__";

/// Prefix of the transfer-closing control frame.
pub const END_SENTINEL: &str = "__END__OF__FILE__";

/// Abort control frame. The spelling is historical but wire-compatible
/// with deployed peers; do not correct it.
pub const CANCEL_SENTINEL: &str = "__CANCEL_TRANSFER_CACHE_EXISING__";

/// JSON header carried by the START frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartHeader {
    /// MIME type of the file being transferred.
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Total payload size in bytes.
    #[serde(rename = "total")]
    pub total_bytes: u64,
    /// Hex-encoded SHA-256 digest of the whole file.
    pub hash: String,
}

/// JSON header carried by the END frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndHeader {
    #[serde(rename = "type")]
    pub mime_type: String,
}

/// One logical unit on the file-transfer channel.
#[derive(Debug, Clone)]
pub enum TransferFrame {
    Start(StartHeader),
    Chunk(Bytes),
    End(EndHeader),
    Cancel,
}

impl TransferFrame {
    /// Encode a control frame as channel text. `None` for [`Chunk`],
    /// which goes on the wire as raw binary.
    ///
    /// [`Chunk`]: TransferFrame::Chunk
    pub fn encode_text(&self) -> Option<String> {
        match self {
            TransferFrame::Start(header) => {
                let json = serde_json::to_string(header).unwrap_or_else(|_| "{}".into());
                Some(format!("{START_SENTINEL}{json}"))
            }
            TransferFrame::End(header) => {
                let json = serde_json::to_string(header).unwrap_or_else(|_| "{}".into());
                Some(format!("{END_SENTINEL}{json}"))
            }
            TransferFrame::Cancel => Some(CANCEL_SENTINEL.to_string()),
            TransferFrame::Chunk(_) => None,
        }
    }

    /// Parse a text message into a control frame.
    ///
    /// Unknown sentinels and malformed headers yield `None`; the channel
    /// dispatch drops such messages without disturbing transfer state.
    pub fn parse_text(text: &str) -> Option<TransferFrame> {
        if let Some(json) = text.strip_prefix(START_SENTINEL) {
            return match serde_json::from_str::<StartHeader>(json) {
                Ok(header) => Some(TransferFrame::Start(header)),
                Err(e) => {
                    debug!(event = "start_header_dropped", error = %e, "Dropping START frame with bad header");
                    None
                }
            };
        }
        if let Some(json) = text.strip_prefix(END_SENTINEL) {
            return match serde_json::from_str::<EndHeader>(json) {
                Ok(header) => Some(TransferFrame::End(header)),
                Err(e) => {
                    debug!(event = "end_header_dropped", error = %e, "Dropping END frame with bad header");
                    None
                }
            };
        }
        if text.starts_with(CANCEL_SENTINEL) {
            return Some(TransferFrame::Cancel);
        }
        debug!(event = "text_frame_dropped", "Dropping unrecognized text frame");
        None
    }

    /// Classify an inbound data-channel message.
    ///
    /// Binary messages are chunk frames; text messages go through
    /// [`parse_text`](TransferFrame::parse_text).
    pub fn from_message(is_string: bool, data: Bytes) -> Option<TransferFrame> {
        if is_string {
            Self::parse_text(&String::from_utf8_lossy(&data))
        } else {
            Some(TransferFrame::Chunk(data))
        }
    }
}
