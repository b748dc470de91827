//! Centralized configuration constants for the peer link engine.
//!
//! All tunable parameters live here so they can be reviewed and adjusted
//! in a single place. Wire-format constants (frame sentinels, envelope
//! tags) stay in their respective modules.

use std::time::Duration;

// ── Transfer / Chunking ──────────────────────────────────────────────────────

/// Maximum chunk payload in bytes (32 KiB).
///
/// Sized to fit comfortably under the 64 KB SCTP message ceiling that
/// browser-side receivers assume, while keeping each send small enough
/// that the per-chunk cooperative yield bounds event-loop stalls.
pub const CHUNK_SIZE: usize = 32 * 1024;

// ── Signaling / Pairing ──────────────────────────────────────────────────────

/// Fixed debounce between receiving `accept-link` and starting the offer
/// exchange as caller. Gives the relay time to finish pairing bookkeeping
/// on both ends. A constant delay, not a timeout with retry.
pub const ACCEPT_LINK_DELAY: Duration = Duration::from_millis(100);

// ── Connection / ICE ─────────────────────────────────────────────────────────

/// STUN servers used for candidate discovery. Standard ICE/STUN only.
pub const STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

/// Pre-gathered ICE candidate pool size handed to the transport.
pub const ICE_CANDIDATE_POOL_SIZE: u8 = 10;

/// Label of the file-transfer data channel.
pub const TRANSFER_CHANNEL_LABEL: &str = "filetransfer";

// ── UI / Misc ────────────────────────────────────────────────────────────────

/// Maximum log entries kept in the in-memory ring buffer.
pub const MAX_LOG_ENTRIES: usize = 500;

/// Capacity of the event bus broadcast channel. Slow UI subscribers that
/// fall more than this far behind skip ahead and miss events rather than
/// backpressuring the engine.
pub const EVENT_BUS_CAPACITY: usize = 256;
