//! Outgoing-transfer chunk pump.
//!
//! [`FileSender`] frames a file per [`super::frame`] and pushes it
//! through a [`FrameSink`] — the live implementation is the WebRTC data
//! channel, tests use a collecting mock. The pump is single-flight per
//! session, checks the cancellation flag before every chunk, and yields
//! to the scheduler after every send so large files never monopolize the
//! event loop.

use anyhow::{Context, Result};
use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use super::frame::{EndHeader, StartHeader, TransferFrame};
use crate::core::config::CHUNK_SIZE;
use crate::core::events::{EventBus, TransferEvent};
use crate::utils::cancel::CancelFlag;
use crate::utils::{hash, mime};

/// Emit a `SendProgress` event every this many chunks (and on the last).
const PROGRESS_INTERVAL_CHUNKS: u32 = 16;

/// Transport seam for outgoing frames.
///
/// Control frames travel as channel text, chunks as binary. The sink is
/// assumed ordered and reliable (the data channel is created that way).
pub trait FrameSink {
    fn send_text(&self, text: String) -> impl std::future::Future<Output = Result<()>> + Send;
    fn send_chunk(&self, data: Bytes) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// How a [`FileSender::send_file`] call concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Every chunk plus the END frame went out.
    Completed,
    /// Cancellation was observed; a CANCEL frame was emitted instead of
    /// the remaining chunks.
    Cancelled,
    /// Another transfer was already in flight; this request was ignored.
    AlreadyInFlight,
}

/// Single-flight chunked file sender.
///
/// Clones share the in-flight flag and cancellation state, so any clone
/// can cancel the transfer another one started.
#[derive(Clone)]
pub struct FileSender {
    in_flight: Arc<AtomicBool>,
    cancel: CancelFlag,
    bus: EventBus,
}

/// Clears the in-flight flag even if the pump errors out.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FileSender {
    pub fn new(bus: EventBus) -> Self {
        Self {
            in_flight: Arc::new(AtomicBool::new(false)),
            cancel: CancelFlag::new(),
            bus,
        }
    }

    /// Whether a transfer is currently in flight.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Request cooperative cancellation of the in-flight transfer.
    ///
    /// The pump observes the flag before sending each chunk, so at most
    /// one already-started chunk goes out after this call.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Send one file through `sink`.
    ///
    /// The whole-file hash is computed before any frame is emitted (the
    /// START frame carries it). A second call while a transfer is in
    /// flight is ignored — [`SendStatus::AlreadyInFlight`] — never
    /// queued.
    pub async fn send_file<S: FrameSink>(
        &self,
        sink: &S,
        path: impl AsRef<Path>,
    ) -> Result<SendStatus> {
        let path = path.as_ref();

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(
                event = "send_rejected",
                path = %path.display(),
                "Transfer already in flight, ignoring send request"
            );
            return Ok(SendStatus::AlreadyInFlight);
        }
        let _guard = FlightGuard(&self.in_flight);
        self.cancel.reset();

        let total_bytes = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("reading metadata of {}", path.display()))?
            .len();
        let mime_type = mime::mime_type(path);

        // Integrity precondition: digest the full file before the first
        // frame so the receiver can verify after reassembly.
        let digest = hash::hash_file(path).await?;

        let total_chunks = total_bytes.div_ceil(CHUNK_SIZE as u64) as u32;
        info!(
            event = "file_send_start",
            path = %path.display(),
            mime = %mime_type,
            total_bytes,
            total_chunks,
            "Starting chunked file send"
        );

        let start = TransferFrame::Start(StartHeader {
            mime_type: mime_type.clone(),
            total_bytes,
            hash: digest,
        });
        sink.send_text(start.encode_text().expect("START is a text frame"))
            .await?;

        let mut file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening {} for sending", path.display()))?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut sent_chunks: u32 = 0;
        let mut sent_bytes: u64 = 0;

        loop {
            let n = read_full(&mut file, &mut buf).await?;
            if n == 0 {
                break;
            }

            // Cancellation is checked before the send, not after, so at
            // most the chunk already on the wire is wasted.
            if self.cancel.is_cancelled() {
                sink.send_text(TransferFrame::Cancel.encode_text().expect("CANCEL is text"))
                    .await?;
                info!(
                    event = "file_send_cancelled",
                    sent_chunks, sent_bytes, "Transfer cancelled locally, CANCEL frame sent"
                );
                self.bus
                    .transfer(TransferEvent::SendCancelled { sent_chunks });
                return Ok(SendStatus::Cancelled);
            }

            sink.send_chunk(Bytes::copy_from_slice(&buf[..n])).await?;
            sent_chunks += 1;
            sent_bytes += n as u64;

            if sent_chunks % PROGRESS_INTERVAL_CHUNKS == 0 || sent_chunks == total_chunks {
                self.bus.transfer(TransferEvent::SendProgress {
                    sent_chunks,
                    total_chunks,
                    sent_bytes,
                    total_bytes,
                });
            }

            // One chunk's worth of work per scheduler turn.
            tokio::task::yield_now().await;
        }

        if self.cancel.is_cancelled() {
            sink.send_text(TransferFrame::Cancel.encode_text().expect("CANCEL is text"))
                .await?;
            self.bus
                .transfer(TransferEvent::SendCancelled { sent_chunks });
            return Ok(SendStatus::Cancelled);
        }

        let end = TransferFrame::End(EndHeader { mime_type });
        sink.send_text(end.encode_text().expect("END is a text frame"))
            .await?;

        info!(
            event = "file_send_complete",
            sent_chunks, sent_bytes, "File fully sent"
        );
        self.bus
            .transfer(TransferEvent::SendComplete { total_bytes });
        Ok(SendStatus::Completed)
    }
}

/// Fill `buf` from `file`, tolerating EOF: returns the number of bytes
/// read, which is `buf.len()` except for the final partial chunk.
async fn read_full(file: &mut tokio::fs::File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transfer::frame::CANCEL_SENTINEL;
    use crate::core::transfer::receiver::{IncomingTransfer, ReceiveOutcome};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Collected sink output, preserving frame order and kind.
    #[derive(Debug, Clone)]
    enum SinkFrame {
        Text(String),
        Chunk(Bytes),
    }

    #[derive(Default)]
    struct MockSink {
        frames: Mutex<Vec<SinkFrame>>,
    }

    impl MockSink {
        fn frames(&self) -> Vec<SinkFrame> {
            self.frames.lock().unwrap().clone()
        }

        fn chunk_sizes(&self) -> Vec<usize> {
            self.frames()
                .iter()
                .filter_map(|f| match f {
                    SinkFrame::Chunk(c) => Some(c.len()),
                    SinkFrame::Text(_) => None,
                })
                .collect()
        }
    }

    impl FrameSink for MockSink {
        async fn send_text(&self, text: String) -> Result<()> {
            self.frames.lock().unwrap().push(SinkFrame::Text(text));
            Ok(())
        }

        async fn send_chunk(&self, data: Bytes) -> Result<()> {
            self.frames.lock().unwrap().push(SinkFrame::Chunk(data));
            Ok(())
        }
    }

    fn test_file(name: &str, data: &[u8]) -> PathBuf {
        let dir = std::env::temp_dir().join("peerlink_sender_test");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 241) as u8).collect()
    }

    #[tokio::test]
    async fn a_65000_byte_file_yields_exactly_two_chunks() {
        let path = test_file("sixty_five_k.bin", &patterned(65_000));
        let sink = MockSink::default();
        let sender = FileSender::new(EventBus::new());

        let status = sender.send_file(&sink, &path).await.unwrap();
        assert_eq!(status, SendStatus::Completed);

        let frames = sink.frames();
        assert_eq!(frames.len(), 4, "START + 2 chunks + END");
        assert!(matches!(&frames[0], SinkFrame::Text(t) if t.starts_with("__START__OF__FILE__")));
        assert!(matches!(&frames[3], SinkFrame::Text(t) if t.starts_with("__END__OF__FILE__")));
        assert_eq!(sink.chunk_sizes(), vec![32_768, 32_232]);
    }

    #[tokio::test]
    async fn chunk_counts_across_boundaries() {
        for (len, expected_chunks) in [(0usize, 0usize), (1, 1), (32_768, 1), (32_769, 2), (65_537, 3)] {
            let path = test_file(&format!("boundary_{len}.bin"), &patterned(len));
            let sink = MockSink::default();
            let sender = FileSender::new(EventBus::new());

            sender.send_file(&sink, &path).await.unwrap();
            assert_eq!(
                sink.chunk_sizes().len(),
                expected_chunks,
                "wrong chunk count for {len} bytes"
            );
        }
    }

    #[tokio::test]
    async fn round_trip_through_the_receiver_is_hash_equal() {
        for len in [0usize, 1, 32_768, 32_769, 65_537] {
            let data = patterned(len);
            let path = test_file(&format!("roundtrip_{len}.bin"), &data);
            let sink = MockSink::default();
            let sender = FileSender::new(EventBus::new());
            sender.send_file(&sink, &path).await.unwrap();

            let mut rx = IncomingTransfer::new();
            let mut outcome = None;
            for frame in sink.frames() {
                let decoded = match frame {
                    SinkFrame::Text(t) => TransferFrame::parse_text(&t).unwrap(),
                    SinkFrame::Chunk(c) => TransferFrame::Chunk(c),
                };
                if let Some(o) = rx.accept_frame(decoded) {
                    outcome = Some(o);
                }
            }
            match outcome.unwrap() {
                ReceiveOutcome::Completed { bytes, .. } => assert_eq!(&bytes[..], &data[..]),
                other => panic!("unexpected outcome for {len} bytes: {other:?}"),
            }
        }
    }

    /// Sink that cancels the transfer after a fixed number of chunks.
    struct CancellingSink {
        inner: MockSink,
        cancel_after: usize,
        sender: FileSender,
    }

    impl FrameSink for CancellingSink {
        async fn send_text(&self, text: String) -> Result<()> {
            self.inner.send_text(text).await
        }

        async fn send_chunk(&self, data: Bytes) -> Result<()> {
            self.inner.send_chunk(data).await?;
            if self.inner.chunk_sizes().len() >= self.cancel_after {
                self.sender.cancel();
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancellation_emits_exactly_one_cancel_and_no_more_chunks() {
        let data = patterned(CHUNK_SIZE * 5);
        let path = test_file("cancel_mid.bin", &data);
        let sender = FileSender::new(EventBus::new());
        let sink = CancellingSink {
            inner: MockSink::default(),
            cancel_after: 2,
            sender: sender.clone(),
        };

        let status = sender.send_file(&sink, &path).await.unwrap();
        assert_eq!(status, SendStatus::Cancelled);

        let frames = sink.inner.frames();
        assert_eq!(sink.inner.chunk_sizes().len(), 2, "no chunks after cancel");
        let cancels = frames
            .iter()
            .filter(|f| matches!(f, SinkFrame::Text(t) if t.as_str() == CANCEL_SENTINEL))
            .count();
        assert_eq!(cancels, 1, "exactly one CANCEL frame");
        assert!(
            !frames
                .iter()
                .any(|f| matches!(f, SinkFrame::Text(t) if t.starts_with("__END__OF__FILE__"))),
            "no END after cancellation"
        );

        // The receiver discards everything on CANCEL.
        let mut rx = IncomingTransfer::new();
        let mut outcome = None;
        for frame in frames {
            let decoded = match frame {
                SinkFrame::Text(t) => TransferFrame::parse_text(&t).unwrap(),
                SinkFrame::Chunk(c) => TransferFrame::Chunk(c),
            };
            if let Some(o) = rx.accept_frame(decoded) {
                outcome = Some(o);
            }
        }
        assert!(matches!(outcome, Some(ReceiveOutcome::Cancelled)));
    }

    /// Sink that parks on the START frame until released, exposing the
    /// in-flight window deterministically.
    struct GatedSink {
        inner: MockSink,
        started: Arc<Notify>,
        release: Arc<Notify>,
        gated: AtomicBool,
    }

    impl FrameSink for GatedSink {
        async fn send_text(&self, text: String) -> Result<()> {
            if !self.gated.swap(true, Ordering::AcqRel) {
                self.started.notify_one();
                self.release.notified().await;
            }
            self.inner.send_text(text).await
        }

        async fn send_chunk(&self, data: Bytes) -> Result<()> {
            self.inner.send_chunk(data).await
        }
    }

    #[tokio::test]
    async fn second_send_while_in_flight_is_ignored() {
        let path = test_file("single_flight.bin", &patterned(CHUNK_SIZE));
        let sender = FileSender::new(EventBus::new());
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let sink = Arc::new(GatedSink {
            inner: MockSink::default(),
            started: started.clone(),
            release: release.clone(),
            gated: AtomicBool::new(false),
        });

        let first = {
            let sender = sender.clone();
            let sink = sink.clone();
            let path = path.clone();
            tokio::spawn(async move { sender.send_file(sink.as_ref(), &path).await })
        };

        // Wait until the first transfer is provably in flight.
        started.notified().await;
        assert!(sender.is_in_flight());

        let second = sender.send_file(sink.as_ref(), &path).await.unwrap();
        assert_eq!(second, SendStatus::AlreadyInFlight);

        release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first, SendStatus::Completed);

        // Only one transfer's frames made it out: START, 1 chunk, END.
        assert_eq!(sink.inner.frames().len(), 3);
        assert!(!sender.is_in_flight());
    }
}
