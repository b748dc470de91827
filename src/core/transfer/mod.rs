//! Chunked file transfer over the peer data channel.
//!
//! `frame` defines the wire framing, `sender` pumps a local file out as
//! bounded chunks with cooperative cancellation, and `receiver`
//! reassembles and integrity-checks the mirror-image inbound stream.

pub mod frame;
pub mod receiver;
pub mod sender;

pub use frame::{EndHeader, StartHeader, TransferFrame};
pub use receiver::{IncomingTransfer, ReceiveOutcome};
pub use sender::{FileSender, FrameSink, SendStatus};
