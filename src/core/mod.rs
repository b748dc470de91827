pub mod config;
pub mod events;
pub mod link;
pub mod session;
pub mod signaling;
pub mod transfer;
