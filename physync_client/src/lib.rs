//! `physync_client`
//!
//! Client-side systems:
//! - Connection to the single server
//! - Receive loop: frame reassembly, decode, store write
//! - Application of received state to the local (non-authoritative) world

pub mod client;
pub mod receiver;

pub use client::SyncClient;
pub use receiver::{ReceiveStats, Receiver};
