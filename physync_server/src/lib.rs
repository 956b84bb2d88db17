//! `physync_server`
//!
//! Server-side systems:
//! - Listener: accepts clients into the connection registry
//! - Connection registry: live connection membership
//! - Broadcast scheduler: pushes the snapshot set to every client on a fixed interval
//!
//! Networking model:
//! - TCP, one stream per client, server-to-client only
//! - One fixed-length frame per broadcast tick

pub mod broadcast;
pub mod listener;
pub mod registry;
pub mod server;

pub use broadcast::{BroadcastScheduler, TickReport};
pub use listener::Listener;
pub use registry::{ConnectionRegistry, FrameSink, SendOutcome, TcpPeer};
pub use server::{ServerExit, ServerTasks, SyncServer};
