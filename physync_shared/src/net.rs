//! Networking primitives.
//!
//! Wire format: one frame is a whole [`SnapshotSet`], `BODY_COUNT` records
//! back to back, each six little-endian IEEE-754 `f32`s in the order
//! `(pos.x, pos.y, orientation, vel.x, vel.y, angular_vel)`.
//! There is no header, length prefix, checksum or version. The frame length
//! is fixed at build time and must match on both ends.

use anyhow::Context;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::{
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
};

use crate::{
    math::Vec2,
    snapshot::{BodySnapshot, SnapshotSet, BODY_COUNT},
};

/// Encoded size of one body.
pub const BODY_WIRE_LEN: usize = 6 * std::mem::size_of::<f32>();

/// Encoded size of one frame.
pub const FRAME_LEN: usize = BODY_COUNT * BODY_WIRE_LEN;

static NEXT_CONN_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(pub u32);

impl ConnId {
    pub fn new_unique() -> Self {
        ConnId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Encodes a whole set into one frame.
pub fn encode_frame(set: &SnapshotSet) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_LEN);
    for body in set.iter() {
        buf.put_f32_le(body.position.x);
        buf.put_f32_le(body.position.y);
        buf.put_f32_le(body.orientation);
        buf.put_f32_le(body.linear_velocity.x);
        buf.put_f32_le(body.linear_velocity.y);
        buf.put_f32_le(body.angular_velocity);
    }
    buf.freeze()
}

/// Decodes exactly one frame.
pub fn decode_frame(mut b: &[u8]) -> anyhow::Result<SnapshotSet> {
    anyhow::ensure!(
        b.len() == FRAME_LEN,
        "frame length {} does not match expected {FRAME_LEN}",
        b.len()
    );
    let mut set = SnapshotSet::AT_REST;
    for body in set.iter_mut() {
        *body = BodySnapshot {
            position: Vec2::new(b.get_f32_le(), b.get_f32_le()),
            orientation: b.get_f32_le(),
            linear_velocity: Vec2::new(b.get_f32_le(), b.get_f32_le()),
            angular_velocity: b.get_f32_le(),
        };
    }
    Ok(set)
}

/// Resolves `host:port` to the first IPv4 address, falling back to any address.
pub async fn resolve_addr(addr: &str) -> anyhow::Result<SocketAddr> {
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("resolve {addr}"))?
        .collect();
    candidates
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .with_context(|| format!("resolve {addr}: no addresses"))
}
