//! `physync_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - One owned, fixed-size snapshot store instead of ambient global state.
//! - Non-blocking access with an explicit "skipped" outcome.
//! - A bit-exact, documented wire format.
//! - Traits for the physics seam so the sync layer stays engine-agnostic.
//! - No `unsafe`.

pub mod adapter;
pub mod config;
pub mod lifecycle;
pub mod math;
pub mod net;
pub mod physics;
pub mod snapshot;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::adapter::*;
    pub use crate::config::*;
    pub use crate::lifecycle::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::physics::*;
    pub use crate::snapshot::*;
}
