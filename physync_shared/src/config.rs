//! Configuration system.
//!
//! Loads sync configuration from JSON strings (file IO left to app).

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Rendezvous address, e.g. `127.0.0.1:56789`. Resolved at startup.
    pub server_addr: String,
    /// Fixed delay between broadcast ticks (server only).
    pub broadcast_interval_ms: u64,
    /// Simulation loop rate.
    pub tick_hz: u32,
    /// How long a frame that started sending may take to finish.
    pub send_timeout_ms: u64,
    /// Retry cadence for a received frame that could not be applied yet.
    pub receive_retry_ms: u64,
    /// Multiplier on standard gravity.
    pub gravity_scale: f32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:56789".to_string(),
            broadcast_interval_ms: 1000,
            tick_hz: 60,
            send_timeout_ms: 250,
            receive_retry_ms: 10,
            gravity_scale: 0.0,
        }
    }
}

impl SyncConfig {
    /// Parses config from JSON. Missing fields take their defaults.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn receive_retry(&self) -> Duration {
        Duration::from_millis(self.receive_retry_ms.max(1))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.tick_hz.max(1) as f32)
    }
}

/// Which side of the sync a process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Authoritative: simulates and broadcasts.
    Server,
    /// Passive observer: receives and applies.
    Client,
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim_start_matches('-') {
            "server" => Ok(Role::Server),
            "client" => Ok(Role::Client),
            other => anyhow::bail!("unknown mode '{other}', expected 'server' or 'client'"),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client => f.write_str("client"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = SyncConfig::from_json_str(r#"{ "server_addr": "10.0.0.2:4000", "broadcast_interval_ms": 50 }"#)
            .unwrap();
        assert_eq!(cfg.server_addr, "10.0.0.2:4000");
        assert_eq!(cfg.broadcast_interval(), Duration::from_millis(50));
        assert_eq!(cfg.tick_hz, SyncConfig::default().tick_hz);
    }

    #[test]
    fn role_accepts_dash_prefixed_flags() {
        assert_eq!("-server".parse::<Role>().unwrap(), Role::Server);
        assert_eq!("client".parse::<Role>().unwrap(), Role::Client);
        assert!("observer".parse::<Role>().is_err());
        assert!("".parse::<Role>().is_err());
    }
}
