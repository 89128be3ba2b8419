// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery database configuration (SPEC_FULL.md C9), grounded on the
//! teacher's `ServerConfig::from_file`/`validate` pattern.

use crate::error::DdbError;
use crate::guid::GuidPrefix;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

/// One upstream server this server pings its own DATA(p) to (§4.6 "ping").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpstreamServer {
    #[serde(with = "guid_prefix_hex")]
    pub guid_prefix: GuidPrefix,
    pub address: String,
}

mod guid_prefix_hex {
    use crate::guid::GuidPrefix;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(gp: &GuidPrefix, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(gp.0))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<GuidPrefix, D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        if bytes.len() != 12 {
            return Err(serde::de::Error::custom("guid prefix must be 12 bytes"));
        }
        let mut gp = [0u8; 12];
        gp.copy_from_slice(&bytes);
        Ok(GuidPrefix(gp))
    }
}

/// Discovery database / server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// This server's own GuidPrefix.
    #[serde(with = "guid_prefix_hex")]
    pub server_guid_prefix: GuidPrefix,

    /// Upstream servers this one forwards its own DATA(p) to.
    #[serde(default)]
    pub upstream_servers: Vec<UpstreamServer>,

    /// Server-routine tick period (§4.6), used to re-arm the timer when
    /// work remains but the queues are momentarily empty.
    #[serde(default = "default_routine_period_ms")]
    pub routine_period_ms: u64,

    /// Ping-routine interval: how often to re-send this server's DATA(p)
    /// to upstream servers that have not yet acked it (§4.6).
    #[serde(default = "default_ping_period_ms")]
    pub ping_period_ms: u64,

    /// Bind address for the demo binary's stub transport listener.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port for the demo binary's stub transport listener.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_routine_period_ms() -> u64 {
    100
}

fn default_ping_period_ms() -> u64 {
    5000
}

fn default_bind_address() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

fn default_port() -> u16 {
    7400
}

impl ServerConfig {
    /// Minimal config for a server identified by `server_guid_prefix`,
    /// with everything else at its default — convenient for tests.
    pub fn for_server(server_guid_prefix: GuidPrefix) -> Self {
        Self {
            server_guid_prefix,
            upstream_servers: Vec::new(),
            routine_period_ms: default_routine_period_ms(),
            ping_period_ms: default_ping_period_ms(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }

    pub fn routine_period(&self) -> Duration {
        Duration::from_millis(self.routine_period_ms)
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    pub fn from_file(path: &Path) -> Result<Self, DdbError> {
        let content = std::fs::read_to_string(path).map_err(|e| DdbError::Config(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| DdbError::Config(e.to_string()))
    }

    pub fn to_file(&self, path: &Path) -> Result<(), DdbError> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| DdbError::Config(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| DdbError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), DdbError> {
        if self.routine_period_ms == 0 {
            return Err(DdbError::Config("routine_period_ms cannot be 0".into()));
        }
        if self.ping_period_ms == 0 {
            return Err(DdbError::Config("ping_period_ms cannot be 0".into()));
        }
        if self.port == 0 {
            return Err(DdbError::Config("port cannot be 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gp(b: u8) -> GuidPrefix {
        let mut p = [0u8; 12];
        p[0] = b;
        GuidPrefix(p)
    }

    #[test]
    fn default_config_validates() {
        let cfg = ServerConfig::for_server(gp(1));
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.port, 7400);
    }

    #[test]
    fn rejects_zero_routine_period() {
        let mut cfg = ServerConfig::for_server(gp(1));
        cfg.routine_period_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let mut cfg = ServerConfig::for_server(gp(7));
        cfg.upstream_servers.push(UpstreamServer {
            guid_prefix: gp(9),
            address: "10.0.0.1:7400".into(),
        });
        let json = serde_json::to_string(&cfg).unwrap();
        let parsed: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.server_guid_prefix, parsed.server_guid_prefix);
        assert_eq!(cfg.upstream_servers, parsed.upstream_servers);
    }
}
