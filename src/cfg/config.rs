// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, net::SocketAddr, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{
    publish::DEFAULT_PUBLISH_PORT,
    session::{PeerConfig, SessionLimits},
    transport::INITIAL_MAX_DATAGRAM,
};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// The FPGA peer this session connects to.
    pub peer: PeerSection,
    /// Per-request timeout and retry bookkeeping.
    pub timing: TimingSection,
    /// Bounded buffer sizes that aren't negotiated with the peer.
    pub limits: LimitsSection,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PeerSection {
    #[serde(rename = "Host")]
    pub host: String,
    #[serde(rename = "Port")]
    pub port: u16,
    /// The publish listener's port; defaults to `Port + 1` when omitted.
    #[serde(rename = "PublishPort", default)]
    pub publish_port: Option<u16>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingSection {
    #[serde(rename = "RequestTimeoutMs")]
    pub request_timeout_ms: u64,
    #[serde(rename = "MaxRetries")]
    pub max_retries: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LimitsSection {
    #[serde(rename = "TraceCapacity", default = "default_trace_capacity")]
    pub trace_capacity: usize,
    #[serde(rename = "TraceEntryBytes", default = "default_trace_entry_bytes")]
    pub trace_entry_bytes: usize,
}

fn default_trace_capacity() -> usize {
    8
}

fn default_trace_entry_bytes() -> usize {
    64
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants; YAML parsing alone can't enforce these.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(!self.peer.host.is_empty(), "peer.Host must not be empty");
        ensure!(self.peer.port != 0, "peer.Port must not be 0");
        ensure!(
            self.timing.max_retries >= 1,
            "timing.MaxRetries must be >= 1"
        );
        ensure!(
            self.timing.request_timeout_ms >= 1,
            "timing.RequestTimeoutMs must be >= 1"
        );
        ensure!(
            self.limits.trace_capacity >= 1,
            "limits.TraceCapacity must be >= 1"
        );

        if self.peer.publish_port.is_none() {
            self.peer.publish_port = Some(self.peer.port.wrapping_add(1));
        }

        Ok(())
    }

    pub fn publish_port(&self) -> u16 {
        self.peer
            .publish_port
            .unwrap_or(self.peer.port.wrapping_add(1))
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.peer.host, self.peer.port)
            .parse()
            .with_context(|| {
                format!("invalid peer address {}:{}", self.peer.host, self.peer.port)
            })
    }

    pub fn to_peer_config(&self) -> Result<PeerConfig> {
        Ok(PeerConfig {
            peer_addr: self.peer_addr()?,
            timeout: Duration::from_millis(self.timing.request_timeout_ms),
            max_retries: self.timing.max_retries,
        })
    }

    pub fn to_session_limits(&self) -> SessionLimits {
        SessionLimits {
            trace_capacity: self.limits.trace_capacity,
            trace_entry_bytes: self.limits.trace_entry_bytes,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peer: PeerSection {
                host: "127.0.0.1".to_string(),
                port: DEFAULT_PUBLISH_PORT - 1,
                publish_port: None,
            },
            timing: TimingSection {
                request_timeout_ms: 200,
                max_retries: 3,
            },
            limits: LimitsSection {
                trace_capacity: 8,
                trace_entry_bytes: INITIAL_MAX_DATAGRAM / 2,
            },
        }
    }
}
