//! # Configuration
//!
//! Runtime knobs shared by the send and receive controllers. They can be
//! built in code (`ReliabilityConfig { .. Default::default() }`) or loaded
//! from TOML:
//!
//! ```toml
//! version = 1
//!
//! [reliability]
//! packet_queue_limit = 512
//! packet_offset_limit = 4096
//! packet_queue_timeout_ms = 3000
//! packet_retransmit_limit = 5
//! rtt_k = 8
//! rtt_g = 4
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::seq::{Seq, DEFAULT_LIVE_WINDOW, HALF_SPACE};
use crate::store::MAX_KEYS_PER_RECORD;
use crate::wire::MAX_SEGMENTS_PER_UNIT;

pub const CONFIG_VERSION: u32 = 1;

// ─── Input (TOML) ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFileInput {
    pub version: u32,
    pub reliability: ReliabilityConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfigInput {
    pub packet_queue_limit: Option<usize>,
    pub packet_offset_limit: Option<u16>,
    pub packet_queue_timeout_ms: Option<u64>,
    pub packet_retransmit_limit: Option<u32>,
    pub rtt_k: Option<u32>,
    pub rtt_g: Option<u32>,
    pub initial_rto_ms: Option<u64>,
    pub min_rto_ms: Option<u64>,
    pub max_rto_ms: Option<u64>,
    pub initial_data_id: Option<u16>,
    pub initial_transmission_id: Option<u16>,
    pub max_segments_per_unit: Option<usize>,
}

// ─── Runtime Config ─────────────────────────────────────────────────────────

/// Reliability engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReliabilityConfig {
    /// Max pending (unacked) records before the oldest is force-evicted.
    pub packet_queue_limit: usize,
    /// Max distance the delivery cursor may lag the newest data id before
    /// the gap is skipped.
    pub packet_offset_limit: u16,
    /// Age after which a pending record is given up on, regardless of RTT.
    pub packet_queue_timeout: Option<Duration>,
    /// Max retransmissions per record.
    pub packet_retransmit_limit: u32,
    /// SRTT smoothing divisor.
    pub rtt_k: u32,
    /// RTTVAR smoothing divisor.
    pub rtt_g: u32,
    /// RTO used until the first RTT sample.
    pub initial_rto: Duration,
    pub min_rto: Duration,
    pub max_rto: Duration,
    /// First logical data id. Both peers must agree on it.
    pub initial_data_id: Seq,
    /// First transmission id.
    pub initial_transmission_id: Seq,
    /// Segments framed into one wire unit by the endpoint.
    pub max_segments_per_unit: usize,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        ReliabilityConfig {
            packet_queue_limit: 1024,
            packet_offset_limit: DEFAULT_LIVE_WINDOW,
            packet_queue_timeout: None,
            packet_retransmit_limit: 8,
            rtt_k: 8,
            rtt_g: 4,
            initial_rto: Duration::from_secs(1),
            min_rto: Duration::from_millis(10),
            max_rto: Duration::from_secs(60),
            initial_data_id: Seq::new(0),
            initial_transmission_id: Seq::new(0),
            max_segments_per_unit: MAX_SEGMENTS_PER_UNIT,
        }
    }
}

impl ReliabilityConfigInput {
    pub fn resolve(self) -> Result<ReliabilityConfig, ConfigError> {
        let d = ReliabilityConfig::default();
        let config = ReliabilityConfig {
            packet_queue_limit: self.packet_queue_limit.unwrap_or(d.packet_queue_limit),
            packet_offset_limit: self.packet_offset_limit.unwrap_or(d.packet_offset_limit),
            packet_queue_timeout: self
                .packet_queue_timeout_ms
                .map(Duration::from_millis)
                .or(d.packet_queue_timeout),
            packet_retransmit_limit: self
                .packet_retransmit_limit
                .unwrap_or(d.packet_retransmit_limit),
            rtt_k: self.rtt_k.unwrap_or(d.rtt_k),
            rtt_g: self.rtt_g.unwrap_or(d.rtt_g),
            initial_rto: self
                .initial_rto_ms
                .map(Duration::from_millis)
                .unwrap_or(d.initial_rto),
            min_rto: self
                .min_rto_ms
                .map(Duration::from_millis)
                .unwrap_or(d.min_rto),
            max_rto: self
                .max_rto_ms
                .map(Duration::from_millis)
                .unwrap_or(d.max_rto),
            initial_data_id: self
                .initial_data_id
                .map(Seq::new)
                .unwrap_or(d.initial_data_id),
            initial_transmission_id: self
                .initial_transmission_id
                .map(Seq::new)
                .unwrap_or(d.initial_transmission_id),
            max_segments_per_unit: self
                .max_segments_per_unit
                .unwrap_or(d.max_segments_per_unit),
        };
        config.validate()?;
        Ok(config)
    }
}

impl ReliabilityConfig {
    /// Parse a TOML document. An empty document yields the defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(ReliabilityConfig::default());
        }
        let parsed: ConfigFileInput = toml::from_str(input)?;
        let version = if parsed.version == 0 {
            CONFIG_VERSION
        } else {
            parsed.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }
        parsed.reliability.resolve()
    }

    /// Reject settings the engine cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.packet_queue_limit == 0 {
            return Err(ConfigError::invalid("packet_queue_limit", "must be at least 1"));
        }
        if self.packet_queue_limit >= HALF_SPACE as usize {
            return Err(ConfigError::invalid(
                "packet_queue_limit",
                format!("must stay below half the sequence space ({HALF_SPACE})"),
            ));
        }
        if self.packet_offset_limit == 0 || self.packet_offset_limit >= HALF_SPACE {
            return Err(ConfigError::invalid(
                "packet_offset_limit",
                format!("must be in 1..{HALF_SPACE}"),
            ));
        }
        // Original send plus every retransmission needs its own key.
        if self.packet_retransmit_limit as usize >= MAX_KEYS_PER_RECORD {
            return Err(ConfigError::invalid(
                "packet_retransmit_limit",
                format!("must be below {MAX_KEYS_PER_RECORD}"),
            ));
        }
        if self.rtt_k == 0 {
            return Err(ConfigError::invalid("rtt_k", "must be at least 1"));
        }
        if self.rtt_g == 0 {
            return Err(ConfigError::invalid("rtt_g", "must be at least 1"));
        }
        if self.min_rto > self.max_rto {
            return Err(ConfigError::invalid("min_rto_ms", "must not exceed max_rto_ms"));
        }
        if self.max_segments_per_unit == 0 || self.max_segments_per_unit > MAX_SEGMENTS_PER_UNIT {
            return Err(ConfigError::invalid(
                "max_segments_per_unit",
                format!("must be in 1..={MAX_SEGMENTS_PER_UNIT}"),
            ));
        }
        Ok(())
    }
}
