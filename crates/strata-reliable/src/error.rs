//! Error types for the reliability layer.

use thiserror::Error;

use crate::seq::Seq;

// ── Capacity ────────────────────────────────────────────────────────

/// A record, segment or unit would fall outside its size bounds.
///
/// Raised instead of silently dropping data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapacityError {
    #[error("record {primary} already holds {limit} transmission ids")]
    TooManyKeys { primary: Seq, limit: usize },
    #[error("wire unit already holds {limit} segments")]
    TooManySegments { limit: usize },
    #[error("payload of {len} bytes exceeds the {limit}-byte segment limit")]
    PayloadTooLarge { len: usize, limit: usize },
    #[error("segment {data_id} carries no transmission id")]
    NoTransmissionIds { data_id: Seq },
}

// ── Wire ────────────────────────────────────────────────────────────

/// Structurally invalid wire unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("truncated wire unit: needed {needed} more bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },
    #[error("segment count {count} exceeds limit {limit}")]
    TooManySegments { count: usize, limit: usize },
    #[error("segment {data_id} lists {count} transmission ids, limit {limit}")]
    TooManyTransmissionIds {
        data_id: Seq,
        count: usize,
        limit: usize,
    },
    #[error("segment {data_id} lists no transmission ids")]
    NoTransmissionIds { data_id: Seq },
    #[error("{0} trailing bytes after the last segment")]
    TrailingBytes(usize),
}

// ── Config ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

// ── Endpoint ────────────────────────────────────────────────────────

/// Failures surfaced by [`Endpoint`](crate::endpoint::Endpoint).
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    #[error("malformed wire unit: {0}")]
    Malformed(#[from] WireError),
    #[error("payload codec failed: {0:#}")]
    Codec(anyhow::Error),
    #[error("transport send failed: {0:#}")]
    Transport(anyhow::Error),
}
