//! # strata-reliable
//!
//! Strata reliability layer over unreliable datagrams.
//!
//! Adds acknowledgment, retransmission, RTT estimation and reconstruction of
//! the sender's order on top of a transport that may drop, duplicate or
//! reorder datagrams. Everything here is a pure state machine driven with an
//! explicit `now`; sockets, timers and serialization are injected.
//!
//! ## Crate structure
//!
//! - [`seq`]: 16-bit wraparound sequence ids and comparator
//! - [`window`]: Sliding receipt bit window
//! - [`store`]: Slab-backed multi-key record store
//! - [`rtt`]: SRTT/RTTVAR estimator and RTO
//! - [`wire`]: Wire unit layout and builder
//! - [`sender`]: Send-side pending/retransmission controller
//! - [`receiver`]: Receive-side duplicate filter and reorder controller
//! - [`endpoint`]: Per-peer glue over injected clock, codec and transport
//! - [`config`]: Runtime configuration and TOML loading
//! - [`stats`]: Sender and receiver counters
//! - [`error`]: Error types

pub mod config;
pub mod endpoint;
pub mod error;
pub mod receiver;
pub mod rtt;
pub mod sender;
pub mod seq;
pub mod stats;
pub mod store;
pub mod window;
pub mod wire;

pub use config::ReliabilityConfig;
pub use endpoint::{Clock, Endpoint, EndpointEvent, PayloadCodec, RawCodec, Transport};
pub use error::{CapacityError, ConfigError, EndpointError, WireError};
pub use receiver::{AckFields, ReceiveController, ReceiveEvent};
pub use sender::{SendController, SendEvent, UnackedReason};
pub use seq::Seq;
pub use wire::{Segment, WireUnit, WireUnitBuilder};
