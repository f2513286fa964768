//! # RTT Estimation
//!
//! Smoothed round-trip time and variation with configurable divisors:
//!
//! ```text
//!   rttvar += (|sample - srtt| - rttvar) / G
//!   srtt   += (sample - srtt) / K
//!   rto     = clamp(srtt + 4 * rttvar, min_rto, max_rto)
//! ```
//!
//! With K = 8 and G = 4 this is the RFC 6298 estimator. The variation is
//! updated against the pre-sample SRTT, as in the RFC.

use std::time::Duration;

use crate::config::ReliabilityConfig;

/// SRTT/RTTVAR estimator fed by ack samples.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed RTT (SRTT) in µs.
    srtt_us: f64,
    /// RTT variation (RTTVAR) in µs.
    rttvar_us: f64,
    /// Minimum RTT observed.
    min_rtt_us: f64,
    /// Number of accepted samples.
    sample_count: u64,
    k: f64,
    g: f64,
    initial_rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
}

impl RttEstimator {
    pub fn new(config: &ReliabilityConfig) -> Self {
        RttEstimator {
            srtt_us: 0.0,
            rttvar_us: 0.0,
            min_rtt_us: f64::MAX,
            sample_count: 0,
            k: config.rtt_k as f64,
            g: config.rtt_g as f64,
            initial_rto: config.initial_rto,
            min_rto: config.min_rto,
            max_rto: config.max_rto,
        }
    }

    /// Feed one RTT sample.
    pub fn observe(&mut self, sample: Duration) {
        let rtt_us = sample.as_micros() as f64;
        self.sample_count += 1;
        if rtt_us < self.min_rtt_us {
            self.min_rtt_us = rtt_us;
        }

        if self.sample_count == 1 {
            self.srtt_us = rtt_us;
            self.rttvar_us = rtt_us / 2.0;
        } else {
            self.rttvar_us += ((self.srtt_us - rtt_us).abs() - self.rttvar_us) / self.g;
            self.srtt_us += (rtt_us - self.srtt_us) / self.k;
        }
    }

    /// Smoothed RTT, `None` before the first sample.
    pub fn srtt(&self) -> Option<Duration> {
        (self.sample_count > 0).then(|| Duration::from_micros(self.srtt_us as u64))
    }

    /// RTT variation.
    pub fn rttvar(&self) -> Duration {
        Duration::from_micros(self.rttvar_us as u64)
    }

    /// Smallest sample seen so far.
    pub fn min_rtt(&self) -> Option<Duration> {
        (self.sample_count > 0).then(|| Duration::from_micros(self.min_rtt_us as u64))
    }

    /// Retransmission timeout.
    pub fn rto(&self) -> Duration {
        let rto = if self.sample_count == 0 {
            self.initial_rto
        } else {
            Duration::from_micros((self.srtt_us + 4.0 * self.rttvar_us) as u64)
        };
        // max_rto wins when the bounds are inverted.
        rto.max(self.min_rto).min(self.max_rto)
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }
}
