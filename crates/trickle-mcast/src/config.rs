//! Engine configuration.
//!
//! On the constrained target these are build-time constants; a hosted engine
//! takes them once at construction and never changes them afterwards. One
//! engine instance, one fixed seed mode for its lifetime.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Sentinel redundancy constant: disables Trickle suppression entirely for
/// the timer that carries it.
pub const INFINITE_REDUNDANCY: u8 = 0xFF;

/// How originator seed-ids are carried on the wire.
///
/// `Short` embeds a 16-bit id inside the hop-by-hop option; `Long` elides the
/// id and uses the datagram's 128-bit source address instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedMode {
    Short,
    Long,
}

/// Parametrization of one Trickle timer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimerParams {
    /// Minimum interval length, in ticks.
    pub i_min: u64,
    /// Maximum number of interval doublings.
    pub doublings: u8,
    /// Redundancy constant `k`; [`INFINITE_REDUNDANCY`] disables suppression.
    pub k: u8,
    /// Active-lifetime budget, as a multiple of the maximum interval length.
    pub t_active: u32,
    /// Dwell-lifetime budget, as a multiple of the maximum interval length.
    pub t_dwell: u32,
}

impl TimerParams {
    /// Length in ticks of the fully-doubled interval (`I_max`).
    pub fn i_max_ticks(&self) -> u64 {
        self.i_min << self.doublings
    }

    /// Ticks a packet may still be re-transmitted for.
    pub fn t_active_ticks(&self) -> u64 {
        self.i_max_ticks() * self.t_active as u64
    }

    /// Ticks a packet must stay cached for summary listing.
    pub fn t_dwell_ticks(&self) -> u64 {
        self.i_max_ticks() * self.t_dwell as u64
    }

    pub fn suppression_enabled(&self) -> bool {
        self.k != INFINITE_REDUNDANCY
    }
}

/// Full engine configuration. `Default` mirrors the stock build constants.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub seed_mode: SeedMode,
    /// Summary destination: link-local all-nodes when true, all-routers when false.
    pub dest_all_nodes: bool,
    /// Default M-bit stamped onto locally originated datagrams.
    pub set_m_bit: bool,
    /// ICMPv6 code carried (and required) on summary messages.
    pub icmp_code: u8,
    /// Hop limit stamped on (and required of) summary messages.
    pub hop_limit: u8,
    /// Sliding-window pool size.
    pub windows: usize,
    /// Packet-buffer pool size.
    pub buffers: usize,
    /// The two Trickle parametrizations, indexed by the M-bit.
    pub timers: [TimerParams; 2],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed_mode: SeedMode::Short,
            dest_all_nodes: true,
            set_m_bit: false,
            icmp_code: 0,
            hop_limit: 255,
            windows: 4,
            buffers: 8,
            timers: [
                TimerParams { i_min: 100, doublings: 4, k: 2, t_active: 3, t_dwell: 5 },
                TimerParams { i_min: 64, doublings: 9, k: 1, t_active: 3, t_dwell: 5 },
            ],
        }
    }
}

impl EngineConfig {
    /// Sanity-check pool sizes and timer parameters. Pools are indexed by
    /// `u8`, and interval doubling must not shift `i_min` out of range.
    pub fn validate(&self) -> Result<()> {
        if self.windows == 0 || self.windows > 255 {
            bail!("window pool size must be in 1..=255, got {}", self.windows);
        }
        if self.buffers == 0 || self.buffers > 255 {
            bail!("packet pool size must be in 1..=255, got {}", self.buffers);
        }
        for (m, t) in self.timers.iter().enumerate() {
            if t.i_min < 2 {
                bail!("timer {m}: i_min must be at least 2 ticks, got {}", t.i_min);
            }
            if t.doublings > 32 {
                bail!("timer {m}: doublings must be at most 32, got {}", t.doublings);
            }
            if t.t_dwell == 0 {
                bail!("timer {m}: t_dwell must be non-zero");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_budget_ticks() {
        let t = TimerParams { i_min: 100, doublings: 4, k: 2, t_active: 3, t_dwell: 5 };
        assert_eq!(t.i_max_ticks(), 1600);
        assert_eq!(t.t_active_ticks(), 4800);
        assert_eq!(t.t_dwell_ticks(), 8000);
        assert!(t.suppression_enabled());
    }

    #[test]
    fn test_infinite_redundancy_disables_suppression() {
        let t = TimerParams { i_min: 32, doublings: 2, k: INFINITE_REDUNDANCY, t_active: 3, t_dwell: 5 };
        assert!(!t.suppression_enabled());
    }

    #[test]
    fn test_validate_rejects_oversized_pools() {
        let cfg = EngineConfig { windows: 256, ..EngineConfig::default() };
        assert!(cfg.validate().is_err());
        let cfg = EngineConfig { buffers: 0, ..EngineConfig::default() };
        assert!(cfg.validate().is_err());
    }
}
