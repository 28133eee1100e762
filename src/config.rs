//! `mesh.toml` configuration for trickle-mesh.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use trickle_mcast::{EngineConfig, SeedMode, TimerParams, INFINITE_REDUNDANCY};

/// Top-level simulation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimConfig {
    #[serde(default)]
    pub mesh: MeshConfig,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub traffic: TrafficConfig,
}

/// Shape of the virtual mesh and its links.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MeshConfig {
    /// Number of simulated nodes.
    #[serde(default = "MeshConfig::default_nodes")]
    pub nodes: usize,
    /// Topology: "line", "ring", "grid" or "full".
    #[serde(default = "MeshConfig::default_topology")]
    pub topology: String,
    /// Per-link, per-frame loss probability in percent.
    #[serde(default)]
    pub loss_pct: f64,
    /// Link propagation delay in ticks.
    #[serde(default = "MeshConfig::default_link_delay")]
    pub link_delay: u64,
    /// Seed for the simulation PRNGs (links and per-node hosts).
    #[serde(default)]
    pub rng_seed: u64,
    /// How many ticks to simulate.
    #[serde(default = "MeshConfig::default_ticks")]
    pub ticks: u64,
}

impl MeshConfig {
    fn default_nodes() -> usize { 8 }
    fn default_topology() -> String { "line".into() }
    fn default_link_delay() -> u64 { 1 }
    fn default_ticks() -> u64 { 20_000 }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            nodes: Self::default_nodes(),
            topology: Self::default_topology(),
            loss_pct: 0.0,
            link_delay: Self::default_link_delay(),
            rng_seed: 0,
            ticks: Self::default_ticks(),
        }
    }
}

/// Engine knobs, one section per mesh — every node runs the same build.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSection {
    #[serde(default = "EngineSection::default_seed_mode")]
    pub seed_mode: SeedMode,
    /// Sliding-window pool size per node.
    #[serde(default = "EngineSection::default_windows")]
    pub windows: usize,
    /// Packet-buffer pool size per node.
    #[serde(default = "EngineSection::default_buffers")]
    pub buffers: usize,
    /// Send summaries to all-nodes (true) or all-routers (false).
    #[serde(default = "EngineSection::default_dest_all_nodes")]
    pub dest_all_nodes: bool,
    /// M-bit stamped on locally originated datagrams.
    #[serde(default)]
    pub set_m_bit: bool,
    /// ICMPv6 code for summary messages.
    #[serde(default)]
    pub icmp_code: u8,
    /// Hop limit on summary messages.
    #[serde(default = "EngineSection::default_hop_limit")]
    pub hop_limit: u8,
    /// Exactly two entries, one per Trickle parametrization.
    #[serde(default = "EngineSection::default_timers")]
    pub timers: Vec<TimerSection>,
}

/// One Trickle parametrization.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimerSection {
    pub i_min: u64,
    pub doublings: u8,
    /// Redundancy constant; omit to disable suppression entirely.
    pub k: Option<u8>,
    pub t_active: u32,
    pub t_dwell: u32,
}

impl EngineSection {
    fn default_seed_mode() -> SeedMode { SeedMode::Short }
    fn default_windows() -> usize { 4 }
    fn default_buffers() -> usize { 8 }
    fn default_dest_all_nodes() -> bool { true }
    fn default_hop_limit() -> u8 { 255 }
    fn default_timers() -> Vec<TimerSection> {
        vec![
            TimerSection { i_min: 100, doublings: 4, k: Some(2), t_active: 3, t_dwell: 5 },
            TimerSection { i_min: 64, doublings: 9, k: Some(1), t_active: 3, t_dwell: 5 },
        ]
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            seed_mode: Self::default_seed_mode(),
            windows: Self::default_windows(),
            buffers: Self::default_buffers(),
            dest_all_nodes: Self::default_dest_all_nodes(),
            set_m_bit: false,
            icmp_code: 0,
            hop_limit: Self::default_hop_limit(),
            timers: Self::default_timers(),
        }
    }
}

/// What the mesh originates during the run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrafficConfig {
    /// Node indices that originate datagrams.
    #[serde(default = "TrafficConfig::default_originators")]
    pub originators: Vec<usize>,
    /// Tick of the first origination.
    #[serde(default = "TrafficConfig::default_start_tick")]
    pub start_tick: u64,
    /// Ticks between originations per originator.
    #[serde(default = "TrafficConfig::default_interval")]
    pub interval: u64,
    /// Datagrams each originator sends in total.
    #[serde(default = "TrafficConfig::default_count")]
    pub count: u32,
    /// Application payload bytes per datagram.
    #[serde(default = "TrafficConfig::default_payload_len")]
    pub payload_len: usize,
}

impl TrafficConfig {
    fn default_originators() -> Vec<usize> { vec![0] }
    fn default_start_tick() -> u64 { 10 }
    fn default_interval() -> u64 { 4_000 }
    fn default_count() -> u32 { 3 }
    fn default_payload_len() -> usize { 32 }
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            originators: Self::default_originators(),
            start_tick: Self::default_start_tick(),
            interval: Self::default_interval(),
            count: Self::default_count(),
            payload_len: Self::default_payload_len(),
        }
    }
}

impl SimConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(cfg)
    }

    /// Returns a default config matching an 8-node lossy line.
    pub fn default_example() -> Self {
        Self {
            mesh: MeshConfig { loss_pct: 10.0, ..MeshConfig::default() },
            engine: EngineSection::default(),
            traffic: TrafficConfig::default(),
        }
    }

    /// Translate the `[engine]` section into the library configuration.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let e = &self.engine;
        if e.timers.len() != 2 {
            bail!("[engine] needs exactly 2 timer entries, got {}", e.timers.len());
        }
        let timer = |t: &TimerSection| TimerParams {
            i_min: t.i_min,
            doublings: t.doublings,
            k: t.k.unwrap_or(INFINITE_REDUNDANCY),
            t_active: t.t_active,
            t_dwell: t.t_dwell,
        };
        let cfg = EngineConfig {
            seed_mode: e.seed_mode,
            dest_all_nodes: e.dest_all_nodes,
            set_m_bit: e.set_m_bit,
            icmp_code: e.icmp_code,
            hop_limit: e.hop_limit,
            windows: e.windows,
            buffers: e.buffers,
            timers: [timer(&e.timers[0]), timer(&e.timers[1])],
        };
        cfg.validate()?;
        Ok(cfg)
    }
}
