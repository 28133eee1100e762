//! Simulation report structs and the human-readable summary.

use serde::Serialize;
use trickle_mcast::StatsSnapshot;

#[derive(Debug, Serialize)]
pub struct MeshReport {
    pub ticks: u64,
    pub nodes: usize,
    pub topology: String,
    pub loss_pct: f64,
    /// Datagrams the configured originators successfully injected.
    pub datagrams_originated: u64,
    /// Originated datagrams that reached every node.
    pub full_deliveries: u64,
    /// Mean fraction of nodes reached per datagram, in percent.
    pub delivery_pct: f64,
    /// Data frames put on the air across the whole mesh (including the
    /// original transmissions).
    pub frames_data: u64,
    /// ICMPv6 summary frames put on the air.
    pub frames_control: u64,
    pub nodes_detail: Vec<NodeReport>,
}

#[derive(Debug, Serialize)]
pub struct NodeReport {
    pub node: usize,
    pub stats: StatsSnapshot,
}

impl MeshReport {
    /// Quick human-readable summary on stderr; the JSON report carries the detail.
    pub fn print_summary(&self) {
        eprintln!();
        eprintln!("=== MESH SUMMARY ({} ticks) ===", self.ticks);
        eprintln!(
            "  {} nodes ({}, {:.0}% loss)  originated={}  delivered-everywhere={}/{}  delivery={:.1}%",
            self.nodes,
            self.topology,
            self.loss_pct,
            self.datagrams_originated,
            self.full_deliveries,
            self.datagrams_originated,
            self.delivery_pct,
        );
        eprintln!(
            "  frames on air: {} data, {} control ({:.1} data frames per delivered copy)",
            self.frames_data,
            self.frames_control,
            if self.datagrams_originated > 0 && self.nodes > 1 {
                self.frames_data as f64
                    / (self.datagrams_originated as f64 * (self.nodes as f64 - 1.0))
            } else {
                0.0
            },
        );
        for n in &self.nodes_detail {
            let s = &n.stats;
            eprintln!(
                "  node {:>3}  in={}/{} uniq  fwd={}  out={}  dropped={}  bad={}  icmp {}/{} in/out (bad {})",
                n.node,
                s.mcast_in_unique,
                s.mcast_in_all,
                s.mcast_fwd,
                s.mcast_out,
                s.mcast_dropped,
                s.mcast_bad,
                s.icmp_in,
                s.icmp_out,
                s.icmp_bad,
            );
        }
    }
}
