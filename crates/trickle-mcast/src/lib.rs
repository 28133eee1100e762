//! Trickle-based IPv6 multicast forwarding for low-power mesh networks.
//!
//! The engine sits inside a constrained-node IPv6 stack and decides, for each
//! multicast datagram carrying the Trickle hop-by-hop option, whether to
//! accept it, buffer it, forward it, and when to re-transmit it — suppressed
//! by the sequence-list summaries neighbours exchange over ICMPv6.
//!
//! Two independent Trickle parametrizations run side by side, selected per
//! datagram by the option's M-bit. All state lives in fixed-capacity pools
//! sized at construction; the steady state never allocates inside the pools.
//!
//! The host drives the engine with explicit tick stamps: inject traffic via
//! [`Engine::accept`] / [`Engine::originate`] / [`Engine::icmp_input`], call
//! [`Engine::poll`] when [`Engine::next_poll_at`] comes due, and drain
//! outbound [`Frame`]s from the channel handed to [`Engine::new`].

pub mod config;
pub mod engine;
pub mod pools;
pub mod seqnum;
pub mod stack;
pub mod stats;
pub mod trickle;
pub mod wire;

pub use config::{EngineConfig, SeedMode, TimerParams, INFINITE_REDUNDANCY};
pub use engine::{Direction, Engine, Verdict, ALL_NODES, ALL_ROUTERS};
pub use pools::MAX_DATAGRAM;
pub use seqnum::{SeqNum, SerialOrd};
pub use stack::{Frame, FrameKind, HostStack};
pub use stats::{ForwarderStats, StatsSnapshot};
pub use wire::{SeedId, ICMP6_TRICKLE_MCAST};
