//! The forwarder core.
//!
//! A single event-driven engine: the accept/drop/buffer decision for
//! multicast datagrams, inconsistency detection from incoming summary
//! messages, scheduled re-transmission under Trickle suppression, and
//! per-packet lifetime expiry.
//!
//! Everything runs to completion inside the host's main loop. The host calls
//! [`Engine::poll`] with the current tick whenever the deadline reported by
//! [`Engine::next_poll_at`] comes due; datagrams and summaries are injected
//! through [`Engine::accept`], [`Engine::originate`] and
//! [`Engine::icmp_input`]; outbound traffic drains from the frame channel
//! handed to [`Engine::new`].

use std::net::Ipv6Addr;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use anyhow::Result;
use crossbeam_channel::Sender;

use crate::config::{EngineConfig, SeedMode};
use crate::pools::{Pools, MAX_DATAGRAM};
use crate::seqnum::{SeqNum, SerialOrd};
use crate::stack::{Frame, HostStack};
use crate::stats::ForwarderStats;
use crate::trickle::{TimerPhase, TrickleTimer};
use crate::wire::{
    self, Ipv6Header, SeedId, SummaryReader, SummaryWriter, TrickleOption, HBH_TOTAL_LEN,
    HOP_LIMIT_OFF, ICMP6_HDR_LEN, ICMP6_TRICKLE_MCAST, IPV6_HDR_LEN, PROTO_HBH, PROTO_ICMP6,
};

/// Link-local all-nodes multicast group.
pub const ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xFF02, 0, 0, 0, 0, 0, 0, 1);
/// Link-local all-routers multicast group.
pub const ALL_ROUTERS: Ipv6Addr = Ipv6Addr::new(0xFF02, 0, 0, 0, 0, 0, 0, 2);

/// Where a datagram entered the accept path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Outcome of the accept decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Drop,
}

pub struct Engine<H: HostStack> {
    cfg: EngineConfig,
    host: H,
    pools: Pools,
    timers: [TrickleTimer; 2],
    last_seq: SeqNum,
    out: Sender<Frame>,
    stats: Arc<ForwarderStats>,
}

impl<H: HostStack> Engine<H> {
    /// Build the engine: allocate the pools, configure both timers and start
    /// them at `now`.
    pub fn new(cfg: EngineConfig, mut host: H, out: Sender<Frame>, now: u64) -> Result<Self> {
        cfg.validate()?;
        let pools = Pools::new(cfg.windows, cfg.buffers);
        let mut timers = [TrickleTimer::new(cfg.timers[0]), TrickleTimer::new(cfg.timers[1])];
        for t in &mut timers {
            let r = host.rand();
            t.start(now, r);
        }
        tracing::info!(
            windows = cfg.windows,
            buffers = cfg.buffers,
            seed_mode = ?cfg.seed_mode,
            "trickle multicast engine started"
        );
        Ok(Self { cfg, host, pools, timers, last_seq: SeqNum::new(0), out, stats: ForwarderStats::new() })
    }

    pub fn stats(&self) -> Arc<ForwarderStats> {
        self.stats.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Earliest tick at which [`Engine::poll`] has work to do.
    pub fn next_poll_at(&self) -> Option<u64> {
        self.timers.iter().filter_map(|t| t.next_deadline()).min()
    }

    /// Fire every due timer callback, earliest deadline first. A host that
    /// fell behind catches up here: expired interval ends and transmit
    /// points replay in order against the current tick.
    pub fn poll(&mut self, now: u64) {
        loop {
            let mut due: Option<(usize, u64)> = None;
            for m in 0..2 {
                if let Some(at) = self.timers[m].next_deadline() {
                    if at <= now && due.map_or(true, |(_, best)| at < best) {
                        due = Some((m, at));
                    }
                }
            }
            let Some((m, _)) = due else { break };
            let Some(phase) = self.timers[m].take_due(now) else { break };
            match phase {
                TimerPhase::Transmit => self.periodic(m, now),
                TimerPhase::IntervalEnd => {
                    let r = self.host.rand();
                    self.timers[m].double_interval(now, r);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Accept decision
    // -----------------------------------------------------------------------

    /// Decide whether to take a multicast datagram into the buffer pool.
    /// Applied identically to inbound traffic and to locally originated
    /// datagrams that [`Engine::originate`] has already wrapped.
    pub fn accept(&mut self, now: u64, datagram: &[u8], dir: Direction) -> Verdict {
        if dir == Direction::Inbound {
            self.stats.mcast_in_all.fetch_add(1, Relaxed);
        }

        let hdr = match Ipv6Header::parse(datagram) {
            Ok(h) => h,
            Err(e) => {
                tracing::debug!(err = %e, "mcast: unparseable datagram");
                return self.bad_mcast();
            }
        };
        if !wire::is_mcast_routable(&hdr.dst) || hdr.src.is_unspecified() {
            return self.bad_mcast();
        }
        if hdr.next_header != PROTO_HBH {
            return self.bad_mcast();
        }
        let opt = match TrickleOption::decode(&datagram[IPV6_HDR_LEN..], self.cfg.seed_mode) {
            Ok(o) => o,
            Err(e) => {
                tracing::debug!(err = %e, "mcast: bad trickle option");
                return self.bad_mcast();
            }
        };
        let seed = match self.cfg.seed_mode {
            SeedMode::Short => SeedId::Short(opt.seed16.unwrap_or(0)),
            SeedMode::Long => SeedId::Long(hdr.src),
        };
        if seed.is_null() {
            return self.bad_mcast();
        }
        if datagram.len() > MAX_DATAGRAM {
            return self.drop_mcast();
        }
        let m = opt.m as usize;
        let seq = opt.seq;

        let existing = self.pools.window_lookup(&seed, m as u8);
        if let Some(wi) = existing {
            if let Some(lower) = self.pools.windows[wi as usize].lower {
                if seq.serial_cmp(lower).is_lt() {
                    tracing::trace!(seq = seq.value(), "mcast: stale sequence value");
                    return self.drop_mcast();
                }
            }
            if self.pools.find_packet(wi, seq).is_some() {
                tracing::trace!(seq = seq.value(), "mcast: duplicate");
                return self.drop_mcast();
            }
        }
        let wi = match existing.or_else(|| self.pools.window_alloc()) {
            Some(wi) => wi,
            None => return self.drop_mcast(),
        };
        let pi = match self.pools.buffer_alloc().or_else(|| self.pools.buffer_reclaim()) {
            Some(pi) => pi,
            None => {
                // roll back a window we only just claimed
                if self.pools.windows[wi as usize].count == 0 {
                    self.pools.window_free(wi);
                }
                return self.drop_mcast();
            }
        };

        {
            let w = &mut self.pools.windows[wi as usize];
            w.seed = seed;
            w.timer = m as u8;
            if w.count == 0 {
                w.lower = Some(seq);
            }
            if w.count == 0 || w.upper.map_or(true, |u| seq.serial_cmp(u).is_gt()) {
                w.upper = Some(seq);
            }
            w.count += 1;
        }
        {
            let p = &mut self.pools.buffers[pi as usize];
            p.window = wi;
            p.seq = seq;
            p.len = datagram.len() as u16;
            p.data[..datagram.len()].copy_from_slice(datagram);
            if dir == Direction::Inbound {
                p.must_send = true;
                // the cached copy travels one hop further than the original
                p.data[HOP_LIMIT_OFF] = p.data[HOP_LIMIT_OFF].saturating_sub(1);
            }
        }
        if dir == Direction::Inbound {
            self.stats.mcast_in_unique.fetch_add(1, Relaxed);
        }

        let r = self.host.rand();
        self.timers[m].inconsistency = true;
        self.timers[m].reset(now, r);
        Verdict::Accept
    }

    // -----------------------------------------------------------------------
    // Originate
    // -----------------------------------------------------------------------

    /// Wrap a locally generated multicast datagram with the Trickle option
    /// and, if the accept path takes it, emit it.
    pub fn originate(&mut self, now: u64, datagram: &[u8]) -> Verdict {
        let hdr = match Ipv6Header::parse(datagram) {
            Ok(h) => h,
            Err(_) => return self.bad_mcast(),
        };
        let total = IPV6_HDR_LEN + hdr.payload_len as usize;
        if total + HBH_TOTAL_LEN > MAX_DATAGRAM {
            tracing::debug!(len = total, "originate: no room for the hop-by-hop expansion");
            return Verdict::Drop;
        }

        self.last_seq = self.last_seq.serial_add(1);
        let opt = TrickleOption {
            seed16: match self.cfg.seed_mode {
                SeedMode::Short => Some(self.host.link_addr_short()),
                SeedMode::Long => None,
            },
            m: self.cfg.set_m_bit,
            seq: self.last_seq,
        };

        // slide the payload forward by the option block and fix up the header
        let mut work = [0u8; MAX_DATAGRAM];
        work[..IPV6_HDR_LEN].copy_from_slice(&datagram[..IPV6_HDR_LEN]);
        work[IPV6_HDR_LEN..IPV6_HDR_LEN + HBH_TOTAL_LEN]
            .copy_from_slice(&opt.encode(hdr.next_header, self.cfg.seed_mode));
        work[IPV6_HDR_LEN + HBH_TOTAL_LEN..total + HBH_TOTAL_LEN]
            .copy_from_slice(&datagram[IPV6_HDR_LEN..total]);
        let new_payload = hdr.payload_len + HBH_TOTAL_LEN as u16;
        work[4..6].copy_from_slice(&new_payload.to_be_bytes());
        work[6] = PROTO_HBH;
        let wire_len = IPV6_HDR_LEN + new_payload as usize;

        match self.accept(now, &work[..wire_len], Direction::Outbound) {
            Verdict::Accept => {
                self.send(Frame::data(work[..wire_len].to_vec()));
                self.stats.mcast_out.fetch_add(1, Relaxed);
                Verdict::Accept
            }
            Verdict::Drop => Verdict::Drop,
        }
    }

    // -----------------------------------------------------------------------
    // Periodic per-timer processing
    // -----------------------------------------------------------------------

    /// The transmit-point callback: advance lifetimes, re-send what must go,
    /// summarise, re-arm the interval end.
    fn periodic(&mut self, m: usize, now: u64) {
        if self.host.link_local_addr().is_none() {
            // stack not ready: no I/O this interval
            let r = self.host.rand();
            self.timers[m].reset(now, r);
            return;
        }

        let diff_last = now.saturating_sub(self.timers[m].t_last_trigger);
        let diff_start = now.saturating_sub(self.timers[m].t_start);
        self.timers[m].t_last_trigger = now;
        let t_active = self.timers[m].t_active_ticks();
        let t_dwell = self.timers[m].t_dwell_ticks();
        let suppress = self.timers[m].suppression_enabled();

        for pi in 0..self.pools.buffers.len() {
            if !self.pools.buffers[pi].in_use {
                continue;
            }
            let wi = self.pools.buffers[pi].window as usize;
            if self.pools.windows[wi].timer != m as u8 {
                continue;
            }
            let (expired, transmit) = {
                let p = &mut self.pools.buffers[pi];
                if p.active == 0 {
                    // fresh since the last reset: it arrived at t_start
                    p.active += diff_start;
                    p.dwell += diff_start;
                } else {
                    p.active += diff_last;
                    p.dwell += diff_last;
                }
                let expired = p.dwell > t_dwell;
                let transmit = !expired
                    && p.hop_limit() > 0
                    && if suppress { p.must_send } else { p.active < t_active };
                if transmit {
                    p.must_send = false;
                }
                (expired, transmit)
            };
            if expired {
                tracing::trace!(seq = self.pools.buffers[pi].seq.value(), "dwell expired");
                self.pools.release_packet(pi as u8);
            } else if transmit {
                let bytes = self.pools.buffers[pi].bytes().to_vec();
                self.send(Frame::data(bytes));
                self.stats.mcast_fwd.fetch_add(1, Relaxed);
                self.host.watchdog_kick();
            }
        }

        if suppress && self.timers[m].c < self.timers[m].params.k {
            self.emit_summary();
        }

        self.timers[m].inconsistency = false;
        self.timers[m].c = 0;
        self.pools.update_bounds();
        self.timers[m].schedule_interval_end(now);
    }

    // -----------------------------------------------------------------------
    // ICMPv6 summary output
    // -----------------------------------------------------------------------

    fn emit_summary(&mut self) {
        let dst = if self.cfg.dest_all_nodes { ALL_NODES } else { ALL_ROUTERS };
        let src = self.host.select_source_addr(&dst);

        let mut buf = [0u8; MAX_DATAGRAM];
        let payload_start = IPV6_HDR_LEN + ICMP6_HDR_LEN;
        let list_len = {
            let mut wtr = SummaryWriter::new(&mut buf[payload_start..]);
            for wi in 0..self.pools.windows.len() {
                let w = &self.pools.windows[wi];
                if !w.in_use || w.count == 0 {
                    continue;
                }
                let seqs = self
                    .pools
                    .buffers
                    .iter()
                    .filter(|p| p.in_use && p.window == wi as u8)
                    .map(|p| p.seq);
                if wtr.entry(&w.seed, w.timer == 1, seqs, w.count).is_err() {
                    tracing::warn!("summary truncated: sequence lists exceed the datagram cap");
                    break;
                }
            }
            wtr.len()
        };

        let payload_len = (ICMP6_HDR_LEN + list_len) as u16;
        Ipv6Header::write(&mut buf, &src, &dst, PROTO_ICMP6, self.cfg.hop_limit, payload_len);
        buf[IPV6_HDR_LEN] = ICMP6_TRICKLE_MCAST;
        buf[IPV6_HDR_LEN + 1] = self.cfg.icmp_code;
        buf[IPV6_HDR_LEN + 2] = 0;
        buf[IPV6_HDR_LEN + 3] = 0;
        let end = IPV6_HDR_LEN + payload_len as usize;
        let ck = wire::icmp6_checksum(&src, &dst, &buf[IPV6_HDR_LEN..end]);
        buf[IPV6_HDR_LEN + 2..IPV6_HDR_LEN + 4].copy_from_slice(&ck.to_be_bytes());

        self.send(Frame::control(buf[..end].to_vec()));
        self.stats.icmp_out.fetch_add(1, Relaxed);
    }

    // -----------------------------------------------------------------------
    // ICMPv6 summary input
    // -----------------------------------------------------------------------

    /// Consume one Trickle summary message and cross-check it against the
    /// buffered set.
    pub fn icmp_input(&mut self, now: u64, datagram: &[u8]) {
        self.stats.icmp_in.fetch_add(1, Relaxed);

        let hdr = match Ipv6Header::parse(datagram) {
            Ok(h) => h,
            Err(_) => return self.bad_icmp(),
        };
        if hdr.next_header != PROTO_ICMP6
            || hdr.hop_limit != self.cfg.hop_limit
            || !wire::is_linklocal(&hdr.src)
            || !wire::is_linklocal_scope(&hdr.dst)
        {
            return self.bad_icmp();
        }
        let icmp = &datagram[IPV6_HDR_LEN..IPV6_HDR_LEN + hdr.payload_len as usize];
        if icmp.len() < ICMP6_HDR_LEN
            || icmp[0] != ICMP6_TRICKLE_MCAST
            || icmp[1] != self.cfg.icmp_code
        {
            return self.bad_icmp();
        }
        if !wire::icmp6_checksum_valid(&hdr.src, &hdr.dst, icmp) {
            return self.bad_icmp();
        }
        let payload = &icmp[ICMP6_HDR_LEN..];

        // Structural pass first: the whole message is dropped on any parse
        // violation, before a single flag is touched.
        for entry in SummaryReader::new(payload, self.cfg.seed_mode) {
            if let Err(e) = entry {
                tracing::debug!(err = %e, "summary rejected");
                return self.bad_icmp();
            }
        }

        for w in &mut self.pools.windows {
            w.listed = false;
            w.min_listed = None;
        }
        for p in &mut self.pools.buffers {
            p.listed = false;
        }

        for entry in SummaryReader::new(payload, self.cfg.seed_mode) {
            let Ok(e) = entry else { return self.bad_icmp() };
            let m = e.m as usize;
            let Some(wi) = self.pools.window_lookup(&e.seed, e.m as u8) else {
                // a seed we know nothing about is itself an inconsistency
                self.timers[m].inconsistency = true;
                continue;
            };
            self.pools.windows[wi as usize].listed = true;
            for seq in e.seqs() {
                let (lower, upper) = {
                    let w = &self.pools.windows[wi as usize];
                    (w.lower, w.upper)
                };
                let Some(upper) = upper else {
                    self.timers[m].inconsistency = true;
                    continue;
                };
                match seq.serial_cmp(upper) {
                    // they hold something newer than anything we do; the
                    // incomparable case defaults to the same safe outcome
                    SerialOrd::Gt | SerialOrd::Incomparable => {
                        self.timers[m].inconsistency = true;
                    }
                    _ => {
                        let ge_lower = lower
                            .map_or(false, |l| matches!(seq.serial_cmp(l), SerialOrd::Eq | SerialOrd::Gt));
                        if !ge_lower {
                            // older than our window: nothing to learn
                            continue;
                        }
                        match self.pools.find_packet(wi, seq) {
                            None => {
                                // inside our bounds but not held: we lost it
                                self.timers[m].inconsistency = true;
                            }
                            Some(pi) => {
                                self.pools.buffers[pi as usize].listed = true;
                                let w = &mut self.pools.windows[wi as usize];
                                if w.min_listed.map_or(true, |ml| seq.serial_cmp(ml).is_lt()) {
                                    w.min_listed = Some(seq);
                                }
                            }
                        }
                    }
                }
            }
        }

        // "We have new": anything we hold that the sender did not account for
        // must go out again.
        for pi in 0..self.pools.buffers.len() {
            if !self.pools.buffers[pi].in_use {
                continue;
            }
            let wi = self.pools.buffers[pi].window as usize;
            let (w_listed, w_min_listed, m) = {
                let w = &self.pools.windows[wi];
                (w.listed, w.min_listed, w.timer as usize)
            };
            if !w_listed {
                self.timers[m].inconsistency = true;
                self.pools.buffers[pi].must_send = true;
            } else if !self.pools.buffers[pi].listed {
                if let Some(ml) = w_min_listed {
                    if self.pools.buffers[pi].seq.serial_cmp(ml).is_gt() {
                        self.timers[m].inconsistency = true;
                        self.pools.buffers[pi].must_send = true;
                    }
                }
            }
        }

        for m in 0..2 {
            if self.timers[m].inconsistency {
                let r = self.host.rand();
                self.timers[m].reset(now, r);
            } else {
                self.timers[m].c = self.timers[m].c.saturating_add(1);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn send(&self, frame: Frame) {
        if self.out.try_send(frame).is_err() {
            tracing::warn!("outbound frame channel full; frame lost");
        }
    }

    fn bad_mcast(&self) -> Verdict {
        self.stats.mcast_bad.fetch_add(1, Relaxed);
        Verdict::Drop
    }

    fn drop_mcast(&self) -> Verdict {
        self.stats.mcast_dropped.fetch_add(1, Relaxed);
        Verdict::Drop
    }

    fn bad_icmp(&self) {
        self.stats.icmp_bad.fetch_add(1, Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
