//! Fixed-capacity pools for sliding windows and buffered datagrams.
//!
//! Both pools are sized once at engine construction and never grow; the host
//! runs without a heap, so steady-state operation must not allocate. Packets
//! refer to their window by 8-bit pool index, windows track a live-packet
//! `count`, and windows are freed exactly when that count returns to zero.

use crate::seqnum::SeqNum;
use crate::wire::SeedId;

/// Largest datagram the engine will cache — the IPv6 minimum MTU, which is
/// also the practical ceiling on a low-power mesh link.
pub const MAX_DATAGRAM: usize = 1280;

/// Per-(seed, parametrization) record of the live sequence-value range.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    pub in_use: bool,
    pub seed: SeedId,
    /// Which Trickle parametrization governs this window (the M-bit).
    pub timer: u8,
    /// Number of live buffered packets pointing here.
    pub count: u8,
    /// Smallest live sequence value, `None` while empty.
    pub lower: Option<SeqNum>,
    /// Largest live sequence value, `None` while empty.
    pub upper: Option<SeqNum>,
    /// Smallest sequence value the current summary message listed for this
    /// window; reset before every summary parse.
    pub min_listed: Option<SeqNum>,
    /// Whether the current summary message mentioned this window at all.
    pub listed: bool,
}

impl SlidingWindow {
    fn vacant() -> Self {
        Self {
            in_use: false,
            seed: SeedId::Short(0),
            timer: 0,
            count: 0,
            lower: None,
            upper: None,
            min_listed: None,
            listed: false,
        }
    }

    fn reset(&mut self) {
        *self = Self::vacant();
    }
}

/// A cached copy of one forwardable datagram.
pub struct PacketBuffer {
    pub in_use: bool,
    /// Re-transmit on the next periodic pass regardless of suppression.
    pub must_send: bool,
    /// Whether the current summary message listed this packet's sequence value.
    pub listed: bool,
    /// Pool index of the owning window.
    pub window: u8,
    pub seq: SeqNum,
    pub len: u16,
    /// Ticks since the packet became eligible for re-transmission.
    pub active: u64,
    /// Ticks the packet has been cached; drives eviction.
    pub dwell: u64,
    pub data: [u8; MAX_DATAGRAM],
}

impl PacketBuffer {
    fn vacant() -> Self {
        Self {
            in_use: false,
            must_send: false,
            listed: false,
            window: 0,
            seq: SeqNum::new(0),
            len: 0,
            active: 0,
            dwell: 0,
            data: [0; MAX_DATAGRAM],
        }
    }

    fn reset(&mut self) {
        self.must_send = false;
        self.listed = false;
        self.window = 0;
        self.seq = SeqNum::new(0);
        self.len = 0;
        self.active = 0;
        self.dwell = 0;
        self.data = [0; MAX_DATAGRAM];
    }

    /// The cached datagram bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Hop limit of the cached copy.
    pub fn hop_limit(&self) -> u8 {
        self.data[crate::wire::HOP_LIMIT_OFF]
    }
}

pub struct Pools {
    pub windows: Vec<SlidingWindow>,
    pub buffers: Vec<PacketBuffer>,
}

impl Pools {
    /// Allocate both pools. This is the only allocation the engine performs.
    pub fn new(windows: usize, buffers: usize) -> Self {
        Self {
            windows: (0..windows).map(|_| SlidingWindow::vacant()).collect(),
            buffers: (0..buffers).map(|_| PacketBuffer::vacant()).collect(),
        }
    }

    /// Claim the first free window slot, scanning high to low. The slot comes
    /// back live with empty bounds; the caller installs seed and timer.
    pub fn window_alloc(&mut self) -> Option<u8> {
        for wi in (0..self.windows.len()).rev() {
            if !self.windows[wi].in_use {
                self.windows[wi].reset();
                self.windows[wi].in_use = true;
                return Some(wi as u8);
            }
        }
        None
    }

    /// The unique live window matching `(seed, timer)`.
    pub fn window_lookup(&self, seed: &SeedId, timer: u8) -> Option<u8> {
        self.windows
            .iter()
            .position(|w| w.in_use && w.timer == timer && w.seed == *seed)
            .map(|wi| wi as u8)
    }

    pub fn window_free(&mut self, wi: u8) {
        debug_assert_eq!(self.windows[wi as usize].count, 0, "freeing a non-empty window");
        self.windows[wi as usize].in_use = false;
    }

    /// Claim the first free packet slot.
    pub fn buffer_alloc(&mut self) -> Option<u8> {
        for pi in 0..self.buffers.len() {
            if !self.buffers[pi].in_use {
                self.buffers[pi].reset();
                self.buffers[pi].in_use = true;
                return Some(pi as u8);
            }
        }
        None
    }

    /// Evict one packet to make room, preferring the window holding the most.
    ///
    /// The victim window is the live one with the largest `count` (ties go to
    /// the first encountered scanning high to low); its `lower` packet is
    /// evicted. Refuses when the largest count is 1 — no window may be
    /// starved below a single packet. On success the freed slot is returned
    /// re-claimed, same contract as [`Self::buffer_alloc`].
    pub fn buffer_reclaim(&mut self) -> Option<u8> {
        let mut victim: Option<u8> = None;
        let mut best = 0u8;
        for wi in (0..self.windows.len()).rev() {
            let w = &self.windows[wi];
            if w.in_use && w.count > best {
                best = w.count;
                victim = Some(wi as u8);
            }
        }
        let wi = victim?;
        if best < 2 {
            return None;
        }
        let lower = self.windows[wi as usize].lower?;
        let pi = self.find_packet(wi, lower)?;
        self.buffers[pi as usize].in_use = false;
        self.windows[wi as usize].count -= 1;
        self.update_bounds();
        self.buffers[pi as usize].reset();
        self.buffers[pi as usize].in_use = true;
        Some(pi)
    }

    /// The live packet in window `wi` holding `seq`, if any.
    pub fn find_packet(&self, wi: u8, seq: SeqNum) -> Option<u8> {
        self.buffers
            .iter()
            .position(|p| p.in_use && p.window == wi && p.seq == seq)
            .map(|pi| pi as u8)
    }

    /// Free a packet; its window follows when the last packet leaves.
    pub fn release_packet(&mut self, pi: u8) {
        let wi = self.buffers[pi as usize].window;
        self.buffers[pi as usize].in_use = false;
        let w = &mut self.windows[wi as usize];
        w.count = w.count.saturating_sub(1);
        if w.count == 0 {
            w.in_use = false;
        }
    }

    /// Recompute every live window's bounds from the live packets. Called
    /// after any bulk change — periodic processing, reclaim.
    pub fn update_bounds(&mut self) {
        for w in &mut self.windows {
            if w.in_use {
                w.lower = None;
                w.upper = None;
            }
        }
        for pi in 0..self.buffers.len() {
            if !self.buffers[pi].in_use {
                continue;
            }
            let seq = self.buffers[pi].seq;
            let w = &mut self.windows[self.buffers[pi].window as usize];
            match w.lower {
                None => w.lower = Some(seq),
                Some(l) if seq.serial_cmp(l).is_lt() => w.lower = Some(seq),
                _ => {}
            }
            match w.upper {
                None => w.upper = Some(seq),
                Some(u) if seq.serial_cmp(u).is_gt() => w.upper = Some(seq),
                _ => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Install a live packet into `pools`, wiring the window bookkeeping the
    /// way the accept path does.
    fn install(pools: &mut Pools, wi: u8, seq: u16) -> u8 {
        let pi = pools.buffer_alloc().or_else(|| pools.buffer_reclaim()).expect("no buffer");
        let p = &mut pools.buffers[pi as usize];
        p.window = wi;
        p.seq = SeqNum::new(seq);
        p.len = 40;
        let w = &mut pools.windows[wi as usize];
        if w.count == 0 {
            w.lower = Some(SeqNum::new(seq));
        }
        if w.count == 0 || w.upper.is_some_and(|u| SeqNum::new(seq).serial_cmp(u).is_gt()) {
            w.upper = Some(SeqNum::new(seq));
        }
        w.count += 1;
        pi
    }

    fn window_with_seed(pools: &mut Pools, seed: u16) -> u8 {
        let wi = pools.window_alloc().expect("no window");
        pools.windows[wi as usize].seed = SeedId::Short(seed);
        wi
    }

    #[test]
    fn test_window_alloc_scans_high_to_low() {
        let mut pools = Pools::new(4, 8);
        assert_eq!(pools.window_alloc(), Some(3));
        assert_eq!(pools.window_alloc(), Some(2));
        pools.window_free(3);
        assert_eq!(pools.window_alloc(), Some(3));
    }

    #[test]
    fn test_window_lookup_matches_seed_and_timer() {
        let mut pools = Pools::new(4, 8);
        let a = window_with_seed(&mut pools, 0xBEEF);
        pools.windows[a as usize].timer = 0;
        let b = window_with_seed(&mut pools, 0xBEEF);
        pools.windows[b as usize].timer = 1;
        assert_eq!(pools.window_lookup(&SeedId::Short(0xBEEF), 0), Some(a));
        assert_eq!(pools.window_lookup(&SeedId::Short(0xBEEF), 1), Some(b));
        assert_eq!(pools.window_lookup(&SeedId::Short(0xCAFE), 0), None);
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut pools = Pools::new(2, 2);
        assert!(pools.window_alloc().is_some());
        assert!(pools.window_alloc().is_some());
        assert!(pools.window_alloc().is_none());
        assert!(pools.buffer_alloc().is_some());
        assert!(pools.buffer_alloc().is_some());
        assert!(pools.buffer_alloc().is_none());
    }

    #[test]
    fn test_reclaim_prefers_largest_window() {
        let mut pools = Pools::new(4, 8);
        let big = window_with_seed(&mut pools, 1);
        let small = window_with_seed(&mut pools, 2);
        for seq in 10..16 {
            install(&mut pools, big, seq);
        }
        install(&mut pools, small, 100);
        install(&mut pools, small, 101);
        assert!(pools.buffer_alloc().is_none());

        let freed = pools.buffer_reclaim().expect("reclaim refused");
        assert!(pools.buffers[freed as usize].in_use, "slot is returned re-claimed");
        assert_eq!(pools.windows[big as usize].count, 5);
        // the evicted packet was the window's lower bound
        assert_eq!(pools.windows[big as usize].lower, Some(SeqNum::new(11)));
        assert_eq!(pools.windows[small as usize].count, 2);
    }

    #[test]
    fn test_reclaim_refuses_when_all_windows_hold_one() {
        let mut pools = Pools::new(2, 2);
        let a = window_with_seed(&mut pools, 1);
        let b = window_with_seed(&mut pools, 2);
        install(&mut pools, a, 5);
        install(&mut pools, b, 6);
        assert!(pools.buffer_reclaim().is_none());
        assert_eq!(pools.windows[a as usize].count, 1);
        assert_eq!(pools.windows[b as usize].count, 1);
    }

    #[test]
    fn test_reclaim_tie_goes_to_high_index() {
        let mut pools = Pools::new(4, 8);
        // window_alloc hands out 3 then 2; both get two packets
        let first = window_with_seed(&mut pools, 1);
        let second = window_with_seed(&mut pools, 2);
        assert!(first > second);
        install(&mut pools, first, 10);
        install(&mut pools, first, 11);
        install(&mut pools, second, 20);
        install(&mut pools, second, 21);
        pools.buffer_reclaim().expect("reclaim refused");
        // the higher-indexed window is encountered first and loses a packet
        assert_eq!(pools.windows[first as usize].count, 1);
        assert_eq!(pools.windows[second as usize].count, 2);
    }

    #[test]
    fn test_release_packet_frees_empty_window() {
        let mut pools = Pools::new(4, 8);
        let wi = window_with_seed(&mut pools, 1);
        let p1 = install(&mut pools, wi, 5);
        let p2 = install(&mut pools, wi, 6);
        pools.release_packet(p1);
        assert!(pools.windows[wi as usize].in_use);
        assert_eq!(pools.windows[wi as usize].count, 1);
        pools.release_packet(p2);
        assert!(!pools.windows[wi as usize].in_use);
    }

    #[test]
    fn test_update_bounds_recomputes_under_wrap() {
        let mut pools = Pools::new(4, 8);
        let wi = window_with_seed(&mut pools, 1);
        // 0x7FFF serially precedes 0x0000 and 0x0001
        install(&mut pools, wi, 0x7FFF);
        install(&mut pools, wi, 0x0000);
        install(&mut pools, wi, 0x0001);
        pools.update_bounds();
        assert_eq!(pools.windows[wi as usize].lower, Some(SeqNum::new(0x7FFF)));
        assert_eq!(pools.windows[wi as usize].upper, Some(SeqNum::new(0x0001)));
    }

    #[test]
    fn test_update_bounds_clears_emptied_window_bounds() {
        let mut pools = Pools::new(4, 8);
        let wi = window_with_seed(&mut pools, 1);
        let pi = install(&mut pools, wi, 9);
        // drop the packet but keep the window alive artificially
        pools.buffers[pi as usize].in_use = false;
        pools.update_bounds();
        assert_eq!(pools.windows[wi as usize].lower, None);
        assert_eq!(pools.windows[wi as usize].upper, None);
    }
}
