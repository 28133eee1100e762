//! Wire formats: the Trickle hop-by-hop option, the ICMPv6 sequence-list
//! summary, and just enough IPv6 to carry them.
//!
//! All parsing goes through bounds-checked views built once per datagram;
//! nothing here walks raw offsets into an unchecked buffer.
//!
//! ## Hop-by-hop block layout
//!
//! The Trickle option always rides in an 8-byte hop-by-hop extension header
//! directly after the fixed IPv6 header. Offsets below are relative to the
//! start of the extension header:
//!
//!   Byte 0       = next header (the datagram's inner protocol)
//!   Byte 1       = header extension length (0 → 8 bytes total)
//!   Byte 2       = option type (0x0C)
//!   Byte 3       = option data length: 4 in short-seed mode, 2 in long-seed
//!
//! Short-seed mode:
//!   Bytes 4..6   = seed id (u16 BE)
//!   Byte 6       = flags: bit 7 = M, bits 6..0 = sequence-value MSB
//!   Byte 7       = sequence-value LSB
//!
//! Long-seed mode (seed elided; the IPv6 source address is the seed):
//!   Byte 4       = flags (as above)
//!   Byte 5       = sequence-value LSB
//!   Bytes 6..8   = PadN(0) padding (0x01, 0x00)
//!
//! Sequence value = `(flags & 0x7F) << 8 | lsb` — 15 bits, the 16th is
//! reserved and never set on the wire.
//!
//! ## ICMPv6 summary payload
//!
//! A sequence of entries, each:
//!
//!   flags (1B)   : S (bit 7) = seed-id length (0 short, 1 long),
//!                  M (bit 6) = parametrization, bits 5..0 reserved (MBZ)
//!   seq_len (1B) : number of sequence values that follow
//!   seed_id      : 2 B short or 16 B long, depending on S
//!   seq_values   : seq_len × u16 BE

use std::net::Ipv6Addr;

use thiserror::Error;

use crate::config::SeedMode;
use crate::seqnum::SeqNum;

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

/// IPv6 hop-by-hop extension header protocol number.
pub const PROTO_HBH: u8 = 0;
/// ICMPv6 protocol number.
pub const PROTO_ICMP6: u8 = 58;
/// ICMPv6 type of the Trickle multicast summary message.
pub const ICMP6_TRICKLE_MCAST: u8 = 159;
/// Option type of the Trickle hop-by-hop option.
pub const HBH_OPT_TRICKLE: u8 = 0x0C;

/// Fixed IPv6 header length.
pub const IPV6_HDR_LEN: usize = 40;
/// Total length of the Trickle hop-by-hop block, padding included.
pub const HBH_TOTAL_LEN: usize = 8;
/// ICMPv6 header length (type, code, checksum).
pub const ICMP6_HDR_LEN: usize = 4;

const OPT_LEN_SHORT: u8 = 4;
const OPT_LEN_LONG: u8 = 2;
const FLAG_M: u8 = 0x80;

// IPv6 fixed-header offsets.
const PAYLOAD_LEN_OFF: usize = 4;
const NEXT_HDR_OFF: usize = 6;
/// Offset of the hop-limit octet within an IPv6 header.
pub const HOP_LIMIT_OFF: usize = 7;
const SRC_OFF: usize = 8;
const DST_OFF: usize = 24;

// Summary entry flag bits.
const ENTRY_FLAG_S: u8 = 0x80;
const ENTRY_FLAG_M: u8 = 0x40;
const ENTRY_RESERVED: u8 = 0x3F;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Decode failure. Every variant is a local drop on the receive path; the
/// engine maps them onto the `mcast_bad` / `icmp_bad` counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("datagram truncated")]
    Truncated,
    #[error("not an IPv6 datagram")]
    BadVersion,
    #[error("first hop-by-hop option is not the trickle option")]
    NotTrickle,
    #[error("bad trickle option length {0}")]
    BadOptionLength(u8),
    #[error("reserved summary flag bits set")]
    ReservedBits,
    #[error("summary seed-id length does not match engine seed mode")]
    SeedModeMismatch,
}

// ---------------------------------------------------------------------------
// Seed identifiers
// ---------------------------------------------------------------------------

/// Identifier of the node that originated a multicast datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeedId {
    Short(u16),
    Long(Ipv6Addr),
}

impl SeedId {
    /// The all-zero short id and the unspecified address are both null.
    pub fn is_null(&self) -> bool {
        match self {
            SeedId::Short(id) => *id == 0,
            SeedId::Long(addr) => addr.is_unspecified(),
        }
    }
}

// ---------------------------------------------------------------------------
// IPv6 header view
// ---------------------------------------------------------------------------

/// Parsed fixed IPv6 header. `parse` validates length consistency once;
/// everything downstream can index the payload without re-checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Header {
    pub payload_len: u16,
    pub next_header: u8,
    pub hop_limit: u8,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
}

impl Ipv6Header {
    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < IPV6_HDR_LEN {
            return Err(WireError::Truncated);
        }
        if buf[0] >> 4 != 6 {
            return Err(WireError::BadVersion);
        }
        let payload_len = u16::from_be_bytes([buf[PAYLOAD_LEN_OFF], buf[PAYLOAD_LEN_OFF + 1]]);
        if IPV6_HDR_LEN + payload_len as usize > buf.len() {
            return Err(WireError::Truncated);
        }
        let mut src = [0u8; 16];
        let mut dst = [0u8; 16];
        src.copy_from_slice(&buf[SRC_OFF..SRC_OFF + 16]);
        dst.copy_from_slice(&buf[DST_OFF..DST_OFF + 16]);
        Ok(Self {
            payload_len,
            next_header: buf[NEXT_HDR_OFF],
            hop_limit: buf[HOP_LIMIT_OFF],
            src: Ipv6Addr::from(src),
            dst: Ipv6Addr::from(dst),
        })
    }

    /// Write a fixed header into `buf` (traffic class and flow label zero).
    pub fn write(
        buf: &mut [u8],
        src: &Ipv6Addr,
        dst: &Ipv6Addr,
        next_header: u8,
        hop_limit: u8,
        payload_len: u16,
    ) {
        buf[0] = 0x60;
        buf[1] = 0;
        buf[2] = 0;
        buf[3] = 0;
        buf[PAYLOAD_LEN_OFF..PAYLOAD_LEN_OFF + 2].copy_from_slice(&payload_len.to_be_bytes());
        buf[NEXT_HDR_OFF] = next_header;
        buf[HOP_LIMIT_OFF] = hop_limit;
        buf[SRC_OFF..SRC_OFF + 16].copy_from_slice(&src.octets());
        buf[DST_OFF..DST_OFF + 16].copy_from_slice(&dst.octets());
    }
}

/// Multicast with a scope wider than link-local — the only destinations the
/// forwarder handles.
pub fn is_mcast_routable(a: &Ipv6Addr) -> bool {
    let o = a.octets();
    o[0] == 0xFF && (o[1] & 0x0F) > 0x02
}

/// Link-local unicast (`fe80::/10`).
pub fn is_linklocal(a: &Ipv6Addr) -> bool {
    a.segments()[0] & 0xFFC0 == 0xFE80
}

/// Link-local unicast or link-local-scope multicast — valid endpoints for
/// the ICMPv6 summary exchange.
pub fn is_linklocal_scope(a: &Ipv6Addr) -> bool {
    let o = a.octets();
    is_linklocal(a) || (o[0] == 0xFF && (o[1] & 0x0F) == 0x02)
}

// ---------------------------------------------------------------------------
// Trickle hop-by-hop option
// ---------------------------------------------------------------------------

/// Decoded Trickle option. `seed16` is populated in short-seed mode only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrickleOption {
    pub seed16: Option<u16>,
    pub m: bool,
    pub seq: SeqNum,
}

impl TrickleOption {
    /// Decode from `ext`, the bytes starting at the hop-by-hop extension
    /// header. Rejects any option length that disagrees with `mode`.
    pub fn decode(ext: &[u8], mode: SeedMode) -> Result<Self, WireError> {
        if ext.len() < HBH_TOTAL_LEN {
            return Err(WireError::Truncated);
        }
        if ext[2] != HBH_OPT_TRICKLE {
            return Err(WireError::NotTrickle);
        }
        let opt_len = ext[3];
        let (seed16, flags, lsb) = match mode {
            SeedMode::Short => {
                if opt_len != OPT_LEN_SHORT {
                    return Err(WireError::BadOptionLength(opt_len));
                }
                (Some(u16::from_be_bytes([ext[4], ext[5]])), ext[6], ext[7])
            }
            SeedMode::Long => {
                if opt_len != OPT_LEN_LONG {
                    return Err(WireError::BadOptionLength(opt_len));
                }
                (None, ext[4], ext[5])
            }
        };
        Ok(Self {
            seed16,
            m: flags & FLAG_M != 0,
            seq: SeqNum::new(((flags & 0x7F) as u16) << 8 | lsb as u16),
        })
    }

    /// Encode the full 8-byte hop-by-hop block, padding included.
    /// `next_header` is the protocol the datagram carried before wrapping.
    pub fn encode(&self, next_header: u8, mode: SeedMode) -> [u8; HBH_TOTAL_LEN] {
        let mut out = [0u8; HBH_TOTAL_LEN];
        out[0] = next_header;
        out[1] = 0;
        out[2] = HBH_OPT_TRICKLE;
        let m_bit = if self.m { FLAG_M } else { 0 };
        let flags = m_bit | (self.seq.value() >> 8) as u8;
        let lsb = (self.seq.value() & 0xFF) as u8;
        match mode {
            SeedMode::Short => {
                out[3] = OPT_LEN_SHORT;
                out[4..6].copy_from_slice(&self.seed16.unwrap_or(0).to_be_bytes());
                out[6] = flags;
                out[7] = lsb;
            }
            SeedMode::Long => {
                out[3] = OPT_LEN_LONG;
                out[4] = flags;
                out[5] = lsb;
                // PadN(0) to keep the block 8-aligned
                out[6] = 0x01;
                out[7] = 0x00;
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// ICMPv6 summary payload
// ---------------------------------------------------------------------------

/// One parsed summary entry. Sequence values stay borrowed from the payload
/// and decode lazily through [`SummaryEntry::seqs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryEntry<'a> {
    pub seed: SeedId,
    pub m: bool,
    seq_bytes: &'a [u8],
}

impl<'a> SummaryEntry<'a> {
    pub fn seq_count(&self) -> usize {
        self.seq_bytes.len() / 2
    }

    pub fn seqs(&self) -> impl Iterator<Item = SeqNum> + 'a {
        self.seq_bytes
            .chunks_exact(2)
            .map(|c| SeqNum::new(u16::from_be_bytes([c[0], c[1]])))
    }
}

/// Streaming reader over a summary payload. Yields one `Result` per entry;
/// the first error poisons the message (callers drop it whole).
pub struct SummaryReader<'a> {
    buf: &'a [u8],
    pos: usize,
    mode: SeedMode,
}

impl<'a> SummaryReader<'a> {
    pub fn new(payload: &'a [u8], mode: SeedMode) -> Self {
        Self { buf: payload, pos: 0, mode }
    }
}

impl<'a> Iterator for SummaryReader<'a> {
    type Item = Result<SummaryEntry<'a>, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let rest = &self.buf[self.pos..];
        if rest.len() < 2 {
            self.pos = self.buf.len();
            return Some(Err(WireError::Truncated));
        }
        let flags = rest[0];
        if flags & ENTRY_RESERVED != 0 {
            self.pos = self.buf.len();
            return Some(Err(WireError::ReservedBits));
        }
        let long = flags & ENTRY_FLAG_S != 0;
        if long != matches!(self.mode, SeedMode::Long) {
            self.pos = self.buf.len();
            return Some(Err(WireError::SeedModeMismatch));
        }
        let seed_len = if long { 16 } else { 2 };
        let seq_count = rest[1] as usize;
        let entry_len = 2 + seed_len + seq_count * 2;
        if rest.len() < entry_len {
            self.pos = self.buf.len();
            return Some(Err(WireError::Truncated));
        }
        let seed = if long {
            let mut a = [0u8; 16];
            a.copy_from_slice(&rest[2..18]);
            SeedId::Long(Ipv6Addr::from(a))
        } else {
            SeedId::Short(u16::from_be_bytes([rest[2], rest[3]]))
        };
        let seq_bytes = &rest[2 + seed_len..entry_len];
        self.pos += entry_len;
        Some(Ok(SummaryEntry { seed, m: flags & ENTRY_FLAG_M != 0, seq_bytes }))
    }
}

/// Appends summary entries into a caller-provided buffer. An entry that does
/// not fit is rolled back whole and reported as `Truncated`.
pub struct SummaryWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SummaryWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn entry(
        &mut self,
        seed: &SeedId,
        m: bool,
        seqs: impl Iterator<Item = SeqNum>,
        count: u8,
    ) -> Result<(), WireError> {
        let seed_len = match seed {
            SeedId::Short(_) => 2,
            SeedId::Long(_) => 16,
        };
        let entry_len = 2 + seed_len + count as usize * 2;
        if self.pos + entry_len > self.buf.len() {
            return Err(WireError::Truncated);
        }
        let start = self.pos;
        let mut flags = if m { ENTRY_FLAG_M } else { 0 };
        match seed {
            SeedId::Short(id) => {
                self.buf[start + 2..start + 4].copy_from_slice(&id.to_be_bytes());
            }
            SeedId::Long(addr) => {
                flags |= ENTRY_FLAG_S;
                self.buf[start + 2..start + 18].copy_from_slice(&addr.octets());
            }
        }
        self.buf[start] = flags;
        self.buf[start + 1] = count;
        let mut at = start + 2 + seed_len;
        let mut written = 0u8;
        for seq in seqs.take(count as usize) {
            self.buf[at..at + 2].copy_from_slice(&seq.value().to_be_bytes());
            at += 2;
            written += 1;
        }
        debug_assert_eq!(written, count, "summary entry count disagrees with iterator");
        self.pos = start + entry_len;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }
}

// ---------------------------------------------------------------------------
// ICMPv6 checksum
// ---------------------------------------------------------------------------

fn sum_be_words(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for c in &mut chunks {
        sum += u16::from_be_bytes([c[0], c[1]]) as u32;
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        sum += (rest[0] as u32) << 8;
    }
    sum
}

fn icmp6_sum(src: &Ipv6Addr, dst: &Ipv6Addr, payload: &[u8]) -> u16 {
    let mut sum = 0u32;
    sum = sum_be_words(&src.octets(), sum);
    sum = sum_be_words(&dst.octets(), sum);
    sum += payload.len() as u32;
    sum += PROTO_ICMP6 as u32;
    sum = sum_be_words(payload, sum);
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// Internet checksum over the IPv6 pseudo-header and `payload` (the full
/// ICMPv6 message with its checksum field zeroed).
pub fn icmp6_checksum(src: &Ipv6Addr, dst: &Ipv6Addr, payload: &[u8]) -> u16 {
    !icmp6_sum(src, dst, payload)
}

/// Verify a received message: summing over the transmitted checksum must
/// yield the all-ones word.
pub fn icmp6_checksum_valid(src: &Ipv6Addr, dst: &Ipv6Addr, payload: &[u8]) -> bool {
    icmp6_sum(src, dst, payload) == 0xFFFF
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
