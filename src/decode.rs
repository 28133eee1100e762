//! `trickle-mesh decode` — hex-decode a datagram and print its headers.
//!
//! Accepts anything `run --capture` wrote (or bytes lifted from a sniffer),
//! identifies the payload by next-header, and pretty-prints the trickle
//! option or the summary sequence lists.

use anyhow::{bail, Result};
use trickle_mcast::wire::{
    Ipv6Header, SummaryReader, TrickleOption, ICMP6_HDR_LEN, IPV6_HDR_LEN, PROTO_HBH, PROTO_ICMP6,
};
use trickle_mcast::{SeedId, SeedMode, ICMP6_TRICKLE_MCAST};

pub fn run(hex: &str, mode: &str) -> Result<()> {
    let mode = match mode {
        "short" => SeedMode::Short,
        "long" => SeedMode::Long,
        other => bail!("unknown seed mode {other:?} (expected short or long)"),
    };
    let bytes = parse_hex(hex)?;
    let hdr = match Ipv6Header::parse(&bytes) {
        Ok(h) => h,
        Err(e) => bail!("not a parseable IPv6 datagram: {e}"),
    };

    println!("IPv6  {} -> {}", hdr.src, hdr.dst);
    println!("      payload {} B, next header {}, hop limit {}", hdr.payload_len, hdr.next_header, hdr.hop_limit);

    match hdr.next_header {
        PROTO_HBH => {
            let opt = match TrickleOption::decode(&bytes[IPV6_HDR_LEN..], mode) {
                Ok(o) => o,
                Err(e) => bail!("bad trickle option: {e}"),
            };
            let seed = match mode {
                SeedMode::Short => format!("{:#06x}", opt.seed16.unwrap_or(0)),
                SeedMode::Long => format!("{} (source address)", hdr.src),
            };
            println!("HBH   trickle option: seed {seed}, M={}, seq {:#06x}", opt.m as u8, opt.seq.value());
            println!("      inner protocol {}", bytes[IPV6_HDR_LEN]);
        }
        PROTO_ICMP6 => {
            let icmp = &bytes[IPV6_HDR_LEN..IPV6_HDR_LEN + hdr.payload_len as usize];
            if icmp.len() < ICMP6_HDR_LEN {
                bail!("ICMPv6 payload truncated");
            }
            if icmp[0] != ICMP6_TRICKLE_MCAST {
                bail!("ICMPv6 type {} is not a trickle summary ({ICMP6_TRICKLE_MCAST})", icmp[0]);
            }
            println!("ICMP  trickle summary, code {}", icmp[1]);
            for entry in SummaryReader::new(&icmp[ICMP6_HDR_LEN..], mode) {
                let e = match entry {
                    Ok(e) => e,
                    Err(err) => bail!("bad summary entry: {err}"),
                };
                let seed = match e.seed {
                    SeedId::Short(id) => format!("{id:#06x}"),
                    SeedId::Long(addr) => addr.to_string(),
                };
                let seqs: Vec<String> =
                    e.seqs().map(|s| format!("{:#06x}", s.value())).collect();
                println!("      seed {seed}, M={}, {} seq value(s): {}", e.m as u8, e.seq_count(), seqs.join(" "));
            }
        }
        other => println!("      (no trickle payload behind next header {other})"),
    }
    Ok(())
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input
        .split_whitespace()
        .map(|tok| tok.trim_start_matches("0x"))
        .collect();
    if cleaned.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..i + 2], 16)
                .map_err(|_| anyhow::anyhow!("invalid hex near {:?}", &cleaned[i..i + 2]))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("60 00 0xff").unwrap(), vec![0x60, 0x00, 0xFF]);
        assert_eq!(parse_hex("beef").unwrap(), vec![0xBE, 0xEF]);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }
}
