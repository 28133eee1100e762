//! Optional pcap capture of simulated traffic.
//!
//! Frames are written as raw IPv6 packets (`LINKTYPE_IPV6`), so Wireshark
//! dissects the hop-by-hop option and the ICMPv6 summaries without a custom
//! dissector. One tick maps to one millisecond of capture time.

use anyhow::{Context, Result};
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pcap_file::{DataLink, Endianness, TsResolution};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

pub struct SimCapture {
    writer: PcapWriter<BufWriter<File>>,
}

impl SimCapture {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create capture file: {}", path.display()))?;
        let header = PcapHeader {
            version_major: 2,
            version_minor: 4,
            ts_correction: 0,
            ts_accuracy: 0,
            snaplen: 65535,
            datalink: DataLink::IPV6,
            ts_resolution: TsResolution::MicroSecond,
            endianness: Endianness::native(),
        };
        let writer = PcapWriter::with_header(BufWriter::new(file), header)
            .context("failed to write pcap header")?;
        Ok(Self { writer })
    }

    pub fn write(&mut self, tick: u64, bytes: &[u8]) -> Result<()> {
        let packet = PcapPacket::new(Duration::from_millis(tick), bytes.len() as u32, bytes);
        self.writer.write_packet(&packet).context("failed to write pcap packet")?;
        Ok(())
    }
}
