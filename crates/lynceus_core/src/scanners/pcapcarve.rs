//! Scanner for embedded libpcap capture files.
//!
//! Deleted or unallocated pcap files show up in evidence images all the
//! time. This scanner finds their global headers, walks the record chain
//! with sanity limits, and replays every intact record into the shared
//! output capture. Records already carry their link layer, so no frame is
//! synthesized.

use crate::error::Result;
use crate::sbuf::PageBuffer;
use crate::scanner::{Phase, Scanner, ScannerParams};
use crate::scanners::pcap_writer::{PacketHeader, PcapWriter, PCAP_MAX_PKT_LEN};
use std::sync::Arc;

/// Little-endian libpcap magic as it appears on disk.
const PCAP_MAGIC_LE: [u8; 4] = [0xd4, 0xc3, 0xb2, 0xa1];
const GLOBAL_HEADER_LEN: usize = 24;
const RECORD_HEADER_LEN: usize = 16;
/// Link types beyond this are not real captures.
const MAX_LINKTYPE: u32 = 300;

pub struct PcapCarveScanner {
    writer: Arc<PcapWriter>,
}

impl PcapCarveScanner {
    pub fn new(writer: Arc<PcapWriter>) -> Self {
        Self { writer }
    }

    /// Walk the record chain starting after the global header at `start`.
    /// Returns the number of records replayed and the offset one past the
    /// last intact record.
    fn carve_stream(&self, sbuf: &PageBuffer<'_>, start: usize) -> Result<(u64, usize)> {
        let mut off = start + GLOBAL_HEADER_LEN;
        let mut records = 0u64;
        loop {
            let Ok(incl_len) = sbuf.get_u32_le(off + 8) else {
                break;
            };
            let incl_len = incl_len as usize;
            if incl_len == 0 || incl_len > PCAP_MAX_PKT_LEN {
                break;
            }
            if off + RECORD_HEADER_LEN + incl_len > sbuf.bufsize() {
                break; // record runs past the page
            }
            let h = PacketHeader {
                seconds: sbuf.get_u32_le(off)?,
                useconds: sbuf.get_u32_le(off + 4)?,
                cap_len: incl_len,
                pkt_len: sbuf.get_u32_le(off + 12)? as usize,
            };
            self.writer
                .writepkt(&h, sbuf, off + RECORD_HEADER_LEN, None)?;
            records += 1;
            off += RECORD_HEADER_LEN + incl_len;
        }
        Ok((records, off))
    }
}

impl Scanner for PcapCarveScanner {
    fn run(&self, sp: &mut ScannerParams<'_>) -> Result<()> {
        match sp.phase {
            Phase::Init => {
                sp.check_version()?;
                let info = sp.info_mut()?;
                info.name = "pcapcarve".to_string();
                info.description = "Carves embedded libpcap capture files".to_string();
                info.version = "1.0".to_string();
                info.feature_defs.push("pcap".to_string());
                Ok(())
            }
            Phase::Scan => {
                let sbuf = sp.sbuf()?;
                let recorder = sp.named_feature_recorder("pcap")?;

                let mut i = 0;
                while let Some(loc) = sbuf.find(&PCAP_MAGIC_LE, i) {
                    if loc >= sbuf.pagesize() {
                        break; // the next page owns this match
                    }
                    let header_ok = sbuf.get_u16_le(loc + 4) == Ok(2)
                        && sbuf.get_u16_le(loc + 6) == Ok(4)
                        && sbuf.get_u32_le(loc + 20).map(|lt| lt <= MAX_LINKTYPE) == Ok(true);
                    if !header_ok {
                        i = loc + 1;
                        continue;
                    }
                    let (records, end) = self.carve_stream(sbuf, loc)?;
                    if records > 0 {
                        recorder.write(
                            &sbuf.pos0().shifted(loc as u64),
                            "pcap",
                            &format!("records={records}"),
                        )?;
                        i = end;
                    } else {
                        i = loc + 1;
                    }
                }
                Ok(())
            }
            Phase::Shutdown => self.writer.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::FeatureRecorderSet;
    use crate::sbuf::Pos0;
    use crate::scanner::{ScannerConfig, ScannerInfo};
    use byteorder::{ByteOrder, LittleEndian};
    use tempfile::TempDir;

    /// A minimal two-record little-endian capture.
    fn sample_pcap() -> Vec<u8> {
        let mut cap = Vec::new();
        cap.extend_from_slice(&PCAP_MAGIC_LE);
        cap.extend_from_slice(&2u16.to_le_bytes());
        cap.extend_from_slice(&4u16.to_le_bytes());
        cap.extend_from_slice(&[0u8; 8]); // thiszone + sigfigs
        cap.extend_from_slice(&65535u32.to_le_bytes());
        cap.extend_from_slice(&1u32.to_le_bytes());
        for (ts, len) in [(100u32, 20usize), (101, 34)] {
            let mut rec = [0u8; 16];
            LittleEndian::write_u32(&mut rec[0..4], ts);
            LittleEndian::write_u32(&mut rec[8..12], len as u32);
            LittleEndian::write_u32(&mut rec[12..16], len as u32);
            cap.extend_from_slice(&rec);
            cap.extend(std::iter::repeat(0xAB).take(len));
        }
        cap
    }

    #[test]
    fn test_carve_replays_records() {
        let dir = TempDir::new().unwrap();
        let recorders = FeatureRecorderSet::open(dir.path()).unwrap();
        recorders.create("pcap").unwrap();
        let config = ScannerConfig::new();

        let writer = Arc::new(PcapWriter::new(dir.path()));
        let scanner = PcapCarveScanner::new(Arc::clone(&writer));
        let mut info = ScannerInfo::default();
        scanner
            .run(&mut ScannerParams::init(&mut info, &config))
            .unwrap();

        let mut data = vec![0u8; 2048];
        let cap = sample_pcap();
        data[300..300 + cap.len()].copy_from_slice(&cap);
        let page = PageBuffer::from_vec(Pos0::new(0), data, 2048);

        scanner
            .run(&mut ScannerParams::scan(&page, 0, &recorders, &config))
            .unwrap();
        scanner
            .run(&mut ScannerParams::shutdown(&recorders, &config))
            .unwrap();
        recorders.close_all().unwrap();

        assert_eq!(writer.packets_written(), 2);
        let out = std::fs::read(writer.outpath()).unwrap();
        assert_eq!(out.len(), 24 + 16 + 20 + 16 + 34);
        // second record's timestamp survives the round trip
        assert_eq!(&out[24 + 16 + 20..24 + 16 + 20 + 4], &101u32.to_le_bytes());

        let body = std::fs::read_to_string(dir.path().join("pcap.txt")).unwrap();
        assert_eq!(body, "300\tpcap\trecords=2\n");
    }

    #[test]
    fn test_magic_in_margin_left_for_next_page() {
        let dir = TempDir::new().unwrap();
        let recorders = FeatureRecorderSet::open(dir.path()).unwrap();
        recorders.create("pcap").unwrap();
        let config = ScannerConfig::new();

        let writer = Arc::new(PcapWriter::new(dir.path()));
        let scanner = PcapCarveScanner::new(Arc::clone(&writer));
        let mut info = ScannerInfo::default();
        scanner
            .run(&mut ScannerParams::init(&mut info, &config))
            .unwrap();

        // capture begins in the margin past pagesize
        let mut data = vec![0u8; 2048];
        let cap = sample_pcap();
        data[1100..1100 + cap.len()].copy_from_slice(&cap);
        let page = PageBuffer::from_vec(Pos0::new(0), data, 1024);

        scanner
            .run(&mut ScannerParams::scan(&page, 0, &recorders, &config))
            .unwrap();
        assert_eq!(writer.packets_written(), 0);
    }

    #[test]
    fn test_bogus_magic_skipped() {
        let dir = TempDir::new().unwrap();
        let recorders = FeatureRecorderSet::open(dir.path()).unwrap();
        recorders.create("pcap").unwrap();
        let config = ScannerConfig::new();

        let writer = Arc::new(PcapWriter::new(dir.path()));
        let scanner = PcapCarveScanner::new(Arc::clone(&writer));
        let mut info = ScannerInfo::default();
        scanner
            .run(&mut ScannerParams::init(&mut info, &config))
            .unwrap();

        // magic bytes with a garbage version: not a capture
        let mut data = vec![0u8; 1024];
        data[10..14].copy_from_slice(&PCAP_MAGIC_LE);
        data[14] = 0x77;
        let page = PageBuffer::from_vec(Pos0::new(0), data, 1024);

        scanner
            .run(&mut ScannerParams::scan(&page, 0, &recorders, &config))
            .unwrap();
        assert_eq!(writer.packets_written(), 0);
    }
}
