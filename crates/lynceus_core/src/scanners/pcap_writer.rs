//! Shared PCAP output file for carved packets.
//!
//! One `packets.pcap` per run, created lazily on the first write so runs that
//! find no packets leave no file behind. Carved raw packets (no link layer)
//! get a synthetic Ethernet II frame so they can coexist with real frames in
//! the same capture. Packet order in the file follows lock acquisition, not
//! capture time.

use crate::error::Result;
use crate::sbuf::PageBuffer;
use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Largest packet a pcap file can carry.
pub const PCAP_MAX_PKT_LEN: usize = 65535;
/// Size of the libpcap global header.
pub const TCPDUMP_HEADER_SIZE: u64 = 24;

const ETHER_HEAD_LEN: usize = 14;
const DLT_EN10MB: u32 = 1;
const DEFAULT_PCAP_NAME: &str = "packets.pcap";

/// Per-packet record header fields.
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub seconds: u32,
    pub useconds: u32,
    /// Bytes captured and written to the file.
    pub cap_len: usize,
    /// Original wire length, which may exceed `cap_len`.
    pub pkt_len: usize,
}

pub struct PcapWriter {
    outpath: PathBuf,
    fcap: Mutex<Option<BufWriter<File>>>,
    packets_written: AtomicU64,
}

impl PcapWriter {
    pub fn new(outdir: &Path) -> Self {
        Self::with_path(outdir.join(DEFAULT_PCAP_NAME))
    }

    pub fn with_path(outpath: PathBuf) -> Self {
        Self {
            outpath,
            fcap: Mutex::new(None),
            packets_written: AtomicU64::new(0),
        }
    }

    pub fn outpath(&self) -> &Path {
        &self.outpath
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Option<BufWriter<File>>> {
        self.fcap.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn open_if_needed<'g>(
        &self,
        guard: &'g mut Option<BufWriter<File>>,
    ) -> Result<&'g mut BufWriter<File>> {
        if guard.is_none() {
            let mut f = BufWriter::new(File::create(&self.outpath)?);
            f.write_u32::<LittleEndian>(0xa1b2_c3d4)?; // magic
            f.write_u16::<LittleEndian>(2)?; // major version
            f.write_u16::<LittleEndian>(4)?; // minor version
            f.write_i32::<LittleEndian>(0)?; // time zone offset
            f.write_u32::<LittleEndian>(0)?; // timestamp accuracy
            f.write_u32::<LittleEndian>(PCAP_MAX_PKT_LEN as u32)?; // snaplen
            f.write_u32::<LittleEndian>(DLT_EN10MB)?; // link layer
            *guard = Some(f);
        }
        Ok(guard.as_mut().expect("pcap file was just opened"))
    }

    /// Write one packet whose bytes start at `pos` within `sbuf`.
    ///
    /// `frame_type` asks for a synthetic Ethernet II header with that type;
    /// synthesis is skipped silently when the framed packet would exceed
    /// [`PCAP_MAX_PKT_LEN`]. Record lengths include the synthetic header.
    pub fn writepkt(
        &self,
        h: &PacketHeader,
        sbuf: &PageBuffer<'_>,
        pos: usize,
        frame_type: Option<u16>,
    ) -> Result<()> {
        let mut guard = self.lock();
        let f = self.open_if_needed(&mut guard)?;

        let add_frame = frame_type.is_some() && h.cap_len + ETHER_HEAD_LEN <= PCAP_MAX_PKT_LEN;
        let forged_len = if add_frame { ETHER_HEAD_LEN } else { 0 };

        f.write_u32::<LittleEndian>(h.seconds)?;
        f.write_u32::<LittleEndian>(h.useconds)?;
        f.write_u32::<LittleEndian>((h.cap_len + forged_len) as u32)?;
        f.write_u32::<LittleEndian>((h.pkt_len + forged_len) as u32)?;

        if add_frame {
            // zeroed source and destination, caller-supplied type
            let mut forged = [0u8; ETHER_HEAD_LEN];
            BigEndian::write_u16(
                &mut forged[ETHER_HEAD_LEN - 2..],
                frame_type.unwrap_or_default(),
            );
            f.write_all(&forged)?;
        }

        let data = sbuf.data();
        let start = pos.min(data.len());
        let end = start.saturating_add(h.cap_len).min(data.len());
        f.write_all(&data[start..end])?;

        self.packets_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flush the file if one was opened.
    pub fn close(&self) -> Result<()> {
        if let Some(f) = self.lock().as_mut() {
            f.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbuf::Pos0;
    use tempfile::TempDir;

    fn page_with_packet(at: usize, len: usize) -> PageBuffer<'static> {
        let mut data = vec![0u8; 4096];
        for (i, b) in data[at..at + len].iter_mut().enumerate() {
            *b = i as u8;
        }
        PageBuffer::from_vec(Pos0::new(0), data, 4096)
    }

    #[test]
    fn test_synthesized_frame_layout() {
        let dir = TempDir::new().unwrap();
        let writer = PcapWriter::new(dir.path());
        let page = page_with_packet(100, 60);

        let h = PacketHeader {
            seconds: 1,
            useconds: 2,
            cap_len: 60,
            pkt_len: 60,
        };
        writer.writepkt(&h, &page, 100, Some(0x0800)).unwrap();
        writer.close().unwrap();

        let bytes = std::fs::read(writer.outpath()).unwrap();
        // global header + record header + synthetic frame + packet
        assert_eq!(bytes.len(), 24 + 16 + 14 + 60);
        assert_eq!(&bytes[0..4], &[0xd4, 0xc3, 0xb2, 0xa1]);
        // record lengths include the 14-byte frame
        assert_eq!(&bytes[32..36], &74u32.to_le_bytes());
        assert_eq!(&bytes[36..40], &74u32.to_le_bytes());
        // 12 zero address bytes, then the big-endian type
        assert!(bytes[40..52].iter().all(|&b| b == 0));
        assert_eq!(bytes[52], 0x08);
        assert_eq!(bytes[53], 0x00);
        // packet bytes copied from the page
        assert_eq!(bytes[54], 0);
        assert_eq!(bytes[55], 1);
        assert_eq!(writer.packets_written(), 1);
    }

    #[test]
    fn test_no_frame_when_not_requested() {
        let dir = TempDir::new().unwrap();
        let writer = PcapWriter::new(dir.path());
        let page = page_with_packet(0, 40);

        let h = PacketHeader {
            seconds: 0,
            useconds: 0,
            cap_len: 40,
            pkt_len: 40,
        };
        writer.writepkt(&h, &page, 0, None).unwrap();
        writer.close().unwrap();

        let bytes = std::fs::read(writer.outpath()).unwrap();
        assert_eq!(bytes.len(), 24 + 16 + 40);
        assert_eq!(&bytes[32..36], &40u32.to_le_bytes());
    }

    #[test]
    fn test_oversized_frame_synthesis_skipped() {
        let dir = TempDir::new().unwrap();
        let writer = PcapWriter::new(dir.path());
        let data = vec![0xEEu8; PCAP_MAX_PKT_LEN];
        let page = PageBuffer::from_vec(Pos0::new(0), data, PCAP_MAX_PKT_LEN);

        let h = PacketHeader {
            seconds: 0,
            useconds: 0,
            cap_len: PCAP_MAX_PKT_LEN,
            pkt_len: PCAP_MAX_PKT_LEN,
        };
        // framing would overflow the snaplen, so the packet goes out bare
        writer.writepkt(&h, &page, 0, Some(0x0800)).unwrap();
        writer.close().unwrap();

        let bytes = std::fs::read(writer.outpath()).unwrap();
        assert_eq!(bytes.len(), 24 + 16 + PCAP_MAX_PKT_LEN);
    }

    #[test]
    fn test_lazy_creation() {
        let dir = TempDir::new().unwrap();
        let writer = PcapWriter::new(dir.path());
        writer.close().unwrap();
        assert!(!writer.outpath().exists());
    }

    #[test]
    fn test_global_header_fields() {
        let dir = TempDir::new().unwrap();
        let writer = PcapWriter::new(dir.path());
        let page = page_with_packet(0, 1);
        let h = PacketHeader {
            seconds: 9,
            useconds: 8,
            cap_len: 1,
            pkt_len: 1,
        };
        writer.writepkt(&h, &page, 0, None).unwrap();
        writer.close().unwrap();

        let bytes = std::fs::read(writer.outpath()).unwrap();
        assert_eq!(&bytes[4..6], &2u16.to_le_bytes()); // major
        assert_eq!(&bytes[6..8], &4u16.to_le_bytes()); // minor
        assert_eq!(&bytes[16..20], &(PCAP_MAX_PKT_LEN as u32).to_le_bytes());
        assert_eq!(&bytes[20..24], &1u32.to_le_bytes()); // EN10MB
        assert_eq!(&bytes[24..28], &9u32.to_le_bytes()); // ts_sec
    }
}
