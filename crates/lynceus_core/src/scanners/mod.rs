//! The scanners shipped with lynceus.
//!
//! Each one implements the [`Scanner`](crate::Scanner) contract; the CLI
//! registers them all and the dispatcher drives them over every page.

pub mod pcap_writer;
pub mod pcapcarve;
pub mod textmatch;
pub mod windirs;

pub use pcap_writer::{PacketHeader, PcapWriter, PCAP_MAX_PKT_LEN};
pub use pcapcarve::PcapCarveScanner;
pub use textmatch::TextMatchScanner;
pub use windirs::{WindirsConfig, WindirsScanner};
