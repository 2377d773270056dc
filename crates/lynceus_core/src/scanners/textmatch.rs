//! Fixed-needle text search with proximity suppression.
//!
//! The text-match family of scanners all share this shape: a set of literal
//! needles, a context window dumped around each hit, and a per-page list of
//! used offsets so clusters of hits inside one artifact produce one feature
//! instead of dozens. An Aho-Corasick automaton decides cheaply whether a
//! page is worth the per-needle pass at all.

use crate::error::Result;
#[cfg(test)]
use crate::sbuf::PageBuffer;
use crate::scanner::{Phase, Scanner, ScannerParams};
use aho_corasick::AhoCorasick;

/// Context window written around each hit; hits within half a window of a
/// recorded one are suppressed.
const WINDOW: usize = 4096;
/// Hits this close to the end of the buffer have no useful context left.
const MIN_TAIL: usize = 50;

const FACEBOOK_NEEDLES: &[&str] = &[
    "hovercard/page",
    "profile_owner",
    "actorDescription actorNames",
    "navAccountName",
    "renderedAuthorList",
    "pokesText",
    "id=\"facebook.com\"",
    "OrderedFriendsListInitialData",
    "mobileFriends",
    "ShortProfiles",
    "bigPipe.onPageletArrive",
    "TimelineContentLoader",
    "Facebook is a social utility that connects",
    "facebook.com/profile.php",
    "timelineUnitContainer",
];

/// Offsets already covered by an emitted window, checked within ±WINDOW/2.
#[derive(Default)]
struct UsedOffsets {
    offsets: Vec<usize>,
}

impl UsedOffsets {
    /// True when `value` falls inside an existing window; otherwise records
    /// it and returns false.
    fn value_used(&mut self, value: usize) -> bool {
        if self
            .offsets
            .iter()
            .any(|&off| off.abs_diff(value) < WINDOW / 2)
        {
            return true;
        }
        self.offsets.push(value);
        false
    }
}

pub struct TextMatchScanner {
    name: String,
    needles: Vec<Vec<u8>>,
    prefilter: AhoCorasick,
}

impl TextMatchScanner {
    pub fn new(name: &str, needles: &[&str]) -> Self {
        let needles: Vec<Vec<u8>> = needles.iter().map(|n| n.as_bytes().to_vec()).collect();
        let prefilter = AhoCorasick::new(&needles).expect("needle set builds an automaton");
        Self {
            name: name.to_string(),
            needles,
            prefilter,
        }
    }

    /// Searches for facebook html and json tags.
    pub fn facebook() -> Self {
        Self::new("facebook", FACEBOOK_NEEDLES)
    }
}

impl Scanner for TextMatchScanner {
    fn run(&self, sp: &mut ScannerParams<'_>) -> Result<()> {
        match sp.phase {
            Phase::Init => {
                sp.check_version()?;
                let info = sp.info_mut()?;
                info.name = self.name.clone();
                info.description = format!("Searches for {} text markers", self.name);
                info.version = "2.0".to_string();
                info.feature_defs.push(self.name.clone());
                Ok(())
            }
            Phase::Scan => {
                let sbuf = sp.sbuf()?;
                if !self.prefilter.is_match(sbuf.data()) {
                    return Ok(());
                }
                let recorder = sp.named_feature_recorder(&self.name)?;
                let mut used = UsedOffsets::default();

                for needle in &self.needles {
                    let mut i = 0usize;
                    while i + MIN_TAIL < sbuf.bufsize() {
                        let Some(location) = sbuf.find(needle, i) else {
                            break;
                        };
                        if used.value_used(location) {
                            i = location + WINDOW;
                            continue;
                        }
                        let begin = location.saturating_sub(WINDOW / 2);
                        let mut end = begin + WINDOW;
                        if end + 10 > sbuf.bufsize() {
                            end = sbuf.bufsize().saturating_sub(10);
                        }
                        recorder.write_buf(sbuf, begin, end.saturating_sub(begin))?;
                        i = location + WINDOW;
                    }
                }
                Ok(())
            }
            Phase::Shutdown => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::FeatureRecorderSet;
    use crate::sbuf::Pos0;
    use crate::scanner::{ScannerConfig, ScannerInfo};
    use tempfile::TempDir;

    fn run_page(scanner: &TextMatchScanner, page: &PageBuffer<'static>) -> (TempDir, String) {
        let dir = TempDir::new().unwrap();
        let recorders = FeatureRecorderSet::open(dir.path()).unwrap();
        recorders.create(&scanner.name).unwrap();
        let config = ScannerConfig::new();

        let mut info = ScannerInfo::default();
        scanner
            .run(&mut ScannerParams::init(&mut info, &config))
            .unwrap();
        scanner
            .run(&mut ScannerParams::scan(page, 0, &recorders, &config))
            .unwrap();
        recorders.close_all().unwrap();

        let body =
            std::fs::read_to_string(dir.path().join(format!("{}.txt", scanner.name)))
                .unwrap();
        (dir, body)
    }

    #[test]
    fn test_hit_emits_window() {
        let scanner = TextMatchScanner::new("marker", &["NEEDLE"]);
        let mut data = vec![b'.'; 16384];
        data[8000..8006].copy_from_slice(b"NEEDLE");
        let page = PageBuffer::from_vec(Pos0::new(0), data, 16384);

        let (_dir, body) = run_page(&scanner, &page);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 1);
        // window is centred on the hit
        assert!(lines[0].starts_with(&format!("{}\t", 8000 - WINDOW / 2)));
        assert!(lines[0].contains("NEEDLE"));
    }

    #[test]
    fn test_nearby_hits_suppressed() {
        let scanner = TextMatchScanner::new("marker", &["AAA", "BBB"]);
        let mut data = vec![b'.'; 16384];
        data[8000..8003].copy_from_slice(b"AAA");
        data[8100..8103].copy_from_slice(b"BBB"); // within half a window of AAA
        data[14000..14003].copy_from_slice(b"BBB"); // far away, kept
        let page = PageBuffer::from_vec(Pos0::new(0), data, 16384);

        let (_dir, body) = run_page(&scanner, &page);
        assert_eq!(body.lines().count(), 2);
    }

    #[test]
    fn test_hit_at_offset_zero() {
        let scanner = TextMatchScanner::new("marker", &["NEEDLE"]);
        let mut data = vec![b'.'; 8192];
        data[0..6].copy_from_slice(b"NEEDLE");
        let page = PageBuffer::from_vec(Pos0::new(0), data, 8192);

        let (_dir, body) = run_page(&scanner, &page);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("0\t"));
    }

    #[test]
    fn test_window_clipped_at_buffer_end() {
        let scanner = TextMatchScanner::new("marker", &["NEEDLE"]);
        let mut data = vec![b'.'; 2000];
        data[1000..1006].copy_from_slice(b"NEEDLE");
        let page = PageBuffer::from_vec(Pos0::new(0), data, 2000);

        let (_dir, body) = run_page(&scanner, &page);
        let line = body.lines().next().unwrap();
        let feature = line.split('\t').nth(1).unwrap();
        // begin 0, end clipped to bufsize-10
        assert_eq!(feature.len(), 1990);
    }

    #[test]
    fn test_clean_page_writes_nothing() {
        let scanner = TextMatchScanner::facebook();
        let page = PageBuffer::from_vec(Pos0::new(0), vec![0x20; 8192], 8192);
        let (_dir, body) = run_page(&scanner, &page);
        assert!(body.is_empty());
    }

    #[test]
    fn test_facebook_needles_found() {
        let scanner = TextMatchScanner::facebook();
        let mut data = vec![b' '; 8192];
        let marker = b"facebook.com/profile.php";
        data[4000..4000 + marker.len()].copy_from_slice(marker);
        let page = PageBuffer::from_vec(Pos0::new(0), data, 8192);

        let (_dir, body) = run_page(&scanner, &page);
        assert_eq!(body.lines().count(), 1);
    }
}
