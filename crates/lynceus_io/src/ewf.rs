//! EnCase Expert Witness (E01) images.
//!
//! Decompression and checksum handling belong to an external EWF library;
//! this module only defines the seam ([`EwfProvider`]) and the source built
//! on top of it. Builds that register no provider report E01 paths as
//! unsupported.

use lynceus_core::{CoreError, Result};
use std::path::{Path, PathBuf};

/// The opaque open/read/size surface of an EWF decoder library.
pub trait EwfProvider: Send + Sync {
    /// Decompressed media size in bytes.
    fn media_size(&self) -> u64;

    /// Random-access read of decompressed media bytes.
    fn read_at(&self, dst: &mut [u8], offset: u64) -> Result<usize>;

    /// An acquisition header value (`case_number`, `evidence_number`,
    /// `examiner_name`, `notes`), when the image carries one.
    fn header_value(&self, key: &str) -> Option<String>;
}

/// Header keys stashed as informational details at open.
const DETAIL_KEYS: &[(&str, &str)] = &[
    ("case_number", "CASE NUMBER"),
    ("evidence_number", "EVIDENCE NUMBER"),
    ("examiner_name", "EXAMINER NAME"),
    ("notes", "NOTES"),
];

pub struct E01Image {
    path: PathBuf,
    provider: Box<dyn EwfProvider>,
    details: Vec<String>,
    size: u64,
}

impl E01Image {
    pub fn open(path: impl AsRef<Path>, provider: Box<dyn EwfProvider>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let size = provider.media_size();
        let mut details = Vec::new();
        for (key, label) in DETAIL_KEYS {
            if let Some(value) = provider.header_value(key) {
                if !value.is_empty() {
                    details.push(format!("{label}: {value}"));
                }
            }
        }
        Ok(Self {
            path,
            provider,
            details,
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Case number, examiner name and friends, for the run log.
    pub fn details(&self) -> &[String] {
        &self.details
    }

    pub fn pread(&self, dst: &mut [u8], offset: u64) -> Result<usize> {
        // clip to the media size with saturating arithmetic
        let remaining = self.size.saturating_sub(offset);
        let want = (dst.len() as u64).min(remaining) as usize;
        if want == 0 {
            return Ok(0);
        }
        self.provider.read_at(&mut dst[..want], offset)
    }
}

/// Sibling segments for the MD5-suffixed naming scheme, where the filename
/// contains `.E01.` and the segments share a directory. Every character
/// after the `.E01.` stem varies per segment except the dots.
pub fn e01_sibling_segments(path: &Path) -> Result<Vec<PathBuf>> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CoreError::NoSuchFile(path.display().to_string()))?;
    let stem_end = name
        .find(".E01.")
        .ok_or_else(|| CoreError::NoSuchFile(format!("cannot find .E01. in {name}")))?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name_bytes = name.as_bytes();
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let candidate = entry.file_name().to_string_lossy().into_owned();
        let cand_bytes = candidate.as_bytes();
        if cand_bytes.len() != name_bytes.len() {
            continue;
        }
        if !candidate.starts_with(&name[..stem_end]) {
            continue;
        }
        // dots are pinned in the varying tail; everything else may differ
        let tail_matches = name_bytes[stem_end..]
            .iter()
            .zip(&cand_bytes[stem_end..])
            .all(|(&want, &have)| (want == b'.') == (have == b'.'));
        if tail_matches {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    /// In-memory provider standing in for the external EWF library.
    pub struct MockEwf {
        pub media: Vec<u8>,
        pub headers: Vec<(String, String)>,
    }

    impl EwfProvider for MockEwf {
        fn media_size(&self) -> u64 {
            self.media.len() as u64
        }

        fn read_at(&self, dst: &mut [u8], offset: u64) -> Result<usize> {
            let start = (offset as usize).min(self.media.len());
            let end = (start + dst.len()).min(self.media.len());
            dst[..end - start].copy_from_slice(&self.media[start..end]);
            Ok(end - start)
        }

        fn header_value(&self, key: &str) -> Option<String> {
            self.headers
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        }
    }
}
