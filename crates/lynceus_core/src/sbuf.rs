//! Page buffers and byte provenance.
//!
//! A [`PageBuffer`] is an owned window of evidence bytes anchored to the
//! logical position its first byte came from. The trailing
//! `bufsize - pagesize` bytes are margin: they belong to the next page and
//! exist only so artifacts straddling a page boundary stay visible. Scanners
//! must emit features only for matches whose start lies in `[0, pagesize)`.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use memmap2::Mmap;
use std::fmt;
use std::ops::Deref;
use thiserror::Error;

/// A typed read would run past the end of the buffer.
///
/// Scanners catch this at per-candidate granularity: a failed read rejects
/// the candidate record, never the whole page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("read of {len} bytes at offset {offset} exceeds buffer of {bufsize} bytes")]
pub struct RangeError {
    pub offset: usize,
    pub len: usize,
    pub bufsize: usize,
}

/// The provenance of a byte: an optional path and a byte offset.
///
/// The path is empty for raw-image reads and names a file for directory-tree
/// reads. Positions form the identity of every emitted feature.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pos0 {
    pub path: String,
    pub offset: u64,
}

impl Pos0 {
    pub fn new(offset: u64) -> Self {
        Self {
            path: String::new(),
            offset,
        }
    }

    pub fn in_file(path: impl Into<String>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }

    /// Position `delta` bytes further into the same stream.
    pub fn shifted(&self, delta: u64) -> Self {
        Self {
            path: self.path.clone(),
            offset: self.offset + delta,
        }
    }
}

impl fmt::Display for Pos0 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.offset)
        } else {
            write!(f, "{}-{}", self.path, self.offset)
        }
    }
}

enum Storage<'a> {
    Owned(Vec<u8>),
    Mapped(Mmap),
    Borrowed(&'a [u8]),
}

impl Storage<'_> {
    #[inline]
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Owned(v) => v,
            Storage::Mapped(m) => m,
            Storage::Borrowed(b) => b,
        }
    }
}

/// A read-only window of evidence bytes with a position anchor.
///
/// Top-level pages own their storage (allocated or memory-mapped); child
/// buffers produced by [`PageBuffer::slice`] borrow from their parent and are
/// bounded by its lifetime.
pub struct PageBuffer<'a> {
    pos0: Pos0,
    storage: Storage<'a>,
    pagesize: usize,
}

impl PageBuffer<'static> {
    /// A page over freshly read bytes. `pagesize` of them belong to this
    /// page; the rest are margin.
    pub fn from_vec(pos0: Pos0, data: Vec<u8>, pagesize: usize) -> Self {
        let pagesize = pagesize.min(data.len());
        Self {
            pos0,
            storage: Storage::Owned(data),
            pagesize,
        }
    }

    /// A page over a whole memory-mapped file: `pagesize == bufsize`, no
    /// margin.
    pub fn from_mmap(pos0: Pos0, map: Mmap) -> Self {
        let pagesize = map.len();
        Self {
            pos0,
            storage: Storage::Mapped(map),
            pagesize,
        }
    }
}

impl<'a> PageBuffer<'a> {
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.storage.bytes()
    }

    /// Total bytes available, including margin.
    #[inline]
    pub fn bufsize(&self) -> usize {
        self.data().len()
    }

    /// Bytes that belong to this page. Matches starting at or past this
    /// offset belong to the next page.
    #[inline]
    pub fn pagesize(&self) -> usize {
        self.pagesize
    }

    #[inline]
    pub fn pos0(&self) -> &Pos0 {
        &self.pos0
    }

    /// A child window borrowing this buffer's bytes, clipped to `bufsize`.
    /// The child's position is extended by `off` and its pagesize covers the
    /// whole slice.
    pub fn slice(&self, off: usize, len: usize) -> PageBuffer<'_> {
        let data = self.data();
        let start = off.min(data.len());
        let end = start.saturating_add(len).min(data.len());
        PageBuffer {
            pos0: self.pos0.shifted(start as u64),
            storage: Storage::Borrowed(&data[start..end]),
            pagesize: end - start,
        }
    }

    #[inline]
    fn range(&self, off: usize, len: usize) -> Result<&[u8], RangeError> {
        let end = off.checked_add(len).ok_or(RangeError {
            offset: off,
            len,
            bufsize: self.bufsize(),
        })?;
        self.data().get(off..end).ok_or(RangeError {
            offset: off,
            len,
            bufsize: self.bufsize(),
        })
    }

    pub fn get_u8(&self, off: usize) -> Result<u8, RangeError> {
        Ok(self.range(off, 1)?[0])
    }

    pub fn get_u16_le(&self, off: usize) -> Result<u16, RangeError> {
        Ok(LittleEndian::read_u16(self.range(off, 2)?))
    }

    pub fn get_u32_le(&self, off: usize) -> Result<u32, RangeError> {
        Ok(LittleEndian::read_u32(self.range(off, 4)?))
    }

    pub fn get_u64_le(&self, off: usize) -> Result<u64, RangeError> {
        Ok(LittleEndian::read_u64(self.range(off, 8)?))
    }

    pub fn get_u16_be(&self, off: usize) -> Result<u16, RangeError> {
        Ok(BigEndian::read_u16(self.range(off, 2)?))
    }

    pub fn get_u32_be(&self, off: usize) -> Result<u32, RangeError> {
        Ok(BigEndian::read_u32(self.range(off, 4)?))
    }

    /// First occurrence of `needle` at or after `start`.
    pub fn find(&self, needle: &[u8], start: usize) -> Option<usize> {
        if needle.is_empty() {
            return None;
        }
        let data = self.data();
        if start >= data.len() {
            return None;
        }
        data[start..]
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|p| p + start)
    }

    /// True when every byte equals the first one. Runs of zeros or fill
    /// bytes are never valid artifacts.
    pub fn is_constant(&self) -> bool {
        let data = self.data();
        match data.first() {
            Some(&b) => data.iter().all(|&x| x == b),
            None => true,
        }
    }
}

impl Deref for PageBuffer<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl fmt::Debug for PageBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageBuffer")
            .field("pos0", &self.pos0)
            .field("bufsize", &self.bufsize())
            .field("pagesize", &self.pagesize)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(data: &[u8], pagesize: usize) -> PageBuffer<'static> {
        PageBuffer::from_vec(Pos0::new(0), data.to_vec(), pagesize)
    }

    #[test]
    fn test_typed_reads() {
        let buf = page(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08], 8);
        assert_eq!(buf.get_u8(0).unwrap(), 0x01);
        assert_eq!(buf.get_u16_le(0).unwrap(), 0x0201);
        assert_eq!(buf.get_u16_be(0).unwrap(), 0x0102);
        assert_eq!(buf.get_u32_le(2).unwrap(), 0x0605_0403);
        assert_eq!(buf.get_u64_le(0).unwrap(), 0x0807_0605_0403_0201);
    }

    #[test]
    fn test_reads_past_end_fail() {
        let buf = page(&[0xAA; 4], 4);
        assert!(buf.get_u32_le(0).is_ok());
        assert!(buf.get_u32_le(1).is_err());
        assert!(buf.get_u8(4).is_err());
        let err = buf.get_u64_le(usize::MAX).unwrap_err();
        assert_eq!(err.bufsize, 4);
    }

    #[test]
    fn test_find() {
        let buf = page(b"abcdefabc", 9);
        assert_eq!(buf.find(b"abc", 0), Some(0));
        assert_eq!(buf.find(b"abc", 1), Some(6));
        assert_eq!(buf.find(b"abc", 7), None);
        assert_eq!(buf.find(b"xyz", 0), None);
        assert_eq!(buf.find(b"", 0), None);
    }

    #[test]
    fn test_is_constant() {
        assert!(page(&[0u8; 32], 32).is_constant());
        assert!(page(&[0xE5; 32], 32).is_constant());
        assert!(!page(&[0, 0, 1, 0], 4).is_constant());
        assert!(page(&[], 0).is_constant());
    }

    #[test]
    fn test_slice_extends_pos0() {
        let buf = PageBuffer::from_vec(Pos0::new(1000), vec![0u8; 512], 512);
        let child = buf.slice(96, 32);
        assert_eq!(child.pos0().offset, 1096);
        assert_eq!(child.bufsize(), 32);
        assert_eq!(child.pagesize(), 32);
        let clipped = buf.slice(500, 32);
        assert_eq!(clipped.bufsize(), 12);
        let beyond = buf.slice(600, 32);
        assert_eq!(beyond.bufsize(), 0);
    }

    #[test]
    fn test_margin_is_visible_but_not_page() {
        let buf = page(&[7u8; 100], 64);
        assert_eq!(buf.bufsize(), 100);
        assert_eq!(buf.pagesize(), 64);
    }

    #[test]
    fn test_pos0_display() {
        assert_eq!(Pos0::new(512).to_string(), "512");
        assert_eq!(Pos0::in_file("disk/a.bin", 0).to_string(), "disk/a.bin-0");
    }
}
