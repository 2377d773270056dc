//! The image-source abstraction and its factory.
//!
//! One tagged type over the supported backends, each exposing the same
//! capability set: `size`, `pread`, cursor arithmetic, and `sbuf_alloc`.
//! Pages overlap by `margin` bytes so artifacts straddling a boundary are
//! seen exactly once by the page that contains their start.

use crate::dir::DirImage;
use crate::ewf::{E01Image, EwfProvider};
use crate::raw::RawImage;
use lynceus_core::{CoreError, PageBuffer, Pos0, Result};
use std::path::Path;

pub const DEFAULT_PAGESIZE: usize = 16 * 1024 * 1024;
pub const DEFAULT_MARGIN: usize = 4 * 1024 * 1024;

/// Constructor for an EWF provider, supplied by builds with E01 support.
pub type EwfOpener = fn(&Path) -> Result<Box<dyn EwfProvider>>;

/// A block cursor over an image: a position and an EOF latch, no I/O handle.
/// For byte-addressed sources `position` is an offset; for directory trees
/// it is a file number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub position: u64,
    pub eof: bool,
}

pub struct ImageSource {
    backend: Backend,
    pagesize: usize,
    margin: usize,
}

enum Backend {
    Raw(RawImage),
    E01(E01Image),
    Dir(DirImage),
}

impl ImageSource {
    /// Bytes in the image; for directory trees, the number of files.
    pub fn size(&self) -> u64 {
        match &self.backend {
            Backend::Raw(img) => img.size(),
            Backend::E01(img) => img.size(),
            Backend::Dir(img) => img.file_count(),
        }
    }

    pub fn pagesize(&self) -> usize {
        self.pagesize
    }

    pub fn margin(&self) -> usize {
        self.margin
    }

    /// True when the iterator counts files rather than bytes.
    pub fn is_file_addressed(&self) -> bool {
        matches!(self.backend, Backend::Dir(_))
    }

    /// E01 acquisition details, empty for other backends.
    pub fn details(&self) -> &[String] {
        match &self.backend {
            Backend::E01(img) => img.details(),
            _ => &[],
        }
    }

    /// Random-access byte read. Directory trees do not support this.
    pub fn pread(&self, dst: &mut [u8], offset: u64) -> Result<usize> {
        match &self.backend {
            Backend::Raw(img) => img.pread(dst, offset),
            Backend::E01(img) => img.pread(dst, offset),
            Backend::Dir(_) => Err(CoreError::Unsupported(
                "directory sources do not support pread".into(),
            )),
        }
    }

    pub fn begin(&self) -> Cursor {
        Cursor::default()
    }

    pub fn end(&self) -> Cursor {
        Cursor {
            position: self.size(),
            eof: true,
        }
    }

    /// Advance by one page, saturating at the end of the image. Idempotent
    /// once saturated.
    pub fn step(&self, it: &mut Cursor) {
        let stride = if self.is_file_addressed() {
            1
        } else {
            self.pagesize as u64
        };
        it.position = it.position.saturating_add(stride).min(self.size());
    }

    pub fn max_blocks(&self) -> u64 {
        if self.is_file_addressed() {
            self.size()
        } else {
            self.size().div_ceil(self.pagesize as u64)
        }
    }

    /// Position the cursor at block `block`, clamped to the image.
    pub fn seek_block(&self, it: &mut Cursor, block: u64) -> u64 {
        if self.is_file_addressed() {
            it.position = block.min(self.size());
            return it.position;
        }
        let mut block = block;
        if block * self.pagesize as u64 > self.size() {
            block = self.size() / self.pagesize as u64;
        }
        it.position = block * self.pagesize as u64;
        block
    }

    pub fn fraction_done(&self, it: &Cursor) -> f64 {
        if self.size() == 0 {
            return 1.0;
        }
        it.position as f64 / self.size() as f64
    }

    /// A human-readable cursor position for progress display.
    pub fn describe(&self, it: &Cursor) -> String {
        match &self.backend {
            Backend::Dir(img) => match img.file_at(it.position) {
                Some(path) => format!("file {}", path.display()),
                None => "done".to_string(),
            },
            _ => format!("offset {}MB", it.position / 1_000_000),
        }
    }

    /// The logical position of the page the cursor points at.
    pub fn pos0(&self, it: &Cursor) -> Pos0 {
        match &self.backend {
            Backend::Dir(img) => match img.file_at(it.position) {
                Some(path) => Pos0::in_file(path.to_string_lossy(), 0),
                None => Pos0::new(0),
            },
            _ => Pos0::new(it.position),
        }
    }

    /// Read the page under the cursor into a fresh buffer. `EndOfImage`
    /// latches the cursor's EOF flag and ends the traversal.
    pub fn sbuf_alloc(&self, it: &mut Cursor) -> Result<PageBuffer<'static>> {
        match &self.backend {
            Backend::Dir(img) => match img.sbuf_for(it.position) {
                Ok(page) => Ok(page),
                Err(CoreError::EndOfImage) => {
                    it.eof = true;
                    Err(CoreError::EndOfImage)
                }
                Err(e) => Err(e),
            },
            _ => {
                let available = self.size().saturating_sub(it.position);
                let count = ((self.pagesize + self.margin) as u64).min(available) as usize;
                if count == 0 {
                    it.eof = true;
                    return Err(CoreError::EndOfImage);
                }
                let pagesize = self.pagesize.min(count);

                let mut data = vec![0u8; count];
                let n = self.pread(&mut data, it.position)?;
                if n == 0 {
                    it.eof = true;
                    return Err(CoreError::EndOfImage);
                }
                if n < count {
                    return Err(CoreError::ReadError {
                        offset: it.position,
                        message: format!("short page read: {n} of {count} bytes"),
                    });
                }
                Ok(PageBuffer::from_vec(self.pos0(it), data, pagesize))
            }
        }
    }

    /// Iterate every page from the current beginning of the image.
    pub fn pages(&self) -> PageIter<'_> {
        PageIter {
            source: self,
            cursor: self.begin(),
            done: false,
        }
    }
}

/// Resumable page iterator. Read errors yield `Err` for that page and the
/// traversal continues; `EndOfImage` terminates it.
pub struct PageIter<'a> {
    source: &'a ImageSource,
    cursor: Cursor,
    done: bool,
}

impl PageIter<'_> {
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn fraction_done(&self) -> f64 {
        self.source.fraction_done(&self.cursor)
    }

    pub fn seek_block(&mut self, block: u64) -> u64 {
        self.source.seek_block(&mut self.cursor, block)
    }
}

impl Iterator for PageIter<'_> {
    type Item = Result<PageBuffer<'static>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.cursor.eof {
            return None;
        }
        let result = self.source.sbuf_alloc(&mut self.cursor);
        match result {
            Err(CoreError::EndOfImage) => {
                self.done = true;
                None
            }
            other => {
                self.source.step(&mut self.cursor);
                Some(other)
            }
        }
    }
}

/// Open an image with no E01 provider: `.e01` paths report `Unsupported`.
pub fn open_image(
    path: impl AsRef<Path>,
    recurse: bool,
    pagesize: usize,
    margin: usize,
) -> Result<ImageSource> {
    open_image_with(path, recurse, pagesize, margin, None)
}

/// Sniff `path` and construct the matching source.
pub fn open_image_with(
    path: impl AsRef<Path>,
    recurse: bool,
    pagesize: usize,
    margin: usize,
    ewf: Option<EwfOpener>,
) -> Result<ImageSource> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(CoreError::NoSuchFile(path.display().to_string()));
    }

    if path.is_dir() {
        if !recurse {
            log::error!(
                "{} is a directory; pass --recurse to scan a directory tree",
                path.display()
            );
            return Err(CoreError::NoSuchFile(path.display().to_string()));
        }
        // A directory of segments is one image, not a tree of artifacts.
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let entry_path = entry.path();
            if let Some(ext) = entry_path.extension().and_then(|e| e.to_str()) {
                if matches!(ext, "E01" | "000" | "001") {
                    return Err(CoreError::InvalidInput(format!(
                        "{} is part of a segmented image; process it as a single disk image \
                         instead of recursing over {}",
                        entry_path.display(),
                        path.display()
                    )));
                }
            }
        }
        let image = DirImage::open(path)?;
        return Ok(ImageSource {
            backend: Backend::Dir(image),
            pagesize: 0,
            margin: 0,
        });
    }

    let fname = path.to_string_lossy();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if ext == "e01" || fname.contains(".E01.") {
        let Some(open_ewf) = ewf else {
            return Err(CoreError::Unsupported(
                "this build has no E01 support".into(),
            ));
        };
        let provider = open_ewf(path)?;
        let image = E01Image::open(path, provider)?;
        return Ok(ImageSource {
            backend: Backend::E01(image),
            pagesize,
            margin,
        });
    }

    let image = RawImage::open(path)?;
    Ok(ImageSource {
        backend: Backend::Raw(image),
        pagesize,
        margin,
    })
}
