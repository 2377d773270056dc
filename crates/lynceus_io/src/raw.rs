//! Raw and split-raw disk images.
//!
//! A raw image is one file, or a chain of `.000`/`.001`/`001.vmdk`-style
//! segments probed by a three-digit counter. Segments concatenate into one
//! logical byte stream; only one segment file is held open at a time.

use lynceus_core::{CoreError, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// One contiguous piece of the logical image.
#[derive(Debug, Clone)]
pub struct FileSegment {
    pub path: PathBuf,
    /// Offset of this segment's first byte in the logical image.
    pub offset: u64,
    pub length: u64,
}

/// Lazily opened segment file. Crossing a segment boundary closes the
/// previous file and opens the next.
struct SegmentHandle {
    path: PathBuf,
    file: File,
}

pub struct RawImage {
    primary: PathBuf,
    segments: Vec<FileSegment>,
    size: u64,
    current: Mutex<Option<SegmentHandle>>,
}

/// Multi-part naming: `img.000`, `img.001`, or VMware's `img-s001.vmdk`.
pub(crate) fn is_multipart_name(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".000") || name.ends_with(".001") || name.ends_with("001.vmdk")
}

/// Split the path around its trailing `000`/`001` digit run and return the
/// counter value of the next segment to probe.
pub(crate) fn split_template(path: &Path) -> Result<(String, String, u32)> {
    let s = path.to_string_lossy().into_owned();
    let p = s
        .rfind("000")
        .or_else(|| s.rfind("001"))
        .ok_or_else(|| {
            CoreError::InvalidInput(format!("split image name {s} has no 3-digit counter"))
        })?;
    let start: u32 = s[p..p + 3].parse().unwrap_or(0) + 1;
    Ok((s[..p].to_string(), s[p + 3..].to_string(), start))
}

/// Size of a file, falling back to a seek to the end for paths whose
/// metadata reports zero (block devices).
fn file_size(path: &Path) -> Result<u64> {
    let md = std::fs::metadata(path)
        .map_err(|_| CoreError::NoSuchFile(path.display().to_string()))?;
    if md.len() > 0 {
        return Ok(md.len());
    }
    let mut file =
        File::open(path).map_err(|_| CoreError::NoSuchFile(path.display().to_string()))?;
    Ok(file.seek(SeekFrom::End(0))?)
}

impl RawImage {
    /// Open the primary file and, for multi-part names, every further
    /// segment the counter template reaches.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let primary = path.as_ref().to_path_buf();
        let mut image = Self {
            primary: primary.clone(),
            segments: Vec::new(),
            size: 0,
            current: Mutex::new(None),
        };
        image.add_file(primary.clone())?;

        if is_multipart_name(&primary) {
            let (prefix, suffix, mut num) = split_template(&primary)?;
            loop {
                let candidate = PathBuf::from(format!("{prefix}{num:03}{suffix}"));
                if !candidate.is_file() {
                    break; // no more segments
                }
                image.add_file(candidate)?;
                num += 1;
            }
        }
        Ok(image)
    }

    fn add_file(&mut self, path: PathBuf) -> Result<()> {
        let length = file_size(&path)?;
        log::debug!("segment {} at offset {} ({length} bytes)", path.display(), self.size);
        self.segments.push(FileSegment {
            path,
            offset: self.size,
            length,
        });
        self.size += length;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.primary
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn segments(&self) -> &[FileSegment] {
        &self.segments
    }

    /// The segment containing logical offset `pos`, if any.
    pub fn find_offset(&self, pos: u64) -> Option<&FileSegment> {
        self.segments
            .iter()
            .find(|seg| seg.offset <= pos && pos < seg.offset + seg.length)
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<SegmentHandle>> {
        self.current.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Read from one segment at `within` bytes into it, stopping at the
    /// segment file's own end.
    fn read_segment(&self, seg: &FileSegment, within: u64, dst: &mut [u8]) -> Result<usize> {
        let mut current = self.lock_current();
        let reopen = match current.as_ref() {
            Some(handle) => handle.path != seg.path,
            None => true,
        };
        if reopen {
            let file = File::open(&seg.path)
                .map_err(|_| CoreError::NoSuchFile(seg.path.display().to_string()))?;
            #[cfg(target_os = "linux")]
            {
                use rustix::fs::{fadvise, Advice};
                let _ = fadvise(&file, 0, None, Advice::Sequential);
                let _ = fadvise(&file, 0, None, Advice::NoReuse);
            }
            *current = Some(SegmentHandle {
                path: seg.path.clone(),
                file,
            });
        }
        let handle = current.as_mut().expect("segment handle was just opened");

        handle.file.seek(SeekFrom::Start(within))?;
        let mut got = 0;
        while got < dst.len() {
            let n = handle.file.read(&mut dst[got..])?;
            if n == 0 {
                break;
            }
            got += n;
        }
        Ok(got)
    }

    /// Random-access read across segment boundaries. Returns the number of
    /// bytes read, which is short only at the end of the image.
    pub fn pread(&self, dst: &mut [u8], offset: u64) -> Result<usize> {
        let mut got = 0usize;
        while got < dst.len() {
            let pos = offset + got as u64;
            let Some(seg) = self.find_offset(pos) else {
                break; // nothing to read
            };
            let within = pos - seg.offset;
            let want = (dst.len() - got).min((seg.length - within) as usize);
            let n = self
                .read_segment(seg, within, &mut dst[got..got + want])
                .map_err(|e| match e {
                    CoreError::Io(err) => CoreError::ReadError {
                        offset: pos,
                        message: err.to_string(),
                    },
                    other => other,
                })?;
            if n == 0 {
                break; // segment file shorter than declared
            }
            got += n;
        }
        Ok(got)
    }
}
