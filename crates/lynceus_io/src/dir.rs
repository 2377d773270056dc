//! Directory trees as image sources.
//!
//! Under `--recurse` the "image" is a set of files: the iterator addresses
//! files rather than bytes, and every file becomes a single page with no
//! margin. Byte-level `pread` has no meaning here.

use lynceus_core::{CoreError, PageBuffer, Pos0, Result};
use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub struct DirImage {
    root: PathBuf,
    files: Vec<PathBuf>,
}

impl DirImage {
    /// Collect every regular file under `root`. The list is sorted so two
    /// runs over the same tree produce identical reports; the walker's own
    /// order is not specified.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut files = Vec::new();
        for entry in WalkDir::new(&root) {
            let entry = entry.map_err(|e| {
                CoreError::NoSuchFile(format!("{}: {e}", root.display()))
            })?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(Self { root, files })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_count(&self) -> u64 {
        self.files.len() as u64
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn file_at(&self, file_number: u64) -> Option<&Path> {
        self.files.get(file_number as usize).map(PathBuf::as_path)
    }

    /// One whole file as one page: memory-mapped when the platform allows,
    /// read into memory otherwise (empty files cannot be mapped).
    pub fn sbuf_for(&self, file_number: u64) -> Result<PageBuffer<'static>> {
        let path = self
            .file_at(file_number)
            .ok_or(CoreError::EndOfImage)?;
        let pos0 = Pos0::in_file(path.to_string_lossy(), 0);
        let mut file =
            File::open(path).map_err(|_| CoreError::NoSuchFile(path.display().to_string()))?;

        match unsafe { Mmap::map(&file) } {
            Ok(map) if !map.is_empty() => Ok(PageBuffer::from_mmap(pos0, map)),
            _ => {
                let mut data = Vec::new();
                file.read_to_end(&mut data)?;
                let pagesize = data.len();
                Ok(PageBuffer::from_vec(pos0, data, pagesize))
            }
        }
    }
}
