//! Feature recorders: thread-safe, append-only, named output sinks.
//!
//! Each recorder owns one report file in the output directory and serializes
//! writes behind its own mutex. Ordering between recorders is undefined;
//! features from one page reach a given recorder in emission order.

use crate::error::{CoreError, Result};
use crate::sbuf::{PageBuffer, Pos0};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Escape a feature or context body for the tab-separated report format.
/// Tabs, newlines, backslashes and non-printable bytes become `\xNN`.
fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (b.is_ascii_graphic() && b != b'\\') || b == b' ' {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{:02X}", b));
        }
    }
    out
}

fn lock_or_recover<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A named append-only sink for scanner output.
pub struct FeatureRecorder {
    name: String,
    path: PathBuf,
    out: Mutex<BufWriter<File>>,
    features_written: AtomicU64,
}

impl FeatureRecorder {
    fn open(outdir: &Path, name: &str) -> Result<Self> {
        let path = outdir.join(format!("{name}.txt"));
        let file = File::create(&path)?;
        Ok(Self {
            name: name.to_string(),
            path,
            out: Mutex::new(BufWriter::new(file)),
            features_written: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn features_written(&self) -> u64 {
        self.features_written.load(Ordering::Relaxed)
    }

    /// Append one feature line: `pos0 \t feature \t context`.
    pub fn write(&self, pos0: &Pos0, feature: &str, context: &str) -> Result<()> {
        let mut out = lock_or_recover(&self.out);
        writeln!(
            out,
            "{}\t{}\t{}",
            pos0,
            escape(feature.as_bytes()),
            escape(context.as_bytes())
        )?;
        self.features_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Append a slice of a page as the feature body, anchored at the slice's
    /// own position. Used to dump surrounding text for context.
    pub fn write_buf(&self, sbuf: &PageBuffer<'_>, begin: usize, len: usize) -> Result<()> {
        let data = sbuf.data();
        let start = begin.min(data.len());
        let end = start.saturating_add(len).min(data.len());
        let pos0 = sbuf.pos0().shifted(start as u64);
        let mut out = lock_or_recover(&self.out);
        writeln!(out, "{}\t{}\t", pos0, escape(&data[start..end]))?;
        self.features_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        lock_or_recover(&self.out).flush()?;
        Ok(())
    }
}

/// The set of recorders for one run, keyed by name.
///
/// Recorders are created at scanner INIT from each scanner's declared
/// feature definitions, and flushed at shutdown.
pub struct FeatureRecorderSet {
    outdir: PathBuf,
    recorders: Mutex<HashMap<String, Arc<FeatureRecorder>>>,
}

impl FeatureRecorderSet {
    pub fn open(outdir: impl AsRef<Path>) -> Result<Self> {
        let outdir = outdir.as_ref().to_path_buf();
        fs::create_dir_all(&outdir)?;
        Ok(Self {
            outdir,
            recorders: Mutex::new(HashMap::new()),
        })
    }

    pub fn outdir(&self) -> &Path {
        &self.outdir
    }

    /// Create (or return the existing) recorder with this name.
    pub fn create(&self, name: &str) -> Result<Arc<FeatureRecorder>> {
        let mut recorders = lock_or_recover(&self.recorders);
        if let Some(r) = recorders.get(name) {
            return Ok(Arc::clone(r));
        }
        let recorder = Arc::new(FeatureRecorder::open(&self.outdir, name)?);
        recorders.insert(name.to_string(), Arc::clone(&recorder));
        Ok(recorder)
    }

    /// Look up a recorder a scanner declared at INIT.
    pub fn named(&self, name: &str) -> Result<Arc<FeatureRecorder>> {
        lock_or_recover(&self.recorders)
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::InvalidInput(format!("no feature recorder named {name}")))
    }

    pub fn total_features(&self) -> u64 {
        lock_or_recover(&self.recorders)
            .values()
            .map(|r| r.features_written())
            .sum()
    }

    /// Flush every recorder. Recorder I/O failures are fatal.
    pub fn close_all(&self) -> Result<()> {
        for recorder in lock_or_recover(&self.recorders).values() {
            recorder.flush()?;
        }
        Ok(())
    }
}
