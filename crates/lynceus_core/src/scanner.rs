//! The scanner lifecycle contract and registry.
//!
//! Every scanner is a single entry point driven through three phases: INIT
//! (describe yourself, declare feature recorders, read configuration), SCAN
//! (inspect one page), SHUTDOWN (flush state after the image is exhausted).
//! The registry owns the scanners and dispatches pages to them serially
//! within a worker.

use crate::error::{CoreError, Result};
use crate::recorder::{FeatureRecorder, FeatureRecorderSet};
use crate::sbuf::PageBuffer;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// Bumped when the shape of [`ScannerParams`] changes incompatibly.
/// Scanners assert against it at INIT via [`ScannerParams::check_version`].
pub const SCANNER_API_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Scan,
    Shutdown,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScannerFlags {
    /// Only run on top-level pages, never on recursively re-entered ones.
    pub depth0_only: bool,
    /// The scanner interprets file-system structures; gated by the
    /// filesystem-scanning switch.
    pub wants_filesystems: bool,
}

/// Filled in by each scanner at INIT.
#[derive(Debug, Clone, Default)]
pub struct ScannerInfo {
    pub name: String,
    pub author: String,
    pub description: String,
    pub version: String,
    /// Names of the feature recorders this scanner writes to; the registry
    /// opens them before the first SCAN.
    pub feature_defs: Vec<String>,
    pub flags: ScannerFlags,
}

/// Typed key/value tuning surface, populated from `-S key=value` options.
///
/// Help text registered through [`ScannerParams::get_scanner_config`] is
/// collected so the CLI can list every tunable with its default.
pub struct ScannerConfig {
    values: HashMap<String, String>,
    help: Mutex<BTreeMap<String, String>>,
    /// Master switch for scanners that set `wants_filesystems`.
    pub scan_filesystems: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ScannerConfig {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            help: Mutex::new(BTreeMap::new()),
            scan_filesystems: true,
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    /// Read a typed value, falling back to `default` when the key is unset
    /// or unparseable. The help line is recorded either way.
    pub fn get_or<T>(&self, key: &str, default: T, help: &str) -> T
    where
        T: FromStr + Display,
    {
        self.help
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), format!("{help} (default {default})"));
        match self.values.get(key) {
            Some(raw) => match raw.parse() {
                Ok(v) => v,
                Err(_) => {
                    log::warn!("config {key}={raw} does not parse; using default {default}");
                    default
                }
            },
            None => default,
        }
    }

    /// One `key: help` line per registered tunable, sorted by key.
    pub fn help_text(&self) -> String {
        self.help
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(k, h)| format!("  {k}: {h}\n"))
            .collect()
    }
}

/// Everything a scanner receives, for every phase.
pub struct ScannerParams<'a> {
    pub phase: Phase,
    /// Recursion depth of the page; 0 for pages read straight off the image.
    pub depth: u32,
    info: Option<&'a mut ScannerInfo>,
    sbuf: Option<&'a PageBuffer<'a>>,
    recorders: Option<&'a FeatureRecorderSet>,
    config: &'a ScannerConfig,
    api_version: u32,
}

impl<'a> ScannerParams<'a> {
    pub fn init(info: &'a mut ScannerInfo, config: &'a ScannerConfig) -> Self {
        Self {
            phase: Phase::Init,
            depth: 0,
            info: Some(info),
            sbuf: None,
            recorders: None,
            config,
            api_version: SCANNER_API_VERSION,
        }
    }

    pub fn scan(
        sbuf: &'a PageBuffer<'a>,
        depth: u32,
        recorders: &'a FeatureRecorderSet,
        config: &'a ScannerConfig,
    ) -> Self {
        Self {
            phase: Phase::Scan,
            depth,
            info: None,
            sbuf: Some(sbuf),
            recorders: Some(recorders),
            config,
            api_version: SCANNER_API_VERSION,
        }
    }

    pub fn shutdown(recorders: &'a FeatureRecorderSet, config: &'a ScannerConfig) -> Self {
        Self {
            phase: Phase::Shutdown,
            depth: 0,
            info: None,
            sbuf: None,
            recorders: Some(recorders),
            config,
            api_version: SCANNER_API_VERSION,
        }
    }

    /// Assert the host speaks the scanner API this crate was built against.
    pub fn check_version(&self) -> Result<()> {
        if self.api_version != SCANNER_API_VERSION {
            return Err(CoreError::Unsupported(format!(
                "scanner API version {} does not match host version {}",
                SCANNER_API_VERSION, self.api_version
            )));
        }
        Ok(())
    }

    /// The scanner description block; only present at INIT.
    pub fn info_mut(&mut self) -> Result<&mut ScannerInfo> {
        self.info
            .as_deref_mut()
            .ok_or_else(|| CoreError::InvalidInput("scanner info is only mutable at INIT".into()))
    }

    /// The current page; only present at SCAN.
    pub fn sbuf(&self) -> Result<&'a PageBuffer<'a>> {
        self.sbuf
            .ok_or_else(|| CoreError::InvalidInput("no page buffer outside SCAN".into()))
    }

    pub fn named_feature_recorder(&self, name: &str) -> Result<Arc<FeatureRecorder>> {
        let recorders = self.recorders.ok_or_else(|| {
            CoreError::InvalidInput("feature recorders are not available at INIT".into())
        })?;
        recorders.named(name)
    }

    pub fn get_scanner_config<T>(&self, key: &str, default: T, help: &str) -> T
    where
        T: FromStr + Display,
    {
        self.config.get_or(key, default, help)
    }
}

/// One scanner, one entry point.
pub trait Scanner: Send + Sync {
    fn run(&self, sp: &mut ScannerParams<'_>) -> Result<()>;
}

struct Entry {
    scanner: Box<dyn Scanner>,
    info: ScannerInfo,
}

/// Owns the registered scanners and drives their lifecycle.
#[derive(Default)]
pub struct ScannerRegistry {
    entries: Vec<Entry>,
}

impl ScannerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, scanner: Box<dyn Scanner>) {
        self.entries.push(Entry {
            scanner,
            info: ScannerInfo::default(),
        });
    }

    /// INIT every scanner once, then open the recorders they declared.
    pub fn init_all(
        &mut self,
        recorders: &FeatureRecorderSet,
        config: &ScannerConfig,
    ) -> Result<()> {
        for entry in &mut self.entries {
            let mut info = ScannerInfo::default();
            let mut sp = ScannerParams::init(&mut info, config);
            entry.scanner.run(&mut sp)?;
            for def in &info.feature_defs {
                recorders.create(def)?;
            }
            entry.info = info;
        }
        Ok(())
    }

    /// Run every scanner whose flags permit over one page, serially.
    /// Scanner failures are local: they are logged and the next scanner runs.
    pub fn scan_page(
        &self,
        sbuf: &PageBuffer<'_>,
        depth: u32,
        recorders: &FeatureRecorderSet,
        config: &ScannerConfig,
    ) {
        for entry in &self.entries {
            if entry.info.flags.depth0_only && depth > 0 {
                continue;
            }
            if entry.info.flags.wants_filesystems && !config.scan_filesystems {
                continue;
            }
            let mut sp = ScannerParams::scan(sbuf, depth, recorders, config);
            if let Err(err) = entry.scanner.run(&mut sp) {
                log::error!(
                    "scanner {} failed on page at {}: {err}",
                    entry.info.name,
                    sbuf.pos0()
                );
            }
        }
    }

    /// SHUTDOWN every scanner after the image is exhausted.
    pub fn shutdown_all(
        &self,
        recorders: &FeatureRecorderSet,
        config: &ScannerConfig,
    ) -> Result<()> {
        for entry in &self.entries {
            let mut sp = ScannerParams::shutdown(recorders, config);
            entry.scanner.run(&mut sp)?;
        }
        Ok(())
    }

    pub fn infos(&self) -> impl Iterator<Item = &ScannerInfo> {
        self.entries.iter().map(|e| &e.info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbuf::Pos0;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct CountingScanner {
        pages: AtomicU32,
    }

    impl Scanner for CountingScanner {
        fn run(&self, sp: &mut ScannerParams<'_>) -> Result<()> {
            match sp.phase {
                Phase::Init => {
                    sp.check_version()?;
                    let info = sp.info_mut()?;
                    info.name = "counter".into();
                    info.feature_defs.push("counter".into());
                    info.flags.depth0_only = true;
                    Ok(())
                }
                Phase::Scan => {
                    let sbuf = sp.sbuf()?;
                    self.pages.fetch_add(1, Ordering::Relaxed);
                    sp.named_feature_recorder("counter")?.write(
                        sbuf.pos0(),
                        "page",
                        &sbuf.pagesize().to_string(),
                    )
                }
                Phase::Shutdown => Ok(()),
            }
        }
    }

    #[test]
    fn test_lifecycle_and_depth_gate() {
        let dir = TempDir::new().unwrap();
        let recorders = FeatureRecorderSet::open(dir.path()).unwrap();
        let config = ScannerConfig::new();

        let mut registry = ScannerRegistry::new();
        registry.register(Box::new(CountingScanner {
            pages: AtomicU32::new(0),
        }));
        registry.init_all(&recorders, &config).unwrap();
        assert!(recorders.named("counter").is_ok());

        let page = PageBuffer::from_vec(Pos0::new(0), vec![0u8; 64], 64);
        registry.scan_page(&page, 0, &recorders, &config);
        registry.scan_page(&page, 1, &recorders, &config); // gated off by depth0_only
        registry.shutdown_all(&recorders, &config).unwrap();
        recorders.close_all().unwrap();

        let body = std::fs::read_to_string(dir.path().join("counter.txt")).unwrap();
        assert_eq!(body.lines().count(), 1);
    }

    #[test]
    fn test_config_typed_reads() {
        let mut config = ScannerConfig::new();
        config.set("opt_max_weird_count", "5");
        config.set("bad", "not-a-number");
        assert_eq!(config.get_or("opt_max_weird_count", 2u32, "threshold"), 5);
        assert_eq!(config.get_or("unset", 7u32, "threshold"), 7);
        assert_eq!(config.get_or("bad", 3u32, "threshold"), 3);
        assert!(config.help_text().contains("opt_max_weird_count"));
    }
}
