//! Concurrent page-scanning engine.
//!
//! A producer drives the page iterator while a pool of workers runs every
//! registered scanner over each page serially. Pages are heavy, scanners are
//! cheap: one page in flight per worker keeps memory bounded. Cancellation
//! is cooperative and polled between pages; a page already handed to a
//! worker always finishes.

use anyhow::Context;
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use lynceus_core::scanners::{PcapCarveScanner, PcapWriter, TextMatchScanner, WindirsScanner};
use lynceus_core::{FeatureRecorderSet, PageBuffer, ScannerConfig, ScannerRegistry};
use lynceus_io::{open_image, ImageSource};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const PAGE_CHANNEL_CAPACITY: usize = 10;
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct EngineOptions {
    pub image: PathBuf,
    pub output: PathBuf,
    pub recurse: bool,
    pub threads: usize,
    pub pagesize: usize,
    pub margin: usize,
}

#[derive(Debug, Default)]
pub struct EngineReport {
    pub pages_scanned: u64,
    pub pages_skipped: u64,
    pub features_written: u64,
    pub packets_written: u64,
    pub cancelled: bool,
}

/// Register every built-in scanner. The pcap writer is shared between the
/// carver and the report so its packet count survives the run.
pub fn build_registry(outdir: &Path) -> (ScannerRegistry, Arc<PcapWriter>) {
    let pcap = Arc::new(PcapWriter::new(outdir));
    let mut registry = ScannerRegistry::new();
    registry.register(Box::new(WindirsScanner::new()));
    registry.register(Box::new(TextMatchScanner::facebook()));
    registry.register(Box::new(PcapCarveScanner::new(Arc::clone(&pcap))));
    (registry, pcap)
}

pub fn run(
    opts: &EngineOptions,
    config: ScannerConfig,
    running: Arc<AtomicBool>,
) -> anyhow::Result<EngineReport> {
    let start_time = Instant::now();

    let recorders = Arc::new(
        FeatureRecorderSet::open(&opts.output)
            .with_context(|| format!("cannot open output directory {}", opts.output.display()))?,
    );
    let (mut registry, pcap) = build_registry(&opts.output);
    registry
        .init_all(&recorders, &config)
        .context("scanner initialization failed")?;

    let source = open_image(&opts.image, opts.recurse, opts.pagesize, opts.margin)
        .with_context(|| format!("cannot open image {}", opts.image.display()))?;
    for line in source.details() {
        log::info!("{line}");
    }

    let num_workers = opts.threads.max(1);
    println!("[lynceus] scanning {}", opts.image.display());
    if source.is_file_addressed() {
        println!("[lynceus] image is a directory tree of {} files", source.size());
    } else {
        println!(
            "[lynceus] image size: {}",
            format_size(source.size(), BINARY)
        );
    }
    println!("[lynceus] using {} worker threads", num_workers);

    let pb = ProgressBar::new(source.size());
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:50.cyan/blue}] {pos}/{len} ({eta})")
            .expect("static progress template parses")
            .progress_chars("##-"),
    );

    let registry = Arc::new(registry);
    let config = Arc::new(config);
    let (page_tx, page_rx): (
        Sender<PageBuffer<'static>>,
        Receiver<PageBuffer<'static>>,
    ) = bounded(PAGE_CHANNEL_CAPACITY);

    let mut worker_handles = Vec::with_capacity(num_workers);
    for _ in 0..num_workers {
        let rx = page_rx.clone();
        let registry = Arc::clone(&registry);
        let recorders = Arc::clone(&recorders);
        let config = Arc::clone(&config);
        worker_handles.push(thread::spawn(move || {
            for page in rx {
                registry.scan_page(&page, 0, &recorders, &config);
            }
        }));
    }
    drop(page_rx);

    let mut report = EngineReport::default();
    let mut pages = source.pages();
    loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let Some(item) = pages.next() else {
            break;
        };
        match item {
            Ok(page) => {
                if !send_page(&page_tx, page, &running) {
                    break;
                }
                report.pages_scanned += 1;
            }
            Err(e) => {
                // read failures cost one page, not the run
                report.pages_skipped += 1;
                log::error!(
                    "skipping page at {}: {e}",
                    source.describe(&pages.cursor())
                );
            }
        }
        pb.set_position(pages.cursor().position.min(source.size()));
    }
    drop(page_tx);

    for (i, handle) in worker_handles.into_iter().enumerate() {
        if let Err(e) = handle.join() {
            log::error!("worker thread {i} panicked: {e:?}");
        }
    }

    registry
        .shutdown_all(&recorders, &config)
        .context("scanner shutdown failed")?;
    pcap.close().context("cannot flush pcap output")?;
    recorders.close_all().context("cannot flush feature recorders")?;
    pb.finish_and_clear();

    report.cancelled = !running.load(Ordering::SeqCst);
    report.features_written = recorders.total_features();
    report.packets_written = pcap.packets_written();

    print_summary(&report, &source, &opts.output, start_time.elapsed());
    Ok(report)
}

/// Hand one page to the pool, polling the cancellation flag while the
/// channel is full. Returns false when the run should stop.
fn send_page(
    tx: &Sender<PageBuffer<'static>>,
    page: PageBuffer<'static>,
    running: &AtomicBool,
) -> bool {
    let mut page = page;
    loop {
        match tx.send_timeout(page, SEND_POLL_INTERVAL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(p)) => {
                if !running.load(Ordering::SeqCst) {
                    return false;
                }
                page = p;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

fn print_summary(report: &EngineReport, source: &ImageSource, outdir: &Path, elapsed: Duration) {
    println!();
    if report.cancelled {
        println!("=== scan interrupted ===");
    } else {
        println!("=== scan finished ===");
    }
    println!("  elapsed:          {:.1}s", elapsed.as_secs_f64());
    if source.is_file_addressed() {
        println!("  files scanned:    {}", report.pages_scanned);
    } else {
        println!("  pages scanned:    {}", report.pages_scanned);
    }
    if report.pages_skipped > 0 {
        println!("  pages skipped:    {}", report.pages_skipped);
    }
    println!("  features written: {}", report.features_written);
    if report.packets_written > 0 {
        println!("  packets carved:   {}", report.packets_written);
    }
    println!("  reports saved to: {}", outdir.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn run_over(data: &[u8], pagesize: usize, margin: usize) -> (TempDir, EngineReport) {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("evidence.img");
        File::create(&image).unwrap().write_all(data).unwrap();

        let opts = EngineOptions {
            image,
            output: dir.path().join("report"),
            recurse: false,
            threads: 2,
            pagesize,
            margin,
        };
        let running = Arc::new(AtomicBool::new(true));
        let report = run(&opts, ScannerConfig::new(), running).unwrap();
        (dir, report)
    }

    #[test]
    fn test_engine_scans_all_pages() {
        let (_dir, report) = run_over(&vec![0u8; 64 * 1024], 16 * 1024, 1024);
        assert_eq!(report.pages_scanned, 4);
        assert_eq!(report.pages_skipped, 0);
        assert!(!report.cancelled);
    }

    #[test]
    fn test_engine_empty_image() {
        let (_dir, report) = run_over(&[], 4096, 512);
        assert_eq!(report.pages_scanned, 0);
    }

    /// A plausible FAT32 directory entry for HELLO.TXT with 2015 dates.
    fn fat_sector() -> [u8; 512] {
        let mut sector = [0u8; 512];
        let entry: [u8; 32] = [
            b'H', b'E', b'L', b'L', b'O', b' ', b' ', b' ', // name
            b'T', b'X', b'T', // ext
            0x20, // ARCHIVE
            0x00, 100,  // reserved, ctimeten
            0x8f, 0x52, // ctime 10:20:30
            0x65, 0x46, // cdate 2015-03-05
            0x86, 0x46, // adate 2015-04-06
            0x00, 0x00, // highclust
            0xb0, 0x5a, // wtime 11:21:32
            0x67, 0x46, // wdate 2015-03-07
            0x09, 0x00, // startclust
            0xd2, 0x04, 0x00, 0x00, // size 1234
        ];
        sector[..32].copy_from_slice(&entry);
        sector
    }

    #[test]
    fn test_pipeline_carves_fat_and_needles() {
        let mut data = vec![0u8; 64 * 1024];
        data[..512].copy_from_slice(&fat_sector());
        let marker = b"facebook.com/profile.php";
        data[20_000..20_000 + marker.len()].copy_from_slice(marker);

        let (dir, report) = run_over(&data, 16 * 1024, 1024);
        assert!(report.features_written >= 2);

        let windirs =
            std::fs::read_to_string(dir.path().join("report/windirs.txt")).unwrap();
        assert!(windirs.contains("HELLO.TXT"));
        assert!(windirs.contains("src='fat'"));

        let facebook =
            std::fs::read_to_string(dir.path().join("report/facebook.txt")).unwrap();
        assert_eq!(facebook.lines().count(), 1);
        // pos0 of the context window, not of the raw hit
        assert!(facebook.starts_with(&format!("{}\t", 20_000 - 2048)));
    }

    #[test]
    fn test_pipeline_is_idempotent() {
        let mut data = vec![0u8; 32 * 1024];
        data[..512].copy_from_slice(&fat_sector());
        data[4096..4608].copy_from_slice(&fat_sector());

        let (dir_a, _) = run_over(&data, 8 * 1024, 512);
        let (dir_b, _) = run_over(&data, 8 * 1024, 512);
        let a = std::fs::read(dir_a.path().join("report/windirs.txt")).unwrap();
        let b = std::fs::read(dir_b.path().join("report/windirs.txt")).unwrap();
        assert!(!a.is_empty());
        assert_eq!(a, b);
    }

    #[test]
    fn test_cancellation_before_start() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("evidence.img");
        File::create(&image)
            .unwrap()
            .write_all(&vec![0u8; 8192])
            .unwrap();

        let opts = EngineOptions {
            image,
            output: dir.path().join("report"),
            recurse: false,
            threads: 1,
            pagesize: 4096,
            margin: 0,
        };
        let running = Arc::new(AtomicBool::new(false));
        let report = run(&opts, ScannerConfig::new(), running).unwrap();
        assert_eq!(report.pages_scanned, 0);
        assert!(report.cancelled);
    }
}
