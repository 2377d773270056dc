//! lynceus - bulk forensic feature extraction.
//!
//! Reads a disk image (raw, split raw, E01, or a directory tree) page by
//! page and runs every registered scanner over it, writing per-feature
//! report files. The file system is never interpreted; artifacts are carved
//! straight out of the bytes.

mod engine;

use anyhow::{bail, Context, Result};
use clap::Parser;
use lynceus_core::ScannerConfig;
use lynceus_io::{DEFAULT_MARGIN, DEFAULT_PAGESIZE};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use engine::EngineOptions;

#[derive(Parser, Debug)]
#[command(name = "lynceus")]
#[command(author, version, about = "Bulk feature extraction from disk images", long_about = None)]
struct Args {
    /// Disk image, first split-image segment, E01 file, or (with -R) a
    /// directory tree
    image: PathBuf,

    /// Directory the per-feature report files are written to
    #[arg(short, long, default_value = "lynceus_report")]
    output: PathBuf,

    /// Recurse over a directory of files instead of reading a disk image
    #[arg(short = 'R', long)]
    recurse: bool,

    /// Worker threads; defaults to the number of CPUs
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Bytes per page
    #[arg(long, default_value_t = DEFAULT_PAGESIZE)]
    pagesize: usize,

    /// Overlap carried past each page boundary
    #[arg(long, default_value_t = DEFAULT_MARGIN)]
    margin: usize,

    /// Scanner tuning value, key=value; may be repeated
    #[arg(short = 'S', value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Skip the scanners that interpret file-system structures
    #[arg(long)]
    no_filesystem_scanners: bool,

    /// List the registered scanners and their tunables, then exit
    #[arg(long)]
    list_scanners: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if args.pagesize == 0 {
        bail!("--pagesize must be positive");
    }

    let mut config = ScannerConfig::new();
    config.scan_filesystems = !args.no_filesystem_scanners;
    for pair in &args.set {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("-S takes key=value, got {pair}");
        };
        config.set(key, value);
    }

    if args.list_scanners {
        return list_scanners(&config);
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let opts = EngineOptions {
        image: args.image,
        output: args.output,
        recurse: args.recurse,
        threads: args.threads.unwrap_or_else(num_cpus::get),
        pagesize: args.pagesize,
        margin: args.margin,
    };
    let report = engine::run(&opts, config, running)?;
    if report.cancelled {
        bail!("scan interrupted");
    }
    Ok(())
}

/// INIT the scanners against a scratch directory so their self-descriptions
/// and registered tunables can be printed.
fn list_scanners(config: &ScannerConfig) -> Result<()> {
    let scratch = scratch_dir()?;
    let recorders = lynceus_core::FeatureRecorderSet::open(&scratch)?;
    let (mut registry, _pcap) = engine::build_registry(&scratch);
    registry.init_all(&recorders, config)?;

    println!("registered scanners:");
    for info in registry.infos() {
        println!("  {} {} - {}", info.name, info.version, info.description);
    }
    println!("\ntunables (-S key=value):");
    print!("{}", config.help_text());

    std::fs::remove_dir_all(&scratch).ok();
    Ok(())
}

fn scratch_dir() -> Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("lynceus-scanners-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
