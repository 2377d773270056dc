//! Core types and scanner framework for lynceus.
//!
//! This crate holds everything a scanner needs to run against a page of
//! evidence: the [`PageBuffer`] byte window, the [`FeatureRecorder`] output
//! sinks, and the scanner lifecycle contract. Image readers live in
//! `lynceus_io`; the worker-pool driver lives in `lynceus_app`.

pub mod dfxml;
pub mod error;
pub mod recorder;
pub mod sbuf;
pub mod scanner;
pub mod scanners;

pub use error::{CoreError, Result};
pub use recorder::{FeatureRecorder, FeatureRecorderSet};
pub use sbuf::{PageBuffer, Pos0, RangeError};
pub use scanner::{
    Phase, Scanner, ScannerConfig, ScannerFlags, ScannerInfo, ScannerParams, ScannerRegistry,
    SCANNER_API_VERSION,
};
