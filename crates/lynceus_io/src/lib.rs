//! Image readers for lynceus.
//!
//! One uniform random-access byte stream over very different backends:
//! monolithic raw images, split multi-part raw images, EnCase E01 segment
//! sets (through an external provider), and recursive directory trees. The
//! [`ImageSource`] factory sniffs the path, and [`ImageSource::pages`]
//! iterates overlapping pages ready for the scanner pool.

pub mod dir;
pub mod ewf;
pub mod raw;
pub mod source;

pub use dir::DirImage;
pub use ewf::{E01Image, EwfProvider};
pub use raw::{FileSegment, RawImage};
pub use source::{
    open_image, open_image_with, Cursor, EwfOpener, ImageSource, PageIter, DEFAULT_MARGIN,
    DEFAULT_PAGESIZE,
};
