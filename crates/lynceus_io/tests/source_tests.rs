//! Cross-backend invariants of the image-source abstraction.

use lynceus_io::{open_image, RawImage};
use rstest::rstest;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    File::create(&path).unwrap().write_all(data).unwrap();
    path
}

/// Consecutive preads covering [0, size) return the whole stream, for both
/// monolithic and split layouts.
#[rstest]
#[case::monolithic(vec![100_000])]
#[case::split_even(vec![50_000, 50_000])]
#[case::split_ragged(vec![1, 65_536, 34_463])]
fn pread_covers_whole_stream(#[case] segment_sizes: Vec<usize>) {
    let total: usize = segment_sizes.iter().sum();
    let stream: Vec<u8> = (0..total).map(|i| (i * 7) as u8).collect();

    let dir = TempDir::new().unwrap();
    let primary = if segment_sizes.len() == 1 {
        write_file(&dir, "disk.img", &stream)
    } else {
        let mut consumed = 0;
        for (i, len) in segment_sizes.iter().enumerate() {
            write_file(
                &dir,
                &format!("disk.{i:03}"),
                &stream[consumed..consumed + len],
            );
            consumed += len;
        }
        dir.path().join("disk.000")
    };

    let image = RawImage::open(&primary).unwrap();
    assert_eq!(image.size(), total as u64);

    let mut rebuilt = Vec::with_capacity(total);
    let mut chunk = [0u8; 7_919]; // prime-sized reads cross every boundary
    let mut offset = 0u64;
    loop {
        let n = image.pread(&mut chunk, offset).unwrap();
        if n == 0 {
            break;
        }
        rebuilt.extend_from_slice(&chunk[..n]);
        offset += n as u64;
    }
    assert_eq!(rebuilt, stream);
}

/// Every byte offset starts inside [0, pagesize) of exactly one page.
#[rstest]
#[case(100_000, 4096, 512)]
#[case(4096, 4096, 512)] // size equal to one page exactly
#[case(8192, 4096, 0)] // power-of-two total, no margin
#[case(10, 4096, 4096)] // image smaller than one page
fn page_starts_partition_the_image(
    #[case] size: usize,
    #[case] pagesize: usize,
    #[case] margin: usize,
) {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "disk.img", &vec![0xCDu8; size]);
    let source = open_image(&path, false, pagesize, margin).unwrap();

    let mut next_expected_start = 0u64;
    for page in source.pages() {
        let page = page.unwrap();
        assert_eq!(page.pos0().offset, next_expected_start);
        assert!(page.pagesize() > 0);
        assert!(page.bufsize() <= pagesize + margin);
        next_expected_start += page.pagesize() as u64;
    }
    assert_eq!(next_expected_start, size as u64);
}

#[test]
fn iteration_is_repeatable() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "disk.img", &vec![0x42u8; 20_000]);
    let source = open_image(&path, false, 4096, 256).unwrap();

    let first: Vec<u64> = source
        .pages()
        .map(|p| p.unwrap().pos0().offset)
        .collect();
    let second: Vec<u64> = source
        .pages()
        .map(|p| p.unwrap().pos0().offset)
        .collect();
    assert_eq!(first, second);
}
