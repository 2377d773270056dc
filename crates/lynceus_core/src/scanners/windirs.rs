//! Scanner for Microsoft directory structures.
//!
//! Carves FAT32 directory entries and NTFS MFT records out of raw pages
//! without interpreting the surrounding file system. FAT32 directories are
//! always sector-aligned, so every 512-byte sector is tried; MFT records are
//! probed every 512 bytes as 1024-byte candidates. Both passes are pure
//! heuristics tuned against false positives: anything structurally possible
//! but implausible accumulates weirdness until the candidate is rejected.

use crate::dfxml;
use crate::error::Result;
use crate::recorder::FeatureRecorder;
use crate::sbuf::{PageBuffer, RangeError};
use crate::scanner::{Phase, Scanner, ScannerParams};
use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Datelike, Utc};
use std::collections::BTreeMap;
use std::sync::OnceLock;

const SECTOR_SIZE: usize = 512;
const DENTRY_SIZE: usize = 32;
const DENTRIES_PER_SECTOR: usize = SECTOR_SIZE / DENTRY_SIZE;
const MFT_RECORD_SIZE: usize = 1024;

const FATFS_ATTR_VOLUME: u8 = 0x08;
const FATFS_ATTR_DIRECTORY: u8 = 0x10;
const FATFS_ATTR_ARCHIVE: u8 = 0x20;
const FATFS_ATTR_LFN: u8 = 0x0f;
const FATFS_ATTR_ALL: u8 = 0x3f;

/// "FILE", read little-endian.
const NTFS_MFT_MAGIC: u32 = 0x454c_4946;
const NTFS_MFT_RES: u8 = 0;
const NTFS_ATYPE_SI: u32 = 0x10;
const NTFS_ATYPE_ATTRLIST: u32 = 0x20;
const NTFS_ATYPE_FNAME: u32 = 0x30;
const NTFS_ATYPE_OBJID: u32 = 0x40;
const NTFS_ATTR_HEADER_LEN: usize = 16;

/// Sizes beyond a petabyte mean the record is noise, not a file.
const NTFS_FILESIZE_SANITY: u64 = 1000u64 * 1000 * 1000 * 1000 * 1000;

const CLUSTERS_IN_1GIB: u32 = 2 * 1024 * 1024;

const FILETIME_TICKS_PER_SEC: u64 = 10_000_000;
const FILETIME_UNIX_EPOCH_SECS: i64 = 11_644_473_600;

/// FAT32 tuning thresholds, captured once at INIT.
#[derive(Debug, Clone)]
pub struct WindirsConfig {
    pub weird_file_size: u32,
    pub weird_file_size2: u32,
    pub weird_cluster_count: u32,
    pub weird_cluster_count2: u32,
    pub max_bits_in_attrib: u32,
    pub max_weird_count: u32,
    pub last_year: u32,
}

impl Default for WindirsConfig {
    fn default() -> Self {
        Self {
            weird_file_size: 150 * 1024 * 1024,
            weird_file_size2: 512 * 1024 * 1024,
            weird_cluster_count: 32 * CLUSTERS_IN_1GIB,
            weird_cluster_count2: 128 * CLUSTERS_IN_1GIB,
            max_bits_in_attrib: 3,
            max_weird_count: 2,
            // allow up to 5 years in the future
            last_year: Utc::now().year() as u32 + 5,
        }
    }
}

/// A 32-byte FAT directory entry, viewed in place.
struct Dentry<'a> {
    raw: &'a [u8],
}

impl<'a> Dentry<'a> {
    fn new(raw: &'a [u8]) -> Self {
        debug_assert_eq!(raw.len(), DENTRY_SIZE);
        Self { raw }
    }

    fn name(&self) -> &[u8] {
        &self.raw[0..8]
    }

    fn ext(&self) -> &[u8] {
        &self.raw[8..11]
    }

    fn attrib(&self) -> u8 {
        self.raw[11]
    }

    fn ctimeten(&self) -> u8 {
        self.raw[13]
    }

    fn ctime(&self) -> u16 {
        LittleEndian::read_u16(&self.raw[14..16])
    }

    fn cdate(&self) -> u16 {
        LittleEndian::read_u16(&self.raw[16..18])
    }

    fn adate(&self) -> u16 {
        LittleEndian::read_u16(&self.raw[18..20])
    }

    fn highclust(&self) -> u16 {
        LittleEndian::read_u16(&self.raw[20..22])
    }

    fn wtime(&self) -> u16 {
        LittleEndian::read_u16(&self.raw[22..24])
    }

    fn wdate(&self) -> u16 {
        LittleEndian::read_u16(&self.raw[24..26])
    }

    fn startclust(&self) -> u16 {
        LittleEndian::read_u16(&self.raw[26..28])
    }

    fn size(&self) -> u32 {
        LittleEndian::read_u32(&self.raw[28..32])
    }

    fn start_cluster(&self) -> u32 {
        ((self.highclust() as u32) << 16) | self.startclust() as u32
    }

    /// "HELLO   " + "TXT" -> "HELLO.TXT"
    fn filename(&self) -> String {
        let mut s = String::with_capacity(12);
        for &ch in self.name() {
            if ch != b' ' {
                s.push(ch as char);
            }
        }
        s.push('.');
        for &ch in self.ext() {
            if ch != b' ' {
                s.push(ch as char);
            }
        }
        s
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FatValidation {
    Invalid,
    ValidDentry,
    ValidLfn,
    /// Valid, and no subsequent entry in the sector is in use.
    ValidLastDentry,
    /// The whole slot is one repeated byte; the sector holds nothing more.
    AllNull,
}

fn fat_day(d: u16) -> u16 {
    d & 0x1f
}

fn fat_month(d: u16) -> u16 {
    (d >> 5) & 0x0f
}

/// Raw year bits, 0..=127 relative to 1980.
fn fat_year_raw(d: u16) -> u16 {
    (d >> 9) & 0x7f
}

fn fat_year(d: u16) -> u32 {
    fat_year_raw(d) as u32 + 1980
}

fn fat_sec(t: u16) -> u16 {
    (t & 0x1f) * 2
}

fn fat_min(t: u16) -> u16 {
    (t >> 5) & 0x3f
}

fn fat_hour(t: u16) -> u16 {
    t >> 11
}

fn fat_is_time(t: u16) -> bool {
    t & 0x1f <= 29 && fat_min(t) <= 59 && fat_hour(t) <= 23
}

fn fat_is_date(d: u16) -> bool {
    fat_day(d) != 0 && (1..=12).contains(&fat_month(d))
}

fn fat_date_to_iso(d: u16, t: u16) -> String {
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        fat_year(d),
        fat_month(d),
        fat_day(d),
        fat_hour(t),
        fat_min(t),
        fat_sec(t)
    )
}

/// 9999-12-31T23:59:59Z; garbage bytes decode to timestamps far past this.
const FILETIME_MAX_UNIX_SECS: i64 = 253_402_300_799;

/// 64-bit Windows FILETIME (100ns ticks since 1601) to ISO-8601.
/// Implausible values render as an empty string.
fn filetime_to_iso(ft: u64) -> String {
    let secs = (ft / FILETIME_TICKS_PER_SEC) as i64 - FILETIME_UNIX_EPOCH_SECS;
    if !(0..=FILETIME_MAX_UNIX_SECS).contains(&secs) {
        return String::new();
    }
    match DateTime::<Utc>::from_timestamp(secs, 0) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => String::new(),
    }
}

/// Structural 8.3 byte check: bytes FAT itself forbids anywhere in the field.
fn fat_83_byte_ok(ch: u8) -> bool {
    !(ch < 0x05
        || ch == 0x22
        || (0x2a..=0x2c).contains(&ch)
        || ch == 0x2e
        || ch == 0x2f
        || (0x3a..=0x3f).contains(&ch)
        || (0x5b..=0x5d).contains(&ch)
        || ch == 0x7c)
}

/// Character-class whitelist applied up to the space/NUL terminator.
fn fat_83_char_ok(ch: u8) -> bool {
    ch.is_ascii_uppercase()
        || ch.is_ascii_digit()
        || matches!(
            ch,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'('
                | b')'
                | b'-'
                | b'@'
                | b'^'
                | b'_'
                | b'`'
                | b'{'
                | b'}'
                | b'~'
        )
}

/// Validate an 8.3 name (not a long file name).
fn valid_fat_dentry_name(name: &[u8], ext: &[u8]) -> bool {
    let blank_ext = ext.iter().all(|&c| c == b' ');
    if name[0] == b'.' && name[1..].iter().all(|&c| c == b' ') && blank_ext {
        return true; // "."
    }
    if name[0] == b'.' && name[1] == b'.' && name[2..].iter().all(|&c| c == b' ') && blank_ext {
        return true; // ".."
    }

    if name.iter().any(|&c| !fat_83_byte_ok(c)) {
        return false;
    }
    if ext.iter().any(|&c| !fat_83_byte_ok(c)) {
        return false;
    }

    for field in [name, ext] {
        for &ch in field {
            if ch == 0 || ch == b' ' {
                break; // end of name
            }
            if !fat_83_char_ok(ch) {
                return false;
            }
        }
    }
    true
}

/// Classify one 32-byte slot. Pure function of the slot bytes and the config.
fn valid_fat_directory_entry(entry: &PageBuffer<'_>, cfg: &WindirsConfig) -> FatValidation {
    if entry.bufsize() != DENTRY_SIZE {
        return FatValidation::Invalid;
    }
    if entry.is_constant() {
        return FatValidation::AllNull;
    }

    let raw = entry.data();
    let dentry = Dentry::new(raw);

    if dentry.attrib() & !FATFS_ATTR_ALL != 0 {
        return FatValidation::Invalid;
    }
    if dentry.attrib() == FATFS_ATTR_LFN {
        // VFAT long-file-name slot
        let seq = raw[0];
        if seq & !0x40 > 10 {
            return FatValidation::Invalid;
        }
        if raw[12] != 0 {
            return FatValidation::Invalid; // LDIR_Type must be zero
        }
        if LittleEndian::read_u16(&raw[26..28]) != 0 {
            return FatValidation::Invalid; // LDIR_FstClusLO must be zero
        }
        return FatValidation::ValidLfn;
    }

    if raw[0] == 0 {
        // entry is available and no subsequent entry is in use
        return FatValidation::ValidLastDentry;
    }
    if dentry.attrib() & FATFS_ATTR_LFN == FATFS_ATTR_LFN {
        return FatValidation::Invalid; // LFN bits plus DIR or ARCHIVE
    }
    if dentry.attrib() & FATFS_ATTR_DIRECTORY != 0 && dentry.attrib() & FATFS_ATTR_ARCHIVE != 0 {
        return FatValidation::Invalid;
    }
    if dentry.attrib() & 0x40 != 0 {
        return FatValidation::Invalid; // device, never found on disk
    }
    if !valid_fat_dentry_name(dentry.name(), dentry.ext()) {
        return FatValidation::Invalid;
    }
    if dentry.ctimeten() > 199 {
        return FatValidation::Invalid; // create-time fine resolution is 0..199
    }

    let ctime = dentry.ctime();
    let cdate = dentry.cdate();
    let adate = dentry.adate();
    let wtime = dentry.wtime();
    let wdate = dentry.wdate();

    if ctime != 0 && !fat_is_time(ctime) {
        return FatValidation::Invalid;
    }
    if cdate != 0 && !fat_is_date(cdate) {
        return FatValidation::Invalid;
    }
    if adate != 0 && !fat_is_date(adate) {
        return FatValidation::Invalid;
    }
    if adate == 0 && ctime == 0 && cdate == 0 {
        if dentry.attrib() & FATFS_ATTR_VOLUME != 0 {
            return FatValidation::ValidDentry; // volume label
        }
        return FatValidation::Invalid;
    }
    if !fat_is_time(wtime) {
        return FatValidation::Invalid;
    }
    if !fat_is_date(wdate) {
        return FatValidation::Invalid;
    }
    // equal time and date words look forged
    if ctime != 0 && ctime == cdate {
        return FatValidation::Invalid;
    }
    if wtime != 0 && wtime == wdate {
        return FatValidation::Invalid;
    }
    if adate != 0 && adate == ctime {
        return FatValidation::Invalid;
    }
    if adate != 0 && adate == wtime {
        return FatValidation::Invalid;
    }

    // Suspicious-but-not-fatal traits, thresholded together. The limits were
    // tuned by inspecting false positives on real images.
    let mut weird_count = 0u32;
    if fat_year(cdate) > cfg.last_year {
        weird_count += 1;
    }
    if fat_year(adate) > cfg.last_year {
        weird_count += 1;
    }
    if dentry.size() > cfg.weird_file_size {
        weird_count += 1;
    }
    if dentry.size() > cfg.weird_file_size2 {
        weird_count += 1;
    }
    if (dentry.attrib() as u32).count_ones() > cfg.max_bits_in_attrib {
        weird_count += 1;
    }
    if dentry.start_cluster() > cfg.weird_cluster_count {
        weird_count += 1;
    }
    if dentry.start_cluster() > cfg.weird_cluster_count2 {
        weird_count += 1;
    }
    if dentry.ctimeten() != 0 && dentry.ctimeten() != 100 {
        weird_count += 1;
    }
    if adate == 0 && cdate == 0 {
        weird_count += 1;
    }
    if adate == 0 && wdate == 0 {
        weird_count += 1;
    }
    if weird_count > cfg.max_weird_count {
        return FatValidation::Invalid;
    }

    FatValidation::ValidDentry
}

/// Scan every sector of the page for runs of FAT directory entries.
fn scan_fatdirs(
    sbuf: &PageBuffer<'_>,
    recorder: &FeatureRecorder,
    cfg: &WindirsConfig,
) -> Result<()> {
    for base in (0..sbuf.pagesize()).step_by(SECTOR_SIZE) {
        let sector = sbuf.slice(base, SECTOR_SIZE);
        if sector.bufsize() < SECTOR_SIZE {
            return Ok(()); // no space left
        }

        let mut last_valid: Option<usize> = None;
        let mut dentry_count = 0u32;
        let mut valid_year_count = 0u32;

        for entry_number in 0..DENTRIES_PER_SECTOR {
            let entry = sector.slice(entry_number * DENTRY_SIZE, DENTRY_SIZE);
            match valid_fat_directory_entry(&entry, cfg) {
                FatValidation::AllNull => break,
                FatValidation::Invalid => break, // one bad slot spoils the sector
                FatValidation::ValidDentry => {
                    let dentry = Dentry::new(entry.data());
                    let ayear = fat_year_raw(dentry.adate()) as u32;
                    let cyear = fat_year_raw(dentry.cdate()) as u32;
                    let wyear = fat_year_raw(dentry.wdate()) as u32;
                    if (ayear == 0 || 1980 + ayear < cfg.last_year)
                        && (cyear == 0 || 1980 + cyear < cfg.last_year)
                        && 1980 + wyear < cfg.last_year
                    {
                        valid_year_count += 1;
                    }
                    dentry_count += 1;
                    last_valid = Some(entry_number);
                }
                FatValidation::ValidLfn => {
                    last_valid = Some(entry_number);
                }
                FatValidation::ValidLastDentry => {
                    last_valid = Some(entry_number);
                    break;
                }
            }
        }

        // A lone entry with no believable year is almost always noise.
        if dentry_count == 1 && valid_year_count == 0 {
            continue;
        }
        if last_valid == Some(1) && valid_year_count == 0 {
            continue;
        }

        let Some(last_valid) = last_valid else {
            continue;
        };
        if dentry_count == 0 {
            continue;
        }

        for entry_number in 0..=last_valid {
            let entry = sector.slice(entry_number * DENTRY_SIZE, DENTRY_SIZE);
            if valid_fat_directory_entry(&entry, cfg) != FatValidation::ValidDentry {
                continue;
            }
            let dentry = Dentry::new(entry.data());
            let filename = dentry.filename();

            let mut fatmap = BTreeMap::new();
            fatmap.insert("filename".to_string(), filename.clone());
            fatmap.insert("ctimeten".to_string(), dentry.ctimeten().to_string());
            fatmap.insert(
                "ctime".to_string(),
                fat_date_to_iso(dentry.cdate(), dentry.ctime()),
            );
            fatmap.insert("atime".to_string(), fat_date_to_iso(dentry.adate(), 0));
            fatmap.insert(
                "mtime".to_string(),
                fat_date_to_iso(dentry.wdate(), dentry.wtime()),
            );
            fatmap.insert(
                "startcluster".to_string(),
                dentry.start_cluster().to_string(),
            );
            fatmap.insert("filesize".to_string(), dentry.size().to_string());
            fatmap.insert("attrib".to_string(), dentry.attrib().to_string());

            recorder.write(
                entry.pos0(),
                &filename,
                &dfxml::xmlmap(&fatmap, "fileobject", "src='fat'"),
            )?;
        }
    }
    Ok(())
}

fn format_guid(rec: &PageBuffer<'_>, off: usize) -> std::result::Result<String, RangeError> {
    let mut g = [0u8; 16];
    for (i, byte) in g.iter_mut().enumerate() {
        *byte = rec.get_u8(off + i)?;
    }
    // Microsoft mixed-endian layout: the first three groups are stored
    // little-endian, the last two big-endian.
    Ok(format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        g[3], g[2], g[1], g[0], g[5], g[4], g[7], g[6], g[8], g[9], g[10], g[11], g[12], g[13],
        g[14], g[15]
    ))
}

/// Decode one 1024-byte MFT record candidate. Returns the filename and the
/// DFXML field map when the record decodes to anything beyond its header.
fn decode_mft_record(
    rec: &PageBuffer<'_>,
) -> std::result::Result<Option<(String, BTreeMap<String, String>)>, RangeError> {
    if rec.get_u32_le(0)? != NTFS_MFT_MAGIC {
        return Ok(None);
    }
    let nlink = rec.get_u16_le(16)?;
    if nlink >= 10 {
        return Ok(None); // most files have far fewer links
    }

    let mut mftmap = BTreeMap::new();
    mftmap.insert("nlink".to_string(), nlink.to_string());
    mftmap.insert("lsn".to_string(), rec.get_u64_le(8)?.to_string());
    mftmap.insert("seq".to_string(), rec.get_u16_le(18)?.to_string());

    let mut filename = String::new();
    let mut attr_off = rec.get_u16_le(20)? as usize;

    'attrs: while attr_off + NTFS_ATTR_HEADER_LEN < rec.bufsize() {
        let attr_type = rec.get_u32_le(attr_off)?;
        let attr_len = rec.get_u32_le(attr_off + 4)? as usize;
        if attr_len == 0 {
            break; // malformed chain
        }
        let resident_flag = rec.get_u8(attr_off + 8)?;
        if resident_flag != NTFS_MFT_RES {
            // only resident attributes carry their payload here
            attr_off += attr_len;
            continue;
        }

        match attr_type {
            NTFS_ATYPE_ATTRLIST => {
                // counted but not decoded; contributes no field
            }
            NTFS_ATYPE_SI => {
                let soff = rec.get_u16_le(attr_off + 20)? as usize;
                let b = attr_off + soff;
                mftmap.insert(
                    "crtime_si".to_string(),
                    filetime_to_iso(rec.get_u64_le(b)?),
                );
                mftmap.insert(
                    "mtime_si".to_string(),
                    filetime_to_iso(rec.get_u64_le(b + 8)?),
                );
                mftmap.insert(
                    "ctime_si".to_string(),
                    filetime_to_iso(rec.get_u64_le(b + 16)?),
                );
                mftmap.insert(
                    "atime_si".to_string(),
                    filetime_to_iso(rec.get_u64_le(b + 24)?),
                );
            }
            NTFS_ATYPE_FNAME => {
                let soff = rec.get_u16_le(attr_off + 20)? as usize;
                let b = attr_off + soff;

                // 48-bit parent MFT reference plus its 16-bit sequence
                let mut par_ref = 0u64;
                for i in 0..6 {
                    par_ref |= (rec.get_u8(b + i)? as u64) << (8 * i);
                }
                mftmap.insert("par_ref".to_string(), par_ref.to_string());
                mftmap.insert(
                    "par_seq".to_string(),
                    rec.get_u16_le(b + 6)?.to_string(),
                );
                mftmap.insert(
                    "crtime_fn".to_string(),
                    filetime_to_iso(rec.get_u64_le(b + 8)?),
                );
                mftmap.insert(
                    "mtime_fn".to_string(),
                    filetime_to_iso(rec.get_u64_le(b + 16)?),
                );
                mftmap.insert(
                    "ctime_fn".to_string(),
                    filetime_to_iso(rec.get_u64_le(b + 24)?),
                );
                mftmap.insert(
                    "atime_fn".to_string(),
                    filetime_to_iso(rec.get_u64_le(b + 32)?),
                );

                let filesize_alloc = rec.get_u64_le(b + 40)?;
                if filesize_alloc > NTFS_FILESIZE_SANITY {
                    break 'attrs;
                }
                mftmap.insert("filesize_alloc".to_string(), filesize_alloc.to_string());

                let filesize = rec.get_u64_le(b + 48)?;
                if filesize > NTFS_FILESIZE_SANITY {
                    break 'attrs;
                }
                mftmap.insert("filesize".to_string(), filesize.to_string());

                mftmap.insert(
                    "attr_flags".to_string(),
                    rec.get_u64_le(b + 56)?.to_string(),
                );

                let fname_nlen = rec.get_u8(b + 64)? as usize;
                let fname_npos = b + 66;
                let mut units = Vec::with_capacity(fname_nlen);
                for i in 0..fname_nlen {
                    units.push(rec.get_u16_le(fname_npos + i * 2)?);
                }
                filename = String::from_utf16_lossy(&units);
                mftmap.insert("filename".to_string(), filename.clone());
            }
            NTFS_ATYPE_OBJID => {
                let slen = rec.get_u32_le(attr_off + 16)? as usize;
                let soff = rec.get_u16_le(attr_off + 20)? as usize;
                let keys = [
                    "guid_objectid",
                    "guid_birthvolumeid",
                    "guid_birthobjectid",
                    "guid_domainid",
                ];
                for (i, key) in keys.iter().enumerate() {
                    if slen >= (i + 1) * 16 {
                        let guid = format_guid(rec, attr_off + soff + i * 16)?;
                        mftmap.insert(key.to_string(), guid);
                    }
                }
            }
            _ => {}
        }

        attr_off += attr_len;
    }

    // nlink/lsn/seq alone are not worth reporting
    if mftmap.len() > 3 {
        if filename.is_empty() {
            filename = "$NOFILENAME".to_string();
        }
        Ok(Some((filename, mftmap)))
    } else {
        Ok(None)
    }
}

/// Probe the page every 512 bytes for 1024-byte MFT records.
fn scan_ntfsdirs(sbuf: &PageBuffer<'_>, recorder: &FeatureRecorder) -> Result<()> {
    for base in (0..sbuf.pagesize()).step_by(SECTOR_SIZE) {
        let rec = sbuf.slice(base, MFT_RECORD_SIZE);
        if rec.bufsize() != MFT_RECORD_SIZE {
            continue; // no space
        }
        match decode_mft_record(&rec) {
            Ok(Some((filename, mftmap))) => {
                recorder.write(
                    rec.pos0(),
                    &filename,
                    &dfxml::xmlmap(&mftmap, "fileobject", "src='mft'"),
                )?;
            }
            Ok(None) => {}
            // a bounds failure rejects only this candidate record
            Err(_) => continue,
        }
    }
    Ok(())
}

/// The windirs scanner: FAT32 dentry and NTFS MFT heuristic validator.
pub struct WindirsScanner {
    cfg: OnceLock<WindirsConfig>,
}

impl WindirsScanner {
    pub fn new() -> Self {
        Self {
            cfg: OnceLock::new(),
        }
    }
}

impl Default for WindirsScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner for WindirsScanner {
    fn run(&self, sp: &mut ScannerParams<'_>) -> Result<()> {
        match sp.phase {
            Phase::Init => {
                sp.check_version()?;
                let defaults = WindirsConfig::default();
                let cfg = WindirsConfig {
                    weird_file_size: sp.get_scanner_config(
                        "opt_weird_file_size",
                        defaults.weird_file_size,
                        "FAT32 file sizes above this count as weird",
                    ),
                    weird_file_size2: sp.get_scanner_config(
                        "opt_weird_file_size2",
                        defaults.weird_file_size2,
                        "FAT32 file sizes above this count as weird twice",
                    ),
                    weird_cluster_count: sp.get_scanner_config(
                        "opt_weird_cluster_count",
                        defaults.weird_cluster_count,
                        "FAT32 start clusters above this count as weird",
                    ),
                    weird_cluster_count2: sp.get_scanner_config(
                        "opt_weird_cluster_count2",
                        defaults.weird_cluster_count2,
                        "FAT32 start clusters above this count as weird twice",
                    ),
                    max_bits_in_attrib: sp.get_scanner_config(
                        "opt_max_bits_in_attrib",
                        defaults.max_bits_in_attrib,
                        "Ignore FAT32 entries with more attribute bits set than this",
                    ),
                    max_weird_count: sp.get_scanner_config(
                        "opt_max_weird_count",
                        defaults.max_weird_count,
                        "Number of weird traits that rejects a FAT32 entry",
                    ),
                    last_year: sp.get_scanner_config(
                        "opt_last_year",
                        defaults.last_year,
                        "Ignore FAT32 entries dated after this year",
                    ),
                };
                let _ = self.cfg.set(cfg);

                let info = sp.info_mut()?;
                info.name = "windirs".to_string();
                info.description = "Scans FAT32 and NTFS MFT directory structures".to_string();
                info.version = "1.0".to_string();
                info.feature_defs.push("windirs".to_string());
                info.flags.wants_filesystems = true;
                info.flags.depth0_only = true;
                Ok(())
            }
            Phase::Scan => {
                let sbuf = sp.sbuf()?;
                let recorder = sp.named_feature_recorder("windirs")?;
                let cfg = self.cfg.get().cloned().unwrap_or_default();
                scan_fatdirs(sbuf, &recorder, &cfg)?;
                scan_ntfsdirs(sbuf, &recorder)?;
                Ok(())
            }
            Phase::Shutdown => Ok(()),
        }
    }
}
