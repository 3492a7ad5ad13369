// Decoder for the dynamic linker cache at /etc/ld.so.cache.
//
// Two historical layouts exist.  The old format ("ld.so-1.7.0") dates back
// to libc5 and carries 12-byte file entries; the new format
// ("glibc-ld.so.cache1.1", glibc >= 2.32) uses 24-byte entries and may
// append an extension table with generator metadata and glibc-hwcaps tags.
// Caches produced with `ldconfig -c compat` concatenate both: an old-format
// cache followed by a complete new-format one.  All string references are
// byte offsets, relative to the start of the header that owns them, towards
// NUL-terminated strings in the same image.

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use crate::error::Error;
use crate::structure::{Reader, Record};

pub mod extensions;
pub mod flags;

use extensions::CacheExtensionSection;

pub const DEFAULT_CACHE_PATH: &str = "/etc/ld.so.cache";

const CACHEMAGIC: &[u8] = b"ld.so-1.7.0";
const CACHEMAGIC_VERSIONED_NEW: &[u8] = b"glibc-ld.so.cache1.1";

/// Cache layout recognized by the format discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFormat {
    Unknown,
    Old,
    New,
}

/// Detect the cache layout and the byte offset its header starts at.
///
/// A stream led by the old magic may still hold a new-format cache further
/// in (the compat concatenation); in that case the new header wins and the
/// returned offset points at it.
pub fn cache_format(data: &[u8]) -> (CacheFormat, usize) {
    if data.starts_with(CACHEMAGIC_VERSIONED_NEW) {
        return (CacheFormat::New, 0);
    }
    if data.starts_with(CACHEMAGIC) {
        // No access to the writer's alignment decisions here, so search for
        // the embedded magic instead of computing its position.
        let new_magic = |window: &[u8]| window == CACHEMAGIC_VERSIONED_NEW;
        if let Some(offset) = data.windows(CACHEMAGIC_VERSIONED_NEW.len()).position(new_magic) {
            return (CacheFormat::New, offset);
        }
        return (CacheFormat::Old, 0);
    }
    (CacheFormat::Unknown, 0)
}

#[derive(Debug)]
pub struct CacheHeaderOld {
    pub nlibs: u32,
}

impl Record for CacheHeaderOld {
    const NAME: &'static str = "cache_file";
    const SIZE: usize = 16;

    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        reader.skip(12)?;
        Ok(Self {
            nlibs: reader.read_u32()?,
        })
    }
}

#[derive(Debug)]
pub struct CacheHeaderNew {
    pub nlibs: u32,
    pub len_strings: u32,
    pub flags: u8,
    pub extension_offset: u32,
}

impl Record for CacheHeaderNew {
    // The declared struct size is 48 although the explicit fields only
    // cover 36 bytes; the remainder is reserved.
    const NAME: &'static str = "cache_file_new";
    const SIZE: usize = 48;

    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        reader.skip(20)?;
        let nlibs = reader.read_u32()?;
        let len_strings = reader.read_u32()?;
        let flags = reader.read_u8()?;
        reader.skip(3)?;
        Ok(Self {
            nlibs,
            len_strings,
            flags,
            extension_offset: reader.read_u32()?,
        })
    }
}

struct FileEntryOld {
    flags: i32,
    key: u32,
    value: u32,
}

impl Record for FileEntryOld {
    const NAME: &'static str = "file_entry";
    const SIZE: usize = 12;

    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            flags: reader.read_i32()?,
            key: reader.read_u32()?,
            value: reader.read_u32()?,
        })
    }
}

struct FileEntryNew {
    flags: i32,
    key: u32,
    value: u32,
    osversion: u32,
    hwcap: u64,
}

impl Record for FileEntryNew {
    const NAME: &'static str = "file_entry_new";
    const SIZE: usize = 24;

    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            flags: reader.read_i32()?,
            key: reader.read_u32()?,
            value: reader.read_u32()?,
            osversion: reader.read_u32()?,
            hwcap: reader.read_u64()?,
        })
    }
}

/// Cache header variant, tagged by the format discriminator.  `offset` is
/// the position of the header in the input stream; every offset inside the
/// cache is relative to it.
#[derive(Debug)]
pub enum CacheHeader {
    Old { offset: usize, header: CacheHeaderOld },
    New { offset: usize, header: CacheHeaderNew },
}

impl CacheHeader {
    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        match cache_format(data) {
            (CacheFormat::New, offset) => Ok(Self::New {
                offset,
                header: CacheHeaderNew::from_bytes(&data[offset..])?,
            }),
            (CacheFormat::Old, offset) => Ok(Self::Old {
                offset,
                header: CacheHeaderOld::from_bytes(&data[offset..])?,
            }),
            (CacheFormat::Unknown, _) => Err(Error::NotACache),
        }
    }
}

/// One cache record with all references resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Soname the loader indexes this entry under.
    pub key: String,
    /// Absolute path of the shared object.
    pub value: String,
    pub flags: i32,
    /// glibc-hwcaps subdirectory tag, empty when the entry carries none.
    pub hwcaps: String,
    /// New-format only, zero otherwise.
    pub osversion: u32,
    /// Raw hwcap field, new-format only, zero otherwise.
    pub hwcap: u64,
}

/// A parsed cache file.  Entries preserve their on-disk order.
#[derive(Debug)]
pub struct DynamicLinkerCache {
    pub file: PathBuf,
    pub generator: Option<String>,
    pub entries: Vec<CacheEntry>,
}

// Read the NUL-terminated string at `offset`.  A reference past the buffer
// is a structural defect; a missing terminator degrades to an empty string.
pub(crate) fn string_at(data: &[u8], offset: usize) -> Result<String, Error> {
    let tail = data
        .get(offset..)
        .ok_or(Error::Truncated("string reference"))?;
    match tail.iter().position(|&byte| byte == 0) {
        Some(end) => Ok(String::from_utf8_lossy(&tail[..end]).into_owned()),
        None => {
            debug!("no NUL terminator behind string reference");
            Ok(String::new())
        }
    }
}

fn record_at<R: Record>(data: &[u8], offset: usize) -> Result<R, Error> {
    data.get(offset..)
        .ok_or(Error::Truncated(R::NAME))
        .and_then(R::from_bytes)
}

fn cache_extension_sections(
    data: &[u8],
    extension_offset: u32,
) -> Result<Vec<CacheExtensionSection>, Error> {
    let tail = data
        .get(extension_offset as usize..)
        .ok_or(Error::BadExtension("extension offset out of bounds"))?;
    extensions::extension_sections(tail)
}

// The glibc-hwcaps strings referenced by entry hwcap fields, indexed by the
// position of their section among the hwcaps-tagged sections.  Extension
// corruption must not take the entries down with it, so failures degrade to
// an empty list or an empty slot.
fn hwcap_strings(data: &[u8], header: &CacheHeaderNew) -> Vec<String> {
    if header.extension_offset == 0 {
        return Vec::new();
    }
    let sections = match cache_extension_sections(data, header.extension_offset) {
        Ok(sections) => sections,
        Err(err) => {
            debug!("cache extension parsing failed: {}", err);
            return Vec::new();
        }
    };

    sections
        .iter()
        .filter(|section| section.tag == extensions::TAG_GLIBC_HWCAPS)
        .map(|section| {
            section.hwcap_string(data).unwrap_or_else(|err| {
                error!("failed to retrieve hwcap string value: {}", err);
                String::new()
            })
        })
        .collect()
}

fn old_entries(data: &[u8], header: &CacheHeaderOld) -> Result<Vec<CacheEntry>, Error> {
    (0..header.nlibs as usize)
        .map(|index| {
            let entry: FileEntryOld =
                record_at(data, CacheHeaderOld::SIZE + index * FileEntryOld::SIZE)?;
            Ok(CacheEntry {
                key: string_at(data, entry.key as usize)?,
                value: string_at(data, entry.value as usize)?,
                flags: entry.flags,
                hwcaps: String::new(),
                osversion: 0,
                hwcap: 0,
            })
        })
        .collect()
}

fn new_entries(data: &[u8], header: &CacheHeaderNew) -> Result<Vec<CacheEntry>, Error> {
    let hwcap_values = hwcap_strings(data, header);

    (0..header.nlibs as usize)
        .map(|index| {
            let entry: FileEntryNew =
                record_at(data, CacheHeaderNew::SIZE + index * FileEntryNew::SIZE)?;

            let hwcaps = if extensions::hwcap_extension_active(entry.hwcap) {
                // The lower half indexes the hwcaps-tagged sections; an
                // index past their count is surfaced as no tag at all.
                let index = entry.hwcap as u32 as usize;
                hwcap_values.get(index).cloned().unwrap_or_default()
            } else {
                String::new()
            };

            Ok(CacheEntry {
                key: string_at(data, entry.key as usize)?,
                value: string_at(data, entry.value as usize)?,
                flags: entry.flags,
                hwcaps,
                osversion: entry.osversion,
                hwcap: entry.hwcap,
            })
        })
        .collect()
}

/// Decode every file entry of a cache image, resolving string and hwcaps
/// references.  Header and entry defects abort with an error; extension
/// defects only cost the hwcaps annotations.
pub fn cache_entries(data: &[u8]) -> Result<Vec<CacheEntry>, Error> {
    match CacheHeader::deserialize(data)? {
        CacheHeader::Old { offset, header } => old_entries(&data[offset..], &header),
        CacheHeader::New { offset, header } => new_entries(&data[offset..], &header),
    }
}

/// The string recorded by the tool that generated the cache, when the cache
/// is recent enough to carry extensions.
pub fn get_generator(data: &[u8]) -> Option<String> {
    let CacheHeader::New { offset, header } = CacheHeader::deserialize(data).ok()? else {
        return None;
    };
    let data = &data[offset..];

    if header.extension_offset == 0 {
        debug!("failed to retrieve generator: no extensions in cache");
        return None;
    }

    let sections = match cache_extension_sections(data, header.extension_offset) {
        Ok(sections) => sections,
        Err(err) => {
            debug!("cache extension parsing failed: {}", err);
            return None;
        }
    };

    sections
        .iter()
        .find(|section| section.tag == extensions::TAG_GENERATOR)
        .and_then(|section| section.generator_string(data).ok())
}

static PARSED_CACHES: Mutex<BTreeMap<PathBuf, Option<Arc<DynamicLinkerCache>>>> =
    Mutex::new(BTreeMap::new());

fn load_cache(path: &Path) -> Option<Arc<DynamicLinkerCache>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) => {
            error!("failed to open dynamic linker cache: {}", err);
            return None;
        }
    };

    let entries = match cache_entries(&data) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("dynamic linker cache parsing failed: {}", err);
            return None;
        }
    };

    Some(Arc::new(DynamicLinkerCache {
        file: path.to_path_buf(),
        generator: get_generator(&data),
        entries,
    }))
}

/// Parse a cache file, memoizing the result per path so repeated
/// resolutions do not hit the disk.  Returns `None` when the file cannot be
/// read or recognized; the failure is memoized as well.
pub fn parse_cache<P: AsRef<Path>>(cache_file: P) -> Option<Arc<DynamicLinkerCache>> {
    let path = cache_file.as_ref().to_path_buf();
    let mut memo = PARSED_CACHES.lock().unwrap();
    if let Some(cached) = memo.get(&path) {
        return cached.clone();
    }
    let parsed = load_cache(&path);
    memo.insert(path, parsed.clone());
    parsed
}

/// Drop every memoized cache, forcing the next lookup to re-read the file.
pub fn invalidate() {
    PARSED_CACHES.lock().unwrap().clear();
}

fn host_flags() -> Option<i32> {
    env::current_exe()
        .ok()
        .and_then(|exe| flags::expected_flags(&exe))
}

/// Map soname to path for every cache entry compatible with `arch_flags`
/// (the running process' expected flags when absent).
///
/// The cache may hold several entries per soname differing in flags or
/// hardware capabilities; the loader prefers entries appearing first, so
/// the reverse walk below lets the earliest compatible entry win.
pub fn cache_libraries<P: AsRef<Path>>(
    cache_file: P,
    arch_flags: Option<i32>,
) -> HashMap<String, String> {
    let arch_flags = arch_flags.or_else(host_flags);

    let mut libraries = HashMap::new();
    let Some(cache) = parse_cache(cache_file) else {
        return libraries;
    };

    for entry in cache.entries.iter().rev() {
        if Some(entry.flags) == arch_flags {
            libraries.insert(entry.key.clone(), entry.value.clone());
        }
    }
    libraries
}

/// Contents of the default cache, filtered for the running process.
pub fn host_libraries() -> HashMap<String, String> {
    cache_libraries(DEFAULT_CACHE_PATH, None)
}

/// First cache entry matching the soname and flags, in on-disk order.
pub fn search_cache<P: AsRef<Path>>(
    soname: &str,
    cache_file: P,
    arch_flags: Option<i32>,
) -> Option<String> {
    let arch_flags = arch_flags.or_else(host_flags)?;
    let cache = parse_cache(cache_file)?;

    cache
        .entries
        .iter()
        .find(|entry| entry.key == soname && entry.flags == arch_flags)
        .map(|entry| entry.value.clone())
}
