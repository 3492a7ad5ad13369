// ELF metadata relevant to dynamic linking, parsed into a Library record.
//
// Only the dynamic array and the GNU version sections are consulted: the
// soname under which the object is indexed, its DT_NEEDED dependencies,
// the DT_RPATH/DT_RUNPATH search lists, the version names it defines
// (verdef) and the ones it requires from each provider (verneed).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::{fmt, fs, str};

use object::elf::*;
use object::read::elf::*;
use object::read::StringTable;
use object::Endianness;

use tracing::error;

use crate::error::Error;

#[derive(Debug, Clone, Default)]
pub struct Library {
    /// DT_SONAME value; empty for objects without one (e.g. executables).
    pub soname: String,
    /// Path the metadata was read from.
    pub binary_path: PathBuf,
    /// Sonames of the DT_NEEDED entries.
    pub needed: BTreeSet<String>,
    pub rpath: Vec<String>,
    pub runpath: Vec<String>,
    /// First aux name of each version definition group.
    pub defined_versions: BTreeSet<String>,
    /// Version names required from each provider soname.
    pub required_versions: BTreeMap<String, BTreeSet<String>>,
}

// Identity is the soname together with the version set it defines, so two
// builds of the "same" library with different version coverage compare
// unequal.
impl PartialEq for Library {
    fn eq(&self, other: &Self) -> bool {
        self.soname == other.soname && self.defined_versions == other.defined_versions
    }
}

impl Eq for Library {}

impl fmt::Display for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' from '{}'", self.soname, self.binary_path.display())
    }
}

impl Library {
    /// Parse the object at `path`.  Never fails: an unreadable or malformed
    /// file is logged and yields a record with only `binary_path` set,
    /// which depends on nothing and satisfies no requirement, so closure
    /// computation treats it as a leaf of unknown identity.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Library {
        let mut library = Library {
            binary_path: path.as_ref().to_path_buf(),
            ..Library::default()
        };

        if let Err(err) = parse_file(&mut library) {
            error!(
                "error parsing '{}' for ELF data: {}",
                library.binary_path.display(),
                err
            );
        }
        library
    }
}

fn parse_file(library: &mut Library) -> Result<(), Error> {
    let file = fs::File::open(&library.binary_path)?;
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    let data = &*mmap;

    match object::FileKind::parse(data) {
        Ok(object::FileKind::Elf32) => parse_elf::<FileHeader32<Endianness>>(library, data),
        Ok(object::FileKind::Elf64) => parse_elf::<FileHeader64<Endianness>>(library, data),
        _ => Err(Error::NotElf(library.binary_path.clone())),
    }
}

fn parse_elf<Elf: FileHeader<Endian = Endianness>>(
    library: &mut Library,
    data: &[u8],
) -> Result<(), Error> {
    let elf = Elf::parse(data)?;
    let endian = elf.endian()?;

    parse_dynamic(library, endian, elf, data)?;
    parse_versions(library, endian, elf, data)
}

fn parse_dynamic<Elf: FileHeader<Endian = Endianness>>(
    library: &mut Library,
    endian: Elf::Endian,
    elf: &Elf,
    data: &[u8],
) -> Result<(), Error> {
    let segments = elf.program_headers(endian, data)?;

    // Objects without PT_DYNAMIC (static executables) simply have nothing
    // to contribute.
    let dynamic = match segments
        .iter()
        .find(|segment| segment.p_type(endian) == PT_DYNAMIC)
        .and_then(|segment| segment.dynamic(endian, data).transpose())
    {
        Some(dynamic) => dynamic?,
        None => return Ok(()),
    };

    // To decode any string entry we first need DT_STRTAB/DT_STRSZ.
    let mut strtab = 0;
    let mut strsz = 0;
    for entry in dynamic {
        let tag = entry.d_tag(endian).into();
        if tag == DT_STRTAB.into() {
            strtab = entry.d_val(endian).into();
        } else if tag == DT_STRSZ.into() {
            strsz = entry.d_val(endian).into();
        }
    }
    let Some(dynstr) = dynamic_string_table::<Elf>(endian, data, segments, strtab, strsz) else {
        return Ok(());
    };

    library.soname = dynamic_string::<Elf>(endian, DT_SONAME, dynamic, dynstr).unwrap_or_default();
    library.rpath = dynamic_search_path::<Elf>(endian, DT_RPATH, dynamic, dynstr);
    library.runpath = dynamic_search_path::<Elf>(endian, DT_RUNPATH, dynamic, dynstr);

    for entry in dynamic {
        if entry.d_tag(endian).into() == DT_NULL.into() {
            break;
        }
        if entry.tag32(endian).is_none()
            || !entry.is_string(endian)
            || entry.d_tag(endian).into() != DT_NEEDED.into()
        {
            continue;
        }
        if let Ok(needed) = entry.string(endian, dynstr) {
            if let Ok(needed) = str::from_utf8(needed) {
                library.needed.insert(needed.to_string());
            }
        }
    }

    Ok(())
}

fn dynamic_string_table<'data, Elf: FileHeader>(
    endian: Elf::Endian,
    data: &'data [u8],
    segments: &'data [Elf::ProgramHeader],
    strtab: u64,
    strsz: u64,
) -> Option<StringTable<'data>> {
    for segment in segments {
        if let Ok(Some(data)) = segment.data_range(endian, data, strtab, strsz) {
            return Some(StringTable::new(data, 0, data.len() as u64));
        }
    }
    None
}

fn dynamic_string<Elf: FileHeader>(
    endian: Elf::Endian,
    tag: u32,
    dynamic: &[Elf::Dyn],
    dynstr: StringTable,
) -> Option<String> {
    for entry in dynamic {
        if entry.d_tag(endian).into() == DT_NULL.into() {
            break;
        }
        if entry.tag32(endian).is_none() || entry.d_tag(endian).into() != tag.into() {
            continue;
        }
        if let Ok(value) = entry.string(endian, dynstr) {
            if let Ok(value) = str::from_utf8(value) {
                return Some(value.to_string());
            }
        }
    }
    None
}

// DT_RPATH and DT_RUNPATH are single colon-separated entries.  No
// $ORIGIN/$LIB/$PLATFORM expansion is performed.
fn dynamic_search_path<Elf: FileHeader>(
    endian: Elf::Endian,
    tag: u32,
    dynamic: &[Elf::Dyn],
    dynstr: StringTable,
) -> Vec<String> {
    match dynamic_string::<Elf>(endian, tag, dynamic, dynstr) {
        Some(paths) => paths.split(':').map(str::to_string).collect(),
        None => Vec::new(),
    }
}

fn parse_versions<Elf: FileHeader<Endian = Endianness>>(
    library: &mut Library,
    endian: Elf::Endian,
    elf: &Elf,
    data: &[u8],
) -> Result<(), Error> {
    let sections = elf.sections(endian, data)?;

    if let Some((mut verdefs, link)) = sections.gnu_verdef(endian, data)? {
        let strings = sections.strings(endian, data, link)?;
        // The first aux entry of a definition group names the version; the
        // rest list its predecessors.
        while let Some((_, mut aux)) = verdefs.next()? {
            if let Some(aux) = aux.next()? {
                if let Ok(name) = str::from_utf8(aux.name(endian, strings)?) {
                    library.defined_versions.insert(name.to_string());
                }
            }
        }
    }

    if let Some((mut verneeds, link)) = sections.gnu_verneed(endian, data)? {
        let strings = sections.strings(endian, data, link)?;
        while let Some((verneed, mut aux)) = verneeds.next()? {
            let Ok(provider) = str::from_utf8(verneed.file(endian, strings)?) else {
                continue;
            };
            let mut names = BTreeSet::new();
            while let Some(aux) = aux.next()? {
                if let Ok(name) = str::from_utf8(aux.name(endian, strings)?) {
                    names.insert(name.to_string());
                }
            }
            library.required_versions.insert(provider.to_string(), names);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample(soname: &str, versions: &[&str]) -> Library {
        Library {
            soname: soname.to_string(),
            binary_path: PathBuf::from(format!("/lib64/{}", soname)),
            defined_versions: versions.iter().map(|v| v.to_string()).collect(),
            ..Library::default()
        }
    }

    #[test]
    fn identity_is_soname_and_versions() {
        let current = sample("libm.so.6", &["GLIBC_2.2.5", "GLIBC_2.35"]);
        let stale = sample("libm.so.6", &["GLIBC_2.2.5"]);
        let same = sample("libm.so.6", &["GLIBC_2.2.5", "GLIBC_2.35"]);
        let other = sample("libc.so.6", &["GLIBC_2.2.5", "GLIBC_2.35"]);

        assert_eq!(current, same);
        assert_ne!(current, stale);
        assert_ne!(current, other);
    }

    #[test]
    fn unparseable_file_yields_degenerate_record() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("lib.so");
        fs::File::create(&path)
            .unwrap()
            .write_all(b"not an object at all")
            .unwrap();

        let library = Library::from_path(&path);
        assert_eq!(library.binary_path, path);
        assert!(library.soname.is_empty());
        assert!(library.needed.is_empty());
        assert!(library.defined_versions.is_empty());
        assert!(library.required_versions.is_empty());
    }

    #[test]
    fn missing_file_yields_degenerate_record() {
        let library = Library::from_path("/nonexistent/libphantom.so.1");
        assert!(library.soname.is_empty());
        assert!(library.needed.is_empty());
    }

    // Exercised against the running system when one is available; mirrors
    // the behavior of the dynamic loader on any glibc install.
    #[test]
    fn parse_system_libc() {
        let Some(path) = crate::linker::resolve("libc.so.6", &[], &[], None) else {
            return;
        };

        let library = Library::from_path(&path);
        assert_eq!(library.soname, "libc.so.6");
        assert!(library
            .defined_versions
            .iter()
            .any(|version| version.starts_with("GLIBC_")));
    }
}
