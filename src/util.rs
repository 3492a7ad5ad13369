// Small helpers around shared object files.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use crate::library::Library;

/// True when the file at `path` starts with the ELF magic.  Unreadable
/// paths are simply not ELF objects.
pub fn is_elf<P: AsRef<Path>>(path: P) -> bool {
    let mut magic = [0u8; 4];
    match File::open(path) {
        Ok(mut file) => file.read_exact(&mut magic).is_ok() && magic == *b"\x7fELF",
        Err(_) => false,
    }
}

/// Enumerate the symbolic links next to a resolved library that point at
/// the same file.
///
/// Given the directory:
/// ```text
/// lrwxrwxrwx. 1 root root   16 May 13  2019 libmpi.so -> libmpi.so.12.1.1
/// lrwxrwxrwx. 1 root root   16 May 13  2019 libmpi.so.12 -> libmpi.so.12.1.1
/// -rwxr-xr-x. 1 root root 2.7M May 13  2019 libmpi.so.12.1.1
/// ```
/// any of the three names leads to all of them being returned.
pub fn library_links(library: &Library) -> BTreeSet<PathBuf> {
    let libname = library
        .binary_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("")
        .to_string();

    // Nothing to glob for without a '.so' in the file name.
    let Some(prefix) = libname.split_once(".so").map(|(prefix, _)| prefix) else {
        debug!("library_links: error in format of {}", libname);
        return BTreeSet::from([library.binary_path.clone()]);
    };

    let Ok(library_file) = library.binary_path.canonicalize() else {
        return BTreeSet::from([library.binary_path.clone()]);
    };

    let mut cleared = BTreeSet::new();
    let mut glob_links = |prefix: &str| {
        let Some(parent) = library_file.parent() else {
            return;
        };
        let pattern = format!("{}/{}.so*", parent.display(), prefix);
        let Ok(paths) = glob::glob(&pattern) else {
            return;
        };
        for path in paths.flatten() {
            if path.canonicalize().ok().as_ref() == Some(&library_file) {
                cleared.insert(path);
            }
        }
    };

    glob_links(prefix);

    // glibc installs files named like libc-2.33.so with links named
    // libc.so.x; glob for the unversioned prefix as well.
    if let Ok(versioned) = Regex::new(r"^(lib[a-z_]+)-.+") {
        if let Some(captures) = versioned.captures(prefix) {
            glob_links(&captures[1]);
        }
    }

    // A symlink presenting as another library: return both the link and
    // the object it points at.
    if library.soname != libname {
        cleared.insert(library.binary_path.clone());
        cleared.insert(library_file);
    }

    cleared
}
