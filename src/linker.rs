// Soname resolution following the search order documented in ld.so(8):
// DT_RPATH, LD_LIBRARY_PATH, DT_RUNPATH, /etc/ld.so.cache, then the
// default system directories.
//
// DT_RPATH stays active even when DT_RUNPATH is present.  The real loader
// drops it in that case; retaining both keeps resolution output aligned
// with the historical behavior of this tool.

use std::env;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::dl_cache::{self, DEFAULT_CACHE_PATH};

const DEFAULT_SEARCH_PATH: &[&str] = &["/lib", "/usr/lib", "/lib64", "/usr/lib64"];

struct LinkerPaths {
    ld_library_path: Vec<PathBuf>,
    system_default: Vec<PathBuf>,
}

static LINKER_PATHS: Mutex<Option<Arc<LinkerPaths>>> = Mutex::new(None);

// Environment-derived search paths, computed once per process.
fn linker_paths() -> Arc<LinkerPaths> {
    let mut memo = LINKER_PATHS.lock().unwrap();
    memo.get_or_insert_with(|| {
        let ld_library_path = env::var("LD_LIBRARY_PATH")
            .unwrap_or_default()
            .split(':')
            .filter(|entry| !entry.is_empty())
            .map(PathBuf::from)
            .collect();

        Arc::new(LinkerPaths {
            ld_library_path,
            system_default: DEFAULT_SEARCH_PATH.iter().map(PathBuf::from).collect(),
        })
    })
    .clone()
}

/// Drop the memoized environment snapshot and parsed caches, so the next
/// resolution re-reads `LD_LIBRARY_PATH` and the cache files.
pub fn invalidate() {
    *LINKER_PATHS.lock().unwrap() = None;
    dl_cache::invalidate();
}

// Probe a directory list for `soname`.  Only existing directories are
// considered, and existence of the candidate file is the only check.
fn search_paths(soname: &str, paths: &[PathBuf], reason: &str) -> Option<PathBuf> {
    if !paths.is_empty() {
        let list = paths
            .iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(":");
        debug!("search path={}\t\t({})", list, reason);
    }

    for dir in paths.iter().filter(|path| path.is_dir()) {
        let candidate = dir.join(soname);
        debug!("trying file={}", candidate.display());
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

fn to_paths(entries: &[String]) -> Vec<PathBuf> {
    entries.iter().map(PathBuf::from).collect()
}

fn resolve_soname(
    soname: &str,
    rpath: &[String],
    runpath: &[String],
    arch_flags: Option<i32>,
    absolute: bool,
) -> Option<PathBuf> {
    let paths = linker_paths();

    debug!("find library={}; searching", soname);

    let found = search_paths(soname, &to_paths(rpath), "RPATH")
        .or_else(|| search_paths(soname, &paths.ld_library_path, "LD_LIBRARY_PATH"))
        .or_else(|| search_paths(soname, &to_paths(runpath), "RUNPATH"))
        .or_else(|| {
            // A cache hit is trusted as recorded, without probing the
            // filesystem.
            debug!("search cache={}", DEFAULT_CACHE_PATH);
            dl_cache::cache_libraries(DEFAULT_CACHE_PATH, arch_flags)
                .get(soname)
                .map(PathBuf::from)
        })
        .or_else(|| search_paths(soname, &paths.system_default, "SYSTEM"))?;

    if absolute {
        found.canonicalize().ok()
    } else {
        Some(found)
    }
}

/// Resolve a soname to the path the dynamic loader would map, or `None`
/// when no search list holds it.  The path is returned as discovered,
/// preserving any symlink it was found through.
///
/// `rpath` and `runpath` are the search lists of the importing object;
/// `arch_flags` restricts cache lookups to a specific architecture
/// (defaulting to the flags expected for the running process).
pub fn resolve(
    soname: &str,
    rpath: &[String],
    runpath: &[String],
    arch_flags: Option<i32>,
) -> Option<PathBuf> {
    resolve_soname(soname, rpath, runpath, arch_flags, false)
}

/// Like [`resolve`], with the hit canonicalized to its realpath.
pub fn resolve_realpath(
    soname: &str,
    rpath: &[String],
    runpath: &[String],
    arch_flags: Option<i32>,
) -> Option<PathBuf> {
    resolve_soname(soname, rpath, runpath, arch_flags, true)
}
