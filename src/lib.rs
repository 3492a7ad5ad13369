//! Userspace implementation of the dynamic linker library resolution
//! pipeline.
//!
//! Given a shared object name or an ELF executable, determine which
//! on-disk files the runtime loader would map, following the rules
//! documented in ld.so(8):
//!
//! - [`dl_cache`] decodes the persistent linker cache at
//!   `/etc/ld.so.cache`, in both historical glibc layouts, their
//!   backward-compatible concatenation, and the modern extension sections.
//! - [`library`] parses an ELF object's dynamic linking metadata into a
//!   [`Library`] record.
//! - [`linker`] resolves a soname to a filesystem path by walking the
//!   rpath, `LD_LIBRARY_PATH`, runpath, cache, and default search lists.
//! - [`libraryset`] composes the above into the transitive dependency
//!   closure of a binary, with the aggregate queries an `ldd`-style report
//!   needs.
//!
//! ```no_run
//! let libraries = sotools::ldd("/usr/bin/true")?;
//! println!("{}", libraries.ldd_format().join("\n"));
//! # Ok::<(), sotools::Error>(())
//! ```

pub mod dl_cache;
mod error;
pub mod ldd;
pub mod library;
pub mod libraryset;
pub mod linker;
pub mod structure;
pub mod util;

pub use error::Error;

// Serializes tests that mutate the process environment or the memoization
// tables against tests that observe them.
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard};

    static PROCESS_STATE: Mutex<()> = Mutex::new(());

    pub fn process_state_lock() -> MutexGuard<'static, ()> {
        PROCESS_STATE
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
pub use ldd::ldd;
pub use library::Library;
pub use libraryset::LibrarySet;
pub use linker::{resolve, resolve_realpath};
pub use util::{is_elf, library_links};
