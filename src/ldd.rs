// ldd-style entry point: expand an ELF object into the transitive set of
// shared objects the dynamic loader would map for it.

use std::path::Path;

use crate::error::Error;
use crate::library::Library;
use crate::libraryset::LibrarySet;
use crate::util::is_elf;

/// Compute the dependency closure of the object at `binary`.
///
/// Fails with [`Error::NotElf`] when the file is missing or does not carry
/// the ELF magic.  Unresolvable dependencies do not fail the computation;
/// they stay listed in the returned set's missing libraries.
pub fn ldd<P: AsRef<Path>>(binary: P) -> Result<LibrarySet, Error> {
    let path = binary.as_ref();

    if !is_elf(path) {
        return Err(Error::NotElf(path.to_path_buf()));
    }

    let set: LibrarySet = [Library::from_path(path)].into_iter().collect();
    Ok(set.resolve())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn rejects_non_elf_input() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("tool.sh");
        File::create(&script)
            .unwrap()
            .write_all(b"#!/bin/sh\nexit 0\n")
            .unwrap();

        assert!(matches!(ldd(&script), Err(Error::NotElf(_))));
        assert!(matches!(
            ldd(dir.path().join("missing")),
            Err(Error::NotElf(_))
        ));
    }

    #[test]
    fn closure_of_system_library() {
        // Runs against the host toolchain when one is available.
        let Some(path) = crate::linker::resolve("libm.so.6", &[], &[], None) else {
            return;
        };

        let libraries = ldd(&path).unwrap();
        assert!(libraries.sonames().contains("libc.so.6"));
        assert!(!libraries
            .ldd_format()
            .iter()
            .any(|line| line.ends_with("not found")));
    }
}
