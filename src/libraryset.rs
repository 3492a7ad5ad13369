// Collection of Library records keyed by soname, with the fixed-point
// dependency expansion and the aggregate queries built on top of it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use regex::Regex;
use tracing::debug;

use crate::dl_cache::flags;
use crate::error::Error;
use crate::library::Library;
use crate::linker;

/// Set of libraries, at most one per soname.  Inserting a second record
/// for a soname evicts the first, so the latest parse wins.  Iteration is
/// in soname order, which keeps reports stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LibrarySet {
    members: BTreeMap<String, Library>,
}

impl LibrarySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, library: Library) {
        self.members.insert(library.soname.clone(), library);
    }

    pub fn get(&self, soname: &str) -> Option<&Library> {
        self.members.get(soname)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Library> {
        self.members.values()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Sonames of every member.
    pub fn sonames(&self) -> BTreeSet<String> {
        self.members.keys().cloned().collect()
    }

    /// The members' DT_RPATH lists merged together, in member order.
    pub fn rpath(&self) -> Vec<String> {
        self.iter().flat_map(|library| library.rpath.clone()).collect()
    }

    /// The members' DT_RUNPATH lists merged together, in member order.
    pub fn runpath(&self) -> Vec<String> {
        self.iter()
            .flat_map(|library| library.runpath.clone())
            .collect()
    }

    /// Every version name defined by a member.
    pub fn defined_versions(&self) -> BTreeSet<String> {
        self.iter()
            .flat_map(|library| library.defined_versions.iter().cloned())
            .collect()
    }

    /// Every version name required by a member, regardless of provider.
    pub fn required_versions(&self) -> BTreeSet<String> {
        self.iter()
            .flat_map(|library| library.required_versions.values())
            .flat_map(|names| names.iter().cloned())
            .collect()
    }

    /// Sonames referenced through DT_NEEDED but not present as members.
    pub fn missing_libraries(&self) -> BTreeSet<String> {
        let needed: BTreeSet<String> = self
            .iter()
            .flat_map(|library| library.needed.iter().cloned())
            .collect();
        needed.difference(&self.sonames()).cloned().collect()
    }

    /// Members another member depends on.
    pub fn required_libraries(&self) -> LibrarySet {
        let needed: BTreeSet<&String> = self.iter().flat_map(|library| &library.needed).collect();
        self.subset(|library| needed.contains(&library.soname))
    }

    /// Members nothing else in the set depends on.
    pub fn top_level(&self) -> LibrarySet {
        let required = self.required_libraries().sonames();
        self.subset(|library| !required.contains(&library.soname))
    }

    /// Members that do not define every version some other member requires
    /// of them.
    pub fn outdated_libraries(&self) -> LibrarySet {
        let mut outdated = LibrarySet::new();

        for library in self.iter() {
            for (provider, required) in &library.required_versions {
                let Some(dependency) = self.get(provider) else {
                    continue;
                };
                if required.is_superset(&dependency.defined_versions)
                    && *required != dependency.defined_versions
                {
                    outdated.insert(dependency.clone());
                }
            }
        }
        outdated
    }

    /// Members tied to the installed libc, recognizable by the
    /// GLIBC_PRIVATE version token.  Using these against any other libc
    /// triggers a symbol error.
    pub fn glib(&self) -> LibrarySet {
        fn references_private(library: &Library) -> bool {
            library.defined_versions.contains("GLIBC_PRIVATE")
                || library
                    .required_versions
                    .values()
                    .any(|names| names.contains("GLIBC_PRIVATE"))
        }
        self.subset(references_private)
    }

    /// The dynamic loaders in the set: members of [`glib`](Self::glib)
    /// depending on nothing themselves.
    pub fn linkers(&self) -> LibrarySet {
        self.glib().subset(|library| library.needed.is_empty())
    }

    /// True when every dependency is present and every required version is
    /// defined somewhere in the set.
    pub fn complete(&self) -> bool {
        self.missing_libraries().is_empty()
            && self.required_versions().is_subset(&self.defined_versions())
    }

    /// Member whose soname starts with the query, the query taken
    /// literally.  Meant for human lookups.
    pub fn find(&self, soname: &str) -> Option<&Library> {
        let query = Regex::new(&format!("^{}", regex::escape(soname))).ok()?;
        self.iter().find(|library| query.is_match(&library.soname))
    }

    fn subset<F: Fn(&Library) -> bool>(&self, keep: F) -> LibrarySet {
        LibrarySet {
            members: self
                .members
                .iter()
                .filter(|(_, library)| keep(library))
                .map(|(soname, library)| (soname.clone(), library.clone()))
                .collect(),
        }
    }

    // The architecture filter for cache lookups during resolution.  All
    // members must agree on a single expected flags value; mixed sets fall
    // back to unfiltered lookups.
    fn resolution_flags(&self) -> Option<i32> {
        let candidates: BTreeSet<i32> = self
            .iter()
            .filter_map(|library| flags::expected_flags(&library.binary_path))
            .collect();

        if candidates.len() == 1 {
            candidates.into_iter().next()
        } else {
            debug!(
                "resolving dependencies of a set with mixed architectures ({:?})",
                candidates
            );
            None
        }
    }

    /// Fixed-point expansion: resolve every missing dependency with the
    /// set's merged rpath/runpath, parse what resolves, and repeat until an
    /// iteration makes no progress.  The result is a superset of `self`;
    /// unresolvable sonames remain visible via
    /// [`missing_libraries`](Self::missing_libraries).
    pub fn resolve(&self) -> LibrarySet {
        let mut superset = self.clone();
        let arch_flags = superset.resolution_flags();

        let mut missing = superset.missing_libraries();
        loop {
            for soname in &missing {
                let path = linker::resolve(
                    soname,
                    &superset.rpath(),
                    &superset.runpath(),
                    arch_flags,
                );
                if let Some(path) = path {
                    superset.insert(Library::from_path(&path));
                }
            }

            let remaining = superset.missing_libraries();
            if remaining == missing {
                break;
            }
            missing = remaining;
        }
        superset
    }

    /// Build a set from filesystem paths and bare sonames, then resolve
    /// it.  Entries containing a path separator are read directly; bare
    /// sonames are resolved with the search lists accumulated so far and
    /// fail with [`Error::Linking`] when nothing provides them.
    pub fn create_from<I>(entries: I) -> Result<LibrarySet, Error>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut set = LibrarySet::new();

        for entry in entries {
            let entry = entry.as_ref();
            let path = if entry.contains('/') {
                PathBuf::from(entry)
            } else {
                linker::resolve(entry, &set.rpath(), &set.runpath(), None)
                    .ok_or_else(|| Error::Linking(entry.to_string()))?
            };
            set.insert(Library::from_path(&path));
        }

        Ok(set.resolve())
    }

    /// One line per known and missing soname, in the style of ldd:
    /// `"\tsoname => path"` or `"\tsoname => not found"`.
    pub fn ldd_format(&self) -> Vec<String> {
        let mut sonames = self.sonames();
        sonames.extend(self.missing_libraries());
        // The main executable carries no soname; it is the subject of the
        // report, not a line in it.
        sonames.remove("");

        sonames
            .iter()
            .map(|soname| match self.get(soname) {
                Some(library) => {
                    format!("\t{} => {}", soname, library.binary_path.display())
                }
                None => format!("\t{} => not found", soname),
            })
            .collect()
    }
}

impl FromIterator<Library> for LibrarySet {
    fn from_iter<I: IntoIterator<Item = Library>>(iter: I) -> Self {
        let mut set = LibrarySet::new();
        for library in iter {
            set.insert(library);
        }
        set
    }
}

impl Extend<Library> for LibrarySet {
    fn extend<I: IntoIterator<Item = Library>>(&mut self, iter: I) {
        for library in iter {
            self.insert(library);
        }
    }
}

impl<'set> IntoIterator for &'set LibrarySet {
    type Item = &'set Library;
    type IntoIter = std::collections::btree_map::Values<'set, String, Library>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.values()
    }
}

impl IntoIterator for LibrarySet {
    type Item = Library;
    type IntoIter = std::collections::btree_map::IntoValues<String, Library>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn library(soname: &str, needed: &[&str]) -> Library {
        Library {
            soname: soname.to_string(),
            binary_path: PathBuf::from(format!("/lib64/{}", soname)),
            needed: needed.iter().map(|name| name.to_string()).collect(),
            ..Library::default()
        }
    }

    fn with_versions(mut library: Library, defined: &[&str], required: &[(&str, &[&str])]) -> Library {
        library.defined_versions = defined.iter().map(|name| name.to_string()).collect();
        library.required_versions = required
            .iter()
            .map(|(provider, names)| {
                (
                    provider.to_string(),
                    names.iter().map(|name| name.to_string()).collect(),
                )
            })
            .collect::<BTreeMap<_, _>>();
        library
    }

    fn closed_pair() -> LibrarySet {
        let libc = with_versions(
            library("libc.so.6", &[]),
            &["GLIBC_2.2.5", "GLIBC_2.35", "GLIBC_PRIVATE"],
            &[],
        );
        let libm = with_versions(
            library("libm.so.6", &["libc.so.6"]),
            &["GLIBC_2.2.5"],
            &[("libc.so.6", &["GLIBC_2.2.5"])],
        );
        [libc, libm].into_iter().collect()
    }

    #[test]
    fn insert_later_wins() {
        let mut set = LibrarySet::new();
        set.insert(library("libm.so.6", &[]));

        let mut replacement = library("libm.so.6", &["libc.so.6"]);
        replacement.binary_path = PathBuf::from("/opt/libm.so.6");
        set.insert(replacement);

        assert_eq!(set.len(), 1);
        assert_eq!(
            set.get("libm.so.6").unwrap().binary_path,
            PathBuf::from("/opt/libm.so.6")
        );
    }

    #[test]
    fn missing_and_top_level() {
        let set: LibrarySet = [library("libm.so.6", &["libc.so.6"])].into_iter().collect();

        assert_eq!(
            set.missing_libraries(),
            BTreeSet::from(["libc.so.6".to_string()])
        );
        assert_eq!(
            set.top_level().sonames(),
            BTreeSet::from(["libm.so.6".to_string()])
        );

        let set = closed_pair();
        assert!(set.missing_libraries().is_empty());
        assert_eq!(
            set.required_libraries().sonames(),
            BTreeSet::from(["libc.so.6".to_string()])
        );
        assert_eq!(
            set.top_level().sonames(),
            BTreeSet::from(["libm.so.6".to_string()])
        );
    }

    #[test]
    fn version_aggregates_and_completeness() {
        let set = closed_pair();
        assert!(set.defined_versions().contains("GLIBC_2.35"));
        assert_eq!(
            set.required_versions(),
            BTreeSet::from(["GLIBC_2.2.5".to_string()])
        );
        assert!(set.complete());

        let incomplete: LibrarySet = [with_versions(
            library("libm.so.6", &["libc.so.6"]),
            &[],
            &[("libc.so.6", &["GLIBC_2.2.5"])],
        )]
        .into_iter()
        .collect();
        assert!(!incomplete.complete());
    }

    #[test]
    fn outdated_detection() {
        let stale_libc = with_versions(library("libc.so.6", &[]), &["GLIBC_2.2.5"], &[]);
        let libm = with_versions(
            library("libm.so.6", &["libc.so.6"]),
            &["GLIBC_2.2.5"],
            &[("libc.so.6", &["GLIBC_2.2.5", "GLIBC_2.35"])],
        );
        let set: LibrarySet = [stale_libc, libm].into_iter().collect();

        assert_eq!(
            set.outdated_libraries().sonames(),
            BTreeSet::from(["libc.so.6".to_string()])
        );

        // A provider defining everything required of it is not outdated.
        assert!(closed_pair().outdated_libraries().is_empty());
    }

    #[test]
    fn glib_and_linkers() {
        let loader = with_versions(
            library("ld-linux-x86-64.so.2", &[]),
            &["GLIBC_2.2.5", "GLIBC_PRIVATE"],
            &[],
        );
        let libc = with_versions(
            library("libc.so.6", &["ld-linux-x86-64.so.2"]),
            &["GLIBC_2.2.5"],
            &[("ld-linux-x86-64.so.2", &["GLIBC_PRIVATE"])],
        );
        let bystander = library("libz.so.1", &["libc.so.6"]);
        let set: LibrarySet = [loader, libc, bystander].into_iter().collect();

        assert_eq!(
            set.glib().sonames(),
            BTreeSet::from([
                "ld-linux-x86-64.so.2".to_string(),
                "libc.so.6".to_string()
            ])
        );
        assert_eq!(
            set.linkers().sonames(),
            BTreeSet::from(["ld-linux-x86-64.so.2".to_string()])
        );
    }

    #[test]
    fn find_escapes_the_query() {
        let set = closed_pair();
        assert!(set.find("libc.so.6").is_some());
        assert!(set.find("libc").is_some());
        // Regex metacharacters in the query are taken literally.
        assert!(set.find("libc++").is_none());
        assert!(set.find("lib[cm]").is_none());
    }

    #[test]
    fn resolve_is_idempotent_on_closed_sets() {
        let set = closed_pair();
        let resolved = set.resolve();
        assert_eq!(resolved, set);
        assert_eq!(resolved.resolve(), resolved);
    }

    #[test]
    fn resolve_terminates_with_unresolvable_dependencies() {
        let set: LibrarySet = [library("libapp.so.1", &["libnosuch.so.9"])]
            .into_iter()
            .collect();
        let resolved = set.resolve();

        assert!(resolved
            .missing_libraries()
            .contains("libnosuch.so.9"));
        assert!(!resolved.complete());
    }

    #[test]
    fn create_from_rejects_unresolvable_sonames() {
        match LibrarySet::create_from(["libnosuch.so.9"]) {
            Err(Error::Linking(soname)) => assert_eq!(soname, "libnosuch.so.9"),
            other => panic!("expected a linking error, got {:?}", other),
        }
    }

    #[test]
    fn ldd_format_lines() {
        let mut executable = library("", &["libm.so.6"]);
        executable.binary_path = PathBuf::from("/usr/bin/app");
        let mut set = closed_pair();
        set.insert(executable);
        set.insert(library("libplugin.so.1", &["libgone.so.2"]));

        let lines = set.ldd_format();
        assert!(lines.contains(&"\tlibc.so.6 => /lib64/libc.so.6".to_string()));
        assert!(lines.contains(&"\tlibgone.so.2 => not found".to_string()));
        // No line for the executable itself.
        assert!(!lines.iter().any(|line| line.contains("/usr/bin/app")));
    }

    #[test]
    fn resolve_system_library() {
        // End-to-end against the host: only meaningful where libm is
        // installed and resolvable.
        let Some(path) = linker::resolve("libm.so.6", &[], &[], None) else {
            return;
        };

        let set: LibrarySet = [Library::from_path(&path)].into_iter().collect();
        let resolved = set.resolve();

        assert!(resolved.len() > 1);
        assert!(resolved.sonames().contains("libc.so.6"));
        assert!(resolved
            .ldd_format()
            .iter()
            .any(|line| line.starts_with("\tlibc.so.6 => /")));
    }
}
