//! The history store: an in-memory database of files, their per-file
//! versions, and the tags/branches defined over them.
//!
//! Everything is owned by a single [`Database`] value for the lifetime of
//! the run. Cross-references (a version's parent, a version's branch, a
//! changeset's versions, a tag's parent changeset) are plain indices into
//! the database's flat vectors rather than pointers or `Rc`s, per the
//! arena-of-indices design this crate uses throughout to keep the object
//! graph acyclic-by-construction and trivially `Send`-free-of-lifetime.

pub mod changeset;
pub mod fixup;
pub mod scheduler;
pub mod tag;

use std::collections::HashMap;

use crate::intern::{Interner, Sym};

pub use changeset::{Changeset, ChangesetKind};
pub use tag::Tag;

pub type FileId = usize;
pub type VersionId = usize;
pub type ChangesetId = usize;
pub type TagId = usize;

/// Sentinel used in the wire protocol for "no blob assigned yet"; internally
/// we prefer `Option<u64>` but keep this around for code that mirrors the
/// original `SIZE_MAX` sentinel in log messages and comparisons.
pub const UNSET_MARK: u64 = 0;

#[derive(Debug)]
pub struct FileRecord {
    pub path: Sym,
    pub versions: Vec<VersionId>,
}

#[derive(Debug, Clone)]
pub struct Version {
    pub file: FileId,
    pub version: Sym,
    pub parent: Option<VersionId>,
    pub branch: Option<TagId>,
    pub author: Sym,
    pub log: Sym,
    pub time: i64,
    pub dead: bool,
    pub exec: bool,
    pub used: bool,
    pub mark: Option<u64>,
}

impl Version {
    /// `live(v)`: `Some(self)` unless this version is a deletion marker.
    pub fn live_id(id: VersionId, versions: &[Version]) -> Option<VersionId> {
        if versions[id].dead { None } else { Some(id) }
    }
}

pub struct Database {
    pub files: Vec<FileRecord>,
    pub versions: Vec<Version>,
    pub changesets: Vec<Changeset>,
    pub tags: Vec<Tag>,
    pub interner: Interner,
    file_index: HashMap<Sym, FileId>,
    tag_index: HashMap<Sym, TagId>,
    mark_counter: u64,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    pub fn new() -> Self {
        Database {
            files: Vec::new(),
            versions: Vec::new(),
            changesets: Vec::new(),
            tags: Vec::new(),
            interner: Interner::new(),
            file_index: HashMap::new(),
            tag_index: HashMap::new(),
            mark_counter: 0,
        }
    }

    pub fn intern(&self, s: &str) -> Sym {
        self.interner.intern(s)
    }

    /// Looks up a file by path, creating it if this is the first time it's
    /// seen. File paths are unique within the database (invariant).
    pub fn find_or_create_file(&mut self, path: &str) -> FileId {
        let sym = self.intern(path);
        if let Some(&id) = self.file_index.get(&sym) {
            return id;
        }
        let id = self.files.len();
        self.files.push(FileRecord {
            path: sym.clone(),
            versions: Vec::new(),
        });
        self.file_index.insert(sym, id);
        id
    }

    pub fn find_file(&self, path: &str) -> Option<FileId> {
        self.file_index.get(path).copied()
    }

    /// Looks up a tag/branch by name, creating it (un-populated) on first
    /// reference. The empty name denotes the trunk and is always id 0.
    pub fn find_or_create_tag(&mut self, name: &str, is_branch: bool) -> TagId {
        let sym = self.intern(name);
        if let Some(&id) = self.tag_index.get(&sym) {
            return id;
        }
        let id = self.tags.len();
        self.tags.push(Tag::new(sym.clone(), is_branch));
        self.tag_index.insert(sym, id);
        id
    }

    pub fn trunk(&mut self) -> TagId {
        self.find_or_create_tag("", true)
    }

    pub fn add_version(&mut self, file: FileId, v: Version) -> VersionId {
        let id = self.versions.len();
        self.files[file].versions.push(id);
        self.versions.push(v);
        id
    }

    pub fn find_version(&self, file: FileId, version: &str) -> Option<VersionId> {
        self.files[file]
            .versions
            .iter()
            .copied()
            .find(|&vid| &*self.versions[vid].version == version)
    }

    /// `live(v)`: `None` for a dead version or a missing one.
    pub fn live(&self, v: Option<VersionId>) -> Option<VersionId> {
        v.filter(|&id| !self.versions[id].dead)
    }

    /// Canonical non-alias form of a version. Version-chain collapsing
    /// (e.g. folding a no-op re-commit into its predecessor) is not
    /// implemented, so this is the identity function, but call sites go
    /// through it so that behavior can change without touching callers.
    pub fn normalise(&self, v: VersionId) -> VersionId {
        v
    }

    pub fn next_mark(&mut self) -> u64 {
        self.mark_counter += 1;
        self.mark_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_are_unique_by_path() {
        let mut db = Database::new();
        let a = db.find_or_create_file("src/main.rs");
        let b = db.find_or_create_file("src/main.rs");
        assert_eq!(a, b);
        assert_eq!(db.files.len(), 1);
    }

    #[test]
    fn version_lookup_by_dotted_id() {
        let mut db = Database::new();
        let f = db.find_or_create_file("a.txt");
        let author = db.intern("u");
        let log = db.intern("init");
        let v = db.add_version(
            f,
            Version {
                file: f,
                version: db.intern("1.1"),
                parent: None,
                branch: None,
                author,
                log,
                time: 100,
                dead: false,
                exec: false,
                used: true,
                mark: None,
            },
        );
        assert_eq!(db.find_version(f, "1.1"), Some(v));
        assert_eq!(db.find_version(f, "1.2"), None);
    }

    #[test]
    fn live_filters_dead_versions() {
        let mut db = Database::new();
        let f = db.find_or_create_file("a.txt");
        let author = db.intern("u");
        let log = db.intern("rm");
        let v = db.add_version(
            f,
            Version {
                file: f,
                version: db.intern("1.2"),
                parent: None,
                branch: None,
                author,
                log,
                time: 100,
                dead: true,
                exec: false,
                used: true,
                mark: None,
            },
        );
        assert_eq!(db.live(Some(v)), None);
    }
}
