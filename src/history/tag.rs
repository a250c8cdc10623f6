//! Tags and branches, and the branch analyser that decides where each one
//! forks off its parent history.

use crate::history::{ChangesetId, ChangesetKind, Database, FileId, VersionId};
use crate::intern::Sym;

/// A named pointer to a specific file-version snapshot. Covers both static
/// tags and branches: a branch is simply a tag whose `branch_versions`
/// array is populated and kept live during emission. The empty name
/// denotes the trunk.
#[derive(Debug)]
pub struct Tag {
    pub name: Sym,
    pub is_branch: bool,
    pub parent: Option<ChangesetId>,
    /// Ordered by file id; the snapshot this tag/branch is declared to be.
    pub tag_files: Vec<VersionId>,
    /// Per-file current tip on this branch, `None` until the branch's own
    /// changeset emits. Only `Some` for branches.
    pub branch_versions: Option<Vec<Option<VersionId>>>,
    pub last: Option<ChangesetId>,
    pub fixup: bool,
    pub is_released: bool,
    /// Index into `Database::changesets`: the synthetic changeset used to
    /// schedule this tag/branch's creation. Filled in by
    /// [`crate::history::changeset::build_tag_changesets`].
    pub changeset: ChangesetId,
    /// Computed once by [`crate::history::fixup::create_fixups`] when this
    /// tag/branch's own changeset is emitted; see that module for the
    /// flush protocol.
    pub fixups: Option<FixupQueue>,
}

#[derive(Debug, Default)]
pub struct FixupQueue {
    pub entries: Vec<super::fixup::FixupEntry>,
    pub cursor: usize,
}

impl Tag {
    pub fn new(name: Sym, is_branch: bool) -> Self {
        Tag {
            name,
            is_branch,
            parent: None,
            tag_files: Vec::new(),
            branch_versions: None,
            last: None,
            fixup: false,
            is_released: false,
            // Patched once the real changeset is allocated; 0 is safe
            // because `build_tag_changesets` always overwrites it before
            // any scheduling happens.
            changeset: 0,
            fixups: None,
        }
    }

    pub fn ref_name(&self, default_branch: &str) -> String {
        if self.name.is_empty() {
            default_branch.to_string()
        } else {
            self.name.to_string()
        }
    }
}

/// §4.2: for every non-trunk tag/branch, determine its parent changeset —
/// the point on its parent branch's history whose post-state matches the
/// tag's declared `tag_files` most closely, preferring the latest such
/// point on a tie. See SPEC_FULL.md §4 for why the branch's own
/// branch-creation changeset is included as the earliest candidate.
pub fn analyse_branches(db: &mut Database) {
    for tag_id in 0..db.tags.len() {
        if db.tags[tag_id].name.is_empty() {
            // Trunk: the root of everything, no parent.
            db.tags[tag_id].parent = None;
            continue;
        }

        let parent_branch = infer_parent_branch(db, tag_id);
        db.tags[tag_id].parent = parent_branch.map(|b| best_matching_changeset(db, b, tag_id));
    }

    let file_count = db.files.len();
    for tag in &mut db.tags {
        if tag.is_branch {
            tag.branch_versions = Some(vec![None; file_count]);
        }
    }
}

/// The branch a tag/branch most plausibly forks from: a majority vote over
/// the `branch` field of the versions the tag names.
fn infer_parent_branch(db: &Database, tag_id: usize) -> Option<usize> {
    use std::collections::HashMap;
    let mut votes: HashMap<usize, usize> = HashMap::new();
    for &v in &db.tags[tag_id].tag_files {
        if let Some(b) = db.versions[v].branch {
            *votes.entry(b).or_default() += 1;
        }
    }
    votes.into_iter().max_by_key(|&(_, n)| n).map(|(b, _)| b)
}

fn best_matching_changeset(db: &Database, parent_branch: usize, tag_id: usize) -> ChangesetId {
    let target = &db.tags[tag_id].tag_files;
    let file_count = db.files.len();

    let mut candidates: Vec<ChangesetId> = vec![db.tags[parent_branch].changeset];
    for (cs_id, cs) in db.changesets.iter().enumerate() {
        if let ChangesetKind::Commit { versions } = &cs.kind
            && db.versions[versions[0]].branch == Some(parent_branch)
        {
            candidates.push(cs_id);
        }
    }
    candidates.sort_by_key(|&cs_id| db.changesets[cs_id].time);

    let mut state: Vec<Option<VersionId>> = vec![None; file_count];
    // Seed with the parent branch's own declared snapshot, representing the
    // state at the moment it was created.
    for &v in &db.tags[parent_branch].tag_files {
        state[db.versions[v].file] = Some(v);
    }

    let target_by_file: std::collections::HashMap<FileId, VersionId> = target
        .iter()
        .map(|&v| (db.versions[v].file, v))
        .collect();

    let mismatch = |state: &[Option<VersionId>]| -> usize {
        let mut n = 0;
        for (file, &target_v) in &target_by_file {
            let live_target = db.live(Some(target_v));
            let live_state = db.live(state[*file]);
            if live_target != live_state {
                n += 1;
            }
        }
        n
    };

    let mut best = (candidates[0], mismatch(&state));

    for &cs_id in &candidates[1..] {
        if let ChangesetKind::Commit { versions } = &db.changesets[cs_id].kind {
            for &v in versions {
                if db.versions[v].used {
                    state[db.versions[v].file] = Some(v);
                }
            }
        }
        let m = mismatch(&state);
        if m <= best.1 {
            best = (cs_id, m);
        }
    }

    best.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::history::changeset::{build_commit_changesets, build_tag_changesets};
    use crate::history::Version;

    fn v(
        db: &mut Database,
        file: usize,
        version: &str,
        parent: Option<usize>,
        branch: usize,
        time: i64,
    ) -> usize {
        let version = Version {
            file,
            version: db.intern(version),
            parent,
            branch: Some(branch),
            author: db.intern("u"),
            log: db.intern("m"),
            time,
            dead: false,
            exec: false,
            used: true,
            mark: None,
        };
        db.add_version(file, version)
    }

    #[test]
    fn branch_with_no_divergence_matches_trunk_tip() {
        let mut db = Database::new();
        let trunk = db.trunk();
        let f = db.find_or_create_file("a.txt");
        let v1 = v(&mut db, f, "1.1", None, trunk, 1000);

        let cfg = EngineConfig::default();
        build_commit_changesets(&mut db, &cfg);

        let b = db.find_or_create_tag("b", true);
        db.tags[b].tag_files = vec![v1];

        build_tag_changesets(&mut db);
        analyse_branches(&mut db);

        let trunk_commit_cs = db
            .changesets
            .iter()
            .position(|cs| cs.versions().contains(&v1))
            .unwrap();
        assert_eq!(db.tags[b].parent, Some(trunk_commit_cs));
    }
}
