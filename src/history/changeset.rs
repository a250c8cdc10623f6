//! Changeset construction: clustering per-file versions into atomic commit
//! changesets, synthesising one changeset per tag/branch, and wiring the
//! dependency edges the scheduler needs.

use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::history::{ChangesetId, Database, FileId, TagId, VersionId};
use crate::intern::Sym;

#[derive(Debug, Clone)]
pub enum ChangesetKind {
    Commit { versions: Vec<VersionId> },
    Tag { tag: TagId },
}

#[derive(Debug, Clone)]
pub struct Changeset {
    pub kind: ChangesetKind,
    pub time: i64,
    pub mark: Option<u64>,
    pub children: Vec<ChangesetId>,
    pub unready_count: usize,
}

impl Changeset {
    pub fn is_commit(&self) -> bool {
        matches!(self.kind, ChangesetKind::Commit { .. })
    }

    pub fn versions(&self) -> &[VersionId] {
        match &self.kind {
            ChangesetKind::Commit { versions } => versions,
            ChangesetKind::Tag { .. } => &[],
        }
    }
}

/// §4.1: partition every version in the database into maximal groups that
/// share (branch, author, log) and whose consecutive (time-sorted) members
/// are no more than `cfg.coalesce_window` apart. Each group becomes one
/// commit changeset timestamped at the group's latest version.
pub fn build_commit_changesets(db: &mut Database, cfg: &EngineConfig) {
    let mut all_versions: Vec<VersionId> = (0..db.versions.len()).collect();

    // Group key: branch identity (by tag id, None = trunk-less versions
    // can't happen since every version has a branch, but keep the Option
    // for robustness), author, and log text, compared by interned identity.
    type Key = (Option<TagId>, Sym, Sym);
    let mut groups: HashMap<Key, Vec<VersionId>> = HashMap::new();
    for &vid in &all_versions {
        let v = &db.versions[vid];
        let key = (v.branch, v.author.clone(), v.log.clone());
        groups.entry(key).or_default().push(vid);
    }
    all_versions.clear();

    let window = cfg.coalesce_window_secs();
    let mut runs: Vec<Vec<VersionId>> = Vec::new();
    for (_, mut members) in groups {
        members.sort_by_key(|&vid| db.versions[vid].time);
        let mut run: Vec<VersionId> = Vec::new();
        let mut last_time: Option<i64> = None;
        for vid in members {
            let t = db.versions[vid].time;
            if let Some(lt) = last_time {
                if t - lt > window {
                    runs.push(std::mem::take(&mut run));
                }
            }
            last_time = Some(t);
            run.push(vid);
        }
        if !run.is_empty() {
            runs.push(run);
        }
    }

    // Stable order: earliest-time-in-run first, then by first version id,
    // so that changeset ids (used as the scheduler's final tie-break) are a
    // reproducible function of the input.
    runs.sort_by_key(|run| {
        let max_time = run.iter().map(|&v| db.versions[v].time).max().unwrap();
        (max_time, run[0])
    });

    for run in runs {
        let time = run.iter().map(|&v| db.versions[v].time).max().unwrap();
        db.changesets.push(Changeset {
            kind: ChangesetKind::Commit { versions: run },
            time,
            mark: None,
            children: Vec::new(),
            unready_count: 0,
        });
    }
}

/// §4.1: synthesise one tag changeset per tag/branch in the database,
/// timestamped at the latest of its defining versions (or, for a branch
/// with no files yet, the branch's own recorded creation time — here
/// approximated by the minimum time of anything referencing it, falling
/// back to zero for an empty trunk).
pub fn build_tag_changesets(db: &mut Database) {
    for tag_id in 0..db.tags.len() {
        let time = db.tags[tag_id]
            .tag_files
            .iter()
            .map(|&v| db.versions[v].time)
            .max()
            .unwrap_or(0);
        let cs_id = db.changesets.len();
        db.changesets.push(Changeset {
            kind: ChangesetKind::Tag { tag: tag_id },
            time,
            mark: None,
            children: Vec::new(),
            unready_count: 0,
        });
        db.tags[tag_id].changeset = cs_id;
    }
}

/// Builds the `unready_count`/`children` dependency graph described in
/// SPEC_FULL.md §4: a commit changeset waits on the owning changeset of
/// each grouped version's parent version, plus (only for the
/// chronologically first commit changeset on a branch) that branch's own
/// branch-creation changeset; a tag/branch changeset waits solely on its
/// `parent` changeset.
pub fn wire_dependencies(db: &mut Database) {
    let mut owner: HashMap<VersionId, ChangesetId> = HashMap::new();
    for (cs_id, cs) in db.changesets.iter().enumerate() {
        if let ChangesetKind::Commit { versions } = &cs.kind {
            for &v in versions {
                owner.insert(v, cs_id);
            }
        }
    }

    // Earliest commit changeset per branch, to anchor it on the branch's
    // creation changeset.
    let mut earliest_on_branch: HashMap<TagId, (i64, ChangesetId)> = HashMap::new();
    for (cs_id, cs) in db.changesets.iter().enumerate() {
        if let ChangesetKind::Commit { versions } = &cs.kind {
            let branch = db.versions[versions[0]].branch;
            if let Some(branch) = branch {
                earliest_on_branch
                    .entry(branch)
                    .and_modify(|(t, id)| {
                        if cs.time < *t {
                            *t = cs.time;
                            *id = cs_id;
                        }
                    })
                    .or_insert((cs.time, cs_id));
            }
        }
    }

    let mut edges: Vec<(ChangesetId, ChangesetId)> = Vec::new(); // (pred, succ)

    for (cs_id, cs) in db.changesets.iter().enumerate() {
        match &cs.kind {
            ChangesetKind::Commit { versions } => {
                for &v in versions {
                    if let Some(parent) = db.versions[v].parent
                        && let Some(&pred) = owner.get(&parent)
                        && pred != cs_id
                    {
                        edges.push((pred, cs_id));
                    }
                }
            }
            ChangesetKind::Tag { tag } => {
                if let Some(parent) = db.tags[*tag].parent {
                    edges.push((parent, cs_id));
                }
            }
        }
    }
    for (branch, (_, cs_id)) in &earliest_on_branch {
        let branch_cs = db.tags[*branch].changeset;
        if branch_cs != *cs_id {
            edges.push((branch_cs, *cs_id));
        }
    }

    edges.sort_unstable();
    edges.dedup();

    for (pred, succ) in edges {
        db.changesets[pred].children.push(succ);
        db.changesets[succ].unready_count += 1;
    }
}
