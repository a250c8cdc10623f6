//! The emitter: turns scheduled changesets into fast-import stream records.
//!
//! Grounded in `print_commit`/`print_tag`/`print_fixups`: a commit first
//! flushes any fix-ups queued against its branch that are due before its
//! own timestamp, then (unless every one of its versions turns out to
//! already match the branch's current tip, in which case it's a no-op)
//! fetches whatever blobs it needs and writes one `commit` record. A
//! tag/branch writes a `reset`, computes its own fix-up queue against its
//! parent branch's tip, and — if it isn't a branch — flushes that queue
//! immediately, since a plain tag has no later commits of its own to
//! interleave fix-ups with.

use std::io::Write;

use chrono::{TimeZone, Utc};

use crate::config::EngineConfig;
use crate::errors::{CloneError, Result};
use crate::fetch::FetchDriver;
use crate::history::{changeset::ChangesetKind, fixup, ChangesetId, Database};

pub struct Emitter<'a> {
    cfg: &'a EngineConfig,
    pub emitted_commits: u64,
}

impl<'a> Emitter<'a> {
    pub fn new(cfg: &'a EngineConfig) -> Self {
        Emitter { cfg, emitted_commits: 0 }
    }

    pub fn emit(&mut self, db: &mut Database, fetch: &mut FetchDriver, out: &mut dyn Write, cs: ChangesetId) -> Result<()> {
        match db.changesets[cs].kind.clone() {
            ChangesetKind::Commit { .. } => self.emit_commit(db, fetch, out, cs),
            ChangesetKind::Tag { tag } => self.emit_tag(db, fetch, out, cs, tag),
        }
    }

    fn emit_commit(&mut self, db: &mut Database, fetch: &mut FetchDriver, out: &mut dyn Write, cs: ChangesetId) -> Result<()> {
        let versions = db.changesets[cs].versions().to_vec();
        let branch = db.versions[versions[0]]
            .branch
            .ok_or_else(|| CloneError::invariant("version without a branch"))?;
        let time = db.changesets[cs].time;

        self.flush_branch_fixups(db, fetch, out, branch, Some(time))?;

        let mut changed = Vec::new();
        let mut to_fetch = Vec::new();
        for &v in &versions {
            if !db.versions[v].used {
                continue;
            }
            let live = db.live(Some(v));
            let branch_versions = db.tags[branch].branch_versions.as_ref().unwrap();
            let current = branch_versions[db.versions[v].file];
            if db.live(current) == live {
                continue;
            }
            changed.push(v);
            if let Some(lv) = live
                && db.versions[lv].mark.is_none()
            {
                to_fetch.push(lv);
            }
        }

        if changed.is_empty() {
            // A no-op commit: collapse it onto whatever the branch tip
            // already points at, so downstream refs don't regress.
            let parent_mark = db.tags[branch].last.and_then(|cs| db.changesets[cs].mark);
            db.changesets[cs].mark = parent_mark;
            db.tags[branch].last = Some(cs);
            return Ok(());
        }

        tracing::info!(time = %format_date(time), "commit");

        fetch.grab_versions(db, out, &to_fetch)?;

        db.tags[branch].last = Some(cs);
        let mark = db.next_mark();
        db.changesets[cs].mark = Some(mark);

        let branch_name = db.tags[branch].ref_name(&self.cfg.default_branch);
        let author = db.versions[versions[0]].author.clone();
        let log = db.versions[versions[0]].log.clone();

        writeln!(out, "commit refs/heads/{branch_name}")?;
        writeln!(out, "mark :{mark}")?;
        writeln!(out, "committer {author} <{author}> {time} +0000")?;
        write!(out, "data {}\n{log}\n", log.len())?;

        for &v in &changed {
            let live = db.live(Some(v));
            let branch_versions = db.tags[branch].branch_versions.as_mut().unwrap();
            branch_versions[db.versions[v].file] = live;
            let path = &db.files[db.versions[v].file].path;
            match live {
                None => {
                    writeln!(out, "D {path}")?;
                }
                Some(lv) => {
                    let mode = if db.versions[lv].exec { "755" } else { "644" };
                    let mark = db.versions[lv]
                        .mark
                        .ok_or_else(|| CloneError::invariant("fetched version missing a mark"))?;
                    writeln!(out, "M {mode} :{mark} {path}")?;
                }
            }
        }

        self.emitted_commits += 1;
        Ok(())
    }

    fn emit_tag(
        &mut self,
        db: &mut Database,
        fetch: &mut FetchDriver,
        out: &mut dyn Write,
        cs: ChangesetId,
        tag: usize,
    ) -> Result<()> {
        let is_branch = db.tags[tag].is_branch;
        let time = db.changesets[cs].time;
        tracing::info!(time = %format_date(time), kind = if is_branch { "branch" } else { "tag" }, name = %db.tags[tag].name, "tag");

        let parent_branch = match db.tags[tag].parent {
            None => None,
            Some(parent_cs) => match &db.changesets[parent_cs].kind {
                ChangesetKind::Commit { versions } => db.versions[versions[0]].branch,
                ChangesetKind::Tag { tag } => Some(*tag),
            },
        };

        let ref_kind = if is_branch { "heads" } else { "tags" };
        let ref_name = db.tags[tag].ref_name(&self.cfg.default_branch);
        writeln!(out, "reset refs/{ref_kind}/{ref_name}")?;

        let from_mark = match db.tags[tag].parent {
            Some(parent_cs) => db.changesets[parent_cs].mark,
            None => None,
        };
        db.changesets[cs].mark = from_mark;
        if let Some(mark) = from_mark {
            writeln!(out, "from :{mark}\n")?;
        }
        db.tags[tag].last = Some(cs);
        db.tags[tag].is_released = true;

        let base: Option<Vec<Option<usize>>> = parent_branch.map(|b| db.tags[b].branch_versions.clone().unwrap());
        fixup::create_fixups(db, tag, base.as_deref());

        if is_branch {
            let seed = base.unwrap_or_else(|| vec![None; db.files.len()]);
            db.tags[tag].branch_versions = Some(seed);
        } else {
            self.flush_branch_fixups_for_tag(db, fetch, out, tag, None, base)?;
        }

        Ok(())
    }

    /// Flushes `branch`'s queue (created when the branch itself was
    /// emitted) of entries due before `before`, writing one synthetic
    /// fix-up commit if anything was due.
    fn flush_branch_fixups(
        &mut self,
        db: &mut Database,
        fetch: &mut FetchDriver,
        out: &mut dyn Write,
        branch: usize,
        before: Option<i64>,
    ) -> Result<()> {
        if db.tags[branch].fixups.is_none() {
            return Ok(());
        }
        let base = db.tags[branch].branch_versions.clone();
        self.flush_branch_fixups_for_tag(db, fetch, out, branch, before, base)
    }

    fn flush_branch_fixups_for_tag(
        &mut self,
        db: &mut Database,
        fetch: &mut FetchDriver,
        out: &mut dyn Write,
        tag: usize,
        before: Option<i64>,
        base: Option<Vec<Option<usize>>>,
    ) -> Result<()> {
        let entries = fixup::flush_fixups(db, tag, before);
        if entries.is_empty() {
            return Ok(());
        }

        let to_fetch: Vec<_> = entries.iter().filter_map(|e| e.version).filter(|&v| db.versions[v].mark.is_none()).collect();
        fetch.grab_versions(db, out, &to_fetch)?;

        db.tags[tag].fixup = true;
        let mark = db.next_mark();

        let ref_kind = if db.tags[tag].is_branch { "heads" } else { "tags" };
        let ref_name = db.tags[tag].ref_name(&self.cfg.default_branch);
        let commit_time = db.tags[tag].last.map(|cs| db.changesets[cs].time).unwrap_or(db.changesets[db.tags[tag].changeset].time);

        let comment = fixup::fixup_commit_comment(db, base.as_deref(), &entries);

        writeln!(out, "commit refs/{ref_kind}/{ref_name}")?;
        writeln!(out, "mark :{mark}")?;
        writeln!(out, "committer {} <{}> {commit_time} +0000", self.cfg.fixup_author_name, self.cfg.fixup_author_email)?;
        write!(out, "data {}\n{comment}", comment.len())?;

        for entry in &entries {
            let path = &db.files[entry.file].path;
            match entry.version {
                None => {
                    writeln!(out, "D {path}")?;
                }
                Some(v) => {
                    let mode = if db.versions[v].exec { "755" } else { "644" };
                    let m = db.versions[v]
                        .mark
                        .ok_or_else(|| CloneError::invariant("fetched fix-up version missing a mark"))?;
                    writeln!(out, "M {mode} :{m} {path}")?;
                }
            }
        }

        Ok(())
    }

    /// After the scheduler drains, every branch may still have queued
    /// fix-ups whose time hint never fell before a later commit (there
    /// wasn't one). Flush them all now so the branch's final state matches
    /// its declared tip exactly.
    pub fn final_flush(&mut self, db: &mut Database, fetch: &mut FetchDriver, out: &mut dyn Write) -> Result<()> {
        let branches: Vec<usize> = (0..db.tags.len()).filter(|&t| db.tags[t].is_branch).collect();
        for tag in branches {
            let base = db.tags[tag].branch_versions.clone();
            self.flush_branch_fixups_for_tag(db, fetch, out, tag, None, base)?;
        }
        Ok(())
    }
}

pub fn format_date(time: i64) -> String {
    Utc.timestamp_opt(time, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| time.to_string())
}
