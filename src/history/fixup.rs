//! Tag/branch fix-up computation (§4.4).
//!
//! A remote tag may name a combination of file versions that was never
//! simultaneously live under any real commit — CVS lets users retag files
//! individually, and a branch's initial state is whatever was live on its
//! parent at the moment it forked, which real commits may never have
//! produced as a single snapshot either. The target model this engine
//! feeds requires every ref to point at a real commit, so where the tag's
//! declared snapshot disagrees with its parent branch's actual state we
//! synthesise one fix-up commit that reconciles the two.

use crate::history::{Database, FileId, Tag, VersionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixupEntry {
    pub file: FileId,
    /// `None` means this fix-up deletes the file.
    pub version: Option<VersionId>,
    pub time: i64,
}

/// §4.4: `fixups = { (file, target[file]) : live(base[file]) != live(target[file]) }`,
/// sorted by time ascending so earlier fix-ups can flush before later,
/// dependent commits.
pub fn compute_fixups(db: &Database, base: Option<&[Option<VersionId>]>, tag: &Tag) -> Vec<FixupEntry> {
    let mut out = Vec::new();
    let mut tf = tag.tag_files.iter().peekable();

    for file in 0..db.files.len() {
        let bv = base.and_then(|b| b[file]).map(|v| db.normalise(v));
        let mut tv = None;
        if let Some(&&candidate) = tf.peek()
            && db.versions[candidate].file == file
        {
            tv = Some(db.normalise(candidate));
            tf.next();
        }

        let bv_live = db.live(bv);
        let tv_live = db.live(tv);
        if bv_live == tv_live {
            continue;
        }

        let time = match tv {
            Some(v) => db.versions[v].time,
            None => i64::MIN,
        };
        out.push(FixupEntry {
            file,
            version: tv_live,
            time,
        });
    }

    out.sort_by_key(|f| f.time);
    out
}

/// Computes and stores `tag_id`'s fix-up queue against `base` (the parent
/// branch's per-file tip *at the moment this tag/branch was created*).
/// Must be called exactly once per tag, at the point its creating
/// changeset is emitted — not lazily at first flush — since `base` is a
/// snapshot that would otherwise go stale as the parent branch keeps
/// committing.
pub fn create_fixups(db: &mut Database, tag_id: usize, base: Option<&[Option<VersionId>]>) {
    let entries = compute_fixups(db, base, &db.tags[tag_id]);
    db.tags[tag_id].fixups = Some(super::tag::FixupQueue { entries, cursor: 0 });
}

/// §4.4: "`print_fixups(before=cs)` emits only those fixups whose time-hint
/// precedes the next real commit `cs`". Advances the cursor of an
/// already-[`create_fixups`]'d queue past every entry with `time < before`
/// (or the whole queue when `before` is `None`, i.e. a non-branch tag or
/// the final flush), applying each popped entry to `branch_versions` as it
/// goes.
///
/// Returns the entries that were flushed this call; an empty result means
/// no fix-up commit should be emitted.
pub fn flush_fixups(db: &mut Database, tag_id: usize, before: Option<i64>) -> Vec<FixupEntry> {
    let mut flushed = Vec::new();
    let queue = db.tags[tag_id].fixups.as_mut().unwrap();
    while queue.cursor < queue.entries.len() {
        let entry = queue.entries[queue.cursor];
        if let Some(cutoff) = before
            && entry.time >= cutoff
        {
            break;
        }
        flushed.push(entry);
        queue.cursor += 1;
    }

    if let Some(branch_versions) = db.tags[tag_id].branch_versions.as_mut() {
        for entry in &flushed {
            branch_versions[entry.file] = entry.version;
        }
    }

    flushed
}

/// §6 fix-up commit log format.
pub fn fixup_commit_comment(
    db: &Database,
    base: Option<&[Option<VersionId>]>,
    fixups: &[FixupEntry],
) -> String {
    let mut modified = 0usize;
    let mut added = 0usize;
    let mut deleted = 0usize;
    let mut keep = 0usize;

    let mut ffv = fixups.iter().peekable();
    for file in 0..db.files.len() {
        let bv = base.and_then(|b| b[file]).and_then(|v| db.live(Some(v)));
        let tv = if let Some(&&e) = ffv.peek()
            && e.file == file
        {
            ffv.next();
            e.version
        } else {
            bv
        };

        if bv == tv {
            if bv.is_some() {
                keep += 1;
            }
            continue;
        }
        if tv.is_none() {
            deleted += 1;
        } else if bv.is_none() {
            added += 1;
        } else {
            modified += 1;
        }
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Fix-up commit generated by crap-clone.  (~{modified} +{added} -{deleted} ={keep})\n"
    ));

    let mut ffv = fixups.iter().peekable();
    for file in 0..db.files.len() {
        let bv = base.and_then(|b| b[file]).and_then(|v| db.live(Some(v)));
        let tv = if let Some(&&e) = ffv.peek()
            && e.file == file
        {
            ffv.next();
            e.version
        } else {
            bv
        };

        let path = &db.files[file].path;
        if bv == tv {
            if bv.is_some() && keep <= deleted {
                out.push_str(&format!("{path} KEEP {}\n", db.versions[bv.unwrap()].version));
            }
            continue;
        }
        if tv.is_some() || deleted <= keep {
            let old = bv.map(|v| db.versions[v].version.to_string()).unwrap_or_else(|| "ADD".to_string());
            let new = tv.map(|v| db.versions[v].version.to_string()).unwrap_or_else(|| "DELETE".to_string());
            out.push_str(&format!("{path} {old}->{new}\n"));
        }
    }

    out
}
