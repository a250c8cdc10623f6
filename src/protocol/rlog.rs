//! Parser for the `rlog` reply: the transcript the fetch driver issues
//! first to learn every file's full revision history in one round trip,
//! rather than walking the tree file by file.
//!
//! Not part of the component this crate was distilled from directly — the
//! reference implementation's `read_files_versions` lived outside the
//! portion of its source retained for this exercise — so this follows the
//! well-known `rlog`/`cvs log -R` transcript grammar instead, paragraph by
//! paragraph per file:
//!
//! ```text
//! RCS file: repo/module/path/to/file.c,v
//! Working file: path/to/file.c
//! head: 1.4
//! branch:
//! locks: strict
//! access list:
//! symbolic names:
//!         rel-1: 1.2
//!         some-branch: 1.2.0.2
//! keyword substitution: kv
//! total revisions: 4;     selected revisions: 4
//! description:
//! ----------------------------
//! revision 1.4
//! date: 2021-06-01 10:00:00 +0000;  author: alice;  state: Exp;  lines: +3 -1
//! commit message body
//! ----------------------------
//! ...
//! =============================================================================
//! ```

use crate::history::Database;

/// Parses every `RCS file:` paragraph in `transcript` into `db`, returning
/// the number of files ingested.
pub fn ingest(db: &mut Database, transcript: &str) -> crate::errors::Result<usize> {
    let mut files = 0;
    for paragraph in transcript.split("=============================================================================") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        if ingest_file_paragraph(db, paragraph)? {
            files += 1;
        }
    }
    Ok(files)
}

fn ingest_file_paragraph(db: &mut Database, paragraph: &str) -> crate::errors::Result<bool> {
    let mut lines = paragraph.lines();
    let working_file = loop {
        let Some(line) = lines.next() else { return Ok(false) };
        if let Some(rest) = line.strip_prefix("Working file: ") {
            break rest.trim().to_string();
        }
    };

    let file_id = db.find_or_create_file(&working_file);

    // symbolic names: map a tag/branch name to its dotted revision spec.
    let mut symbolic_names: Vec<(String, String)> = Vec::new();
    let mut in_symbolic_names = false;
    let mut rest_of_header = Vec::new();
    for line in lines.by_ref() {
        if line.trim() == "symbolic names:" {
            in_symbolic_names = true;
            continue;
        }
        if in_symbolic_names {
            if let Some((name, rev)) = line.trim().split_once(':') {
                symbolic_names.push((name.trim().to_string(), rev.trim().to_string()));
                continue;
            }
            in_symbolic_names = false;
        }
        if line.trim() == "description:" {
            rest_of_header.push(line);
            break;
        }
        rest_of_header.push(line);
    }

    let remainder: String = lines.collect::<Vec<_>>().join("\n");
    for block in remainder.split("----------------------------") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        parse_revision_block(db, file_id, block, &symbolic_names)?;
    }

    Ok(true)
}

fn parse_revision_block(
    db: &mut Database,
    file_id: usize,
    block: &str,
    symbolic_names: &[(String, String)],
) -> crate::errors::Result<()> {
    let mut lines = block.lines();
    let rev_line = lines
        .next()
        .ok_or_else(|| crate::errors::CloneError::protocol("empty revision block in rlog transcript"))?;
    let revision = rev_line
        .strip_prefix("revision ")
        .ok_or_else(|| crate::errors::CloneError::protocol(format!("expected 'revision' line, got {rev_line:?}")))?
        .trim()
        .to_string();

    let meta_line = lines
        .next()
        .ok_or_else(|| crate::errors::CloneError::protocol("truncated rlog revision block"))?;
    let (date_str, author, state) = parse_meta_line(meta_line)?;
    let time = parse_cvs_date(&date_str)?;

    let log: String = lines.collect::<Vec<_>>().join("\n");
    let log = log.trim_end().to_string();

    let branch_name = branch_for_revision(&revision, symbolic_names);
    let branch = db.find_or_create_tag(&branch_name, !branch_name.is_empty());

    let version_sym = db.intern(&revision);
    let parent = parent_revision(&revision).and_then(|p| db.find_version(file_id, &p));

    let version = crate::history::Version {
        file: file_id,
        version: version_sym,
        parent,
        branch: Some(branch),
        author: db.intern(&author),
        log: db.intern(&log),
        time,
        dead: state.eq_ignore_ascii_case("dead"),
        exec: false,
        used: true,
        mark: None,
    };
    db.add_version(file_id, version);
    Ok(())
}

fn parse_meta_line(line: &str) -> crate::errors::Result<(String, String, String)> {
    let mut date = None;
    let mut author = None;
    let mut state = "Exp".to_string();
    for field in line.split(';') {
        let field = field.trim();
        if let Some(rest) = field.strip_prefix("date: ") {
            date = Some(rest.trim().to_string());
        } else if let Some(rest) = field.strip_prefix("author: ") {
            author = Some(rest.trim().to_string());
        } else if let Some(rest) = field.strip_prefix("state: ") {
            state = rest.trim().to_string();
        }
    }
    Ok((
        date.ok_or_else(|| crate::errors::CloneError::protocol("rlog revision missing 'date:' field"))?,
        author.ok_or_else(|| crate::errors::CloneError::protocol("rlog revision missing 'author:' field"))?,
        state,
    ))
}

/// `date: 2021-06-01 10:00:00 +0000` (modern) or `2021/06/01 10:00:00`
/// (the older two-digit-year, no-offset form some servers still emit) down
/// to a Unix timestamp.
fn parse_cvs_date(s: &str) -> crate::errors::Result<i64> {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S %z") {
        return Ok(dt.timestamp());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y/%m/%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive).timestamp());
    }
    Err(crate::errors::CloneError::protocol(format!("unrecognised rlog date format: {s:?}")))
}

/// The dotted revision `M.N.0.B.R` lives on branch `M.N.B`; a plain `M.N`
/// lives on trunk, represented by the empty branch name.
fn branch_for_revision(revision: &str, symbolic_names: &[(String, String)]) -> String {
    let parts: Vec<&str> = revision.split('.').collect();
    if parts.len() <= 2 {
        return String::new();
    }
    // Magic-branch-number form: odd penultimate component is `0`, meaning
    // everything up to but not including it, plus the final component, is
    // the branch number proper.
    if parts.len() >= 2 && parts[parts.len() - 2] == "0" {
        let branch_number = [&parts[..parts.len() - 2], &parts[parts.len() - 1..]].concat().join(".");
        return symbolic_names
            .iter()
            .find(|(_, rev)| *rev == branch_number)
            .map(|(name, _)| name.clone())
            .unwrap_or(branch_number);
    }
    let branch_number = parts[..parts.len() - 1].join(".");
    symbolic_names
        .iter()
        .find(|(_, rev)| *rev == branch_number)
        .map(|(name, _)| name.clone())
        .unwrap_or(branch_number)
}

/// `1.4` -> `Some("1.3")`; `1.2.2.5` -> `Some("1.2.2.4")`; a branch's first
/// revision (e.g. `1.2.2.1`) has no same-branch parent.
fn parent_revision(revision: &str) -> Option<String> {
    let mut parts: Vec<i64> = revision.split('.').map(|p| p.parse().ok()).collect::<Option<_>>()?;
    let last = parts.last_mut()?;
    if *last <= 1 {
        return None;
    }
    *last -= 1;
    Some(parts.iter().map(|n| n.to_string()).collect::<Vec<_>>().join("."))
}
