//! The fetch driver: pulls file content over the wire lazily, one request
//! per group of same-revision or same-date-window versions, and writes
//! each as a `blob` record into the fast-import stream as it arrives.
//!
//! Grounded directly in `grab_version`/`grab_by_option`/`grab_versions`:
//! a single version is fetched with a plain `update -r<rev>`; a batch that
//! shares one revision string is fetched in one `update -r<rev>` naming
//! every file; a mixed batch on one branch within a narrow time window is
//! tried with `update -D<date>` first, and whatever that missed falls back
//! to one-at-a-time fetches.

use std::io::Write;

use crate::errors::{CloneError, Result};
use crate::history::{Database, VersionId};
use crate::protocol::Connection;

/// Versions within this many seconds of each other are worth trying to
/// satisfy with a single date-windowed `update -D`, same as the commit
/// coalescing window.
const DATE_BATCH_WINDOW_SECS: i64 = 300;

pub struct FetchDriver {
    conn: Connection,
    module: String,
    prefix: String,
    pub count_versions: u64,
    pub count_transactions: u64,
}

impl FetchDriver {
    pub fn new(conn: Connection, module: String) -> Self {
        let prefix = format!("{}/{module}/", conn.remote_root);
        FetchDriver {
            conn,
            module,
            prefix,
            count_versions: 0,
            count_transactions: 0,
        }
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Issues the initial `rlog` request and returns the raw transcript for
    /// [`crate::protocol::rlog::ingest`] to parse.
    pub fn rlog(&mut self) -> Result<String> {
        self.conn.send("Global_option -q")?;
        self.conn.send("Argument --")?;
        self.conn.send(&format!("Argument {}", self.module))?;
        self.conn.send("rlog")?;
        self.conn.flush()?;

        let mut transcript = String::new();
        loop {
            let line = self.conn.next_line()?;
            if line == "ok" {
                break;
            }
            if line.starts_with("M ") {
                transcript.push_str(line.trim_start_matches("M ").trim_start_matches("M"));
                transcript.push('\n');
            } else if line.starts_with("E ") {
                tracing::warn!(%line, "server error during rlog");
            }
        }
        Ok(transcript)
    }

    /// Ensures every version in `fetch` has blob content written to `out`,
    /// picking the cheapest batching strategy available.
    pub fn grab_versions(&mut self, db: &mut Database, out: &mut dyn Write, fetch: &[VersionId]) -> Result<()> {
        let fetch: Vec<VersionId> = fetch.iter().copied().filter(|&v| db.versions[v].mark.is_none()).collect();
        if fetch.is_empty() {
            return Ok(());
        }
        if fetch.len() == 1 {
            return self.grab_version(db, out, fetch[0]);
        }

        let first_version = &db.versions[fetch[0]].version;
        let same_revision = fetch.iter().all(|&v| db.versions[v].version == *first_version);
        if same_revision {
            let rev = first_version.to_string();
            return self.grab_by_option(db, out, Some(&rev), None, &fetch);
        }

        let branch = db.versions[fetch[0]].branch;
        let times: Vec<i64> = fetch.iter().map(|&v| db.versions[v].time).collect();
        let (tmin, tmax) = (*times.iter().min().unwrap(), *times.iter().max().unwrap());
        if tmax - tmin < DATE_BATCH_WINDOW_SECS && branch.is_some() {
            let date = format_update_date(tmax);
            let branch_name = db.tags[branch.unwrap()].name.to_string();
            let r_arg = if branch_name.is_empty() { None } else { Some(branch_name) };
            self.grab_by_option(db, out, r_arg.as_deref(), Some(&date), &fetch)?;
        }

        for &v in &fetch {
            if db.versions[v].mark.is_none() {
                self.grab_version(db, out, v)?;
            }
        }
        Ok(())
    }

    fn grab_version(&mut self, db: &mut Database, out: &mut dyn Write, version: VersionId) -> Result<()> {
        if db.versions[version].mark.is_some() {
            return Ok(());
        }

        let path = db.files[db.versions[version].file].path.to_string();
        if let Some(slash) = path.rfind('/') {
            let dir = &path[..slash];
            let needs_dir_announce = db.versions[version]
                .parent
                .map(|p| db.versions[p].mark.is_none())
                .unwrap_or(true);
            if needs_dir_announce {
                self.conn.send(&format!("Directory {}/{dir}", self.module))?;
                self.conn.send(&format!("{}{dir}", self.prefix))?;
            }
        }
        self.conn.send(&format!("Directory {}", self.module))?;
        self.conn.send(self.prefix.trim_end_matches('/'))?;

        self.conn.send("Argument -kk")?;
        self.conn.send(&format!("Argument -r{}", db.versions[version].version))?;
        self.conn.send("Argument --")?;
        self.conn.send(&format!("Argument {path}"))?;
        self.conn.send("update")?;
        self.conn.flush()?;

        self.read_versions(db, out)?;

        if db.versions[version].mark.is_none() {
            return Err(CloneError::upstream(format!(
                "checkout failed to produce {path} {}",
                db.versions[version].version
            )));
        }
        Ok(())
    }

    fn grab_by_option(
        &mut self,
        db: &mut Database,
        out: &mut dyn Write,
        r_arg: Option<&str>,
        d_arg: Option<&str>,
        fetch: &[VersionId],
    ) -> Result<()> {
        let mut paths: Vec<String> = fetch.iter().map(|&v| db.files[db.versions[v].file].path.to_string()).collect();
        paths.sort();
        paths.dedup();

        let mut last_dir: Option<String> = None;
        for path in &paths {
            if let Some(slash) = path.rfind('/') {
                let dir = &path[..slash];
                if last_dir.as_deref() != Some(dir) {
                    self.conn.send(&format!("Directory {}/{dir}", self.module))?;
                    self.conn.send(&format!("{}{dir}", self.prefix))?;
                    last_dir = Some(dir.to_string());
                }
            }
        }

        self.conn.send(&format!("Directory {}", self.module))?;
        self.conn.send(self.prefix.trim_end_matches('/'))?;

        if let Some(r) = r_arg {
            self.conn.send(&format!("Argument -r{r}"))?;
        }
        if let Some(d) = d_arg {
            self.conn.send(&format!("Argument -D{d}"))?;
        }
        self.conn.send("Argument -kk")?;
        self.conn.send("Argument --")?;
        for path in &paths {
            self.conn.send(&format!("Argument {path}"))?;
        }
        self.conn.send("update")?;
        self.conn.flush()?;

        self.read_versions(db, out)
    }

    fn read_versions(&mut self, db: &mut Database, out: &mut dyn Write) -> Result<()> {
        self.count_transactions += 1;
        loop {
            let line = self.conn.next_line()?;
            if line.starts_with("M ") || line.starts_with("MT ") {
                continue;
            }
            if line == "ok" {
                return Ok(());
            }
            self.read_version(db, out, &line)?;
        }
    }

    /// Parses one `Created`/`Updated`/`Update-existing`/`Checked-in`/
    /// `Removed` reply group, reading the blob body (if any) straight
    /// through to `out` as it streams in, so large files never buffer
    /// fully in memory.
    fn read_version(&mut self, db: &mut Database, out: &mut dyn Write, first_line: &str) -> Result<()> {
        if first_line.starts_with("Removed ") {
            self.conn.next_line()?;
            return Ok(());
        }
        if first_line.starts_with("Checked-in ") {
            self.conn.next_line()?;
            self.conn.next_line()?;
            return Ok(());
        }
        if !(first_line.starts_with("Created ")
            || first_line.starts_with("Update-existing ")
            || first_line.starts_with("Updated "))
        {
            return Err(CloneError::protocol(format!("did not get update line: {first_line:?}")));
        }

        self.conn.next_line()?; // repository directory, unused

        let entry = self.conn.next_line()?;
        if !entry.starts_with('/') {
            return Err(CloneError::protocol(format!("not an entry line: {entry:?}")));
        }
        let mut parts = entry[1..].splitn(3, '/');
        let name = parts.next().ok_or_else(|| CloneError::protocol("malformed entry line"))?;
        let rev = parts.next().ok_or_else(|| CloneError::protocol("malformed entry line"))?;

        let dir = first_line.split(' ').nth(1).unwrap_or(".");
        let path = if dir == "." || dir == "./" {
            name.to_string()
        } else {
            format!("{}/{name}", dir.trim_end_matches('/'))
        };

        let file = db
            .find_file(&path)
            .ok_or_else(|| CloneError::protocol(format!("checkout named unknown file {path}")))?;
        let version = db
            .find_version(file, rev)
            .ok_or_else(|| CloneError::protocol(format!("checkout named unknown version {path} {rev}")))?;

        let mode_line = self.conn.next_line()?;
        if !mode_line.starts_with("u=") {
            return Err(CloneError::protocol(format!("unexpected file mode line: {mode_line:?}")));
        }
        db.versions[version].exec = mode_line.contains('x');

        let len_line = self.conn.next_line()?;
        let len: u64 = len_line
            .parse()
            .map_err(|_| CloneError::protocol(format!("unexpected file length line: {len_line:?}")))?;

        if db.versions[version].mark.is_some() {
            tracing::warn!(%path, %rev, "checkout returned a version we already have");
            self.conn.skip_block(len)?;
        } else {
            let mark = db.next_mark();
            db.versions[version].mark = Some(mark);
            writeln!(out, "blob")?;
            writeln!(out, "mark :{mark}")?;
            writeln!(out, "data {len}")?;
            self.conn.copy_block(out, len)?;
            writeln!(out)?;
        }

        self.count_versions += 1;
        Ok(())
    }
}

fn format_update_date(time: i64) -> String {
    use chrono::{TimeZone, Utc};
    let dt = Utc.timestamp_opt(time, 0).single().unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
    dt.format("%d %b %Y %H:%M:%S -0000").to_string()
}
