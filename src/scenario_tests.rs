//! End-to-end scenarios driving the full pipeline (history → changesets →
//! branch analysis → scheduling → emission) against an in-memory fake CVS
//! server, exercising the seed-suite shapes this engine is expected to
//! produce.

use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

use crate::config::EngineConfig;
use crate::emit::Emitter;
use crate::fetch::FetchDriver;
use crate::history::scheduler::Scheduler;
use crate::history::{changeset, tag, Database, Version};
use crate::protocol::Connection;

/// A `Write` sink that keeps its bytes reachable after being moved into a
/// `Connection`, so a test can inspect exactly what was sent upstream.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn as_string(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

/// Builds the raw bytes of one `update` reply transaction: a `Created`
/// group per `(path, revision, exec, content)` entry, terminated by `ok`.
fn checkout_reply(entries: &[(&str, &str, bool, &[u8])]) -> Vec<u8> {
    let mut buf = Vec::new();
    for (name, rev, exec, content) in entries {
        buf.extend_from_slice(b"Created .\n");
        buf.extend_from_slice(b"/repo/module\n");
        buf.extend_from_slice(format!("/{name}/{rev}/dummy.timestamp//\n").as_bytes());
        buf.extend_from_slice(if *exec { b"u=rwxr-xr-x\n" } else { b"u=rw-r--r--\n" });
        buf.extend_from_slice(format!("{}\n", content.len()).as_bytes());
        buf.extend_from_slice(content);
    }
    buf.extend_from_slice(b"ok\n");
    buf
}

fn fake_fetch(script: Vec<u8>) -> (FetchDriver, SharedBuf) {
    let sent = SharedBuf::default();
    let conn = Connection::in_memory(Cursor::new(script), sent.clone(), "/cvsroot");
    (FetchDriver::new(conn, "module".to_string()), sent)
}

fn add_version(
    db: &mut Database,
    file: usize,
    version: &str,
    parent: Option<usize>,
    branch: usize,
    author: &str,
    log: &str,
    time: i64,
    dead: bool,
) -> usize {
    let v = Version {
        file,
        version: db.intern(version),
        parent,
        branch: Some(branch),
        author: db.intern(author),
        log: db.intern(log),
        time,
        dead,
        exec: false,
        used: true,
        mark: None,
    };
    db.add_version(file, v)
}

/// Runs history-store construction through emission, returning the bytes
/// written to the fast-import stream.
fn run_pipeline(db: &mut Database, cfg: &EngineConfig, fetch: &mut FetchDriver) -> String {
    changeset::build_commit_changesets(db, cfg);
    changeset::build_tag_changesets(db);
    tag::analyse_branches(db);
    changeset::wire_dependencies(db);

    let mut out = Vec::new();
    let mut emitter = Emitter::new(cfg);
    let mut scheduler = Scheduler::new();
    scheduler.seed(db);
    while let Some(cs) = scheduler.next_changeset() {
        emitter.emit(db, fetch, &mut out, cs).expect("emit failed");
        scheduler.changeset_emitted(db, cs);
    }
    emitter.final_flush(db, fetch, &mut out).expect("final flush failed");
    String::from_utf8(out).unwrap()
}

#[test]
fn s1_single_trunk_commit() {
    let mut db = Database::new();
    let trunk = db.trunk();
    let f = db.find_or_create_file("a.txt");
    add_version(&mut db, f, "1.1", None, trunk, "u", "init", 1000, false);

    let cfg = EngineConfig::default();
    let (mut fetch, _sent) = fake_fetch(checkout_reply(&[("a.txt", "1.1", false, b"hello")]));

    let out = run_pipeline(&mut db, &cfg, &mut fetch);

    assert!(out.contains("reset refs/heads/cvs_master"));
    assert!(out.contains("blob\nmark :1\ndata 5\nhello\n"));
    assert!(out.contains("commit refs/heads/cvs_master\nmark :2\ncommitter u <u> 1000 +0000\ndata 4\ninit\nM 644 :1 a.txt\n"));

    let reset_at = out.find("reset refs/heads/cvs_master").unwrap();
    let commit_at = out.find("commit refs/heads/cvs_master").unwrap();
    assert!(reset_at < commit_at, "branch creation must precede its first commit");
}

#[test]
fn s2_coalesces_same_author_log_into_one_commit() {
    let mut db = Database::new();
    let trunk = db.trunk();
    let a = db.find_or_create_file("a.txt");
    let b = db.find_or_create_file("b.txt");
    let c = db.find_or_create_file("c.txt");
    add_version(&mut db, a, "1.1", None, trunk, "u", "batch", 1000, false);
    add_version(&mut db, b, "1.1", None, trunk, "u", "batch", 1005, false);
    add_version(&mut db, c, "1.1", None, trunk, "u", "batch", 1009, false);

    let cfg = EngineConfig::default();
    let (mut fetch, _sent) = fake_fetch(checkout_reply(&[
        ("a.txt", "1.1", false, b"A"),
        ("b.txt", "1.1", false, b"BB"),
        ("c.txt", "1.1", false, b"CCC"),
    ]));

    let out = run_pipeline(&mut db, &cfg, &mut fetch);

    assert_eq!(out.matches("blob\n").count(), 3);
    assert_eq!(out.matches("committer u <u> 1009 +0000").count(), 1);
    assert_eq!(out.matches("commit refs/heads/cvs_master").count(), 1);
    assert!(out.contains("M 644 :1 a.txt"));
    assert!(out.contains("M 644 :2 b.txt"));
    assert!(out.contains("M 644 :3 c.txt"));
}

#[test]
fn s3_delete_emits_d_with_no_blob() {
    let mut db = Database::new();
    let trunk = db.trunk();
    let x = db.find_or_create_file("x");
    let v1 = add_version(&mut db, x, "1.1", None, trunk, "u", "add x", 1000, false);
    add_version(&mut db, x, "1.2", Some(v1), trunk, "u", "rm x", 1500, true);

    let cfg = EngineConfig::default();
    let (mut fetch, _sent) = fake_fetch(checkout_reply(&[("x", "1.1", false, b"hi")]));

    let out = run_pipeline(&mut db, &cfg, &mut fetch);

    assert_eq!(out.matches("blob\n").count(), 1);
    assert!(out.contains("M 644 :1 x"));
    assert!(out.contains("D x"));
    let m_at = out.find("M 644 :1 x").unwrap();
    let d_at = out.find("D x").unwrap();
    assert!(m_at < d_at, "the add must be emitted before the delete");
}

#[test]
fn s4_branch_with_no_divergence_has_no_fixup() {
    let mut db = Database::new();
    let trunk = db.trunk();
    let f = db.find_or_create_file("a.txt");
    let v1 = add_version(&mut db, f, "1.1", None, trunk, "u", "init", 1000, false);

    let branch = db.find_or_create_tag("b", true);
    db.tags[branch].tag_files = vec![v1];

    let cfg = EngineConfig::default();
    let (mut fetch, _sent) = fake_fetch(checkout_reply(&[("a.txt", "1.1", false, b"X")]));

    let out = run_pipeline(&mut db, &cfg, &mut fetch);

    assert!(out.contains("reset refs/heads/b"));
    assert!(out.contains("from :2"));
    assert!(!out.contains("Fix-up commit generated"));
    assert!(!db.tags[branch].fixup);
}

#[test]
fn s5_tag_behind_parent_tip_gets_a_fixup_commit() {
    let mut db = Database::new();
    let trunk = db.trunk();
    let b = db.find_or_create_file("b.txt");
    let a = db.find_or_create_file("a.txt");

    let b1 = add_version(&mut db, b, "1.1", None, trunk, "u", "add b", 1000, false);
    let b2 = add_version(&mut db, b, "1.2", Some(b1), trunk, "u", "b rev2", 1010, false);
    add_version(&mut db, b, "1.3", Some(b2), trunk, "u", "b rev3", 1020, false);
    let a1 = add_version(&mut db, a, "1.1", None, trunk, "u", "add a", 2000, false);

    let v1 = db.find_or_create_tag("v1", false);
    // tag_files must be ordered by file id; a.txt was created second (id 1)
    // so it still sorts after b.txt (id 0).
    db.tags[v1].tag_files = vec![b2, a1];

    // Each commit changeset here holds exactly one version, so the fetch
    // driver issues one single-version transaction per commit, in emission
    // order: b@1.1, b@1.2, b@1.3, a@1.1.
    let cfg = EngineConfig::default();
    let (mut fetch, _sent) = fake_fetch(
        [
            checkout_reply(&[("b.txt", "1.1", false, b"b1")]),
            checkout_reply(&[("b.txt", "1.2", false, b"b2")]),
            checkout_reply(&[("b.txt", "1.3", false, b"b3")]),
            checkout_reply(&[("a.txt", "1.1", false, b"a1")]),
        ]
        .concat(),
    );

    let out = run_pipeline(&mut db, &cfg, &mut fetch);

    assert!(out.contains("reset refs/tags/v1"));
    assert!(db.tags[v1].fixup, "the tag should have required a fix-up commit");
    assert!(out.contains("Fix-up commit generated by crap-clone.  (~1 +0 -0 =1)\nb.txt 1.3->1.2\n"));
    // The fix-up reuses the blob already fetched for b@1.2 (the second
    // blob allocated) rather than re-fetching it.
    assert_eq!(out.matches("data 2\nb2").count(), 1);
    assert!(out.contains("M 644 :3 b.txt"));
}

#[test]
fn every_tag_is_released_at_run_end() {
    let mut db = Database::new();
    let trunk = db.trunk();
    let f = db.find_or_create_file("a.txt");
    let v1 = add_version(&mut db, f, "1.1", None, trunk, "u", "init", 1000, false);

    let branch = db.find_or_create_tag("b", true);
    db.tags[branch].tag_files = vec![v1];
    let rel = db.find_or_create_tag("rel-1", false);
    db.tags[rel].tag_files = vec![v1];

    let cfg = EngineConfig::default();
    let (mut fetch, _sent) = fake_fetch(checkout_reply(&[("a.txt", "1.1", false, b"hello")]));

    run_pipeline(&mut db, &cfg, &mut fetch);

    for tag in &db.tags {
        assert!(tag.is_released, "tag '{}' was never released", tag.name);
    }
}

#[test]
fn s6_wide_span_commit_falls_back_to_per_version_fetches() {
    let mut db = Database::new();
    let trunk = db.trunk();
    let x = db.find_or_create_file("x.txt");
    let y = db.find_or_create_file("y.txt");
    let z = db.find_or_create_file("z.txt");
    // Consecutive gaps (250s) stay under the coalescing window so these
    // three land in one commit changeset, but the total span (500s) exceeds
    // the fetch driver's date-batch window.
    add_version(&mut db, x, "1.1", None, trunk, "u", "batch", 1000, false);
    add_version(&mut db, y, "1.2", None, trunk, "u", "batch", 1250, false);
    add_version(&mut db, z, "1.3", None, trunk, "u", "batch", 1500, false);

    let cfg = EngineConfig::default();
    let (mut fetch, sent) = fake_fetch(
        [
            checkout_reply(&[("x.txt", "1.1", false, b"X")]),
            checkout_reply(&[("y.txt", "1.2", false, b"Y")]),
            checkout_reply(&[("z.txt", "1.3", false, b"Z")]),
        ]
        .concat(),
    );

    let out = run_pipeline(&mut db, &cfg, &mut fetch);

    assert_eq!(out.matches("blob\n").count(), 3);
    assert_eq!(fetch.count_transactions, 3);
    assert!(!sent.as_string().contains("-D"), "a span this wide must not use the date-batch request");
}
