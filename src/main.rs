use std::io::{self, Write};

use clap::Parser;
use cvs_fast_export::cli::Args;
use cvs_fast_export::config::EngineConfig;
use cvs_fast_export::emit::Emitter;
use cvs_fast_export::errors::{CloneError, Result};
use cvs_fast_export::fetch::FetchDriver;
use cvs_fast_export::history::{changeset, scheduler::Scheduler, tag, Database};
use cvs_fast_export::protocol::{rlog, Connection};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run() {
        tracing::error!(error = %e, "conversion failed");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let cfg = EngineConfig {
        coalesce_window: std::time::Duration::from_secs(args.coalesce_window.max(0) as u64),
        compression_level: args.compress,
        default_branch: args.default_branch.clone(),
        ..EngineConfig::default()
    };

    let conn = Connection::open(&args.root, args.compress)?;
    let mut fetch = FetchDriver::new(conn, args.module.clone());

    let mut db = Database::new();
    db.trunk();

    tracing::info!(root = %args.root, module = %args.module, "requesting rlog");
    let transcript = fetch.rlog()?;
    let file_count = rlog::ingest(&mut db, &transcript)?;
    tracing::info!(file_count, "ingested rlog transcript");

    changeset::build_commit_changesets(&mut db, &cfg);
    changeset::build_tag_changesets(&mut db);
    tag::analyse_branches(&mut db);
    changeset::wire_dependencies(&mut db);

    let total_changesets = db.changesets.len();

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());

    let mut emitter = Emitter::new(&cfg);
    let mut scheduler = Scheduler::new();
    scheduler.seed(&db);

    while let Some(cs) = scheduler.next_changeset() {
        emitter.emit(&mut db, &mut fetch, &mut out, cs)?;
        scheduler.changeset_emitted(&mut db, cs);
    }

    emitter.final_flush(&mut db, &mut fetch, &mut out)?;

    // Every tag/branch's changeset is scheduled exactly once by construction,
    // so by this point every tag should have been released in `emit_tag`.
    for tag in &db.tags {
        if !tag.is_released {
            return Err(CloneError::invariant(format!("tag '{}' was never released", tag.name)));
        }
    }

    writeln!(out, "progress done")?;
    out.flush()?;

    let emitted = emitter.emitted_commits;
    tracing::info!(
        emitted,
        total_changesets,
        balanced = emitted as usize == total_changesets,
        "emitted commits"
    );

    let (exact, fixup) = db
        .tags
        .iter()
        .fold((0u64, 0u64), |(exact, fixup), t| if t.fixup { (exact, fixup + 1) } else { (exact + 1, fixup) });
    tracing::info!(exact, fixup, "tags and branches resolved");
    tracing::info!(
        versions = fetch.count_versions,
        transactions = fetch.count_transactions,
        "download stats"
    );

    let (interned, bytes) = db.interner.stats();
    tracing::debug!(interned, bytes, "string cache stats");

    Ok(())
}
