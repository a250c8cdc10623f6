//! Converts a remote CVS repository into a git fast-import stream.
//!
//! The pipeline: an [`rlog`](protocol::rlog) transcript seeds a
//! [`history::Database`] of files and per-file versions, which the
//! [`history::changeset`] pass groups into atomic changesets and wires into
//! a dependency graph, [`history::tag::analyse_branches`] resolves where
//! each tag/branch forks from, a [`history::scheduler::Scheduler`] walks
//! the graph in deterministic order, and [`emit::Emitter`] writes each
//! changeset out, fetching blob content on demand through
//! [`fetch::FetchDriver`].

pub mod cli;
pub mod config;
pub mod emit;
pub mod errors;
pub mod fetch;
pub mod history;
pub mod intern;
pub mod protocol;

#[cfg(test)]
mod scenario_tests;
