//! The dependency scheduler: a readiness heap over changesets, popped in a
//! deterministic, reproducible order.
//!
//! A changeset becomes *ready* when its `unready_count` reaches zero.
//! `next_changeset` always returns the minimum ready changeset under the
//! key `(time, kind_rank, changeset_id)`: commits and tags are ordered by
//! their timestamp first, ties prefer a tag/branch changeset over a commit
//! (so a branch's `reset` is never scheduled after a same-timestamp commit
//! depending on it), and any remaining tie falls back to changeset creation
//! order, which is itself a reproducible function of the input (see
//! `history::changeset::build_commit_changesets`).

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::history::{ChangesetId, ChangesetKind, Database};

fn kind_rank(db: &Database, cs: ChangesetId) -> u8 {
    match db.changesets[cs].kind {
        ChangesetKind::Tag { .. } => 0,
        ChangesetKind::Commit { .. } => 1,
    }
}

#[derive(Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<(i64, u8, ChangesetId)>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, db: &Database, cs: ChangesetId) {
        self.heap.push(Reverse((db.changesets[cs].time, kind_rank(db, cs), cs)));
    }

    /// Seeds the heap with every changeset that's already ready (typically
    /// called once after dependency wiring).
    pub fn seed(&mut self, db: &Database) {
        for cs in 0..db.changesets.len() {
            if db.changesets[cs].unready_count == 0 {
                self.push(db, cs);
            }
        }
    }

    pub fn next_changeset(&mut self) -> Option<ChangesetId> {
        self.heap.pop().map(|Reverse((_, _, cs))| cs)
    }

    /// Decrements each child's `unready_count` and enqueues any child that
    /// becomes ready as a result.
    pub fn changeset_emitted(&mut self, db: &mut Database, cs: ChangesetId) {
        let children = db.changesets[cs].children.clone();
        for child in children {
            db.changesets[child].unready_count -= 1;
            if db.changesets[child].unready_count == 0 {
                self.push(db, child);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::changeset::Changeset;

    fn commit(time: i64) -> Changeset {
        Changeset {
            kind: ChangesetKind::Commit { versions: vec![] },
            time,
            mark: None,
            children: vec![],
            unready_count: 0,
        }
    }

    fn tag(time: i64, tag: usize) -> Changeset {
        Changeset {
            kind: ChangesetKind::Tag { tag },
            time,
            mark: None,
            children: vec![],
            unready_count: 0,
        }
    }

    #[test]
    fn orders_by_time_then_prefers_tag_on_tie() {
        let mut db = Database::new();
        db.changesets.push(commit(100)); // 0
        db.changesets.push(tag(100, 0)); // 1, same time as 0
        db.changesets.push(commit(50)); // 2, earliest

        let mut sched = Scheduler::new();
        sched.seed(&db);

        assert_eq!(sched.next_changeset(), Some(2));
        assert_eq!(sched.next_changeset(), Some(1)); // tag beats commit at t=100
        assert_eq!(sched.next_changeset(), Some(0));
        assert_eq!(sched.next_changeset(), None);
    }

    #[test]
    fn unready_changeset_withheld_until_dependency_clears() {
        let mut db = Database::new();
        db.changesets.push(commit(10)); // 0, ready
        db.changesets.push(commit(20)); // 1, depends on 0
        db.changesets[1].unready_count = 1;
        db.changesets[0].children.push(1);

        let mut sched = Scheduler::new();
        sched.seed(&db);
        assert_eq!(sched.next_changeset(), Some(0));
        assert!(sched.is_empty());

        sched.changeset_emitted(&mut db, 0);
        assert_eq!(sched.next_changeset(), Some(1));
    }
}
