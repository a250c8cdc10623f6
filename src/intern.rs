//! Process-wide string interning arena.
//!
//! Paths, author names, log bodies, and tag/branch names repeat heavily
//! across an `rlog` transcript with tens of thousands of versions. The
//! history store hands out [`Sym`] handles so that the changeset builder can
//! use pointer-cheap equality for its grouping key instead of repeatedly
//! hashing or comparing whole strings. The arena lives for the whole run and
//! is owned by the [`crate::history::Database`], not a global.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// An interned string. Cloning is a refcount bump; equality is by value
/// (two `Sym`s interned through the same arena that are equal in content
/// always point at the same allocation, so `Rc::ptr_eq` would also work,
/// but we compare by value to keep the type boring).
pub type Sym = Rc<str>;

#[derive(Default)]
pub struct Interner {
    strings: RefCell<HashSet<Sym>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, s: &str) -> Sym {
        if let Some(existing) = self.strings.borrow().get(s) {
            return existing.clone();
        }
        let sym: Sym = Rc::from(s);
        self.strings.borrow_mut().insert(sym.clone());
        sym
    }

    /// (distinct strings, total bytes retained), surfaced at the end of a
    /// run as a cache-effectiveness stat.
    pub fn stats(&self) -> (usize, usize) {
        let strings = self.strings.borrow();
        let bytes = strings.iter().map(|s| s.len()).sum();
        (strings.len(), bytes)
    }
}
