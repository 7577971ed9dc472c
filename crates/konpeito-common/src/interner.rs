//! String interning for identifier and path deduplication.
//!
//! Class names, method names, file paths, and signature-table keys are
//! compared and hashed constantly across every pipeline stage (§5: the
//! signature registry is "populated once, read many times"). Interning
//! them once into a small integer avoids repeated `String` allocation and
//! makes `Atom` cheap to copy, hash, and compare.

use rustc_hash::FxHashMap;
use std::fmt;

/// An interned string. Cheap to copy, compare, and hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(u32);

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Atom(#{})", self.0)
    }
}

/// A single-compile-run string interner.
///
/// Per §5, a compile owns all of its intermediate state and is
/// single-threaded, so this is a plain append-only table rather than a
/// concurrent map.
#[derive(Default)]
pub struct Interner {
    strings: Vec<Box<str>>,
    lookup: FxHashMap<Box<str>, Atom>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its `Atom`. Interning the same text twice
    /// always returns the same `Atom`.
    pub fn intern(&mut self, text: &str) -> Atom {
        if let Some(atom) = self.lookup.get(text) {
            return *atom;
        }
        let id = u32::try_from(self.strings.len()).expect("interner overflow");
        let boxed: Box<str> = text.into();
        self.strings.push(boxed.clone());
        let atom = Atom(id);
        self.lookup.insert(boxed, atom);
        atom
    }

    /// Resolve an `Atom` back to its text. Panics if the atom was not
    /// produced by this interner.
    pub fn resolve(&self, atom: Atom) -> &str {
        &self.strings[atom.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// A thread-unsafe interner wrapped for the (common) case of sharing one
/// across several owned structures within a single compile via `Rc`-style
/// interior access. Kept separate from `Interner` so callers that only
/// ever touch one owner can skip the indirection.
pub struct ShardedInterner {
    inner: std::cell::RefCell<Interner>,
}

impl Default for ShardedInterner {
    fn default() -> Self {
        Self {
            inner: std::cell::RefCell::new(Interner::new()),
        }
    }
}

impl ShardedInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, text: &str) -> Atom {
        self.inner.borrow_mut().intern(text)
    }

    pub fn resolve(&self, atom: Atom) -> String {
        self.inner.borrow().resolve(atom).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_text_returns_same_atom() {
        let mut interner = Interner::new();
        let a = interner.intern("Array");
        let b = interner.intern("Array");
        assert_eq!(a, b);
        assert_eq!(interner.resolve(a), "Array");
    }

    #[test]
    fn interning_distinct_text_returns_distinct_atoms() {
        let mut interner = Interner::new();
        let a = interner.intern("Array");
        let b = interner.intern("Hash");
        assert_ne!(a, b);
    }

    #[test]
    fn sharded_interner_round_trips() {
        let interner = ShardedInterner::new();
        let atom = interner.intern("String");
        assert_eq!(interner.resolve(atom), "String");
    }
}
