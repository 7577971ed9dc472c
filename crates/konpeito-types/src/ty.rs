//! The closed type lattice and its interning table (§3.1, §4.1).
//!
//! Every type that can appear anywhere in the compiler — a class
//! instance, a union, a type variable — is interned into a single flat
//! table and referred to everywhere else by the small `Copy` [`TypeId`]
//! handle, the same way `konpeito-ast` interns nodes and
//! `konpeito-common` interns strings. Interning gives structural types
//! (unions, tuples, procs) value-equality for free: two unions built
//! from the same member set intern to the same `TypeId` regardless of
//! where they were constructed.

use crate::var::TypeVar;
use konpeito_common::Atom;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// A handle to an interned type. Cheap to copy, compare, and hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TypeId(u32);

impl TypeId {
    const fn from_usize(index: usize) -> Self {
        TypeId(index as u32)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    // Intrinsics, pre-registered by `TypeInterner::new` at fixed indices
    // so callers can refer to them without a lookup (§4.1 "a small set
    // of primitive and sentinel types exist independent of any source
    // program").
    pub const UNTYPED: TypeId = TypeId(0);
    pub const BOTTOM: TypeId = TypeId(1);
    pub const NIL: TypeId = TypeId(2);
    pub const BOOL: TypeId = TypeId(3);
    pub const INTEGER: TypeId = TypeId(4);
    pub const FLOAT: TypeId = TypeId(5);
    pub const STRING: TypeId = TypeId(6);
    pub const SYMBOL: TypeId = TypeId(7);
}

/// The primitive scalar kinds (§3.1).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PrimitiveKind {
    Nil,
    Bool,
    Integer,
    Float,
    String,
    Symbol,
}

/// A method or proc signature shape shared by [`TypeKey::ProcType`] and
/// [`TypeKey::FunctionType`].
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct CallableShape {
    pub params: SmallVec<[TypeId; 4]>,
    pub return_type: TypeId,
}

/// A native-runtime container family (§3.1 "native families") — these
/// represent fixed-layout runtime values distinct from managed
/// `ClassInstance`s, used by the native-struct/native-call signature
/// annotations.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum NativeKind {
    NativeArray(TypeId),
    StaticArray { element: TypeId, size: u32 },
    Slice(TypeId),
    NativeHash { key: TypeId, value: TypeId },
    NativeClass(Atom),
    ByteBuffer,
    ByteSlice,
    StringBuffer,
    NativeString,
}

/// The closed set of type shapes the lattice can represent (§3.1).
///
/// This is the structural key used for interning: two `TypeKey` values
/// that are `==` always resolve to the same `TypeId`.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TypeKey {
    Primitive(PrimitiveKind),
    ClassInstance {
        class: Atom,
        type_args: SmallVec<[TypeId; 2]>,
    },
    ClassSingleton {
        class: Atom,
    },
    /// Always stored flattened and sorted by `TypeId` so that set-equal
    /// unions intern identically regardless of construction order
    /// (§4.1 "union flattening").
    Union(SmallVec<[TypeId; 4]>),
    Tuple(SmallVec<[TypeId; 4]>),
    ProcType(CallableShape),
    FunctionType(CallableShape),
    TypeVar(TypeVar),
    Untyped,
    Bottom,
    Native(NativeKind),
}

/// Flat, append-only interning table for one compile (§5: populated
/// once per run, read many times afterwards).
pub struct TypeInterner {
    types: Vec<TypeKey>,
    lookup: FxHashMap<TypeKey, TypeId>,
}

impl Default for TypeInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeInterner {
    #[must_use]
    pub fn new() -> Self {
        let mut interner = Self {
            types: Vec::new(),
            lookup: FxHashMap::default(),
        };
        // Registration order must match the `TypeId` intrinsic constants above.
        interner.intern(TypeKey::Untyped);
        interner.intern(TypeKey::Bottom);
        interner.intern(TypeKey::Primitive(PrimitiveKind::Nil));
        interner.intern(TypeKey::Primitive(PrimitiveKind::Bool));
        interner.intern(TypeKey::Primitive(PrimitiveKind::Integer));
        interner.intern(TypeKey::Primitive(PrimitiveKind::Float));
        interner.intern(TypeKey::Primitive(PrimitiveKind::String));
        interner.intern(TypeKey::Primitive(PrimitiveKind::Symbol));
        interner
    }

    /// Intern a type key, returning its `TypeId`. Interning the same
    /// structural key twice always returns the same `TypeId`.
    pub fn intern(&mut self, key: TypeKey) -> TypeId {
        if let Some(id) = self.lookup.get(&key) {
            return *id;
        }
        let id = TypeId::from_usize(self.types.len());
        self.types.push(key.clone());
        self.lookup.insert(key, id);
        id
    }

    /// Allocate a fresh, never-before-seen type variable type. Each call
    /// returns a distinct `TypeId` even though the `TypeVar` it wraps is
    /// itself fresh, so there is no point deduplicating these through
    /// the structural table; go straight to a push.
    pub fn fresh_var(&mut self, var: TypeVar) -> TypeId {
        let id = TypeId::from_usize(self.types.len());
        self.types.push(TypeKey::TypeVar(var));
        id
    }

    #[must_use]
    pub fn lookup(&self, id: TypeId) -> &TypeKey {
        &self.types[id.index()]
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Intern a union from its already-flattened, already-sorted,
    /// deduplicated member list. Callers go through
    /// [`crate::lattice::flatten_union`] to get a canonical member list
    /// before calling this; it is `pub(crate)` so nothing can
    /// accidentally intern a non-canonical union and break the "equal
    /// member set implies equal `TypeId`" guarantee.
    pub(crate) fn intern_union(&mut self, members: SmallVec<[TypeId; 4]>) -> TypeId {
        if members.len() == 1 {
            return members[0];
        }
        self.intern(TypeKey::Union(members))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsics_resolve_to_expected_keys() {
        let interner = TypeInterner::new();
        assert_eq!(interner.lookup(TypeId::UNTYPED), &TypeKey::Untyped);
        assert_eq!(interner.lookup(TypeId::BOTTOM), &TypeKey::Bottom);
        assert_eq!(
            interner.lookup(TypeId::INTEGER),
            &TypeKey::Primitive(PrimitiveKind::Integer)
        );
    }

    #[test]
    fn interning_same_structural_key_dedupes() {
        let mut strings = konpeito_common::Interner::new();
        let class = strings.intern("String");
        let mut interner = TypeInterner::new();
        let a = interner.intern(TypeKey::ClassInstance {
            class,
            type_args: SmallVec::new(),
        });
        let b = interner.intern(TypeKey::ClassInstance {
            class,
            type_args: SmallVec::new(),
        });
        assert_eq!(a, b);
    }

    #[test]
    fn fresh_vars_never_dedupe() {
        use crate::var::TypeVarTable;
        let mut interner = TypeInterner::new();
        let mut vars = TypeVarTable::new();
        let v1 = interner.fresh_var(vars.fresh());
        let v2 = interner.fresh_var(vars.fresh());
        assert_ne!(v1, v2);
    }
}
