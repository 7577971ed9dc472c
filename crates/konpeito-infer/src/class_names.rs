//! Mapping from a primitive [`TypeId`] back to the class name the
//! signature registry keys its built-in rule table by (§4.3's table is
//! keyed `(Atom, Atom)`, so a method call's receiver type has to round
//! back to a class name before a lookup can happen at all).
//!
//! Mirrors `konpeito-signatures::ingest::PrimitiveAtoms`, which performs
//! the opposite direction (surface name -> primitive `TypeId`) for
//! signature-file ingestion.

use konpeito_common::{Atom, Interner};
use konpeito_types::{PrimitiveKind, TypeId, TypeInterner, TypeKey};

pub struct ClassNameAtoms {
    pub nil: Atom,
    pub bool_: Atom,
    pub integer: Atom,
    pub float: Atom,
    pub string: Atom,
    pub symbol: Atom,
}

impl ClassNameAtoms {
    pub fn new(strings: &mut Interner) -> Self {
        Self {
            nil: strings.intern("NilClass"),
            bool_: strings.intern("Bool"),
            integer: strings.intern("Integer"),
            float: strings.intern("Float"),
            string: strings.intern("String"),
            symbol: strings.intern("Symbol"),
        }
    }

    #[must_use]
    pub fn name_of(&self, kind: PrimitiveKind) -> Atom {
        match kind {
            PrimitiveKind::Nil => self.nil,
            PrimitiveKind::Bool => self.bool_,
            PrimitiveKind::Integer => self.integer,
            PrimitiveKind::Float => self.float,
            PrimitiveKind::String => self.string,
            PrimitiveKind::Symbol => self.symbol,
        }
    }
}

/// The class a method call against `ty` should be looked up against,
/// or `None` for shapes with no class identity (unions are resolved
/// member-by-member by the caller instead; type variables, `Untyped`
/// and `Bottom` have no method table to consult yet).
#[must_use]
pub fn class_name_of(interner: &TypeInterner, atoms: &ClassNameAtoms, ty: TypeId) -> Option<Atom> {
    match interner.lookup(ty) {
        TypeKey::Primitive(kind) => Some(atoms.name_of(*kind)),
        TypeKey::ClassInstance { class, .. } | TypeKey::ClassSingleton { class } => Some(*class),
        _ => None,
    }
}
