//! The built-in method-rule table (§4.3), first in the resolution
//! order ahead of any declared class.
//!
//! Built-in rules are plain function pointers rather than declared
//! `MethodSignature`s because a handful of core methods compute their
//! return type from the actual argument types at the call site instead
//! of a fixed signature — most visibly the §9 open-question resolution
//! that `Integer#==`/`Float#==` compare by numeric value rather than
//! by declared class, so `5 == 5.0` type-checks and is `true`.

use konpeito_common::{Atom, Interner};
use konpeito_types::{TypeId, TypeInterner};
use rustc_hash::FxHashMap;

/// A single built-in method's arity and return-type rule.
pub struct BuiltinMethod {
    pub min_args: usize,
    pub max_args: Option<usize>,
    pub resolve: fn(receiver: TypeId, args: &[TypeId], interner: &mut TypeInterner) -> TypeId,
}

fn fixed(min: usize, max: Option<usize>, resolve: fn(TypeId, &[TypeId], &mut TypeInterner) -> TypeId) -> BuiltinMethod {
    BuiltinMethod { min_args: min, max_args: max, resolve }
}

fn returns_bool(_recv: TypeId, _args: &[TypeId], _interner: &mut TypeInterner) -> TypeId {
    TypeId::BOOL
}

fn returns_same_as_receiver(recv: TypeId, _args: &[TypeId], _interner: &mut TypeInterner) -> TypeId {
    recv
}

fn returns_string(_recv: TypeId, _args: &[TypeId], _interner: &mut TypeInterner) -> TypeId {
    TypeId::STRING
}

/// `Integer#+`/`Float#+` etc.: numeric widening means mixing `Integer`
/// and `Float` operands produces `Float`, matching the unifier's own
/// numeric-widening rule (§4.2).
fn numeric_arithmetic(recv: TypeId, args: &[TypeId], _interner: &mut TypeInterner) -> TypeId {
    let other = args.first().copied().unwrap_or(recv);
    if recv == TypeId::FLOAT || other == TypeId::FLOAT {
        TypeId::FLOAT
    } else {
        TypeId::INTEGER
    }
}

/// Build the built-in rule table, interning every class/method name it
/// refers to via `strings`.
pub fn builtin_table(strings: &mut Interner) -> FxHashMap<(Atom, Atom), BuiltinMethod> {
    let mut table = FxHashMap::default();
    let integer = strings.intern("Integer");
    let float = strings.intern("Float");
    let string = strings.intern("String");
    let bool_class = strings.intern("Bool");
    let nil_class = strings.intern("NilClass");

    let add = strings.intern("+");
    let sub = strings.intern("-");
    let mul = strings.intern("*");
    let div = strings.intern("/");
    let eq = strings.intern("==");
    let neq = strings.intern("!=");
    let lt = strings.intern("<");
    let lte = strings.intern("<=");
    let gt = strings.intern(">");
    let gte = strings.intern(">=");
    let to_s = strings.intern("to_s");
    let nil_p = strings.intern("nil?");

    for class in [integer, float] {
        table.insert((class, add), fixed(1, Some(1), numeric_arithmetic));
        table.insert((class, sub), fixed(1, Some(1), numeric_arithmetic));
        table.insert((class, mul), fixed(1, Some(1), numeric_arithmetic));
        table.insert((class, div), fixed(1, Some(1), numeric_arithmetic));
        // Numeric-value equality (§9 open question): compares by value
        // across `Integer`/`Float`, not by declared class, so this
        // built-in rule exists independent of the unifier's
        // structural-equality notion.
        table.insert((class, eq), fixed(1, Some(1), returns_bool));
        table.insert((class, neq), fixed(1, Some(1), returns_bool));
        table.insert((class, lt), fixed(1, Some(1), returns_bool));
        table.insert((class, lte), fixed(1, Some(1), returns_bool));
        table.insert((class, gt), fixed(1, Some(1), returns_bool));
        table.insert((class, gte), fixed(1, Some(1), returns_bool));
        table.insert((class, to_s), fixed(0, Some(0), returns_string));
        table.insert((class, nil_p), fixed(0, Some(0), returns_bool));
    }

    table.insert((string, add), fixed(1, Some(1), returns_same_as_receiver));
    table.insert((string, eq), fixed(1, Some(1), returns_bool));
    table.insert((string, to_s), fixed(0, Some(0), returns_same_as_receiver));
    table.insert((string, nil_p), fixed(0, Some(0), returns_bool));

    table.insert((bool_class, nil_p), fixed(0, Some(0), returns_bool));
    table.insert((nil_class, nil_p), fixed(0, Some(0), returns_bool));
    table.insert((nil_class, to_s), fixed(0, Some(0), returns_string));

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_numeric_arithmetic_widens_to_float() {
        let mut strings = Interner::new();
        let table = builtin_table(&mut strings);
        let integer = strings.intern("Integer");
        let add = strings.intern("+");
        let rule = &table[&(integer, add)];
        let mut types = TypeInterner::new();
        assert_eq!((rule.resolve)(TypeId::INTEGER, &[TypeId::FLOAT], &mut types), TypeId::FLOAT);
        assert_eq!((rule.resolve)(TypeId::INTEGER, &[TypeId::INTEGER], &mut types), TypeId::INTEGER);
    }

    #[test]
    fn equality_is_registered_for_both_integer_and_float() {
        let mut strings = Interner::new();
        let table = builtin_table(&mut strings);
        let integer = strings.intern("Integer");
        let float = strings.intern("Float");
        let eq = strings.intern("==");
        assert!(table.contains_key(&(integer, eq)));
        assert!(table.contains_key(&(float, eq)));
    }
}
