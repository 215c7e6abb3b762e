//! Core dialect: the module op, the materialization cast, and the builtin
//! scalar type constructors.

use crate::types::{Attribute, TypeDataBuilder, TypeInterner};
use crate::{dialect, symbols, Symbol, TypeRef};

dialect! {
    mod core {
        /// Top-level container for symbol-visible definitions.
        #[attr(sym_name: Symbol)]
        fn module() {
            #[region(body)] {}
        };

        /// Type-bridge cast inserted by the conversion framework. Carries no
        /// semantics of its own and must be resolved before lowering ends.
        fn unrealized_cast(value) -> result;
    }
}

symbols! {
    ATTR_WIDTH => "width",
    ATTR_SIGNEDNESS => "signedness",
    SYM_SIGNED => "signed",
    SYM_UNSIGNED => "unsigned",
    SYM_SIGNLESS => "signless",
    ATTR_COUNT => "count",
}

/// Signedness of a `core.int` type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signedness {
    Signed,
    Unsigned,
    Signless,
}

impl Signedness {
    pub fn symbol(self) -> Symbol {
        match self {
            Signedness::Signed => *SYM_SIGNED,
            Signedness::Unsigned => *SYM_UNSIGNED,
            Signedness::Signless => *SYM_SIGNLESS,
        }
    }

    pub fn from_symbol(sym: Symbol) -> Option<Self> {
        if sym == *SYM_SIGNED {
            Some(Signedness::Signed)
        } else if sym == *SYM_UNSIGNED {
            Some(Signedness::Unsigned)
        } else if sym == *SYM_SIGNLESS {
            Some(Signedness::Signless)
        } else {
            None
        }
    }
}

// ============================================================================
// Type constructors
// ============================================================================

pub fn int_ty(types: &mut TypeInterner, width: u32, signedness: Signedness) -> TypeRef {
    types.intern(
        TypeDataBuilder::new(DIALECT_NAME(), Symbol::new("int"))
            .attr(*ATTR_WIDTH, Attribute::int(width as i64))
            .attr(*ATTR_SIGNEDNESS, Attribute::Symbol(signedness.symbol()))
            .build(),
    )
}

pub fn signless(types: &mut TypeInterner, width: u32) -> TypeRef {
    int_ty(types, width, Signedness::Signless)
}

/// `i1`, used for predicates.
pub fn bool_ty(types: &mut TypeInterner) -> TypeRef {
    signless(types, 1)
}

pub fn float_ty(types: &mut TypeInterner, width: u32) -> TypeRef {
    types.intern(
        TypeDataBuilder::new(DIALECT_NAME(), Symbol::new("float"))
            .attr(*ATTR_WIDTH, Attribute::int(width as i64))
            .build(),
    )
}

pub fn index_ty(types: &mut TypeInterner) -> TypeRef {
    types.intern(TypeDataBuilder::new(DIALECT_NAME(), Symbol::new("index")).build())
}

pub fn none_ty(types: &mut TypeInterner) -> TypeRef {
    types.intern(TypeDataBuilder::new(DIALECT_NAME(), Symbol::new("none")).build())
}

pub fn complex_ty(types: &mut TypeInterner, elem: TypeRef) -> TypeRef {
    types.intern(
        TypeDataBuilder::new(DIALECT_NAME(), Symbol::new("complex"))
            .param(elem)
            .build(),
    )
}

pub fn tuple_ty(types: &mut TypeInterner, elems: impl IntoIterator<Item = TypeRef>) -> TypeRef {
    types.intern(
        TypeDataBuilder::new(DIALECT_NAME(), Symbol::new("tuple"))
            .params(elems)
            .build(),
    )
}

/// Fixed-width vector type, `core.vec(elem) {count}`.
pub fn vec_ty(types: &mut TypeInterner, elem: TypeRef, count: u32) -> TypeRef {
    types.intern(
        TypeDataBuilder::new(DIALECT_NAME(), Symbol::new("vec"))
            .param(elem)
            .attr(*ATTR_COUNT, Attribute::int(count as i64))
            .build(),
    )
}

// ============================================================================
// Type queries
// ============================================================================

pub fn is_int(types: &TypeInterner, ty: TypeRef) -> bool {
    types.is(ty, DIALECT_NAME(), Symbol::new("int"))
}

pub fn is_float(types: &TypeInterner, ty: TypeRef) -> bool {
    types.is(ty, DIALECT_NAME(), Symbol::new("float"))
}

pub fn is_complex(types: &TypeInterner, ty: TypeRef) -> bool {
    types.is(ty, DIALECT_NAME(), Symbol::new("complex"))
}

pub fn is_index(types: &TypeInterner, ty: TypeRef) -> bool {
    types.is(ty, DIALECT_NAME(), Symbol::new("index"))
}

pub fn is_none(types: &TypeInterner, ty: TypeRef) -> bool {
    types.is(ty, DIALECT_NAME(), Symbol::new("none"))
}

pub fn is_tuple(types: &TypeInterner, ty: TypeRef) -> bool {
    types.is(ty, DIALECT_NAME(), Symbol::new("tuple"))
}

pub fn int_width(types: &TypeInterner, ty: TypeRef) -> Option<u32> {
    if !is_int(types, ty) {
        return None;
    }
    types.int_attr(ty, *ATTR_WIDTH).map(|w| w as u32)
}

pub fn float_width(types: &TypeInterner, ty: TypeRef) -> Option<u32> {
    if !is_float(types, ty) {
        return None;
    }
    types.int_attr(ty, *ATTR_WIDTH).map(|w| w as u32)
}

pub fn signedness(types: &TypeInterner, ty: TypeRef) -> Option<Signedness> {
    if !is_int(types, ty) {
        return None;
    }
    types
        .symbol_attr(ty, *ATTR_SIGNEDNESS)
        .and_then(Signedness::from_symbol)
}

pub fn is_signless(types: &TypeInterner, ty: TypeRef) -> bool {
    signedness(types, ty) == Some(Signedness::Signless)
}

/// Strip signedness: `core.int {w, signed|unsigned}` -> `core.int {w, signless}`.
pub fn make_signless(types: &mut TypeInterner, ty: TypeRef) -> TypeRef {
    match (int_width(types, ty), signedness(types, ty)) {
        (Some(w), Some(s)) if s != Signedness::Signless => {
            int_ty(types, w, Signedness::Signless)
        }
        _ => ty,
    }
}

pub fn complex_elem(types: &TypeInterner, ty: TypeRef) -> Option<TypeRef> {
    if !is_complex(types, ty) {
        return None;
    }
    types.get(ty).params.first().copied()
}

pub fn tuple_elems(types: &TypeInterner, ty: TypeRef) -> Option<Vec<TypeRef>> {
    if !is_tuple(types, ty) {
        return None;
    }
    Some(types.get(ty).params.to_vec())
}

pub fn is_vec(types: &TypeInterner, ty: TypeRef) -> bool {
    types.is(ty, DIALECT_NAME(), Symbol::new("vec"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_type_round_trip() {
        let mut types = TypeInterner::new();
        let u16_ty = int_ty(&mut types, 16, Signedness::Unsigned);
        assert!(is_int(&types, u16_ty));
        assert_eq!(int_width(&types, u16_ty), Some(16));
        assert_eq!(signedness(&types, u16_ty), Some(Signedness::Unsigned));
        assert!(!is_signless(&types, u16_ty));
    }

    #[test]
    fn make_signless_is_idempotent() {
        let mut types = TypeInterner::new();
        let s = int_ty(&mut types, 32, Signedness::Signed);
        let sl = make_signless(&mut types, s);
        assert_ne!(s, sl);
        assert!(is_signless(&types, sl));
        assert_eq!(make_signless(&mut types, sl), sl);
    }

    #[test]
    fn tuple_elems_round_trip() {
        let mut types = TypeInterner::new();
        let f32_ty = float_ty(&mut types, 32);
        let idx = index_ty(&mut types);
        let tup = tuple_ty(&mut types, [f32_ty, idx]);
        assert_eq!(tuple_elems(&types, tup), Some(vec![f32_ty, idx]));
        assert!(tuple_elems(&types, f32_ty).is_none());
    }

    #[test]
    fn float_is_not_int() {
        let mut types = TypeInterner::new();
        let f64_ty = float_ty(&mut types, 64);
        assert!(is_float(&types, f64_ty));
        assert_eq!(int_width(&types, f64_ty), None);
        assert_eq!(signedness(&types, f64_ty), None);
    }
}
