//! Plier: the dynamically typed ingestion dialect.
//!
//! Produced by the program-ingestion front end. Operand and result types are
//! either concrete (when the front end inferred them) or `plier.pyobj`
//! tokens carrying the ingestion-time type description. The high-level
//! lowering converts everything here into standard arithmetic.

use crate::types::{Attribute, TypeDataBuilder, TypeInterner};
use crate::{dialect, symbols, Symbol, TypeRef};

dialect! {
    mod plier {
        /// Function argument placeholder, resolved against the entry block.
        #[attr(index: u64, name: str)]
        fn arg() -> result;

        /// Python-level constant (int/float/complex/none literal).
        #[attr(value: any)]
        fn r#const() -> result;

        /// Load of a global name (e.g. `math.pi`).
        #[attr(name: str)]
        fn global() -> result;

        /// Binary operator with a Python opcode string: `+ - * ** / // % &
        /// | ^ << >> < <= > >= == !=`.
        #[attr(op: str)]
        fn binop(lhs, rhs) -> result;

        /// In-place variant (`a += b`); same lowering as `binop`.
        #[attr(op: str)]
        fn inplace_binop(lhs, rhs) -> result;

        /// Unary operator: `+ - not ~`.
        #[attr(op: str)]
        fn unaryop(value) -> result;

        /// Dynamic cast between ingestion-level types.
        fn cast(value) -> result;

        /// Call of a Python-level callable by name.
        #[attr(func_name: str)]
        fn pycall(#[rest] args) -> result;

        fn build_tuple(#[rest] args) -> result;

        fn getitem(value, index) -> result;

        fn setitem(target, index, value);

        #[attr(name: str)]
        fn getattr(value) -> result;

        /// Slice literal `slice(begin, end, stride)`.
        fn build_slice(begin, end, stride) -> result;
    }
}

symbols! {
    ATTR_DESC => "desc",
    ATTR_DEFAULT => "default",
}

// ============================================================================
// Ingestion-level types
// ============================================================================

/// Opaque ingestion type token carrying the textual type description.
pub fn pyobj_ty(types: &mut TypeInterner, desc: &str) -> TypeRef {
    types.intern(
        TypeDataBuilder::new(DIALECT_NAME(), Symbol::new("pyobj"))
            .attr(*ATTR_DESC, Attribute::String(desc.to_owned()))
            .build(),
    )
}

/// Type of an omitted argument; `default` is the constant to substitute.
pub fn omitted_ty(types: &mut TypeInterner, default: Attribute) -> TypeRef {
    types.intern(
        TypeDataBuilder::new(DIALECT_NAME(), Symbol::new("omitted"))
            .attr(*ATTR_DEFAULT, default)
            .build(),
    )
}

/// Type-variable literal type (a first-class type value).
pub fn typevar_ty(types: &mut TypeInterner, inner: TypeRef) -> TypeRef {
    types.intern(
        TypeDataBuilder::new(DIALECT_NAME(), Symbol::new("typevar"))
            .param(inner)
            .build(),
    )
}

/// The undefined type, for values with no runtime representation.
pub fn undefined_ty(types: &mut TypeInterner) -> TypeRef {
    types.intern(TypeDataBuilder::new(DIALECT_NAME(), Symbol::new("undefined")).build())
}

pub fn is_pyobj(types: &TypeInterner, ty: TypeRef) -> bool {
    types.is(ty, DIALECT_NAME(), Symbol::new("pyobj"))
}

pub fn is_omitted(types: &TypeInterner, ty: TypeRef) -> bool {
    types.is(ty, DIALECT_NAME(), Symbol::new("omitted"))
}

pub fn is_typevar(types: &TypeInterner, ty: TypeRef) -> bool {
    types.is(ty, DIALECT_NAME(), Symbol::new("typevar"))
}

pub fn is_undefined(types: &TypeInterner, ty: TypeRef) -> bool {
    types.is(ty, DIALECT_NAME(), Symbol::new("undefined"))
}

pub fn pyobj_desc(types: &TypeInterner, ty: TypeRef) -> Option<String> {
    if !is_pyobj(types, ty) {
        return None;
    }
    types
        .get(ty)
        .attrs
        .get(&*ATTR_DESC)
        .and_then(|a| a.as_string().map(str::to_owned))
}

pub fn omitted_default(types: &TypeInterner, ty: TypeRef) -> Option<Attribute> {
    if !is_omitted(types, ty) {
        return None;
    }
    types.get(ty).attrs.get(&*ATTR_DEFAULT).cloned()
}
