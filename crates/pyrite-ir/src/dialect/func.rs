//! Function dialect: function definitions, calls and returns.
//!
//! Function types are encoded as `func.fn(ret, params...)`: the first type
//! parameter is the single return type, the rest are parameter types.

use crate::types::{TypeDataBuilder, TypeInterner};
use crate::{dialect, symbols, Symbol, TypeRef};

dialect! {
    mod func {
        /// Function definition. The entry block of `body` carries the
        /// parameter values; `type` holds the `func.fn` signature.
        #[attr(sym_name: Symbol, r#type: Type, force_inline?: any, sym_visibility?: Symbol)]
        fn func() {
            #[region(body)] {}
        };

        /// Direct call to a symbol in the enclosing module.
        #[attr(callee: Symbol, force_inline?: any)]
        fn call(#[rest] args) -> #[rest] results;

        /// Indirect call through a function value.
        fn call_indirect(callee, #[rest] args) -> #[rest] results;

        /// Function terminator.
        fn r#return(#[rest] values);
    }
}

symbols! {
    SYM_PRIVATE => "private",
}

pub fn private_visibility() -> Symbol {
    *SYM_PRIVATE
}

// ============================================================================
// Function type helpers
// ============================================================================

pub fn fn_ty(
    types: &mut TypeInterner,
    ret: TypeRef,
    params: impl IntoIterator<Item = TypeRef>,
) -> TypeRef {
    types.intern(
        TypeDataBuilder::new(DIALECT_NAME(), Symbol::new("fn"))
            .param(ret)
            .params(params)
            .build(),
    )
}

pub fn is_fn_ty(types: &TypeInterner, ty: TypeRef) -> bool {
    types.is(ty, DIALECT_NAME(), Symbol::new("fn"))
}

pub fn fn_return_ty(types: &TypeInterner, ty: TypeRef) -> Option<TypeRef> {
    if !is_fn_ty(types, ty) {
        return None;
    }
    types.get(ty).params.first().copied()
}

pub fn fn_param_tys(types: &TypeInterner, ty: TypeRef) -> Option<Vec<TypeRef>> {
    if !is_fn_ty(types, ty) {
        return None;
    }
    Some(types.get(ty).params[1..].to_vec())
}
