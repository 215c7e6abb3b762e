//! The `plier-to-std` pass assembly.
//!
//! Builds the type converter (ingestion type descriptions to concrete
//! scalar types), the dynamic legality rules and the pattern set, then
//! runs a partial conversion. Call resolution and forced inlining run as
//! follow-up stages, mirroring the lowering pipeline order:
//! canonicalize, convert, canonicalize, resolve calls, force-inline,
//! symbol-DCE, canonicalize.

use pyrite_ir::dialect::core::{self, Signedness};
use pyrite_ir::dialect::plier;
use pyrite_ir::rewrite::{
    apply_partial_conversion, ConversionPattern, ConversionTarget, Legality, ModuleRef,
    PatternApplicator, TypeConverter,
};
use pyrite_ir::{transforms, IrContext, Symbol, TypeInterner, TypeRef};
use thiserror::Error;
use tracing::info;

use crate::binop::{self, BinOpLowering, InplaceBinOpLowering};
use crate::calls::{lower_calls, ExternalSymbols, LibraryResolver};
use crate::literals::{
    ArgLowering, CastLowering, ConstLowering, GlobalLowering, LiteralLowering,
    OmittedLowering, UndefLowering,
};
use crate::tuples::{BuildTupleLowering, GetItemTupleLowering, TupleConcatLowering};
use crate::unary::UnaryOpLowering;

/// Failure of the high-level lowering pipeline.
#[derive(Debug, Error)]
pub enum PassError {
    #[error(transparent)]
    ForceInline(#[from] transforms::ForceInlineError),
}

// ============================================================================
// Ingestion type descriptions
// ============================================================================

fn desc_to_type(types: &mut TypeInterner, desc: &str) -> Option<TypeRef> {
    Some(match desc {
        "bool" => core::bool_ty(types),
        "int8" => core::int_ty(types, 8, Signedness::Signed),
        "int16" => core::int_ty(types, 16, Signedness::Signed),
        "int32" => core::int_ty(types, 32, Signedness::Signed),
        "int64" => core::int_ty(types, 64, Signedness::Signed),
        "uint8" => core::int_ty(types, 8, Signedness::Unsigned),
        "uint16" => core::int_ty(types, 16, Signedness::Unsigned),
        "uint32" => core::int_ty(types, 32, Signedness::Unsigned),
        "uint64" => core::int_ty(types, 64, Signedness::Unsigned),
        "float16" => core::float_ty(types, 16),
        "float32" => core::float_ty(types, 32),
        "float64" => core::float_ty(types, 64),
        "complex64" => {
            let f32_ty = core::float_ty(types, 32);
            core::complex_ty(types, f32_ty)
        }
        "complex128" => {
            let f64_ty = core::float_ty(types, 64);
            core::complex_ty(types, f64_ty)
        }
        "intp" | "index" => core::index_ty(types),
        "none" => core::none_ty(types),
        _ => return None,
    })
}

fn desc_is_numeric(desc: &str) -> bool {
    matches!(
        desc,
        "bool"
            | "int8"
            | "int16"
            | "int32"
            | "int64"
            | "uint8"
            | "uint16"
            | "uint32"
            | "uint64"
            | "float16"
            | "float32"
            | "float64"
            | "complex64"
            | "complex128"
            | "intp"
            | "index"
    )
}

/// The `plier-to-std` type converter: ingestion tokens to concrete scalars.
pub fn std_type_converter() -> TypeConverter {
    let mut converter = TypeConverter::new();
    converter.add_conversion(|types, ty| {
        let desc = plier::pyobj_desc(types, ty)?;
        desc_to_type(types, &desc)
    });
    converter
}

/// Does `ty` convert to a numeric scalar under the std converter?
fn converts_to_num(types: &TypeInterner, ty: TypeRef) -> bool {
    if binop::is_supported(types, ty) {
        return true;
    }
    plier::pyobj_desc(types, ty).is_some_and(|desc| desc_is_numeric(&desc))
}

fn converts_to_none_or_typevar(types: &TypeInterner, ty: TypeRef) -> bool {
    core::is_none(types, ty)
        || plier::is_typevar(types, ty)
        || plier::pyobj_desc(types, ty).is_some_and(|desc| desc == "none")
}

// ============================================================================
// Legality
// ============================================================================

/// Dynamic legality for the `plier-to-std` conversion.
pub fn std_conversion_target() -> ConversionTarget {
    let mut target = ConversionTarget::new();
    target.add_legal_dialect("arith");
    target.add_legal_dialect("math");
    target.add_legal_dialect("cmplx");
    target.add_legal_op("util", "build_tuple");
    target.add_legal_op("util", "tuple_extract");

    target.add_dynamic_check(|ctx, op| {
        let data = ctx.op(op);
        if data.dialect != Symbol::new("plier") && data.dialect != Symbol::new("util") {
            return None;
        }
        let types = &ctx.types;
        let name = data.name;

        if name == Symbol::new("binop") || name == Symbol::new("inplace_binop") {
            let operands = ctx.op_operands(op);
            let lhs_ty = ctx.value_ty(operands[0]);
            let rhs_ty = ctx.value_ty(operands[1]);
            let res_ty = ctx.op_result_types(op)[0];
            let token = data
                .attributes
                .get(&Symbol::new("op"))
                .and_then(|a| a.as_string().map(str::to_owned));
            if token.as_deref() == Some("+")
                && core::is_tuple(types, lhs_ty)
                && core::is_tuple(types, rhs_ty)
            {
                return Some(Legality::Illegal);
            }
            let lower = converts_to_num(types, lhs_ty)
                && converts_to_num(types, rhs_ty)
                && converts_to_num(types, res_ty);
            return Some(if lower {
                Legality::Illegal
            } else {
                Legality::Legal
            });
        }

        if name == Symbol::new("unaryop") {
            let val_ty = ctx.value_ty(ctx.op_operands(op)[0]);
            let res_ty = ctx.op_result_types(op)[0];
            let lower = converts_to_num(types, val_ty) && converts_to_num(types, res_ty);
            return Some(if lower {
                Legality::Illegal
            } else {
                Legality::Legal
            });
        }

        if name == Symbol::new("cast") && data.dialect == Symbol::new("plier") {
            let src_ty = ctx.value_ty(ctx.op_operands(op)[0]);
            let res_ty = ctx.op_result_types(op)[0];
            if plier::is_omitted(types, src_ty) {
                return Some(Legality::Illegal);
            }
            if src_ty == res_ty {
                return Some(Legality::Illegal);
            }
            let lower = converts_to_num(types, src_ty) && converts_to_num(types, res_ty);
            return Some(if lower {
                Legality::Illegal
            } else {
                Legality::Legal
            });
        }

        if name == Symbol::new("const") && data.dialect == Symbol::new("plier") {
            let res_ty = ctx.op_result_types(op)[0];
            let lower = converts_to_num(types, res_ty)
                || converts_to_none_or_typevar(types, res_ty);
            return Some(if lower {
                Legality::Illegal
            } else {
                Legality::Legal
            });
        }

        if name == Symbol::new("global") {
            let res_ty = ctx.op_result_types(op)[0];
            let known = data
                .attributes
                .get(&Symbol::new("name"))
                .and_then(|a| a.as_string().map(str::to_owned))
                .is_some_and(|n| n == "math.pi" || n == "math.e");
            let lower = known || converts_to_none_or_typevar(types, res_ty);
            return Some(if lower {
                Legality::Illegal
            } else {
                Legality::Legal
            });
        }

        if name == Symbol::new("getitem") {
            let container_ty = ctx.value_ty(ctx.op_operands(op)[0]);
            return Some(if core::is_tuple(types, container_ty) {
                Legality::Illegal
            } else {
                Legality::Legal
            });
        }

        if name == Symbol::new("build_tuple") && data.dialect == Symbol::new("plier") {
            return Some(Legality::Illegal);
        }

        if name == Symbol::new("arg") {
            return Some(Legality::Illegal);
        }

        if name == Symbol::new("undef") {
            // util.undef over a convertible type must retype.
            let res_ty = ctx.op_result_types(op)[0];
            return Some(if plier::is_pyobj(types, res_ty) {
                Legality::Illegal
            } else {
                Legality::Legal
            });
        }

        None
    });

    target
}

fn std_patterns() -> Vec<Box<dyn ConversionPattern>> {
    vec![
        Box::new(TupleConcatLowering),
        Box::new(BinOpLowering),
        Box::new(InplaceBinOpLowering),
        Box::new(UnaryOpLowering),
        Box::new(OmittedLowering),
        Box::new(CastLowering),
        Box::new(ConstLowering),
        Box::new(LiteralLowering { root_op: "cast" }),
        Box::new(LiteralLowering { root_op: "global" }),
        Box::new(GlobalLowering),
        Box::new(UndefLowering),
        Box::new(BuildTupleLowering),
        Box::new(GetItemTupleLowering),
        Box::new(ArgLowering),
    ]
}

/// Fold/cleanup sweep between stages.
pub fn canonicalize(ctx: &mut IrContext, module: ModuleRef) {
    let mut applicator = PatternApplicator::new();
    applicator.apply(ctx, module);
}

/// Run the high-level scalar conversion on `module` (partial mode).
pub fn plier_to_std(ctx: &mut IrContext, module: ModuleRef) {
    let converter = std_type_converter();
    let target = std_conversion_target();
    let result = apply_partial_conversion(ctx, module, &target, &converter, std_patterns());
    info!(
        changes = result.total_changes,
        iterations = result.iterations,
        "plier-to-std conversion finished",
    );
}

/// The full high-level lowering stage: canonicalize, convert, resolve
/// calls, force-inline, sweep dead symbols, canonicalize.
pub fn run_plier_to_std_stage(
    ctx: &mut IrContext,
    module: ModuleRef,
    library: Option<&dyn LibraryResolver>,
    externals: Option<&dyn ExternalSymbols>,
) -> Result<(), PassError> {
    canonicalize(ctx, module);
    plier_to_std(ctx, module);
    canonicalize(ctx, module);
    lower_calls(ctx, module, library, externals);
    transforms::force_inline(ctx, module)?;
    transforms::eliminate_dead_symbols(ctx, module);
    canonicalize(ctx, module);
    Ok(())
}
