//! Constant, literal, global and cast lowering.
//!
//! Lowerings for the ingestion-level literals: Python constants become signless
//! `arith.const` (plus a sign cast for declared-signed types), `none` and
//! type-variable literals become `util.undef`, omitted arguments are
//! replaced by their default constants at cast sites, the well-known math
//! globals resolve to f64 constants, and remaining dynamic casts are
//! spelled out with `do_convert`.

use pyrite_ir::dialect::core;
use pyrite_ir::dialect::{plier, util};
use pyrite_ir::rewrite::{ConversionPattern, PatternRewriter, TypeConverter};
use pyrite_ir::types::Attribute;
use pyrite_ir::{DialectOp, IrContext, OpBuilder, OpRef, Symbol, TypeRef, ValueRef};

use crate::cast;

fn emit_and_erase(
    b: OpBuilder<'_>,
    out: ValueRef,
    rewriter: &mut PatternRewriter,
) -> bool {
    for emitted in b.into_ops() {
        rewriter.insert_op(emitted);
    }
    rewriter.erase_op(vec![out]);
    true
}

/// Build a constant of `expected` from a Python literal attribute.
///
/// Non-signless integer constants are emitted as a signless constant
/// followed by a sign cast to the declared type.
fn materialize_const(
    b: &mut OpBuilder<'_>,
    value: &Attribute,
    expected: TypeRef,
) -> Option<ValueRef> {
    if core::is_int(&b.ctx.types, expected) {
        let bits = match value {
            Attribute::IntBits(bits) => *bits,
            Attribute::Bool(v) => *v as u64,
            _ => return None,
        };
        let signless = core::make_signless(&mut b.ctx.types, expected);
        let v = {
            let signless_bits = bits;
            let c = pyrite_ir::dialect::arith::r#const(
                b.ctx,
                b.loc,
                signless,
                Attribute::IntBits(signless_bits),
            );
            b.track(c).result(b.ctx)
        };
        if signless != expected {
            let sc = util::sign_cast(b.ctx, b.loc, v, expected);
            return Some(b.track(sc).result(b.ctx));
        }
        return Some(v);
    }
    if core::is_float(&b.ctx.types, expected) {
        let f = value.as_float()?;
        return Some(b.const_float(expected, f));
    }
    if core::is_index(&b.ctx.types, expected) {
        let v = value.as_int()?;
        return Some(b.const_int(expected, v));
    }
    if let Some(elem) = core::complex_elem(&b.ctx.types, expected) {
        // Complex literals carry [re, im].
        if let Attribute::List(items) = value {
            if items.len() == 2 {
                let re_v = items[0].as_float()?;
                let im_v = items[1].as_float()?;
                let re = b.const_float(elem, re_v);
                let im = b.const_float(elem, im_v);
                let op = pyrite_ir::dialect::cmplx::create(b.ctx, b.loc, re, im, expected);
                return Some(b.track(op).result(b.ctx));
            }
        }
        return None;
    }
    None
}

/// `plier.const` with a convertible result type.
pub struct ConstLowering;

impl ConversionPattern for ConstLowering {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("plier"), Symbol::new("const")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(const_op) = plier::Const::from_op(ctx, op) else {
            return false;
        };
        let orig_result_ty = ctx.op_result_types(op)[0];
        let expected = converter.convert_type_or_self(&mut ctx.types, orig_result_ty);

        if core::is_none(&ctx.types, expected) {
            let loc = ctx.op(op).location;
            let mut b = OpBuilder::new(ctx, loc);
            let undef = util::undef(b.ctx, b.loc, expected);
            let out = b.track(undef).result(b.ctx);
            return emit_and_erase(b, out, rewriter);
        }

        let value = const_op.value(ctx);
        let loc = ctx.op(op).location;
        let mut b = OpBuilder::new(ctx, loc);
        let Some(out) = materialize_const(&mut b, &value, expected) else {
            return false;
        };
        emit_and_erase(b, out, rewriter)
    }

    fn name(&self) -> &'static str {
        "ConstLowering"
    }
}

/// `plier.cast` / `plier.global` whose converted result is `none` or a
/// type-variable: the value has no runtime representation.
pub struct LiteralLowering {
    pub root_op: &'static str,
}

impl ConversionPattern for LiteralLowering {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("plier"), Symbol::new(self.root_op)))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let result_ty = ctx.op_result_types(op)[0];
        let converted = converter.convert_type_or_self(&mut ctx.types, result_ty);
        if !core::is_none(&ctx.types, converted) && !plier::is_typevar(&ctx.types, converted)
        {
            return false;
        }
        let loc = ctx.op(op).location;
        let mut b = OpBuilder::new(ctx, loc);
        let undef = util::undef(b.ctx, b.loc, converted);
        let out = b.track(undef).result(b.ctx);
        emit_and_erase(b, out, rewriter)
    }

    fn name(&self) -> &'static str {
        "LiteralLowering"
    }
}

/// `plier.cast` from an omitted-typed value: substitute the default.
pub struct OmittedLowering;

impl ConversionPattern for OmittedLowering {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("plier"), Symbol::new("cast")))
    }

    fn benefit(&self) -> u16 {
        // Must win over the generic cast lowering.
        2
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(cast_op) = plier::Cast::from_op(ctx, op) else {
            return false;
        };
        let input_ty = ctx.value_ty(cast_op.value(ctx));
        let Some(default) = plier::omitted_default(&ctx.types, input_ty) else {
            return false;
        };
        let orig_result_ty = ctx.op_result_types(op)[0];
        let expected = converter.convert_type_or_self(&mut ctx.types, orig_result_ty);

        let loc = ctx.op(op).location;
        let mut b = OpBuilder::new(ctx, loc);
        let Some(out) = materialize_const(&mut b, &default, expected) else {
            return false;
        };
        emit_and_erase(b, out, rewriter)
    }

    fn name(&self) -> &'static str {
        "OmittedLowering"
    }
}

/// Well-known module constants.
pub struct GlobalLowering;

impl ConversionPattern for GlobalLowering {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("plier"), Symbol::new("global")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        _converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(global) = plier::Global::from_op(ctx, op) else {
            return false;
        };
        let value = match global.name(ctx).as_str() {
            "math.pi" => std::f64::consts::PI,
            "math.e" => std::f64::consts::E,
            _ => return false,
        };
        let loc = ctx.op(op).location;
        let mut b = OpBuilder::new(ctx, loc);
        let f64_ty = core::float_ty(&mut b.ctx.types, 64);
        let out = b.const_float(f64_ty, value);
        emit_and_erase(b, out, rewriter)
    }

    fn name(&self) -> &'static str {
        "GlobalLowering"
    }
}

/// Retype `util.undef` results whose type converts.
pub struct UndefLowering;

impl ConversionPattern for UndefLowering {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("util"), Symbol::new("undef")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let old_ty = ctx.op_result_types(op)[0];
        let Some(new_ty) = converter.convert_type(&mut ctx.types, old_ty) else {
            return false;
        };
        if new_ty == old_ty {
            return false;
        }
        let loc = ctx.op(op).location;
        let new_op = util::undef(ctx, loc, new_ty);
        rewriter.replace_op(new_op.op_ref());
        true
    }

    fn name(&self) -> &'static str {
        "UndefLowering"
    }
}

/// Generic `plier.cast` between numeric types.
pub struct CastLowering;

impl ConversionPattern for CastLowering {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("plier"), Symbol::new("cast")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(cast_op) = plier::Cast::from_op(ctx, op) else {
            return false;
        };
        let src = cast_op.value(ctx);
        let orig_result_ty = ctx.op_result_types(op)[0];
        let dst_ty = converter.convert_type_or_self(&mut ctx.types, orig_result_ty);

        if ctx.value_ty(src) == dst_ty {
            rewriter.erase_op(vec![src]);
            return true;
        }

        let loc = ctx.op(op).location;
        let mut b = OpBuilder::new(ctx, loc);
        let Some(out) = cast::do_convert(&mut b, src, dst_ty) else {
            return false;
        };
        emit_and_erase(b, out, rewriter)
    }

    fn name(&self) -> &'static str {
        "CastLowering"
    }
}

/// `plier.arg` resolves to the surrounding function's entry block argument.
pub struct ArgLowering;

impl ConversionPattern for ArgLowering {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("plier"), Symbol::new("arg")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        _converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(arg_op) = plier::Arg::from_op(ctx, op) else {
            return false;
        };
        let index = arg_op.index(ctx) as u32;
        let func_op = ctx.ancestor_op(op, |ctx, candidate| {
            pyrite_ir::dialect::func::Func::matches(ctx, candidate)
        });
        let Some(func_op) = func_op else {
            return false;
        };
        let body = ctx.op(func_op).regions[0];
        let Some(entry) = ctx.entry_block(body) else {
            return false;
        };
        if index as usize >= ctx.block_args(entry).len() {
            return false;
        }
        let arg = ctx.block_arg(entry, index);
        rewriter.erase_op(vec![arg]);
        true
    }

    fn name(&self) -> &'static str {
        "ArgLowering"
    }
}
