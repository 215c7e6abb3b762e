//! Unary operator lowering: `+ - not ~`.

use pyrite_ir::dialect::core;
use pyrite_ir::dialect::{arith, cmplx, plier, util};
use pyrite_ir::rewrite::{ConversionPattern, PatternRewriter, TypeConverter};
use pyrite_ir::{DialectOp, IrContext, OpBuilder, OpRef, Symbol, TypeRef, ValueRef};

use crate::binop::is_supported;
use crate::cast;

/// Negation: `0 - x` on the signless integer carrier, `negf` on floats,
/// complex negate on complex.
fn negate(b: &mut OpBuilder<'_>, val: ValueRef, res_ty: TypeRef) -> Option<ValueRef> {
    let val = cast::do_convert(b, val, res_ty)?;
    if core::is_int(&b.ctx.types, res_ty) {
        let signless = core::make_signless(&mut b.ctx.types, res_ty);
        let v = cast::to_signless(b, val);
        let zero = b.const_int(signless, 0);
        let sub = arith::subi(b.ctx, b.loc, zero, v, signless);
        let v = b.track(sub).result(b.ctx);
        return cast::do_convert(b, v, res_ty);
    }
    if core::is_float(&b.ctx.types, res_ty) {
        let op = arith::negf(b.ctx, b.loc, val, res_ty);
        return Some(b.track(op).result(b.ctx));
    }
    if core::is_complex(&b.ctx.types, res_ty) {
        let op = cmplx::neg(b.ctx, b.loc, val, res_ty);
        return Some(b.track(op).result(b.ctx));
    }
    None
}

fn unary_plus(b: &mut OpBuilder<'_>, val: ValueRef, res_ty: TypeRef) -> Option<ValueRef> {
    cast::do_convert(b, val, res_ty)
}

/// `not x`: compare to zero, i.e. `1 - bool(x)`.
fn unary_not(b: &mut OpBuilder<'_>, val: ValueRef, _res_ty: TypeRef) -> Option<ValueRef> {
    let i1 = core::bool_ty(&mut b.ctx.types);
    let v = cast::do_convert(b, val, i1)?;
    let one = b.const_int(i1, 1);
    let sub = arith::subi(b.ctx, b.loc, one, v, i1);
    Some(b.track(sub).result(b.ctx))
}

/// `~x`: XOR with all-ones; bool widens to `i64` first.
fn unary_invert(b: &mut OpBuilder<'_>, val: ValueRef, res_ty: TypeRef) -> Option<ValueRef> {
    let src_ty = b.ctx.value_ty(val);
    let width = core::int_width(&b.ctx.types, src_ty)?;

    let (mut v, work_ty, orig_ty) = if width == 1 {
        let i64_ty = core::signless(&mut b.ctx.types, 64);
        let ext = arith::extui(b.ctx, b.loc, val, i64_ty);
        (b.track(ext).result(b.ctx), i64_ty, i64_ty)
    } else {
        let signless = core::make_signless(&mut b.ctx.types, src_ty);
        (cast::to_signless(b, val), signless, src_ty)
    };

    let all_ones = b.const_int(work_ty, -1);
    let xor = arith::xori(b.ctx, b.loc, all_ones, v, work_ty);
    v = b.track(xor).result(b.ctx);

    if orig_ty != work_ty {
        let sc = util::sign_cast(b.ctx, b.loc, v, orig_ty);
        v = b.track(sc).result(b.ctx);
    }
    if b.ctx.value_ty(v) != res_ty {
        v = cast::do_convert(b, v, res_ty)?;
    }
    Some(v)
}

/// Lowers `plier.unaryop` into standard arithmetic.
pub struct UnaryOpLowering;

impl ConversionPattern for UnaryOpLowering {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("plier"), Symbol::new("unaryop")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(unary) = plier::Unaryop::from_op(ctx, op) else {
            return false;
        };
        let val = unary.value(ctx);
        if !is_supported(&ctx.types, ctx.value_ty(val)) {
            return false;
        }
        let orig_result_ty = ctx.op_result_types(op)[0];
        let res_ty = converter.convert_type_or_self(&mut ctx.types, orig_result_ty);

        let token = unary.op(ctx);
        let handler: fn(&mut OpBuilder<'_>, ValueRef, TypeRef) -> Option<ValueRef> =
            match token.as_str() {
                "+" => unary_plus,
                "-" => negate,
                "not" => unary_not,
                "~" => unary_invert,
                _ => return false,
            };

        let loc = ctx.op(op).location;
        let mut b = OpBuilder::new(ctx, loc);
        let Some(out) = handler(&mut b, val, res_ty) else {
            return false;
        };
        for emitted in b.into_ops() {
            rewriter.insert_op(emitted);
        }
        rewriter.erase_op(vec![out]);
        true
    }

    fn name(&self) -> &'static str {
        "UnaryOpLowering"
    }
}
