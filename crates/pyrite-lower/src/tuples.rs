//! Tuple lowering: concatenation, construction and element extraction.

use pyrite_ir::dialect::{arith, core, plier, util};
use pyrite_ir::rewrite::{ConversionPattern, PatternRewriter, TypeConverter};
use pyrite_ir::{DialectOp, IrContext, OpBuilder, OpRef, Symbol, TypeRef, ValueRef};

use crate::cast;

/// Statically known value behind an index operand, if any.
pub(crate) fn const_index_of(ctx: &IrContext, v: ValueRef) -> Option<i64> {
    let pyrite_ir::ValueDef::OpResult(op, 0) = ctx.value_def(v) else {
        return None;
    };
    let c = arith::Const::from_op(ctx, op).ok()?;
    c.value(ctx).as_int()
}

/// Tuple `+` concatenates element-by-element into a fresh tuple whose type
/// is the concatenation of the input element types.
pub struct TupleConcatLowering;

impl ConversionPattern for TupleConcatLowering {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("plier"), Symbol::new("binop")))
    }

    fn benefit(&self) -> u16 {
        // Ahead of the scalar binop table.
        2
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        _converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(binop) = plier::Binop::from_op(ctx, op) else {
            return false;
        };
        if binop.op(ctx) != "+" {
            return false;
        }
        let lhs = binop.lhs(ctx);
        let rhs = binop.rhs(ctx);
        let Some(lhs_elems) = core::tuple_elems(&ctx.types, ctx.value_ty(lhs)) else {
            return false;
        };
        let Some(rhs_elems) = core::tuple_elems(&ctx.types, ctx.value_ty(rhs)) else {
            return false;
        };

        let loc = ctx.op(op).location;
        let mut b = OpBuilder::new(ctx, loc);
        let mut elems: Vec<ValueRef> = Vec::with_capacity(lhs_elems.len() + rhs_elems.len());
        let mut elem_tys: Vec<TypeRef> = Vec::with_capacity(elems.capacity());

        for (value, side_elems) in [(lhs, lhs_elems), (rhs, rhs_elems)] {
            for (i, elem_ty) in side_elems.into_iter().enumerate() {
                let idx = b.const_index(i as i64);
                let extract = util::tuple_extract(b.ctx, b.loc, value, idx, elem_ty);
                elems.push(b.track(extract).result(b.ctx));
                elem_tys.push(elem_ty);
            }
        }

        let new_tuple_ty = core::tuple_ty(&mut b.ctx.types, elem_tys);
        let build = util::build_tuple(b.ctx, b.loc, elems, new_tuple_ty);
        let out = b.track(build).result(b.ctx);

        for emitted in b.into_ops() {
            rewriter.insert_op(emitted);
        }
        rewriter.erase_op(vec![out]);
        true
    }

    fn name(&self) -> &'static str {
        "TupleConcatLowering"
    }
}

/// `plier.build_tuple` becomes `util.build_tuple` with a converted type.
pub struct BuildTupleLowering;

impl ConversionPattern for BuildTupleLowering {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("plier"), Symbol::new("build_tuple")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(build) = plier::BuildTuple::from_op(ctx, op) else {
            return false;
        };
        let args: Vec<ValueRef> = build.args(ctx).to_vec();
        let orig_result_ty = ctx.op_result_types(op)[0];
        let converted = converter.convert_type_or_self(&mut ctx.types, orig_result_ty);
        let ret_ty = if core::is_tuple(&ctx.types, converted) {
            converted
        } else {
            // Derive the tuple type from the argument types.
            let elem_tys: Vec<TypeRef> = args.iter().map(|&v| ctx.value_ty(v)).collect();
            core::tuple_ty(&mut ctx.types, elem_tys)
        };

        let loc = ctx.op(op).location;
        let new_op = util::build_tuple(ctx, loc, args, ret_ty);
        rewriter.replace_op(new_op.op_ref());
        true
    }

    fn name(&self) -> &'static str {
        "BuildTupleLowering"
    }
}

/// `plier.getitem` on a tuple becomes an index-typed `util.tuple_extract`.
pub struct GetItemTupleLowering;

impl ConversionPattern for GetItemTupleLowering {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("plier"), Symbol::new("getitem")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(getitem) = plier::Getitem::from_op(ctx, op) else {
            return false;
        };
        let container = getitem.value(ctx);
        let Some(elems) = core::tuple_elems(&ctx.types, ctx.value_ty(container)) else {
            return false;
        };

        let index = getitem.index(ctx);
        let result_ty = ctx.op_result_types(op)[0];
        let mut converted = converter.convert_type_or_self(&mut ctx.types, result_ty);
        // A statically known index refines an unconverted result type.
        if !crate::binop::is_supported(&ctx.types, converted)
            && !core::is_tuple(&ctx.types, converted)
        {
            let Some(static_index) = const_index_of(ctx, index) else {
                return false;
            };
            let Some(&elem) = elems.get(static_index as usize) else {
                return false;
            };
            converted = elem;
        }

        let loc = ctx.op(op).location;
        let mut b = OpBuilder::new(ctx, loc);
        let idx_ty = core::index_ty(&mut b.ctx.types);
        let idx = if core::is_index(&b.ctx.types, b.ctx.value_ty(index)) {
            index
        } else {
            match cast::do_convert(&mut b, index, idx_ty) {
                Some(v) => v,
                None => return false,
            }
        };
        let extract = util::tuple_extract(b.ctx, b.loc, container, idx, converted);
        let out = b.track(extract).result(b.ctx);
        for emitted in b.into_ops() {
            rewriter.insert_op(emitted);
        }
        rewriter.erase_op(vec![out]);
        true
    }

    fn name(&self) -> &'static str {
        "GetItemTupleLowering"
    }
}

