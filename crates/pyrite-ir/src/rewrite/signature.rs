//! Function signature conversion.
//!
//! Rewrites the `func.fn` type attribute and the entry-block argument types
//! of function-like ops through a [`TypeConverter`], materializing argument
//! casts so existing uses of the old-typed arguments stay valid until the
//! conversion patterns catch up.

use crate::context::IrContext;
use crate::dialect::func;
use crate::refs::{OpRef, TypeRef, ValueRef};
use crate::rewrite::type_converter::{MaterializationKind, TypeConverter};
use crate::symbol_table;
use crate::types::Attribute;
use crate::Symbol;

/// Convert the signature of one function-like op in place.
///
/// `op` must carry a `type` attribute holding a `func.fn` type and own a
/// body region whose entry block arguments mirror the parameters. Returns
/// `true` if anything changed.
pub fn convert_signature(
    ctx: &mut IrContext,
    op: OpRef,
    converter: &TypeConverter,
) -> bool {
    let type_key = Symbol::new("type");
    let Some(fn_ty) = ctx
        .op(op)
        .attributes
        .get(&type_key)
        .and_then(Attribute::as_type)
    else {
        return false;
    };
    if !func::is_fn_ty(&ctx.types, fn_ty) {
        return false;
    }

    let Some(old_ret) = func::fn_return_ty(&ctx.types, fn_ty) else {
        return false;
    };
    let old_params = func::fn_param_tys(&ctx.types, fn_ty).unwrap_or_default();

    let new_ret = converter.convert_type_or_self(&mut ctx.types, old_ret);
    let new_params: Vec<TypeRef> = old_params
        .iter()
        .map(|&ty| converter.convert_type_or_self(&mut ctx.types, ty))
        .collect();

    let params_changed = new_params
        .iter()
        .zip(old_params.iter())
        .any(|(new, old)| new != old);
    if !params_changed && new_ret == old_ret {
        return false;
    }

    // Rewrite the type attribute.
    let new_fn_ty = func::fn_ty(&mut ctx.types, new_ret, new_params.iter().copied());
    ctx.op_mut(op)
        .attributes
        .insert(type_key, Attribute::Type(new_fn_ty));

    // Retype entry block args, bridging old-typed uses with argument
    // materializations at the top of the block.
    if params_changed {
        let regions = ctx.op(op).regions.clone();
        let Some(&body) = regions.first() else {
            return true;
        };
        let Some(entry) = ctx.entry_block(body) else {
            return true;
        };
        let loc = ctx.block(entry).location;

        let arg_count = ctx.block_args(entry).len();
        for (i, &new_ty) in new_params.iter().enumerate().take(arg_count) {
            let arg: ValueRef = ctx.block_arg(entry, i as u32);
            let old_ty = ctx.value_ty(arg);
            if old_ty == new_ty {
                continue;
            }
            ctx.set_block_arg_type(entry, i as u32, new_ty);

            if ctx.has_uses(arg) {
                let mat = converter.materialize(
                    ctx,
                    MaterializationKind::Argument,
                    loc,
                    arg,
                    old_ty,
                );
                // Insert casts at the top of the entry block and rewire
                // every pre-existing use to the bridge value.
                let first_op = ctx.block(entry).ops.first().copied();
                for cast_op in &mat.ops {
                    match first_op {
                        Some(anchor) => ctx.insert_op_before(entry, anchor, *cast_op),
                        None => ctx.push_op(entry, *cast_op),
                    }
                }
                if mat.value != arg {
                    ctx.replace_all_uses_except(arg, mat.value, &mat.ops);
                }
            }
        }
    }

    true
}

/// Convert the signatures of every function-like op directly under a
/// symbol-table region. Returns the number of changed signatures.
pub fn convert_region_signatures(
    ctx: &mut IrContext,
    region: crate::RegionRef,
    converter: &TypeConverter,
) -> usize {
    let Some(block) = ctx.entry_block(region) else {
        return 0;
    };
    let ops: Vec<OpRef> = ctx.block(block).ops.to_vec();
    let mut changed = 0;
    for op in ops {
        if symbol_table::symbol_of(ctx, op).is_some() && convert_signature(ctx, op, converter)
        {
            changed += 1;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{BlockArgData, BlockData, RegionData};
    use crate::dialect::core;
    use crate::DialectOp;
    use smallvec::smallvec;

    #[test]
    fn converts_params_and_bridges_uses() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let f64_ty = core::float_ty(&mut ctx.types, 64);
        let fn_ty = func::fn_ty(&mut ctx.types, f64_ty, [f64_ty]);

        let entry = ctx.create_block(BlockData {
            location: loc,
            args: vec![BlockArgData::of(f64_ty)],
            ops: smallvec![],
            parent_region: None,
        });
        let arg = ctx.block_arg(entry, 0);
        let ret = func::r#return(&mut ctx, loc, [arg]);
        ctx.push_op(entry, ret.op_ref());
        let body = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![entry],
            parent_op: None,
        });
        let f = func::func(&mut ctx, loc, Symbol::new("f"), fn_ty, None, None, body);

        let mut converter = TypeConverter::new();
        converter.add_conversion(|types, ty| {
            core::float_width(types, ty)
                .filter(|&w| w == 64)
                .map(|_| core::float_ty(types, 32))
        });

        assert!(convert_signature(&mut ctx, f.op_ref(), &converter));

        // Signature now takes/returns f32.
        let new_ty = f.r#type(&ctx);
        let f32_ty = core::float_ty(&mut ctx.types, 32);
        assert_eq!(func::fn_return_ty(&ctx.types, new_ty), Some(f32_ty));
        assert_eq!(func::fn_param_tys(&ctx.types, new_ty), Some(vec![f32_ty]));

        // The entry arg is f32, and the return now consumes a bridge cast.
        assert_eq!(ctx.value_ty(arg), f32_ty);
        let ret_operand = ctx.op_operands(ret.op_ref())[0];
        assert_ne!(ret_operand, arg);
        assert_eq!(ctx.value_ty(ret_operand), f64_ty);

        // Converting again is a no-op.
        assert!(!convert_signature(&mut ctx, f.op_ref(), &converter));
    }
}
