//! Dead code elimination.
//!
//! Ops are dead when they are pure and none of their results has uses; the
//! use-chains make that an O(1) check per op. Blocks are swept in reverse
//! so chains of dead ops collapse in one pass. A separate symbol sweep
//! removes private functions that nothing references.

use crate::context::IrContext;
use crate::dialect::func;
use crate::refs::{BlockRef, OpRef, RegionRef};
use crate::rewrite::ModuleRef;
use crate::{helpers, symbol_table, traits, DialectOp};

/// Result of a DCE run.
pub struct DceResult {
    pub removed_count: usize,
    pub iterations: usize,
    pub reached_fixpoint: bool,
}

/// Remove dead pure ops from a module.
pub fn eliminate_dead_code(ctx: &mut IrContext, module: ModuleRef) -> DceResult {
    let max_iterations = 100;
    let mut total_removed = 0;

    for iteration in 0..max_iterations {
        let body = module.body(ctx);
        let removed = sweep_region(ctx, body);
        if removed == 0 {
            return DceResult {
                removed_count: total_removed,
                iterations: iteration + 1,
                reached_fixpoint: true,
            };
        }
        total_removed += removed;
    }

    DceResult {
        removed_count: total_removed,
        iterations: max_iterations,
        reached_fixpoint: false,
    }
}

fn sweep_region(ctx: &mut IrContext, region: RegionRef) -> usize {
    let blocks: Vec<BlockRef> = ctx.region(region).blocks.to_vec();
    let mut removed = 0;
    for block in blocks {
        removed += sweep_block(ctx, block);
    }
    removed
}

fn sweep_block(ctx: &mut IrContext, block: BlockRef) -> usize {
    let mut removed = 0;

    let ops: Vec<OpRef> = ctx.block(block).ops.to_vec();
    for &op in &ops {
        let regions: Vec<RegionRef> = ctx.op(op).regions.to_vec();
        for region in regions {
            removed += sweep_region(ctx, region);
        }
    }

    // Reverse order maximizes cascade removal within one sweep.
    let ops: Vec<OpRef> = ctx.block(block).ops.to_vec();
    for &op in ops.iter().rev() {
        if is_dead(ctx, op) {
            helpers::erase_op(ctx, op);
            removed += 1;
        }
    }

    removed
}

fn is_dead(ctx: &IrContext, op: OpRef) -> bool {
    if !traits::is_pure(ctx, op) {
        return false;
    }
    let results = ctx.op_results(op);
    if results.is_empty() {
        return true;
    }
    results.iter().all(|&r| !ctx.has_uses(r))
}

/// Remove unreferenced private or force-inline-marked functions.
///
/// Returns the number of functions removed. Iterates until no more symbols
/// die (removing one function can orphan another).
pub fn eliminate_dead_symbols(ctx: &mut IrContext, module: ModuleRef) -> usize {
    let inline_marker = crate::dialect::util::force_inline_attr();
    let mut total = 0;

    loop {
        let body = module.body(ctx);
        let mut victims: Vec<OpRef> = Vec::new();
        for op in module.ops(ctx) {
            let Ok(f) = func::Func::from_op(ctx, op) else {
                continue;
            };
            let removable = f.sym_visibility(ctx) == Some(func::private_visibility())
                || ctx.op(op).attributes.contains_key(&inline_marker);
            if !removable {
                continue;
            }
            let name = f.sym_name(ctx);
            if symbol_table::symbol_uses(ctx, body, name).is_empty() {
                victims.push(op);
            }
        }
        if victims.is_empty() {
            return total;
        }
        for op in victims {
            let regions: Vec<RegionRef> = ctx.op(op).regions.to_vec();
            for region in regions {
                helpers::erase_region_tree(ctx, region);
            }
            helpers::erase_op(ctx, op);
            total += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BlockData;
    use crate::dialect::{arith, core};
    use crate::rewrite::applicator::wrap_in_module;
    use crate::types::Attribute;
    use crate::{RegionData, Symbol};
    use smallvec::smallvec;

    #[test]
    fn removes_chain_of_dead_ops() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);

        let a = arith::r#const(&mut ctx, loc, i32_ty, Attribute::int(1));
        let a_v = a.result(&ctx);
        let b = arith::addi(&mut ctx, loc, a_v, a_v, i32_ty);
        let module = wrap_in_module(&mut ctx, Symbol::new("m"), vec![a.op_ref(), b.op_ref()]);

        let result = eliminate_dead_code(&mut ctx, module);
        assert!(result.reached_fixpoint);
        assert_eq!(result.removed_count, 2);
        assert!(module.ops(&ctx).is_empty());
    }

    #[test]
    fn keeps_impure_ops_and_their_inputs() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);

        let a = arith::r#const(&mut ctx, loc, i32_ty, Attribute::int(1));
        // mem.store is a write; it anchors the constant.
        let buf_ty = crate::dialect::mem::buffer_ty(
            &mut ctx.types,
            i32_ty,
            &[1],
            crate::dialect::mem::Layout::Identity,
            crate::dialect::mem::Space::Host,
        );
        let alloc = crate::dialect::mem::alloc(&mut ctx, loc, [], buf_ty);
        let idx_ty = core::index_ty(&mut ctx.types);
        let zero = arith::r#const(&mut ctx, loc, idx_ty, Attribute::int(0));
        let a_v = a.result(&ctx);
        let alloc_v = alloc.result(&ctx);
        let zero_v = zero.result(&ctx);
        let store = crate::dialect::mem::store(&mut ctx, loc, a_v, alloc_v, [zero_v]);
        let module = wrap_in_module(
            &mut ctx,
            Symbol::new("m"),
            vec![a.op_ref(), alloc.op_ref(), zero.op_ref(), store.op_ref()],
        );

        let result = eliminate_dead_code(&mut ctx, module);
        assert_eq!(result.removed_count, 0);
        assert_eq!(module.ops(&ctx).len(), 4);
    }

    #[test]
    fn dead_symbol_sweep_respects_references() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);
        let fn_ty = func::fn_ty(&mut ctx.types, i32_ty, []);

        let mk_fn = |ctx: &mut IrContext, name: &str, marked: bool| {
            let entry = ctx.create_block(BlockData::empty(loc));
            let c = arith::r#const(ctx, loc, i32_ty, Attribute::int(0));
            ctx.push_op(entry, c.op_ref());
            let c_v = c.result(ctx);
            let ret = func::r#return(ctx, loc, [c_v]);
            ctx.push_op(entry, ret.op_ref());
            let body = ctx.create_region(RegionData {
                location: loc,
                blocks: smallvec![entry],
                parent_op: None,
            });
            func::func(
                ctx,
                loc,
                Symbol::new(name),
                fn_ty,
                marked.then_some(Attribute::Unit),
                None,
                body,
            )
            .op_ref()
        };

        let dead = mk_fn(&mut ctx, "dead_fn", true);
        let live = mk_fn(&mut ctx, "live_fn", true);

        // A public caller references live_fn.
        let entry = ctx.create_block(BlockData::empty(loc));
        let call = func::call(&mut ctx, loc, [], [i32_ty], Symbol::new("live_fn"), None);
        ctx.push_op(entry, call.op_ref());
        let call_res = call.results(&ctx)[0];
        let ret = func::r#return(&mut ctx, loc, [call_res]);
        ctx.push_op(entry, ret.op_ref());
        let body = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![entry],
            parent_op: None,
        });
        let caller =
            func::func(&mut ctx, loc, Symbol::new("main"), fn_ty, None, None, body).op_ref();

        let module = wrap_in_module(&mut ctx, Symbol::new("m"), vec![dead, live, caller]);

        let removed = eliminate_dead_symbols(&mut ctx, module);
        assert_eq!(removed, 1);
        let names: Vec<_> = module
            .ops(&ctx)
            .into_iter()
            .filter_map(|op| symbol_table::symbol_of(&ctx, op))
            .collect();
        assert_eq!(names, vec![Symbol::new("live_fn"), Symbol::new("main")]);
    }
}
