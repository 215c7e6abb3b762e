//! Mapped parallel loops into `gpu.launch` regions.
//!
//! A tiled `scf.parallel` whose first six axes map to grid/block processors
//! becomes a `gpu.launch` with the grid/block extents as operands; the six
//! leading induction variables become the launch body ids, and any
//! sequential tail axes become nested `scf.for` loops inside the body.

use pyrite_ir::dialect::{gpu, scf};
use pyrite_ir::rewrite::{ModuleRef, PatternApplicator, PatternRewriter, RewritePattern};
use pyrite_ir::types::Attribute;
use pyrite_ir::{
    helpers, BlockArgData, BlockData, DialectOp, IrContext, OpRef, RegionData, Symbol,
    ValueRef,
};
use smallvec::smallvec;

fn has_grid_mapping(ctx: &IrContext, parallel: scf::Parallel) -> bool {
    let Some(Attribute::List(mapping)) = parallel.mapping(ctx) else {
        return false;
    };
    if mapping.len() < 6 {
        return false;
    }
    (0..6).all(|i| {
        mapping[i].as_symbol() == Some(scf::mapping::for_tiled_axis(i))
    })
}

struct ParallelToLaunch;

impl RewritePattern for ParallelToLaunch {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("scf"), Symbol::new("parallel")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(parallel) = scf::Parallel::from_op(ctx, op) else {
            return false;
        };
        if !has_grid_mapping(ctx, parallel) {
            return false;
        }

        let loc = ctx.op(op).location;
        let num_loops = parallel.num_loops(ctx) as usize;
        let lbs: Vec<ValueRef> = parallel.lower_bounds(ctx).to_vec();
        let ubs: Vec<ValueRef> = parallel.upper_bounds(ctx).to_vec();
        let steps: Vec<ValueRef> = parallel.steps(ctx).to_vec();

        let idx_ty = pyrite_ir::dialect::core::index_ty(&mut ctx.types);

        // Launch body with the six id arguments.
        let body_block = ctx.create_block(BlockData {
            location: loc,
            args: (0..6).map(|_| BlockArgData::of(idx_ty)).collect(),
            ops: smallvec![],
            parent_region: None,
        });

        // Map leading parallel ivs onto launch ids; the tail becomes
        // sequential for-loops nested in the body.
        let old_body = parallel.body(ctx);
        let old_entry = ctx.entry_block(old_body).expect("parallel body entry");
        let old_args: Vec<ValueRef> = ctx.block_args(old_entry).to_vec();

        for (i, &old_arg) in old_args.iter().take(6).enumerate() {
            let id = ctx.block_arg(body_block, i as u32);
            ctx.replace_all_uses(old_arg, id);
        }

        // Innermost insertion point for the old loop body ops.
        let mut target_block = body_block;
        let mut tail_terminators: Vec<OpRef> = Vec::new();
        for i in 6..num_loops {
            let for_body_block = ctx.create_block(BlockData {
                location: loc,
                args: vec![BlockArgData::of(idx_ty)],
                ops: smallvec![],
                parent_region: None,
            });
            let iv = ctx.block_arg(for_body_block, 0);
            ctx.replace_all_uses(old_args[i], iv);
            let for_region = ctx.create_region(RegionData {
                location: loc,
                blocks: smallvec![for_body_block],
                parent_op: None,
            });
            let for_op = scf::r#for(
                ctx,
                loc,
                lbs[i],
                ubs[i],
                steps[i],
                [],
                [],
                for_region,
            );
            ctx.push_op(target_block, for_op.op_ref());
            let y = scf::r#yield(ctx, loc, []);
            ctx.push_op(target_block, y.op_ref());
            tail_terminators.push(y.op_ref());
            target_block = for_body_block;
        }

        // Move the old body ops into the innermost block, swapping the
        // parallel yield for the right terminator.
        let old_ops: Vec<OpRef> = ctx.block(old_entry).ops.to_vec();
        for old_op in old_ops {
            ctx.remove_op_from_block(old_entry, old_op);
            if scf::Yield::matches(ctx, old_op) {
                helpers::erase_op(ctx, old_op);
                continue;
            }
            ctx.push_op(target_block, old_op);
        }
        if target_block == body_block {
            let term = gpu::terminator(ctx, loc);
            ctx.push_op(target_block, term.op_ref());
        } else {
            let y = scf::r#yield(ctx, loc, []);
            ctx.push_op(target_block, y.op_ref());
            // The outer body block still needs its gpu terminator after the
            // first for loop; tail_terminators holds the yields emitted at
            // each level, the outermost of which must become gpu.terminator.
            let outer_yield = tail_terminators[0];
            helpers::erase_op(ctx, outer_yield);
            let term = gpu::terminator(ctx, loc);
            ctx.push_op(body_block, term.op_ref());
        }

        let launch_region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![body_block],
            parent_op: None,
        });
        let launch = gpu::launch(
            ctx,
            loc,
            ubs[0],
            ubs[1],
            ubs[2],
            ubs[3],
            ubs[4],
            ubs[5],
            launch_region,
        );

        // The parallel op has no results: splice the launch in front and
        // erase it.
        rewriter.insert_op(launch.op_ref());
        rewriter.erase_op(vec![]);
        true
    }

    fn name(&self) -> &'static str {
        "ParallelToLaunch"
    }
}

/// Convert every mapped parallel loop in the module.
pub fn parallel_to_launch(ctx: &mut IrContext, module: ModuleRef) {
    let mut applicator = PatternApplicator::new()
        .without_folding()
        .add_pattern(ParallelToLaunch);
    applicator.apply(ctx, module);
}
