//! Parallel-loop tiling for GPU dispatch.
//!
//! The outermost mapping-free `scf.parallel` inside a GPU environment
//! region is tiled into a 3D grid x 3D block schedule: the device suggests
//! a workgroup size, grid extents are `ceildiv(trip, block)`, unused axes
//! pad with 1, and an in-bounds predicate guards the body against the
//! padded iterations. Axes beyond the third stay sequential.

use pyrite_ir::dialect::{arith, core, gpu, scf, util};
use pyrite_ir::rewrite::fold::const_of;
use pyrite_ir::rewrite::{ModuleRef, PatternApplicator, PatternRewriter, RewritePattern};
use pyrite_ir::types::Attribute;
use pyrite_ir::{
    BlockArgData, BlockData, DialectOp, IrContext, OpBuilder, OpRef, RegionData, Symbol,
    ValueRef,
};
use smallvec::smallvec;

/// Is `op` inside a GPU environment region?
pub(crate) fn inside_gpu_env(ctx: &IrContext, op: OpRef) -> bool {
    gpu_env_of(ctx, op).is_some()
}

/// Device of the nearest enclosing GPU environment region, if any.
pub(crate) fn gpu_env_of(ctx: &IrContext, op: OpRef) -> Option<Option<Symbol>> {
    let env = ctx.ancestor_op(op, |ctx, candidate| {
        util::EnvRegion::from_op(ctx, candidate)
            .map(|env| env.kind(ctx) == util::gpu_env_kind())
            .unwrap_or(false)
    })?;
    let env = util::EnvRegion::from_op(ctx, env).ok()?;
    Some(env.device(ctx))
}

fn is_const_value(ctx: &IrContext, v: ValueRef, expected: i64) -> bool {
    const_of(ctx, v).and_then(|a| a.as_int()) == Some(expected)
}

struct TileParallel;

impl RewritePattern for TileParallel {
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
        // Only outermost loops inside a gpu region, not yet mapped.
        if !inside_gpu_env(ctx, op) {
            return false;
        }
        if parallel.mapping(ctx).is_some() {
            return false;
        }
        if ctx
            .ancestor_op(op, |ctx, c| scf::Parallel::matches(ctx, c))
            .is_some()
        {
            return false;
        }
        // A reduce in the body is a cross-iteration combiner; the loop is
        // not independent per-point work and stays untiled.
        if let Some(entry) = ctx.entry_block(parallel.body(ctx)) {
            if ctx
                .block(entry)
                .ops
                .iter()
                .any(|&body_op| scf::Reduce::matches(ctx, body_op))
            {
                return false;
            }
        }

        let old_lbs: Vec<ValueRef> = parallel.lower_bounds(ctx).to_vec();
        let old_ubs: Vec<ValueRef> = parallel.upper_bounds(ctx).to_vec();
        let old_steps: Vec<ValueRef> = parallel.steps(ctx).to_vec();
        let old_loops = old_steps.len();

        // Unit step, zero start, first three axes at most.
        let max_loops = 3usize;
        let num_loops = old_lbs
            .iter()
            .zip(old_steps.iter())
            .take(max_loops)
            .take_while(|(lb, step)| {
                is_const_value(ctx, **lb, 0) && is_const_value(ctx, **step, 1)
            })
            .count();
        if num_loops == 0 {
            return false;
        }

        let loc = ctx.op(op).location;
        let mut b = OpBuilder::new(ctx, loc);
        let idx_ty = core::index_ty(&mut b.ctx.types);
        let zero = b.const_int(idx_ty, 0);
        let one = b.const_int(idx_ty, 1);

        let mut global_size = [one, one, one];
        global_size[..num_loops].copy_from_slice(&old_ubs[..num_loops]);

        let suggest = gpu::suggest_block_size(
            b.ctx,
            b.loc,
            global_size[0],
            global_size[1],
            global_size[2],
            idx_ty,
            idx_ty,
            idx_ty,
        );
        b.track(suggest);
        let local_size = [
            suggest.block_x(b.ctx),
            suggest.block_y(b.ctx),
            suggest.block_z(b.ctx),
        ];

        // Grid axes, then block axes, then the sequential tail.
        let mut new_lbs = Vec::new();
        let mut new_ubs = Vec::new();
        let mut new_steps = Vec::new();
        for i in 0..max_loops {
            new_lbs.push(zero);
            new_steps.push(one);
            if i < num_loops {
                let ceil = arith::ceildivui(b.ctx, b.loc, old_ubs[i], local_size[i], idx_ty);
                new_ubs.push(b.track(ceil).result(b.ctx));
            } else {
                new_ubs.push(one);
            }
        }
        for i in 0..max_loops {
            new_lbs.push(zero);
            new_steps.push(one);
            new_ubs.push(if i < num_loops { local_size[i] } else { one });
        }
        for i in num_loops..old_loops {
            new_lbs.push(old_lbs[i]);
            new_ubs.push(old_ubs[i]);
            new_steps.push(old_steps[i]);
        }

        let new_loops = new_steps.len();
        let prefix_ops = b.into_ops();

        // New body: compute flat ids, guard, and splice the old body into
        // the guard.
        let mut args = Vec::with_capacity(new_loops);
        for _ in 0..new_loops {
            args.push(BlockArgData::of(idx_ty));
        }
        let new_block = ctx.create_block(BlockData {
            location: loc,
            args,
            ops: smallvec![],
            parent_region: None,
        });

        let i1_ty = core::bool_ty(&mut ctx.types);
        let mut arg_mapping: Vec<ValueRef> = Vec::with_capacity(old_loops);
        let mut in_bounds: Option<ValueRef> = None;
        for i in 0..old_loops {
            if i < num_loops {
                let grid_id = ctx.block_arg(new_block, i as u32);
                let block_id = ctx.block_arg(new_block, (i + max_loops) as u32);
                let mul = arith::muli(ctx, loc, grid_id, local_size[i], idx_ty);
                ctx.push_op(new_block, mul.op_ref());
                let mul_v = mul.result(ctx);
                let add = arith::addi(ctx, loc, mul_v, block_id, idx_ty);
                ctx.push_op(new_block, add.op_ref());
                let val = add.result(ctx);
                arg_mapping.push(val);

                let cmp = arith::cmpi(ctx, loc, val, old_ubs[i], i1_ty, arith::pred::slt());
                ctx.push_op(new_block, cmp.op_ref());
                let within = cmp.result(ctx);
                in_bounds = Some(match in_bounds {
                    None => within,
                    Some(acc) => {
                        let and = arith::andi(ctx, loc, acc, within, i1_ty);
                        ctx.push_op(new_block, and.op_ref());
                        and.result(ctx)
                    }
                });
            } else {
                let idx = max_loops * 2 + (i - num_loops);
                arg_mapping.push(ctx.block_arg(new_block, idx as u32));
            }
        }
        let in_bounds = in_bounds.expect("num_loops > 0");

        // Guard region adopts the old body blocks.
        let old_body = parallel.body(ctx);
        let old_entry = ctx.entry_block(old_body).expect("parallel body entry");
        let old_args: Vec<ValueRef> = ctx.block_args(old_entry).to_vec();
        for (old_arg, mapped) in old_args.into_iter().zip(arg_mapping.iter()) {
            ctx.replace_all_uses(old_arg, *mapped);
        }

        let then_region = {
            ctx.detach_region(old_body);
            let blocks = std::mem::take(&mut ctx.region_mut(old_body).blocks);
            for &blk in &blocks {
                ctx.block_mut(blk).parent_region = None;
            }
            ctx.create_region(RegionData {
                location: loc,
                blocks,
                parent_op: None,
            })
        };
        // Empty else branch with its own yield.
        let else_region = {
            let else_block = ctx.create_block(BlockData::empty(loc));
            let y = scf::r#yield(ctx, loc, []);
            ctx.push_op(else_block, y.op_ref());
            ctx.create_region(RegionData {
                location: loc,
                blocks: smallvec![else_block],
                parent_op: None,
            })
        };
        let guard = scf::r#if(ctx, loc, in_bounds, [], then_region, else_region);
        ctx.push_op(new_block, guard.op_ref());
        let term = scf::r#yield(ctx, loc, []);
        ctx.push_op(new_block, term.op_ref());

        let new_region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![new_block],
            parent_op: None,
        });

        let mapping: Vec<Attribute> = (0..new_loops)
            .map(|i| Attribute::Symbol(scf::mapping::for_tiled_axis(i)))
            .collect();

        let bounds: Vec<ValueRef> = new_lbs
            .into_iter()
            .chain(new_ubs)
            .chain(new_steps)
            .collect();
        let new_parallel = scf::parallel(
            ctx,
            loc,
            bounds,
            new_loops as u64,
            Some(Attribute::List(mapping)),
            new_region,
        );

        rewriter.replace_with_prefix(prefix_ops, new_parallel.op_ref());
        true
    }

    fn name(&self) -> &'static str {
        "TileParallel"
    }
}

/// Tile every eligible parallel loop in the module.
pub fn tile_parallel_loops(ctx: &mut IrContext, module: ModuleRef) {
    let mut applicator = PatternApplicator::new()
        .without_folding()
        .add_pattern(TileParallel);
    applicator.apply(ctx, module);
}
