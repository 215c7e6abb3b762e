//! Kernel outlining.
//!
//! Each `gpu.launch` region becomes a kernel function inside a per-host-
//! function `gpu.gpu_module`. Values captured from the host become kernel
//! parameters; the six launch ids are reintroduced inside the kernel as
//! `gpu.block_id` / `gpu.thread_id`. The launch site collapses into a
//! `gpu.launch_func` with explicit grid/block sizes and operands.

use std::collections::HashSet;

use pyrite_ir::clone::{clone_region, CloneMap};
use pyrite_ir::dialect::{core, func, gpu};
use pyrite_ir::rewrite::ModuleRef;
use pyrite_ir::{
    helpers, walk, BlockArgData, BlockData, DialectOp, IrContext, OpRef, RegionData, Symbol,
    TypeRef, ValueRef,
};
use smallvec::smallvec;

use crate::tile::gpu_env_of;

/// Host values flowing into the launch body, in first-use order.
fn captured_values(ctx: &IrContext, launch: gpu::Launch) -> Vec<ValueRef> {
    let body = launch.body(ctx);

    let mut inside: HashSet<ValueRef> = HashSet::new();
    let _ = walk::walk_region::<std::convert::Infallible>(ctx, body, &mut |op| {
        for &r in ctx.op_results(op) {
            inside.insert(r);
        }
        std::ops::ControlFlow::Continue(walk::WalkAction::Advance)
    });
    // Block args of every block in the launch region tree count as inside.
    for &blk in &ctx.region(body).blocks {
        for &arg in ctx.block_args(blk) {
            inside.insert(arg);
        }
    }
    let _ = walk::walk_region::<std::convert::Infallible>(ctx, body, &mut |op| {
        for &nested in &ctx.op(op).regions {
            for &blk in &ctx.region(nested).blocks {
                for &arg in ctx.block_args(blk) {
                    inside.insert(arg);
                }
            }
        }
        std::ops::ControlFlow::Continue(walk::WalkAction::Advance)
    });

    let mut captured: Vec<ValueRef> = Vec::new();
    let mut seen: HashSet<ValueRef> = HashSet::new();
    let _ = walk::walk_region::<std::convert::Infallible>(ctx, body, &mut |op| {
        for &operand in ctx.op_operands(op) {
            if !inside.contains(&operand) && seen.insert(operand) {
                captured.push(operand);
            }
        }
        std::ops::ControlFlow::Continue(walk::WalkAction::Advance)
    });
    captured
}

/// Outline every launch in the module.
pub fn outline_kernels(ctx: &mut IrContext, module: ModuleRef) {
    let host_funcs: Vec<OpRef> = module
        .ops(ctx)
        .into_iter()
        .filter(|&op| func::Func::matches(ctx, op))
        .collect();

    let module_block = module.first_block(ctx).expect("module body block");

    for host in host_funcs {
        let host_fn = func::Func::from_op(ctx, host).expect("matched");
        let host_name = host_fn.sym_name(ctx).as_string();

        // Collect launches in this function.
        let mut launches: Vec<OpRef> = Vec::new();
        let body = host_fn.body(ctx);
        let _ = walk::walk_region::<std::convert::Infallible>(ctx, body, &mut |op| {
            if gpu::Launch::matches(ctx, op) {
                launches.push(op);
            }
            std::ops::ControlFlow::Continue(walk::WalkAction::Advance)
        });
        if launches.is_empty() {
            continue;
        }

        // One kernel container per host function.
        let loc = ctx.op(host).location;
        let gpu_module_name = Symbol::new(&format!("{host_name}_gpu"));
        let gpu_module_block = ctx.create_block(BlockData::empty(loc));
        let gpu_module_region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![gpu_module_block],
            parent_op: None,
        });
        let gpu_module = gpu::gpu_module(
            ctx,
            loc,
            gpu_module_name,
            None,
            None,
            None,
            gpu_module_region,
        );
        ctx.push_op(module_block, gpu_module.op_ref());

        for (i, launch_op) in launches.into_iter().enumerate() {
            let launch = gpu::Launch::from_op(ctx, launch_op).expect("collected");
            let device = gpu_env_of(ctx, launch_op).flatten();
            let kernel_name = Symbol::new(&format!("{host_name}_kernel_{i}"));
            let loc = ctx.op(launch_op).location;

            let captured = captured_values(ctx, launch);
            let captured_tys: Vec<TypeRef> =
                captured.iter().map(|&v| ctx.value_ty(v)).collect();

            // Kernel entry: params for captures, ids reintroduced as ops.
            let entry = ctx.create_block(BlockData {
                location: loc,
                args: captured_tys.iter().map(|&ty| BlockArgData::of(ty)).collect(),
                ops: smallvec![],
                parent_region: None,
            });
            let idx_ty = core::index_ty(&mut ctx.types);
            let mut map = CloneMap::new();
            for (j, &cap) in captured.iter().enumerate() {
                map.map_value(cap, ctx.block_arg(entry, j as u32));
            }
            let launch_body = launch.body(ctx);
            let launch_entry = ctx.entry_block(launch_body).expect("launch body entry");
            let launch_args: Vec<ValueRef> = ctx.block_args(launch_entry).to_vec();
            for (dim, &arg) in launch_args.iter().take(3).enumerate() {
                let id = gpu::block_id(ctx, loc, idx_ty, dim as u64);
                ctx.push_op(entry, id.op_ref());
                map.map_value(arg, id.result(ctx));
            }
            for (dim, &arg) in launch_args.iter().skip(3).take(3).enumerate() {
                let id = gpu::thread_id(ctx, loc, idx_ty, dim as u64);
                ctx.push_op(entry, id.op_ref());
                map.map_value(arg, id.result(ctx));
            }

            // Clone the body ops into the kernel entry.
            let cloned = clone_region(ctx, launch_body, &mut map);
            let cloned_entry = ctx.entry_block(cloned).expect("cloned entry");
            let cloned_ops: Vec<OpRef> = ctx.block(cloned_entry).ops.to_vec();
            for op in cloned_ops {
                ctx.remove_op_from_block(cloned_entry, op);
                ctx.push_op(entry, op);
            }

            let none = core::none_ty(&mut ctx.types);
            let kernel_fn_ty =
                func::fn_ty(&mut ctx.types, none, captured_tys.iter().copied());
            let kernel_region = ctx.create_region(RegionData {
                location: loc,
                blocks: smallvec![entry],
                parent_op: None,
            });
            let kernel = gpu::gpu_func(
                ctx,
                loc,
                kernel_name,
                kernel_fn_ty,
                Some(pyrite_ir::Attribute::Unit),
                None,
                kernel_region,
            );
            let target_block = ctx.entry_block(ctx.op(gpu_module.op_ref()).regions[0])
                .expect("gpu module block");
            ctx.push_op(target_block, kernel.op_ref());

            // Launch site: explicit dispatch.
            let grid: Vec<ValueRef> = launch.grid_sizes(ctx).to_vec();
            let block_sizes: Vec<ValueRef> = launch.block_sizes(ctx).to_vec();
            let launch_func = gpu::launch_func(
                ctx,
                loc,
                grid[0],
                grid[1],
                grid[2],
                block_sizes[0],
                block_sizes[1],
                block_sizes[2],
                captured.iter().copied(),
                gpu::kernel_ref(gpu_module_name, kernel_name),
                device,
            );
            let parent = ctx.op(launch_op).parent_block.expect("attached launch");
            ctx.insert_op_before(parent, launch_op, launch_func.op_ref());

            // Drop the original launch and its body.
            let body_region = launch.body(ctx);
            ctx.detach_region(body_region);
            helpers::erase_region_tree(ctx, body_region);
            helpers::erase_op(ctx, launch_op);
        }
    }
}
