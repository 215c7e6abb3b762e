//! Dispatch expansion: device ops into runtime calls with stream plumbing.
//!
//! Per host function, one `gpu_rt.create_stream` per device is created in
//! the entry block (deduplicated), every `gpu.launch_func` becomes
//! `load_module` + `get_kernel` + `launch_kernel`, device allocs and
//! deallocs pick up the stream operand, and `destroy_stream` runs before
//! every return. GPU environment regions have served their purpose by now
//! and are dissolved.

use std::collections::HashMap;

use pyrite_ir::dialect::{func, gpu, gpu_rt, util};
use pyrite_ir::rewrite::ModuleRef;
use pyrite_ir::{
    helpers, walk, BlockRef, DialectOp, IrContext, OpRef, Symbol, TypeRef, ValueRef,
};

use crate::tile::gpu_env_of;

/// Opaque handle types used by the runtime surface.
fn stream_ty(ctx: &mut IrContext) -> TypeRef {
    ctx.types.intern(
        pyrite_ir::TypeDataBuilder::new(Symbol::new("gpu_rt"), Symbol::new("stream")).build(),
    )
}

fn module_handle_ty(ctx: &mut IrContext) -> TypeRef {
    ctx.types.intern(
        pyrite_ir::TypeDataBuilder::new(Symbol::new("gpu_rt"), Symbol::new("module")).build(),
    )
}

fn kernel_handle_ty(ctx: &mut IrContext) -> TypeRef {
    ctx.types.intern(
        pyrite_ir::TypeDataBuilder::new(Symbol::new("gpu_rt"), Symbol::new("kernel")).build(),
    )
}

struct StreamCache {
    entry: BlockRef,
    streams: HashMap<Option<Symbol>, ValueRef>,
    created: Vec<ValueRef>,
}

impl StreamCache {
    fn get(&mut self, ctx: &mut IrContext, device: Option<Symbol>) -> ValueRef {
        if let Some(&stream) = self.streams.get(&device) {
            return stream;
        }
        let loc = ctx.block(self.entry).location;
        let ty = stream_ty(ctx);
        let create = gpu_rt::create_stream(ctx, loc, ty, device);
        // Streams stack up at the top of the entry block in creation order.
        let anchor = self
            .created
            .last()
            .and_then(|&prev| match ctx.value_def(prev) {
                pyrite_ir::ValueDef::OpResult(op, _) => Some(op),
                _ => None,
            });
        match anchor {
            Some(prev_op) => ctx.insert_op_after(self.entry, prev_op, create.op_ref()),
            None => {
                let first = ctx.block(self.entry).ops.first().copied();
                match first {
                    Some(op) => ctx.insert_op_before(self.entry, op, create.op_ref()),
                    None => ctx.push_op(self.entry, create.op_ref()),
                }
            }
        }
        let stream = create.result(ctx);
        self.streams.insert(device, stream);
        self.created.push(stream);
        stream
    }
}

fn expand_function(ctx: &mut IrContext, f: func::Func) {
    let body = f.body(ctx);
    let Some(entry) = ctx.entry_block(body) else {
        return;
    };
    let mut cache = StreamCache {
        entry,
        streams: HashMap::new(),
        created: Vec::new(),
    };

    // Launches.
    let launches: Vec<OpRef> = collect(ctx, body, |ctx, op| gpu::LaunchFunc::matches(ctx, op));
    for launch_op in launches {
        let launch = gpu::LaunchFunc::from_op(ctx, launch_op).expect("collected");
        let Some((module_sym, kernel_sym)) = gpu::kernel_ref_parts(&launch.kernel(ctx)) else {
            continue;
        };
        let device = launch
            .device(ctx)
            .or_else(|| gpu_env_of(ctx, launch_op).flatten());
        let loc = ctx.op(launch_op).location;
        let stream = cache.get(ctx, device);

        let block = ctx.op(launch_op).parent_block.expect("attached launch");
        let module_ty = module_handle_ty(ctx);
        let load = gpu_rt::load_module(ctx, loc, stream, module_ty, module_sym);
        ctx.insert_op_before(block, launch_op, load.op_ref());
        let kernel_ty = kernel_handle_ty(ctx);
        let load_v = load.result(ctx);
        let get = gpu_rt::get_kernel(ctx, loc, load_v, kernel_ty, kernel_sym);
        ctx.insert_op_before(block, launch_op, get.op_ref());

        let grid: Vec<ValueRef> = launch.grid_sizes(ctx).to_vec();
        let blk: Vec<ValueRef> = launch.block_sizes(ctx).to_vec();
        let args: Vec<ValueRef> = launch.kernel_operands(ctx).to_vec();
        let kernel_v = get.result(ctx);
        let run = gpu_rt::launch_kernel(
            ctx,
            loc,
            stream,
            kernel_v,
            grid[0],
            grid[1],
            grid[2],
            blk[0],
            blk[1],
            blk[2],
            args,
        );
        ctx.insert_op_before(block, launch_op, run.op_ref());
        helpers::erase_op(ctx, launch_op);
    }

    // Block-size queries go through the stream as well.
    let suggests: Vec<OpRef> =
        collect(ctx, body, |ctx, op| gpu::SuggestBlockSize::matches(ctx, op));
    for suggest_op in suggests {
        let device = gpu_env_of(ctx, suggest_op).flatten();
        let loc = ctx.op(suggest_op).location;
        let stream = cache.get(ctx, device);
        let grid: Vec<ValueRef> = ctx.op_operands(suggest_op).to_vec();
        let result_tys: Vec<TypeRef> = ctx.op_result_types(suggest_op).to_vec();
        let block = ctx.op(suggest_op).parent_block.expect("attached suggest");
        let new_suggest = gpu_rt::suggest_block_size(
            ctx,
            loc,
            stream,
            grid[0],
            grid[1],
            grid[2],
            result_tys[0],
            result_tys[1],
            result_tys[2],
        );
        ctx.insert_op_before(block, suggest_op, new_suggest.op_ref());
        for i in 0..3 {
            let old = ctx.op_result(suggest_op, i);
            let new = ctx.op_result(new_suggest.op_ref(), i);
            ctx.replace_all_uses(old, new);
        }
        helpers::erase_op(ctx, suggest_op);
    }

    // Allocs and deallocs.
    let allocs: Vec<OpRef> = collect(ctx, body, |ctx, op| gpu::Alloc::matches(ctx, op));
    for alloc_op in allocs {
        let alloc = gpu::Alloc::from_op(ctx, alloc_op).expect("collected");
        let device = alloc
            .device(ctx)
            .or_else(|| gpu_env_of(ctx, alloc_op).flatten());
        let loc = ctx.op(alloc_op).location;
        let stream = cache.get(ctx, device);
        let dyn_sizes: Vec<ValueRef> = ctx.op_operands(alloc_op).to_vec();
        let buf_ty = ctx.op_result_types(alloc_op)[0];
        let host_shared = alloc.host_shared(ctx);

        let block = ctx.op(alloc_op).parent_block.expect("attached alloc");
        let new_alloc = gpu_rt::alloc(ctx, loc, stream, dyn_sizes, buf_ty, host_shared);
        ctx.insert_op_before(block, alloc_op, new_alloc.op_ref());
        ctx.replace_all_uses(alloc.result(ctx), new_alloc.result(ctx));
        helpers::erase_op(ctx, alloc_op);
    }

    let deallocs: Vec<OpRef> = collect(ctx, body, |ctx, op| gpu::Dealloc::matches(ctx, op));
    for dealloc_op in deallocs {
        let dealloc = gpu::Dealloc::from_op(ctx, dealloc_op).expect("collected");
        let device = dealloc
            .device(ctx)
            .or_else(|| gpu_env_of(ctx, dealloc_op).flatten());
        let loc = ctx.op(dealloc_op).location;
        let stream = cache.get(ctx, device);
        let source = dealloc.source(ctx);
        let block = ctx.op(dealloc_op).parent_block.expect("attached dealloc");
        let new_dealloc = gpu_rt::dealloc(ctx, loc, stream, source);
        ctx.insert_op_before(block, dealloc_op, new_dealloc.op_ref());
        helpers::erase_op(ctx, dealloc_op);
    }

    // Streams die before every return.
    if !cache.created.is_empty() {
        let returns: Vec<OpRef> =
            collect(ctx, body, |ctx, op| func::Return::matches(ctx, op));
        for ret in returns {
            let block = ctx.op(ret).parent_block.expect("attached return");
            let loc = ctx.op(ret).location;
            for &stream in &cache.created {
                let destroy = gpu_rt::destroy_stream(ctx, loc, stream);
                ctx.insert_op_before(block, ret, destroy.op_ref());
            }
        }
    }
}

fn collect(
    ctx: &IrContext,
    region: pyrite_ir::RegionRef,
    pred: impl Fn(&IrContext, OpRef) -> bool,
) -> Vec<OpRef> {
    let mut out = Vec::new();
    let _ = walk::walk_region::<std::convert::Infallible>(ctx, region, &mut |op| {
        if pred(ctx, op) {
            out.push(op);
        }
        std::ops::ControlFlow::Continue(walk::WalkAction::Advance)
    });
    out
}

/// Inline environment regions: their purpose (device binding) is spent.
pub fn dissolve_env_regions(ctx: &mut IrContext, module: ModuleRef) {
    loop {
        let body = module.body(ctx);
        let envs = collect(ctx, body, |ctx, op| {
            util::EnvRegion::matches(ctx, op)
        });
        if envs.is_empty() {
            return;
        }
        for env_op in envs {
            let Ok(env) = util::EnvRegion::from_op(ctx, env_op) else {
                continue;
            };
            let region = env.body(ctx);
            let Some(block) = ctx.entry_block(region) else {
                helpers::erase_op(ctx, env_op);
                continue;
            };
            // Map region results to the yield's operands.
            let yield_op = ctx.block(block).ops.last().copied();
            if let Some(yield_op) = yield_op {
                if util::EnvRegionYield::matches(ctx, yield_op) {
                    let yielded: Vec<ValueRef> = ctx.op_operands(yield_op).to_vec();
                    let results: Vec<ValueRef> = ctx.op_results(env_op).to_vec();
                    for (result, value) in results.into_iter().zip(yielded) {
                        ctx.replace_all_uses(result, value);
                    }
                    helpers::erase_op(ctx, yield_op);
                }
            }
            // Splice the body ops in place of the region op.
            let parent = ctx.op(env_op).parent_block.expect("attached env region");
            let ops: Vec<OpRef> = ctx.block(block).ops.to_vec();
            for op in ops {
                ctx.remove_op_from_block(block, op);
                ctx.insert_op_before(parent, env_op, op);
            }
            helpers::erase_op(ctx, env_op);
        }
    }
}

/// Expand all device dispatch in the module.
pub fn expand_dispatch(ctx: &mut IrContext, module: ModuleRef) {
    for op in module.ops(ctx) {
        if let Ok(f) = func::Func::from_op(ctx, op) {
            expand_function(ctx, f);
        }
    }
    dissolve_env_regions(ctx, module);
}
