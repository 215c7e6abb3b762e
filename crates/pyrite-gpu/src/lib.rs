//! GPU lowering: host functions with GPU-annotated parallel loops into
//! device-dispatch programs.
//!
//! Pass order, mirroring the lowering pipeline it implements:
//!
//! 1. [`tile::tile_parallel_loops`] — 3D grid x 3D block tiling with an
//!    in-bounds guard,
//! 2. [`launch::parallel_to_launch`] — mapped loops into `gpu.launch`,
//! 3. [`alloc::insert_gpu_allocs`] — buffer flow analysis and device
//!    allocation placement,
//! 4. [`flatten::flatten_memrefs`] — rank-1 kernel accesses,
//! 5. [`outline::outline_kernels`] — kernel symbols + `gpu.launch_func`,
//! 6. [`abi`] — entry-point ABI, capability sets, binary serialization,
//! 7. [`f64::truncate_f64`] — degrade for Float64-less targets,
//! 8. [`to_spirv::convert_to_spirv`] — device code into the `spv` dialect,
//! 9. [`dispatch::expand_dispatch`] — runtime streams and kernel loads.

use thiserror::Error;

use pyrite_ir::rewrite::ModuleRef;
use pyrite_ir::IrContext;

pub mod abi;
pub mod alloc;
pub mod dispatch;
pub mod f64;
pub mod flatten;
pub mod launch;
pub mod outline;
pub mod tile;
pub mod to_spirv;

pub use abi::AssemblyEmitter;

/// Failure of the GPU lowering stage.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error(transparent)]
    Alloc(#[from] alloc::AllocError),
    #[error(transparent)]
    Spirv(#[from] to_spirv::SpirvError),
    #[error(transparent)]
    Abi(#[from] abi::AbiError),
}

/// Run the whole `lower-to-gpu` stage over a module.
pub fn run_lower_to_gpu_stage(
    ctx: &mut IrContext,
    module: ModuleRef,
    emitter: &dyn AssemblyEmitter,
) -> Result<(), GpuError> {
    tile::tile_parallel_loops(ctx, module);
    launch::parallel_to_launch(ctx, module);
    alloc::insert_gpu_allocs(ctx, module)?;
    flatten::flatten_memrefs(ctx, module);
    outline::outline_kernels(ctx, module);
    abi::attach_abi_attrs(ctx, module);
    abi::set_spirv_capabilities(ctx, module);
    f64::truncate_f64(ctx, module);
    to_spirv::convert_to_spirv(ctx, module)?;
    abi::serialize_spirv(ctx, module, emitter)?;
    dispatch::expand_dispatch(ctx, module);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyrite_ir::dialect::{arith, core, func, gpu, gpu_rt, mem, scf, spv, util};
    use pyrite_ir::rewrite::applicator::wrap_in_module;
    use pyrite_ir::types::Attribute;
    use pyrite_ir::{
        walk, BlockArgData, BlockData, DialectOp, IrContext, RegionData, Symbol,
    };
    use smallvec::smallvec;

    struct NullEmitter;

    impl AssemblyEmitter for NullEmitter {
        fn serialize(
            &self,
            _ctx: &IrContext,
            _spv_module: pyrite_ir::OpRef,
        ) -> Result<Vec<u8>, String> {
            Ok(vec![0x03, 0x02, 0x23, 0x07])
        }
    }

    fn count_ops(ctx: &IrContext, module: ModuleRef, full_name: &str) -> usize {
        let mut count = 0;
        let _ = walk::walk_region::<std::convert::Infallible>(
            ctx,
            module.body(ctx),
            &mut |op| {
                if ctx.op(op).full_name() == full_name {
                    count += 1;
                }
                std::ops::ControlFlow::Continue(walk::WalkAction::Advance)
            },
        );
        count
    }

    /// Host function writing 0.0 into an f32 buffer parameter over a
    /// parallel loop inside a gpu environment region, returning the buffer
    /// so the host reads the result.
    fn build_memset_module(ctx: &mut IrContext) -> ModuleRef {
        let loc = ctx.unknown_loc();
        let f32_ty = core::float_ty(&mut ctx.types, 32);
        let idx_ty = core::index_ty(&mut ctx.types);
        let buf_ty = mem::buffer_ty(
            &mut ctx.types,
            f32_ty,
            &[64],
            mem::Layout::Identity,
            mem::Space::Host,
        );
        let fn_ty = func::fn_ty(&mut ctx.types, buf_ty, [buf_ty]);

        let entry = ctx.create_block(BlockData {
            location: loc,
            args: vec![BlockArgData::of(buf_ty)],
            ops: smallvec![],
            parent_region: None,
        });
        let buffer = ctx.block_arg(entry, 0);
        let push = |ctx: &mut IrContext, entry, op: pyrite_ir::OpRef| {
            ctx.push_op(entry, op);
        };

        let zero = arith::r#const(ctx, loc, idx_ty, Attribute::int(0));
        push(ctx, entry, zero.op_ref());
        let one = arith::r#const(ctx, loc, idx_ty, Attribute::int(1));
        push(ctx, entry, one.op_ref());
        let n = arith::r#const(ctx, loc, idx_ty, Attribute::int(64));
        push(ctx, entry, n.op_ref());

        // Parallel body: store 0.0 into buffer[i].
        let body_block = ctx.create_block(BlockData {
            location: loc,
            args: vec![BlockArgData::of(idx_ty)],
            ops: smallvec![],
            parent_region: None,
        });
        let iv = ctx.block_arg(body_block, 0);
        let zero_f = arith::r#const(ctx, loc, f32_ty, Attribute::float(0.0));
        ctx.push_op(body_block, zero_f.op_ref());
        let zero_f_v = zero_f.result(ctx);
        let store = mem::store(ctx, loc, zero_f_v, buffer, [iv]);
        ctx.push_op(body_block, store.op_ref());
        let y = scf::r#yield(ctx, loc, []);
        ctx.push_op(body_block, y.op_ref());
        let par_region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![body_block],
            parent_op: None,
        });
        let zero_v = zero.result(ctx);
        let n_v = n.result(ctx);
        let one_v = one.result(ctx);
        let parallel = scf::parallel(
            ctx,
            loc,
            [zero_v, n_v, one_v],
            1,
            None,
            par_region,
        );

        // Wrap the loop in the gpu environment region.
        let env_block = ctx.create_block(BlockData::empty(loc));
        ctx.push_op(env_block, parallel.op_ref());
        let env_yield = util::env_region_yield(ctx, loc, []);
        ctx.push_op(env_block, env_yield.op_ref());
        let env_region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![env_block],
            parent_op: None,
        });
        let env = util::env_region(
            ctx,
            loc,
            [],
            [],
            util::gpu_env_kind(),
            Some(Symbol::new("level_zero:0")),
            env_region,
        );
        push(ctx, entry, env.op_ref());

        let ret = func::r#return(ctx, loc, [buffer]);
        push(ctx, entry, ret.op_ref());

        let body = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![entry],
            parent_op: None,
        });
        let f = func::func(ctx, loc, Symbol::new("memset"), fn_ty, None, None, body);
        wrap_in_module(ctx, Symbol::new("m"), vec![f.op_ref()])
    }

    #[test]
    fn tiling_produces_mapped_guarded_loop() {
        let mut ctx = IrContext::new();
        let module = build_memset_module(&mut ctx);

        tile::tile_parallel_loops(&mut ctx, module);

        let mut found = false;
        let _ = walk::walk_region::<std::convert::Infallible>(
            &ctx,
            module.body(&ctx),
            &mut |op| {
                if let Ok(parallel) = scf::Parallel::from_op(&ctx, op) {
                    found = true;
                    assert_eq!(parallel.num_loops(&ctx), 6);
                    let mapping = parallel.mapping(&ctx).expect("mapping attr");
                    let Attribute::List(items) = mapping else {
                        panic!("mapping must be a list");
                    };
                    assert_eq!(items.len(), 6);
                    assert_eq!(
                        items[0].as_symbol(),
                        Some(scf::mapping::block(0)),
                    );
                    assert_eq!(
                        items[3].as_symbol(),
                        Some(scf::mapping::thread(0)),
                    );
                }
                std::ops::ControlFlow::Continue(walk::WalkAction::Advance)
            },
        );
        assert!(found, "tiled parallel loop expected");

        // The grid extent is ceil-divided by the suggested block size, and
        // the body is guarded.
        assert_eq!(count_ops(&ctx, module, "gpu.suggest_block_size"), 1);
        assert_eq!(count_ops(&ctx, module, "arith.ceildivui"), 1);
        assert_eq!(count_ops(&ctx, module, "scf.if"), 1);
    }

    #[test]
    fn reducing_parallel_loop_is_left_untiled() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let f32_ty = core::float_ty(&mut ctx.types, 32);
        let idx_ty = core::index_ty(&mut ctx.types);

        let entry = ctx.create_block(BlockData::empty(loc));
        let zero = arith::r#const(&mut ctx, loc, idx_ty, Attribute::int(0));
        ctx.push_op(entry, zero.op_ref());
        let one = arith::r#const(&mut ctx, loc, idx_ty, Attribute::int(1));
        ctx.push_op(entry, one.op_ref());
        let n = arith::r#const(&mut ctx, loc, idx_ty, Attribute::int(64));
        ctx.push_op(entry, n.op_ref());

        // Body: contribute 1.0 per point into a reduction.
        let body_block = ctx.create_block(BlockData {
            location: loc,
            args: vec![BlockArgData::of(idx_ty)],
            ops: smallvec![],
            parent_region: None,
        });
        let contrib = arith::r#const(&mut ctx, loc, f32_ty, Attribute::float(1.0));
        ctx.push_op(body_block, contrib.op_ref());

        let combine_block = ctx.create_block(BlockData {
            location: loc,
            args: vec![BlockArgData::of(f32_ty), BlockArgData::of(f32_ty)],
            ops: smallvec![],
            parent_region: None,
        });
        let lhs = ctx.block_arg(combine_block, 0);
        let rhs = ctx.block_arg(combine_block, 1);
        let sum = arith::addf(&mut ctx, loc, lhs, rhs, f32_ty);
        ctx.push_op(combine_block, sum.op_ref());
        let sum_v = sum.result(&ctx);
        let combine_yield = scf::r#yield(&mut ctx, loc, [sum_v]);
        ctx.push_op(combine_block, combine_yield.op_ref());
        let combine_region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![combine_block],
            parent_op: None,
        });
        let contrib_v = contrib.result(&ctx);
        let reduce = scf::reduce(&mut ctx, loc, contrib_v, combine_region);
        ctx.push_op(body_block, reduce.op_ref());
        let y = scf::r#yield(&mut ctx, loc, []);
        ctx.push_op(body_block, y.op_ref());
        let par_region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![body_block],
            parent_op: None,
        });
        let zero_v = zero.result(&ctx);
        let n_v = n.result(&ctx);
        let one_v = one.result(&ctx);
        let parallel = scf::parallel(
            &mut ctx,
            loc,
            [zero_v, n_v, one_v],
            1,
            None,
            par_region,
        );

        let env_block = ctx.create_block(BlockData::empty(loc));
        ctx.push_op(env_block, parallel.op_ref());
        let env_yield = util::env_region_yield(&mut ctx, loc, []);
        ctx.push_op(env_block, env_yield.op_ref());
        let env_region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![env_block],
            parent_op: None,
        });
        let env = util::env_region(
            &mut ctx,
            loc,
            [],
            [],
            util::gpu_env_kind(),
            Some(Symbol::new("level_zero:0")),
            env_region,
        );
        ctx.push_op(entry, env.op_ref());

        let none = core::none_ty(&mut ctx.types);
        let fn_ty = func::fn_ty(&mut ctx.types, none, []);
        let ret = func::r#return(&mut ctx, loc, []);
        ctx.push_op(entry, ret.op_ref());
        let body = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![entry],
            parent_op: None,
        });
        let f = func::func(&mut ctx, loc, Symbol::new("reduces"), fn_ty, None, None, body);
        let module = wrap_in_module(&mut ctx, Symbol::new("m"), vec![f.op_ref()]);

        tile::tile_parallel_loops(&mut ctx, module);

        // The loop keeps its original shape: no mapping, no device query.
        let _ = walk::walk_region::<std::convert::Infallible>(
            &ctx,
            module.body(&ctx),
            &mut |op| {
                if let Ok(p) = scf::Parallel::from_op(&ctx, op) {
                    assert_eq!(p.num_loops(&ctx), 1);
                    assert!(p.mapping(&ctx).is_none());
                }
                std::ops::ControlFlow::Continue(walk::WalkAction::Advance)
            },
        );
        assert_eq!(count_ops(&ctx, module, "gpu.suggest_block_size"), 0);
    }

    #[test]
    fn memset_end_to_end() {
        let mut ctx = IrContext::new();
        let module = build_memset_module(&mut ctx);

        run_lower_to_gpu_stage(&mut ctx, module, &NullEmitter).expect("gpu stage");

        // Host side: device alloc with host_shared (the host returns the
        // buffer), kernel launch, copy back, dealloc and stream teardown.
        assert_eq!(count_ops(&ctx, module, "gpu_rt.alloc"), 1);
        assert_eq!(count_ops(&ctx, module, "gpu_rt.launch_kernel"), 1);
        assert_eq!(count_ops(&ctx, module, "gpu_rt.dealloc"), 1);
        assert_eq!(count_ops(&ctx, module, "gpu_rt.create_stream"), 1);
        assert_eq!(count_ops(&ctx, module, "gpu_rt.destroy_stream"), 1);
        assert_eq!(count_ops(&ctx, module, "mem.copy"), 1);

        let mut host_shared = None;
        let _ = walk::walk_region::<std::convert::Infallible>(
            &ctx,
            module.body(&ctx),
            &mut |op| {
                if let Ok(alloc) = gpu_rt::Alloc::from_op(&ctx, op) {
                    host_shared = Some(alloc.host_shared(&ctx));
                }
                std::ops::ControlFlow::Continue(walk::WalkAction::Advance)
            },
        );
        assert_eq!(host_shared, Some(true));

        // Kernel side: one gpu module carrying a serialized binary, with
        // the kernel body converted to spv ops.
        let mut binary = None;
        for op in module.ops(&ctx) {
            if let Ok(gpu_module) = gpu::GpuModule::from_op(&ctx, op) {
                binary = gpu_module.binary(&ctx);
            }
        }
        assert!(matches!(binary, Some(Attribute::Bytes(_))));

        // The spv twin is consumed by serialization.
        assert_eq!(count_ops(&ctx, module, "spv.module"), 0);

        // No launch regions or raw parallel loops survive.
        assert_eq!(count_ops(&ctx, module, "gpu.launch"), 0);
        assert_eq!(count_ops(&ctx, module, "scf.parallel"), 0);
        assert_eq!(count_ops(&ctx, module, "util.env_region"), 0);
    }

    #[test]
    fn f64_kernel_degrades_without_float64_cap() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let f64_ty = core::float_ty(&mut ctx.types, 64);
        let idx_ty = core::index_ty(&mut ctx.types);
        let buf_ty = mem::buffer_ty(
            &mut ctx.types,
            f64_ty,
            &[8],
            mem::Layout::Identity,
            mem::Space::Device,
        );

        // A gpu module with one kernel loading f64, without Float64 caps.
        let entry = ctx.create_block(BlockData {
            location: loc,
            args: vec![BlockArgData::of(buf_ty)],
            ops: smallvec![],
            parent_region: None,
        });
        let buf = ctx.block_arg(entry, 0);
        let zero = arith::r#const(&mut ctx, loc, idx_ty, Attribute::int(0));
        ctx.push_op(entry, zero.op_ref());
        let zero_v = zero.result(&ctx);
        let load = mem::load(&mut ctx, loc, buf, [zero_v], f64_ty);
        ctx.push_op(entry, load.op_ref());
        let load_v = load.result(&ctx);
        let store = mem::store(&mut ctx, loc, load_v, buf, [zero_v]);
        ctx.push_op(entry, store.op_ref());
        let term = gpu::terminator(&mut ctx, loc);
        ctx.push_op(entry, term.op_ref());

        let none = core::none_ty(&mut ctx.types);
        let kernel_ty = func::fn_ty(&mut ctx.types, none, [buf_ty]);
        let kernel_region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![entry],
            parent_op: None,
        });
        let kernel = gpu::gpu_func(
            &mut ctx,
            loc,
            Symbol::new("k"),
            kernel_ty,
            Some(Attribute::Unit),
            None,
            kernel_region,
        );
        let module_block = ctx.create_block(BlockData::empty(loc));
        ctx.push_op(module_block, kernel.op_ref());
        let module_region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![module_block],
            parent_op: None,
        });
        // Capability set without float64.
        let caps = Attribute::List(vec![
            Attribute::Symbol(Symbol::new("kernel")),
            Attribute::Symbol(Symbol::new("addresses")),
        ]);
        let gpu_module = gpu::gpu_module(
            &mut ctx,
            loc,
            Symbol::new("kmod"),
            Some(caps),
            Some(spv::default_extensions()),
            None,
            module_region,
        );
        let module = wrap_in_module(&mut ctx, Symbol::new("m"), vec![gpu_module.op_ref()]);

        f64::truncate_f64(&mut ctx, module);

        // The kernel signature now takes the packed buffer, and no f64
        // loads survive.
        let kernel_view = gpu::GpuFunc::from_op(&ctx, kernel.op_ref()).unwrap();
        let fn_ty = kernel_view.r#type(&ctx);
        let params = func::fn_param_tys(&ctx.types, fn_ty).unwrap();
        let elem = mem::elem_ty(&ctx.types, params[0]).unwrap();
        assert!(core::is_vec(&ctx.types, elem));

        let mut f64_loads = 0;
        let _ = walk::walk_region::<std::convert::Infallible>(
            &ctx,
            module.body(&ctx),
            &mut |op| {
                if mem::Load::matches(&ctx, op) {
                    let ty = ctx.op_result_types(op)[0];
                    if core::float_width(&ctx.types, ty) == Some(64) {
                        f64_loads += 1;
                    }
                }
                std::ops::ControlFlow::Continue(walk::WalkAction::Advance)
            },
        );
        assert_eq!(f64_loads, 0);
    }
}
