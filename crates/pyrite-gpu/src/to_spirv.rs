//! Kernel conversion into the SPIR-V-like dialect.
//!
//! Each `gpu.gpu_module` gets an `spv.module` twin: kernels are cloned in,
//! their buffer parameters retyped to pointers, and the kernel-side ops
//! converted — rank-0/rank-1 loads and stores become pointer access chains
//! with aligned accesses, `atomic_add`/`atomic_sub` calls become
//! device-scope atomics (float subtract via negate plus atomic add),
//! barriers and fences become control/memory barriers with
//! sequentially-consistent semantics, and ADD group reductions become
//! non-uniform group operations. Workgroup ids stay as `gpu` id ops for
//! the assembly emitter to map onto builtins.

use thiserror::Error;

use pyrite_ir::clone::clone_op;
use pyrite_ir::dialect::{core, func, gpu, mem, spv};
use pyrite_ir::rewrite::conversion::region_conversion;
use pyrite_ir::rewrite::{
    ConversionPattern, ConversionTarget, Legality, ModuleRef, PatternRewriter, TypeConverter,
};
use pyrite_ir::{
    helpers, BlockData, DialectOp, IrContext, OpBuilder, OpRef, RegionData, Symbol, TypeRef,
    ValueRef,
};
use smallvec::smallvec;

/// Unconvertible kernel content.
#[derive(Debug, Error)]
pub enum SpirvError {
    #[error("ops survived SPIR-V conversion in kernel module `{module}`: {first}")]
    Unconverted { module: Symbol, first: String },
    #[error("unsupported group reduction kind `{0}`")]
    UnsupportedReduction(Symbol),
}

/// Storage class for a buffer's memory space. The private space currently
/// maps to Workgroup; a dedicated private storage class would need its own
/// access-chain handling.
fn storage_class_of(space: Option<mem::Space>) -> spv::StorageClass {
    match space {
        Some(mem::Space::Private) => spv::StorageClass::Workgroup,
        _ => spv::StorageClass::CrossWorkgroup,
    }
}

/// The kernel type converter: buffers become element pointers.
pub fn spirv_converter() -> TypeConverter {
    let mut converter = TypeConverter::new();
    converter.add_conversion(|types, ty| {
        if !mem::is_buffer(types, ty) {
            return None;
        }
        let elem = mem::elem_ty(types, ty)?;
        let class = storage_class_of(mem::space(types, ty));
        Some(spv::ptr_ty(types, elem, class))
    });
    converter
}

fn byte_size(types: &pyrite_ir::TypeInterner, ty: TypeRef) -> Option<u64> {
    if let Some(w) = core::int_width(types, ty) {
        return Some((w as u64).div_ceil(8));
    }
    if let Some(w) = core::float_width(types, ty) {
        return Some((w as u64) / 8);
    }
    if core::is_vec(types, ty) {
        let data = types.get(ty);
        let elem = *data.params.first()?;
        let count = types.int_attr(ty, Symbol::new("count"))? as u64;
        return Some(byte_size(types, elem)? * count);
    }
    None
}

/// Pointer value behind a buffer-typed SSA value, looking through the
/// signature-conversion bridge cast.
fn as_ptr(ctx: &IrContext, v: ValueRef) -> Option<ValueRef> {
    if spv::is_ptr(&ctx.types, ctx.value_ty(v)) {
        return Some(v);
    }
    if let pyrite_ir::ValueDef::OpResult(def, 0) = ctx.value_def(v) {
        if core::UnrealizedCast::matches(ctx, def) {
            let src = ctx.op_operands(def)[0];
            if spv::is_ptr(&ctx.types, ctx.value_ty(src)) {
                return Some(src);
            }
        }
    }
    None
}

struct ConvertLoad;

impl ConversionPattern for ConvertLoad {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("mem"), Symbol::new("load")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        _converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(load) = mem::Load::from_op(ctx, op) else {
            return false;
        };
        let Some(ptr) = as_ptr(ctx, load.source(ctx)) else {
            return false;
        };
        let result_ty = ctx.op_result_types(op)[0];
        let Some(size) = byte_size(&ctx.types, result_ty) else {
            return false;
        };
        let indices: Vec<ValueRef> = load.indices(ctx).to_vec();
        if indices.len() > 1 {
            return false;
        }
        let loc = ctx.op(op).location;

        let mut b = OpBuilder::new(ctx, loc);
        let addr = match indices.first() {
            Some(&index) => {
                let ptr_ty = b.ctx.value_ty(ptr);
                let chain = spv::ptr_access_chain(b.ctx, b.loc, ptr, index, ptr_ty);
                b.track(chain).result(b.ctx)
            }
            None => ptr,
        };
        let new_load = spv::load(b.ctx, b.loc, addr, result_ty, size);
        let out = b.track(new_load).result(b.ctx);
        for emitted in b.into_ops() {
            rewriter.insert_op(emitted);
        }
        rewriter.erase_op(vec![out]);
        true
    }

    fn name(&self) -> &'static str {
        "ConvertLoad"
    }
}

struct ConvertStore;

impl ConversionPattern for ConvertStore {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("mem"), Symbol::new("store")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        _converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(store) = mem::Store::from_op(ctx, op) else {
            return false;
        };
        let Some(ptr) = as_ptr(ctx, store.target(ctx)) else {
            return false;
        };
        let value = store.value(ctx);
        let Some(size) = byte_size(&ctx.types, ctx.value_ty(value)) else {
            return false;
        };
        let indices: Vec<ValueRef> = store.indices(ctx).to_vec();
        if indices.len() > 1 {
            return false;
        }
        let loc = ctx.op(op).location;

        let mut b = OpBuilder::new(ctx, loc);
        let addr = match indices.first() {
            Some(&index) => {
                let ptr_ty = b.ctx.value_ty(ptr);
                let chain = spv::ptr_access_chain(b.ctx, b.loc, ptr, index, ptr_ty);
                b.track(chain).result(b.ctx)
            }
            None => ptr,
        };
        let new_store = spv::store(b.ctx, b.loc, addr, value, size);
        b.track(new_store);
        for emitted in b.into_ops() {
            rewriter.insert_op(emitted);
        }
        rewriter.erase_op(vec![]);
        true
    }

    fn name(&self) -> &'static str {
        "ConvertStore"
    }
}

/// `atomic_add` / `atomic_sub` calls into device-scope atomics.
struct ConvertAtomics;

impl ConversionPattern for ConvertAtomics {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("func"), Symbol::new("call")))
    }

    fn benefit(&self) -> u16 {
        10
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        _converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(call) = func::Call::from_op(ctx, op) else {
            return false;
        };
        let callee = call.callee(ctx).as_string();
        let is_add = callee.starts_with("atomic_add");
        let is_sub = callee.starts_with("atomic_sub");
        if !is_add && !is_sub {
            return false;
        }
        let args: Vec<ValueRef> = call.args(ctx).to_vec();
        if args.len() != 2 || ctx.op_results(op).len() != 1 {
            return false;
        }
        let Some(ptr) = as_ptr(ctx, args[0]) else {
            return false;
        };
        let value = args[1];
        let value_ty = ctx.value_ty(value);
        let loc = ctx.op(op).location;

        let mut b = OpBuilder::new(ctx, loc);
        let scope = spv::scope_device();
        let out = if core::is_int(&b.ctx.types, value_ty) {
            if is_add {
                let a = spv::atomic_iadd(b.ctx, b.loc, ptr, value, value_ty, scope);
                b.track(a).result(b.ctx)
            } else {
                let a = spv::atomic_isub(b.ctx, b.loc, ptr, value, value_ty, scope);
                b.track(a).result(b.ctx)
            }
        } else if core::is_float(&b.ctx.types, value_ty) {
            let operand = if is_sub {
                // Subtraction is negate + atomic add; a zero result can
                // come out as -0.0.
                let neg = spv::fnegate(b.ctx, b.loc, value, value_ty);
                b.track(neg).result(b.ctx)
            } else {
                value
            };
            let a = spv::atomic_fadd(b.ctx, b.loc, ptr, operand, value_ty, scope);
            b.track(a).result(b.ctx)
        } else {
            return false;
        };
        for emitted in b.into_ops() {
            rewriter.insert_op(emitted);
        }
        rewriter.erase_op(vec![out]);
        true
    }

    fn name(&self) -> &'static str {
        "ConvertAtomics"
    }
}

struct ConvertBarrier;

impl ConversionPattern for ConvertBarrier {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("gpu"), Symbol::new("barrier")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        _converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(barrier) = gpu::Barrier::from_op(ctx, op) else {
            return false;
        };
        let semantics = if barrier.flags(ctx) == gpu::fence_global() {
            spv::semantics_global()
        } else if barrier.flags(ctx) == gpu::fence_local() {
            spv::semantics_local()
        } else {
            return false;
        };
        let loc = ctx.op(op).location;
        let scope = spv::scope_workgroup();
        let new_op = spv::control_barrier(ctx, loc, scope, scope, semantics);
        rewriter.replace_op(new_op.op_ref());
        true
    }

    fn name(&self) -> &'static str {
        "ConvertBarrier"
    }
}

struct ConvertMemFence;

impl ConversionPattern for ConvertMemFence {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("gpu"), Symbol::new("mem_fence")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        _converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(fence) = gpu::MemFence::from_op(ctx, op) else {
            return false;
        };
        let semantics = if fence.flags(ctx) == gpu::fence_global() {
            spv::semantics_global()
        } else if fence.flags(ctx) == gpu::fence_local() {
            spv::semantics_local()
        } else {
            return false;
        };
        let loc = ctx.op(op).location;
        let new_op = spv::memory_barrier(ctx, loc, spv::scope_workgroup(), semantics);
        rewriter.replace_op(new_op.op_ref());
        true
    }

    fn name(&self) -> &'static str {
        "ConvertMemFence"
    }
}

/// Group reductions; only ADD is mapped, anything else stays illegal and
/// fails the pass explicitly.
struct ConvertReductions {
    subgroup: bool,
}

impl ConversionPattern for ConvertReductions {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        let name = if self.subgroup {
            "subgroup_reduce"
        } else {
            "all_reduce"
        };
        Some((Symbol::new("gpu"), Symbol::new(name)))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        _converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let kind_key = Symbol::new("op");
        let Some(kind) = ctx
            .op(op)
            .attributes
            .get(&kind_key)
            .and_then(pyrite_ir::Attribute::as_symbol)
        else {
            return false;
        };
        if kind != gpu::reduce_add() {
            return false;
        }
        let value = ctx.op_operands(op)[0];
        let value_ty = ctx.value_ty(value);
        let loc = ctx.op(op).location;
        let scope = if self.subgroup {
            spv::scope_subgroup()
        } else {
            spv::scope_workgroup()
        };
        let group_op = spv::group_op_reduce();
        let new_op = if core::is_float(&ctx.types, value_ty) {
            spv::group_fadd(ctx, loc, value, value_ty, scope, group_op).op_ref()
        } else {
            spv::group_iadd(ctx, loc, value, value_ty, scope, group_op).op_ref()
        };
        rewriter.replace_op(new_op);
        true
    }

    fn name(&self) -> &'static str {
        "ConvertReductions"
    }
}

/// Kernel body terminator.
struct ConvertTerminator;

impl ConversionPattern for ConvertTerminator {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("gpu"), Symbol::new("terminator")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        _converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let loc = ctx.op(op).location;
        let new_op = spv::r#return(ctx, loc);
        rewriter.replace_op(new_op.op_ref());
        true
    }

    fn name(&self) -> &'static str {
        "ConvertTerminator"
    }
}

fn spirv_target() -> ConversionTarget {
    let mut target = ConversionTarget::new();
    target.add_illegal_dialect("mem");
    target.add_illegal_op("gpu", "barrier");
    target.add_illegal_op("gpu", "mem_fence");
    target.add_illegal_op("gpu", "all_reduce");
    target.add_illegal_op("gpu", "subgroup_reduce");
    target.add_illegal_op("gpu", "terminator");
    target.add_legal_dialect("spv");
    target.add_legal_dialect("arith");
    target.add_legal_op("gpu", "block_id");
    target.add_legal_op("gpu", "thread_id");
    target.add_dynamic_check(|ctx, op| {
        if func::Call::matches(ctx, op) {
            let callee = pyrite_ir::dialect::func::Call::from_op(ctx, op)
                .map(|c| c.callee(ctx).as_string())
                .unwrap_or_default();
            if callee.starts_with("atomic_add") || callee.starts_with("atomic_sub") {
                return Some(Legality::Illegal);
            }
        }
        None
    });
    target
}

/// Build the SPIR-V twin of every gpu module in `module`.
pub fn convert_to_spirv(ctx: &mut IrContext, module: ModuleRef) -> Result<(), SpirvError> {
    let converter = spirv_converter();
    let module_block = module.first_block(ctx).expect("module body block");

    let gpu_modules: Vec<OpRef> = module
        .ops(ctx)
        .into_iter()
        .filter(|&op| gpu::GpuModule::matches(ctx, op))
        .collect();

    for gpu_module_op in gpu_modules {
        let gpu_module = gpu::GpuModule::from_op(ctx, gpu_module_op).expect("collected");
        let name = gpu_module.sym_name(ctx);
        let caps = gpu_module
            .caps(ctx)
            .unwrap_or_else(spv::default_capabilities);
        let exts = gpu_module
            .exts(ctx)
            .unwrap_or_else(spv::default_extensions);
        let loc = ctx.op(gpu_module_op).location;

        // Clone the kernels into the twin as spv.funcs.
        let twin_block = ctx.create_block(BlockData::empty(loc));
        let kernels: Vec<OpRef> = {
            let body = gpu_module.body(ctx);
            match ctx.entry_block(body) {
                Some(block) => ctx.block(block).ops.to_vec(),
                None => Vec::new(),
            }
        };
        for kernel_op in kernels {
            let Ok(kernel) = gpu::GpuFunc::from_op(ctx, kernel_op) else {
                continue;
            };
            let cloned = clone_op(ctx, kernel_op);
            let cloned_kernel = gpu::GpuFunc::from_op(ctx, cloned).expect("clone keeps kind");
            let body = cloned_kernel.body(ctx);
            ctx.detach_region(body);

            let kernel_name = kernel.sym_name(ctx);
            let fn_ty = kernel.r#type(ctx);
            let abi = kernel.abi(ctx);
            let spv_fn = spv::func(ctx, loc, kernel_name, fn_ty, abi, body);
            ctx.push_op(twin_block, spv_fn.op_ref());

            // The cloned gpu.func shell is no longer needed.
            helpers::erase_op(ctx, cloned);
        }

        let twin_region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![twin_block],
            parent_op: None,
        });
        let twin = spv::module(ctx, loc, name, caps, exts, twin_region);
        ctx.push_op(module_block, twin.op_ref());

        // Retype signatures, then convert the bodies.
        let twin_body = ctx.op(twin.op_ref()).regions[0];
        pyrite_ir::rewrite::signature::convert_region_signatures(ctx, twin_body, &converter);

        let target = spirv_target();
        let patterns: Vec<Box<dyn ConversionPattern>> = vec![
            Box::new(ConvertLoad),
            Box::new(ConvertStore),
            Box::new(ConvertAtomics),
            Box::new(ConvertBarrier),
            Box::new(ConvertMemFence),
            Box::new(ConvertReductions { subgroup: false }),
            Box::new(ConvertReductions { subgroup: true }),
            Box::new(ConvertTerminator),
        ];
        region_conversion(ctx, twin_body, &target, &converter, patterns);

        // Everything the target calls illegal must be gone.
        let illegal = target.verify(ctx, twin_body);
        if let Some(first) = illegal.first() {
            return Err(SpirvError::Unconverted {
                module: name,
                first: first.to_string(),
            });
        }
    }
    Ok(())
}
