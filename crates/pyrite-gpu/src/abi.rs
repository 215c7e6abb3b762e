//! Kernel ABI attributes, capability sets and binary serialization.

use thiserror::Error;

use pyrite_ir::dialect::{gpu, spv};
use pyrite_ir::rewrite::ModuleRef;
use pyrite_ir::types::Attribute;
use pyrite_ir::{helpers, DialectOp, IrContext, OpRef, Symbol};

/// External collaborator turning an `spv.module` into a device binary.
pub trait AssemblyEmitter {
    fn serialize(&self, ctx: &IrContext, spv_module: OpRef) -> Result<Vec<u8>, String>;
}

#[derive(Debug, Error)]
pub enum AbiError {
    #[error("no spv.module twin found for gpu module `{0}`")]
    MissingTwin(Symbol),
    #[error("device code serialization failed: {0}")]
    Serialize(String),
}

fn gpu_modules(ctx: &IrContext, module: ModuleRef) -> Vec<gpu::GpuModule> {
    module
        .ops(ctx)
        .into_iter()
        .filter_map(|op| gpu::GpuModule::from_op(ctx, op).ok())
        .collect()
}

/// Attach the entry-point ABI attribute to every kernel function.
pub fn attach_abi_attrs(ctx: &mut IrContext, module: ModuleRef) {
    let abi_key = Symbol::new("abi");
    for gpu_module in gpu_modules(ctx, module) {
        let body = gpu_module.body(ctx);
        let Some(block) = ctx.entry_block(body) else {
            continue;
        };
        for op in ctx.block(block).ops.to_vec() {
            let Ok(kernel) = gpu::GpuFunc::from_op(ctx, op) else {
                continue;
            };
            if kernel.kernel(ctx).is_none() || kernel.abi(ctx).is_some() {
                continue;
            }
            ctx.op_mut(op).attributes.insert(abi_key, Attribute::Unit);
        }
    }
}

/// Attach the default capability/extension set to modules without one.
pub fn set_spirv_capabilities(ctx: &mut IrContext, module: ModuleRef) {
    let caps_key = Symbol::new("caps");
    let exts_key = Symbol::new("exts");
    for gpu_module in gpu_modules(ctx, module) {
        let op = gpu_module.op_ref();
        if !ctx.op(op).attributes.contains_key(&caps_key) {
            ctx.op_mut(op)
                .attributes
                .insert(caps_key, spv::default_capabilities());
        }
        if !ctx.op(op).attributes.contains_key(&exts_key) {
            ctx.op_mut(op)
                .attributes
                .insert(exts_key, spv::default_extensions());
        }
    }
}

/// Serialize each gpu module's SPIR-V twin and attach the binary.
///
/// The twin `spv.module` (named after the gpu module) is erased once its
/// bytes are attached.
pub fn serialize_spirv(
    ctx: &mut IrContext,
    module: ModuleRef,
    emitter: &dyn AssemblyEmitter,
) -> Result<(), AbiError> {
    let binary_key = Symbol::new("binary");
    for gpu_module in gpu_modules(ctx, module) {
        let name = gpu_module.sym_name(ctx);
        let twin = module
            .ops(ctx)
            .into_iter()
            .find(|&op| {
                spv::Module::matches(ctx, op)
                    && pyrite_ir::symbol_table::symbol_of(ctx, op) == Some(name)
            })
            .ok_or(AbiError::MissingTwin(name))?;

        let bytes = emitter
            .serialize(ctx, twin)
            .map_err(AbiError::Serialize)?;
        ctx.op_mut(gpu_module.op_ref())
            .attributes
            .insert(binary_key, Attribute::Bytes(bytes.into_iter().collect()));

        let regions = ctx.op(twin).regions.to_vec();
        for region in regions {
            helpers::erase_region_tree(ctx, region);
        }
        helpers::erase_op(ctx, twin);
    }
    Ok(())
}
