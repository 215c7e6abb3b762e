//! Device buffer placement.
//!
//! Classifies every buffer reaching a kernel launch body as host/device
//! read/written, then rewrites:
//!
//! - host allocations feeding kernels into `gpu.alloc` (`host_shared` when
//!   the host touches the buffer at all),
//! - global fetches and function parameters into a device alloc right
//!   after the producer, a host-to-device copy when the host writes and
//!   the device reads, a device-to-host copy before return when the host
//!   reads what the device wrote, and an unconditional device dealloc
//!   before return.
//!
//! Two devices touching one buffer is a hard error; so is a buffer
//! produced by anything other than an alloc, a global fetch or a function
//! parameter.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use pyrite_ir::dialect::{func, gpu, mem};
use pyrite_ir::rewrite::ModuleRef;
use pyrite_ir::{
    helpers, traits, walk, DialectOp, IrContext, OpRef, Symbol, Traits, ValueDef, ValueRef,
};

use crate::tile::gpu_env_of;

/// Failures of the allocation-placement analysis.
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("function body must have exactly one block")]
    MultiBlockFunction,
    #[error("unhandled memory op inside a kernel launch: {0}")]
    UnhandledMemOp(String),
    #[error("unhandled memref producer: {0}")]
    UnhandledProducer(String),
    #[error("device conflict on one buffer: {0} and {1}")]
    DeviceConflict(Symbol, Symbol),
}

#[derive(Default, Clone)]
struct AccessType {
    device: Option<Symbol>,
    host_read: bool,
    host_write: bool,
    device_read: bool,
    device_write: bool,
}

impl AccessType {
    fn host_shared(&self) -> bool {
        self.host_read || self.host_write
    }

    fn bind_device(&mut self, device: Option<Symbol>) -> Result<(), AllocError> {
        let Some(device) = device else {
            return Ok(());
        };
        match self.device {
            None => {
                self.device = Some(device);
                Ok(())
            }
            Some(existing) if existing == device => Ok(()),
            Some(existing) => Err(AllocError::DeviceConflict(existing, device)),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum BufferSource {
    /// `mem.alloc`
    Alloc(OpRef),
    /// `mem.get_global`
    Global(OpRef),
    /// Entry block argument index.
    Param(u32),
}

/// Follow view chains back to the underlying buffer value.
fn resolve_root(ctx: &IrContext, mut v: ValueRef) -> ValueRef {
    loop {
        let ValueDef::OpResult(def, _) = ctx.value_def(v) else {
            return v;
        };
        let data = ctx.op(def);
        let is_view = data.dialect == Symbol::new("mem")
            && (data.name == Symbol::new("subview")
                || data.name == Symbol::new("cast")
                || data.name == Symbol::new("reinterpret_cast"))
            || (data.dialect == Symbol::new("util")
                && data.name == Symbol::new("memref_bitcast"));
        if !is_view {
            return v;
        }
        v = ctx.op_operands(def)[0];
    }
}

/// Buffers referenced by one op inside a launch body.
fn memrefs_of(ctx: &IrContext, op: OpRef) -> Result<Vec<ValueRef>, AllocError> {
    if let Ok(load) = mem::Load::from_op(ctx, op) {
        return Ok(vec![load.source(ctx)]);
    }
    if let Ok(store) = mem::Store::from_op(ctx, op) {
        return Ok(vec![store.target(ctx)]);
    }
    if let Ok(copy) = mem::Copy::from_op(ctx, op) {
        return Ok(vec![copy.source(ctx), copy.target(ctx)]);
    }
    if func::Call::matches(ctx, op) {
        return Ok(ctx
            .op_operands(op)
            .iter()
            .copied()
            .filter(|&v| mem::is_buffer(&ctx.types, ctx.value_ty(v)))
            .collect());
    }
    Err(AllocError::UnhandledMemOp(ctx.op(op).full_name()))
}

fn has_mem_access(ctx: &IrContext, op: OpRef) -> bool {
    let t = traits::traits_of(ctx, op);
    if mem::Dealloc::matches(ctx, op) {
        return false;
    }
    if t.contains(Traits::MEM_READ) || t.contains(Traits::MEM_WRITE) {
        return true;
    }
    func::Call::matches(ctx, op)
        && ctx
            .op_operands(op)
            .iter()
            .any(|&v| mem::is_buffer(&ctx.types, ctx.value_ty(v)))
}

/// Classify every direct use of `root`.
fn access_type(ctx: &IrContext, root: ValueRef) -> Result<AccessType, AllocError> {
    let mut access = AccessType::default();
    for u in ctx.uses(root) {
        let user = u.user;
        let on_device = ctx
            .ancestor_op(user, |ctx, c| gpu::Launch::matches(ctx, c))
            .is_some();

        if func::Return::matches(ctx, user) {
            access.host_read = true;
            access.host_write = true;
            continue;
        }
        if mem::Dealloc::matches(ctx, user) {
            continue;
        }
        if let Ok(copy) = mem::Copy::from_op(ctx, user) {
            if copy.source(ctx) == root {
                if on_device {
                    access.device_read = true;
                } else {
                    access.host_read = true;
                }
            }
            if copy.target(ctx) == root {
                if on_device {
                    access.device_write = true;
                } else {
                    access.host_write = true;
                }
            }
            if on_device {
                access.bind_device(gpu_env_of(ctx, user).flatten())?;
            }
            continue;
        }

        let t = traits::traits_of(ctx, user);
        let reads = t.contains(Traits::MEM_READ) || func::Call::matches(ctx, user);
        let writes = t.contains(Traits::MEM_WRITE) || func::Call::matches(ctx, user);
        if reads {
            if on_device {
                access.device_read = true;
            } else {
                access.host_read = true;
            }
        }
        if writes {
            if on_device {
                access.device_write = true;
            } else {
                access.host_write = true;
            }
        }
        if on_device && (reads || writes) {
            access.bind_device(gpu_env_of(ctx, user).flatten())?;
        }
    }
    Ok(access)
}

/// Insert device allocations for one function.
fn process_function(ctx: &mut IrContext, f: func::Func) -> Result<(), AllocError> {
    let body = f.body(ctx);
    let blocks = ctx.region(body).blocks.to_vec();
    if blocks.len() != 1 {
        return Err(AllocError::MultiBlockFunction);
    }
    let block = blocks[0];

    // Gather buffers referenced inside launch regions.
    let mut sources: Vec<BufferSource> = Vec::new();
    let mut seen: HashMap<BufferSource, ()> = HashMap::new();
    let mut walk_err = None;
    let _ = walk::walk_region::<()>(ctx, body, &mut |op| {
        if ctx
            .ancestor_op(op, |ctx, c| gpu::Launch::matches(ctx, c))
            .is_none()
            || !has_mem_access(ctx, op)
        {
            return std::ops::ControlFlow::Continue(walk::WalkAction::Advance);
        }
        let memrefs = match memrefs_of(ctx, op) {
            Ok(memrefs) => memrefs,
            Err(err) => {
                walk_err = Some(err);
                return std::ops::ControlFlow::Break(());
            }
        };
        for v in memrefs {
            let root = resolve_root(ctx, v);
            let source = match ctx.value_def(root) {
                ValueDef::OpResult(def, _) => {
                    if mem::Alloc::matches(ctx, def) {
                        BufferSource::Alloc(def)
                    } else if mem::GetGlobal::matches(ctx, def) {
                        BufferSource::Global(def)
                    } else {
                        walk_err =
                            Some(AllocError::UnhandledProducer(ctx.op(def).full_name()));
                        return std::ops::ControlFlow::Break(());
                    }
                }
                ValueDef::BlockArg(arg_block, index) if arg_block == block => {
                    BufferSource::Param(index)
                }
                ValueDef::BlockArg(..) => {
                    walk_err = Some(AllocError::UnhandledProducer(
                        "nested block argument".to_owned(),
                    ));
                    return std::ops::ControlFlow::Break(());
                }
            };
            if seen.insert(source, ()).is_none() {
                sources.push(source);
            }
        }
        std::ops::ControlFlow::Continue(walk::WalkAction::Advance)
    });
    if let Some(err) = walk_err {
        return Err(err);
    }

    let terminator = *ctx
        .block(block)
        .ops
        .last()
        .expect("function block has a terminator");

    for source in sources {
        match source {
            BufferSource::Alloc(alloc_op) => {
                let alloc = mem::Alloc::from_op(ctx, alloc_op).expect("matched");
                let root = alloc.result(ctx);
                let access = access_type(ctx, root)?;
                debug!(host_shared = access.host_shared(), "device alloc replaces host alloc");

                let loc = ctx.op(alloc_op).location;
                let dyn_sizes: Vec<ValueRef> = ctx.op_operands(alloc_op).to_vec();
                let buf_ty = ctx.op_result_types(alloc_op)[0];
                let gpu_alloc = gpu::alloc(
                    ctx,
                    loc,
                    dyn_sizes,
                    buf_ty,
                    access.host_shared(),
                    access.device,
                );
                ctx.insert_op_before(block, alloc_op, gpu_alloc.op_ref());
                let new_buf = gpu_alloc.result(ctx);
                ctx.replace_all_uses(root, new_buf);
                helpers::erase_op(ctx, alloc_op);
            }
            BufferSource::Global(global_op) => {
                let root = ctx.op_result(global_op, 0);
                let mut access = access_type(ctx, root)?;
                // Global initial values count as host writes.
                access.host_write = true;
                insert_shadow_alloc(ctx, block, terminator, root, Some(global_op), &access);
            }
            BufferSource::Param(index) => {
                let root = ctx.block_arg(block, index);
                let mut access = access_type(ctx, root)?;
                // Parameters are owned by the caller.
                access.host_read = true;
                access.host_write = true;
                insert_shadow_alloc(ctx, block, terminator, root, None, &access);
            }
        }
    }

    Ok(())
}

/// Device alloc + copies + dealloc shadowing a host buffer.
fn insert_shadow_alloc(
    ctx: &mut IrContext,
    block: pyrite_ir::BlockRef,
    terminator: OpRef,
    src: ValueRef,
    after: Option<OpRef>,
    access: &AccessType,
) {
    let loc = ctx.value_loc(src);
    let buf_ty = ctx.value_ty(src);

    // Dimension ops for dynamic extents feed the device alloc.
    let shape = mem::shape(&ctx.types, buf_ty).unwrap_or_default();
    let mut except: Vec<OpRef> = Vec::new();
    let mut dyn_sizes: Vec<ValueRef> = Vec::new();
    let mut dim_ops: Vec<OpRef> = Vec::new();
    for (i, extent) in shape.iter().enumerate() {
        if *extent == mem::DYNAMIC {
            let idx_ty = pyrite_ir::dialect::core::index_ty(&mut ctx.types);
            let idx = pyrite_ir::dialect::arith::r#const(
                ctx,
                loc,
                idx_ty,
                pyrite_ir::Attribute::int(i as i64),
            );
            let idx_v = idx.result(ctx);
            let dim = mem::dim(ctx, loc, src, idx_v, idx_ty);
            dim_ops.push(idx.op_ref());
            dim_ops.push(dim.op_ref());
            except.push(idx.op_ref());
            except.push(dim.op_ref());
            dyn_sizes.push(dim.result(ctx));
        }
    }

    let gpu_alloc = gpu::alloc(ctx, loc, dyn_sizes, buf_ty, access.host_shared(), access.device);
    except.push(gpu_alloc.op_ref());
    let device_buf = gpu_alloc.result(ctx);

    let copy_in = if access.host_write && access.device_read {
        let copy = mem::copy(ctx, loc, src, device_buf);
        except.push(copy.op_ref());
        Some(copy.op_ref())
    } else {
        None
    };

    // Place: dims, alloc, copy at the insertion point.
    let mut to_place: Vec<OpRef> = dim_ops;
    to_place.push(gpu_alloc.op_ref());
    to_place.extend(copy_in);
    match after {
        Some(anchor) => {
            let mut prev = anchor;
            for op in to_place {
                ctx.insert_op_after(block, prev, op);
                prev = op;
            }
        }
        None => {
            let first = ctx.block(block).ops.first().copied();
            for op in to_place {
                match first {
                    Some(anchor) => ctx.insert_op_before(block, anchor, op),
                    None => ctx.push_op(block, op),
                }
            }
        }
    }

    // Redirect every other use to the device buffer.
    ctx.replace_all_uses_except(src, device_buf, &except);

    // Copy back and release before the function returns.
    if access.host_read && access.device_write {
        let copy_back = mem::copy(ctx, loc, device_buf, src);
        ctx.insert_op_before(block, terminator, copy_back.op_ref());
    }
    let dealloc = gpu::dealloc(ctx, loc, device_buf, access.device);
    ctx.insert_op_before(block, terminator, dealloc.op_ref());
}

/// Run the placement analysis over every function in the module.
pub fn insert_gpu_allocs(ctx: &mut IrContext, module: ModuleRef) -> Result<(), AllocError> {
    for op in module.ops(ctx) {
        if let Ok(f) = func::Func::from_op(ctx, op) {
            // Skip declarations.
            let body = f.body(ctx);
            let has_ops = ctx
                .entry_block(body)
                .map(|b| !ctx.block(b).ops.is_empty())
                .unwrap_or(false);
            if has_ops {
                process_function(ctx, f)?;
            }
        }
    }
    Ok(())
}
