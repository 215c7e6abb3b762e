//! Memref flattening inside kernel launch bodies.
//!
//! Loads, stores and subviews on rank>1 or non-identity-layout buffers are
//! rewritten against a rank-1 reinterpretation of the same buffer with an
//! explicitly computed linear index: a row-major Horner chain over the
//! dimension extents for identity layouts, or the stride metadata for
//! strided ones.

use pyrite_ir::dialect::{arith, core, gpu, mem, util};
use pyrite_ir::rewrite::{ModuleRef, PatternApplicator, PatternRewriter, RewritePattern};
use pyrite_ir::{DialectOp, IrContext, OpBuilder, OpRef, Symbol, ValueRef};

fn inside_launch(ctx: &IrContext, op: OpRef) -> bool {
    ctx.ancestor_op(op, |ctx, c| gpu::Launch::matches(ctx, c))
        .is_some()
}

fn needs_flatten(ctx: &IrContext, buffer: ValueRef) -> bool {
    let ty = ctx.value_ty(buffer);
    if !mem::is_buffer(&ctx.types, ty) {
        return false;
    }
    let rank = mem::rank(&ctx.types, ty).unwrap_or(0);
    rank > 1 || !mem::has_identity_layout(&ctx.types, ty)
}

/// Extent of dimension `k`, as a value.
fn dim_extent(b: &mut OpBuilder<'_>, buffer: ValueRef, k: usize) -> ValueRef {
    let ty = b.ctx.value_ty(buffer);
    let shape = mem::shape(&b.ctx.types, ty).unwrap_or_default();
    let idx_ty = core::index_ty(&mut b.ctx.types);
    match shape.get(k) {
        Some(&extent) if extent != mem::DYNAMIC => b.const_int(idx_ty, extent),
        _ => {
            let k_v = b.const_index(k as i64);
            let dim = mem::dim(b.ctx, b.loc, buffer, k_v, idx_ty);
            b.track(dim).result(b.ctx)
        }
    }
}

/// Linear index of `indices` into `buffer` under its layout.
fn flat_index(b: &mut OpBuilder<'_>, buffer: ValueRef, indices: &[ValueRef]) -> ValueRef {
    let ty = b.ctx.value_ty(buffer);
    let idx_ty = core::index_ty(&mut b.ctx.types);
    if indices.is_empty() {
        return b.const_int(idx_ty, 0);
    }

    if mem::has_identity_layout(&b.ctx.types, ty) {
        // Row-major Horner chain: ((i0 * d1 + i1) * d2 + i2)...
        let mut linear = indices[0];
        for (k, &idx) in indices.iter().enumerate().skip(1) {
            let extent = dim_extent(b, buffer, k);
            let mul = arith::muli(b.ctx, b.loc, linear, extent, idx_ty);
            let mul_v = b.track(mul).result(b.ctx);
            let add = arith::addi(b.ctx, b.loc, mul_v, idx, idx_ty);
            linear = b.track(add).result(b.ctx);
        }
        linear
    } else {
        // offset + sum(idx_k * stride_k) from the descriptor metadata.
        let offset_op = util::extract_memref_metadata(b.ctx, b.loc, buffer, idx_ty, None);
        let mut linear = b.track(offset_op).result(b.ctx);
        for (k, &idx) in indices.iter().enumerate() {
            let stride_op =
                util::extract_memref_metadata(b.ctx, b.loc, buffer, idx_ty, Some(k as i64));
            let stride = b.track(stride_op).result(b.ctx);
            let mul = arith::muli(b.ctx, b.loc, idx, stride, idx_ty);
            let mul_v = b.track(mul).result(b.ctx);
            let add = arith::addi(b.ctx, b.loc, linear, mul_v, idx_ty);
            linear = b.track(add).result(b.ctx);
        }
        linear
    }
}

/// Rank-1 identity view over the same storage.
fn flat_buffer(b: &mut OpBuilder<'_>, buffer: ValueRef) -> ValueRef {
    let ty = b.ctx.value_ty(buffer);
    let elem = mem::elem_ty(&b.ctx.types, ty).expect("buffer element");
    let space = mem::space(&b.ctx.types, ty).unwrap_or(mem::Space::Host);
    let flat_ty = mem::buffer_ty(
        &mut b.ctx.types,
        elem,
        &[mem::DYNAMIC],
        mem::Layout::Identity,
        space,
    );
    let zero = b.const_index(0);
    let one = b.const_index(1);
    let idx_ty = core::index_ty(&mut b.ctx.types);
    let size = {
        let undef = util::undef(b.ctx, b.loc, idx_ty);
        b.track(undef).result(b.ctx)
    };
    let cast = mem::reinterpret_cast(b.ctx, b.loc, buffer, zero, size, one, flat_ty);
    b.track(cast).result(b.ctx)
}

struct FlattenLoad;

impl RewritePattern for FlattenLoad {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("mem"), Symbol::new("load")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(load) = mem::Load::from_op(ctx, op) else {
            return false;
        };
        if !inside_launch(ctx, op) || !needs_flatten(ctx, load.source(ctx)) {
            return false;
        }
        let source = load.source(ctx);
        let indices: Vec<ValueRef> = load.indices(ctx).to_vec();
        let result_ty = ctx.op_result_types(op)[0];
        let loc = ctx.op(op).location;

        let mut b = OpBuilder::new(ctx, loc);
        let linear = flat_index(&mut b, source, &indices);
        let flat = flat_buffer(&mut b, source);
        let new_load = mem::load(b.ctx, b.loc, flat, [linear], result_ty);
        let out = b.track(new_load).result(b.ctx);
        for emitted in b.into_ops() {
            rewriter.insert_op(emitted);
        }
        rewriter.erase_op(vec![out]);
        true
    }

    fn name(&self) -> &'static str {
        "FlattenLoad"
    }
}

struct FlattenStore;

impl RewritePattern for FlattenStore {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("mem"), Symbol::new("store")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(store) = mem::Store::from_op(ctx, op) else {
            return false;
        };
        if !inside_launch(ctx, op) || !needs_flatten(ctx, store.target(ctx)) {
            return false;
        }
        let value = store.value(ctx);
        let target = store.target(ctx);
        let indices: Vec<ValueRef> = store.indices(ctx).to_vec();
        let loc = ctx.op(op).location;

        let mut b = OpBuilder::new(ctx, loc);
        let linear = flat_index(&mut b, target, &indices);
        let flat = flat_buffer(&mut b, target);
        let new_store = mem::store(b.ctx, b.loc, value, flat, [linear]);
        b.track(new_store);
        for emitted in b.into_ops() {
            rewriter.insert_op(emitted);
        }
        rewriter.erase_op(vec![]);
        true
    }

    fn name(&self) -> &'static str {
        "FlattenStore"
    }
}

struct FlattenSubview;

impl RewritePattern for FlattenSubview {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("mem"), Symbol::new("subview")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(subview) = mem::Subview::from_op(ctx, op) else {
            return false;
        };
        if !inside_launch(ctx, op) || !needs_flatten(ctx, subview.source(ctx)) {
            return false;
        }
        let source = subview.source(ctx);
        let n = subview.num_dims(ctx) as usize;
        let operands: Vec<ValueRef> = subview.operands(ctx).to_vec();
        if operands.len() < n {
            return false;
        }
        let offsets = &operands[..n];
        let loc = ctx.op(op).location;

        // The flattened subview is the rank-1 view advanced to the linear
        // offset; downstream accesses index it linearly.
        let mut b = OpBuilder::new(ctx, loc);
        let linear = flat_index(&mut b, source, offsets);
        let flat = flat_buffer(&mut b, source);
        let ty = b.ctx.value_ty(flat);
        let one = b.const_index(1);
        let idx_ty = core::index_ty(&mut b.ctx.types);
        let size = {
            let undef = util::undef(b.ctx, b.loc, idx_ty);
            b.track(undef).result(b.ctx)
        };
        let shifted = mem::reinterpret_cast(b.ctx, b.loc, flat, linear, size, one, ty);
        let out = b.track(shifted).result(b.ctx);
        for emitted in b.into_ops() {
            rewriter.insert_op(emitted);
        }
        rewriter.erase_op(vec![out]);
        true
    }

    fn name(&self) -> &'static str {
        "FlattenSubview"
    }
}

/// Flatten all kernel-side accesses in the module.
pub fn flatten_memrefs(ctx: &mut IrContext, module: ModuleRef) {
    let mut applicator = PatternApplicator::new()
        .without_folding()
        .add_pattern(FlattenLoad)
        .add_pattern(FlattenStore)
        .add_pattern(FlattenSubview);
    applicator.apply(ctx, module);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyrite_ir::rewrite::applicator::wrap_in_module;
    use pyrite_ir::types::Attribute;
    use pyrite_ir::{walk, BlockData, RegionData};
    use smallvec::smallvec;

    #[test]
    fn rank2_load_in_kernel_becomes_rank1() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let f32_ty = core::float_ty(&mut ctx.types, 32);
        let buf2 =
            mem::buffer_ty(&mut ctx.types, f32_ty, &[4, 8], mem::Layout::Identity, mem::Space::Host);
        let idx_ty = core::index_ty(&mut ctx.types);

        // Host side: alloc + launch region containing a 2D load.
        let alloc = mem::alloc(&mut ctx, loc, [], buf2);
        let c0 = arith::r#const(&mut ctx, loc, idx_ty, Attribute::int(0));
        let c1 = arith::r#const(&mut ctx, loc, idx_ty, Attribute::int(1));

        let body = ctx.create_block(BlockData {
            location: loc,
            args: (0..6).map(|_| pyrite_ir::BlockArgData::of(idx_ty)).collect(),
            ops: smallvec![],
            parent_region: None,
        });
        let alloc_v = alloc.result(&ctx);
        let c0_v = c0.result(&ctx);
        let c1_v = c1.result(&ctx);
        let load = mem::load(&mut ctx, loc, alloc_v, [c0_v, c1_v], f32_ty);
        ctx.push_op(body, load.op_ref());
        let term = gpu::terminator(&mut ctx, loc);
        ctx.push_op(body, term.op_ref());
        let region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![body],
            parent_op: None,
        });
        let one = arith::r#const(&mut ctx, loc, idx_ty, Attribute::int(1));
        let ov = one.result(&ctx);
        let launch = gpu::launch(&mut ctx, loc, ov, ov, ov, ov, ov, ov, region);

        let module = wrap_in_module(
            &mut ctx,
            Symbol::new("m"),
            vec![
                alloc.op_ref(),
                c0.op_ref(),
                c1.op_ref(),
                one.op_ref(),
                launch.op_ref(),
            ],
        );

        flatten_memrefs(&mut ctx, module);

        // Every load inside the launch now targets a rank-1 buffer.
        let mut checked = 0;
        let _ = walk::walk_region::<std::convert::Infallible>(
            &ctx,
            module.body(&ctx),
            &mut |op| {
                if let Ok(load) = mem::Load::from_op(&ctx, op) {
                    let ty = ctx.value_ty(load.source(&ctx));
                    assert_eq!(mem::rank(&ctx.types, ty), Some(1));
                    assert_eq!(load.indices(&ctx).len(), 1);
                    checked += 1;
                }
                std::ops::ControlFlow::Continue(walk::WalkAction::Advance)
            },
        );
        assert_eq!(checked, 1);
    }
}
