//! Pre-order traversal over nested operations.

use std::ops::ControlFlow;

use crate::context::IrContext;
use crate::refs::{BlockRef, OpRef, RegionRef};

/// Whether to descend into the current op's regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    /// Visit nested regions.
    Advance,
    /// Skip the current op's regions.
    Skip,
}

/// Walk all ops in a region, pre-order, insertion order.
pub fn walk_region<B>(
    ctx: &IrContext,
    region: RegionRef,
    f: &mut dyn FnMut(OpRef) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    for &block in &ctx.region(region).blocks {
        walk_block(ctx, block, f)?;
    }
    ControlFlow::Continue(())
}

/// Walk all ops in a block, recursing into regions.
pub fn walk_block<B>(
    ctx: &IrContext,
    block: BlockRef,
    f: &mut dyn FnMut(OpRef) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    for &op in &ctx.block(block).ops {
        walk_op(ctx, op, f)?;
    }
    ControlFlow::Continue(())
}

/// Walk one op and its nested regions.
pub fn walk_op<B>(
    ctx: &IrContext,
    op: OpRef,
    f: &mut dyn FnMut(OpRef) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    match f(op) {
        ControlFlow::Break(b) => return ControlFlow::Break(b),
        ControlFlow::Continue(WalkAction::Skip) => return ControlFlow::Continue(()),
        ControlFlow::Continue(WalkAction::Advance) => {}
    }
    for &region in &ctx.op(op).regions {
        walk_region(ctx, region, f)?;
    }
    ControlFlow::Continue(())
}

/// Collect every op under `region` in traversal order, without early exit.
pub fn collect_ops(ctx: &IrContext, region: RegionRef) -> Vec<OpRef> {
    let mut out = Vec::new();
    let _ = walk_region::<std::convert::Infallible>(ctx, region, &mut |op| {
        out.push(op);
        ControlFlow::Continue(WalkAction::Advance)
    });
    out
}
