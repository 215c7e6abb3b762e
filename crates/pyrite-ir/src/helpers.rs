//! Compound mutation helpers built on the context primitives.

use smallvec::SmallVec;

use crate::context::{BlockData, IrContext};
use crate::refs::{BlockRef, OpRef, RegionRef};

/// Split `block` at `before_op`: that op and everything after it move into
/// a new block inserted right after `block` in the same region.
///
/// The new block starts with no arguments.
///
/// # Panics
///
/// If `before_op` is not in `block`, or `block` has no parent region.
pub fn split_block(ctx: &mut IrContext, block: BlockRef, before_op: OpRef) -> BlockRef {
    let loc = ctx.block(block).location;

    let ops = &ctx.block(block).ops;
    let pos = ops
        .iter()
        .position(|&o| o == before_op)
        .expect("split_block: op not found in block");
    let tail: SmallVec<[OpRef; 4]> = ops[pos..].into();

    ctx.block_mut(block).ops.truncate(pos);

    let new_block = ctx.create_block(BlockData::empty(loc));
    for &op in &tail {
        ctx.op_mut(op).parent_block = Some(new_block);
    }
    ctx.block_mut(new_block).ops = tail;

    let region = ctx
        .block(block)
        .parent_region
        .expect("split_block: block must be inside a region");
    let block_pos = ctx
        .region(region)
        .blocks
        .iter()
        .position(|&b| b == block)
        .expect("split_block: block not found in parent region");
    ctx.region_mut(region).blocks.insert(block_pos + 1, new_block);
    ctx.block_mut(new_block).parent_region = Some(region);

    new_block
}

/// Move all blocks of `src_region` into `dest_region`, before `insert_before`
/// or at the end. `src_region` is left empty.
pub fn inline_region_blocks(
    ctx: &mut IrContext,
    src_region: RegionRef,
    dest_region: RegionRef,
    insert_before: Option<BlockRef>,
) -> Vec<BlockRef> {
    if src_region == dest_region {
        return Vec::new();
    }

    let src_blocks: SmallVec<[BlockRef; 4]> =
        std::mem::take(&mut ctx.region_mut(src_region).blocks);
    let moved: Vec<BlockRef> = src_blocks.to_vec();

    for &b in &src_blocks {
        ctx.block_mut(b).parent_region = Some(dest_region);
    }

    let dest_blocks = &mut ctx.region_mut(dest_region).blocks;
    if let Some(before) = insert_before {
        let pos = dest_blocks
            .iter()
            .position(|&b| b == before)
            .expect("inline_region_blocks: anchor block not in dest region");
        for (i, &b) in src_blocks.iter().enumerate() {
            dest_blocks.insert(pos + i, b);
        }
    } else {
        dest_blocks.extend(src_blocks);
    }

    moved
}

/// Move `block` to the end of `dest_region`, detaching it from whatever
/// region currently holds it.
pub fn move_block(ctx: &mut IrContext, block: BlockRef, dest_region: RegionRef) {
    if let Some(src) = ctx.block(block).parent_region {
        if src == dest_region {
            return;
        }
        ctx.region_mut(src).blocks.retain(|b| *b != block);
    }
    ctx.block_mut(block).parent_region = Some(dest_region);
    ctx.region_mut(dest_region).blocks.push(block);
}

/// Detach an op from its block and destroy it. Results must be unused.
pub fn erase_op(ctx: &mut IrContext, op: OpRef) {
    ctx.detach_op(op);
    ctx.remove_op(op);
}

/// Erase every op in a region tree at once.
///
/// Used when discarding whole regions (dead function bodies, rollback
/// backups). Uses of values defined in the tree must all come from within
/// the tree; external operands' use-chain entries are cleaned up here.
pub fn erase_region_tree(ctx: &mut IrContext, region: RegionRef) {
    let all_ops = crate::walk::collect_ops(ctx, region);

    // Strip every erased op's operand uses, wherever the operand is defined.
    for &op in &all_ops {
        let operands: Vec<crate::ValueRef> = ctx.op_operands(op).to_vec();
        for (idx, val) in operands.into_iter().enumerate() {
            let idx = idx as u32;
            let mut remaining: SmallVec<[crate::context::Use; 2]> = SmallVec::new();
            for u in ctx.uses(val) {
                if !(u.user == op && u.operand_index == idx) {
                    remaining.push(*u);
                }
            }
            ctx.set_uses(val, remaining);
        }
    }

    fn clear_region(ctx: &mut IrContext, region: RegionRef) {
        let blocks: Vec<BlockRef> = ctx.region(region).blocks.to_vec();
        for block in blocks {
            let ops: Vec<OpRef> = ctx.block(block).ops.to_vec();
            for op in ops {
                let nested: Vec<RegionRef> = ctx.op(op).regions.to_vec();
                for r in nested {
                    clear_region(ctx, r);
                }
                ctx.op_mut(op).parent_block = None;
            }
            ctx.block_mut(block).ops.clear();
        }
        ctx.region_mut(region).blocks.clear();
    }
    clear_region(ctx, region);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{OperationDataBuilder, RegionData};
    use crate::types::{Attribute, TypeDataBuilder};
    use crate::{Symbol, TypeRef};
    use smallvec::smallvec;

    fn index_ty(ctx: &mut IrContext) -> TypeRef {
        ctx.types
            .intern(TypeDataBuilder::new(Symbol::new("core"), Symbol::new("index")).build())
    }

    fn mk_const(ctx: &mut IrContext, ty: TypeRef, v: i64) -> OpRef {
        let loc = ctx.unknown_loc();
        let data = OperationDataBuilder::new(loc, Symbol::new("arith"), Symbol::new("const"))
            .result(ty)
            .attr("value", Attribute::int(v))
            .build(ctx);
        ctx.create_op(data)
    }

    #[test]
    fn split_moves_tail_ops() {
        let mut ctx = IrContext::new();
        let ty = index_ty(&mut ctx);
        let loc = ctx.unknown_loc();
        let block = ctx.create_block(BlockData::empty(loc));

        let a = mk_const(&mut ctx, ty, 0);
        let b = mk_const(&mut ctx, ty, 1);
        let c = mk_const(&mut ctx, ty, 2);
        ctx.push_op(block, a);
        ctx.push_op(block, b);
        ctx.push_op(block, c);
        let region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![block],
            parent_op: None,
        });

        let tail = split_block(&mut ctx, block, b);
        assert_eq!(ctx.block(block).ops.as_slice(), &[a]);
        assert_eq!(ctx.block(tail).ops.as_slice(), &[b, c]);
        assert_eq!(ctx.op(b).parent_block, Some(tail));
        assert_eq!(ctx.region(region).blocks.as_slice(), &[block, tail]);
    }

    #[test]
    fn inline_blocks_before_anchor() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let anchor = ctx.create_block(BlockData::empty(loc));
        let b1 = ctx.create_block(BlockData::empty(loc));
        let b2 = ctx.create_block(BlockData::empty(loc));

        let dest = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![anchor],
            parent_op: None,
        });
        let src = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![b1, b2],
            parent_op: None,
        });

        let moved = inline_region_blocks(&mut ctx, src, dest, Some(anchor));
        assert_eq!(moved, vec![b1, b2]);
        assert_eq!(ctx.region(dest).blocks.as_slice(), &[b1, b2, anchor]);
        assert!(ctx.region(src).blocks.is_empty());
        assert_eq!(ctx.block(b1).parent_region, Some(dest));
    }

    #[test]
    fn move_block_rehomes_between_regions() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let a = ctx.create_block(BlockData::empty(loc));
        let b = ctx.create_block(BlockData::empty(loc));
        let src = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![a, b],
            parent_op: None,
        });
        let dest = ctx.create_region(RegionData::empty(loc));

        move_block(&mut ctx, b, dest);
        assert_eq!(ctx.region(src).blocks.as_slice(), &[a]);
        assert_eq!(ctx.region(dest).blocks.as_slice(), &[b]);
        assert_eq!(ctx.block(b).parent_region, Some(dest));
    }

    #[test]
    fn erase_op_detaches_and_removes() {
        let mut ctx = IrContext::new();
        let ty = index_ty(&mut ctx);
        let loc = ctx.unknown_loc();
        let block = ctx.create_block(BlockData::empty(loc));
        let op = mk_const(&mut ctx, ty, 3);
        ctx.push_op(block, op);

        erase_op(&mut ctx, op);
        assert!(ctx.block(block).ops.is_empty());
    }

    #[test]
    fn erase_region_tree_clears_everything() {
        let mut ctx = IrContext::new();
        let ty = index_ty(&mut ctx);
        let loc = ctx.unknown_loc();
        let block = ctx.create_block(BlockData::empty(loc));
        let a = mk_const(&mut ctx, ty, 0);
        let va = ctx.op_result(a, 0);
        ctx.push_op(block, a);
        let user = {
            let data = OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("use"))
                .operand(va)
                .build(&mut ctx);
            ctx.create_op(data)
        };
        ctx.push_op(block, user);
        let region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![block],
            parent_op: None,
        });

        erase_region_tree(&mut ctx, region);
        assert!(ctx.region(region).blocks.is_empty());
    }
}
