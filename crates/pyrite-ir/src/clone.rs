//! Deep cloning of ops and regions with value remapping.
//!
//! The cloner walks a source region tree, re-creating blocks and ops in
//! order while maintaining a source-to-clone value map. Operands defined
//! outside the cloned tree are looked up in the caller-provided seed map
//! and fall back to themselves (capture), which is what the inliner wants.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::context::{BlockData, IrContext, OperationDataBuilder, RegionData};
use crate::refs::{BlockRef, OpRef, RegionRef, ValueRef};

/// Value and block mapping accumulated during a clone.
#[derive(Default)]
pub struct CloneMap {
    pub values: HashMap<ValueRef, ValueRef>,
    pub blocks: HashMap<BlockRef, BlockRef>,
}

impl CloneMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a mapping (e.g. callee params to call operands).
    pub fn map_value(&mut self, from: ValueRef, to: ValueRef) {
        self.values.insert(from, to);
    }

    fn resolve(&self, v: ValueRef) -> ValueRef {
        self.values.get(&v).copied().unwrap_or(v)
    }
}

/// Clone a region tree, returning the new region.
pub fn clone_region(ctx: &mut IrContext, region: RegionRef, map: &mut CloneMap) -> RegionRef {
    let loc = ctx.region(region).location;
    let src_blocks: Vec<BlockRef> = ctx.region(region).blocks.to_vec();

    // Create the blocks first so forward successor references resolve.
    let mut new_blocks: SmallVec<[BlockRef; 4]> = SmallVec::new();
    for &src in &src_blocks {
        let block_loc = ctx.block(src).location;
        let args = ctx.block(src).args.clone();
        let new_block = ctx.create_block(BlockData {
            location: block_loc,
            args,
            ops: SmallVec::new(),
            parent_region: None,
        });
        map.blocks.insert(src, new_block);
        let src_args: Vec<ValueRef> = ctx.block_args(src).to_vec();
        let new_args: Vec<ValueRef> = ctx.block_args(new_block).to_vec();
        for (s, n) in src_args.into_iter().zip(new_args) {
            // Seeded mappings (entry args rewired by the caller) win.
            map.values.entry(s).or_insert(n);
        }
        new_blocks.push(new_block);
    }

    for (&src, &dst) in src_blocks.iter().zip(new_blocks.iter()) {
        let ops: Vec<OpRef> = ctx.block(src).ops.to_vec();
        for op in ops {
            let cloned = clone_op_into(ctx, op, map);
            ctx.push_op(dst, cloned);
        }
    }

    ctx.create_region(RegionData {
        location: loc,
        blocks: new_blocks,
        parent_op: None,
    })
}

/// Clone a single op (and its region tree), resolving operands through the
/// map. The clone is detached.
pub fn clone_op_into(ctx: &mut IrContext, op: OpRef, map: &mut CloneMap) -> OpRef {
    let loc = ctx.op(op).location;
    let dialect = ctx.op(op).dialect;
    let name = ctx.op(op).name;
    let attributes = ctx.op(op).attributes.clone();
    let operands: Vec<ValueRef> = ctx.op_operands(op).to_vec();
    let result_types: Vec<_> = ctx.op_result_types(op).to_vec();
    let regions: Vec<RegionRef> = ctx.op(op).regions.to_vec();
    let successors: Vec<BlockRef> = ctx.op(op).successors.to_vec();

    let mut builder = OperationDataBuilder::new(loc, dialect, name);
    for v in operands {
        builder = builder.operand(map.resolve(v));
    }
    builder = builder.results(result_types);
    for region in regions {
        let cloned = clone_region(ctx, region, map);
        builder = builder.region(cloned);
    }
    for succ in successors {
        let mapped = map.blocks.get(&succ).copied().unwrap_or(succ);
        builder = builder.successor(mapped);
    }
    let mut data = builder.build(ctx);
    data.attributes = attributes;

    let new_op = ctx.create_op(data);

    let src_results: Vec<ValueRef> = ctx.op_results(op).to_vec();
    let new_results: Vec<ValueRef> = ctx.op_results(new_op).to_vec();
    for (s, n) in src_results.into_iter().zip(new_results) {
        map.values.insert(s, n);
    }

    new_op
}

/// Clone a detached copy of `op` with no external remapping.
pub fn clone_op(ctx: &mut IrContext, op: OpRef) -> OpRef {
    let mut map = CloneMap::new();
    clone_op_into(ctx, op, &mut map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{arith, core, func, scf};
    use crate::{Attribute, DialectOp, Symbol};
    use smallvec::smallvec;

    #[test]
    fn clone_op_remaps_operands() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);

        let a = arith::r#const(&mut ctx, loc, i32_ty, Attribute::int(1));
        let b = arith::r#const(&mut ctx, loc, i32_ty, Attribute::int(2));
        let a_v = a.result(&ctx);
        let b_v = b.result(&ctx);
        let add = arith::addi(&mut ctx, loc, a_v, b_v, i32_ty);

        let mut map = CloneMap::new();
        map.map_value(a.result(&ctx), b.result(&ctx));
        let cloned = clone_op_into(&mut ctx, add.op_ref(), &mut map);

        let b_val = b.result(&ctx);
        assert_eq!(ctx.op_operands(cloned), &[b_val, b_val]);
        assert_eq!(
            map.values.get(&add.result(&ctx)),
            Some(&ctx.op_result(cloned, 0)),
        );
    }

    #[test]
    fn clone_region_rebuilds_nested_structure() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);

        // fn body: %0 = const; yield %0
        let entry = ctx.create_block(crate::BlockData::empty(loc));
        let c = arith::r#const(&mut ctx, loc, i32_ty, Attribute::int(5));
        ctx.push_op(entry, c.op_ref());
        let c_v = c.result(&ctx);
        let y = scf::r#yield(&mut ctx, loc, [c_v]);
        ctx.push_op(entry, y.op_ref());
        let body = ctx.create_region(crate::RegionData {
            location: loc,
            blocks: smallvec![entry],
            parent_op: None,
        });

        let mut map = CloneMap::new();
        let cloned = clone_region(&mut ctx, body, &mut map);
        assert_ne!(cloned, body);

        let new_entry = ctx.entry_block(cloned).unwrap();
        assert_ne!(new_entry, entry);
        let ops = ctx.block(new_entry).ops.to_vec();
        assert_eq!(ops.len(), 2);

        let new_const = arith::Const::from_op(&ctx, ops[0]).unwrap();
        assert_eq!(new_const.value(&ctx), Attribute::int(5));
        // The cloned yield must consume the cloned const, not the original.
        let new_yield = scf::Yield::from_op(&ctx, ops[1]).unwrap();
        assert_eq!(new_yield.values(&ctx), &[new_const.result(&ctx)]);
    }

    #[test]
    fn clone_function_preserves_attrs() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);
        let fn_ty = func::fn_ty(&mut ctx.types, i32_ty, [i32_ty]);

        let entry = ctx.create_block(crate::BlockData {
            location: loc,
            args: vec![crate::BlockArgData::of(i32_ty)],
            ops: smallvec![],
            parent_region: None,
        });
        let arg = ctx.block_arg(entry, 0);
        let ret = func::r#return(&mut ctx, loc, [arg]);
        ctx.push_op(entry, ret.op_ref());
        let body = ctx.create_region(crate::RegionData {
            location: loc,
            blocks: smallvec![entry],
            parent_op: None,
        });
        let f = func::func(
            &mut ctx,
            loc,
            Symbol::new("id"),
            fn_ty,
            Some(Attribute::Unit),
            None,
            body,
        );

        let cloned = clone_op(&mut ctx, f.op_ref());
        let cloned_f = func::Func::from_op(&ctx, cloned).unwrap();
        assert_eq!(cloned_f.sym_name(&ctx), Symbol::new("id"));
        assert_eq!(cloned_f.force_inline(&ctx), Some(Attribute::Unit));

        // Cloned body returns its own block arg, not the original's.
        let cloned_entry = ctx.entry_block(cloned_f.body(&ctx)).unwrap();
        let cloned_arg = ctx.block_arg(cloned_entry, 0);
        let cloned_ret = ctx.block(cloned_entry).ops[0];
        assert_eq!(ctx.op_operands(cloned_ret), &[cloned_arg]);
    }
}
