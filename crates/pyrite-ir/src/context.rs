//! `IrContext`: arena storage and mutation primitives for the IR.
//!
//! Operations, values, blocks and regions live in `PrimaryMap`s owned by the
//! context; operand and result-type lists use `EntityList + ListPool` for
//! compact storage. Use-chains are maintained automatically by every
//! mutation primitive, which is what makes RAUW and the rewrite drivers
//! cheap. A context is not thread-shareable; one context per compilation.

use std::collections::BTreeMap;

use cranelift_entity::{EntityList, ListPool, PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

use crate::refs::*;
use crate::types::*;
use crate::Symbol;

// ============================================================================
// Use-chain
// ============================================================================

/// A single use of a value: the consuming op and the operand index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Use {
    pub user: OpRef,
    pub operand_index: u32,
}

// ============================================================================
// Entity payloads
// ============================================================================

/// Payload of an operation.
pub struct OperationData {
    pub location: Location,
    pub dialect: Symbol,
    pub name: Symbol,
    pub operands: EntityList<ValueRef>,
    pub results: EntityList<TypeRef>,
    pub attributes: BTreeMap<Symbol, Attribute>,
    pub regions: SmallVec<[RegionRef; 4]>,
    pub successors: SmallVec<[BlockRef; 4]>,
    pub parent_block: Option<BlockRef>,
}

impl OperationData {
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.dialect, self.name)
    }
}

/// Payload of an SSA value.
pub struct ValueData {
    pub def: ValueDef,
    pub ty: TypeRef,
}

/// A block argument: type plus optional attributes.
#[derive(Clone, Debug, Default)]
pub struct BlockArgData {
    pub ty: TypeRef,
    pub attrs: BTreeMap<Symbol, Attribute>,
}

impl BlockArgData {
    pub fn of(ty: TypeRef) -> Self {
        Self {
            ty,
            attrs: BTreeMap::new(),
        }
    }
}

/// Payload of a basic block.
pub struct BlockData {
    pub location: Location,
    pub args: Vec<BlockArgData>,
    pub ops: SmallVec<[OpRef; 4]>,
    pub parent_region: Option<RegionRef>,
}

impl BlockData {
    pub fn empty(location: Location) -> Self {
        Self {
            location,
            args: Vec::new(),
            ops: SmallVec::new(),
            parent_region: None,
        }
    }
}

/// Payload of a region.
pub struct RegionData {
    pub location: Location,
    pub blocks: SmallVec<[BlockRef; 4]>,
    pub parent_op: Option<OpRef>,
}

impl RegionData {
    pub fn empty(location: Location) -> Self {
        Self {
            location,
            blocks: SmallVec::new(),
            parent_op: None,
        }
    }
}

// ============================================================================
// IrContext
// ============================================================================

/// Arena-backed mutable IR storage.
///
/// Owns every IR entity of one compilation and keeps the value use-chains
/// consistent across mutations. Dropped wholesale at the end of a
/// compilation; individual erasures only detach entities.
pub struct IrContext {
    ops: PrimaryMap<OpRef, OperationData>,
    values: PrimaryMap<ValueRef, ValueData>,
    blocks: PrimaryMap<BlockRef, BlockData>,
    regions: PrimaryMap<RegionRef, RegionData>,

    uses: SecondaryMap<ValueRef, SmallVec<[Use; 2]>>,

    pub types: TypeInterner,
    pub paths: PathInterner,

    value_pool: ListPool<ValueRef>,
    type_pool: ListPool<TypeRef>,

    result_values: SecondaryMap<OpRef, EntityList<ValueRef>>,
    block_arg_values: SecondaryMap<BlockRef, EntityList<ValueRef>>,
}

impl IrContext {
    pub fn new() -> Self {
        Self {
            ops: PrimaryMap::new(),
            values: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            regions: PrimaryMap::new(),
            uses: SecondaryMap::new(),
            types: TypeInterner::new(),
            paths: PathInterner::new(),
            value_pool: ListPool::new(),
            type_pool: ListPool::new(),
            result_values: SecondaryMap::new(),
            block_arg_values: SecondaryMap::new(),
        }
    }

    /// A location pointing at nothing, for synthesized ops.
    pub fn unknown_loc(&mut self) -> Location {
        let path = self.paths.intern("<unknown>".to_owned());
        Location::new(path, Span::default())
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Create a detached operation and allocate its result values.
    ///
    /// Operand uses are registered; attach the op with [`Self::push_op`] or
    /// one of the insert methods.
    ///
    /// # Panics
    ///
    /// If `data.parent_block` is set, or a region in `data.regions` already
    /// belongs to another op.
    pub fn create_op(&mut self, data: OperationData) -> OpRef {
        assert!(
            data.parent_block.is_none(),
            "create_op: parent_block must be unset; attach via push_op/insert_op_*",
        );

        let operand_slice: SmallVec<[ValueRef; 8]> =
            data.operands.as_slice(&self.value_pool).into();
        let result_types: SmallVec<[TypeRef; 4]> = data.results.as_slice(&self.type_pool).into();
        let regions: SmallVec<[RegionRef; 4]> = data.regions.clone();

        let op = self.ops.push(data);

        for &r in &regions {
            if let Some(existing) = self.regions[r].parent_op {
                panic!("create_op: region {r} already belongs to {existing}");
            }
            self.regions[r].parent_op = Some(op);
        }

        for (idx, &val) in operand_slice.iter().enumerate() {
            self.uses[val].push(Use {
                user: op,
                operand_index: idx as u32,
            });
        }

        let mut result_list = EntityList::new();
        for (idx, &ty) in result_types.iter().enumerate() {
            let v = self.values.push(ValueData {
                def: ValueDef::OpResult(op, idx as u32),
                ty,
            });
            result_list.push(v, &mut self.value_pool);
        }
        self.result_values[op] = result_list;

        op
    }

    pub fn op(&self, op: OpRef) -> &OperationData {
        &self.ops[op]
    }

    /// Mutable access to op data.
    ///
    /// Editing `operands` through this desyncs the use-chain; use
    /// [`Self::set_operand`] / [`Self::replace_all_uses`] instead.
    pub fn op_mut(&mut self, op: OpRef) -> &mut OperationData {
        &mut self.ops[op]
    }

    pub fn op_operands(&self, op: OpRef) -> &[ValueRef] {
        self.ops[op].operands.as_slice(&self.value_pool)
    }

    pub fn op_result_types(&self, op: OpRef) -> &[TypeRef] {
        self.ops[op].results.as_slice(&self.type_pool)
    }

    pub fn op_result(&self, op: OpRef, index: u32) -> ValueRef {
        self.result_values[op].as_slice(&self.value_pool)[index as usize]
    }

    pub fn op_results(&self, op: OpRef) -> &[ValueRef] {
        self.result_values[op].as_slice(&self.value_pool)
    }

    /// Point operand `index` of `op` at `new`, updating the use-chain.
    pub fn set_operand(&mut self, op: OpRef, index: u32, new: ValueRef) {
        let old = self.op_operands(op)[index as usize];
        if old == new {
            return;
        }
        self.uses[old].retain(|u| !(u.user == op && u.operand_index == index));
        let slice = self.ops[op].operands.as_mut_slice(&mut self.value_pool);
        slice[index as usize] = new;
        self.uses[new].push(Use {
            user: op,
            operand_index: index,
        });
    }

    /// Destroy a detached operation.
    ///
    /// # Panics
    ///
    /// If the op is still attached to a block, or any of its results still
    /// has uses.
    pub fn remove_op(&mut self, op: OpRef) {
        assert!(
            self.ops[op].parent_block.is_none(),
            "remove_op: {op} is still attached; detach it first",
        );
        let results: SmallVec<[ValueRef; 4]> =
            self.result_values[op].as_slice(&self.value_pool).into();
        for &val in &results {
            assert!(
                self.uses[val].is_empty(),
                "remove_op: result {val} of {op} still has {} use(s)",
                self.uses[val].len(),
            );
        }
        let operands: SmallVec<[ValueRef; 8]> =
            self.ops[op].operands.as_slice(&self.value_pool).into();
        for (idx, &val) in operands.iter().enumerate() {
            self.uses[val].retain(|u| !(u.user == op && u.operand_index == idx as u32));
        }
    }

    // ========================================================================
    // Values
    // ========================================================================

    pub fn value(&self, v: ValueRef) -> &ValueData {
        &self.values[v]
    }

    pub fn value_ty(&self, v: ValueRef) -> TypeRef {
        self.values[v].ty
    }

    pub fn value_def(&self, v: ValueRef) -> ValueDef {
        self.values[v].def
    }

    /// Location of the value's defining op or block.
    pub fn value_loc(&self, v: ValueRef) -> Location {
        match self.values[v].def {
            ValueDef::OpResult(op, _) => self.ops[op].location,
            ValueDef::BlockArg(block, _) => self.blocks[block].location,
        }
    }

    // ========================================================================
    // Blocks
    // ========================================================================

    /// Create a block and allocate its argument values.
    pub fn create_block(&mut self, data: BlockData) -> BlockRef {
        let arg_types: Vec<TypeRef> = data.args.iter().map(|a| a.ty).collect();
        let block = self.blocks.push(data);

        let mut arg_list = EntityList::new();
        for (idx, ty) in arg_types.into_iter().enumerate() {
            let v = self.values.push(ValueData {
                def: ValueDef::BlockArg(block, idx as u32),
                ty,
            });
            arg_list.push(v, &mut self.value_pool);
        }
        self.block_arg_values[block] = arg_list;

        block
    }

    pub fn block(&self, b: BlockRef) -> &BlockData {
        &self.blocks[b]
    }

    pub fn block_mut(&mut self, b: BlockRef) -> &mut BlockData {
        &mut self.blocks[b]
    }

    pub fn block_arg(&self, b: BlockRef, index: u32) -> ValueRef {
        self.block_arg_values[b].as_slice(&self.value_pool)[index as usize]
    }

    pub fn block_args(&self, b: BlockRef) -> &[ValueRef] {
        self.block_arg_values[b].as_slice(&self.value_pool)
    }

    /// Append an argument to a block, returning its value.
    pub fn add_block_arg(&mut self, b: BlockRef, arg: BlockArgData) -> ValueRef {
        let index = self.blocks[b].args.len() as u32;
        let ty = arg.ty;
        self.blocks[b].args.push(arg);
        let v = self.values.push(ValueData {
            def: ValueDef::BlockArg(b, index),
            ty,
        });
        self.block_arg_values[b].push(v, &mut self.value_pool);
        v
    }

    /// Retype a block argument in place (used by signature conversion).
    pub fn set_block_arg_type(&mut self, b: BlockRef, index: u32, ty: TypeRef) {
        self.blocks[b].args[index as usize].ty = ty;
        let v = self.block_arg(b, index);
        self.values[v].ty = ty;
    }

    /// Append an op to a block.
    ///
    /// # Panics
    ///
    /// If the op already belongs to a block.
    pub fn push_op(&mut self, block: BlockRef, op: OpRef) {
        assert!(
            self.ops[op].parent_block.is_none(),
            "push_op: {op} already belongs to {:?}",
            self.ops[op].parent_block,
        );
        self.ops[op].parent_block = Some(block);
        self.blocks[block].ops.push(op);
    }

    /// Insert `op` before `before` in `block`.
    pub fn insert_op_before(&mut self, block: BlockRef, before: OpRef, op: OpRef) {
        assert!(
            self.ops[op].parent_block.is_none(),
            "insert_op_before: {op} already belongs to a block",
        );
        let ops = &mut self.blocks[block].ops;
        let pos = ops
            .iter()
            .position(|&o| o == before)
            .expect("insert_op_before: anchor not found in block");
        ops.insert(pos, op);
        self.ops[op].parent_block = Some(block);
    }

    /// Insert `op` after `after` in `block`.
    pub fn insert_op_after(&mut self, block: BlockRef, after: OpRef, op: OpRef) {
        assert!(
            self.ops[op].parent_block.is_none(),
            "insert_op_after: {op} already belongs to a block",
        );
        let ops = &mut self.blocks[block].ops;
        let pos = ops
            .iter()
            .position(|&o| o == after)
            .expect("insert_op_after: anchor not found in block");
        ops.insert(pos + 1, op);
        self.ops[op].parent_block = Some(block);
    }

    /// Remove an op from a block without destroying it.
    pub fn remove_op_from_block(&mut self, block: BlockRef, op: OpRef) {
        self.blocks[block].ops.retain(|o| *o != op);
        if self.ops[op].parent_block == Some(block) {
            self.ops[op].parent_block = None;
        }
    }

    /// Detach an op from whatever block currently holds it.
    pub fn detach_op(&mut self, op: OpRef) {
        if let Some(block) = self.ops[op].parent_block {
            self.remove_op_from_block(block, op);
        }
    }

    // ========================================================================
    // Regions
    // ========================================================================

    /// Create a region, back-linking its blocks.
    ///
    /// # Panics
    ///
    /// If any block already belongs to another region.
    pub fn create_region(&mut self, data: RegionData) -> RegionRef {
        let region = self.regions.push(data);
        let blocks: SmallVec<[BlockRef; 4]> = self.regions[region].blocks.clone();
        for &b in &blocks {
            if let Some(existing) = self.blocks[b].parent_region {
                panic!("create_region: block {b} already belongs to {existing}");
            }
            self.blocks[b].parent_region = Some(region);
        }
        region
    }

    pub fn region(&self, r: RegionRef) -> &RegionData {
        &self.regions[r]
    }

    pub fn region_mut(&mut self, r: RegionRef) -> &mut RegionData {
        &mut self.regions[r]
    }

    /// Entry block of a region, if any.
    pub fn entry_block(&self, r: RegionRef) -> Option<BlockRef> {
        self.regions[r].blocks.first().copied()
    }

    /// Unlink a region from its owning op so it can be reattached elsewhere.
    pub fn detach_region(&mut self, r: RegionRef) {
        if let Some(op) = self.regions[r].parent_op {
            self.ops[op].regions.retain(|x| *x != r);
            self.regions[r].parent_op = None;
        }
    }

    /// Replace the block list of `region` with `blocks`, returning the old
    /// blocks (used by conversion rollback).
    pub fn replace_region_blocks(
        &mut self,
        region: RegionRef,
        blocks: SmallVec<[BlockRef; 4]>,
    ) -> SmallVec<[BlockRef; 4]> {
        let old: SmallVec<[BlockRef; 4]> =
            std::mem::replace(&mut self.regions[region].blocks, blocks);
        for &b in &old {
            if self.blocks[b].parent_region == Some(region) {
                self.blocks[b].parent_region = None;
            }
        }
        let new: SmallVec<[BlockRef; 4]> = self.regions[region].blocks.clone();
        for &b in &new {
            self.blocks[b].parent_region = Some(region);
        }
        old
    }

    // ========================================================================
    // Use-chains and RAUW
    // ========================================================================

    pub fn uses(&self, v: ValueRef) -> &[Use] {
        &self.uses[v]
    }

    pub fn has_uses(&self, v: ValueRef) -> bool {
        !self.uses[v].is_empty()
    }

    /// Overwrite a value's use list. Bulk-erasure helper; callers are
    /// responsible for operand-list consistency.
    pub(crate) fn set_uses(&mut self, v: ValueRef, uses: SmallVec<[Use; 2]>) {
        self.uses[v] = uses;
    }

    /// Replace every use of `old` with `new`.
    pub fn replace_all_uses(&mut self, old: ValueRef, new: ValueRef) {
        if old == new {
            return;
        }
        let old_uses = std::mem::take(&mut self.uses[old]);
        for u in &old_uses {
            let slice = self.ops[u.user].operands.as_mut_slice(&mut self.value_pool);
            debug_assert_eq!(slice[u.operand_index as usize], old);
            slice[u.operand_index as usize] = new;
            self.uses[new].push(*u);
        }
    }

    /// Replace every use of `old` with `new`, except uses by ops in `except`.
    pub fn replace_all_uses_except(&mut self, old: ValueRef, new: ValueRef, except: &[OpRef]) {
        if old == new {
            return;
        }
        let old_uses = std::mem::take(&mut self.uses[old]);
        let mut kept = SmallVec::new();
        for u in &old_uses {
            if except.contains(&u.user) {
                kept.push(*u);
                continue;
            }
            let slice = self.ops[u.user].operands.as_mut_slice(&mut self.value_pool);
            debug_assert_eq!(slice[u.operand_index as usize], old);
            slice[u.operand_index as usize] = new;
            self.uses[new].push(*u);
        }
        self.uses[old] = kept;
    }

    // ========================================================================
    // Containment queries
    // ========================================================================

    /// Op owning the region that `block` belongs to, if attached.
    pub fn block_parent_op(&self, block: BlockRef) -> Option<OpRef> {
        self.blocks[block]
            .parent_region
            .and_then(|r| self.regions[r].parent_op)
    }

    /// Nearest ancestor op of `op` (exclusive) matching the predicate.
    pub fn ancestor_op(&self, op: OpRef, pred: impl Fn(&Self, OpRef) -> bool) -> Option<OpRef> {
        let mut cur = self.ops[op].parent_block;
        while let Some(block) = cur {
            let parent = self.block_parent_op(block)?;
            if pred(self, parent) {
                return Some(parent);
            }
            cur = self.ops[parent].parent_block;
        }
        None
    }

    /// Is `op` contained (transitively) inside `ancestor`'s regions?
    pub fn is_ancestor(&self, ancestor: OpRef, op: OpRef) -> bool {
        if ancestor == op {
            return true;
        }
        self.ancestor_op(op, |_, candidate| candidate == ancestor)
            .is_some()
    }
}

impl Default for IrContext {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// OperationDataBuilder
// ============================================================================

impl OperationData {
    pub fn new(location: Location, dialect: Symbol, name: Symbol) -> Self {
        Self {
            location,
            dialect,
            name,
            operands: EntityList::new(),
            results: EntityList::new(),
            attributes: BTreeMap::new(),
            regions: SmallVec::new(),
            successors: SmallVec::new(),
            parent_block: None,
        }
    }
}

/// Builder collecting operands/results into pool-backed lists on `build`.
pub struct OperationDataBuilder {
    location: Location,
    dialect: Symbol,
    name: Symbol,
    operands: Vec<ValueRef>,
    results: Vec<TypeRef>,
    attributes: BTreeMap<Symbol, Attribute>,
    regions: SmallVec<[RegionRef; 4]>,
    successors: SmallVec<[BlockRef; 4]>,
}

impl OperationDataBuilder {
    pub fn new(location: Location, dialect: Symbol, name: Symbol) -> Self {
        Self {
            location,
            dialect,
            name,
            operands: Vec::new(),
            results: Vec::new(),
            attributes: BTreeMap::new(),
            regions: SmallVec::new(),
            successors: SmallVec::new(),
        }
    }

    pub fn operand(mut self, v: ValueRef) -> Self {
        self.operands.push(v);
        self
    }

    pub fn operands(mut self, vs: impl IntoIterator<Item = ValueRef>) -> Self {
        self.operands.extend(vs);
        self
    }

    pub fn result(mut self, ty: TypeRef) -> Self {
        self.results.push(ty);
        self
    }

    pub fn results(mut self, tys: impl IntoIterator<Item = TypeRef>) -> Self {
        self.results.extend(tys);
        self
    }

    pub fn attr(mut self, key: impl Into<Symbol>, val: Attribute) -> Self {
        self.attributes.insert(key.into(), val);
        self
    }

    pub fn region(mut self, r: RegionRef) -> Self {
        self.regions.push(r);
        self
    }

    pub fn successor(mut self, b: BlockRef) -> Self {
        self.successors.push(b);
        self
    }

    pub fn build(self, ctx: &mut IrContext) -> OperationData {
        let mut operands = EntityList::new();
        for v in self.operands {
            operands.push(v, &mut ctx.value_pool);
        }
        let mut results = EntityList::new();
        for ty in self.results {
            results.push(ty, &mut ctx.type_pool);
        }
        OperationData {
            location: self.location,
            dialect: self.dialect,
            name: self.name,
            operands,
            results,
            attributes: self.attributes,
            regions: self.regions,
            successors: self.successors,
            parent_block: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn test_loc(ctx: &mut IrContext) -> Location {
        ctx.unknown_loc()
    }

    fn index_ty(ctx: &mut IrContext) -> TypeRef {
        ctx.types
            .intern(TypeDataBuilder::new(Symbol::new("core"), Symbol::new("index")).build())
    }

    fn mk_op(ctx: &mut IrContext, name: &'static str, result_ty: Option<TypeRef>) -> OpRef {
        let loc = test_loc(ctx);
        let mut b = OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new(name));
        if let Some(ty) = result_ty {
            b = b.result(ty);
        }
        let data = b.build(ctx);
        ctx.create_op(data)
    }

    #[test]
    fn create_and_read_back() {
        let mut ctx = IrContext::new();
        let ty = index_ty(&mut ctx);
        let loc = test_loc(&mut ctx);
        let data = OperationDataBuilder::new(loc, Symbol::new("arith"), Symbol::new("const"))
            .result(ty)
            .attr("value", Attribute::int(7))
            .build(&mut ctx);
        let op = ctx.create_op(data);
        assert_eq!(ctx.op(op).dialect, Symbol::new("arith"));
        assert_eq!(ctx.op_result_types(op), &[ty]);
        assert_eq!(
            ctx.op(op).attributes.get(&Symbol::new("value")),
            Some(&Attribute::int(7)),
        );
        assert_eq!(ctx.value_def(ctx.op_result(op, 0)), ValueDef::OpResult(op, 0));
    }

    #[test]
    fn use_chain_and_set_operand() {
        let mut ctx = IrContext::new();
        let ty = index_ty(&mut ctx);
        let a = mk_op(&mut ctx, "a", Some(ty));
        let b = mk_op(&mut ctx, "b", Some(ty));
        let va = ctx.op_result(a, 0);
        let vb = ctx.op_result(b, 0);

        let loc = test_loc(&mut ctx);
        let data = OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("use"))
            .operand(va)
            .build(&mut ctx);
        let user = ctx.create_op(data);

        assert_eq!(ctx.uses(va).len(), 1);
        assert!(!ctx.has_uses(vb));

        ctx.set_operand(user, 0, vb);
        assert!(!ctx.has_uses(va));
        assert_eq!(ctx.uses(vb), &[Use { user, operand_index: 0 }]);
        assert_eq!(ctx.op_operands(user), &[vb]);
    }

    #[test]
    fn rauw_with_exception() {
        let mut ctx = IrContext::new();
        let ty = index_ty(&mut ctx);
        let a = mk_op(&mut ctx, "a", Some(ty));
        let b = mk_op(&mut ctx, "b", Some(ty));
        let va = ctx.op_result(a, 0);
        let vb = ctx.op_result(b, 0);

        let loc = test_loc(&mut ctx);
        let mk_user = |ctx: &mut IrContext| {
            let data = OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("use"))
                .operand(va)
                .build(ctx);
            ctx.create_op(data)
        };
        let u1 = mk_user(&mut ctx);
        let u2 = mk_user(&mut ctx);

        ctx.replace_all_uses_except(va, vb, &[u2]);
        assert_eq!(ctx.op_operands(u1), &[vb]);
        assert_eq!(ctx.op_operands(u2), &[va]);
        assert_eq!(ctx.uses(va).len(), 1);
        assert_eq!(ctx.uses(vb).len(), 1);
    }

    #[test]
    fn block_arg_addition_and_retype() {
        let mut ctx = IrContext::new();
        let ty = index_ty(&mut ctx);
        let loc = test_loc(&mut ctx);
        let block = ctx.create_block(BlockData::empty(loc));
        assert!(ctx.block_args(block).is_empty());

        let v = ctx.add_block_arg(block, BlockArgData::of(ty));
        assert_eq!(ctx.block_args(block), &[v]);
        assert_eq!(ctx.value_def(v), ValueDef::BlockArg(block, 0));

        let other = ctx
            .types
            .intern(TypeDataBuilder::new(Symbol::new("core"), Symbol::new("none")).build());
        ctx.set_block_arg_type(block, 0, other);
        assert_eq!(ctx.value_ty(v), other);
    }

    #[test]
    fn insert_after_and_detach() {
        let mut ctx = IrContext::new();
        let ty = index_ty(&mut ctx);
        let loc = test_loc(&mut ctx);
        let block = ctx.create_block(BlockData::empty(loc));

        let a = mk_op(&mut ctx, "a", Some(ty));
        let c = mk_op(&mut ctx, "c", Some(ty));
        ctx.push_op(block, a);
        ctx.push_op(block, c);

        let b = mk_op(&mut ctx, "b", Some(ty));
        ctx.insert_op_after(block, a, b);
        assert_eq!(ctx.block(block).ops.as_slice(), &[a, b, c]);

        ctx.detach_op(b);
        assert_eq!(ctx.block(block).ops.as_slice(), &[a, c]);
        assert_eq!(ctx.op(b).parent_block, None);
    }

    #[test]
    fn containment_queries() {
        let mut ctx = IrContext::new();
        let loc = test_loc(&mut ctx);

        let inner_block = ctx.create_block(BlockData::empty(loc));
        let inner = mk_op(&mut ctx, "inner", None);
        ctx.push_op(inner_block, inner);
        let region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![inner_block],
            parent_op: None,
        });
        let outer_data = OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("outer"))
            .region(region)
            .build(&mut ctx);
        let outer = ctx.create_op(outer_data);

        assert_eq!(ctx.block_parent_op(inner_block), Some(outer));
        assert!(ctx.is_ancestor(outer, inner));
        assert!(!ctx.is_ancestor(inner, outer));
        let found = ctx.ancestor_op(inner, |ctx, op| ctx.op(op).name == Symbol::new("outer"));
        assert_eq!(found, Some(outer));
    }

    #[test]
    #[should_panic(expected = "still has")]
    fn remove_op_guards_uses() {
        let mut ctx = IrContext::new();
        let ty = index_ty(&mut ctx);
        let a = mk_op(&mut ctx, "a", Some(ty));
        let va = ctx.op_result(a, 0);
        let loc = test_loc(&mut ctx);
        let data = OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("use"))
            .operand(va)
            .build(&mut ctx);
        let _user = ctx.create_op(data);
        ctx.remove_op(a);
    }
}
