//! Greedy pattern application with a worklist and folding.
//!
//! The worklist is FIFO, seeded in traversal order. Each pop first attempts
//! folding, then the matching patterns in descending benefit (ties broken
//! by registration order). A committed rewrite re-enqueues the ops it
//! created and the users of every replaced value, in insertion order.
//! Trivially dead pure ops are erased on the way.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, trace};

use super::fold::{self, Folded};
use super::pattern::RewritePattern;
use super::rewriter::{self, PatternRewriter};
use super::ModuleRef;
use crate::context::IrContext;
use crate::dialect::arith;
use crate::refs::{OpRef, ValueRef};
use crate::{traits, walk, Symbol};

/// Result of a greedy application run.
#[derive(Debug)]
pub struct ApplyResult {
    /// Outer fixpoint iterations performed.
    pub iterations: usize,
    /// Total committed rewrites (folds included).
    pub total_changes: usize,
    /// Whether the last iteration made no changes.
    pub reached_fixpoint: bool,
}

/// Greedy driver over a frozen pattern collection.
pub struct PatternApplicator<'p> {
    patterns: Vec<Box<dyn RewritePattern + 'p>>,
    /// Pattern indices ordered by descending benefit, then registration.
    order: Vec<usize>,
    max_iterations: usize,
    fold: bool,
}

impl<'p> PatternApplicator<'p> {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            order: Vec::new(),
            max_iterations: 10,
            fold: true,
        }
    }

    pub fn add_pattern(mut self, pattern: impl RewritePattern + 'p) -> Self {
        self.patterns.push(Box::new(pattern));
        self
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    /// Disable folding (used by drivers that fold separately).
    pub fn without_folding(mut self) -> Self {
        self.fold = false;
        self
    }

    fn freeze(&mut self) {
        let mut order: Vec<usize> = (0..self.patterns.len()).collect();
        order.sort_by_key(|&i| (std::cmp::Reverse(self.patterns[i].benefit()), i));
        self.order = order;
    }

    /// Apply patterns over the module body until a fixpoint or the
    /// iteration cap.
    pub fn apply(&mut self, ctx: &mut IrContext, module: ModuleRef) -> ApplyResult {
        self.freeze();

        let mut total_changes = 0;
        let mut iterations = 0;
        for _ in 0..self.max_iterations {
            iterations += 1;
            let changes = self.run_worklist(ctx, module);
            total_changes += changes;
            if changes == 0 {
                return ApplyResult {
                    iterations,
                    total_changes,
                    reached_fixpoint: true,
                };
            }
        }
        ApplyResult {
            iterations,
            total_changes,
            reached_fixpoint: false,
        }
    }

    fn run_worklist(&self, ctx: &mut IrContext, module: ModuleRef) -> usize {
        let mut changes = 0;
        let module_first_block = module.first_block(ctx);

        let seed = walk::collect_ops(ctx, module.body(ctx));
        let mut worklist: VecDeque<OpRef> = seed.iter().copied().collect();
        let mut enqueued: HashSet<OpRef> = seed.into_iter().collect();

        while let Some(op) = worklist.pop_front() {
            enqueued.remove(&op);

            // Ops erased since they were queued.
            if ctx.op(op).parent_block.is_none() {
                continue;
            }

            let mut enqueue = |worklist: &mut VecDeque<OpRef>,
                               enqueued: &mut HashSet<OpRef>,
                               op: OpRef| {
                if enqueued.insert(op) {
                    worklist.push_back(op);
                }
            };

            // Folding first.
            if self.fold {
                if let Some(folded) = fold::try_fold(ctx, op) {
                    let result = ctx.op_result(op, 0);
                    let operand_defs = operand_defining_ops(ctx, op);
                    let replacement = match folded {
                        Folded::Value(v) => v,
                        Folded::Const(attr) => {
                            let loc = ctx.op(op).location;
                            let ty = ctx.value_ty(result);
                            let c = arith::r#const(ctx, loc, ty, attr);
                            let block = ctx.op(op).parent_block.expect("attached op");
                            ctx.insert_op_before(block, op, c.op_ref());
                            c.result(ctx)
                        }
                    };
                    trace!(op = %op, "folded");
                    self.replace_and_erase(ctx, op, result, replacement);
                    for u in ctx.uses(replacement).to_vec() {
                        enqueue(&mut worklist, &mut enqueued, u.user);
                    }
                    // The folded op's operands may have just gone dead.
                    for def in operand_defs {
                        enqueue(&mut worklist, &mut enqueued, def);
                    }
                    changes += 1;
                    continue;
                }
            }

            // Patterns in benefit order; first successful match commits.
            let root_key = {
                let data = ctx.op(op);
                (data.dialect, data.name)
            };
            let mut committed = false;
            for &i in &self.order {
                let pattern = &self.patterns[i];
                if let Some(root) = pattern.root() {
                    if root != root_key {
                        continue;
                    }
                }
                let operand_defs = operand_defining_ops(ctx, op);
                let mut rw = PatternRewriter::new();
                if pattern.match_and_rewrite(ctx, op, &mut rw) && rw.has_mutations() {
                    debug!(pattern = pattern.name(), op = %op, "pattern committed");
                    let mutations = rw.take_mutations();
                    let affected =
                        rewriter::apply_mutations(ctx, op, mutations, module_first_block);
                    for created in affected.created {
                        enqueue(&mut worklist, &mut enqueued, created);
                    }
                    // Former operands may have lost their last use.
                    for def in operand_defs {
                        enqueue(&mut worklist, &mut enqueued, def);
                    }
                    changes += 1;
                    committed = true;
                    break;
                }
            }
            if committed {
                continue;
            }

            // Trivially dead pure ops.
            if traits::is_pure(ctx, op)
                && !ctx.op_results(op).is_empty()
                && ctx.op_results(op).iter().all(|&r| !ctx.has_uses(r))
            {
                let operand_defs: Vec<OpRef> = ctx
                    .op_operands(op)
                    .iter()
                    .filter_map(|&v| match ctx.value_def(v) {
                        crate::ValueDef::OpResult(def_op, _) => Some(def_op),
                        crate::ValueDef::BlockArg(..) => None,
                    })
                    .collect();
                crate::helpers::erase_op(ctx, op);
                for def in operand_defs {
                    enqueue(&mut worklist, &mut enqueued, def);
                }
                changes += 1;
            }
        }

        changes
    }

    /// RAUW one result and erase the now-dead op.
    fn replace_and_erase(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        old: ValueRef,
        new: ValueRef,
    ) {
        ctx.replace_all_uses(old, new);
        crate::helpers::erase_op(ctx, op);
    }
}

/// Defining ops of `op`'s operands (block args skipped).
fn operand_defining_ops(ctx: &IrContext, op: OpRef) -> Vec<OpRef> {
    ctx.op_operands(op)
        .iter()
        .filter_map(|&v| match ctx.value_def(v) {
            crate::ValueDef::OpResult(def_op, _) => Some(def_op),
            crate::ValueDef::BlockArg(..) => None,
        })
        .collect()
}

impl Default for PatternApplicator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience: build a module op wrapping the given region content.
pub fn wrap_in_module(ctx: &mut IrContext, name: Symbol, ops: Vec<OpRef>) -> ModuleRef {
    use crate::context::{BlockData, RegionData};
    use smallvec::smallvec;

    let loc = ctx.unknown_loc();
    let block = ctx.create_block(BlockData::empty(loc));
    for op in ops {
        ctx.push_op(block, op);
    }
    let region = ctx.create_region(RegionData {
        location: loc,
        blocks: smallvec![block],
        parent_op: None,
    });
    let module = crate::dialect::core::module(ctx, loc, name, region);
    ModuleRef::new(ctx, module.op_ref()).expect("just-built module")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::core;
    use crate::types::Attribute;
    use crate::{DialectOp, TypeRef};

    fn i32_ty(ctx: &mut IrContext) -> TypeRef {
        core::signless(&mut ctx.types, 32)
    }

    /// Renames `test.source` ops into `test.target`.
    struct Rename;

    impl RewritePattern for Rename {
        fn root(&self) -> Option<(Symbol, Symbol)> {
            Some((Symbol::new("test"), Symbol::new("source")))
        }

        fn match_and_rewrite(
            &self,
            ctx: &mut IrContext,
            op: OpRef,
            rewriter: &mut PatternRewriter,
        ) -> bool {
            let loc = ctx.op(op).location;
            let result_types: Vec<TypeRef> = ctx.op_result_types(op).to_vec();
            let data = crate::OperationDataBuilder::new(
                loc,
                Symbol::new("test"),
                Symbol::new("target"),
            )
            .results(result_types)
            .build(ctx);
            let new_op = ctx.create_op(data);
            rewriter.replace_op(new_op);
            true
        }
    }

    fn make_test_op(ctx: &mut IrContext, name: &str, ty: TypeRef) -> OpRef {
        let loc = ctx.unknown_loc();
        let data =
            crate::OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new(name))
                .result(ty)
                .build(ctx);
        ctx.create_op(data)
    }

    #[test]
    fn rename_pattern_reaches_fixpoint() {
        let mut ctx = IrContext::new();
        let ty = i32_ty(&mut ctx);
        let op = make_test_op(&mut ctx, "source", ty);
        let module = wrap_in_module(&mut ctx, Symbol::new("m"), vec![op]);

        let mut applicator = PatternApplicator::new().add_pattern(Rename);
        let result = applicator.apply(&mut ctx, module);
        assert!(result.reached_fixpoint);
        assert_eq!(result.total_changes, 1);

        let ops = module.ops(&ctx);
        assert_eq!(ops.len(), 1);
        assert_eq!(ctx.op(ops[0]).name, Symbol::new("target"));
    }

    #[test]
    fn uses_survive_replacement() {
        let mut ctx = IrContext::new();
        let ty = i32_ty(&mut ctx);
        let src = make_test_op(&mut ctx, "source", ty);
        let v = ctx.op_result(src, 0);
        let loc = ctx.unknown_loc();
        let user = {
            let data =
                crate::OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("sink"))
                    .operand(v)
                    .build(&mut ctx);
            ctx.create_op(data)
        };
        let module = wrap_in_module(&mut ctx, Symbol::new("m"), vec![src, user]);

        let mut applicator = PatternApplicator::new().add_pattern(Rename);
        applicator.apply(&mut ctx, module);

        let ops = module.ops(&ctx);
        assert_eq!(ops.len(), 2);
        let new_result = ctx.op_result(ops[0], 0);
        assert_eq!(ctx.op_operands(ops[1]), &[new_result]);
    }

    #[test]
    fn folding_collapses_constant_chains() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let ty = i32_ty(&mut ctx);
        let a = arith::r#const(&mut ctx, loc, ty, Attribute::int(40));
        let b = arith::r#const(&mut ctx, loc, ty, Attribute::int(2));
        let a_v = a.result(&ctx);
        let b_v = b.result(&ctx);
        let add = arith::addi(&mut ctx, loc, a_v, b_v, ty);
        // Keep the sum alive with a non-pure sink.
        let sink = {
            let data =
                crate::OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("sink"))
                    .operand(add.result(&ctx))
                    .build(&mut ctx);
            ctx.create_op(data)
        };
        let module = wrap_in_module(
            &mut ctx,
            Symbol::new("m"),
            vec![a.op_ref(), b.op_ref(), add.op_ref(), sink],
        );

        let mut applicator = PatternApplicator::new();
        let result = applicator.apply(&mut ctx, module);
        assert!(result.reached_fixpoint);

        // The add is gone; the sink consumes a folded constant 42. The
        // original constants are erased as trivially dead.
        let ops = module.ops(&ctx);
        let consts: Vec<_> = ops
            .iter()
            .filter(|&&op| arith::Const::matches(&ctx, op))
            .collect();
        assert_eq!(consts.len(), 1);
        let c = arith::Const::from_op(&ctx, *consts[0]).unwrap();
        assert_eq!(c.value(&ctx), Attribute::int(42));
    }

    #[test]
    fn benefit_orders_patterns() {
        struct Low;
        struct High;

        impl RewritePattern for Low {
            fn root(&self) -> Option<(Symbol, Symbol)> {
                Some((Symbol::new("test"), Symbol::new("source")))
            }
            fn benefit(&self) -> u16 {
                1
            }
            fn match_and_rewrite(
                &self,
                ctx: &mut IrContext,
                op: OpRef,
                rewriter: &mut PatternRewriter,
            ) -> bool {
                let loc = ctx.op(op).location;
                let tys: Vec<TypeRef> = ctx.op_result_types(op).to_vec();
                let data = crate::OperationDataBuilder::new(
                    loc,
                    Symbol::new("test"),
                    Symbol::new("low"),
                )
                .results(tys)
                .build(ctx);
                let new_op = ctx.create_op(data);
                rewriter.replace_op(new_op);
                true
            }
        }

        impl RewritePattern for High {
            fn root(&self) -> Option<(Symbol, Symbol)> {
                Some((Symbol::new("test"), Symbol::new("source")))
            }
            fn benefit(&self) -> u16 {
                10
            }
            fn match_and_rewrite(
                &self,
                ctx: &mut IrContext,
                op: OpRef,
                rewriter: &mut PatternRewriter,
            ) -> bool {
                let loc = ctx.op(op).location;
                let tys: Vec<TypeRef> = ctx.op_result_types(op).to_vec();
                let data = crate::OperationDataBuilder::new(
                    loc,
                    Symbol::new("test"),
                    Symbol::new("high"),
                )
                .results(tys)
                .build(ctx);
                let new_op = ctx.create_op(data);
                rewriter.replace_op(new_op);
                true
            }
        }

        let mut ctx = IrContext::new();
        let ty = i32_ty(&mut ctx);
        let op = make_test_op(&mut ctx, "source", ty);
        let module = wrap_in_module(&mut ctx, Symbol::new("m"), vec![op]);

        // Low registered first; High must still win on benefit.
        let mut applicator = PatternApplicator::new().add_pattern(Low).add_pattern(High);
        applicator.apply(&mut ctx, module);

        let ops = module.ops(&ctx);
        assert_eq!(ctx.op(ops[0]).name, Symbol::new("high"));
    }
}
