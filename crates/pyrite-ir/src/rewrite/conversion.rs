//! Dialect conversion driver.
//!
//! Generalizes the greedy engine across two type universes:
//!
//! 1. function-like signatures and block argument types are converted
//!    through the [`TypeConverter`] (with argument materializations),
//! 2. conversion patterns rewrite illegal ops on a FIFO worklist,
//! 3. terminator successor arguments are reconciled against successor
//!    block argument types with source/target materializations,
//! 4. the [`ConversionTarget`] verifies the result.
//!
//! Partial mode tolerates surviving illegal ops. Full mode clones the
//! module body up front and rolls it back when verification fails, so a
//! failed pass leaves the IR exactly as it found it.

use std::collections::{HashSet, VecDeque};

use smallvec::SmallVec;
use thiserror::Error;
use tracing::debug;

use super::applicator::ApplyResult;
use super::conversion_target::{ConversionTarget, IllegalOp, Legality};
use super::pattern::ConversionPattern;
use super::rewriter::{self, PatternRewriter};
use super::signature;
use super::type_converter::{MaterializationKind, TypeConverter};
use super::ModuleRef;
use crate::context::{IrContext, RegionData};
use crate::refs::{BlockRef, OpRef, RegionRef};
use crate::{clone, helpers, traits, walk};

/// Failure of a full conversion.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("{} illegal operation(s) remain after conversion: {}", .0.len(), format_illegal(.0))]
    IllegalOpsRemain(Vec<IllegalOp>),
}

fn format_illegal(ops: &[IllegalOp]) -> String {
    let names: Vec<String> = ops.iter().take(4).map(|op| op.to_string()).collect();
    let mut out = names.join(", ");
    if ops.len() > 4 {
        out.push_str(", ...");
    }
    out
}

/// Conversion patterns plus the shared worklist machinery.
pub struct ConversionDriver<'a> {
    patterns: Vec<Box<dyn ConversionPattern>>,
    order: Vec<usize>,
    converter: &'a TypeConverter,
    max_iterations: usize,
}

impl<'a> ConversionDriver<'a> {
    pub fn new(converter: &'a TypeConverter) -> Self {
        Self {
            patterns: Vec::new(),
            order: Vec::new(),
            converter,
            max_iterations: 10,
        }
    }

    pub fn add_pattern(mut self, pattern: impl ConversionPattern + 'static) -> Self {
        self.patterns.push(Box::new(pattern));
        self
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    fn freeze(&mut self) {
        let mut order: Vec<usize> = (0..self.patterns.len()).collect();
        order.sort_by_key(|&i| (std::cmp::Reverse(self.patterns[i].benefit()), i));
        self.order = order;
    }

    fn run(
        &mut self,
        ctx: &mut IrContext,
        module: ModuleRef,
        target: &ConversionTarget,
    ) -> ApplyResult {
        self.freeze();

        // Phase 1: signatures and non-entry block argument types.
        let body = module.body(ctx);
        signature::convert_region_signatures(ctx, body, self.converter);

        let mut total_changes = 0;
        let mut iterations = 0;
        for _ in 0..self.max_iterations {
            iterations += 1;
            let changes = self.run_worklist(ctx, module, target);
            total_changes += changes;
            if changes == 0 {
                break;
            }
        }

        // Phase 3: reconcile terminator successor arguments.
        total_changes += reconcile_successor_args(ctx, body, self.converter);

        ApplyResult {
            iterations,
            total_changes,
            reached_fixpoint: true,
        }
    }

    fn run_worklist(
        &self,
        ctx: &mut IrContext,
        module: ModuleRef,
        target: &ConversionTarget,
    ) -> usize {
        let module_first_block = module.first_block(ctx);
        let body = module.body(ctx);
        self.run_worklist_over(ctx, body, module_first_block, target)
    }

    fn run_worklist_over(
        &self,
        ctx: &mut IrContext,
        region: RegionRef,
        module_first_block: Option<BlockRef>,
        target: &ConversionTarget,
    ) -> usize {
        let mut changes = 0;

        let seed: Vec<OpRef> = walk::collect_ops(ctx, region)
            .into_iter()
            .filter(|&op| target.is_legal(ctx, op) == Legality::Illegal)
            .collect();
        let mut worklist: VecDeque<OpRef> = seed.iter().copied().collect();
        let mut enqueued: HashSet<OpRef> = seed.into_iter().collect();

        while let Some(op) = worklist.pop_front() {
            enqueued.remove(&op);
            if ctx.op(op).parent_block.is_none() {
                continue;
            }
            if target.is_legal(ctx, op) == Legality::Legal {
                continue;
            }

            let root_key = {
                let data = ctx.op(op);
                (data.dialect, data.name)
            };
            for &i in &self.order {
                let pattern = &self.patterns[i];
                if let Some(root) = pattern.root() {
                    if root != root_key {
                        continue;
                    }
                }
                let mut rw = PatternRewriter::new();
                if pattern.match_and_rewrite(ctx, op, self.converter, &mut rw)
                    && rw.has_mutations()
                {
                    debug!(pattern = pattern.name(), op = %op, "conversion committed");
                    let mutations = rw.take_mutations();
                    let affected =
                        rewriter::apply_mutations(ctx, op, mutations, module_first_block);
                    for created in affected.created {
                        if ctx.op(created).parent_block.is_some()
                            && target.is_legal(ctx, created) == Legality::Illegal
                            && enqueued.insert(created)
                        {
                            worklist.push_back(created);
                        }
                    }
                    changes += 1;
                    break;
                }
            }
        }

        changes
    }
}

/// Run conversion patterns to a fixpoint over one region.
///
/// No signature conversion, no legality verification; used by passes that
/// convert nested isolated containers (gpu modules) in place. Returns the
/// number of committed rewrites.
pub fn region_conversion(
    ctx: &mut IrContext,
    region: RegionRef,
    target: &ConversionTarget,
    converter: &TypeConverter,
    patterns: Vec<Box<dyn ConversionPattern>>,
) -> usize {
    let mut driver = ConversionDriver {
        patterns,
        order: Vec::new(),
        converter,
        max_iterations: 10,
    };
    driver.freeze();

    let mut total = 0;
    for _ in 0..driver.max_iterations {
        let changes = driver.run_worklist_over(ctx, region, None, target);
        total += changes;
        if changes == 0 {
            break;
        }
    }
    total
}

/// Insert materializations so every terminator's successor arguments match
/// the successor block's argument types.
fn reconcile_successor_args(
    ctx: &mut IrContext,
    region: RegionRef,
    converter: &TypeConverter,
) -> usize {
    let mut fixed = 0;
    let terminators: Vec<OpRef> = walk::collect_ops(ctx, region)
        .into_iter()
        .filter(|&op| traits::is_terminator(ctx, op) && !ctx.op(op).successors.is_empty())
        .collect();

    for term in terminators {
        let Some(block) = ctx.op(term).parent_block else {
            continue;
        };
        let loc = ctx.op(term).location;
        // Successor-arg layout is op-specific; the single-successor layout
        // (all operands feed the successor) covers `cf.br`. Multi-successor
        // terminators carry explicit segments and are reconciled by their
        // own conversion patterns.
        let successors: SmallVec<[BlockRef; 4]> = ctx.op(term).successors.clone();
        if successors.len() != 1 {
            continue;
        }
        let succ = successors[0];
        let operand_vals: Vec<_> = ctx.op_operands(term).to_vec();
        let arg_tys: Vec<_> = ctx
            .block_args(succ)
            .iter()
            .map(|&a| ctx.value_ty(a))
            .collect();
        if operand_vals.len() != arg_tys.len() {
            continue;
        }
        for (idx, (val, want)) in operand_vals.iter().zip(arg_tys.iter()).enumerate() {
            if ctx.value_ty(*val) == *want {
                continue;
            }
            let mat =
                converter.materialize(ctx, MaterializationKind::Target, loc, *val, *want);
            for cast_op in &mat.ops {
                ctx.insert_op_before(block, term, *cast_op);
            }
            ctx.set_operand(term, idx as u32, mat.value);
            fixed += 1;
        }
    }
    fixed
}

/// Apply a conversion, tolerating surviving illegal ops.
pub fn apply_partial_conversion(
    ctx: &mut IrContext,
    module: ModuleRef,
    target: &ConversionTarget,
    converter: &TypeConverter,
    patterns: Vec<Box<dyn ConversionPattern>>,
) -> ApplyResult {
    let mut driver = ConversionDriver {
        patterns,
        order: Vec::new(),
        converter,
        max_iterations: 10,
    };
    driver.run(ctx, module, target)
}

/// Apply a conversion requiring every op to be legal at the end.
///
/// On failure the module body is restored to its pre-pass state and the
/// list of surviving illegal ops is returned.
pub fn apply_full_conversion(
    ctx: &mut IrContext,
    module: ModuleRef,
    target: &ConversionTarget,
    converter: &TypeConverter,
    patterns: Vec<Box<dyn ConversionPattern>>,
) -> Result<ApplyResult, ConversionError> {
    // Snapshot for rollback.
    let backup = clone::clone_op(ctx, module.op());

    let result = apply_partial_conversion(ctx, module, target, converter, patterns);

    let illegal = target.verify(ctx, module.body(ctx));
    if illegal.is_empty() {
        // Success: discard the backup.
        let backup_body = ctx.op(backup).regions[0];
        helpers::erase_region_tree(ctx, backup_body);
        return Ok(result);
    }

    debug!(count = illegal.len(), "full conversion failed, rolling back");

    // Move the backup's blocks into the live module body, then destroy the
    // failed blocks.
    let backup_body = ctx.op(backup).regions[0];
    let backup_blocks = std::mem::take(&mut ctx.region_mut(backup_body).blocks);
    for &b in &backup_blocks {
        ctx.block_mut(b).parent_region = None;
    }
    let body = module.body(ctx);
    let failed_blocks = ctx.replace_region_blocks(body, backup_blocks);

    let loc = ctx.region(body).location;
    let scrap = ctx.create_region(RegionData {
        location: loc,
        blocks: failed_blocks,
        parent_op: None,
    });
    helpers::erase_region_tree(ctx, scrap);

    Err(ConversionError::IllegalOpsRemain(illegal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{arith, core};
    use crate::rewrite::applicator::wrap_in_module;
    use crate::types::Attribute;
    use crate::{OperationDataBuilder, Symbol, TypeRef};

    /// Converts `hi.op` into `lo.op`, converting the result type.
    struct Lower;

    impl ConversionPattern for Lower {
        fn root(&self) -> Option<(Symbol, Symbol)> {
            Some((Symbol::new("hi"), Symbol::new("op")))
        }

        fn match_and_rewrite(
            &self,
            ctx: &mut IrContext,
            op: OpRef,
            converter: &TypeConverter,
            rewriter: &mut PatternRewriter,
        ) -> bool {
            let loc = ctx.op(op).location;
            let old_ty = ctx.op_result_types(op)[0];
            let new_ty = converter.convert_type_or_self(&mut ctx.types, old_ty);
            let data = OperationDataBuilder::new(loc, Symbol::new("lo"), Symbol::new("op"))
                .result(new_ty)
                .build(ctx);
            let new_op = ctx.create_op(data);
            rewriter.replace_op(new_op);
            true
        }
    }

    fn hi_op(ctx: &mut IrContext, ty: TypeRef) -> OpRef {
        let loc = ctx.unknown_loc();
        let data = OperationDataBuilder::new(loc, Symbol::new("hi"), Symbol::new("op"))
            .result(ty)
            .build(ctx);
        ctx.create_op(data)
    }

    fn f64_to_f32_converter() -> TypeConverter {
        let mut converter = TypeConverter::new();
        converter.add_conversion(|types, ty| {
            core::float_width(types, ty)
                .filter(|&w| w == 64)
                .map(|_| core::float_ty(types, 32))
        });
        converter
    }

    #[test]
    fn partial_conversion_rewrites_illegal_ops() {
        let mut ctx = IrContext::new();
        let f64_ty = core::float_ty(&mut ctx.types, 64);
        let op = hi_op(&mut ctx, f64_ty);
        let module = wrap_in_module(&mut ctx, Symbol::new("m"), vec![op]);

        let mut target = ConversionTarget::new();
        target.add_illegal_dialect("hi");
        target.add_legal_dialect("lo");

        let converter = f64_to_f32_converter();
        let result =
            apply_partial_conversion(&mut ctx, module, &target, &converter, vec![Box::new(Lower)]);
        assert!(result.total_changes >= 1);

        let ops = module.ops(&ctx);
        assert_eq!(ctx.op(ops[0]).dialect, Symbol::new("lo"));
        let f32_ty = core::float_ty(&mut ctx.types, 32);
        assert_eq!(ctx.op_result_types(ops[0]), &[f32_ty]);
    }

    #[test]
    fn full_conversion_is_noop_when_everything_legal() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);
        let c = arith::r#const(&mut ctx, loc, i32_ty, Attribute::int(3));
        let module = wrap_in_module(&mut ctx, Symbol::new("m"), vec![c.op_ref()]);

        let mut target = ConversionTarget::new();
        target.add_legal_dialect("arith");
        let converter = TypeConverter::new();

        let before = module.ops(&ctx);
        let result =
            apply_full_conversion(&mut ctx, module, &target, &converter, vec![]).unwrap();
        assert_eq!(result.total_changes, 0);
        assert_eq!(module.ops(&ctx), before);
    }

    #[test]
    fn full_conversion_rolls_back_on_failure() {
        let mut ctx = IrContext::new();
        let f64_ty = core::float_ty(&mut ctx.types, 64);
        let op = hi_op(&mut ctx, f64_ty);
        let module = wrap_in_module(&mut ctx, Symbol::new("m"), vec![op]);

        // Illegal dialect, but no pattern to fix it.
        let mut target = ConversionTarget::new();
        target.add_illegal_dialect("hi");
        let converter = TypeConverter::new();

        let err = apply_full_conversion(&mut ctx, module, &target, &converter, vec![])
            .expect_err("conversion must fail");
        match err {
            ConversionError::IllegalOpsRemain(ops) => assert_eq!(ops.len(), 1),
        }

        // The body was rolled back to an equivalent hi.op.
        let ops = module.ops(&ctx);
        assert_eq!(ops.len(), 1);
        assert_eq!(ctx.op(ops[0]).dialect, Symbol::new("hi"));
        assert_eq!(ctx.op_result_types(ops[0]), &[f64_ty]);
    }
}
