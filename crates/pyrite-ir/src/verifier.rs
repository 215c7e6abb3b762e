//! IR structural verification.
//!
//! Checks, for a module:
//!
//! - every operand is dominated by its definition (intra-block order,
//!   block-level dominance inside multi-block regions, region nesting),
//! - values do not cross `isolated-from-above` boundaries,
//! - non-empty blocks end with exactly one terminator, except the bodies
//!   of symbol-table ops (module-like containers),
//! - single-successor terminator operands match the successor block's
//!   argument types,
//! - `same-operands-and-result-type` ops are homogeneous,
//! - the stored use-chains agree with the actual operand lists.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::context::IrContext;
use crate::refs::{BlockRef, OpRef, RegionRef, ValueRef};
use crate::rewrite::ModuleRef;
use crate::{traits, walk, Traits, ValueDef};

/// A single verification failure.
pub struct VerifierError {
    pub op: Option<OpRef>,
    pub message: String,
}

impl fmt::Display for VerifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Some(op) => write!(f, "{op}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl fmt::Debug for VerifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// All failures found in one verification run.
pub struct VerifierReport {
    pub errors: Vec<VerifierError>,
}

impl VerifierReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for VerifierReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return f.write_str("verifier: ok");
        }
        writeln!(f, "{} verifier error(s):", self.errors.len())?;
        for err in &self.errors {
            writeln!(f, "  - {err}")?;
        }
        Ok(())
    }
}

/// Verify a module; empty report means the IR is well-formed.
pub fn verify(ctx: &IrContext, module: ModuleRef) -> VerifierReport {
    let mut v = Verifier::new(ctx);
    v.check_region(module.body(ctx));
    v.check_use_chains(module.body(ctx));
    VerifierReport { errors: v.errors }
}

struct Verifier<'a> {
    ctx: &'a IrContext,
    errors: Vec<VerifierError>,
    /// Per-region block dominance, computed on demand.
    dominance: HashMap<RegionRef, Dominance>,
    /// Op position within its block, for intra-block ordering.
    positions: HashMap<OpRef, usize>,
}

impl<'a> Verifier<'a> {
    fn new(ctx: &'a IrContext) -> Self {
        Self {
            ctx,
            errors: Vec::new(),
            dominance: HashMap::new(),
            positions: HashMap::new(),
        }
    }

    fn error(&mut self, op: Option<OpRef>, message: String) {
        self.errors.push(VerifierError { op, message });
    }

    fn check_region(&mut self, region: RegionRef) {
        let blocks: Vec<BlockRef> = self.ctx.region(region).blocks.to_vec();
        let exempt_from_terminator = self
            .ctx
            .region(region)
            .parent_op
            .map(|op| traits::traits_of(self.ctx, op).contains(Traits::SYMBOL_TABLE))
            .unwrap_or(true);

        for block in blocks {
            let ops: Vec<OpRef> = self.ctx.block(block).ops.to_vec();
            for (idx, &op) in ops.iter().enumerate() {
                self.positions.insert(op, idx);
            }

            for (idx, &op) in ops.iter().enumerate() {
                let is_last = idx + 1 == ops.len();
                let is_term = traits::is_terminator(self.ctx, op);
                if is_term && !is_last {
                    self.error(Some(op), "terminator is not the last op in its block".into());
                }
                if is_last && !is_term && !exempt_from_terminator {
                    self.error(
                        Some(op),
                        format!(
                            "block {block} does not end with a terminator (last op is {})",
                            self.ctx.op(op).full_name(),
                        ),
                    );
                }

                self.check_operands(op);
                self.check_same_type_trait(op);
                if is_term {
                    self.check_successor_args(op);
                }

                for &nested in &self.ctx.op(op).regions {
                    self.check_region(nested);
                }
            }

            if ops.is_empty() && !exempt_from_terminator {
                self.error(
                    None,
                    format!("block {block} is empty but its region requires a terminator"),
                );
            }
        }
    }

    // ========================================================================
    // Dominance
    // ========================================================================

    fn check_operands(&mut self, op: OpRef) {
        let operands: Vec<ValueRef> = self.ctx.op_operands(op).to_vec();
        for (idx, val) in operands.into_iter().enumerate() {
            if let Some(message) = self.check_dominates(val, op) {
                let full = self.ctx.op(op).full_name();
                self.error(
                    Some(op),
                    format!("operand #{idx} of {full}: {message}"),
                );
            }
        }
    }

    /// `None` when `val` properly dominates `user`; otherwise the failure.
    fn check_dominates(&mut self, val: ValueRef, user: OpRef) -> Option<String> {
        let def_block = match self.ctx.value_def(val) {
            ValueDef::OpResult(def_op, _) => self.ctx.op(def_op).parent_block?,
            ValueDef::BlockArg(block, _) => block,
        };
        let def_region = self.ctx.block(def_block).parent_region?;

        // Walk the user's ancestor chain until we reach the def's region.
        let mut cursor = user;
        loop {
            let Some(cursor_block) = self.ctx.op(cursor).parent_block else {
                return Some("use is detached".into());
            };
            let Some(cursor_region) = self.ctx.block(cursor_block).parent_region else {
                return Some("use block is detached".into());
            };

            if cursor_region == def_region {
                return self.check_dominates_in_region(val, def_block, cursor, cursor_block);
            }

            // Crossing upward: the op owning this region must not be
            // isolated, or the outer value may not be captured.
            let Some(parent_op) = self.ctx.region(cursor_region).parent_op else {
                return Some("definition not in scope".into());
            };
            if traits::is_isolated_from_above(self.ctx, parent_op) {
                return Some(format!(
                    "value defined outside isolated-from-above op {} is captured inside",
                    self.ctx.op(parent_op).full_name(),
                ));
            }
            cursor = parent_op;
        }
    }

    fn check_dominates_in_region(
        &mut self,
        val: ValueRef,
        def_block: BlockRef,
        cursor: OpRef,
        cursor_block: BlockRef,
    ) -> Option<String> {
        if def_block == cursor_block {
            match self.ctx.value_def(val) {
                ValueDef::BlockArg(..) => None,
                ValueDef::OpResult(def_op, _) => {
                    let def_pos = self.positions.get(&def_op).copied();
                    let use_pos = self.positions.get(&cursor).copied();
                    match (def_pos, use_pos) {
                        (Some(d), Some(u)) if d < u => None,
                        _ => Some("use precedes definition in its block".into()),
                    }
                }
            }
        } else {
            let region = self.ctx.block(def_block).parent_region?;
            let dom = self.dominance_of(region);
            if dom.dominates(def_block, cursor_block) {
                None
            } else {
                Some(format!(
                    "definition block {def_block} does not dominate use block {cursor_block}",
                ))
            }
        }
    }

    fn dominance_of(&mut self, region: RegionRef) -> &Dominance {
        if !self.dominance.contains_key(&region) {
            let dom = Dominance::compute(self.ctx, region);
            self.dominance.insert(region, dom);
        }
        &self.dominance[&region]
    }

    // ========================================================================
    // Per-op checks
    // ========================================================================

    fn check_same_type_trait(&mut self, op: OpRef) {
        if !traits::traits_of(self.ctx, op).contains(Traits::SAME_OPERANDS_AND_RESULT_TYPE) {
            return;
        }
        let mut tys = self
            .ctx
            .op_operands(op)
            .iter()
            .map(|&v| self.ctx.value_ty(v))
            .chain(self.ctx.op_result_types(op).iter().copied());
        let Some(first) = tys.next() else {
            return;
        };
        if tys.any(|ty| ty != first) {
            let full = self.ctx.op(op).full_name();
            self.error(
                Some(op),
                format!("{full} requires all operands and results to share one type"),
            );
        }
    }

    fn check_successor_args(&mut self, op: OpRef) {
        // Only the uniform single-successor layout is checked here;
        // multi-successor terminators are segmented op-specifically.
        let successors = &self.ctx.op(op).successors;
        if successors.len() != 1 {
            return;
        }
        let succ = successors[0];
        let operand_tys: Vec<_> = self
            .ctx
            .op_operands(op)
            .iter()
            .map(|&v| self.ctx.value_ty(v))
            .collect();
        let arg_tys: Vec<_> = self
            .ctx
            .block_args(succ)
            .iter()
            .map(|&a| self.ctx.value_ty(a))
            .collect();
        if operand_tys != arg_tys {
            self.error(
                Some(op),
                format!(
                    "successor argument types do not match block {succ} argument types",
                ),
            );
        }
    }

    // ========================================================================
    // Use-chain consistency
    // ========================================================================

    fn check_use_chains(&mut self, region: RegionRef) {
        let mut actual: HashSet<(ValueRef, OpRef, u32)> = HashSet::new();
        let mut values: HashSet<ValueRef> = HashSet::new();

        let _ = walk::walk_region::<std::convert::Infallible>(self.ctx, region, &mut |op| {
            for (idx, &operand) in self.ctx.op_operands(op).iter().enumerate() {
                actual.insert((operand, op, idx as u32));
                values.insert(operand);
            }
            for &result in self.ctx.op_results(op) {
                values.insert(result);
            }
            std::ops::ControlFlow::Continue(walk::WalkAction::Advance)
        });

        for &(val, op, idx) in &actual {
            let found = self
                .ctx
                .uses(val)
                .iter()
                .any(|u| u.user == op && u.operand_index == idx);
            if !found {
                self.error(
                    Some(op),
                    format!("operand #{idx} uses {val} but the use-chain has no entry"),
                );
            }
        }

        for &val in &values {
            for u in self.ctx.uses(val) {
                if !actual.contains(&(val, u.user, u.operand_index)) {
                    self.error(
                        Some(u.user),
                        format!(
                            "use-chain of {val} claims operand #{} of {}, which does not exist",
                            u.operand_index, u.user,
                        ),
                    );
                }
            }
        }
    }
}

// ============================================================================
// Block dominance within one region
// ============================================================================

/// Iterative dominator sets over a region's successor graph.
struct Dominance {
    index: HashMap<BlockRef, usize>,
    /// `doms[i]` = set of block indices dominating block i.
    doms: Vec<HashSet<usize>>,
}

impl Dominance {
    fn compute(ctx: &IrContext, region: RegionRef) -> Self {
        let blocks: Vec<BlockRef> = ctx.region(region).blocks.to_vec();
        let n = blocks.len();
        let index: HashMap<BlockRef, usize> =
            blocks.iter().enumerate().map(|(i, &b)| (b, i)).collect();

        // Predecessors from terminator successors.
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, &block) in blocks.iter().enumerate() {
            if let Some(&term) = ctx.block(block).ops.last() {
                for &succ in &ctx.op(term).successors {
                    if let Some(&j) = index.get(&succ) {
                        preds[j].push(i);
                    }
                }
            }
        }

        let all: HashSet<usize> = (0..n).collect();
        let mut doms: Vec<HashSet<usize>> = vec![all; n];
        if n > 0 {
            doms[0] = HashSet::from([0]);
        }

        let mut changed = true;
        while changed {
            changed = false;
            for i in 1..n {
                let mut new: Option<HashSet<usize>> = None;
                for &p in &preds[i] {
                    new = Some(match new {
                        None => doms[p].clone(),
                        Some(acc) => acc.intersection(&doms[p]).copied().collect(),
                    });
                }
                let mut new = new.unwrap_or_default();
                new.insert(i);
                if new != doms[i] {
                    doms[i] = new;
                    changed = true;
                }
            }
        }

        Self { index, doms }
    }

    fn dominates(&self, a: BlockRef, b: BlockRef) -> bool {
        match (self.index.get(&a), self.index.get(&b)) {
            (Some(&ia), Some(&ib)) => self.doms[ib].contains(&ia),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{BlockArgData, BlockData, RegionData};
    use crate::dialect::{arith, cf, core, func, scf};
    use crate::rewrite::applicator::wrap_in_module;
    use crate::types::Attribute;
    use crate::{DialectOp, Symbol};
    use smallvec::smallvec;

    fn build_fn_module(ctx: &mut IrContext) -> (ModuleRef, BlockRef) {
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);
        let fn_ty = func::fn_ty(&mut ctx.types, i32_ty, []);

        let entry = ctx.create_block(BlockData::empty(loc));
        let c = arith::r#const(ctx, loc, i32_ty, Attribute::int(1));
        ctx.push_op(entry, c.op_ref());
        let c_v = c.result(ctx);
        let ret = func::r#return(ctx, loc, [c_v]);
        ctx.push_op(entry, ret.op_ref());
        let body = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![entry],
            parent_op: None,
        });
        let f = func::func(ctx, loc, Symbol::new("f"), fn_ty, None, None, body);
        (wrap_in_module(ctx, Symbol::new("m"), vec![f.op_ref()]), entry)
    }

    #[test]
    fn well_formed_module_passes() {
        let mut ctx = IrContext::new();
        let (module, _) = build_fn_module(&mut ctx);
        let report = verify(&ctx, module);
        assert!(report.is_ok(), "{report}");
    }

    #[test]
    fn missing_terminator_is_reported() {
        let mut ctx = IrContext::new();
        let (module, entry) = build_fn_module(&mut ctx);
        // Drop the return.
        let ret = *ctx.block(entry).ops.last().unwrap();
        crate::helpers::erase_op(&mut ctx, ret);

        let report = verify(&ctx, module);
        assert!(!report.is_ok());
        assert!(report.to_string().contains("terminator"));
    }

    #[test]
    fn use_before_def_is_reported() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);
        let fn_ty = func::fn_ty(&mut ctx.types, i32_ty, []);

        let entry = ctx.create_block(BlockData::empty(loc));
        let c = arith::r#const(&mut ctx, loc, i32_ty, Attribute::int(1));
        let c_v = c.result(&ctx);
        let neg_like = arith::addi(&mut ctx, loc, c_v, c_v, i32_ty);
        // Insert the use before the def.
        ctx.push_op(entry, neg_like.op_ref());
        ctx.push_op(entry, c.op_ref());
        let neg_like_v = neg_like.result(&ctx);
        let ret = func::r#return(&mut ctx, loc, [neg_like_v]);
        ctx.push_op(entry, ret.op_ref());
        let body = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![entry],
            parent_op: None,
        });
        let f = func::func(&mut ctx, loc, Symbol::new("f"), fn_ty, None, None, body);
        let module = wrap_in_module(&mut ctx, Symbol::new("m"), vec![f.op_ref()]);

        let report = verify(&ctx, module);
        assert!(!report.is_ok());
        assert!(report.to_string().contains("precedes definition"));
    }

    #[test]
    fn captured_value_inside_isolated_op_is_reported() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);
        let fn_ty = func::fn_ty(&mut ctx.types, i32_ty, []);

        // Outer constant captured inside a func.func body: illegal.
        let outer_const = arith::r#const(&mut ctx, loc, i32_ty, Attribute::int(9));

        let entry = ctx.create_block(BlockData::empty(loc));
        let outer_const_v = outer_const.result(&ctx);
        let ret = func::r#return(&mut ctx, loc, [outer_const_v]);
        ctx.push_op(entry, ret.op_ref());
        let body = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![entry],
            parent_op: None,
        });
        let f = func::func(&mut ctx, loc, Symbol::new("f"), fn_ty, None, None, body);

        let module = wrap_in_module(
            &mut ctx,
            Symbol::new("m"),
            vec![outer_const.op_ref(), f.op_ref()],
        );

        let report = verify(&ctx, module);
        assert!(!report.is_ok());
        assert!(report.to_string().contains("isolated-from-above"));
    }

    #[test]
    fn nested_region_capture_is_legal() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);
        let i1_ty = core::bool_ty(&mut ctx.types);
        let fn_ty = func::fn_ty(&mut ctx.types, i32_ty, [i32_ty]);

        let entry = ctx.create_block(BlockData {
            location: loc,
            args: vec![BlockArgData::of(i32_ty)],
            ops: smallvec![],
            parent_region: None,
        });
        let param = ctx.block_arg(entry, 0);
        let cond = arith::r#const(&mut ctx, loc, i1_ty, Attribute::int(1));
        ctx.push_op(entry, cond.op_ref());

        // then/else regions both yield the captured function parameter.
        let mk_branch = |ctx: &mut IrContext| {
            let b = ctx.create_block(BlockData::empty(loc));
            let y = scf::r#yield(ctx, loc, [param]);
            ctx.push_op(b, y.op_ref());
            ctx.create_region(RegionData {
                location: loc,
                blocks: smallvec![b],
                parent_op: None,
            })
        };
        let then_region = mk_branch(&mut ctx);
        let else_region = mk_branch(&mut ctx);
        let cond_v = cond.result(&ctx);
        let if_op = scf::r#if(
            &mut ctx,
            loc,
            cond_v,
            [i32_ty],
            then_region,
            else_region,
        );
        ctx.push_op(entry, if_op.op_ref());
        let if_op_res = if_op.results(&ctx)[0];
        let ret = func::r#return(&mut ctx, loc, [if_op_res]);
        ctx.push_op(entry, ret.op_ref());

        let body = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![entry],
            parent_op: None,
        });
        let f = func::func(&mut ctx, loc, Symbol::new("f"), fn_ty, None, None, body);
        let module = wrap_in_module(&mut ctx, Symbol::new("m"), vec![f.op_ref()]);

        let report = verify(&ctx, module);
        assert!(report.is_ok(), "{report}");
    }

    #[test]
    fn successor_arg_mismatch_is_reported() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);
        let f64_ty = core::float_ty(&mut ctx.types, 64);
        let fn_ty = func::fn_ty(&mut ctx.types, i32_ty, []);

        let entry = ctx.create_block(BlockData::empty(loc));
        let exit = ctx.create_block(BlockData {
            location: loc,
            args: vec![BlockArgData::of(f64_ty)],
            ops: smallvec![],
            parent_region: None,
        });

        let c = arith::r#const(&mut ctx, loc, i32_ty, Attribute::int(0));
        ctx.push_op(entry, c.op_ref());
        // Branch feeds an i32 into an f64 block arg.
        let c_v = c.result(&ctx);
        let br = cf::br(&mut ctx, loc, [c_v], exit);
        ctx.push_op(entry, br.op_ref());
        let exit_arg = ctx.block_arg(exit, 0);
        let c2 = arith::r#const(&mut ctx, loc, i32_ty, Attribute::int(0));
        ctx.push_op(exit, c2.op_ref());
        let _ = exit_arg;
        let c2_v = c2.result(&ctx);
        let ret = func::r#return(&mut ctx, loc, [c2_v]);
        ctx.push_op(exit, ret.op_ref());

        let body = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![entry, exit],
            parent_op: None,
        });
        let f = func::func(&mut ctx, loc, Symbol::new("f"), fn_ty, None, None, body);
        let module = wrap_in_module(&mut ctx, Symbol::new("m"), vec![f.op_ref()]);

        let report = verify(&ctx, module);
        assert!(!report.is_ok());
        assert!(report.to_string().contains("successor argument types"));
    }

    #[test]
    fn cross_block_dominance_via_branch() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);
        let fn_ty = func::fn_ty(&mut ctx.types, i32_ty, []);

        let entry = ctx.create_block(BlockData::empty(loc));
        let exit = ctx.create_block(BlockData::empty(loc));

        let c = arith::r#const(&mut ctx, loc, i32_ty, Attribute::int(5));
        ctx.push_op(entry, c.op_ref());
        let br = cf::br(&mut ctx, loc, [], exit);
        ctx.push_op(entry, br.op_ref());
        // exit uses a value defined in entry: entry dominates exit, fine.
        let c_v = c.result(&ctx);
        let ret = func::r#return(&mut ctx, loc, [c_v]);
        ctx.push_op(exit, ret.op_ref());

        let body = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![entry, exit],
            parent_op: None,
        });
        let f = func::func(&mut ctx, loc, Symbol::new("f"), fn_ty, None, None, body);
        let module = wrap_in_module(&mut ctx, Symbol::new("m"), vec![f.op_ref()]);

        let report = verify(&ctx, module);
        assert!(report.is_ok(), "{report}");
    }
}
