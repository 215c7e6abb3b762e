//! Forced inlining of annotated calls.
//!
//! Every `func.call` whose call site or callee carries the `force_inline`
//! unit attribute is replaced by an `scf.execute_region` holding a clone of
//! the callee body: entry arguments are rewired to the call operands and
//! `func.return` becomes `scf.yield`. The rewrite runs to a fixed point;
//! marked calls that survive (unknown callee) fail the pass, and functions
//! that became unreferenced are swept afterwards.

use thiserror::Error;
use tracing::debug;

use crate::clone::{clone_region, CloneMap};
use crate::context::IrContext;
use crate::dialect::{func, scf, util};
use crate::refs::{BlockRef, OpRef, RegionRef, ValueRef};
use crate::rewrite::{ModuleRef, PatternApplicator, PatternRewriter, RewritePattern};
use crate::transforms::dce;
use crate::{walk, DialectOp, Symbol};

/// Unresolvable force-inline marker.
#[derive(Debug, Error)]
pub enum ForceInlineError {
    #[error("could not inline force-inline call to `{callee}`")]
    UnresolvedCall { callee: Symbol },
}

fn must_inline(ctx: &IrContext, call: OpRef, callee: OpRef) -> bool {
    let marker = util::force_inline_attr();
    ctx.op(call).attributes.contains_key(&marker)
        || ctx.op(callee).attributes.contains_key(&marker)
}

struct InlineCall {
    module: ModuleRef,
}

impl RewritePattern for InlineCall {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("func"), Symbol::new("call")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(call) = func::Call::from_op(ctx, op) else {
            return false;
        };
        let callee_name = call.callee(ctx);
        let Some(callee) = self.module.symbol_table(ctx).lookup(callee_name) else {
            return false;
        };
        if !func::Func::matches(ctx, callee) || !must_inline(ctx, op, callee) {
            return false;
        }

        debug!(callee = %callee_name, "inlining call");

        let loc = ctx.op(op).location;
        let callee_body = func::Func::from_op(ctx, callee)
            .expect("matched above")
            .body(ctx);

        // Clone the callee body with parameters rewired to call operands.
        let mut map = CloneMap::new();
        let args: Vec<ValueRef> = call.args(ctx).to_vec();
        if let Some(entry) = ctx.entry_block(callee_body) {
            let params: Vec<ValueRef> = ctx.block_args(entry).to_vec();
            if params.len() != args.len() {
                return false;
            }
            for (param, arg) in params.into_iter().zip(args) {
                map.map_value(param, arg);
            }
        }
        let inlined = clone_region(ctx, callee_body, &mut map);

        // Route returns to region yields.
        rewrite_returns_to_yields(ctx, inlined);

        let result_types: Vec<_> = ctx.op_result_types(op).to_vec();
        let exec = scf::execute_region(ctx, loc, result_types, inlined);
        rewriter.replace_op(exec.op_ref());
        true
    }

    fn name(&self) -> &'static str {
        "InlineCall"
    }
}

fn rewrite_returns_to_yields(ctx: &mut IrContext, region: RegionRef) {
    let blocks: Vec<BlockRef> = ctx.region(region).blocks.to_vec();
    for block in blocks {
        let Some(&last) = ctx.block(block).ops.last() else {
            continue;
        };
        if !func::Return::matches(ctx, last) {
            continue;
        }
        let loc = ctx.op(last).location;
        let values: Vec<ValueRef> = ctx.op_operands(last).to_vec();
        crate::helpers::erase_op(ctx, last);
        let y = scf::r#yield(ctx, loc, values);
        ctx.push_op(block, y.op_ref());
    }
}

/// Inline all force-inline calls in `module`, then sweep dead functions.
pub fn force_inline(ctx: &mut IrContext, module: ModuleRef) -> Result<(), ForceInlineError> {
    let mut applicator = PatternApplicator::new()
        .without_folding()
        .add_pattern(InlineCall { module });
    applicator.apply(ctx, module);

    // Any marked call that survived names an unresolvable callee.
    let table = module.symbol_table(ctx);
    let mut unresolved: Option<Symbol> = None;
    let _ = walk::walk_region::<()>(ctx, module.body(ctx), &mut |op| {
        if let Ok(call) = func::Call::from_op(ctx, op) {
            let callee_name = call.callee(ctx);
            if let Some(callee) = table.lookup(callee_name) {
                if must_inline(ctx, op, callee) {
                    unresolved = Some(callee_name);
                    return std::ops::ControlFlow::Break(());
                }
            } else if ctx
                .op(op)
                .attributes
                .contains_key(&util::force_inline_attr())
            {
                unresolved = Some(callee_name);
                return std::ops::ControlFlow::Break(());
            }
        }
        std::ops::ControlFlow::Continue(walk::WalkAction::Advance)
    });
    if let Some(callee) = unresolved {
        return Err(ForceInlineError::UnresolvedCall { callee });
    }

    dce::eliminate_dead_symbols(ctx, module);
    Ok(())
}
