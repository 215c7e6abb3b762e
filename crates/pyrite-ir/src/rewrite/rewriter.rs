//! The rewriter handle through which patterns record mutations.
//!
//! Patterns never splice blocks or RAUW directly; they accumulate intents
//! here and the driver applies them after the pattern returns, keeping use
//! lists valid between rewrites.

use crate::context::IrContext;
use crate::refs::{BlockRef, OpRef, ValueRef};

/// Mutations recorded by one pattern application.
pub(crate) struct Mutations {
    /// Ops to insert before the root, in order.
    pub(crate) prefix_ops: Vec<OpRef>,
    /// Replacement op taking over the root's results.
    pub(crate) replacement: Option<OpRef>,
    /// Erase the root, mapping its results to these values.
    pub(crate) erase_values: Option<Vec<ValueRef>>,
    /// Ops to append at module level (outlined functions and the like).
    pub(crate) module_ops: Vec<OpRef>,
}

/// Accumulates mutations for the driver to apply.
#[derive(Default)]
pub struct PatternRewriter {
    prefix_ops: Vec<OpRef>,
    replacement: Option<OpRef>,
    erase_values: Option<Vec<ValueRef>>,
    module_ops: Vec<OpRef>,
}

impl PatternRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a detached op before the root.
    pub fn insert_op(&mut self, op: OpRef) {
        self.prefix_ops.push(op);
    }

    /// Replace the root with `new_op`; results map 1:1 by index.
    pub fn replace_op(&mut self, new_op: OpRef) {
        debug_assert!(
            self.replacement.is_none() && self.erase_values.is_none(),
            "replace_op after a previous replace/erase",
        );
        self.replacement = Some(new_op);
    }

    /// Erase the root, replacing its results with existing values.
    pub fn erase_op(&mut self, replacement_values: Vec<ValueRef>) {
        debug_assert!(
            self.replacement.is_none() && self.erase_values.is_none(),
            "erase_op after a previous replace/erase",
        );
        self.erase_values = Some(replacement_values);
    }

    /// Insert prefix ops and replace the root in one call.
    pub fn replace_with_prefix(&mut self, prefix: Vec<OpRef>, replacement: OpRef) {
        self.prefix_ops.extend(prefix);
        self.replace_op(replacement);
    }

    /// Append an op at module level.
    pub fn add_module_op(&mut self, op: OpRef) {
        self.module_ops.push(op);
    }

    pub(crate) fn has_mutations(&self) -> bool {
        !self.prefix_ops.is_empty()
            || self.replacement.is_some()
            || self.erase_values.is_some()
            || !self.module_ops.is_empty()
    }

    pub(crate) fn take_mutations(self) -> Mutations {
        Mutations {
            prefix_ops: self.prefix_ops,
            replacement: self.replacement,
            erase_values: self.erase_values,
            module_ops: self.module_ops,
        }
    }
}

/// Ops whose uses were touched by a committed rewrite; fed back into the
/// driver worklist.
pub(crate) struct AffectedOps {
    pub(crate) created: Vec<OpRef>,
}

/// Apply recorded mutations around `original_op`.
pub(crate) fn apply_mutations(
    ctx: &mut IrContext,
    original_op: OpRef,
    mutations: Mutations,
    module_first_block: Option<BlockRef>,
) -> AffectedOps {
    let parent_block = ctx.op(original_op).parent_block;
    let mut created = Vec::new();

    if let Some(block) = parent_block {
        for &prefix_op in &mutations.prefix_ops {
            ctx.insert_op_before(block, original_op, prefix_op);
            created.push(prefix_op);
        }
    }

    if let Some(new_op) = mutations.replacement {
        let old_results: Vec<ValueRef> = ctx.op_results(original_op).to_vec();
        let new_results: Vec<ValueRef> = ctx.op_results(new_op).to_vec();
        debug_assert_eq!(
            old_results.len(),
            new_results.len(),
            "replace_op result count mismatch",
        );
        for (old, new) in old_results.iter().zip(new_results.iter()) {
            ctx.replace_all_uses(*old, *new);
        }

        if let Some(block) = parent_block {
            // The new op takes the root's position.
            ctx.insert_op_before(block, original_op, new_op);
            ctx.remove_op_from_block(block, original_op);
        }
        ctx.remove_op(original_op);
        created.push(new_op);
    } else if let Some(erase_values) = mutations.erase_values {
        let old_results: Vec<ValueRef> = ctx.op_results(original_op).to_vec();
        debug_assert_eq!(
            old_results.len(),
            erase_values.len(),
            "erase_op replacement count mismatch",
        );
        for (old, new) in old_results.iter().zip(erase_values.iter()) {
            ctx.replace_all_uses(*old, *new);
        }
        if let Some(block) = parent_block {
            ctx.remove_op_from_block(block, original_op);
        }
        ctx.remove_op(original_op);
    }

    if let Some(module_block) = module_first_block {
        for module_op in mutations.module_ops {
            ctx.push_op(module_block, module_op);
            created.push(module_op);
        }
    }

    AffectedOps { created }
}
