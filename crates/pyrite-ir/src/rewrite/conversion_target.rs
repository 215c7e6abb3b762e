//! Legality partition for dialect conversion.

use std::collections::HashSet;

use crate::context::IrContext;
use crate::refs::{OpRef, RegionRef};
use crate::{walk, Symbol};

/// Per-op legality verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Legality {
    Legal,
    Illegal,
}

type DynamicCheckFn = dyn Fn(&IrContext, OpRef) -> Option<Legality>;

/// Classifies ops as legal or illegal for a conversion.
///
/// Resolution order: dynamic checks (first decisive wins), then specific op
/// rules, then dialect rules, then legal by default.
#[derive(Default)]
pub struct ConversionTarget {
    legal_dialects: HashSet<Symbol>,
    illegal_dialects: HashSet<Symbol>,
    legal_ops: HashSet<(Symbol, Symbol)>,
    illegal_ops: HashSet<(Symbol, Symbol)>,
    dynamic_checks: Vec<Box<DynamicCheckFn>>,
}

impl ConversionTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_legal_dialect(&mut self, dialect: &str) {
        self.legal_dialects.insert(Symbol::new(dialect));
    }

    pub fn add_illegal_dialect(&mut self, dialect: &str) {
        self.illegal_dialects.insert(Symbol::new(dialect));
    }

    pub fn add_legal_op(&mut self, dialect: &str, op: &str) {
        self.legal_ops.insert((Symbol::new(dialect), Symbol::new(op)));
    }

    pub fn add_illegal_op(&mut self, dialect: &str, op: &str) {
        self.illegal_ops
            .insert((Symbol::new(dialect), Symbol::new(op)));
    }

    /// Register a dynamic check; return `None` to defer to the next rule.
    pub fn add_dynamic_check(
        &mut self,
        f: impl Fn(&IrContext, OpRef) -> Option<Legality> + 'static,
    ) {
        self.dynamic_checks.push(Box::new(f));
    }

    pub fn is_legal(&self, ctx: &IrContext, op: OpRef) -> Legality {
        for check in &self.dynamic_checks {
            if let Some(result) = check(ctx, op) {
                return result;
            }
        }

        let data = ctx.op(op);
        let key = (data.dialect, data.name);
        if self.legal_ops.contains(&key) {
            return Legality::Legal;
        }
        if self.illegal_ops.contains(&key) {
            return Legality::Illegal;
        }
        if self.legal_dialects.contains(&data.dialect) {
            return Legality::Legal;
        }
        if self.illegal_dialects.contains(&data.dialect) {
            return Legality::Illegal;
        }
        Legality::Legal
    }

    /// All illegal ops remaining under `region`.
    pub fn verify(&self, ctx: &IrContext, region: RegionRef) -> Vec<IllegalOp> {
        let mut illegal = Vec::new();
        let _ = walk::walk_region::<std::convert::Infallible>(ctx, region, &mut |op| {
            if self.is_legal(ctx, op) == Legality::Illegal {
                let data = ctx.op(op);
                illegal.push(IllegalOp {
                    op,
                    dialect: data.dialect,
                    name: data.name,
                });
            }
            std::ops::ControlFlow::Continue(walk::WalkAction::Advance)
        });
        illegal
    }
}

/// An op the target classifies as illegal.
#[derive(Debug)]
pub struct IllegalOp {
    pub op: OpRef,
    pub dialect: Symbol,
    pub name: Symbol,
}

impl std::fmt::Display for IllegalOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{} ({})", self.dialect, self.name, self.op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OperationDataBuilder;

    fn mk_op(ctx: &mut IrContext, dialect: &str, name: &str) -> OpRef {
        let loc = ctx.unknown_loc();
        let data = OperationDataBuilder::new(loc, Symbol::new(dialect), Symbol::new(name))
            .build(ctx);
        ctx.create_op(data)
    }

    #[test]
    fn op_rules_override_dialect_rules() {
        let mut ctx = IrContext::new();
        let op = mk_op(&mut ctx, "plier", "binop");

        let mut target = ConversionTarget::new();
        target.add_illegal_dialect("plier");
        assert_eq!(target.is_legal(&ctx, op), Legality::Illegal);

        target.add_legal_op("plier", "binop");
        assert_eq!(target.is_legal(&ctx, op), Legality::Legal);
    }

    #[test]
    fn dynamic_check_wins() {
        let mut ctx = IrContext::new();
        let op = mk_op(&mut ctx, "arith", "addi");

        let mut target = ConversionTarget::new();
        target.add_legal_dialect("arith");
        target.add_dynamic_check(|ctx, op| {
            (ctx.op(op).name == Symbol::new("addi")).then_some(Legality::Illegal)
        });
        assert_eq!(target.is_legal(&ctx, op), Legality::Illegal);
    }

    #[test]
    fn default_is_legal() {
        let mut ctx = IrContext::new();
        let op = mk_op(&mut ctx, "whatever", "thing");
        let target = ConversionTarget::new();
        assert_eq!(target.is_legal(&ctx, op), Legality::Legal);
    }
}
