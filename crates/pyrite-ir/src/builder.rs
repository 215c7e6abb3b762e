//! Op-tracking builder for patterns.
//!
//! Dialect constructors create detached ops; a pattern has to hand every
//! one of them to the rewriter for insertion. `OpBuilder` wraps a context
//! and collects the ops a lowering emits, in order, so the pattern can
//! splice them as prefix ops in one go.

use crate::context::IrContext;
use crate::dialect::{arith, core};
use crate::refs::{OpRef, TypeRef, ValueRef};
use crate::types::{Attribute, Location};
use crate::DialectOp;

pub struct OpBuilder<'c> {
    pub ctx: &'c mut IrContext,
    pub loc: Location,
    ops: Vec<OpRef>,
}

impl<'c> OpBuilder<'c> {
    pub fn new(ctx: &'c mut IrContext, loc: Location) -> Self {
        Self {
            ctx,
            loc,
            ops: Vec::new(),
        }
    }

    /// Record a freshly created op for later insertion.
    pub fn track<W: DialectOp>(&mut self, w: W) -> W {
        self.ops.push(w.op_ref());
        w
    }

    pub fn track_op(&mut self, op: OpRef) {
        self.ops.push(op);
    }

    /// The tracked ops, in creation order.
    pub fn into_ops(self) -> Vec<OpRef> {
        self.ops
    }

    pub fn const_int(&mut self, ty: TypeRef, value: i64) -> ValueRef {
        let c = arith::r#const(self.ctx, self.loc, ty, Attribute::int(value));
        self.track(c).result(self.ctx)
    }

    pub fn const_float(&mut self, ty: TypeRef, value: f64) -> ValueRef {
        let c = arith::r#const(self.ctx, self.loc, ty, Attribute::float(value));
        self.track(c).result(self.ctx)
    }

    pub fn const_index(&mut self, value: i64) -> ValueRef {
        let idx = core::index_ty(&mut self.ctx.types);
        self.const_int(idx, value)
    }
}
