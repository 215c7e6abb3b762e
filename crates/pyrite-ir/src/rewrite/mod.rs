//! Pattern-driven rewriting and dialect conversion.
//!
//! [`PatternApplicator`] is the greedy driver: a FIFO worklist seeded in
//! traversal order, folding before pattern matching, benefit-ordered
//! commits. The conversion layer adds a [`TypeConverter`] and a
//! [`ConversionTarget`] on top and is driven by
//! [`conversion::apply_partial_conversion`] /
//! [`conversion::apply_full_conversion`].

pub mod applicator;
pub mod conversion;
pub mod conversion_target;
pub mod fold;
pub mod pattern;
pub mod rewriter;
pub mod signature;
pub mod type_converter;

pub use applicator::{ApplyResult, PatternApplicator};
pub use conversion::{apply_full_conversion, apply_partial_conversion, ConversionError};
pub use conversion_target::{ConversionTarget, IllegalOp, Legality};
pub use pattern::{ConversionPattern, RewritePattern};
pub use rewriter::PatternRewriter;
pub use type_converter::{MaterializationKind, MaterializeResult, TypeConverter};

use crate::context::IrContext;
use crate::refs::{BlockRef, OpRef, RegionRef};
use crate::symbol_table;
use crate::Symbol;

/// Wrapper over an `OpRef` known to be a `core.module`.
#[derive(Clone, Copy, Debug)]
pub struct ModuleRef(OpRef);

impl ModuleRef {
    /// Wrap `op`, verifying it is a `core.module`.
    pub fn new(ctx: &IrContext, op: OpRef) -> Option<Self> {
        let data = ctx.op(op);
        (data.dialect == Symbol::new("core") && data.name == Symbol::new("module"))
            .then_some(ModuleRef(op))
    }

    pub fn op(self) -> OpRef {
        self.0
    }

    /// The module's single body region.
    pub fn body(self, ctx: &IrContext) -> RegionRef {
        ctx.op(self.0).regions[0]
    }

    pub fn first_block(self, ctx: &IrContext) -> Option<BlockRef> {
        ctx.entry_block(self.body(ctx))
    }

    /// Top-level ops of the module body.
    pub fn ops(self, ctx: &IrContext) -> Vec<OpRef> {
        match self.first_block(ctx) {
            Some(block) => ctx.block(block).ops.to_vec(),
            None => Vec::new(),
        }
    }

    pub fn name(self, ctx: &IrContext) -> Option<Symbol> {
        symbol_table::symbol_of(ctx, self.0)
    }

    /// Symbol table over the module body.
    pub fn symbol_table(self, ctx: &IrContext) -> symbol_table::SymbolTable {
        symbol_table::SymbolTable::build(ctx, self.body(ctx))
    }
}
