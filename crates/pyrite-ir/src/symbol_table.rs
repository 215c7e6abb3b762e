//! Symbol tables over regions with the `symbol_table` trait.

use std::collections::HashMap;

use crate::context::IrContext;
use crate::refs::{OpRef, RegionRef};
use crate::types::Attribute;
use crate::{symbols, Symbol};

symbols! {
    ATTR_SYM_NAME => "sym_name",
}

pub fn sym_name_attr() -> Symbol {
    *ATTR_SYM_NAME
}

/// Read the `sym_name` attribute of an op, if any.
pub fn symbol_of(ctx: &IrContext, op: OpRef) -> Option<Symbol> {
    ctx.op(op)
        .attributes
        .get(&*ATTR_SYM_NAME)
        .and_then(Attribute::as_symbol)
}

/// Name-to-op index over the top-level ops of a symbol-table region.
///
/// Built on demand; rebuilt by passes after structural changes.
pub struct SymbolTable {
    index: HashMap<Symbol, OpRef>,
}

impl SymbolTable {
    /// Build the index over the first block of `region`.
    pub fn build(ctx: &IrContext, region: RegionRef) -> Self {
        let mut index = HashMap::new();
        if let Some(block) = ctx.entry_block(region) {
            for &op in &ctx.block(block).ops {
                if let Some(name) = symbol_of(ctx, op) {
                    index.insert(name, op);
                }
            }
        }
        Self { index }
    }

    pub fn lookup(&self, name: Symbol) -> Option<OpRef> {
        self.index.get(&name).copied()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// All ops under `region` that reference `name` through their `callee` or
/// `sym_name`-valued attributes.
pub fn symbol_uses(ctx: &IrContext, region: RegionRef, name: Symbol) -> Vec<OpRef> {
    let mut out = Vec::new();
    let _ = crate::walk::walk_region::<std::convert::Infallible>(ctx, region, &mut |op| {
        if references_symbol(ctx, op, name) {
            out.push(op);
        }
        std::ops::ControlFlow::Continue(crate::WalkAction::Advance)
    });
    out
}

/// Does `op` reference `name` via any attribute (excluding its own
/// `sym_name`)?
pub fn references_symbol(ctx: &IrContext, op: OpRef, name: Symbol) -> bool {
    ctx.op(op).attributes.iter().any(|(key, attr)| {
        if *key == *ATTR_SYM_NAME {
            return false;
        }
        attr_references(attr, name)
    })
}

fn attr_references(attr: &Attribute, name: Symbol) -> bool {
    match attr {
        Attribute::Symbol(s) => *s == name,
        Attribute::List(items) => items.iter().any(|a| attr_references(a, name)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{core, func};
    use crate::{BlockData, RegionData};
    use smallvec::smallvec;

    fn empty_fn(ctx: &mut IrContext, name: &str) -> OpRef {
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);
        let fn_ty = func::fn_ty(&mut ctx.types, i32_ty, []);
        let entry = ctx.create_block(BlockData::empty(loc));
        let body = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![entry],
            parent_op: None,
        });
        func::func(ctx, loc, Symbol::new(name), fn_ty, None, None, body).op_ref()
    }

    #[test]
    fn lookup_by_name() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let f = empty_fn(&mut ctx, "first");
        let g = empty_fn(&mut ctx, "second");

        let block = ctx.create_block(BlockData::empty(loc));
        ctx.push_op(block, f);
        ctx.push_op(block, g);
        let region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![block],
            parent_op: None,
        });

        let table = SymbolTable::build(&ctx, region);
        assert_eq!(table.lookup(Symbol::new("first")), Some(f));
        assert_eq!(table.lookup(Symbol::new("second")), Some(g));
        assert_eq!(table.lookup(Symbol::new("third")), None);
    }

    #[test]
    fn symbol_uses_find_calls() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);
        let f = empty_fn(&mut ctx, "callee_fn");

        let caller_block = ctx.create_block(BlockData::empty(loc));
        let call = func::call(
            &mut ctx,
            loc,
            [],
            [i32_ty],
            Symbol::new("callee_fn"),
            None,
        );
        ctx.push_op(caller_block, call.op_ref());

        let module_block = ctx.create_block(BlockData::empty(loc));
        ctx.push_op(module_block, f);
        let caller_body = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![caller_block],
            parent_op: None,
        });
        let caller_ty = func::fn_ty(&mut ctx.types, i32_ty, []);
        let caller = func::func(
            &mut ctx,
            loc,
            Symbol::new("caller"),
            caller_ty,
            None,
            None,
            caller_body,
        );
        ctx.push_op(module_block, caller.op_ref());
        let module_region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![module_block],
            parent_op: None,
        });

        let uses = symbol_uses(&ctx, module_region, Symbol::new("callee_fn"));
        assert_eq!(uses, vec![call.op_ref()]);
        assert!(symbol_uses(&ctx, module_region, Symbol::new("caller")).is_empty());
    }
}
