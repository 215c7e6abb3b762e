//! Pipeline jump markers.
//!
//! A lowering that needs an earlier named stage to run again attaches the
//! stage name to the module; the pipeline registry pops the markers after
//! each stage and re-enters the named stages.

use crate::context::IrContext;
use crate::rewrite::ModuleRef;
use crate::types::Attribute;
use crate::{symbols, Symbol};

symbols! {
    ATTR_JUMP_MARKERS => "pipeline_jump_markers",
}

/// Request that `stage` re-runs on this module.
pub fn add_jump_marker(ctx: &mut IrContext, module: ModuleRef, stage: Symbol) {
    let key = *ATTR_JUMP_MARKERS;
    let attrs = &mut ctx.op_mut(module.op()).attributes;
    let mut markers = match attrs.get(&key) {
        Some(Attribute::List(items)) => items.clone(),
        _ => Vec::new(),
    };
    if !markers.iter().any(|a| a.as_symbol() == Some(stage)) {
        markers.push(Attribute::Symbol(stage));
    }
    attrs.insert(key, Attribute::List(markers));
}

/// Remove and return all pending jump markers.
pub fn take_jump_markers(ctx: &mut IrContext, module: ModuleRef) -> Vec<Symbol> {
    let key = *ATTR_JUMP_MARKERS;
    let attrs = &mut ctx.op_mut(module.op()).attributes;
    match attrs.remove(&key) {
        Some(Attribute::List(items)) => {
            items.iter().filter_map(Attribute::as_symbol).collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::applicator::wrap_in_module;

    #[test]
    fn markers_accumulate_and_dedup() {
        let mut ctx = IrContext::new();
        let module = wrap_in_module(&mut ctx, Symbol::new("m"), vec![]);

        let scf_stage = Symbol::new("plier-to-scf");
        add_jump_marker(&mut ctx, module, scf_stage);
        add_jump_marker(&mut ctx, module, scf_stage);
        add_jump_marker(&mut ctx, module, Symbol::new("plier-to-std"));

        let markers = take_jump_markers(&mut ctx, module);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0], scf_stage);

        assert!(take_jump_markers(&mut ctx, module).is_empty());
    }
}
