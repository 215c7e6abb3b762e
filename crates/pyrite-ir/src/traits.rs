//! Static capability traits for op kinds.
//!
//! Traits are compile-time markers consulted by the verifier, the folder,
//! DCE and the conversion drivers. The table is keyed by `(dialect, op)`
//! and populated once per process; ops absent from the table have no
//! traits.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::context::IrContext;
use crate::refs::OpRef;
use crate::Symbol;

/// Capability set of an op kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Traits(u16);

impl Traits {
    pub const NONE: Traits = Traits(0);
    /// Ends its block; may have successors.
    pub const TERMINATOR: Traits = Traits(1 << 0);
    /// Values defined outside may not be captured inside its regions.
    pub const ISOLATED_FROM_ABOVE: Traits = Traits(1 << 1);
    /// Its region maintains a `sym_name -> op` index.
    pub const SYMBOL_TABLE: Traits = Traits(1 << 2);
    /// Reads memory.
    pub const MEM_READ: Traits = Traits(1 << 3);
    /// Writes memory.
    pub const MEM_WRITE: Traits = Traits(1 << 4);
    /// No side effects; erasable when unused, foldable when constant.
    pub const PURE: Traits = Traits(1 << 5);
    /// All operands and results share one type.
    pub const SAME_OPERANDS_AND_RESULT_TYPE: Traits = Traits(1 << 6);
    /// Terminator whose successor argument grouping is statically known.
    pub const KNOWN_TERMINATOR_SUCCESSORS: Traits = Traits(1 << 7);

    pub const fn union(self, other: Traits) -> Traits {
        Traits(self.0 | other.0)
    }

    pub const fn contains(self, other: Traits) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Traits {
    type Output = Traits;
    fn bitor(self, rhs: Traits) -> Traits {
        self.union(rhs)
    }
}

const T: Traits = Traits::TERMINATOR;
const ISO: Traits = Traits::ISOLATED_FROM_ABOVE;
const SYM: Traits = Traits::SYMBOL_TABLE;
const R: Traits = Traits::MEM_READ;
const W: Traits = Traits::MEM_WRITE;
const P: Traits = Traits::PURE;
const SAME: Traits = Traits::SAME_OPERANDS_AND_RESULT_TYPE;
const KNOWN: Traits = Traits::KNOWN_TERMINATOR_SUCCESSORS;

/// Every op kind with a nonempty trait set.
#[rustfmt::skip]
const TRAIT_TABLE: &[(&str, &str, Traits)] = &[
    ("core", "module", SYM.union(ISO)),
    ("core", "unrealized_cast", P),

    ("func", "func", ISO),
    ("func", "return", T),

    ("arith", "const", P),
    ("arith", "addi", P.union(SAME)),
    ("arith", "subi", P.union(SAME)),
    ("arith", "muli", P.union(SAME)),
    ("arith", "floordivi", P.union(SAME)),
    ("arith", "divui", P.union(SAME)),
    ("arith", "ceildivui", P.union(SAME)),
    ("arith", "remi", P.union(SAME)),
    ("arith", "addf", P.union(SAME)),
    ("arith", "subf", P.union(SAME)),
    ("arith", "mulf", P.union(SAME)),
    ("arith", "divf", P.union(SAME)),
    ("arith", "remf", P.union(SAME)),
    ("arith", "negf", P.union(SAME)),
    ("arith", "andi", P.union(SAME)),
    ("arith", "ori", P.union(SAME)),
    ("arith", "xori", P.union(SAME)),
    ("arith", "shli", P.union(SAME)),
    ("arith", "shrsi", P.union(SAME)),
    ("arith", "shrui", P.union(SAME)),
    ("arith", "cmpi", P),
    ("arith", "cmpf", P),
    ("arith", "select", P),
    ("arith", "trunci", P),
    ("arith", "extsi", P),
    ("arith", "extui", P),
    ("arith", "truncf", P),
    ("arith", "extf", P),
    ("arith", "sitofp", P),
    ("arith", "uitofp", P),
    ("arith", "fptosi", P),
    ("arith", "fptoui", P),
    ("arith", "bitcast", P),
    ("arith", "index_cast", P),

    ("math", "powf", P),
    ("math", "floor", P),

    ("cmplx", "add", P.union(SAME)),
    ("cmplx", "sub", P.union(SAME)),
    ("cmplx", "mul", P.union(SAME)),
    ("cmplx", "div", P.union(SAME)),
    ("cmplx", "pow", P.union(SAME)),
    ("cmplx", "neg", P.union(SAME)),
    ("cmplx", "create", P),
    ("cmplx", "re", P),
    ("cmplx", "im", P),

    ("plier", "const", P),
    ("plier", "global", P),
    ("plier", "binop", P),
    ("plier", "unaryop", P),
    ("plier", "cast", P),
    ("plier", "build_tuple", P),
    ("plier", "getitem", P),
    ("plier", "build_slice", P),

    ("util", "undef", P),
    ("util", "sign_cast", P),
    ("util", "build_tuple", P),
    ("util", "tuple_extract", P),
    ("util", "env_region_yield", T),
    ("util", "memref_bitcast", P),
    ("util", "extract_memref_metadata", P),

    ("scf", "yield", T),
    ("scf", "condition", T),

    ("cf", "br", T.union(KNOWN)),
    ("cf", "cond_br", T.union(KNOWN)),

    ("mem", "load", R),
    ("mem", "store", W),
    ("mem", "copy", R.union(W)),
    ("mem", "alloc", W),
    ("mem", "dealloc", W),
    ("mem", "dim", P),
    ("mem", "subview", P),
    ("mem", "reinterpret_cast", P),
    ("mem", "cast", P),
    ("mem", "get_global", R),

    ("gpu", "terminator", T),
    ("gpu", "gpu_module", SYM.union(ISO)),
    ("gpu", "gpu_func", ISO),
    ("gpu", "alloc", W),
    ("gpu", "dealloc", W),
    ("gpu", "memcpy", R.union(W)),
    ("gpu", "launch_func", R.union(W)),
    ("gpu", "all_reduce", P),
    ("gpu", "subgroup_reduce", P),
    ("gpu", "block_id", P),
    ("gpu", "thread_id", P),
    ("gpu", "barrier", R.union(W)),
    ("gpu", "mem_fence", R.union(W)),

    ("gpu_rt", "alloc", W),
    ("gpu_rt", "dealloc", W),
    ("gpu_rt", "launch_kernel", R.union(W)),

    ("spv", "module", SYM.union(ISO)),
    ("spv", "func", ISO),
    ("spv", "ptr_access_chain", P),
    ("spv", "load", R),
    ("spv", "store", W),
    ("spv", "atomic_iadd", R.union(W)),
    ("spv", "atomic_isub", R.union(W)),
    ("spv", "atomic_fadd", R.union(W)),
    ("spv", "fnegate", P),
    ("spv", "control_barrier", R.union(W)),
    ("spv", "memory_barrier", R.union(W)),
    ("spv", "group_iadd", P),
    ("spv", "group_fadd", P),
    ("spv", "bitcast", P),
    ("spv", "undef", P),
    ("spv", "return", T),
];

static TABLE: LazyLock<HashMap<(Symbol, Symbol), Traits>> = LazyLock::new(|| {
    TRAIT_TABLE
        .iter()
        .map(|&(dialect, name, traits)| ((Symbol::new(dialect), Symbol::new(name)), traits))
        .collect()
});

/// Trait set of an op kind; empty for unknown kinds.
pub fn op_traits(dialect: Symbol, name: Symbol) -> Traits {
    TABLE.get(&(dialect, name)).copied().unwrap_or(Traits::NONE)
}

/// Trait set of a live op.
pub fn traits_of(ctx: &IrContext, op: OpRef) -> Traits {
    let data = ctx.op(op);
    op_traits(data.dialect, data.name)
}

pub fn is_terminator(ctx: &IrContext, op: OpRef) -> bool {
    traits_of(ctx, op).contains(Traits::TERMINATOR)
}

pub fn is_pure(ctx: &IrContext, op: OpRef) -> bool {
    traits_of(ctx, op).contains(Traits::PURE)
}

pub fn is_isolated_from_above(ctx: &IrContext, op: OpRef) -> bool {
    traits_of(ctx, op).contains(Traits::ISOLATED_FROM_ABOVE)
}

pub fn is_symbol_table(ctx: &IrContext, op: OpRef) -> bool {
    traits_of(ctx, op).contains(Traits::SYMBOL_TABLE)
}

/// Reads or writes memory.
pub fn has_memory_effects(ctx: &IrContext, op: OpRef) -> bool {
    let t = traits_of(ctx, op);
    t.contains(Traits::MEM_READ) || t.contains(Traits::MEM_WRITE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookup() {
        let t = op_traits(Symbol::new("arith"), Symbol::new("addi"));
        assert!(t.contains(Traits::PURE));
        assert!(t.contains(Traits::SAME_OPERANDS_AND_RESULT_TYPE));
        assert!(!t.contains(Traits::TERMINATOR));
    }

    #[test]
    fn unknown_ops_have_no_traits() {
        let t = op_traits(Symbol::new("nope"), Symbol::new("nothing"));
        assert_eq!(t, Traits::NONE);
    }

    #[test]
    fn terminators() {
        assert!(op_traits(Symbol::new("func"), Symbol::new("return"))
            .contains(Traits::TERMINATOR));
        assert!(op_traits(Symbol::new("cf"), Symbol::new("cond_br"))
            .contains(Traits::KNOWN_TERMINATOR_SUCCESSORS));
        assert!(!op_traits(Symbol::new("arith"), Symbol::new("addi"))
            .contains(Traits::TERMINATOR));
    }
}
