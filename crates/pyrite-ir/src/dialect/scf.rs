//! Structured control flow: region-based `if`, `for`, `parallel` and the
//! wrapper region used by the force-inliner.

use crate::{dialect, symbols, Symbol};

dialect! {
    mod scf {
        fn r#if(cond) -> #[rest] results {
            #[region(then_region)] {}
            #[region(else_region)] {}
        };

        /// Counted loop; body block args are (induction var, iter args...).
        fn r#for(lower, upper, step, #[rest] init) -> #[rest] results {
            #[region(body)] {}
        };

        /// Parallel loop nest over `num_loops` axes. Operands are the
        /// concatenation of lower bounds, upper bounds and steps, each
        /// `num_loops` long; the body block has one index argument per axis.
        /// `mapping` (when present) is a per-axis processor assignment.
        #[attr(num_loops: u64, mapping?: any)]
        fn parallel(#[rest] bounds) {
            #[region(body)] {}
        };

        /// Reduction declared inside a `parallel`; the body combines two
        /// partial values and yields the merged one.
        fn reduce(operand) {
            #[region(body)] {}
        };

        /// General loop: `before` computes the continuation condition,
        /// `after` is the loop body.
        fn r#while(#[rest] init) -> #[rest] results {
            #[region(before)] {}
            #[region(after)] {}
        };

        /// Terminator of a `while` condition region; `args` feed the body.
        fn condition(cond, #[rest] args);

        /// Terminator for structured-control-flow regions.
        fn r#yield(#[rest] values);

        /// Single-block region executed in place; lowering target for the
        /// force-inliner.
        fn execute_region() -> #[rest] results {
            #[region(body)] {}
        };
    }
}

symbols! {
    MAP_BLOCK_X => "block_x",
    MAP_BLOCK_Y => "block_y",
    MAP_BLOCK_Z => "block_z",
    MAP_THREAD_X => "thread_x",
    MAP_THREAD_Y => "thread_y",
    MAP_THREAD_Z => "thread_z",
    MAP_SEQUENTIAL => "sequential",
}

/// Processor assignment for one parallel axis.
pub mod mapping {
    use crate::Symbol;

    pub fn block(dim: usize) -> Symbol {
        match dim {
            0 => *super::MAP_BLOCK_X,
            1 => *super::MAP_BLOCK_Y,
            2 => *super::MAP_BLOCK_Z,
            _ => *super::MAP_SEQUENTIAL,
        }
    }

    pub fn thread(dim: usize) -> Symbol {
        match dim {
            0 => *super::MAP_THREAD_X,
            1 => *super::MAP_THREAD_Y,
            2 => *super::MAP_THREAD_Z,
            _ => *super::MAP_SEQUENTIAL,
        }
    }

    pub fn sequential() -> Symbol {
        *super::MAP_SEQUENTIAL
    }

    /// Axis `i` of a tiled 3x3 grid/block schedule: grid axes map to
    /// blocks, block axes to threads, the tail stays sequential.
    pub fn for_tiled_axis(i: usize) -> Symbol {
        if i < 3 {
            block(i)
        } else if i < 6 {
            thread(i - 3)
        } else {
            sequential()
        }
    }
}

impl Parallel {
    /// Lower bounds slice (first `num_loops` operands).
    pub fn lower_bounds<'a>(&self, ctx: &'a crate::IrContext) -> &'a [crate::ValueRef] {
        let n = self.num_loops(ctx) as usize;
        &ctx.op_operands(self.op_ref())[..n]
    }

    pub fn upper_bounds<'a>(&self, ctx: &'a crate::IrContext) -> &'a [crate::ValueRef] {
        let n = self.num_loops(ctx) as usize;
        &ctx.op_operands(self.op_ref())[n..2 * n]
    }

    pub fn steps<'a>(&self, ctx: &'a crate::IrContext) -> &'a [crate::ValueRef] {
        let n = self.num_loops(ctx) as usize;
        &ctx.op_operands(self.op_ref())[2 * n..3 * n]
    }
}
